//! Split a child pipe into lines and forward them as attempt events.

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{AttemptEvent, AttemptEventKind, LineStream};
use crate::task::TaskId;

/// Longest line forwarded in one piece. Output without a terminator past this
/// size is sent in chunks of this length.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Read `rd` until EOF, sending one `Line` event per `\n`- or `\r`-terminated
/// line (the downloader redraws progress with bare carriage returns). The last
/// partial line is flushed at EOF. Returns the number of bytes read.
pub fn pump_lines<R>(
    mut rd: R,
    stream: LineStream,
    task_id: TaskId,
    attempt: u32,
    events: mpsc::Sender<AttemptEvent>,
) -> JoinHandle<u64>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8 * 1024];
        let mut line_buf: Vec<u8> = Vec::with_capacity(4 * 1024);
        let mut total = 0u64;

        let send = |line: &[u8]| {
            let event = AttemptEvent {
                task_id: task_id.clone(),
                attempt,
                kind: AttemptEventKind::Line {
                    stream,
                    line: String::from_utf8_lossy(line).into_owned(),
                },
            };
            let events = events.clone();
            async move { events.send(event).await.is_ok() }
        };

        loop {
            let n = match rd.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(task = %task_id, ?stream, "pipe read failed: {}", e);
                    break;
                }
            };
            total += n as u64;

            line_buf.extend_from_slice(&buf[..n]);
            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n' || b == b'\r') {
                let one: Vec<u8> = line_buf.drain(..=pos).collect();
                let content = &one[..one.len() - 1];
                // "\r\n" produces an empty segment; skip it.
                if content.is_empty() {
                    continue;
                }
                if !send(content).await {
                    return total;
                }
            }
            while line_buf.len() >= MAX_LINE_BYTES {
                let chunk: Vec<u8> = line_buf.drain(..MAX_LINE_BYTES).collect();
                if !send(&chunk).await {
                    return total;
                }
            }
        }

        if !line_buf.is_empty() {
            send(&line_buf).await;
        }

        total
    })
}
