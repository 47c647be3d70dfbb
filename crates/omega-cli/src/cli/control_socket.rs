//! Control socket: server (during `omega run`) and client (for `omega cancel`
//! and `omega shutdown`). Wire format lives in `omega_core::control`.

use anyhow::{anyhow, Context, Result};
use omega_core::control::{ControlCommand, ControlReply};
use omega_core::scheduler::OrchestratorHandle;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Binds `path` (replacing a stale socket) and spawns a task that forwards
/// each command line to the orchestrator and writes back one reply line.
pub fn spawn_control_listener(
    handle: OrchestratorHandle,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind control socket {}", path.display()))?;

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(stream, handle.clone()));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    }))
}

async fn serve_connection(stream: UnixStream, handle: OrchestratorHandle) {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match ControlCommand::parse(&line) {
            Ok(cmd) => {
                tracing::info!(command = %cmd, "control command");
                execute(&handle, cmd).await
            }
            Err(e) => ControlReply::Error(e.to_string()),
        };
        if wr.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn execute(handle: &OrchestratorHandle, cmd: ControlCommand) -> ControlReply {
    let result = match cmd {
        ControlCommand::Cancel(code) => handle.cancel(&code).await,
        ControlCommand::Shutdown => handle.shutdown().await.map(|()| 0),
    };
    match result {
        Ok(n) => ControlReply::Ok(n),
        Err(e) => ControlReply::Error(format!("{:#}", e)),
    }
}

/// Sends one command and waits for its reply.
pub async fn send_command(socket_path: &Path, cmd: &ControlCommand) -> Result<ControlReply> {
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "connect to {} (is `omega run` running?)",
            socket_path.display()
        )
    })?;
    let (rd, mut wr) = stream.into_split();
    wr.write_all(format!("{}\n", cmd).as_bytes()).await?;

    let mut lines = BufReader::new(rd).lines();
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("control socket closed without a reply"))?;
    ControlReply::parse(&line).ok_or_else(|| anyhow!("malformed control reply: {}", line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use omega_core::queue_db::QueueDb;
    use omega_core::scheduler::{Orchestrator, OrchestratorConfig};
    use omega_core::supervisor::ProcessLauncher;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_and_shutdown_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let db = QueueDb::open_at(dir.path().join("queue.db")).await.unwrap();
        let cfg = OrchestratorConfig::from_config(&Default::default());
        let orch = Orchestrator::new(
            cfg,
            Arc::new(db),
            Arc::new(ProcessLauncher::new("true", "https://www.youtube.com/watch")),
            dir.path().join("logs"),
        );
        let socket = dir.path().join("control.sock");
        let listener = spawn_control_listener(orch.handle(), &socket).unwrap();
        let run = tokio::spawn(orch.run());

        let reply = send_command(&socket, &ControlCommand::Cancel("abc123".into()))
            .await
            .unwrap();
        assert_eq!(reply, ControlReply::Ok(0));

        let reply = send_command(&socket, &ControlCommand::Shutdown).await.unwrap();
        assert_eq!(reply, ControlReply::Ok(0));

        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("orchestrator stopped")
            .unwrap()
            .unwrap();
        assert_eq!(summary.completed + summary.failed + summary.cancelled, 0);
        listener.abort();
    }

    #[tokio::test]
    async fn connect_error_mentions_run() {
        let dir = tempfile::tempdir().unwrap();
        let err = send_command(&dir.path().join("missing.sock"), &ControlCommand::Shutdown)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("omega run"));
    }
}
