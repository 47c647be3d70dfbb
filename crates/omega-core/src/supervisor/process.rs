//! `tokio::process` implementation of `Launcher`.

use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::mpsc;
use url::Url;

use super::lines::pump_lines;
use super::{AttemptEvent, AttemptEventKind, LaunchError, LaunchRequest, Launcher, LineStream};

/// Build the page URL the downloader is pointed at: `<base>?v=<code>`.
pub fn build_video_url(base: &str, code: &str) -> Result<Url, LaunchError> {
    let mut url = Url::parse(base).map_err(|e| LaunchError::InvalidUrl {
        code: code.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().append_pair("v", code);
    Ok(url)
}

/// Spawns the configured downloader binary, one child per attempt.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    video_url_base: String,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>, video_url_base: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            video_url_base: video_url_base.into(),
        }
    }

    pub fn from_config(cfg: &crate::config::OmegaConfig) -> Self {
        Self::new(&cfg.downloader_program, &cfg.video_url_base)
    }

    /// Arguments for one attempt: the video URL followed by any override flags.
    pub fn args_for(&self, request: &LaunchRequest) -> Result<Vec<String>, LaunchError> {
        let url = build_video_url(&self.video_url_base, &request.video_code)?;
        let mut args = Vec::with_capacity(1 + request.extra_args.len());
        args.push(url.to_string());
        args.extend(request.extra_args.iter().cloned());
        Ok(args)
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        request: LaunchRequest,
        events: mpsc::Sender<AttemptEvent>,
    ) -> Result<(), LaunchError> {
        let args = self.args_for(&request)?;
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;

        tracing::debug!(
            task = %request.task_id,
            attempt = request.attempt,
            pid = ?child.id(),
            "spawned {} {:?}",
            self.program,
            args
        );

        let LaunchRequest {
            task_id,
            attempt,
            cancel,
            ..
        } = request;
        let out_pump = pump_lines(stdout, LineStream::Stdout, task_id.clone(), attempt, events.clone());
        let err_pump = pump_lines(stderr, LineStream::Stderr, task_id.clone(), attempt, events.clone());

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = cancel.cancelled() => {
                    tracing::info!(task = %task_id, attempt, "killing downloader on cancel");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(task = %task_id, "kill failed: {}", e);
                    }
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(task = %task_id, attempt, "wait on downloader failed: {}", e);
                    None
                }
            };

            // Lines must reach the dispatcher before the exit does.
            let _ = out_pump.await;
            let _ = err_pump.await;

            let _ = events
                .send(AttemptEvent {
                    task_id,
                    attempt,
                    kind: AttemptEventKind::Exited { code },
                })
                .await;
        });

        Ok(())
    }
}
