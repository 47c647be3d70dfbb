//! Shell-script stand-ins for the downloader binary.
//!
//! Each script counts its invocations in `<dir>/attempts` (so `$n` is the
//! 1-based attempt number inside the body) and appends its arguments to
//! `<dir>/args`, one line per attempt.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Held by every test that spawns processes. Writing an executable while
/// another thread forks can fail the exec with ETXTBSY.
pub static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

pub struct FakeDownloader {
    dir: TempDir,
    program: PathBuf,
}

impl FakeDownloader {
    /// Write an executable script running `body` after the bookkeeping prologue.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("fake-dl");
        let state = dir.path().display().to_string();
        let script = format!(
            "#!/bin/sh\n\
             n=$(( $(cat \"{state}/attempts\" 2>/dev/null || echo 0) + 1 ))\n\
             echo \"$n\" > \"{state}/attempts\"\n\
             echo \"$*\" >> \"{state}/args\"\n\
             {body}\n"
        );
        fs::write(&program, script).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, program }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn attempts(&self) -> u32 {
        fs::read_to_string(self.dir.path().join("attempts"))
            .map(|s| s.trim().parse().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Arguments of every attempt so far, space-joined.
    pub fn args(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("args"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

pub const FORBIDDEN: &str = "ERROR: unable to download video data: HTTP Error 403: Forbidden";
pub const NO_DATA_BLOCKS: &str = "ERROR: Did not get any data blocks";

/// Prints a destination line and `\r`-separated progress, then succeeds.
pub fn succeed() -> String {
    "echo \"[download] Destination: video.mp4\"\n\
     printf '[download]  50.0%% of 1.00MiB\\r[download] 100.0%% of 1.00MiB\\n'\n\
     exit 0"
        .to_string()
}

/// Fails with `line` on stderr for the first `times` attempts, then succeeds.
pub fn fail_with_then_succeed(line: &str, times: u32) -> String {
    format!(
        "if [ \"$n\" -le {times} ]; then\n\
           echo \"{line}\" >&2\n\
           exit 1\n\
         fi\n\
         {}",
        succeed()
    )
}

/// Never finishes on its own.
pub fn hang() -> String {
    "exec sleep 30".to_string()
}
