//! Control protocol between `omega run` and other `omega` invocations.
//!
//! One command per line over a Unix socket: `cancel <code>` or `shutdown`.
//! The server answers each command with one line: `ok <n>` (number of tasks
//! affected) or `error <message>`.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Cancel active tasks for a video code.
    Cancel(String),
    /// Graceful stop: kill running downloads and return their items to the queue.
    Shutdown,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ControlParseError {
    #[error("empty command")]
    Empty,
    #[error("`cancel` needs a video code")]
    MissingCode,
    #[error("unknown command `{0}`")]
    Unknown(String),
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, ControlParseError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        match verb {
            "" => Err(ControlParseError::Empty),
            "cancel" if rest.is_empty() => Err(ControlParseError::MissingCode),
            "cancel" => Ok(ControlCommand::Cancel(rest.to_string())),
            "shutdown" => Ok(ControlCommand::Shutdown),
            other => Err(ControlParseError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Cancel(code) => write!(f, "cancel {}", code),
            ControlCommand::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Server answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Ok(usize),
    Error(String),
}

impl ControlReply {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if let Some(n) = line.strip_prefix("ok ") {
            return n.trim().parse().ok().map(ControlReply::Ok);
        }
        line.strip_prefix("error ")
            .map(|msg| ControlReply::Error(msg.trim().to_string()))
    }
}

impl fmt::Display for ControlReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlReply::Ok(n) => write!(f, "ok {}", n),
            ControlReply::Error(msg) => write!(f, "error {}", msg),
        }
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("omega")?.get_state_home();
    Ok(dir.join("control.sock"))
}
