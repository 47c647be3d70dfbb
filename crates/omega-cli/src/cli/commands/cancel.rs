//! `omega cancel <code>` and `omega shutdown` – talk to a running `omega run`.

use anyhow::{bail, Result};
use omega_core::control::{default_control_socket_path, ControlCommand, ControlReply};

use crate::cli::control_socket;

async fn send(cmd: ControlCommand) -> Result<usize> {
    let path = default_control_socket_path()?;
    match control_socket::send_command(&path, &cmd).await? {
        ControlReply::Ok(n) => Ok(n),
        ControlReply::Error(msg) => bail!("`{}` rejected: {}", cmd, msg),
    }
}

pub async fn run_cancel(code: &str) -> Result<()> {
    match send(ControlCommand::Cancel(code.to_string())).await? {
        0 => println!("No active download for {code}"),
        n => println!("Cancelled {n} download(s) of {code}"),
    }
    Ok(())
}

pub async fn run_shutdown() -> Result<()> {
    send(ControlCommand::Shutdown).await?;
    println!("Shutdown requested");
    Ok(())
}
