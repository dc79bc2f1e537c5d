use std::io::ErrorKind;
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use mmagic_datalink::{SlipPort, SlipRole};
use mmagic_llc::{CommandId, Status, StreamId, Subsystem};
use mmagic_m2m::{Agent, AgentConfig, CommandHandler};
use tracing::{info, warn};

use crate::cmd::AgentArgs;
use crate::exit::{datalink_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// `sys/1/0` returns the version, `sys/2/*` echoes the payload.
pub const SYS_VERSION: u8 = 1;
pub const SYS_ECHO: u8 = 2;

/// Commands served by the demo agent.
pub struct DemoHandler {
    version: Bytes,
}

impl DemoHandler {
    pub fn new(version: &str) -> Self {
        Self {
            version: Bytes::copy_from_slice(version.as_bytes()),
        }
    }
}

impl CommandHandler for DemoHandler {
    fn handle(
        &self,
        stream: StreamId,
        command: CommandId,
        payload: &[u8],
    ) -> Result<Bytes, Status> {
        info!(sid = %stream, command = %command, len = payload.len(), "command");
        if command.subsystem != u8::from(Subsystem::Sys) {
            return Err(Status::NotSupported);
        }
        match command.command {
            SYS_VERSION => Ok(self.version.clone()),
            SYS_ECHO => Ok(Bytes::copy_from_slice(payload)),
            _ => Err(Status::InvalidArg),
        }
    }
}

pub fn run(args: AgentArgs) -> CliResult<i32> {
    // A stale socket file from an earlier run would make bind fail.
    if args.path.exists() {
        std::fs::remove_file(&args.path)
            .map_err(|err| io_error("failed removing stale socket", err))?;
    }
    let listener = UnixListener::bind(&args.path).map_err(|err| io_error("bind failed", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| io_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let config = AgentConfig {
        app_version: args
            .app_version
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        send_start_notification: !args.no_start_notification,
    };
    info!(path = %args.path.display(), "agent listening");

    // One controller at a time; a new connection replaces the current one.
    let mut current: Option<Agent> = None;
    while running.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(io_error("accept failed", err)),
        };
        stream
            .set_nonblocking(false)
            .map_err(|err| io_error("accept failed", err))?;

        if let Some(previous) = current.take() {
            info!("controller replaced");
            previous.deinit();
        }
        let port = SlipPort::unix(stream)
            .map_err(|err| datalink_error("accept failed", err))?
            .with_role(SlipRole::Agent);
        match Agent::init(port, DemoHandler::new(&config.app_version), config.clone()) {
            Ok(agent) => current = Some(agent),
            Err(err) => warn!(error = %err, "failed to start agent for connection"),
        }
    }

    if let Some(agent) = current {
        agent.deinit();
    }
    let _ = std::fs::remove_file(&args.path);
    info!("agent stopped");
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sys(command: u8) -> CommandId {
        CommandId::new(Subsystem::Sys.into(), command, 0)
    }

    #[test]
    fn demo_handler_commands() {
        let handler = DemoHandler::new("1.2.3");
        let stream = StreamId::new(0).unwrap();
        assert_eq!(
            handler.handle(stream, sys(SYS_VERSION), &[]),
            Ok(Bytes::from_static(b"1.2.3"))
        );
        assert_eq!(
            handler.handle(stream, sys(SYS_ECHO), b"abc"),
            Ok(Bytes::from_static(b"abc"))
        );
        assert_eq!(
            handler.handle(stream, sys(9), &[]),
            Err(Status::InvalidArg)
        );
        assert_eq!(
            handler.handle(stream, CommandId::new(1, 1, 0), &[]),
            Err(Status::NotSupported)
        );
    }
}
