use std::os::unix::net::UnixStream;

use mmagic_datalink::SlipPort;
use mmagic_llc::{CommandId, StreamId};
use mmagic_m2m::{Controller, ControllerConfig};
use tracing::debug;

use crate::cmd::{parse_duration, parse_hex, SendArgs};
use crate::exit::{datalink_error, io_error, m2m_error, CliError, CliResult, SUCCESS};
use crate::output::{print_response, OutputFormat, ResponseOutput};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let stream_id = StreamId::new(args.stream)
        .map_err(|err| CliError::usage(format!("invalid --stream: {err}")))?;
    let command = CommandId::new(args.subsystem, args.command, args.subcommand);
    let payload = resolve_payload(&args)?;

    let socket =
        UnixStream::connect(&args.path).map_err(|err| io_error("connect failed", err))?;
    let port = SlipPort::unix(socket).map_err(|err| datalink_error("connect failed", err))?;
    let controller = Controller::init(
        port,
        ControllerConfig {
            response_timeout: Some(timeout),
            ..ControllerConfig::default()
        },
    )
    .map_err(|err| m2m_error("connect failed", err))?;

    let result = round_trip(&controller, stream_id, command, &payload, timeout);
    controller.deinit();
    let response = result?;

    print_response(
        &ResponseOutput::new(stream_id.get(), command, &response),
        format,
    );
    Ok(SUCCESS)
}

fn round_trip(
    controller: &Controller,
    stream_id: StreamId,
    command: CommandId,
    payload: &[u8],
    timeout: std::time::Duration,
) -> CliResult<bytes::Bytes> {
    controller
        .wait_for_agent(timeout)
        .map_err(|err| m2m_error("agent did not announce itself", err))?;
    debug!(sid = %stream_id, command = %command, "sending command");

    let stream = controller
        .open_stream(stream_id)
        .map_err(|err| m2m_error("open stream failed", err))?;
    stream
        .request(command, payload)
        .map_err(|err| m2m_error("command failed", err))
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(hex) = &args.hex {
        return parse_hex(hex);
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> SendArgs {
        SendArgs {
            path: PathBuf::from("/tmp/unused.sock"),
            stream: 0,
            subsystem: 5,
            command: 2,
            subcommand: 0,
            data: None,
            hex: None,
            timeout: "1s".to_string(),
        }
    }

    #[test]
    fn payload_from_data_or_hex() {
        assert!(resolve_payload(&args()).unwrap().is_empty());
        let data = SendArgs {
            data: Some("hi".to_string()),
            ..args()
        };
        assert_eq!(resolve_payload(&data).unwrap(), b"hi");
        let hex = SendArgs {
            hex: Some("0102".to_string()),
            ..args()
        };
        assert_eq!(resolve_payload(&hex).unwrap(), vec![1, 2]);
    }

    #[test]
    fn out_of_range_stream_is_a_usage_error() {
        let bad = SendArgs {
            stream: 32,
            ..args()
        };
        let err = run(bad, OutputFormat::Json).unwrap_err();
        assert_eq!(err.code, crate::exit::USAGE);
    }
}
