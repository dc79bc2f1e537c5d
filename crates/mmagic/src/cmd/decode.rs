use mmagic_llc::{
    decode_frame, CommandHeader, EventHeader, PacketType, ResponseHeader, SyncRequest,
    SyncResponse, M2M_HEADER_SIZE,
};

use crate::cmd::{parse_hex, DecodeArgs};
use crate::exit::{llc_error, CliResult, SUCCESS};
use crate::output::{payload_preview, print_frame, subsystem_label, FrameOutput, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let frame = parse_hex(&args.frame)?;
    let out = describe(&frame)?;
    print_frame(&out, format);
    Ok(SUCCESS)
}

fn describe(frame: &[u8]) -> CliResult<FrameOutput> {
    let (header, payload) = decode_frame(frame).map_err(|err| llc_error("bad frame", err))?;
    let ptype = header.packet_type().ok();

    let (m2m, body) = match ptype {
        Some(PacketType::Command) => {
            let command = CommandHeader::decode(payload)
                .map_err(|err| llc_error("bad command header", err))?;
            (Some(command_label(command.id)), &payload[M2M_HEADER_SIZE..])
        }
        Some(PacketType::Response) => {
            let response = ResponseHeader::decode(payload)
                .map_err(|err| llc_error("bad response header", err))?;
            let label = format!("{} result={}", command_label(response.id), response.status());
            (Some(label), &payload[M2M_HEADER_SIZE..])
        }
        Some(PacketType::Event) => {
            let event =
                EventHeader::decode(payload).map_err(|err| llc_error("bad event header", err))?;
            let label = format!("{} event={}", subsystem_label(event.subsystem), event.event);
            (Some(label), &payload[M2M_HEADER_SIZE..])
        }
        Some(PacketType::SyncReq) => {
            let request =
                SyncRequest::decode(payload).map_err(|err| llc_error("bad sync request", err))?;
            (Some(format!("token={:#010x}", request.token)), &payload[..0])
        }
        Some(PacketType::SyncResp) => {
            let response =
                SyncResponse::decode(payload).map_err(|err| llc_error("bad sync response", err))?;
            let last_seen = response
                .last_seen_seq
                .map(|seq| seq.to_string())
                .unwrap_or_else(|| "none".to_string());
            let label = format!(
                "token={:#010x} last_seen={last_seen} version={}",
                response.token, response.protocol_version
            );
            (Some(label), &payload[..0])
        }
        _ => (None, payload),
    };

    Ok(FrameOutput {
        packet_type: ptype
            .map(|ptype| ptype.name().to_string())
            .unwrap_or_else(|| format!("UNKNOWN({})", header.ptype)),
        seq: header.seq.get(),
        stream: header.sid,
        length: header.length,
        m2m,
        payload_size: body.len(),
        payload: payload_preview(body),
        raw: body.to_vec(),
    })
}

fn command_label(id: mmagic_llc::CommandId) -> String {
    format!(
        "{}/{}/{}",
        subsystem_label(id.subsystem),
        id.command,
        id.subcommand
    )
}
