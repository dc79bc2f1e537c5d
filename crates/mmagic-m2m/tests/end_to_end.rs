//! Controller and agent talking to each other over real datalinks.

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use bytes::Bytes;
use mmagic_datalink::{pair, DatalinkInit, SlipConfig, SlipPort, SlipRole};
use mmagic_llc::{
    BeaconRxArgs, CommandId, StandbyExitArgs, StandbyExitReason, Status, StreamId, Subsystem,
    WlanEvent,
};
use mmagic_m2m::{Agent, AgentConfig, AgentState, Controller, ControllerConfig, M2mError};

const WAIT: Duration = Duration::from_secs(2);

fn wlan_ping() -> CommandId {
    CommandId::new(Subsystem::Wlan.into(), 5, 0)
}

fn handler(_: StreamId, command: CommandId, payload: &[u8]) -> Result<Bytes, Status> {
    if command == wlan_ping() {
        return match payload {
            b"X" => Ok(Bytes::from_static(b"Y")),
            _ => Err(Status::InvalidArg),
        };
    }
    if command.subsystem == u8::from(Subsystem::Sys) {
        return Ok(Bytes::copy_from_slice(payload));
    }
    Err(Status::NotSupported)
}

fn config() -> ControllerConfig {
    ControllerConfig {
        response_timeout: Some(WAIT),
        ..ControllerConfig::default()
    }
}

fn connect<C, A>(controller_end: C, agent_end: A) -> (Controller, Agent)
where
    C: DatalinkInit,
    A: DatalinkInit,
{
    let controller = Controller::init(controller_end, config()).unwrap();
    let agent = Agent::init(agent_end, handler, AgentConfig::default()).unwrap();
    controller.wait_for_agent(WAIT).unwrap();
    (controller, agent)
}

fn over_loopback() -> (Controller, Agent) {
    let (a, b) = pair();
    connect(a, b)
}

fn over_slip() -> (Controller, Agent) {
    let (a, b) = UnixStream::pair().unwrap();
    connect(
        SlipPort::unix(a).unwrap(),
        SlipPort::unix(b).unwrap().with_role(SlipRole::Agent),
    )
}

fn over_slip_with_crc() -> (Controller, Agent) {
    let (a, b) = UnixStream::pair().unwrap();
    let with_crc = |role| SlipConfig {
        tx_crc: true,
        role,
        ..SlipConfig::default()
    };
    connect(
        SlipPort::unix(a).unwrap().with_config(with_crc(SlipRole::Controller)),
        SlipPort::unix(b).unwrap().with_config(with_crc(SlipRole::Agent)),
    )
}

fn open_stream_3(agent: &Agent) -> StreamId {
    let mut sid = agent.open_stream().unwrap();
    while sid.get() < 3 {
        sid = agent.open_stream().unwrap();
    }
    sid
}

fn command_round_trip(controller: &Controller, agent: &Agent) {
    let sid = open_stream_3(agent);
    controller.tx(sid, wlan_ping(), b"X").unwrap();

    let mut out = [0u8; 16];
    let n = controller.rx(sid, wlan_ping(), &mut out).unwrap();
    assert_eq!(&out[..n], b"Y");
}

#[test]
fn command_round_trip_over_loopback() {
    let (controller, agent) = over_loopback();
    assert_eq!(controller.agent_state(), AgentState::AgentReady);
    command_round_trip(&controller, &agent);
}

#[test]
fn command_round_trip_over_slip() {
    let (controller, agent) = over_slip();
    command_round_trip(&controller, &agent);
}

#[test]
fn command_round_trip_over_slip_with_crc() {
    let (controller, agent) = over_slip_with_crc();
    assert_eq!(controller.agent_state(), AgentState::AgentReady);
    command_round_trip(&controller, &agent);
}

#[test]
fn agent_error_reaches_caller() {
    let (controller, agent) = over_loopback();
    let sid = open_stream_3(&agent);
    controller.tx(sid, wlan_ping(), b"nope").unwrap();

    let mut out = [0xAAu8; 4];
    let err = controller.rx(sid, wlan_ping(), &mut out).unwrap_err();
    assert!(matches!(err, M2mError::Agent(Status::InvalidArg)));
    assert_eq!(out, [0xAA; 4]);
}

#[test]
fn unsupported_command_reports_status() {
    let (controller, _agent) = over_loopback();
    let stream = controller.open_stream(StreamId::new(0).unwrap()).unwrap();
    let command = CommandId::new(Subsystem::Tcp.into(), 1, 0);
    let err = stream.request(command, &[]).unwrap_err();
    assert_eq!(err.status(), Status::NotSupported);
}

#[test]
fn stream_handle_request() {
    let (controller, _agent) = over_loopback();
    let stream = controller.open_stream(StreamId::new(0).unwrap()).unwrap();
    let echo = CommandId::new(Subsystem::Sys.into(), 2, 0);
    for payload in [&b"one"[..], b"two", b""] {
        assert_eq!(stream.request(echo, payload).unwrap(), payload);
    }
}

#[test]
fn sequence_wraps_across_many_commands() {
    let (controller, _agent) = over_slip();
    let stream = controller.open_stream(StreamId::new(0).unwrap()).unwrap();
    let echo = CommandId::new(Subsystem::Sys.into(), 2, 0);
    for i in 0..40u8 {
        assert_eq!(stream.request(echo, &[i]).unwrap(), vec![i]);
    }
    let stats = controller.stats();
    assert_eq!(stats.repeats_dropped, 0);
    assert_eq!(stats.gaps_detected, 0);
}

#[test]
fn sync_reports_agent_sequence_state() {
    let (controller, agent) = over_loopback();
    let response = controller.sync().unwrap();
    assert_eq!(response.last_seen_seq, None);

    command_round_trip(&controller, &agent);
    let response = controller.sync().unwrap();
    assert_eq!(response.last_seen_seq.map(|seq| seq.get()), Some(1));

    // The next command neither repeats nor skips on the agent side.
    command_round_trip(&controller, &agent);
    assert_eq!(agent.stats().gaps_detected, 0);
    assert_eq!(agent.stats().repeats_dropped, 0);
}

#[test]
fn reset_restarts_agent() {
    let (controller, agent) = over_loopback();
    let (started_tx, started_rx) = mpsc::channel();
    controller.register_agent_start_callback(move |_| {
        let _ = started_tx.send(());
    });
    let resets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resets);
    agent.set_reset_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    command_round_trip(&controller, &agent);
    controller.reset_agent().unwrap();
    started_rx.recv_timeout(WAIT).unwrap();
    controller.wait_for_agent(WAIT).unwrap();

    assert_eq!(resets.load(Ordering::SeqCst), 1);
    assert_eq!(controller.agent_start_count(), 2);

    let stream = controller.open_stream(StreamId::new(0).unwrap()).unwrap();
    let echo = CommandId::new(Subsystem::Sys.into(), 2, 0);
    assert_eq!(stream.request(echo, b"after").unwrap(), &b"after"[..]);
}

#[test]
fn events_reach_registered_handlers() {
    let (controller, agent) = over_slip();
    let (beacon_tx, beacon_rx) = mpsc::channel();
    let (standby_tx, standby_rx) = mpsc::channel();
    controller.register_wlan_beacon_rx_handler(move |args| {
        let _ = beacon_tx.send(args.vendor_ies().clone());
    });
    controller.register_wlan_standby_exit_handler(move |args| {
        let _ = standby_tx.send(args.reason);
    });

    let beacon = BeaconRxArgs::new(vec![0xDD, 0x03, 0x00, 0x50, 0xF2]).unwrap();
    agent
        .send_event(
            Subsystem::Wlan.into(),
            WlanEvent::BeaconRx as u8,
            &beacon.encode(),
        )
        .unwrap();
    let standby = StandbyExitArgs {
        reason: StandbyExitReason::Associate,
    };
    agent
        .send_event(
            Subsystem::Wlan.into(),
            WlanEvent::StandbyExit as u8,
            &standby.encode(),
        )
        .unwrap();

    assert_eq!(
        beacon_rx.recv_timeout(WAIT).unwrap(),
        Bytes::from_static(&[0xDD, 0x03, 0x00, 0x50, 0xF2])
    );
    assert_eq!(
        standby_rx.recv_timeout(WAIT).unwrap(),
        StandbyExitReason::Associate
    );
}

#[test]
fn deinit_fails_later_calls() {
    let (controller, agent) = over_loopback();
    agent.deinit();
    controller.deinit();
    let err = controller
        .tx(StreamId::new(0).unwrap(), wlan_ping(), b"X")
        .unwrap_err();
    assert!(matches!(err, M2mError::Shutdown));
}
