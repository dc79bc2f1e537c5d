//! Routing of unsolicited EVENT frames to registered handlers.

use std::sync::{Arc, RwLock};

use mmagic_datalink::Mmbuf;
use mmagic_llc::{
    BeaconRxArgs, EventHeader, StandbyExitArgs, StreamId, Subsystem, WlanEvent, M2M_HEADER_SIZE,
};
use tracing::{debug, trace};

/// Called with the vendor IEs of each received beacon.
pub type BeaconRxHandler = Arc<dyn Fn(&BeaconRxArgs) + Send + Sync>;

/// Called when the agent leaves standby.
pub type StandbyExitHandler = Arc<dyn Fn(&StandbyExitArgs) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    beacon_rx: RwLock<Option<BeaconRxHandler>>,
    standby_exit: RwLock<Option<StandbyExitHandler>>,
}

impl EventHandlers {
    pub(crate) fn set_beacon_rx(&self, handler: Option<BeaconRxHandler>) {
        *self.beacon_rx.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    pub(crate) fn set_standby_exit(&self, handler: Option<StandbyExitHandler>) {
        *self.standby_exit.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    /// Hand an event payload to its handler.
    ///
    /// Returns `true` if a handler ran. Events on other than the control
    /// stream, events without a handler and ids this side does not know are
    /// all discarded quietly, so newer agents can add events freely.
    pub(crate) fn dispatch(&self, sid: StreamId, mut buf: Mmbuf) -> bool {
        if !sid.is_control() {
            debug!(sid = %sid, "event on non-control stream discarded");
            return false;
        }

        let header = buf.remove_from_start(M2M_HEADER_SIZE).map(EventHeader::decode);
        let Some(Ok(header)) = header else {
            debug!("event too short for header, discarded");
            return false;
        };

        let args = buf.data();
        match (
            Subsystem::try_from(header.subsystem),
            WlanEvent::try_from(header.event),
        ) {
            (Ok(Subsystem::Wlan), Ok(WlanEvent::BeaconRx)) => {
                let handler = self
                    .beacon_rx
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                let Some(handler) = handler else {
                    return false;
                };
                match BeaconRxArgs::decode(args) {
                    Ok(args) => {
                        handler(&args);
                        true
                    }
                    Err(err) => {
                        debug!(error = %err, "malformed beacon rx event discarded");
                        false
                    }
                }
            }
            (Ok(Subsystem::Wlan), Ok(WlanEvent::StandbyExit)) => {
                let handler = self
                    .standby_exit
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                let Some(handler) = handler else {
                    return false;
                };
                match StandbyExitArgs::decode(args) {
                    Ok(args) => {
                        handler(&args);
                        true
                    }
                    Err(err) => {
                        debug!(error = %err, "malformed standby exit event discarded");
                        false
                    }
                }
            }
            _ => {
                trace!(
                    subsystem = header.subsystem,
                    event = header.event,
                    "unhandled event ignored"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use mmagic_llc::StandbyExitReason;

    fn event(subsystem: u8, event: u8, args: &[u8]) -> Mmbuf {
        let mut buf = Mmbuf::from_slice(&EventHeader::new(subsystem, event).encode());
        buf.append_data(args);
        buf
    }

    fn beacon(ies: &'static [u8]) -> Mmbuf {
        let args = BeaconRxArgs::new(ies).unwrap();
        event(Subsystem::Wlan.into(), WlanEvent::BeaconRx.into(), &args.encode())
    }

    #[test]
    fn beacon_handler_receives_ies() {
        let handlers = EventHandlers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handlers.set_beacon_rx(Some(Arc::new(move |args: &BeaconRxArgs| {
            sink.lock().unwrap().push(args.vendor_ies().clone());
        })));

        assert!(handlers.dispatch(StreamId::new(0).unwrap(), beacon(b"\xdd\x01z")));
        assert_eq!(seen.lock().unwrap()[0].as_ref(), b"\xdd\x01z");
    }

    #[test]
    fn standby_exit_handler_receives_reason() {
        let handlers = EventHandlers::default();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        handlers.set_standby_exit(Some(Arc::new(move |args: &StandbyExitArgs| {
            *sink.lock().unwrap() = Some(args.reason);
        })));

        let buf = event(1, 2, &[2, 0, 0, 0]);
        assert!(handlers.dispatch(StreamId::new(0).unwrap(), buf));
        assert_eq!(*seen.lock().unwrap(), Some(StandbyExitReason::Associate));
    }

    #[test]
    fn event_without_handler_is_discarded() {
        let handlers = EventHandlers::default();
        assert!(!handlers.dispatch(StreamId::new(0).unwrap(), beacon(b"ie")));
    }

    #[test]
    fn event_on_other_stream_is_discarded() {
        let handlers = EventHandlers::default();
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        handlers.set_beacon_rx(Some(Arc::new(move |_: &BeaconRxArgs| {
            *flag.lock().unwrap() = true;
        })));

        assert!(!handlers.dispatch(StreamId::new(4).unwrap(), beacon(b"ie")));
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn unknown_ids_and_short_events_are_ignored() {
        let handlers = EventHandlers::default();
        handlers.set_beacon_rx(Some(Arc::new(|_: &BeaconRxArgs| {})));
        let control = StreamId::new(0).unwrap();

        assert!(!handlers.dispatch(control, event(9, 1, &[])));
        assert!(!handlers.dispatch(control, event(1, 7, &[])));
        assert!(!handlers.dispatch(control, Mmbuf::from_slice(&[1, 1])));
    }
}
