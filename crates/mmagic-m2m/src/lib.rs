//! Controller and agent ends of the MMAGIC M2M protocol.
//!
//! The [`Controller`] sends commands and waits for their responses on up to
//! [`MAX_STREAMS`](mmagic_llc::MAX_STREAMS) independent streams, tracks the
//! agent restart handshake and dispatches unsolicited events. The [`Agent`]
//! is the other end: it executes commands through a [`CommandHandler`] on a
//! worker per open stream.
//!
//! Both sit on any [`mmagic_datalink::Datalink`].

pub mod agent;
pub mod controller;
pub mod error;
pub mod events;
mod slot;
pub mod stats;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{Agent, AgentConfig, CommandHandler, ResetHook};
pub use controller::{AgentState, Controller, ControllerConfig};
pub use error::{M2mError, Result};
pub use events::{BeaconRxHandler, StandbyExitHandler};
pub use stats::LinkStats;
pub use stream::StreamHandle;
