//! Exclusive per-stream request handles.

use std::time::Duration;

use bytes::Bytes;
use mmagic_llc::{CommandId, StreamId};

use crate::controller::Controller;
use crate::error::Result;

#[cfg(feature = "async")]
use crate::error::M2mError;
#[cfg(feature = "async")]
use tokio_util::sync::CancellationToken;

#[cfg(feature = "async")]
const CANCEL_RETRY: Duration = Duration::from_millis(5);

/// A stream checked out with [`Controller::open_stream`].
///
/// Holding the handle guarantees at most one outstanding request on the
/// stream. The stream is released when the handle drops.
pub struct StreamHandle {
    controller: Controller,
    id: StreamId,
}

impl StreamHandle {
    pub(crate) fn new(controller: Controller, id: StreamId) -> Self {
        Self { controller, id }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Send `command` and wait for its response payload, up to the
    /// controller's configured response timeout.
    pub fn request(&self, command: CommandId, payload: &[u8]) -> Result<Bytes> {
        self.request_timeout(command, payload, self.controller.config().response_timeout)
    }

    pub fn request_timeout(
        &self,
        command: CommandId,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        self.controller.discard_pending(self.id);
        self.controller.tx(self.id, command, payload)?;
        self.controller.rx_bytes(self.id, command, timeout)
    }

    /// Run the round trip on the blocking pool.
    ///
    /// Resolves to [`M2mError::Cancelled`] once `cancel` fires and to
    /// [`M2mError::Timeout`] after `timeout`; the blocked waiter is released
    /// in both cases before this returns.
    #[cfg(feature = "async")]
    pub async fn request_async(
        &self,
        command: CommandId,
        payload: Bytes,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let controller = self.controller.clone();
        let id = self.id;
        let mut task = tokio::task::spawn_blocking(move || {
            controller.discard_pending(id);
            controller.tx(id, command, &payload)?;
            controller.rx_bytes(id, command, None)
        });

        let limit = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let err = tokio::select! {
            joined = &mut task => {
                return joined
                    .map_err(|err| M2mError::Task(err.to_string()))
                    .and_then(|result| result);
            }
            () = cancel.cancelled() => M2mError::Cancelled,
            () = limit => M2mError::Timeout(timeout.unwrap_or_default()),
        };

        // The task may not have reached its wait yet, so keep cancelling
        // until it has finished.
        loop {
            self.controller.cancel(id);
            tokio::select! {
                _ = &mut task => break,
                () = tokio::time::sleep(CANCEL_RETRY) => {}
            }
        }
        Err(err)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.controller.release_stream(self.id);
    }
}
