use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Why a [`StreamSlot::pop`] returned without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PopError {
    Timeout(Duration),
    Cancelled,
    Closed,
}

/// A single-item blocking handoff between the receive path and one waiter.
///
/// `push` blocks while the slot is occupied. Only `close` releases a blocked
/// pusher; there is no bounded push.
pub(crate) struct StreamSlot<T> {
    state: Mutex<SlotState<T>>,
    changed: Condvar,
}

struct SlotState<T> {
    item: Option<T>,
    closed: bool,
    cancels: u64,
}

impl<T> StreamSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                item: None,
                closed: false,
                cancels: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `item`, waiting for the slot to drain first.
    ///
    /// Hands the item back if the slot is or becomes closed.
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(item);
            }
            if state.item.is_none() {
                state.item = Some(item);
                self.changed.notify_all();
                return Ok(());
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Store `item` only if the slot is free.
    pub(crate) fn offer(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed || state.item.is_some() {
            return Err(item);
        }
        state.item = Some(item);
        self.changed.notify_all();
        Ok(())
    }

    /// Take the item, waiting up to `timeout` (forever if `None`).
    ///
    /// A [`StreamSlot::cancel`] issued while waiting ends the wait.
    pub(crate) fn pop(&self, timeout: Option<Duration>) -> Result<T, PopError> {
        let deadline = timeout.map(|limit| (limit, Instant::now() + limit));
        let mut state = self.lock();
        let cancels = state.cancels;
        loop {
            if let Some(item) = state.item.take() {
                self.changed.notify_all();
                return Ok(item);
            }
            if state.closed {
                return Err(PopError::Closed);
            }
            if state.cancels != cancels {
                return Err(PopError::Cancelled);
            }
            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
                Some((limit, deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PopError::Timeout(limit));
                    }
                    self.changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }

    /// Release whoever is currently blocked in `pop`.
    pub(crate) fn cancel(&self) {
        let mut state = self.lock();
        state.cancels = state.cancels.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Drop any pending item without waiting.
    pub(crate) fn clear(&self) -> Option<T> {
        let mut state = self.lock();
        let item = state.item.take();
        self.changed.notify_all();
        item
    }

    /// Refuse further items and wake every waiter.
    pub(crate) fn close(&self) -> Option<T> {
        let mut state = self.lock();
        state.closed = true;
        let item = state.item.take();
        self.changed.notify_all();
        item
    }

    pub(crate) fn reopen(&self) {
        self.lock().closed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop() {
        let slot = StreamSlot::new();
        slot.push(1).unwrap();
        assert_eq!(slot.pop(None), Ok(1));
    }

    #[test]
    fn pop_times_out() {
        let slot: StreamSlot<u8> = StreamSlot::new();
        let limit = Duration::from_millis(20);
        assert_eq!(slot.pop(Some(limit)), Err(PopError::Timeout(limit)));
    }

    #[test]
    fn second_push_waits_for_drain() {
        let slot = Arc::new(StreamSlot::new());
        slot.push(1).unwrap();

        let pusher = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.push(2))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!pusher.is_finished());

        assert_eq!(slot.pop(None), Ok(1));
        pusher.join().unwrap().unwrap();
        assert_eq!(slot.pop(None), Ok(2));
    }

    #[test]
    fn offer_does_not_block() {
        let slot = StreamSlot::new();
        slot.offer(1).unwrap();
        assert_eq!(slot.offer(2), Err(2));
        assert_eq!(slot.clear(), Some(1));
        assert_eq!(slot.clear(), None);
    }

    #[test]
    fn cancel_releases_waiter() {
        let slot: Arc<StreamSlot<u8>> = Arc::new(StreamSlot::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.pop(None))
        };
        while !waiter.is_finished() {
            slot.cancel();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(waiter.join().unwrap(), Err(PopError::Cancelled));
    }

    #[test]
    fn cancel_without_waiter_does_not_affect_next_pop() {
        let slot = StreamSlot::new();
        slot.cancel();
        slot.push(5).unwrap();
        assert_eq!(slot.pop(Some(Duration::from_millis(10))), Ok(5));
    }

    #[test]
    fn close_releases_pusher_and_popper() {
        let slot = Arc::new(StreamSlot::new());
        slot.push(1).unwrap();
        let pusher = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.push(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(slot.close(), Some(1));
        assert_eq!(pusher.join().unwrap(), Err(2));
        assert_eq!(slot.pop(None), Err(PopError::Closed));

        slot.reopen();
        slot.push(3).unwrap();
        assert_eq!(slot.pop(None), Ok(3));
    }
}
