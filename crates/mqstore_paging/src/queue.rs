//! In-memory delivery queue fed by depaging.

use crate::error::{PagingError, PagingResult};
use crate::message::PagedMessage;
use crate::storage::PagingStorage;
use crate::store::DepageListener;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The message.
    pub message: PagedMessage,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
    seq: u64,
}

#[derive(Debug)]
struct InFlight {
    delivery: Delivery,
    acked_by: Option<u64>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    delivering: HashMap<u64, InFlight>,
    tx_acks: HashMap<u64, Vec<u64>>,
    done: u64,
    seq: u64,
}

/// Queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Waiting for a consumer.
    pub ready: usize,
    /// Handed out and not yet settled.
    pub delivering: usize,
    /// Acknowledged for good.
    pub done: u64,
}

/// FIFO queue with plain and transactional acknowledgement.
///
/// A transactional acknowledgement only marks the message done when the
/// transaction commits. Until then the message cannot be cancelled back to
/// the queue, and a rollback puts it back at the front for redelivery.
///
/// Settled durable messages are removed from `storage`, if one is set.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    storage: Option<Arc<dyn PagingStorage>>,
}

impl MemoryQueue {
    /// Creates an empty queue without durable storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue that forgets settled durable messages in
    /// `storage`.
    #[must_use]
    pub fn with_storage(storage: Arc<dyn PagingStorage>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            storage: Some(storage),
        }
    }

    /// Appends `message`.
    pub fn enqueue(&self, message: PagedMessage) {
        let mut state = self.state.lock();
        state.seq += 1;
        let seq = state.seq;
        state.ready.push_back(Delivery {
            message,
            delivery_count: 0,
            seq,
        });
    }

    /// Hands out the oldest ready message.
    pub fn receive(&self) -> Option<Delivery> {
        let mut state = self.state.lock();
        let mut delivery = state.ready.pop_front()?;
        delivery.delivery_count += 1;
        state.delivering.insert(
            delivery.message.message_id,
            InFlight {
                delivery: delivery.clone(),
                acked_by: None,
            },
        );
        Some(delivery)
    }

    /// Settles a delivered message.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NotDelivering`] if the message is not out for
    /// delivery, [`PagingError::AlreadyAcknowledged`] if a transaction holds
    /// its acknowledgement, or a storage error.
    pub fn acknowledge(&self, message_id: u64) -> PagingResult<PagedMessage> {
        let message = {
            let mut state = self.state.lock();
            match state.delivering.get(&message_id) {
                None => return Err(PagingError::NotDelivering { message_id }),
                Some(InFlight {
                    acked_by: Some(tx_id),
                    ..
                }) => {
                    return Err(PagingError::AlreadyAcknowledged {
                        message_id,
                        tx_id: *tx_id,
                    })
                }
                Some(_) => {}
            }
            let Some(in_flight) = state.delivering.remove(&message_id) else {
                return Err(PagingError::NotDelivering { message_id });
            };
            state.done += 1;
            in_flight.delivery.message
        };
        self.forget(std::slice::from_ref(&message))?;
        Ok(message)
    }

    /// Acknowledges a delivered message inside transaction `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NotDelivering`] if the message is not out for
    /// delivery (for example because it was cancelled first), or
    /// [`PagingError::AlreadyAcknowledged`] if a transaction already holds
    /// its acknowledgement.
    pub fn acknowledge_transactional(&self, tx_id: u64, message_id: u64) -> PagingResult<()> {
        let mut state = self.state.lock();
        let in_flight = state
            .delivering
            .get_mut(&message_id)
            .ok_or(PagingError::NotDelivering { message_id })?;
        if let Some(holder) = in_flight.acked_by {
            return Err(PagingError::AlreadyAcknowledged {
                message_id,
                tx_id: holder,
            });
        }
        in_flight.acked_by = Some(tx_id);
        state.tx_acks.entry(tx_id).or_default().push(message_id);
        Ok(())
    }

    /// Returns a delivered message to the front of the queue.
    ///
    /// Returns `Ok(false)` without effect if a transaction holds the
    /// message's acknowledgement; the transaction decides its fate.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NotDelivering`] if the message is not out for
    /// delivery.
    pub fn cancel(&self, message_id: u64) -> PagingResult<bool> {
        let mut state = self.state.lock();
        match state.delivering.get(&message_id) {
            None => Err(PagingError::NotDelivering { message_id }),
            Some(in_flight) if in_flight.acked_by.is_some() => Ok(false),
            Some(_) => {
                if let Some(in_flight) = state.delivering.remove(&message_id) {
                    state.ready.push_front(in_flight.delivery);
                }
                Ok(true)
            }
        }
    }

    /// Marks every message acknowledged in `tx_id` as done and returns them.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a durable message cannot be forgotten. The
    /// messages are done in memory regardless.
    pub fn commit(&self, tx_id: u64) -> PagingResult<Vec<PagedMessage>> {
        let messages: Vec<PagedMessage> = {
            let mut state = self.state.lock();
            let ids = state.tx_acks.remove(&tx_id).unwrap_or_default();
            let messages: Vec<PagedMessage> = ids
                .iter()
                .filter_map(|id| state.delivering.remove(id))
                .map(|in_flight| in_flight.delivery.message)
                .collect();
            state.done += messages.len() as u64;
            messages
        };
        self.forget(&messages)?;
        Ok(messages)
    }

    /// Returns every message acknowledged in `tx_id` to the front of the
    /// queue, in their original order. Returns how many were returned.
    pub fn rollback(&self, tx_id: u64) -> usize {
        let mut state = self.state.lock();
        let ids = state.tx_acks.remove(&tx_id).unwrap_or_default();
        let mut returned: Vec<Delivery> = ids
            .iter()
            .filter_map(|id| state.delivering.remove(id))
            .map(|in_flight| in_flight.delivery)
            .collect();
        returned.sort_by_key(|d| d.seq);
        let count = returned.len();
        for delivery in returned.into_iter().rev() {
            state.ready.push_front(delivery);
        }
        count
    }

    /// Current counts.
    #[must_use]
    pub fn counts(&self) -> QueueCounts {
        let state = self.state.lock();
        QueueCounts {
            ready: state.ready.len(),
            delivering: state.delivering.len(),
            done: state.done,
        }
    }

    fn forget(&self, messages: &[PagedMessage]) -> PagingResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        for message in messages.iter().filter(|m| m.durable) {
            storage.message_done(message.message_id)?;
        }
        Ok(())
    }
}

impl DepageListener for MemoryQueue {
    fn on_depage(&self, _address: &str, messages: Vec<PagedMessage>) {
        for message in messages {
            self.enqueue(message);
        }
    }
}

impl fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("counts", &self.counts())
            .finish_non_exhaustive()
    }
}
