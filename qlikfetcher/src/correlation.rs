//! Request/reply correlation for one Engine API session.
//!
//! The engine answers requests over a single websocket, not necessarily in the
//! order they were sent, and some requests can only be built once an earlier
//! reply has been seen (the document handle returned by `OpenDoc` is needed to
//! list the document's objects). [`ReplyCorrelation`] is the state shared by the
//! sending and the receiving side of a session:
//!
//! * the ids still waiting for a reply, and the method every id was sent with
//!   (kept after the reply arrived);
//! * replies received but not yet consumed;
//! * interface handles learned from replies;
//! * a sticky "a reply arrived" flag the sender can wait on.
//!
//! The tracker performs no I/O and never allocates ids itself.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;

use crate::protocol::EngineReply;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("request id {0} is not pending")]
    UnknownRequest(u64),

    #[error("request id {0} was already recorded in this session")]
    DuplicateRequest(u64),

    #[error("reply to request id {0} is not buffered")]
    UnknownReply(u64),

    #[error("interface handle '{0}' is not known yet")]
    MissingHandle(String),
}

pub type CorrelationResult<T> = std::result::Result<T, CorrelationError>;

#[derive(Debug, Default)]
struct CorrelationState {
    /// Every id ever recorded, with its method. Superset of `pending`.
    history: HashMap<u64, String>,
    pending: HashSet<u64>,
    unhandled: Vec<EngineReply>,
    handles: HashMap<String, i64>,
}

#[derive(Debug)]
pub struct ReplyCorrelation {
    state: Mutex<CorrelationState>,
    reply_arrived: watch::Sender<bool>,
}

impl Default for ReplyCorrelation {
    fn default() -> Self {
        let (reply_arrived, _) = watch::channel(false);
        Self {
            state: Mutex::new(CorrelationState::default()),
            reply_arrived,
        }
    }
}

impl ReplyCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    // Every method holds the lock for a single step and never across an await,
    // so a poisoned lock still guards consistent state.
    fn state(&self) -> MutexGuard<'_, CorrelationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a request that was just sent.
    ///
    /// Ids must be unique for the whole session: an id already present in the
    /// history is rejected, even if its reply was processed.
    pub fn record_pending(&self, id: u64, method: &str) -> CorrelationResult<()> {
        let mut state = self.state();
        if state.history.contains_key(&id) {
            return Err(CorrelationError::DuplicateRequest(id));
        }
        state.history.insert(id, method.to_string());
        state.pending.insert(id);
        Ok(())
    }

    /// Registers several requests sharing one method. Nothing is recorded if
    /// any id is a duplicate.
    pub fn record_pending_many(&self, ids: &[u64], method: &str) -> CorrelationResult<()> {
        let mut state = self.state();
        let mut seen = HashSet::with_capacity(ids.len());
        for &id in ids {
            if state.history.contains_key(&id) || !seen.insert(id) {
                return Err(CorrelationError::DuplicateRequest(id));
            }
        }
        for &id in ids {
            state.history.insert(id, method.to_string());
            state.pending.insert(id);
        }
        Ok(())
    }

    /// Removes `id` from the pending set. Its method stays in the history.
    pub fn clear_pending(&self, id: u64) -> CorrelationResult<()> {
        if self.state().pending.remove(&id) {
            Ok(())
        } else {
            Err(CorrelationError::UnknownRequest(id))
        }
    }

    /// True iff `id` is still waiting for its reply and was sent as `method`.
    pub fn is_pending(&self, id: u64, method: &str) -> bool {
        let state = self.state();
        state.pending.contains(&id) && state.history.get(&id).is_some_and(|m| m == method)
    }

    /// True iff `id` was sent as `method`, pending or not.
    pub fn is_method(&self, id: u64, method: &str) -> bool {
        self.state().history.get(&id).is_some_and(|m| m == method)
    }

    pub fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.state().pending.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn add_unhandled(&self, reply: EngineReply) {
        self.state().unhandled.push(reply);
    }

    /// Drops the first buffered reply equal to `reply`.
    pub fn remove_unhandled(&self, reply: &EngineReply) -> CorrelationResult<()> {
        let mut state = self.state();
        match state.unhandled.iter().position(|buffered| buffered == reply) {
            Some(index) => {
                state.unhandled.remove(index);
                Ok(())
            }
            None => Err(CorrelationError::UnknownReply(reply.id)),
        }
    }

    /// Snapshot of the buffered replies, in arrival order.
    pub fn list_unhandled(&self) -> Vec<EngineReply> {
        self.state().unhandled.clone()
    }

    /// The exchange is done once nothing is pending and nothing is buffered.
    pub fn is_complete(&self) -> bool {
        let state = self.state();
        state.pending.is_empty() && state.unhandled.is_empty()
    }

    pub fn notify_reply_arrived(&self) {
        self.reply_arrived.send_replace(true);
    }

    pub fn has_reply_notification(&self) -> bool {
        *self.reply_arrived.borrow()
    }

    pub fn clear_reply_notification(&self) {
        self.reply_arrived.send_replace(false);
    }

    /// Resolves as soon as the arrival flag is set; immediately if it already is.
    ///
    /// The flag stays set until [`clear_reply_notification`](Self::clear_reply_notification),
    /// so arrivals between two waits are coalesced into one wake-up, never lost.
    pub async fn await_reply_arrival(&self) {
        let mut arrivals = self.reply_arrived.subscribe();
        // The sender is owned by `self`, so the channel cannot close while we wait.
        let _ = arrivals.wait_for(|arrived| *arrived).await;
    }

    pub fn set_handle(&self, key: &str, handle: i64) {
        self.state().handles.insert(key.to_string(), handle);
    }

    pub fn get_handle(&self, key: &str) -> CorrelationResult<i64> {
        self.state()
            .handles
            .get(key)
            .copied()
            .ok_or_else(|| CorrelationError::MissingHandle(key.to_string()))
    }
}
