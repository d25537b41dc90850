//! Matches JSON-RPC responses to the callbacks waiting on them.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use super::rpc::RpcReply;

/// Invoked at most once with the reply to the call it was registered for.
/// Any extra context the caller needs travels inside the closure.
pub type RpcCallback = Box<dyn FnOnce(RpcReply) + Send + 'static>;

#[derive(Debug, Error, PartialEq)]
pub enum CorrelatorError {
    #[error("no pending call with id {0}")]
    UnknownCall(u64),
}

pub struct PendingCall {
    pub id: u64,
    pub method: String,
    pub params: Value,
    callback: RpcCallback,
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Request id counter plus the table of calls still awaiting a response.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    last_id: u64,
    pending: HashMap<u64, PendingCall>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id. A pending entry is only kept when there is
    /// someone to deliver the response to.
    pub fn register(&mut self, method: &str, params: &Value, callback: Option<RpcCallback>) -> u64 {
        self.last_id += 1;
        let id = self.last_id;
        if let Some(callback) = callback {
            self.pending.insert(
                id,
                PendingCall {
                    id,
                    method: method.to_string(),
                    params: params.clone(),
                    callback,
                },
            );
        }
        id
    }

    /// Remove the entry for `id` and hand it the response.
    pub fn resolve(&mut self, id: u64, response: Value) -> Result<(), CorrelatorError> {
        let call = self.pending.remove(&id).ok_or(CorrelatorError::UnknownCall(id))?;
        tracing::trace!("Resolving call {} ({})", id, call.method);
        (call.callback)(RpcReply {
            response,
            method: call.method,
            params: call.params,
        });
        Ok(())
    }

    /// Forget the entry for `id` without invoking it, e.g. when the frame never left.
    pub fn cancel(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Drop every pending call without notifying it. Used on connection teardown.
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.pending.len();
        if abandoned > 0 {
            tracing::debug!("Abandoning {} pending calls", abandoned);
        }
        self.pending.clear();
        abandoned
    }
}
