//! Table of open sessions of one resource kind.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tvtuner_protocol::ResourceId;

/// Open sessions keyed by resource id.
///
/// The table only stores and swaps entries. Closing a displaced session is
/// the caller's job, after the table lock has been dropped.
pub struct SessionTable<S> {
    sessions: HashMap<ResourceId, Arc<S>>,
}

impl<S> SessionTable<S> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Get the session currently installed for `id`.
    pub fn get(&self, id: ResourceId) -> Option<Arc<S>> {
        self.sessions.get(&id).cloned()
    }

    /// Remove and return the session for `id`.
    pub fn take(&mut self, id: ResourceId) -> Option<Arc<S>> {
        self.sessions.remove(&id)
    }

    /// Install `session` for `id`, returning the session it displaced.
    pub fn install(&mut self, id: ResourceId, session: Arc<S>) -> Option<Arc<S>> {
        let displaced = self.sessions.insert(id, session);
        if displaced.is_some() {
            debug!("Session {} displaced an existing session", id);
        }
        displaced
    }

    /// Remove the entry for `id` only if it is `session` itself.
    pub fn release(&mut self, id: ResourceId, session: &Arc<S>) -> bool {
        match self.sessions.get(&id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                self.sessions.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Remove every session.
    pub fn drain(&mut self) -> Vec<Arc<S>> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<S> Default for SessionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
