//! Session registry
//!
//! Maps each chat context to its current [`SessionBinding`]. Lookups are O(1) on a
//! hash map keyed by context. Every mutation happens under the write lock on a copy
//! of the map, which replaces the live map only once `sessions.json` has been
//! written. Writes are serialized, a failed write changes nothing, and a restart
//! sees exactly the last acknowledged state.
//!
//! The registry never creates sessions implicitly: `resolve` on an unknown context
//! is `NotFound`, and creation is an explicit `bind`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::domain::{ChatContext, ConversationRef, Session, SessionBinding, WorktreeKey};
use crate::error::{BridgeError, Result};
use crate::state::{JsonFile, SESSIONS_FILE};

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ChatContext, Session>>,
    file: JsonFile,
}

impl SessionRegistry {
    pub fn open(state_dir: &Path) -> Result<Self> {
        let file = JsonFile::in_dir(state_dir, SESSIONS_FILE);
        let entries: Vec<Session> = file.load_or_default()?;
        let sessions = entries
            .into_iter()
            .map(|s| (s.context.clone(), s))
            .collect();
        Ok(Self {
            sessions: RwLock::new(sessions),
            file,
        })
    }

    pub fn resolve(&self, context: &ChatContext) -> Result<Session> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(context)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("session", context.to_string()))
    }

    /// Create a session for `context`.
    ///
    /// Binding again to the identical binding returns the existing session.
    /// Binding to anything else fails with `ContextBound`; use [`Self::rebind`].
    pub fn bind(&self, context: &ChatContext, binding: SessionBinding) -> Result<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = sessions.get(context) {
            if existing.binding == binding {
                return Ok(existing.clone());
            }
            return Err(BridgeError::ContextBound(context.to_string()));
        }

        let session = Session::new(context.clone(), binding);
        let mut next = sessions.clone();
        next.insert(context.clone(), session.clone());
        self.commit(&mut sessions, next)?;

        tracing::debug!(context = %context, key = %session.binding.key(), "bound session");
        Ok(session)
    }

    /// Replace the binding of an existing session
    pub fn rebind(&self, context: &ChatContext, binding: SessionBinding) -> Result<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let mut session = sessions
            .get(context)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("session", context.to_string()))?;

        session.binding = binding;
        session.touch();
        let mut next = sessions.clone();
        next.insert(context.clone(), session.clone());
        self.commit(&mut sessions, next)?;

        tracing::debug!(context = %context, key = %session.binding.key(), "rebound session");
        Ok(session)
    }

    /// Record the conversation a finished run ended in (`None` forgets an expired one).
    ///
    /// Only applies if the session is still bound to `key`; a session that moved to
    /// another branch meanwhile is left alone. Returns whether anything changed.
    pub fn record_conversation(
        &self,
        context: &ChatContext,
        key: &WorktreeKey,
        conversation: Option<ConversationRef>,
    ) -> Result<bool> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let Some(mut session) = sessions.get(context).cloned() else {
            return Ok(false);
        };
        if &session.binding.key() != key {
            return Ok(false);
        }

        session.binding.conversation = conversation;
        session.touch();
        let mut next = sessions.clone();
        next.insert(context.clone(), session);
        self.commit(&mut sessions, next)?;
        Ok(true)
    }

    pub fn unbind(&self, context: &ChatContext) -> Result<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let mut next = sessions.clone();
        let removed = next
            .remove(context)
            .ok_or_else(|| BridgeError::not_found("session", context.to_string()))?;
        self.commit(&mut sessions, next)?;
        Ok(removed)
    }

    /// All sessions, most recently active first
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist `next`, then make it the live map. Called with the write lock held.
    fn commit(
        &self,
        live: &mut HashMap<ChatContext, Session>,
        next: HashMap<ChatContext, Session>,
    ) -> Result<()> {
        let mut entries: Vec<&Session> = next.values().collect();
        entries.sort_by(|a, b| a.context.cmp(&b.context));
        self.file.save(&entries)?;
        *live = next;
        Ok(())
    }
}
