use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{BranchName, ProjectName, WorktreeKey};
use crate::error::BridgeError;

/// A distinguishable conversation thread in the front end, or a terminal invocation.
///
/// The text form (`chat:<id>[:<thread>]`, `term:<name>`) is the persisted key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChatContext {
    Chat { chat_id: i64, thread_id: Option<i64> },
    Terminal { name: String },
}

impl ChatContext {
    pub fn chat(chat_id: i64, thread_id: Option<i64>) -> Self {
        Self::Chat { chat_id, thread_id }
    }

    pub fn terminal(name: impl Into<String>) -> Self {
        Self::Terminal { name: name.into() }
    }
}

impl fmt::Display for ChatContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatContext::Chat {
                chat_id,
                thread_id: Some(thread),
            } => write!(f, "chat:{}:{}", chat_id, thread),
            ChatContext::Chat {
                chat_id,
                thread_id: None,
            } => write!(f, "chat:{}", chat_id),
            ChatContext::Terminal { name } => write!(f, "term:{}", name),
        }
    }
}

impl FromStr for ChatContext {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BridgeError::not_found("chat context", s);

        if let Some(name) = s.strip_prefix("term:") {
            if name.is_empty() {
                return Err(malformed());
            }
            return Ok(Self::terminal(name));
        }

        let rest = s.strip_prefix("chat:").ok_or_else(malformed)?;
        let mut parts = rest.splitn(2, ':');
        let chat_id = parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .ok_or_else(malformed)?;
        let thread_id = match parts.next() {
            Some(p) => Some(p.parse::<i64>().map_err(|_| malformed())?),
            None => None,
        };
        Ok(Self::chat(chat_id, thread_id))
    }
}

impl TryFrom<String> for ChatContext {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChatContext> for String {
    fn from(value: ChatContext) -> Self {
        value.to_string()
    }
}

/// An engine-owned, continuable conversation. The id is preserved byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationRef {
    pub engine: String,
    pub id: String,
}

impl ConversationRef {
    pub fn new(engine: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            id: id.into(),
        }
    }
}

/// What a chat context is bound to. This is exactly what a resume token carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBinding {
    pub project: ProjectName,
    #[serde(default)]
    pub branch: Option<BranchName>,
    #[serde(default)]
    pub conversation: Option<ConversationRef>,
}

impl SessionBinding {
    pub fn new(key: WorktreeKey, conversation: Option<ConversationRef>) -> Self {
        Self {
            project: key.project,
            branch: key.branch,
            conversation,
        }
    }

    pub fn key(&self) -> WorktreeKey {
        WorktreeKey::new(self.project.clone(), self.branch.clone())
    }
}

/// A chat context's binding plus bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub context: ChatContext,
    pub binding: SessionBinding,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(context: ChatContext, binding: SessionBinding) -> Self {
        let now = Utc::now();
        Self {
            context,
            binding,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
