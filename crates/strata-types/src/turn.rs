//! [`Turn`] – one message in a conversation.
//!
//! Turns are immutable values.  Their identity is content-addressed: the
//! [`TurnId`] is a UUID v5 derived from role, content, timestamp and parent
//! ids, so re-ingesting an identical turn yields the same id.
//!
//! # Example
//!
//! ```rust
//! use strata_types::{Role, Turn};
//!
//! let turn = Turn::new(Role::User, "Where did I leave the keys?");
//! assert!(turn.token_count > 0);
//! assert_eq!(turn.id(), turn.clone().id());
//! ```

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content-addressed identifier of a [`Turn`].
pub type TurnId = Uuid;

/// Namespace used to derive v5 turn ids.
const TURN_NAMESPACE: Uuid = Uuid::from_u128(0x5d1c_7a3e_2b84_4f0e_9a61_3c2d_8e47_b915);

// ─────────────────────────────────────────────────────────────────────────────
// Role
// ─────────────────────────────────────────────────────────────────────────────

/// The participant that produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parse the lowercase wire name of a role.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token estimation
// ─────────────────────────────────────────────────────────────────────────────

/// Rough token estimate: whitespace-separated words × 1.3, at least 1 for
/// non-empty text and 0 for empty text.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    if words == 0 {
        return 0;
    }
    ((words as f64 * 1.3) as usize).max(1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Turn
// ─────────────────────────────────────────────────────────────────────────────

/// A single message.
///
/// `parent_ids` is an ordered set of earlier turn ids, which lets a
/// conversation branch into a graph rather than a strict log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub content: String,
    pub role: Role,
    /// Non-decreasing within one session.
    pub timestamp: DateTime<Utc>,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_ids: Vec<TurnId>,
}

impl Turn {
    /// Create a turn stamped with the current time and an estimated token
    /// count.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            content,
            role,
            timestamp: Utc::now(),
            token_count,
            model: None,
            confidence: None,
            tags: BTreeSet::new(),
            parent_ids: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Override the token count.  Zero means "unknown" and is replaced with
    /// an estimate when the turn is ingested.
    pub fn with_token_count(mut self, token_count: usize) -> Self {
        self.token_count = token_count;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Append a parent id, ignoring duplicates so the list stays an ordered
    /// set.
    pub fn with_parent(mut self, parent: TurnId) -> Self {
        if !self.parent_ids.contains(&parent) {
            self.parent_ids.push(parent);
        }
        self
    }

    /// Content-addressed identifier of this turn.
    pub fn id(&self) -> TurnId {
        let mut key = format!(
            "{}:{}:{}:",
            self.role,
            self.timestamp.timestamp_nanos_opt().unwrap_or_default(),
            self.content
        );
        for parent in &self.parent_ids {
            key.push_str(&parent.simple().to_string());
            key.push(',');
        }
        Uuid::new_v5(&TURN_NAMESPACE, key.as_bytes())
    }

    /// Return a copy with `token_count` estimated from the content when it
    /// was supplied as zero.
    pub fn with_estimated_tokens(mut self) -> Self {
        if self.token_count == 0 {
            self.token_count = estimate_tokens(&self.content);
        }
        self
    }
}
