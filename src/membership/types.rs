use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Host,
    Member,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Host => "host",
            Self::Member => "member",
        };
        write!(f, "{label}")
    }
}

/// Normalized index document stored at `{parent}/{index_collection}/{user_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberIndexEntry {
    pub user_id: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

impl MemberIndexEntry {
    pub fn new(user_id: &str, role: MemberRole, joined_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            role,
            joined_at,
        }
    }
}

/// Reverse lookup request: parents `member_id` belongs to, newest membership first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListForUserQuery {
    pub member_id: String,
    /// Zero means the configured default page size.
    pub limit: usize,
    /// `next_cursor` of the previous page.
    pub cursor: Option<String>,
}

impl ListForUserQuery {
    pub fn new(member_id: &str) -> Self {
        Self {
            member_id: member_id.to_string(),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}
