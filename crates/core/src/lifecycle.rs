//! Audit timestamps and soft-delete marker shared by every persisted entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation/update/deletion timestamps of a record.
///
/// # Invariants
/// - `created <= updated` at all times.
/// - `deleted == None` means the record is live; once set the record is
///   logically gone but still physically stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub deleted: Option<DateTime<Utc>>,
}

impl Lifecycle {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created: now,
            updated: now,
            deleted: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.deleted.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// Record a mutation.
    ///
    /// Clamped so that a skewed clock can never move `updated` before `created`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated = now.max(self.created);
    }

    /// Mark deleted. Returns `false` if the record was already deleted.
    pub fn soft_delete(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_deleted() {
            return false;
        }
        self.deleted = Some(now);
        self.touch(now);
        true
    }

    /// Clear the deletion marker. Returns `false` if the record was live.
    pub fn undelete(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_live() {
            return false;
        }
        self.deleted = None;
        self.touch(now);
        true
    }
}
