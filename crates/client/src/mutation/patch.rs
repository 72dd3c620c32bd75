// Optimistic patch records and the field values they carry.

use std::collections::BTreeSet;
use std::fmt;

use snapfeed_common::types::{PostId, SaveRecordId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchField {
    LikedBy,
    Saved,
}

impl PatchField {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LikedBy => "liked_by",
            Self::Saved => "saved",
        }
    }
}

/// `(target_id, field)`: the unit of at-most-one-in-flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchKey {
    pub target: PostId,
    pub field: PatchField,
}

impl PatchKey {
    pub fn liked_by(target: PostId) -> Self {
        Self { target, field: PatchField::LikedBy }
    }

    pub fn saved(target: PostId) -> Self {
        Self { target, field: PatchField::Saved }
    }
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.field.as_str())
    }
}

/// Viewer-relative save state of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveState {
    NotSaved,
    /// Saved locally; the service has not returned a record id yet.
    Saving,
    Saved(SaveRecordId),
}

impl SaveState {
    pub fn is_saved(&self) -> bool {
        !matches!(self, Self::NotSaved)
    }

    pub fn record_id(&self) -> Option<&SaveRecordId> {
        match self {
            Self::Saved(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    LikedBy(BTreeSet<UserId>),
    Saved(SaveState),
}

impl FieldValue {
    pub fn field(&self) -> PatchField {
        match self {
            Self::LikedBy(_) => PatchField::LikedBy,
            Self::Saved(_) => PatchField::Saved,
        }
    }

    /// Whether two values express the same user-visible state. A save that
    /// is still in flight counts as saved.
    pub fn same_intent(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (Self::LikedBy(a), Self::LikedBy(b)) => a == b,
            (Self::Saved(a), Self::Saved(b)) => a.is_saved() == b.is_saved(),
            _ => false,
        }
    }

    pub fn liked_by(&self) -> Option<&BTreeSet<UserId>> {
        match self {
            Self::LikedBy(set) => Some(set),
            Self::Saved(_) => None,
        }
    }

    pub fn save_state(&self) -> Option<&SaveState> {
        match self {
            Self::Saved(state) => Some(state),
            Self::LikedBy(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStatus {
    Pending,
    Committed,
    RolledBack,
}

/// A local change applied ahead of service confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticPatch {
    pub target_id: PostId,
    pub field: PatchField,
    pub previous_value: FieldValue,
    pub proposed_value: FieldValue,
    pub status: PatchStatus,
}

impl OptimisticPatch {
    pub fn new(key: &PatchKey, previous_value: FieldValue, proposed_value: FieldValue) -> Self {
        Self {
            target_id: key.target.clone(),
            field: key.field,
            previous_value,
            proposed_value,
            status: PatchStatus::Pending,
        }
    }

    pub fn commit(&mut self) {
        self.status = PatchStatus::Committed;
    }

    /// Mark rolled back and hand back the value to restore.
    pub fn roll_back(&mut self) -> FieldValue {
        self.status = PatchStatus::RolledBack;
        self.previous_value.clone()
    }
}
