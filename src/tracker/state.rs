use std::fmt;

/// Lifecycle of a tracked entity instance.
///
/// ```text
/// Detached ──add──> Added ──persist──> Unchanged <──persist── Modified
///                     │                     │                     ^
///                     │                  mutate ─────────────────-┘
///                     │                     │
///                  delete               delete ──> Deleted ──persist──> Detached
/// ```
///
/// `Modified` is never stored eagerly: mutation is detected by comparing
/// current values against the load snapshot when a change set is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Detached,
    Added,
    Unchanged,
    Modified,
    Deleted,
}

impl EntityState {
    /// Whether the instance participates in change-set computation.
    pub fn is_tracked(&self) -> bool {
        !matches!(self, Self::Detached)
    }

    /// Whether a commit would emit a statement for this instance
    /// (Unchanged still needs a snapshot diff to decide).
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => write!(f, "DETACHED"),
            Self::Added => write!(f, "ADDED"),
            Self::Unchanged => write!(f, "UNCHANGED"),
            Self::Modified => write!(f, "MODIFIED"),
            Self::Deleted => write!(f, "DELETED"),
        }
    }
}
