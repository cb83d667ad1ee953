use std::fmt;

/// Lifecycle of an entity handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Built but not tracked by any entity manager.
    New,
    /// Tracked; the insert is pending.
    Managed,
    /// Written to storage.
    Persisted,
    /// Persisted, deletion pending.
    Removed,
    /// No longer tracked. Every read fails.
    Detached,
}

impl EntityState {
    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Managed | Self::Persisted | Self::Removed)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Managed => write!(f, "MANAGED"),
            Self::Persisted => write!(f, "PERSISTED"),
            Self::Removed => write!(f, "REMOVED"),
            Self::Detached => write!(f, "DETACHED"),
        }
    }
}
