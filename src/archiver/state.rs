use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an archive.
///
/// The current state is never stored on the archive row; it is whatever the
/// most recent transition says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ArchiveState {
    pub const INITIAL: Self = Self::Pending;

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine accepts `self -> to`.
    ///
    /// `pending -> failed` exists only for the disabled short-circuit, and
    /// `processing -> processing` records a retry attempt.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing | Self::Failed)
                | (Self::Processing, Self::Processing | Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
