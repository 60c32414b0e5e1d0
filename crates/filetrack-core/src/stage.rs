//! Stage definitions and the fixed stage order

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Processing stage of a permit file.
///
/// Declaration order is the stage order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Prelims,
    Production,
    Completed,
    Qc,
    Delivered,
}

impl Stage {
    /// All stages in order.
    pub const ALL: [Stage; 5] = [
        Stage::Prelims,
        Stage::Production,
        Stage::Completed,
        Stage::Qc,
        Stage::Delivered,
    ];

    /// Position in the stage order (0..=4).
    pub fn index(self) -> usize {
        match self {
            Self::Prelims => 0,
            Self::Production => 1,
            Self::Completed => 2,
            Self::Qc => 3,
            Self::Delivered => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The single legal successor, `None` for the terminal stage.
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// The single allowed predecessor, `None` for the first stage.
    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Delivered
    }

    /// Whether completing the last task of this stage advances the file
    /// without a human decision. COMPLETED is a review gate.
    pub fn auto_advances(self) -> bool {
        matches!(self, Self::Prelims | Self::Production | Self::Qc)
    }

    /// Wire name (`PRELIMS`, `QC`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prelims => "PRELIMS",
            Self::Production => "PRODUCTION",
            Self::Completed => "COMPLETED",
            Self::Qc => "QC",
            Self::Delivered => "DELIVERED",
        }
    }

    /// Human-facing label.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Prelims => "Prelims",
            Self::Production => "Production",
            Self::Completed => "Completed",
            Self::Qc => "Quality Control",
            Self::Delivered => "Delivered",
        }
    }

    /// Permit status shown to downstream consumers for a file sitting in this stage.
    pub fn permit_status(self) -> &'static str {
        match self {
            Self::Prelims => "IN_PRELIMS",
            Self::Production => "IN_PRODUCTION",
            Self::Completed => "COMPLETED",
            Self::Qc => "IN_QC",
            Self::Delivered => "DELIVERED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stage name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage: {}", self.0)
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for Stage {
    type Err = UnknownStage;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == upper)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Whether a stage entry is still being worked or has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    InProgress,
    Completed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_matches_index() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(Stage::from_index(i), Some(*stage));
        }
        assert!(Stage::Prelims < Stage::Production);
        assert!(Stage::Qc < Stage::Delivered);
    }

    #[test]
    fn next_and_previous() {
        assert_eq!(Stage::Prelims.next(), Some(Stage::Production));
        assert_eq!(Stage::Qc.next(), Some(Stage::Delivered));
        assert_eq!(Stage::Delivered.next(), None);
        assert_eq!(Stage::Prelims.previous(), None);
        assert_eq!(Stage::Completed.previous(), Some(Stage::Production));
    }

    #[test]
    fn completed_is_a_manual_gate() {
        assert!(Stage::Prelims.auto_advances());
        assert!(Stage::Production.auto_advances());
        assert!(!Stage::Completed.auto_advances());
        assert!(Stage::Qc.auto_advances());
        assert!(!Stage::Delivered.auto_advances());
    }

    #[test]
    fn parse_case_insensitive() {
        assert_eq!("qc".parse::<Stage>().unwrap(), Stage::Qc);
        assert_eq!(" Production ".parse::<Stage>().unwrap(), Stage::Production);
        assert!("REVIEW".parse::<Stage>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Stage::Qc).unwrap();
        assert_eq!(json, r#""QC""#);
        let status = serde_json::to_string(&StageStatus::InProgress).unwrap();
        assert_eq!(status, r#""IN_PROGRESS""#);
    }

    #[test]
    fn permit_status_projection() {
        assert_eq!(Stage::Prelims.permit_status(), "IN_PRELIMS");
        assert_eq!(Stage::Completed.permit_status(), "COMPLETED");
        assert_eq!(Stage::Qc.permit_status(), "IN_QC");
    }
}
