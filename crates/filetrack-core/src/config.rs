//! Workflow configuration: stage thresholds and identity policy
//!
//! These are read-only values handed to the workflow at construction time.
//! Nothing here is mutated after load.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// SLA thresholds for one stage, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageThreshold {
    pub ideal_minutes: i64,
    pub max_minutes: i64,
}

impl StageThreshold {
    pub const fn new(ideal_minutes: i64, max_minutes: i64) -> Self {
        Self {
            ideal_minutes,
            max_minutes,
        }
    }

    /// Both bounds non-negative and `ideal <= max`.
    pub fn is_valid(&self) -> bool {
        0 <= self.ideal_minutes && self.ideal_minutes <= self.max_minutes
    }
}

/// A configured threshold that cannot classify durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidThreshold {
    pub stage: Stage,
    pub threshold: StageThreshold,
}

impl fmt::Display for InvalidThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: thresholds must satisfy 0 <= ideal_minutes <= max_minutes (got ideal {}, max {})",
            self.stage, self.threshold.ideal_minutes, self.threshold.max_minutes
        )
    }
}

impl std::error::Error for InvalidThreshold {}

/// Per-stage thresholds over the fixed stage order.
///
/// Deserializes from a partial map (`[stages.QC] ideal_minutes = 60 ...`);
/// stages absent from the map keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Stage, StageThreshold>", into = "BTreeMap<Stage, StageThreshold>")]
pub struct StageOrder {
    thresholds: [StageThreshold; 5],
}

impl Default for StageOrder {
    fn default() -> Self {
        Self {
            thresholds: [
                StageThreshold::new(20, 30),
                StageThreshold::new(210, 240),
                StageThreshold::new(0, 5),
                StageThreshold::new(90, 120),
                StageThreshold::new(0, 5),
            ],
        }
    }
}

impl TryFrom<BTreeMap<Stage, StageThreshold>> for StageOrder {
    type Error = InvalidThreshold;

    fn try_from(overrides: BTreeMap<Stage, StageThreshold>) -> Result<Self, Self::Error> {
        let mut order = Self::default();
        for (stage, threshold) in overrides {
            if !threshold.is_valid() {
                return Err(InvalidThreshold { stage, threshold });
            }
            order.thresholds[stage.index()] = threshold;
        }
        Ok(order)
    }
}

impl From<StageOrder> for BTreeMap<Stage, StageThreshold> {
    fn from(order: StageOrder) -> Self {
        Stage::ALL
            .into_iter()
            .map(|stage| (stage, order.threshold(stage)))
            .collect()
    }
}

impl StageOrder {
    pub fn threshold(&self, stage: Stage) -> StageThreshold {
        self.thresholds[stage.index()]
    }

    /// Replace one stage's thresholds.
    pub fn with_threshold(mut self, stage: Stage, threshold: StageThreshold) -> Self {
        self.thresholds[stage.index()] = threshold;
        self
    }

    /// Stages paired with their thresholds, in order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, StageThreshold)> + '_ {
        Stage::ALL.into_iter().map(|s| (s, self.threshold(s)))
    }
}

/// How aggressively uploads are collapsed onto existing identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityPolicy {
    /// Treat a matching filename as an identity signal when the fingerprint
    /// misses. Two unrelated files sharing a name become one identity.
    pub trust_filename: bool,
    /// Create identities with an insert-if-absent keyed on the fingerprint.
    /// When off, concurrent identical uploads may create duplicates that
    /// consolidation later merges.
    pub unique_fingerprint: bool,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            trust_filename: true,
            unique_fingerprint: true,
        }
    }
}

/// Everything the workflow needs from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub stages: StageOrder,
    pub identity: IdentityPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let order = StageOrder::default();
        assert_eq!(order.threshold(Stage::Prelims), StageThreshold::new(20, 30));
        assert_eq!(order.threshold(Stage::Production), StageThreshold::new(210, 240));
        assert_eq!(order.threshold(Stage::Qc), StageThreshold::new(90, 120));
        assert_eq!(order.threshold(Stage::Delivered), StageThreshold::new(0, 5));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let toml = r#"
[stages.QC]
ideal_minutes = 60
max_minutes = 75

[identity]
trust_filename = false
"#;
        let config: WorkflowConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.stages.threshold(Stage::Qc), StageThreshold::new(60, 75));
        assert_eq!(config.stages.threshold(Stage::Prelims), StageThreshold::new(20, 30));
        assert!(!config.identity.trust_filename);
        assert!(config.identity.unique_fingerprint);
    }

    #[test]
    fn inverted_or_negative_thresholds_are_rejected() {
        let inverted = r#"
[stages.PRODUCTION]
ideal_minutes = 40
max_minutes = 30
"#;
        let err = toml::from_str::<WorkflowConfig>(inverted).unwrap_err();
        assert!(err.to_string().contains("PRODUCTION"), "{err}");

        let negative = r#"
[stages.QC]
ideal_minutes = -5
max_minutes = 10
"#;
        assert!(toml::from_str::<WorkflowConfig>(negative).is_err());

        let mut overrides = BTreeMap::new();
        overrides.insert(Stage::Prelims, StageThreshold::new(30, 30));
        assert!(StageOrder::try_from(overrides.clone()).is_ok());
        overrides.insert(Stage::Qc, StageThreshold::new(40, 30));
        assert_eq!(
            StageOrder::try_from(overrides).unwrap_err(),
            InvalidThreshold {
                stage: Stage::Qc,
                threshold: StageThreshold::new(40, 30)
            }
        );
    }

    #[test]
    fn empty_config_is_default() {
        let config: WorkflowConfig = toml::from_str("").unwrap();
        assert_eq!(config, WorkflowConfig::default());
    }

    #[test]
    fn iter_in_stage_order() {
        let stages: Vec<_> = StageOrder::default().iter().map(|(s, _)| s).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
    }
}
