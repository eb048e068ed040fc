//! Validation options and the traversal budget shared by every stage that
//! walks attacker-controlled structure.

use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Error;

const MAX_CONFIG_BYTES: u64 = 64 * 1024;
const MAX_REVISIONS: usize = 100_000;
const MAX_TRAVERSAL_STEPS: u64 = 1_000_000_000;
const MAX_OBJECT_DEPTH: usize = 4096;

/// How PDF numbers are compared when looking for modifications between two
/// revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericComparison {
    /// `5` and `5.0` are the same number. Tolerates documents re-serialized by
    /// a different writer.
    #[default]
    Lax,
    /// Integers and reals never compare equal. Reals are compared as parsed
    /// values, so `5.0` and `5.00` still match; the source spelling is lost
    /// before the comparison.
    Strict,
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub numeric_comparison: NumericComparison,
    /// Maximum number of `%%EOF` boundaries accepted in a single document.
    pub max_revisions: usize,
    /// Maximum number of objects, xref sections and fields visited over the
    /// whole validation run.
    pub max_traversal_steps: u64,
    /// Maximum nesting of dictionaries and arrays followed when fingerprinting
    /// or comparing objects.
    pub max_object_depth: usize,
    /// Wall-clock budget for the traversal. `None` means unbounded.
    pub time_budget: Option<Duration>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            numeric_comparison: NumericComparison::Lax,
            max_revisions: 1_000,
            max_traversal_steps: 5_000_000,
            max_object_depth: 500,
            time_budget: None,
        }
    }
}

impl ValidationConfig {
    pub fn budget(&self) -> TraversalBudget {
        TraversalBudget::new(self.max_traversal_steps, self.time_budget)
    }
}

/// Counts traversal steps and aborts with
/// [`Error::StructuralLimitExceeded`] once the step limit or the deadline is
/// reached.
///
/// The budget is shared by reference between stages of a single run, so the
/// counter uses interior mutability.
#[derive(Debug)]
pub struct TraversalBudget {
    max_steps: u64,
    used: Cell<u64>,
    deadline: Option<Instant>,
}

impl TraversalBudget {
    pub fn new(max_steps: u64, time_budget: Option<Duration>) -> Self {
        Self {
            max_steps,
            used: Cell::new(0),
            deadline: time_budget.map(|budget| Instant::now() + budget),
        }
    }

    pub fn step(&self) -> std::result::Result<(), Error> {
        let used = self.used.get() + 1;
        self.used.set(used);
        if used > self.max_steps {
            return Err(Error::StructuralLimitExceeded {
                reason: format!("traversal exceeded {} steps", self.max_steps),
            });
        }
        // Checking the clock on every step is measurable on large documents.
        if used % 256 == 0 {
            self.check_deadline()?;
        }
        Ok(())
    }

    pub fn check_deadline(&self) -> std::result::Result<(), Error> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::StructuralLimitExceeded {
                reason: "traversal time budget exhausted".into(),
            }),
            _ => Ok(()),
        }
    }

    pub fn used(&self) -> u64 {
        self.used.get()
    }
}

/// On-disk form of the options, all keys optional.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub validation: Option<ValidationSection>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ValidationSection {
    pub numeric_comparison: Option<NumericComparison>,
    pub max_revisions: Option<usize>,
    pub max_traversal_steps: Option<u64>,
    pub max_object_depth: Option<usize>,
    pub time_budget_ms: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > MAX_CONFIG_BYTES {
                return Err(anyhow::anyhow!(
                    "config {} exceeds {} bytes",
                    path.display(),
                    MAX_CONFIG_BYTES
                ));
            }
        }
        let data = fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(toml::from_str::<ConfigFile>(data)?)
    }

    pub fn apply(&self, config: &mut ValidationConfig) {
        let Some(section) = &self.validation else {
            return;
        };
        if let Some(mode) = section.numeric_comparison {
            config.numeric_comparison = mode;
        }
        if let Some(v) = section.max_revisions {
            if v == 0 || v > MAX_REVISIONS {
                warn!(
                    domain = "pades.config",
                    kind = "invalid_max_revisions",
                    value = v,
                    "Ignoring max_revisions"
                );
            } else {
                config.max_revisions = v;
            }
        }
        if let Some(v) = section.max_traversal_steps {
            if v == 0 || v > MAX_TRAVERSAL_STEPS {
                warn!(
                    domain = "pades.config",
                    kind = "invalid_max_traversal_steps",
                    value = v,
                    "Ignoring max_traversal_steps"
                );
            } else {
                config.max_traversal_steps = v;
            }
        }
        if let Some(v) = section.max_object_depth {
            if v == 0 || v > MAX_OBJECT_DEPTH {
                warn!(
                    domain = "pades.config",
                    kind = "invalid_max_object_depth",
                    value = v,
                    "Ignoring max_object_depth"
                );
            } else {
                config.max_object_depth = v;
            }
        }
        if let Some(ms) = section.time_budget_ms {
            config.time_budget = (ms > 0).then(|| Duration::from_millis(ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_stops_after_max_steps() {
        let budget = TraversalBudget::new(3, None);
        assert!(budget.step().is_ok());
        assert!(budget.step().is_ok());
        assert!(budget.step().is_ok());
        assert!(matches!(
            budget.step(),
            Err(Error::StructuralLimitExceeded { .. })
        ));
    }

    #[test]
    fn expired_deadline_is_reported() {
        let budget = TraversalBudget::new(u64::MAX, Some(Duration::ZERO));
        assert!(budget.check_deadline().is_err());
    }

    #[test]
    fn config_file_overrides_and_clamps() {
        let file = ConfigFile::parse(
            r#"
            [validation]
            numeric_comparison = "strict"
            max_revisions = 0
            max_object_depth = 64
            time_budget_ms = 1500
            "#,
        )
        .unwrap();

        let mut config = ValidationConfig::default();
        file.apply(&mut config);

        assert_eq!(config.numeric_comparison, NumericComparison::Strict);
        // Zero is out of range and keeps the default.
        assert_eq!(config.max_revisions, 1_000);
        assert_eq!(config.max_object_depth, 64);
        assert_eq!(config.time_budget, Some(Duration::from_millis(1500)));
    }
}
