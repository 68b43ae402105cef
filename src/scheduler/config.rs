//! Scheduler configuration: the `scheduler` group from the core's
//! configuration surface. Immutable once constructed; `validate()` is the
//! boundary where malformed values turn into `DopplerError::Configuration`.

use serde::{Deserialize, Serialize};

use crate::error::{DopplerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Height,
    Slack,
    Mix,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Mix
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub policy: Policy,
    pub restarts: u32,
    pub temperature_start: f32,
    pub temperature_decay: f32,
    pub mutation_count: u32,
    pub jitter: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            policy: Policy::Mix,
            restarts: 4,
            temperature_start: 1.0,
            temperature_decay: 0.95,
            mutation_count: 1,
            jitter: 0.0,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.temperature_start < 0.0 {
            return Err(DopplerError::Configuration(
                "scheduler.temperature_start must be >= 0.0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.temperature_decay) {
            return Err(DopplerError::Configuration(
                "scheduler.temperature_decay must be in [0.0, 1.0)".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(DopplerError::Configuration(
                "scheduler.jitter must be in [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        SchedulerConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_decay_of_one() {
        let mut cfg = SchedulerConfig::default();
        cfg.temperature_decay = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_negative_jitter() {
        let mut cfg = SchedulerConfig::default();
        cfg.jitter = -0.1;
        assert!(cfg.validate().is_err());
    }
}
