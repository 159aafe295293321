//! Semantic validation that is out of reach of `serde`'s structural
//! deserialization: the cross-field and range checks the original enforced
//! with `jsonschema` plus a hand-rolled `if` (`netmet/client/main.py::
//! set_config`'s `period <= timeout` check, `main.py::config_set`'s
//! `required`/`additionalProperties`). Spec §9 calls for "JSON schema
//! validation at the boundary" to be out of scope as a generic mechanism;
//! the concrete invariants it enforced are not, so they live here as plain
//! Rust checks invoked right after `serde_json::from_slice`.

use crate::task::{ProbeSettings, Task};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("timeout ({timeout}) must be smaller than period ({period})")]
    TimeoutNotSmallerThanPeriod { period: f64, timeout: f64 },

    #[error("period must be >= 0.1, got {0}")]
    PeriodTooSmall(f64),

    #[error("timeout must be >= 0.01, got {0}")]
    TimeoutTooSmall(f64),

    #[error("packet_size must be in [1, 1024], got {0}")]
    PacketSizeOutOfRange(u32),
}

/// Invariant P2: `0 < timeout < period` and `packet_size ∈ [1,1024]`.
pub fn validate_probe_settings(settings: &ProbeSettings) -> Result<(), ValidationError> {
    if settings.period < 0.1 {
        return Err(ValidationError::PeriodTooSmall(settings.period));
    }
    if settings.timeout < 0.01 {
        return Err(ValidationError::TimeoutTooSmall(settings.timeout));
    }
    if settings.timeout >= settings.period {
        return Err(ValidationError::TimeoutNotSmallerThanPeriod {
            period: settings.period,
            timeout: settings.timeout,
        });
    }
    if settings.packet_size < 1 || settings.packet_size > 1024 {
        return Err(ValidationError::PacketSizeOutOfRange(settings.packet_size));
    }
    Ok(())
}

pub fn validate_task(task: &Task) -> Result<(), ValidationError> {
    validate_probe_settings(&task.settings())
}

pub fn validate_tasks(tasks: &[Task]) -> Result<(), ValidationError> {
    tasks.iter().try_for_each(validate_task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_settings_with_timeout_below_period() {
        let settings = ProbeSettings {
            period: 5.0,
            timeout: 1.0,
            packet_size: 55,
        };
        assert!(validate_probe_settings(&settings).is_ok());
    }

    #[test]
    fn rejects_timeout_equal_to_period() {
        let settings = ProbeSettings {
            period: 1.0,
            timeout: 1.0,
            packet_size: 55,
        };
        assert_eq!(
            validate_probe_settings(&settings),
            Err(ValidationError::TimeoutNotSmallerThanPeriod {
                period: 1.0,
                timeout: 1.0
            })
        );
    }

    #[test]
    fn rejects_packet_size_over_1024() {
        let settings = ProbeSettings {
            period: 5.0,
            timeout: 1.0,
            packet_size: 2000,
        };
        assert_eq!(
            validate_probe_settings(&settings),
            Err(ValidationError::PacketSizeOutOfRange(2000))
        );
    }

    #[test]
    fn rejects_period_below_minimum() {
        let settings = ProbeSettings {
            period: 0.05,
            timeout: 0.01,
            packet_size: 55,
        };
        assert_eq!(
            validate_probe_settings(&settings),
            Err(ValidationError::PeriodTooSmall(0.05))
        );
    }
}
