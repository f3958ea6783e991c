//! Task parameter validation against device limits.
//!
//! Validation is pure: it looks only at the requested parameters, the device
//! snapshot and the driver's board count, and never touches hardware. Every
//! violated field is reported, not just the first one.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hal::{DeviceDescriptor, TaskParameters};

/// One violated constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Request field name, as spelled on the wire
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

pub struct ParameterValidator;

impl ParameterValidator {
    pub fn validate(
        params: &TaskParameters,
        device: &DeviceDescriptor,
        board_count: u32,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if params.board_index >= board_count {
            errors.push(
                "boardIndex",
                format!(
                    "board {} is outside the driver's addressable range 0..{}",
                    params.board_index, board_count
                ),
            );
        }

        if params.channel_count == 0 {
            errors.push("channelCount", "must be at least 1");
        } else if params.channel_count > device.channel_count {
            errors.push(
                "channelCount",
                format!(
                    "{} exceeds the device's {} channels",
                    params.channel_count, device.channel_count
                ),
            );
        }

        if !params.sample_rate.is_finite() || params.sample_rate <= 0.0 {
            errors.push("sampleRate", "must be a positive number");
        } else if !device.sample_rate_range.contains(params.sample_rate) {
            errors.push(
                "sampleRate",
                format!(
                    "{} S/s is outside the supported range {}",
                    params.sample_rate, device.sample_rate_range
                ),
            );
        }

        let min_ok = Self::check_voltage("minRange", params.min_range, device, &mut errors);
        let max_ok = Self::check_voltage("maxRange", params.max_range, device, &mut errors);
        if min_ok && max_ok && params.min_range >= params.max_range {
            errors.push(
                "minRange",
                format!(
                    "{} must be less than maxRange {}",
                    params.min_range, params.max_range
                ),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reject parameters whose full buffer would exceed `max_bytes`.
    ///
    /// `samples_per_block` is per channel; a full buffer holds `capacity`
    /// blocks of `channel_count` interleaved `f64` values each.
    pub fn validate_footprint(
        params: &TaskParameters,
        samples_per_block: usize,
        capacity: usize,
        max_bytes: usize,
    ) -> Result<(), ValidationErrors> {
        let footprint = samples_per_block
            .saturating_mul(params.channel_count as usize)
            .saturating_mul(std::mem::size_of::<f64>())
            .saturating_mul(capacity);
        if footprint <= max_bytes {
            return Ok(());
        }

        let mut errors = ValidationErrors::default();
        errors.push(
            "sampleRate",
            format!(
                "{} S/s on {} channels needs {} bytes of buffer, limit is {}",
                params.sample_rate, params.channel_count, footprint, max_bytes
            ),
        );
        Err(errors)
    }

    fn check_voltage(
        field: &str,
        value: f64,
        device: &DeviceDescriptor,
        errors: &mut ValidationErrors,
    ) -> bool {
        if !value.is_finite() {
            errors.push(field, "must be a finite number");
            return false;
        }
        if !device.voltage_range.contains(value) {
            errors.push(
                field,
                format!("{} V is outside the supported range {}", value, device.voltage_range),
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Range, TaskType};

    fn device() -> DeviceDescriptor {
        DeviceDescriptor {
            id: "1".to_string(),
            name: "Test".to_string(),
            model: "T-1".to_string(),
            driver_name: "T".to_string(),
            channel_count: 4,
            sample_rate_range: Range::new(1.0, 100_000.0),
            voltage_range: Range::new(-10.0, 10.0),
            capabilities: [TaskType::AnalogIn].into_iter().collect(),
        }
    }

    #[test]
    fn test_nan_rate_is_rejected() {
        let params = TaskParameters {
            board_index: 0,
            channel_count: 1,
            sample_rate: f64::NAN,
            min_range: -1.0,
            max_range: 1.0,
        };
        let errors = ParameterValidator::validate(&params, &device(), 1).unwrap_err();
        assert_eq!(errors.fields(), vec!["sampleRate"]);
    }

    #[test]
    fn test_display_joins_fields() {
        let params = TaskParameters {
            board_index: 3,
            channel_count: 0,
            sample_rate: 10.0,
            min_range: -1.0,
            max_range: 1.0,
        };
        let errors = ParameterValidator::validate(&params, &device(), 1).unwrap_err();
        let text = errors.to_string();
        assert!(text.starts_with("boardIndex:"));
        assert!(text.contains("channelCount: must be at least 1"));
    }
}
