//! Confidence values attached to evidence entries.
//!
//! These mirror the provenance-typed confidence values produced by the
//! calibration layer. The ledger only needs two things from them: reducing a
//! value to a scalar and wrapping an aggregated scalar as a derived value.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Why a confidence value is absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentReason {
    /// No calibration data exists for the producing method
    Uncalibrated,
    /// Some contributing evidence carried no confidence at all
    InsufficientData,
    /// Confidence is meaningless for this entry
    NotApplicable,
}

impl AbsentReason {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uncalibrated => "uncalibrated",
            Self::InsufficientData => "insufficient_data",
            Self::NotApplicable => "not_applicable",
        }
    }
}

/// A named input of a derived confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInput {
    /// Input name (for chain aggregation: the contributing entry id)
    pub name: String,
    /// The input's own confidence
    pub confidence: ConfidenceValue,
}

/// A confidence value with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfidenceValue {
    /// Certain by construction (parsers, exact matches)
    Deterministic {
        /// Value, 0.0 or 1.0 in practice
        value: f64,
        /// Why it is deterministic
        reason: String,
    },
    /// Computed from other confidence values
    Derived {
        /// Computed value
        value: f64,
        /// Human-readable formula
        formula: String,
        /// Values the formula consumed
        inputs: Vec<ConfidenceInput>,
    },
    /// Empirically measured against outcomes
    Measured {
        /// Measured accuracy
        value: f64,
        /// Number of observations behind the measurement
        sample_size: u64,
    },
    /// Known only within an interval
    Bounded {
        /// Lower bound
        low: f64,
        /// Upper bound
        high: f64,
        /// Where the bounds come from
        basis: String,
    },
    /// No usable confidence
    Absent {
        /// Why
        reason: AbsentReason,
    },
}

impl ConfidenceValue {
    /// Deterministic value
    #[must_use]
    pub fn deterministic(value: f64, reason: impl Into<String>) -> Self {
        Self::Deterministic {
            value,
            reason: reason.into(),
        }
    }

    /// Measured value
    #[must_use]
    pub const fn measured(value: f64, sample_size: u64) -> Self {
        Self::Measured { value, sample_size }
    }

    /// Bounded value
    #[must_use]
    pub fn bounded(low: f64, high: f64, basis: impl Into<String>) -> Self {
        Self::Bounded {
            low,
            high,
            basis: basis.into(),
        }
    }

    /// Absent value
    #[must_use]
    pub const fn absent(reason: AbsentReason) -> Self {
        Self::Absent { reason }
    }

    /// Reduce to a single scalar.
    ///
    /// Bounded values reduce to their lower bound; absent values have none.
    #[must_use]
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Self::Deterministic { value, .. }
            | Self::Derived { value, .. }
            | Self::Measured { value, .. } => Some(*value),
            Self::Bounded { low, .. } => Some(*low),
            Self::Absent { .. } => None,
        }
    }

    /// Whether this value is explicitly absent
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent { .. })
    }

    /// Check that every number is finite and within [0, 1]
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field
    pub fn validate(&self) -> CoreResult<()> {
        fn unit(field: &str, v: f64) -> CoreResult<()> {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(CoreError::validation(
                    format!("confidence.{}", field),
                    format!("{} is outside [0, 1]", v),
                ))
            }
        }

        match self {
            Self::Deterministic { value, .. } | Self::Measured { value, .. } => {
                unit("value", *value)
            }
            Self::Derived { value, inputs, .. } => {
                unit("value", *value)?;
                inputs.iter().try_for_each(|input| input.confidence.validate())
            }
            Self::Bounded { low, high, .. } => {
                unit("low", *low)?;
                unit("high", *high)?;
                if low > high {
                    return Err(CoreError::validation(
                        "confidence.low",
                        format!("lower bound {} exceeds upper bound {}", low, high),
                    ));
                }
                Ok(())
            }
            Self::Absent { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_extraction() {
        assert_eq!(ConfidenceValue::deterministic(1.0, "parser").scalar(), Some(1.0));
        assert_eq!(ConfidenceValue::measured(0.7, 40).scalar(), Some(0.7));
        assert_eq!(ConfidenceValue::bounded(0.3, 0.8, "prior").scalar(), Some(0.3));
        assert_eq!(
            ConfidenceValue::absent(AbsentReason::Uncalibrated).scalar(),
            None
        );
    }

    #[test]
    fn test_validate_ranges() {
        assert!(ConfidenceValue::measured(0.5, 1).validate().is_ok());
        assert!(ConfidenceValue::measured(1.5, 1).validate().is_err());
        assert!(ConfidenceValue::measured(f64::NAN, 1).validate().is_err());
        assert!(ConfidenceValue::bounded(0.9, 0.1, "x").validate().is_err());
    }

    #[test]
    fn test_wire_format() {
        let value = ConfidenceValue::absent(AbsentReason::InsufficientData);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "absent", "reason": "insufficient_data"})
        );

        let parsed: ConfidenceValue =
            serde_json::from_str(r#"{"type":"bounded","low":0.2,"high":0.4,"basis":"lit"}"#)
                .unwrap();
        assert_eq!(parsed.scalar(), Some(0.2));
    }
}
