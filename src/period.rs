use crate::error::{GradeError, GradeResult};
use serde_json::json;

pub const UNIT_RANGE: std::ops::RangeInclusive<i64> = 1..=4;
pub const MONTH_RANGE: std::ops::RangeInclusive<i64> = 3..=12;

/// A grading window. Workspaces migrated from the unit-based model carry
/// units, newer data carries months, and rows touched during the transition
/// may carry both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Unit(u8),
    Month(u8),
    Both { unit: u8, month: u8 },
}

impl Period {
    pub fn from_parts(unit: Option<i64>, month: Option<i64>) -> GradeResult<Self> {
        if let Some(u) = unit {
            if !UNIT_RANGE.contains(&u) {
                return Err(GradeError::validation(
                    "unit",
                    format!("unit must be between 1 and 4 (got {})", u),
                ));
            }
        }
        if let Some(m) = month {
            if !MONTH_RANGE.contains(&m) {
                return Err(GradeError::validation(
                    "month",
                    format!("month must be between 3 and 12 (got {})", m),
                ));
            }
        }
        match (unit, month) {
            (Some(u), Some(m)) => Ok(Self::Both {
                unit: u as u8,
                month: m as u8,
            }),
            (Some(u), None) => Ok(Self::Unit(u as u8)),
            (None, Some(m)) => Ok(Self::Month(m as u8)),
            (None, None) => Err(GradeError::validation(
                "period",
                "a unit (1-4) or a month (3-12) is required",
            )),
        }
    }

    /// Reads `unit` / `month` from a request params object. Non-integer
    /// values are validation errors, null and absent both mean "not set".
    pub fn from_params(params: &serde_json::Value) -> GradeResult<Self> {
        let unit = int_field(params, "unit")?;
        let month = int_field(params, "month")?;
        Self::from_parts(unit, month)
    }

    pub fn unit(self) -> Option<i64> {
        match self {
            Self::Unit(u) | Self::Both { unit: u, .. } => Some(u as i64),
            Self::Month(_) => None,
        }
    }

    pub fn month(self) -> Option<i64> {
        match self {
            Self::Month(m) | Self::Both { month: m, .. } => Some(m as i64),
            Self::Unit(_) => None,
        }
    }

    /// Canonical storage key; two periods share a grading scope iff their
    /// keys are equal.
    pub fn key(self) -> String {
        match self {
            Self::Unit(u) => format!("u{}", u),
            Self::Month(m) => format!("m{}", m),
            Self::Both { unit, month } => format!("u{}-m{}", unit, month),
        }
    }

    pub fn to_json(self) -> serde_json::Value {
        json!({ "unit": self.unit(), "month": self.month() })
    }
}

fn int_field(params: &serde_json::Value, key: &'static str) -> GradeResult<Option<i64>> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| GradeError::validation(key, format!("{} must be an integer or null", key))),
    }
}
