use crate::error::{GradeError, GradeResult};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 20.0;
pub const WEIGHT_TOTAL_CENTS: i64 = 10_000;
pub const DEFAULT_PASS_THRESHOLD: f64 = 11.0;

/// Half-up rounding to two decimals. The small bias keeps values such as
/// 16.125 (stored as 16.12499..) on the expected side.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5 + 1e-7).floor() / 100.0
}

/// Hundredths as an integer, for exact weight arithmetic.
pub fn to_cents(x: f64) -> i64 {
    (100.0 * x).round() as i64
}

pub fn cents_to_f64(c: i64) -> f64 {
    c as f64 / 100.0
}

pub fn fmt_2dp(x: f64) -> String {
    format!("{:.2}", round_off_2_decimals(x))
}

pub fn serialize_2dp<S: Serializer>(x: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&fmt_2dp(*x))
}

pub fn serialize_opt_2dp<S: Serializer>(x: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match x {
        Some(v) => s.serialize_str(&fmt_2dp(*v)),
        None => s.serialize_none(),
    }
}

pub fn validate_score(v: f64) -> GradeResult<f64> {
    if !v.is_finite() || !(SCORE_MIN..=SCORE_MAX).contains(&v) {
        return Err(GradeError::validation(
            "score",
            format!("score must be between 0 and 20 (got {})", v),
        ));
    }
    Ok(round_off_2_decimals(v))
}

pub fn validate_weight(v: f64) -> GradeResult<f64> {
    if !v.is_finite() || v <= 0.0 || v > 100.0 {
        return Err(GradeError::validation(
            "weight",
            format!("weight must be greater than 0 and at most 100 (got {})", v),
        ));
    }
    let rounded = round_off_2_decimals(v);
    if rounded <= 0.0 {
        return Err(GradeError::validation(
            "weight",
            "weight rounds to zero at two decimals",
        ));
    }
    Ok(rounded)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryScore {
    pub evaluation_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationWeight {
    pub id: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AveragePolicy {
    Weighted,
    Simple,
}

/// Weighted only when every evaluation carries a weight and the weights add
/// up to exactly 100.
pub fn averaging_policy(evaluations: &[EvaluationWeight]) -> AveragePolicy {
    if evaluations.is_empty() {
        return AveragePolicy::Simple;
    }
    let mut total = 0_i64;
    for e in evaluations {
        match e.weight {
            Some(w) => total += to_cents(w),
            None => return AveragePolicy::Simple,
        }
    }
    if total == WEIGHT_TOTAL_CENTS {
        AveragePolicy::Weighted
    } else {
        AveragePolicy::Simple
    }
}

/// Average of `entries` under the policy implied by `evaluations`.
/// Returns `None` when there is nothing to average.
pub fn compute_average(
    entries: &[EntryScore],
    evaluations: &[EvaluationWeight],
) -> Option<f64> {
    if entries.is_empty() {
        return None;
    }
    let raw = match averaging_policy(evaluations) {
        AveragePolicy::Weighted => {
            let weights: HashMap<&str, f64> = evaluations
                .iter()
                .filter_map(|e| e.weight.map(|w| (e.id.as_str(), w)))
                .collect();
            entries
                .iter()
                .filter_map(|en| {
                    weights
                        .get(en.evaluation_id.as_str())
                        .map(|w| en.score * w / 100.0)
                })
                .sum::<f64>()
        }
        AveragePolicy::Simple => {
            entries.iter().map(|en| en.score).sum::<f64>() / entries.len() as f64
        }
    };
    Some(round_off_2_decimals(raw.clamp(SCORE_MIN, SCORE_MAX)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LiteralGrade {
    AD,
    A,
    B,
    C,
}

impl LiteralGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AD => "AD",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AD" => Some(Self::AD),
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            _ => None,
        }
    }
}

/// Top-band boundary used when converting an average to a literal grade.
/// Both boundaries are in use; each call site names the one it applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralPolicy {
    /// AD from 17.
    Ad17,
    /// AD from 18.
    Ad18,
}

impl LiteralPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ad17" => Some(Self::Ad17),
            "ad18" => Some(Self::Ad18),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ad17 => "ad17",
            Self::Ad18 => "ad18",
        }
    }

    fn ad_threshold(self) -> f64 {
        match self {
            Self::Ad17 => 17.0,
            Self::Ad18 => 18.0,
        }
    }
}

pub fn to_literal(average: f64, policy: LiteralPolicy) -> LiteralGrade {
    let avg = round_off_2_decimals(average);
    if avg >= policy.ad_threshold() {
        LiteralGrade::AD
    } else if avg >= 14.0 {
        LiteralGrade::A
    } else if avg >= 11.0 {
        LiteralGrade::B
    } else {
        LiteralGrade::C
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseStats {
    pub count: usize,
    #[serde(serialize_with = "serialize_opt_2dp")]
    pub mean: Option<f64>,
    #[serde(serialize_with = "serialize_opt_2dp")]
    pub max: Option<f64>,
    #[serde(serialize_with = "serialize_opt_2dp")]
    pub min: Option<f64>,
    pub passed: usize,
    pub failed: usize,
    #[serde(serialize_with = "serialize_2dp")]
    pub pass_threshold: f64,
}

/// Aggregates materialized averages (mean of means, not of raw scores).
pub fn course_stats(averages: &[f64], pass_threshold: f64) -> CourseStats {
    let count = averages.len();
    let passed = averages.iter().filter(|a| **a >= pass_threshold).count();
    let mean = if count > 0 {
        Some(round_off_2_decimals(
            averages.iter().sum::<f64>() / count as f64,
        ))
    } else {
        None
    };
    let max = averages
        .iter()
        .copied()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let min = averages
        .iter()
        .copied()
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    CourseStats {
        count,
        mean,
        max,
        min,
        passed,
        failed: count - passed,
        pass_threshold,
    }
}

/// Competition ranking ("1224") over values already sorted descending.
pub fn competition_ranks(sorted_desc: &[f64]) -> Vec<usize> {
    let mut ranks = Vec::with_capacity(sorted_desc.len());
    for (i, v) in sorted_desc.iter().enumerate() {
        if i > 0 && to_cents(sorted_desc[i - 1]) == to_cents(*v) {
            let prev = ranks[i - 1];
            ranks.push(prev);
        } else {
            ranks.push(i + 1);
        }
    }
    ranks
}
