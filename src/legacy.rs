//! Compatibility layer for clients of the single-score-per-period API.
//!
//! A legacy score is stored as the only entry of a synthetic evaluation per
//! (course, period), so it flows through the regular entry store and
//! averages engine.

use crate::calc::{serialize_2dp, to_literal, LiteralGrade, LiteralPolicy};
use crate::catalog::{self, Evaluation, NewEvaluation};
use crate::db;
use crate::entries::{self, EntryMutation, MutationOutcome};
use crate::error::{GradeError, GradeResult};
use crate::period::Period;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;

pub const LEGACY_KIND: &str = "legacy";

/// Deterministic name of the singleton evaluation for a period.
pub fn singleton_name(period: Period) -> String {
    match period {
        Period::Unit(u) => format!("Period {}", u),
        Period::Month(m) => format!("Period M{}", m),
        Period::Both { unit, month } => format!("Period {} (M{})", unit, month),
    }
}

/// The period's singleton, if any. An ordinary evaluation that happens to
/// carry the singleton name is never adopted.
fn find_singleton(
    conn: &Connection,
    course_id: &str,
    period: Period,
) -> GradeResult<Option<Evaluation>> {
    let name = singleton_name(period);
    match catalog::find_by_name(conn, course_id, period, &name)? {
        Some(e) if e.kind == LEGACY_KIND && e.weight.is_none() => Ok(Some(e)),
        Some(_) => Err(GradeError::validation(
            "name",
            format!(
                "evaluation '{}' already exists and is not a legacy score slot",
                name
            ),
        )),
        None => Ok(None),
    }
}

#[derive(Debug, Clone)]
pub struct LegacyRecordOutcome {
    pub evaluation_id: String,
    pub created_evaluation: bool,
    pub mutation: MutationOutcome,
}

/// Find-or-create of the singleton and the score upsert happen in one
/// immediate transaction; the name uniqueness constraint backs it up.
pub fn record_score_legacy(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    period: Period,
    score: f64,
) -> GradeResult<LegacyRecordOutcome> {
    let tx = db::immediate_tx(conn)?;
    let (evaluation_id, created_evaluation) = match find_singleton(&tx, course_id, period)? {
        Some(existing) => (existing.id, false),
        None => {
            entries::ensure_student(&tx, student_id)?;
            let created = catalog::create_evaluation_in(
                &tx,
                &NewEvaluation {
                    course_id: course_id.to_string(),
                    period,
                    name: singleton_name(period),
                    kind: Some(LEGACY_KIND.to_string()),
                    weight: None,
                },
            )?;
            (created.id, true)
        }
    };
    let mutation = EntryMutation::Record {
        evaluation_id: evaluation_id.clone(),
        student_id: student_id.to_string(),
        score,
    }
    .apply_in(&tx)?;
    tx.commit()?;
    tracing::info!(
        student_id,
        course_id,
        period = %period.key(),
        created_evaluation,
        "legacy score recorded"
    );
    Ok(LegacyRecordOutcome {
        evaluation_id,
        created_evaluation,
        mutation,
    })
}

/// Updates an existing legacy score; never creates the singleton or entry.
pub fn update_score_legacy(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    period: Period,
    score: f64,
) -> GradeResult<MutationOutcome> {
    let tx = db::immediate_tx(conn)?;
    let Some(evaluation) = find_singleton(&tx, course_id, period)? else {
        return Err(GradeError::NotFound("legacy evaluation"));
    };
    let Some(entry) = entries::find_entry(&tx, &evaluation.id, student_id)? else {
        return Err(GradeError::NotFound("grade entry"));
    };
    let mutation = EntryMutation::Update {
        entry_id: entry.id,
        score,
    }
    .apply_in(&tx)?;
    tx.commit()?;
    tracing::info!(student_id, course_id, period = %period.key(), "legacy score updated");
    Ok(mutation)
}

/// Flat score row served to legacy clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyScore {
    pub estudiante_id: String,
    pub curso_id: String,
    pub unidad: Option<i64>,
    pub mes: Option<i64>,
    #[serde(serialize_with = "serialize_2dp")]
    pub nota: f64,
    pub nota_literal: LiteralGrade,
    pub total_notas: i64,
}

/// Re-shapes materialized averages into legacy rows. The literal is
/// re-banded with `policy`, which legacy reports choose independently of
/// the materialized literal.
pub fn legacy_scores(
    conn: &Connection,
    course_id: &str,
    period: Option<Period>,
    student_id: Option<&str>,
    policy: LiteralPolicy,
) -> GradeResult<Vec<LegacyScore>> {
    crate::averages::ensure_course(conn, course_id)?;
    let mut sql = String::from(
        "SELECT ua.student_id, ua.course_id, ua.unit, ua.month, ua.average, ua.entry_count
         FROM unit_averages ua
         JOIN students s ON s.id = ua.student_id
         WHERE ua.course_id = ?",
    );
    let mut bind_values: Vec<Value> = vec![Value::Text(course_id.to_string())];
    if let Some(p) = period {
        sql.push_str(" AND ua.period_key = ?");
        bind_values.push(Value::Text(p.key()));
    }
    if let Some(s) = student_id {
        sql.push_str(" AND ua.student_id = ?");
        bind_values.push(Value::Text(s.to_string()));
    }
    sql.push_str(" ORDER BY s.last_name, s.first_name, ua.unit, ua.month");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            let average: f64 = r.get(4)?;
            Ok(LegacyScore {
                estudiante_id: r.get(0)?,
                curso_id: r.get(1)?,
                unidad: r.get(2)?,
                mes: r.get(3)?,
                nota: average,
                nota_literal: to_literal(average, policy),
                total_notas: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
