//! Grade entry store. Every mutation goes through [`EntryMutation`], which
//! applies the entry change and the average recompute in one transaction.

use crate::averages::{self, UnitAverage};
use crate::calc::{serialize_2dp, serialize_opt_2dp, validate_score};
use crate::catalog;
use crate::db;
use crate::error::{GradeError, GradeResult};
use crate::period::Period;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

pub const BULK_MAX_ITEMS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeEntry {
    pub id: String,
    pub evaluation_id: String,
    pub student_id: String,
    #[serde(serialize_with = "serialize_2dp")]
    pub score: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryWithStudent {
    #[serde(flatten)]
    pub entry: GradeEntry,
    pub student_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryWithEvaluation {
    #[serde(flatten)]
    pub entry: GradeEntry,
    pub evaluation_name: String,
    #[serde(serialize_with = "serialize_opt_2dp")]
    pub evaluation_weight: Option<f64>,
    pub evaluation_order: i64,
}

/// The (student, course, period) whose average an entry feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageScope {
    pub student_id: String,
    pub course_id: String,
    pub period: Period,
}

#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// The entry after the mutation; `None` after a delete.
    pub entry: Option<GradeEntry>,
    pub created: bool,
    pub scope: AverageScope,
    /// The average after recompute; `None` once no entries remain.
    pub average: Option<UnitAverage>,
}

/// A grade-entry change bundled with the recompute it triggers.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryMutation {
    Record {
        evaluation_id: String,
        student_id: String,
        score: f64,
    },
    Update {
        entry_id: String,
        score: f64,
    },
    Delete {
        entry_id: String,
    },
}

const ENTRY_COLUMNS: &str =
    "g.id, g.evaluation_id, g.student_id, g.score, g.created_at, g.updated_at";

fn row_to_entry(r: &Row<'_>) -> rusqlite::Result<GradeEntry> {
    Ok(GradeEntry {
        id: r.get(0)?,
        evaluation_id: r.get(1)?,
        student_id: r.get(2)?,
        score: r.get(3)?,
        created_at: r.get(4)?,
        updated_at: r.get(5)?,
    })
}

pub fn get_entry(conn: &Connection, entry_id: &str) -> GradeResult<Option<GradeEntry>> {
    let sql = format!("SELECT {} FROM grade_entries g WHERE g.id = ?", ENTRY_COLUMNS);
    Ok(conn.query_row(&sql, [entry_id], row_to_entry).optional()?)
}

pub fn find_entry(
    conn: &Connection,
    evaluation_id: &str,
    student_id: &str,
) -> GradeResult<Option<GradeEntry>> {
    let sql = format!(
        "SELECT {} FROM grade_entries g WHERE g.evaluation_id = ? AND g.student_id = ?",
        ENTRY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (evaluation_id, student_id), row_to_entry)
        .optional()?)
}

pub fn ensure_student(conn: &Connection, student_id: &str) -> GradeResult<()> {
    let found = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(GradeError::NotFound("student")),
    }
}

fn scope_of_evaluation(
    conn: &Connection,
    evaluation_id: &str,
    student_id: &str,
) -> GradeResult<AverageScope> {
    let row: Option<(String, Option<i64>, Option<i64>)> = conn
        .query_row(
            "SELECT course_id, unit, month FROM evaluations WHERE id = ?",
            [evaluation_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((course_id, unit, month)) = row else {
        return Err(GradeError::NotFound("evaluation"));
    };
    Ok(AverageScope {
        student_id: student_id.to_string(),
        course_id,
        period: Period::from_parts(unit, month)?,
    })
}

impl EntryMutation {
    /// Applies the mutation in its own immediate transaction.
    pub fn apply(&self, conn: &Connection) -> GradeResult<MutationOutcome> {
        let tx = db::immediate_tx(conn)?;
        let outcome = self.apply_in(&tx)?;
        tx.commit()?;
        tracing::info!(
            op = self.op_name(),
            student_id = %outcome.scope.student_id,
            course_id = %outcome.scope.course_id,
            period = %outcome.scope.period.key(),
            average = ?outcome.average.as_ref().map(|a| a.average),
            "grade entry mutated"
        );
        Ok(outcome)
    }

    /// Applies the mutation and recompute inside the caller's transaction.
    pub(crate) fn apply_in(&self, conn: &Connection) -> GradeResult<MutationOutcome> {
        match self {
            Self::Record {
                evaluation_id,
                student_id,
                score,
            } => {
                let score = validate_score(*score)?;
                let scope = scope_of_evaluation(conn, evaluation_id, student_id)?;
                ensure_student(conn, student_id)?;
                let existing = find_entry(conn, evaluation_id, student_id)?;
                let now = db::now_stamp();
                conn.execute(
                    "INSERT INTO grade_entries(id, evaluation_id, student_id, score, created_at, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?)
                     ON CONFLICT(evaluation_id, student_id) DO UPDATE SET
                       score = excluded.score,
                       updated_at = excluded.updated_at",
                    (
                        Uuid::new_v4().to_string(),
                        evaluation_id,
                        student_id,
                        score,
                        &now,
                        &now,
                    ),
                )?;
                let entry = find_entry(conn, evaluation_id, student_id)?
                    .ok_or(GradeError::NotFound("grade entry"))?;
                finish(conn, Some(entry), existing.is_none(), scope)
            }
            Self::Update { entry_id, score } => {
                let score = validate_score(*score)?;
                let Some(current) = get_entry(conn, entry_id)? else {
                    return Err(GradeError::NotFound("grade entry"));
                };
                let scope = scope_of_evaluation(conn, &current.evaluation_id, &current.student_id)?;
                conn.execute(
                    "UPDATE grade_entries SET score = ?, updated_at = ? WHERE id = ?",
                    (score, db::now_stamp(), entry_id),
                )?;
                let entry = get_entry(conn, entry_id)?.ok_or(GradeError::NotFound("grade entry"))?;
                finish(conn, Some(entry), false, scope)
            }
            Self::Delete { entry_id } => {
                let Some(current) = get_entry(conn, entry_id)? else {
                    return Err(GradeError::NotFound("grade entry"));
                };
                let scope = scope_of_evaluation(conn, &current.evaluation_id, &current.student_id)?;
                conn.execute("DELETE FROM grade_entries WHERE id = ?", [entry_id])?;
                finish(conn, None, false, scope)
            }
        }
    }

    fn op_name(&self) -> &'static str {
        match self {
            Self::Record { .. } => "record",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

fn finish(
    conn: &Connection,
    entry: Option<GradeEntry>,
    created: bool,
    scope: AverageScope,
) -> GradeResult<MutationOutcome> {
    let average = averages::recompute(conn, &scope.student_id, &scope.course_id, scope.period)?;
    Ok(MutationOutcome {
        entry,
        created,
        scope,
        average,
    })
}

pub fn record_score(
    conn: &Connection,
    evaluation_id: &str,
    student_id: &str,
    score: f64,
) -> GradeResult<MutationOutcome> {
    EntryMutation::Record {
        evaluation_id: evaluation_id.to_string(),
        student_id: student_id.to_string(),
        score,
    }
    .apply(conn)
}

pub fn update_score(conn: &Connection, entry_id: &str, score: f64) -> GradeResult<MutationOutcome> {
    EntryMutation::Update {
        entry_id: entry_id.to_string(),
        score,
    }
    .apply(conn)
}

pub fn delete_score(conn: &Connection, entry_id: &str) -> GradeResult<MutationOutcome> {
    EntryMutation::Delete {
        entry_id: entry_id.to_string(),
    }
    .apply(conn)
}

/// One element of a bulk request as the caller sent it. Missing or
/// mistyped fields are kept as `None` and reported per item.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub evaluation_id: Option<String>,
    pub student_id: Option<String>,
    pub score: Option<f64>,
}

impl BulkItem {
    pub fn from_json(v: &serde_json::Value) -> Self {
        let text = |key: &str| {
            v.get(key)
                .and_then(|x| x.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            evaluation_id: text("evaluationId"),
            student_id: text("studentId"),
            score: v.get("score").and_then(|x| x.as_f64()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItemError {
    pub evaluation_id: Option<String>,
    pub estudiante_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkOutcome {
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.error_count == 0
    }
}

/// Bulk ingestion. Batch-level problems (empty, oversized, duplicate pairs)
/// reject everything before any write; afterwards each item commits or
/// fails on its own.
pub fn record_scores_bulk(
    conn: &Connection,
    items: &[BulkItem],
    max_items: usize,
) -> GradeResult<BulkOutcome> {
    if items.is_empty() {
        return Err(GradeError::validation("items", "items must not be empty"));
    }
    if items.len() > max_items {
        return Err(GradeError::validation(
            "items",
            format!("batch exceeds max items: {} > {}", items.len(), max_items),
        ));
    }

    let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(items.len());
    for item in items {
        if let (Some(e), Some(s)) = (item.evaluation_id.as_deref(), item.student_id.as_deref()) {
            if !seen.insert((e, s)) {
                return Err(GradeError::DuplicateInBatch {
                    evaluation_id: e.to_string(),
                    student_id: s.to_string(),
                });
            }
        }
    }

    let mut success_count = 0_usize;
    let mut errors: Vec<BulkItemError> = Vec::new();
    for item in items {
        let result = match (&item.evaluation_id, &item.student_id, item.score) {
            (Some(evaluation_id), Some(student_id), Some(score)) => EntryMutation::Record {
                evaluation_id: evaluation_id.clone(),
                student_id: student_id.clone(),
                score,
            }
            .apply(conn)
            .map(|_| ())
            .map_err(|e| e.to_string()),
            (None, _, _) => Err("missing evaluationId".to_string()),
            (_, None, _) => Err("missing studentId".to_string()),
            (_, _, None) => Err("missing or non-numeric score".to_string()),
        };
        match result {
            Ok(()) => success_count += 1,
            Err(error) => errors.push(BulkItemError {
                evaluation_id: item.evaluation_id.clone(),
                estudiante_id: item.student_id.clone(),
                error,
            }),
        }
    }

    let outcome = BulkOutcome {
        success_count,
        error_count: errors.len(),
        errors,
    };
    if outcome.is_complete() {
        tracing::info!(success_count = success_count as u64, "bulk scores recorded");
    } else {
        tracing::warn!(
            success_count = success_count as u64,
            error_count = outcome.error_count as u64,
            "bulk scores partially recorded"
        );
    }
    Ok(outcome)
}

/// Entries of one evaluation, ordered by student name.
pub fn entries_by_evaluation(
    conn: &Connection,
    evaluation_id: &str,
) -> GradeResult<Vec<EntryWithStudent>> {
    if catalog::get_evaluation(conn, evaluation_id)?.is_none() {
        return Err(GradeError::NotFound("evaluation"));
    }
    let sql = format!(
        "SELECT {}, s.last_name, s.first_name
         FROM grade_entries g
         JOIN students s ON s.id = g.student_id
         WHERE g.evaluation_id = ?
         ORDER BY s.last_name, s.first_name",
        ENTRY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([evaluation_id], |r| {
            let entry = row_to_entry(r)?;
            let last: String = r.get(6)?;
            let first: String = r.get(7)?;
            Ok(EntryWithStudent {
                entry,
                student_name: format!("{}, {}", last, first),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Entries of one student in a course period, in evaluation display order.
pub fn entries_for_student(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    period: Period,
) -> GradeResult<Vec<EntryWithEvaluation>> {
    ensure_student(conn, student_id)?;
    averages::ensure_course(conn, course_id)?;
    let sql = format!(
        "SELECT {}, e.name, e.weight, e.sort_order
         FROM grade_entries g
         JOIN evaluations e ON e.id = g.evaluation_id
         WHERE g.student_id = ? AND e.course_id = ? AND e.period_key = ?
         ORDER BY e.sort_order, e.name",
        ENTRY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((student_id, course_id, period.key()), |r| {
            Ok(EntryWithEvaluation {
                entry: row_to_entry(r)?,
                evaluation_name: r.get(6)?,
                evaluation_weight: r.get(7)?,
                evaluation_order: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
