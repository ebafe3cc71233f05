//! Evaluation catalog: the gradable items of a course period.

use crate::averages;
use crate::calc::{cents_to_f64, serialize_opt_2dp, to_cents, validate_weight, WEIGHT_TOTAL_CENTS};
use crate::db;
use crate::error::{GradeError, GradeResult};
use crate::period::Period;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

pub const DEFAULT_KIND: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub id: String,
    pub course_id: String,
    pub unit: Option<i64>,
    pub month: Option<i64>,
    pub name: String,
    pub kind: String,
    #[serde(serialize_with = "serialize_opt_2dp")]
    pub weight: Option<f64>,
    pub order: i64,
    pub entry_count: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl Evaluation {
    pub fn period(&self) -> GradeResult<Period> {
        Period::from_parts(self.unit, self.month)
    }
}

#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub course_id: String,
    pub period: Period,
    pub name: String,
    pub kind: Option<String>,
    pub weight: Option<f64>,
}

/// Partial update. `weight: Some(None)` clears the weight.
#[derive(Debug, Clone, Default)]
pub struct EvaluationPatch {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub weight: Option<Option<f64>>,
}

impl EvaluationPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.kind.is_none() && self.weight.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted {
        removed_entries: i64,
        recomputed_students: usize,
    },
    /// Entries depend on the evaluation; the caller must re-issue with force.
    RequiresConfirmation { total_notas: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationListing {
    pub evaluations: Vec<Evaluation>,
    #[serde(serialize_with = "crate::calc::serialize_2dp")]
    pub weight_total: f64,
    #[serde(serialize_with = "crate::calc::serialize_2dp")]
    pub available_weight: f64,
}

const EVALUATION_COLUMNS: &str = "e.id, e.course_id, e.unit, e.month, e.name, e.kind, e.weight, e.sort_order,
    (SELECT COUNT(*) FROM grade_entries g WHERE g.evaluation_id = e.id) AS entry_count,
    e.created_at, e.updated_at";

fn row_to_evaluation(r: &Row<'_>) -> rusqlite::Result<Evaluation> {
    Ok(Evaluation {
        id: r.get(0)?,
        course_id: r.get(1)?,
        unit: r.get(2)?,
        month: r.get(3)?,
        name: r.get(4)?,
        kind: r.get(5)?,
        weight: r.get(6)?,
        order: r.get(7)?,
        entry_count: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn clean_name(raw: &str) -> GradeResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(GradeError::validation("name", "name must not be empty"));
    }
    Ok(name.to_string())
}

fn clean_kind(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_KIND)
        .to_string()
}

pub fn get_evaluation(conn: &Connection, evaluation_id: &str) -> GradeResult<Option<Evaluation>> {
    let sql = format!("SELECT {} FROM evaluations e WHERE e.id = ?", EVALUATION_COLUMNS);
    Ok(conn
        .query_row(&sql, [evaluation_id], row_to_evaluation)
        .optional()?)
}

pub fn find_by_name(
    conn: &Connection,
    course_id: &str,
    period: Period,
    name: &str,
) -> GradeResult<Option<Evaluation>> {
    let sql = format!(
        "SELECT {} FROM evaluations e WHERE e.course_id = ? AND e.period_key = ? AND e.name = ?",
        EVALUATION_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (course_id, period.key(), name), row_to_evaluation)
        .optional()?)
}

/// Sum of non-null weights in hundredths, optionally leaving one evaluation
/// out.
fn weight_total_cents(
    conn: &Connection,
    course_id: &str,
    period: Period,
    excluding: Option<&str>,
) -> GradeResult<i64> {
    let mut stmt = conn.prepare(
        "SELECT id, weight FROM evaluations
         WHERE course_id = ? AND period_key = ? AND weight IS NOT NULL",
    )?;
    let rows = stmt
        .query_map((course_id, period.key()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .iter()
        .filter(|(id, _)| Some(id.as_str()) != excluding)
        .map(|(_, w)| to_cents(*w))
        .sum())
}

fn check_capacity(
    conn: &Connection,
    course_id: &str,
    period: Period,
    weight: f64,
    excluding: Option<&str>,
) -> GradeResult<()> {
    let used = weight_total_cents(conn, course_id, period, excluding)?;
    let available = WEIGHT_TOTAL_CENTS - used;
    if to_cents(weight) > available {
        return Err(GradeError::Capacity {
            requested: weight,
            available: cents_to_f64(available.max(0)),
        });
    }
    Ok(())
}

fn check_name_free(
    conn: &Connection,
    course_id: &str,
    period: Period,
    name: &str,
    excluding: Option<&str>,
) -> GradeResult<()> {
    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM evaluations WHERE course_id = ? AND period_key = ? AND name = ?",
            (course_id, period.key(), name),
            |r| r.get(0),
        )
        .optional()?;
    match taken {
        Some(id) if Some(id.as_str()) != excluding => Err(GradeError::validation(
            "name",
            format!("an evaluation named '{}' already exists in this period", name),
        )),
        _ => Ok(()),
    }
}

/// Creates an evaluation inside the caller's transaction.
pub(crate) fn create_evaluation_in(conn: &Connection, new: &NewEvaluation) -> GradeResult<Evaluation> {
    let name = clean_name(&new.name)?;
    let weight = new.weight.map(validate_weight).transpose()?;
    averages::ensure_course(conn, &new.course_id)?;
    check_name_free(conn, &new.course_id, new.period, &name, None)?;
    if let Some(w) = weight {
        check_capacity(conn, &new.course_id, new.period, w, None)?;
    }

    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM evaluations WHERE course_id = ? AND period_key = ?",
        (&new.course_id, new.period.key()),
        |r| r.get(0),
    )?;
    let id = Uuid::new_v4().to_string();
    let now = db::now_stamp();
    conn.execute(
        "INSERT INTO evaluations(id, course_id, period_key, unit, month, name, kind, weight, sort_order, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &new.course_id,
            new.period.key(),
            new.period.unit(),
            new.period.month(),
            &name,
            clean_kind(new.kind.as_deref()),
            weight,
            sort_order,
            &now,
            &now,
        ),
    )?;

    get_evaluation(conn, &id)?.ok_or(GradeError::NotFound("evaluation"))
}

/// Validation, the weight-sum check and the insert share one immediate
/// transaction, so concurrent creators cannot both pass the check.
pub fn create_evaluation(conn: &Connection, new: &NewEvaluation) -> GradeResult<Evaluation> {
    let tx = db::immediate_tx(conn)?;
    let created = create_evaluation_in(&tx, new)?;
    tx.commit()?;
    tracing::info!(
        evaluation_id = %created.id,
        course_id = %created.course_id,
        period = %new.period.key(),
        weight = ?created.weight,
        "evaluation created"
    );
    Ok(created)
}

pub fn update_evaluation(
    conn: &Connection,
    evaluation_id: &str,
    patch: &EvaluationPatch,
) -> GradeResult<Evaluation> {
    if patch.is_empty() {
        return Err(GradeError::validation(
            "patch",
            "patch must include at least one of name, kind, weight",
        ));
    }
    let name = patch.name.as_deref().map(clean_name).transpose()?;
    let weight = match patch.weight {
        Some(Some(w)) => Some(Some(validate_weight(w)?)),
        other => other,
    };

    let tx = db::immediate_tx(conn)?;
    let Some(current) = get_evaluation(&tx, evaluation_id)? else {
        return Err(GradeError::NotFound("evaluation"));
    };
    let period = current.period()?;

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();
    if let Some(name) = name {
        check_name_free(&tx, &current.course_id, period, &name, Some(evaluation_id))?;
        set_parts.push("name = ?");
        bind_values.push(Value::Text(name));
    }
    if let Some(kind) = patch.kind.as_deref() {
        set_parts.push("kind = ?");
        bind_values.push(Value::Text(clean_kind(Some(kind))));
    }
    let weight_changed = match weight {
        Some(new_weight) => {
            if let Some(w) = new_weight {
                check_capacity(&tx, &current.course_id, period, w, Some(evaluation_id))?;
            }
            set_parts.push("weight = ?");
            bind_values.push(new_weight.map(Value::Real).unwrap_or(Value::Null));
            new_weight.map(to_cents) != current.weight.map(to_cents)
        }
        None => false,
    };
    set_parts.push("updated_at = ?");
    bind_values.push(Value::Text(db::now_stamp()));

    let sql = format!("UPDATE evaluations SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(evaluation_id.to_string()));
    tx.execute(&sql, params_from_iter(bind_values))?;

    // A weight change can flip the averaging policy of every student graded
    // on this evaluation.
    if weight_changed {
        averages::recalculate_period(&tx, &current.course_id, period)?;
    }

    let updated = get_evaluation(&tx, evaluation_id)?.ok_or(GradeError::NotFound("evaluation"))?;
    tx.commit()?;
    tracing::info!(evaluation_id, weight_changed, "evaluation updated");
    Ok(updated)
}

pub fn delete_evaluation(conn: &Connection, evaluation_id: &str, force: bool) -> GradeResult<DeleteOutcome> {
    let tx = db::immediate_tx(conn)?;
    let Some(current) = get_evaluation(&tx, evaluation_id)? else {
        return Err(GradeError::NotFound("evaluation"));
    };
    if current.entry_count > 0 && !force {
        return Ok(DeleteOutcome::RequiresConfirmation {
            total_notas: current.entry_count,
        });
    }
    let period = current.period()?;

    tx.execute("DELETE FROM evaluations WHERE id = ?", [evaluation_id])?;
    let recomputed_students = if current.entry_count > 0 {
        averages::recalculate_period(&tx, &current.course_id, period)?
    } else {
        0
    };
    tx.commit()?;
    tracing::info!(
        evaluation_id,
        removed_entries = current.entry_count,
        forced = force,
        "evaluation deleted"
    );
    Ok(DeleteOutcome::Deleted {
        removed_entries: current.entry_count,
        recomputed_students,
    })
}

pub fn list_evaluations(
    conn: &Connection,
    course_id: &str,
    period: Period,
) -> GradeResult<EvaluationListing> {
    averages::ensure_course(conn, course_id)?;
    let sql = format!(
        "SELECT {} FROM evaluations e
         WHERE e.course_id = ? AND e.period_key = ?
         ORDER BY e.sort_order, e.name",
        EVALUATION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let evaluations = stmt
        .query_map((course_id, period.key()), row_to_evaluation)?
        .collect::<Result<Vec<_>, _>>()?;
    let used = weight_total_cents(conn, course_id, period, None)?;
    Ok(EvaluationListing {
        evaluations,
        weight_total: cents_to_f64(used),
        available_weight: cents_to_f64((WEIGHT_TOTAL_CENTS - used).max(0)),
    })
}
