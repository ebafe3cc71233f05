//! Materialized per-student averages.
//!
//! This module is the only writer of `unit_averages`. Every function that
//! writes expects to run inside the caller's transaction, so the derived row
//! commits or rolls back together with the grade mutation that caused it.

use crate::calc::{
    self, competition_ranks, compute_average, serialize_2dp, to_literal, CourseStats,
    EntryScore, EvaluationWeight, LiteralGrade, LiteralPolicy,
};
use crate::db;
use crate::error::{GradeError, GradeResult};
use crate::period::Period;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

/// Literal banding applied when a row is materialized.
pub const MATERIALIZED_LITERAL_POLICY: LiteralPolicy = LiteralPolicy::Ad17;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitAverage {
    pub student_id: String,
    pub course_id: String,
    pub unit: Option<i64>,
    pub month: Option<i64>,
    #[serde(serialize_with = "serialize_2dp")]
    pub average: f64,
    pub literal: LiteralGrade,
    pub entry_count: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentAverage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    pub student_name: String,
    #[serde(flatten)]
    pub average: UnitAverage,
}

const AVERAGE_COLUMNS: &str =
    "ua.student_id, ua.course_id, ua.unit, ua.month, ua.average, ua.literal, ua.entry_count, ua.updated_at";

fn row_to_average(r: &Row<'_>) -> rusqlite::Result<UnitAverage> {
    let literal: String = r.get(5)?;
    Ok(UnitAverage {
        student_id: r.get(0)?,
        course_id: r.get(1)?,
        unit: r.get(2)?,
        month: r.get(3)?,
        average: r.get(4)?,
        // Rows are only written by `recompute`, which stores a valid literal.
        literal: LiteralGrade::parse(&literal).unwrap_or(LiteralGrade::C),
        entry_count: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

/// Re-derives the average for one (student, course, period) from the
/// current entries. Zero entries removes the row.
pub fn recompute(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    period: Period,
) -> GradeResult<Option<UnitAverage>> {
    let period_key = period.key();
    let mut stmt = conn.prepare(
        "SELECT g.evaluation_id, g.score, e.weight
         FROM grade_entries g
         JOIN evaluations e ON e.id = g.evaluation_id
         WHERE g.student_id = ? AND e.course_id = ? AND e.period_key = ?",
    )?;
    let rows = stmt
        .query_map((student_id, course_id, &period_key), |r| {
            let evaluation_id: String = r.get(0)?;
            let score: f64 = r.get(1)?;
            let weight: Option<f64> = r.get(2)?;
            Ok((evaluation_id, score, weight))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut entries: Vec<EntryScore> = Vec::with_capacity(rows.len());
    let mut evaluations: Vec<EvaluationWeight> = Vec::with_capacity(rows.len());
    for (evaluation_id, score, weight) in rows {
        evaluations.push(EvaluationWeight {
            id: evaluation_id.clone(),
            weight,
        });
        entries.push(EntryScore {
            evaluation_id,
            score,
        });
    }

    let Some(average) = compute_average(&entries, &evaluations) else {
        let removed = conn.execute(
            "DELETE FROM unit_averages WHERE student_id = ? AND course_id = ? AND period_key = ?",
            (student_id, course_id, &period_key),
        )?;
        if removed > 0 {
            tracing::debug!(student_id, course_id, period = %period_key, "average removed");
        }
        return Ok(None);
    };

    let literal = to_literal(average, MATERIALIZED_LITERAL_POLICY);
    let entry_count = entries.len() as i64;
    let updated_at = db::now_stamp();
    conn.execute(
        "INSERT INTO unit_averages(id, student_id, course_id, period_key, unit, month, average, literal, entry_count, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id, period_key) DO UPDATE SET
           unit = excluded.unit,
           month = excluded.month,
           average = excluded.average,
           literal = excluded.literal,
           entry_count = excluded.entry_count,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            course_id,
            &period_key,
            period.unit(),
            period.month(),
            average,
            literal.as_str(),
            entry_count,
            &updated_at,
        ),
    )?;
    tracing::debug!(
        student_id,
        course_id,
        period = %period_key,
        average,
        literal = literal.as_str(),
        entry_count,
        "average recomputed"
    );

    Ok(Some(UnitAverage {
        student_id: student_id.to_string(),
        course_id: course_id.to_string(),
        unit: period.unit(),
        month: period.month(),
        average,
        literal,
        entry_count,
        updated_at,
    }))
}

/// Students that have entries, or a (possibly stale) average row, in the
/// given course and period.
pub fn affected_students(
    conn: &Connection,
    course_id: &str,
    period: Period,
) -> GradeResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT g.student_id
         FROM grade_entries g
         JOIN evaluations e ON e.id = g.evaluation_id
         WHERE e.course_id = ?1 AND e.period_key = ?2
         UNION
         SELECT student_id FROM unit_averages WHERE course_id = ?1 AND period_key = ?2
         ORDER BY 1",
    )?;
    let ids = stmt
        .query_map((course_id, period.key()), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Recomputes every affected student of one (course, period). Returns the
/// number of students processed.
pub fn recalculate_period(conn: &Connection, course_id: &str, period: Period) -> GradeResult<usize> {
    let students = affected_students(conn, course_id, period)?;
    for student_id in &students {
        recompute(conn, student_id, course_id, period)?;
    }
    Ok(students.len())
}

/// Backfill / drift repair for one (course, period), in its own transaction.
pub fn recalculate_all(conn: &Connection, course_id: &str, period: Period) -> GradeResult<usize> {
    ensure_course(conn, course_id)?;
    let tx = db::immediate_tx(conn)?;
    let processed = recalculate_period(&tx, course_id, period)?;
    tx.commit()?;
    tracing::info!(
        course_id,
        period = %period.key(),
        processed = processed as u64,
        "averages recalculated"
    );
    Ok(processed)
}

/// `None` only when both the course and the student exist but nothing has
/// been scored for them in `period`.
pub fn get_average(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    period: Period,
) -> GradeResult<Option<UnitAverage>> {
    ensure_course(conn, course_id)?;
    crate::entries::ensure_student(conn, student_id)?;
    let sql = format!(
        "SELECT {} FROM unit_averages ua
         WHERE ua.student_id = ? AND ua.course_id = ? AND ua.period_key = ?",
        AVERAGE_COLUMNS
    );
    let row = conn
        .query_row(&sql, (student_id, course_id, period.key()), row_to_average)
        .optional()?;
    Ok(row)
}

/// All averages of a (course, period). Ranked lists are ordered by average
/// (ties share a rank, then by name); unranked lists by student name.
pub fn list_period_averages(
    conn: &Connection,
    course_id: &str,
    period: Period,
    ranked: bool,
) -> GradeResult<Vec<StudentAverage>> {
    ensure_course(conn, course_id)?;
    let order = if ranked {
        "ua.average DESC, s.last_name, s.first_name"
    } else {
        "s.last_name, s.first_name"
    };
    let sql = format!(
        "SELECT {}, s.last_name, s.first_name
         FROM unit_averages ua
         JOIN students s ON s.id = ua.student_id
         WHERE ua.course_id = ? AND ua.period_key = ?
         ORDER BY {}",
        AVERAGE_COLUMNS, order
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map((course_id, period.key()), |r| {
            let average = row_to_average(r)?;
            let last: String = r.get(8)?;
            let first: String = r.get(9)?;
            Ok(StudentAverage {
                rank: None,
                student_name: format!("{}, {}", last, first),
                average,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if ranked {
        let values: Vec<f64> = rows.iter().map(|r| r.average.average).collect();
        for (row, rank) in rows.iter_mut().zip(competition_ranks(&values)) {
            row.rank = Some(rank);
        }
    }
    Ok(rows)
}

/// Whole-course statistics over materialized averages, optionally for a
/// single period.
pub fn course_stats(
    conn: &Connection,
    course_id: &str,
    period: Option<Period>,
    pass_threshold: f64,
) -> GradeResult<CourseStats> {
    ensure_course(conn, course_id)?;
    let values: Vec<f64> = match period {
        Some(p) => {
            let mut stmt = conn.prepare(
                "SELECT average FROM unit_averages WHERE course_id = ? AND period_key = ?",
            )?;
            let v = stmt
                .query_map((course_id, p.key()), |r| r.get::<_, f64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            v
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT average FROM unit_averages WHERE course_id = ?")?;
            let v = stmt
                .query_map([course_id], |r| r.get::<_, f64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            v
        }
    };
    Ok(calc::course_stats(&values, pass_threshold))
}

pub fn ensure_course(conn: &Connection, course_id: &str) -> GradeResult<()> {
    let found = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(GradeError::NotFound("course")),
    }
}
