use thiserror::Error;

/// Failures raised by the catalog, entry store and averages engine.
///
/// Outcomes that are decisions rather than failures (a delete that needs
/// confirmation, a bulk batch with rejected items) are not errors and live
/// with their operations.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(
        "weight {requested:.2} exceeds the available weight for this period ({available:.2} of 100)"
    )]
    Capacity { requested: f64, available: f64 },

    #[error("duplicate pair in batch: evaluation {evaluation_id}, student {student_id}")]
    DuplicateInBatch {
        evaluation_id: String,
        student_id: String,
    },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl GradeError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Capacity { .. } => "capacity_exceeded",
            Self::DuplicateInBatch { .. } => "duplicate_in_batch",
            Self::Db(_) => "db_failed",
        }
    }

    /// HTTP-style status carried in the response envelope.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Capacity { .. } => 422,
            Self::NotFound(_) => 404,
            Self::DuplicateInBatch { .. } => 409,
            Self::Db(_) => 500,
        }
    }
}

pub type GradeResult<T> = Result<T, GradeError>;
