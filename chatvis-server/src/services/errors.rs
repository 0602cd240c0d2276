use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl ServiceError {
    /// Translate constraint violations into domain errors; anything else stays a database error.
    pub(crate) fn from_db_error(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.code().as_deref() {
                Some("23505") => return Self::Conflict(db.message().to_string()),
                Some("23503") => return Self::NotFound(db.message().to_string()),
                Some("23514" | "22001") => return Self::Validation(db.message().to_string()),
                _ => {}
            }
        }
        Self::Database(err)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_stay_database_errors() {
        let err = ServiceError::from_db_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, ServiceError::Database(sqlx::Error::RowNotFound)));
    }
}
