use meta_core::CoreError;

/// Extension trait bridging `sqlx::Error` into `CoreError`. Orphan rules
/// forbid `impl From<sqlx::Error> for CoreError` here, since neither type
/// is local to this crate, so callers use `.into_core_error()` instead.
pub trait SqlxErrorExt {
    fn into_core_error(self) -> CoreError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_core_error(self) -> CoreError {
        match &self {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut => CoreError::Transient(format!("checkpoint store pool exhausted: {self}")),
            sqlx::Error::Io(_) => CoreError::Transient(format!("checkpoint store io error: {self}")),
            _ => CoreError::Permanent(format!("checkpoint store error: {self}")),
        }
    }
}
