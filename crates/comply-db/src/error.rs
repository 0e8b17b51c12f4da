//! Translation of `sqlx::Error` into [`StoreError`].

use comply_store::StoreError;

/// Map a read or statement failure.
pub fn backend(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound {
            entity: "row",
            id: String::new(),
        },
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Decode(format!("column {index}: {source}"))
        }
        sqlx::Error::Decode(source) => StoreError::Decode(source.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

/// Map a write failure on `entity`. Unique violations become
/// [`StoreError::Conflict`] carrying the constraint name.
pub fn write(entity: &'static str, err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Conflict {
                entity,
                detail: db.constraint().unwrap_or("unique constraint").to_string(),
            };
        }
    }
    backend(err)
}
