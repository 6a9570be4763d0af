use std::collections::BTreeMap;

use thiserror::Error;

/// Field name → human-readable problems, serialized as `{"field": ["msg", ...]}`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validation failed: {}", summarize(.0))]
    Validation(FieldErrors),

    #[error("Seat {0} not found")]
    NotFound(u32),

    #[error("{0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// A sweep stopped on a store failure; `released` were already committed.
    #[error("auto-release sweep interrupted after releasing {released:?}: {source}")]
    SweepInterrupted {
        released: Vec<u32>,
        source: anyhow::Error,
    },
}

impl RegistryError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        RegistryError::Validation(errors)
    }

    /// HTTP status the API answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            RegistryError::Validation(_) | RegistryError::Conflict(_) => 400,
            RegistryError::NotFound(_) => 404,
            RegistryError::Storage(_) | RegistryError::SweepInterrupted { .. } => 500,
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Storage(err.into())
    }
}

fn summarize(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
