// ⚠️ Error taxonomy for the registration core
// Validation and lookup failures are ordinary results; Storage aborts the operation

use thiserror::Error;

/// Participant identifier ("processo" number assigned by the school)
pub type Processo = i64;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Bad id format, unparseable date, empty or malformed elapsed time
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Unknown participant (in the roster or in the ledger)
    #[error("participant {0} not found")]
    NotFound(String),

    #[error("participant {0} is already registered")]
    DuplicateRegistration(Processo),

    #[error("participant {processo} already classified at position {position}")]
    AlreadyClassified { processo: Processo, position: u32 },

    /// Admin-only operation requested without the admin capability
    #[error("operation '{0}' requires admin access")]
    Forbidden(&'static str),

    /// Persistence read/write failure; nothing was committed
    #[error("storage error: {0}")]
    Storage(String),
}

impl RegistryError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        RegistryError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(processo: Processo) -> Self {
        RegistryError::NotFound(processo.to_string())
    }

    /// Short machine-readable code, used by the HTTP envelope
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Validation { .. } => "validation",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::DuplicateRegistration(_) => "duplicate_registration",
            RegistryError::AlreadyClassified { .. } => "already_classified",
            RegistryError::Forbidden(_) => "forbidden",
            RegistryError::Storage(_) => "storage",
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(value: rusqlite::Error) -> Self {
        RegistryError::Storage(format!("sqlite: {value}"))
    }
}

impl From<csv::Error> for RegistryError {
    fn from(value: csv::Error) -> Self {
        RegistryError::Storage(format!("csv: {value}"))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(value: std::io::Error) -> Self {
        RegistryError::Storage(format!("io: {value}"))
    }
}

impl From<zip::result::ZipError> for RegistryError {
    fn from(value: zip::result::ZipError) -> Self {
        RegistryError::Storage(format!("zip: {value}"))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
