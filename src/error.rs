use thiserror::Error;

use crate::loader::LoadPhase;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Cannot open database {database}: {source}")]
    Connection {
        database: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database error during {phase}: {source}")]
    Store {
        phase: LoadPhase,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Unresolved {entity} reference: {key}")]
    UnresolvedReference { entity: &'static str, key: String },

    #[error("Transaction {transaction_id} lists {product} more than once with different quantities")]
    ConflictingLineItem {
        transaction_id: String,
        product: String,
    },

    #[error("Invalid row at line {line}: {message}")]
    InvalidRow { line: u64, message: String },

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "xlsx")]
    #[error("XLSX error: {0}")]
    Xlsx(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LoadError>;

impl LoadError {
    /// Attach the load phase to a bare database error. Other kinds pass through.
    pub fn at(self, phase: LoadPhase) -> Self {
        match self {
            LoadError::Db(source) => LoadError::Store { phase, source },
            other => other,
        }
    }
}

pub trait PhaseExt<T> {
    fn in_phase(self, phase: LoadPhase) -> Result<T>;
}

impl<T, E: Into<LoadError>> PhaseExt<T> for std::result::Result<T, E> {
    fn in_phase(self, phase: LoadPhase) -> Result<T> {
        self.map_err(|e| e.into().at(phase))
    }
}
