use std::path::PathBuf;

/// Errors that can occur while building, upgrading or merging a library
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    /// The library file could not be created or opened
    #[error("Failed to create '{path}'. Make sure the directory exists with write permissions: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// An existing library could not be removed before overwriting it
    #[error("Failed to remove existing library '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A statement failed to prepare or execute
    #[error("{message} [SQL statement '{statement}', {source}]")]
    Sql {
        statement: String,
        message: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A spectrum requested for transfer does not exist in the source library
    #[error("Spectrum {id} not found in library '{schema}'")]
    MissingSpectrum { schema: String, id: i64 },

    /// A spectrum has no row in the peaks table
    #[error("No peaks stored for spectrum {id} in library '{schema}'")]
    MissingPeaks { schema: String, id: i64 },

    /// A peak blob matches neither the compressed nor the raw size
    #[error("Peak blob of {actual} bytes cannot hold {expected} values")]
    PeakDecode { expected: usize, actual: usize },

    /// m/z and intensity arrays of a spectrum differ in length
    #[error("Peak arrays differ in length: {mz} m/z values, {intensity} intensities")]
    PeakLengthMismatch { mz: usize, intensity: usize },

    /// The library is missing a table or row it cannot work without
    #[error("Invalid library: {0}")]
    InvalidLibrary(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// Attach the attempted statement and a short reason to a rusqlite error.
pub trait SqlContext<T> {
    fn sql_context(self, statement: &str, message: &str) -> Result<T>;
}

impl<T> SqlContext<T> for rusqlite::Result<T> {
    fn sql_context(self, statement: &str, message: &str) -> Result<T> {
        self.map_err(|source| LibraryError::Sql {
            statement: statement.to_string(),
            message: message.to_string(),
            source,
        })
    }
}
