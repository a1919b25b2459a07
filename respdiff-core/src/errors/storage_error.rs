//! Result-store errors. Any write failure is fatal to the run: later
//! rounds depend on the previous round's tables being authoritative.

/// Errors from the SQLite result store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {message}")]
    Sqlite { message: String },

    #[error("corrupt row in {table}: {details}")]
    CorruptRow { table: String, details: String },

    #[error("result file error: {message}")]
    ResultFile { message: String },
}
