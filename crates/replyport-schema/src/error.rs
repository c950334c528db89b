/// Errors that can occur during schema validation.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema file could not be loaded.
    #[error("failed to load schema: {0}")]
    LoadFailed(String),

    /// The schema could not be compiled.
    #[error("failed to compile schema: {0}")]
    CompileFailed(String),

    /// The value failed schema validation.
    #[error("schema validation failed for {name}: {message}")]
    ValidationFailed { name: String, message: String },

    /// The schema or value is not valid JSON.
    #[error("not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// No schema registered under the given name.
    #[error("no schema registered for {0}")]
    NoSchema(String),

    /// Schema names must be usable as file stems.
    #[error("invalid schema name: {0:?}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
