// Crate-wide error type.
//
// Every fallible public operation in the settings engine returns `ServiceResult<T>`.
// Check-mode passes (the validator, the resolver's regex pass) do not use this type for
// individual findings — those aggregate into `Vec<Diagnostic>` per the "errors aggregate"
// rule — but still surface through it when the whole operation cannot proceed (a
// malformed document, an I/O failure).

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to load settings: {0}")]
    Loader(String),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema validation failed:\n{}", .0.join("\n"))]
    SchemaInvalid(Vec<String>),

    #[error("parameter resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("templating failed: {0}")]
    TemplateError(String),

    #[error("action dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("run aborted: {0}")]
    Aborted(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ServiceError {
    pub fn loader(msg: impl Into<String>) -> Self {
        Self::Loader(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::DispatchFailed(msg.into())
    }
}
