use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("durable store i/o failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored positions are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored positions must be a JSON object keyed by label id")]
    NotAnObject,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no durable store attached")]
    NoStore,

    #[error("unknown label: {label}")]
    UnknownLabel { label: String },

    #[error("engine has been destroyed")]
    Destroyed,

    #[error("host view is no longer alive")]
    HostGone,

    #[error("a layout pass is already in flight")]
    PassInFlight,

    #[error("editing mode is off")]
    EditingDisabled,
}
