use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dependency cycle detected: {path}")]
    CycleDetected { path: String },

    #[error("Unknown build configuration: {0}")]
    UnknownConfiguration(String),

    #[error("Unrecognized remote report: state={state}, stop={stop}")]
    Protocol {
        state: crate::core::translate::ExecutionState,
        stop: crate::core::translate::StopFlag,
    },

    #[error("Remote engine transport failure: {0}")]
    RemoteTransport(String),

    #[error("Remote engine rejected submission: {0}")]
    RemoteRejected(String),

    #[error("Submission retries exhausted after {attempts} attempts")]
    SubmitRetriesExhausted { attempts: u32 },

    #[error("Submission aborted by cancellation")]
    SubmissionAborted,

    #[error("Build task not found: {0}")]
    TaskNotFound(crate::core::task::TaskId),

    #[error("Group build not found: {0}")]
    GroupNotFound(crate::orchestration::GroupBuildId),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: crate::core::task::BuildStatus,
        to: crate::core::task::BuildStatus,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
