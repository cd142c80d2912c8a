use std::time::Duration;
use thiserror::Error;

/// Launching an external process failed.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("'{0}' not found")]
    NotFound(String),
    #[error("failed to start '{binary}': {source}")]
    Refused {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("empty command line")]
    EmptyArgv,
    #[error("'{0}' exited during startup")]
    ExitedEarly(String),
}

impl SpawnError {
    pub(crate) fn from_io(binary: &str, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(binary.to_string())
        } else {
            Self::Refused {
                binary: binary.to_string(),
                source: e,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("stream resolution timed out")]
    Timeout,
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("no playable stream found")]
    NoStreamFound,
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("control channel unavailable: {0}")]
    Unavailable(String),
    #[error("control channel reply timed out after {0:?}")]
    Timeout(Duration),
    #[error("player rejected command: {0}")]
    Rejected(String),
}

/// What a playback request reports back to its caller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("superseded by a newer request")]
    Superseded,
    #[error("no active session")]
    NoSession,
}
