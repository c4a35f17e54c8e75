use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Process-level failures. Per-request problems never show up here, the
/// responder turns them into HTTP error responses.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("directory '{}' not found", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("directory '{}' is not accessible: {source}", .path.display())]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("invalid port {0}: must be between 0 and 65535")]
    InvalidPort(i64),

    #[error("listen tcp :{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("accept loop failed: {0}")]
    Serve(#[source] io::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("shutdown deadline exceeded with {in_flight} connection(s) still in flight")]
    ShutdownTimedOut { in_flight: usize },

    #[error("listener did not report back before the shutdown deadline")]
    ListenerUnresponsive,
}

impl ServeError {
    /// Exit status the process should terminate with when this error ends a run.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ShutdownTimedOut { .. } | Self::ListenerUnresponsive => 0,
            _ => 1,
        }
    }
}
