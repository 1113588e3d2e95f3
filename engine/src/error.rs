use std::path::PathBuf;

/// Errors returned by session and pool operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Stockfish not found")]
    NotFound,
    #[error("Failed to spawn engine {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Engine input stream is not available")]
    NotRunning,
    #[error("Analysis already in progress")]
    AnalysisInProgress,
    #[error("Engine handshake failed: {0}")]
    HandshakeFailed(EngineFault),
    #[error("Engine went away before the expected output arrived")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an engine process died.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineFault {
    #[error("engine process error: {0}")]
    Io(String),
    #[error("engine exited abnormally (code {0:?})")]
    AbnormalExit(Option<i32>),
}
