//! Configuration for engine sessions and pools.
//!
//! The engine binary is resolved with the following precedence:
//! 1. `StockfishConfig::path` if set
//! 2. STOCKFISH_PATH environment variable
//! 3. Common install locations, then `stockfish` on PATH

use std::path::{Path, PathBuf};

use crate::EngineError;

const PATH_ENV: &str = "STOCKFISH_PATH";
const POOL_SIZE_ENV: &str = "STOCKFISH_POOL_SIZE";
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a single engine process.
#[derive(Debug, Clone)]
pub struct StockfishConfig {
    /// Explicit path to the engine binary.
    pub path: Option<PathBuf>,
    /// Extra command line arguments for the engine.
    pub args: Vec<String>,
    /// Name used in log output.
    pub label: Option<String>,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
    /// Value tokens skipped after an `info` key the parser does not know.
    pub unknown_key_skip: usize,
}

impl Default for StockfishConfig {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            label: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            unknown_key_skip: 0,
        }
    }
}

impl StockfishConfig {
    /// Config for an engine binary at a known location.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Resolve the binary to spawn.
    pub fn resolve_path(&self) -> Result<PathBuf, EngineError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        if let Ok(path) = std::env::var(PATH_ENV) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        find_stockfish_path().ok_or(EngineError::NotFound)
    }
}

/// Configuration for a pool of engines.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub engine: StockfishConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            engine: StockfishConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn new(size: usize, engine: StockfishConfig) -> Self {
        Self { size, engine }
    }
}

/// Pool size from STOCKFISH_POOL_SIZE, falling back to the CPU count.
pub fn default_pool_size() -> usize {
    std::env::var(POOL_SIZE_ENV)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

/// Find Stockfish executable in common locations
fn find_stockfish_path() -> Option<PathBuf> {
    let paths = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
    ];

    if let Some(found) = paths.iter().map(Path::new).find(|p| p.is_file()) {
        return Some(found.to_path_buf());
    }

    // Fall back to PATH lookup
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join("stockfish"))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let config = StockfishConfig::with_path("/opt/engines/sf");
        assert_eq!(
            config.resolve_path().unwrap(),
            PathBuf::from("/opt/engines/sf")
        );
    }

    #[test]
    fn test_default_config() {
        let config = StockfishConfig::default();
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.unknown_key_skip, 0);
        assert!(config.args.is_empty());
    }

    #[test]
    fn test_default_pool_size_is_positive() {
        // Note: honours STOCKFISH_POOL_SIZE if the test environment sets it
        assert!(default_pool_size() >= 1);
    }
}
