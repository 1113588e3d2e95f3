#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use stockfish_pool::StockfishConfig;
use tracing_subscriber::EnvFilter;

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Window used to observe that something does *not* happen.
pub const HANG_WINDOW: Duration = Duration::from_millis(500);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Config that runs the scripted engine built alongside the tests.
pub fn mock_config(args: &[&str]) -> StockfishConfig {
    init_tracing();
    StockfishConfig {
        path: Some(PathBuf::from(env!("CARGO_BIN_EXE_mock-engine"))),
        args: args.iter().map(|a| a.to_string()).collect(),
        label: Some("mock".to_string()),
        ..Default::default()
    }
}

/// Await `fut`, failing the test if it takes unreasonably long.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation timed out")
}

/// Poll `cond` until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    within(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
