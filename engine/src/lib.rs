//! Client-side driver for UCI chess engines.
//!
//! [`StockfishEngine`] owns one engine subprocess and correlates commands with
//! the lines it prints back. [`StockfishPool`] multiplexes callers across a
//! fixed number of engines and replaces engines that crash.

pub mod config;
pub mod error;
pub mod pool;
pub mod session;
pub mod uci;

pub use config::{PoolConfig, StockfishConfig};
pub use error::{EngineError, EngineFault};
pub use pool::{PoolStats, StockfishPool};
pub use session::StockfishEngine;
pub use uci::{parse_info_line, parse_uci_message, InfoParser, UciMessage};

use serde::{Deserialize, Serialize};

/// Highest MultiPV slot recorded. Stockfish caps the option at 500.
const MAX_MULTIPV: u32 = 500;

/// Unique identity of an engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to tell sessions apart in logs
        let id = self.0.simple().to_string();
        f.write_str(&id[..8])
    }
}

/// Lifecycle of a session as seen from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Ready,
    Analyzing,
    Terminated,
}

/// Events broadcast by a session.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Every non-blank line the engine printed, verbatim.
    Line(String),
    Info(InfoEvent),
    Ready,
    Error(EngineFault),
}

/// Engine evaluation score.
///
/// Centipawns: positive = side-to-move is better.
/// Mate: positive N = side-to-move mates in N moves,
/// negative N = side-to-move gets mated in N moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Score {
    Centipawns(i32),
    Mate(i32),
}

impl Score {
    /// Convert to centipawns for comparison. Mate scores use large values.
    pub fn to_cp(&self) -> i32 {
        match self {
            Self::Centipawns(cp) => *cp,
            Self::Mate(m) => {
                if *m > 0 {
                    30000 - *m * 100
                } else {
                    -30000 - *m * 100
                }
            }
        }
    }

    /// Negate the score (flip perspective).
    pub fn negate(&self) -> Self {
        match self {
            Self::Centipawns(cp) => Self::Centipawns(-cp),
            Self::Mate(m) => Self::Mate(-m),
        }
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Centipawns(cp) => write!(f, "{:+.2}", *cp as f64 / 100.0),
            Self::Mate(m) if *m > 0 => write!(f, "+M{}", m),
            Self::Mate(m) => write!(f, "-M{}", m.abs()),
        }
    }
}

/// One parsed `info` line.
///
/// Numeric fields are `None` when the key was absent or its value did not
/// parse; a malformed value never rejects the whole line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoEvent {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub hashfull: Option<u32>,
    pub cpuload: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    /// Principal variation as space separated UCI moves.
    pub pv: Option<String>,
}

/// Latest principal variation reported for one MultiPV slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub pv: String,
    pub score: Score,
    pub depth: u32,
    pub nodes: u64,
    pub time_ms: u64,
    pub nps: u64,
}

impl Line {
    /// Build a line from an info event. Needs both a score and a pv.
    pub fn from_info(info: &InfoEvent) -> Option<Self> {
        Some(Self {
            pv: info.pv.clone()?,
            score: info.score?,
            depth: info.depth.unwrap_or_default(),
            nodes: info.nodes.unwrap_or_default(),
            time_ms: info.time_ms.unwrap_or_default(),
            nps: info.nps.unwrap_or_default(),
        })
    }
}

/// Result of one `go` search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Empty until the `bestmove` line arrives.
    pub best_move: String,
    pub ponder_move: Option<String>,
    /// Indexed by `multipv - 1`. Slots stay `None` until their first line.
    pub lines: Vec<Option<Line>>,
}

impl Analysis {
    /// Store `info` in its MultiPV slot, replacing whatever was there.
    pub(crate) fn record(&mut self, info: &InfoEvent) {
        let multipv = info.multipv.unwrap_or(1);
        if multipv == 0 || multipv > MAX_MULTIPV {
            return;
        }
        let slot = (multipv - 1) as usize;
        let Some(line) = Line::from_info(info) else {
            return;
        };
        if self.lines.len() <= slot {
            self.lines.resize(slot + 1, None);
        }
        self.lines[slot] = Some(line);
    }

    /// The top line, if the engine reported one.
    pub fn best_line(&self) -> Option<&Line> {
        self.lines.first().and_then(Option::as_ref)
    }
}
