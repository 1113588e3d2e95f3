//! The subset of the UCI protocol spoken to the engine.

pub mod parser;

pub use parser::{parse_info_line, parse_uci_message, InfoParser, UciMessage};

pub const UCI: &str = "uci";
pub const UCI_OK: &str = "uciok";
pub const IS_READY: &str = "isready";
pub const READY_OK: &str = "readyok";
pub const QUIT: &str = "quit";
pub const INFO: &str = "info";
pub const BEST_MOVE: &str = "bestmove";
pub const PONDER: &str = "ponder";

/// The line a command is acknowledged with, if it has one.
pub fn expected_ack(command: &str) -> Option<&'static str> {
    match command.trim() {
        UCI => Some(UCI_OK),
        IS_READY => Some(READY_OK),
        _ => None,
    }
}

/// Whether `line` satisfies a waiter registered for `target`.
///
/// Matches the whole line or `target` followed by a space, so a waiter for
/// `bestmove` sees `bestmove e2e4` but `uciok` is not matched by `uci`.
pub fn line_matches(line: &str, target: &str) -> bool {
    match line.strip_prefix(target) {
        Some(rest) => rest.is_empty() || rest.starts_with(' '),
        None => false,
    }
}

pub fn set_option(name: &str, value: impl std::fmt::Display) -> String {
    format!("setoption name {} value {}", name, value)
}

pub fn position_fen(fen: &str) -> String {
    format!("position fen {}", fen)
}

pub fn go_depth(depth: u32) -> String {
    format!("go depth {}", depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_ack() {
        assert_eq!(expected_ack("uci"), Some("uciok"));
        assert_eq!(expected_ack("isready"), Some("readyok"));
        assert_eq!(expected_ack("go depth 5"), None);
        assert_eq!(expected_ack("ucinewgame"), None);
    }

    #[test]
    fn test_line_matches() {
        assert!(line_matches("uciok", "uciok"));
        assert!(line_matches("bestmove e2e4 ponder e7e5", "bestmove"));
        assert!(!line_matches("uciok", "uci"));
        assert!(!line_matches("readyok", "uciok"));
    }

    #[test]
    fn test_command_builders() {
        assert_eq!(set_option("MultiPV", 3), "setoption name MultiPV value 3");
        assert_eq!(
            position_fen("8/8/8/8/8/8/8/K6k w - - 0 1"),
            "position fen 8/8/8/8/8/8/8/K6k w - - 0 1"
        );
        assert_eq!(go_depth(12), "go depth 12");
    }
}
