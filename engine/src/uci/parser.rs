use crate::{InfoEvent, Score};

use super::{BEST_MOVE, INFO, PONDER, READY_OK, UCI_OK};

/// Incoming message from UCI engine
#[derive(Debug, Clone, PartialEq)]
pub enum UciMessage {
    Id { name: String, value: String },
    UciOk,
    ReadyOk,
    /// `best` is empty when the engine printed a bare `bestmove`.
    BestMove { best: String, ponder: Option<String> },
    Info(InfoEvent),
    Other,
}

/// Parse a UCI message line with the default info parser.
pub fn parse_uci_message(line: &str) -> UciMessage {
    InfoParser::default().parse_message(line)
}

/// Parse an `info` line with the default info parser.
pub fn parse_info_line(line: &str) -> InfoEvent {
    InfoParser::default().parse(line)
}

/// Parser for `info` lines.
///
/// Keys it does not know are skipped along with `unknown_key_skip` following
/// tokens. With the default of 0 only the key itself is skipped, so its value
/// is then looked at as if it were a key.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfoParser {
    pub unknown_key_skip: usize,
}

impl InfoParser {
    pub fn new(unknown_key_skip: usize) -> Self {
        Self { unknown_key_skip }
    }

    pub fn parse_message(&self, line: &str) -> UciMessage {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.first() {
            Some(&UCI_OK) => UciMessage::UciOk,
            Some(&READY_OK) => UciMessage::ReadyOk,
            Some(&"id") if tokens.len() >= 3 => UciMessage::Id {
                name: tokens[1].to_string(),
                value: tokens[2..].join(" "),
            },
            Some(&BEST_MOVE) => {
                let best = tokens.get(1).map(|s| s.to_string()).unwrap_or_default();
                let ponder = match tokens.get(2) {
                    Some(&PONDER) => tokens.get(3).map(|s| s.to_string()),
                    _ => None,
                };
                UciMessage::BestMove { best, ponder }
            }
            Some(&INFO) => UciMessage::Info(self.parse_tokens(&tokens[1..])),
            _ => UciMessage::Other,
        }
    }

    /// Parse a full `info ...` line. The leading keyword is optional.
    pub fn parse(&self, line: &str) -> InfoEvent {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first() {
            Some(&INFO) => self.parse_tokens(&tokens[1..]),
            _ => self.parse_tokens(&tokens),
        }
    }

    fn parse_tokens(&self, tokens: &[&str]) -> InfoEvent {
        let mut info = InfoEvent::default();
        let mut i = 0;

        while i < tokens.len() {
            match tokens[i] {
                "depth" => {
                    i += 1;
                    info.depth = number(tokens.get(i));
                }
                "seldepth" => {
                    i += 1;
                    info.seldepth = number(tokens.get(i));
                }
                "time" => {
                    i += 1;
                    info.time_ms = number(tokens.get(i));
                }
                "nodes" => {
                    i += 1;
                    info.nodes = number(tokens.get(i));
                }
                "nps" => {
                    i += 1;
                    info.nps = number(tokens.get(i));
                }
                "hashfull" => {
                    i += 1;
                    info.hashfull = number(tokens.get(i));
                }
                "cpuload" => {
                    i += 1;
                    info.cpuload = number(tokens.get(i));
                }
                "multipv" => {
                    i += 1;
                    info.multipv = number(tokens.get(i));
                }
                "score" => {
                    let kind = tokens.get(i + 1).copied();
                    let value: Option<i32> = number(tokens.get(i + 2));
                    i += 2;
                    info.score = match (kind, value) {
                        (Some("cp"), Some(v)) => Some(Score::Centipawns(v)),
                        (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                        _ => None,
                    };
                }
                "pv" => {
                    // Everything after pv is the move sequence
                    info.pv = Some(tokens[i + 1..].join(" "));
                    break;
                }
                _ => {
                    i += self.unknown_key_skip;
                }
            }
            i += 1;
        }

        info
    }
}

fn number<T: std::str::FromStr>(token: Option<&&str>) -> Option<T> {
    token.and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bestmove() {
        let msg = parse_uci_message("bestmove e2e4 ponder e7e5");
        assert_eq!(
            msg,
            UciMessage::BestMove {
                best: "e2e4".to_string(),
                ponder: Some("e7e5".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_bare_bestmove() {
        match parse_uci_message("bestmove") {
            UciMessage::BestMove { best, ponder } => {
                assert!(best.is_empty());
                assert!(ponder.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_parse_info() {
        let info = parse_info_line(
            "info depth 12 seldepth 18 score cp 34 nodes 500000 nps 250000 pv e2e4 e7e5",
        );
        assert_eq!(info.depth, Some(12));
        assert_eq!(info.seldepth, Some(18));
        assert_eq!(info.score, Some(Score::Centipawns(34)));
        assert_eq!(info.nodes, Some(500000));
        assert_eq!(info.nps, Some(250000));
        assert_eq!(info.pv.as_deref(), Some("e2e4 e7e5"));
    }

    #[test]
    fn test_parse_mate_score() {
        let info = parse_info_line("info depth 5 score mate -3 pv g1f3");
        assert_eq!(info.score, Some(Score::Mate(-3)));
        assert_eq!(info.pv.as_deref(), Some("g1f3"));
    }

    #[test]
    fn test_parse_full_stockfish_line() {
        let info = parse_info_line(
            "info depth 20 seldepth 27 multipv 2 score cp -15 nodes 1234567 nps 987654 \
             hashfull 321 cpuload 998 time 1250 pv d2d4 g8f6 c2c4",
        );
        assert_eq!(info.multipv, Some(2));
        assert_eq!(info.hashfull, Some(321));
        assert_eq!(info.cpuload, Some(998));
        assert_eq!(info.time_ms, Some(1250));
        assert_eq!(info.score, Some(Score::Centipawns(-15)));
        assert_eq!(info.pv.as_deref(), Some("d2d4 g8f6 c2c4"));
    }

    #[test]
    fn test_bad_number_does_not_reject_line() {
        let info = parse_info_line("info depth x nodes 42");
        assert_eq!(info.depth, None);
        assert_eq!(info.nodes, Some(42));
    }

    #[test]
    fn test_pv_consumes_rest_of_line() {
        let info = parse_info_line("info pv e2e4 depth 3");
        assert_eq!(info.pv.as_deref(), Some("e2e4 depth 3"));
        assert_eq!(info.depth, None);
    }

    #[test]
    fn test_unknown_key_only_skips_itself() {
        // "string" is not a known key, so "depth" is read as a key again
        let info = parse_info_line("info string depth 7");
        assert_eq!(info.depth, Some(7));

        let info = InfoParser::new(1).parse("info string depth 7");
        assert_eq!(info.depth, None);
    }

    #[test]
    fn test_unknown_key_skip_width() {
        let line = "info depth 9 currmove e2e4 currmovenumber 1 tbhits 0 nodes 88";
        let info = InfoParser::new(1).parse(line);
        assert_eq!(info.depth, Some(9));
        assert_eq!(info.nodes, Some(88));
    }

    #[test]
    fn test_unknown_score_kind() {
        let info = parse_info_line("info score wdl 10 nodes 5");
        assert_eq!(info.score, None);
        assert_eq!(info.nodes, Some(5));
    }

    #[test]
    fn test_parse_handshake_lines() {
        assert_eq!(parse_uci_message("uciok"), UciMessage::UciOk);
        assert_eq!(parse_uci_message("readyok"), UciMessage::ReadyOk);
        assert_eq!(
            parse_uci_message("id name Stockfish 17"),
            UciMessage::Id {
                name: "name".to_string(),
                value: "Stockfish 17".to_string(),
            }
        );
        assert_eq!(parse_uci_message("option name Hash type spin"), UciMessage::Other);
    }
}
