//! Scripted UCI engine used by the integration tests.
//!
//! Speaks just enough UCI for the session: the handshake, `isready`,
//! `setoption name MultiPV` and `go depth`. Positions are accepted and
//! ignored. Every command it receives is echoed on stderr as
//! `info string received <command>` so tests can see what was sent. The
//! `crash` command exits with a non-zero status.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use clap::Parser;

#[derive(Parser)]
#[command(name = "mock-engine", about = "Deterministic stand-in for a UCI engine")]
struct Args {
    /// Exit with this status before reading any input.
    #[arg(long)]
    exit_code: Option<i32>,

    /// Pause after each reported depth, in milliseconds.
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Never answer `uci`.
    #[arg(long)]
    silent: bool,
}

fn main() {
    let args = Args::parse();
    if let Some(code) = args.exit_code {
        std::process::exit(code);
    }

    let mut multi_pv = 1;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        eprintln!("info string received {}", command);

        let tokens: Vec<&str> = command.split_whitespace().collect();
        match tokens.first().copied() {
            Some("uci") if !args.silent => {
                emit(&[
                    "id name MockFish",
                    "id author stockfish-pool",
                    "option name MultiPV type spin default 1 min 1 max 500",
                    "uciok",
                ]);
            }
            Some("isready") => emit(&["readyok"]),
            Some("setoption") => {
                if let ["setoption", "name", "MultiPV", "value", value] = tokens.as_slice() {
                    multi_pv = value.parse().unwrap_or(1);
                }
            }
            Some("go") => {
                let depth = match tokens.as_slice() {
                    ["go", "depth", n, ..] => n.parse().unwrap_or(1),
                    _ => 1,
                };
                search(multi_pv, depth, args.delay_ms);
            }
            Some("crash") => std::process::exit(3),
            Some("quit") => break,
            _ => {}
        }
    }
}

fn search(multi_pv: u32, depth: u32, delay_ms: u64) {
    let pvs = ["e2e4 e7e5 g1f3", "d2d4 d7d5 c2c4", "g1f3 g8f6", "c2c4 e7e5"];
    for d in 1..=depth.max(1) {
        emit(&[format!("info depth {} currmove e2e4 currmovenumber 1", d).as_str()]);
        for k in 1..=multi_pv {
            let score = 40 - (k as i32) * 10 + d as i32;
            let pv = pvs[((k - 1) as usize) % pvs.len()];
            let info = format!(
                "info depth {} seldepth {} multipv {} score cp {} nodes {} nps 100000 time {} pv {}",
                d,
                d + 2,
                k,
                score,
                d * 1000,
                d * 10,
                pv
            );
            emit(&[info.as_str()]);
        }
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms));
        }
    }
    emit(&["bestmove e2e4 ponder e7e5"]);
}

fn emit(lines: &[&str]) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        let _ = writeln!(out, "{}", line);
    }
    let _ = out.flush();
}
