//! cz: CLI front end for the cz0 engine core.
//!
//! Subcommands:
//! - probe    inspect a weights file
//! - think    search one position and print the best move
//! - bench    quick playout throughput check (no weights needed)

use std::process;
use std::sync::{Arc, Mutex};

use cz_core::{Board, BoardHistory, EngineConfig, Move};
use cz_logging::{now_ms, AnalysisEventV1, NdjsonWriter, SearchMoveEventV1};
use cz_mcts::{NetEvaluator, SearchStats, UctSearch, UniformEvaluator};
use cz_net::{Network, Weights};

fn print_help() {
    eprintln!(
        r#"cz - AlphaZero-family chess engine core

USAGE:
    cz <COMMAND> [OPTIONS]

COMMANDS:
    probe <weights>     Print format version, channels and blocks of a weights file
    think               Search one position and print the best move
    bench               Measure raw search throughput with a stub evaluator

Run `cz <COMMAND> --help` for command options.
"#
    );
}

fn cmd_probe(args: &[String]) {
    if args.first().map(|a| a.as_str()) == Some("--help") || args.is_empty() {
        println!("USAGE:\n    cz probe <weights-file>");
        if args.is_empty() {
            process::exit(1);
        }
        return;
    }
    let weights = match Weights::from_file(&args[0]) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    println!(
        "format v{}: {} channels, {} blocks",
        weights.format_version().number(),
        weights.channels(),
        weights.blocks()
    );
    println!(
        "inputs: {} planes; policy: {} outputs; value: {} hidden",
        weights.input_channels(),
        weights.policy_outputs(),
        weights.value_channels()
    );
}

struct ThinkArgs {
    weights: Option<String>,
    fen: Option<String>,
    moves: Vec<Move>,
    config: Option<String>,
    playouts: Option<u32>,
    time_ms: Option<u64>,
    threads: Option<usize>,
    log: Option<String>,
    analyze: bool,
}

fn parse_think_args(args: &[String]) -> ThinkArgs {
    let mut out = ThinkArgs {
        weights: None,
        fen: None,
        moves: Vec::new(),
        config: None,
        playouts: None,
        time_ms: None,
        threads: None,
        log: None,
        analyze: false,
    };

    let mut i = 0usize;
    while i < args.len() {
        let need_value = |i: usize| {
            if i + 1 >= args.len() {
                eprintln!("Missing value for {}", args[i]);
                process::exit(1);
            }
            args[i + 1].clone()
        };
        match args[i].as_str() {
            "--help" | "-h" => {
                println!(
                    r#"cz think

USAGE:
    cz think --weights FILE [OPTIONS]

OPTIONS:
    --weights FILE   Weights file (text, optionally gzipped)
    --fen FEN        Position to search (default: start position)
    --moves "m1 m2"  Moves to apply after the FEN, in coordinate form
    --config FILE    YAML engine configuration
    --playouts N     Override the playout budget
    --time-ms N      Override the wall-clock budget
    --threads N      Override the worker count
    --log FILE       Append an NDJSON event per searched move
    --analyze        Print periodic analysis lines while searching
"#
                );
                process::exit(0);
            }
            "--weights" => {
                out.weights = Some(need_value(i));
                i += 2;
            }
            "--fen" => {
                out.fen = Some(need_value(i));
                i += 2;
            }
            "--moves" => {
                let list = need_value(i);
                for tok in list.split_whitespace() {
                    match Move::from_uci(tok) {
                        Ok(mv) => out.moves.push(mv),
                        Err(e) => {
                            eprintln!("{}", e);
                            process::exit(1);
                        }
                    }
                }
                i += 2;
            }
            "--config" => {
                out.config = Some(need_value(i));
                i += 2;
            }
            "--playouts" => {
                out.playouts = parse_or_die(&need_value(i), "--playouts");
                i += 2;
            }
            "--time-ms" => {
                out.time_ms = parse_or_die(&need_value(i), "--time-ms");
                i += 2;
            }
            "--threads" => {
                out.threads = parse_or_die(&need_value(i), "--threads");
                i += 2;
            }
            "--log" => {
                out.log = Some(need_value(i));
                i += 2;
            }
            "--analyze" => {
                out.analyze = true;
                i += 1;
            }
            other => {
                eprintln!("Unknown option for `cz think`: {}", other);
                eprintln!("Run `cz think --help` for usage.");
                process::exit(1);
            }
        }
    }
    out
}

fn parse_or_die<T: std::str::FromStr>(value: &str, flag: &str) -> Option<T> {
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            eprintln!("Invalid value for {}: {}", flag, value);
            process::exit(1);
        }
    }
}

fn build_history(fen: Option<&str>, moves: &[Move]) -> BoardHistory {
    let board = match fen {
        None => Board::startpos(),
        Some(fen) => match Board::from_fen(fen) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        },
    };
    let mut history = BoardHistory::new(board);
    for &mv in moves {
        history.apply(mv);
    }
    history
}

fn print_stats(prefix: &str, stats: &SearchStats) {
    let pv: Vec<String> = stats.pv.iter().map(|m| m.to_string()).collect();
    println!(
        "{}playouts {} nodes {} time {}ms winrate {:.1}% pv {}",
        prefix,
        stats.playouts,
        stats.nodes,
        stats.elapsed_ms,
        stats.winrate * 100.0,
        pv.join(" ")
    );
}

fn cmd_think(args: &[String]) {
    let parsed = parse_think_args(args);

    let mut cfg = match &parsed.config {
        None => EngineConfig::default(),
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        },
    };
    if let Some(n) = parsed.playouts {
        cfg.playout_limit = n;
    }
    if let Some(ms) = parsed.time_ms {
        cfg.time_limit_ms = ms;
    }
    if let Some(n) = parsed.threads {
        cfg.num_threads = n;
    }
    if parsed.analyze {
        cfg.analyze = true;
    }
    if cfg.playout_limit == 0 && cfg.time_limit_ms == 0 {
        // Keep a default budget so `cz think` terminates on its own.
        cfg.time_limit_ms = 1000;
    }

    let weights_path = parsed.weights.unwrap_or_else(|| {
        eprintln!("cz think requires --weights; run `cz think --help`.");
        process::exit(1);
    });
    let weights = match Weights::from_file(&weights_path) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    if !cfg.quiet {
        println!(
            "loaded v{} network: {} channels, {} blocks",
            weights.format_version().number(),
            weights.channels(),
            weights.blocks()
        );
    }

    let evaluator = NetEvaluator::new(Network::cpu(weights), cfg.softmax_temperature);
    let history = build_history(parsed.fen.as_deref(), &parsed.moves);
    let quiet = cfg.quiet;
    let analyze = cfg.analyze;

    let log_writer: Option<Arc<Mutex<NdjsonWriter>>> = match &parsed.log {
        None => None,
        Some(path) => match NdjsonWriter::open_append(path) {
            Ok(w) => Some(Arc::new(Mutex::new(w))),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        },
    };

    let mut search = match UctSearch::new(cfg) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    if analyze {
        let analysis_log = log_writer.clone();
        search.set_analysis_sink(Box::new(move |stats| {
            print_stats("info ", stats);
            if let Some(writer) = &analysis_log {
                let event = AnalysisEventV1 {
                    event: AnalysisEventV1::EVENT,
                    ts_ms: now_ms(),
                    playouts: stats.playouts,
                    nodes: stats.nodes,
                    elapsed_ms: stats.elapsed_ms,
                    winrate: stats.winrate,
                    pv: stats.pv.iter().map(|m| m.to_string()).collect(),
                };
                let mut writer = writer.lock().expect("log writer mutex");
                if let Err(e) = writer.write_event(&event) {
                    eprintln!("{}", e);
                }
            }
        }));
    }

    let (best, stats) = match search.think(&history, &evaluator) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("search failed: {}", e);
            process::exit(1);
        }
    };

    if !quiet {
        print_stats("", &stats);
    }
    println!("bestmove {}", best);

    if let Some(writer) = &log_writer {
        let event = SearchMoveEventV1 {
            event: SearchMoveEventV1::EVENT,
            ts_ms: now_ms(),
            position: history.current().fen(),
            best_move: best.to_string(),
            playouts: stats.playouts,
            nodes: stats.nodes,
            elapsed_ms: stats.elapsed_ms,
            winrate: stats.winrate,
            pv: stats.pv.iter().map(|m| m.to_string()).collect(),
        };
        let mut writer = writer.lock().expect("log writer mutex");
        let result = writer.write_event(&event).and_then(|_| writer.flush());
        if let Err(e) = result {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn cmd_bench(args: &[String]) {
    if args.first().map(|a| a.as_str()) == Some("--help") {
        println!("USAGE:\n    cz bench [--playouts N] [--threads N]");
        return;
    }
    let mut playouts: u32 = 20_000;
    let mut threads: usize = 1;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--playouts" if i + 1 < args.len() => {
                playouts = args[i + 1].parse().unwrap_or(playouts);
                i += 2;
            }
            "--threads" if i + 1 < args.len() => {
                threads = args[i + 1].parse().unwrap_or(threads);
                i += 2;
            }
            other => {
                eprintln!("Unknown option for `cz bench`: {}", other);
                process::exit(1);
            }
        }
    }

    let cfg = EngineConfig {
        playout_limit: playouts,
        num_threads: threads,
        ..EngineConfig::default()
    };
    let mut search = match UctSearch::new(cfg) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let history = BoardHistory::startpos();
    let start = std::time::Instant::now();
    match search.think(&history, &UniformEvaluator) {
        Ok((_, stats)) => {
            let secs = start.elapsed().as_secs_f64();
            println!(
                "{} playouts in {:.2}s ({:.0} playouts/s, {} nodes)",
                stats.playouts,
                secs,
                stats.playouts as f64 / secs.max(1e-9),
                stats.nodes
            );
        }
        Err(e) => {
            eprintln!("bench failed: {}", e);
            process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(|a| a.as_str()) {
        Some("probe") => cmd_probe(&args[1..]),
        Some("think") => cmd_think(&args[1..]),
        Some("bench") => cmd_bench(&args[1..]),
        Some("--help") | Some("-h") | None => {
            print_help();
            if args.is_empty() {
                process::exit(1);
            }
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            process::exit(1);
        }
    }
}
