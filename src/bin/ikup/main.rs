//! Entry point for the `ikup` binary (spec §6 "CLI surface").
//!
//! Grounded on `examples/bugzmanov-bookokrat`'s `src/main.rs` for the
//! skeleton shape (`simplelog` file logger set up before anything else
//! runs, `anyhow`/exit-code translation at the boundary) and
//! `examples/original_source/ikup/cli.py`'s `main`/`main_unwrapped` for the
//! default-subcommand-insertion trick and the exit-code convention: 0 on
//! full success, 1 when per-image errors were accumulated but the run
//! otherwise completed, 2 for CLI misuse or a fatal, non-recoverable error.

mod cli;
mod commands;
mod format_spec;

use std::fs::File;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;
use simplelog::WriteLogger;

use cli::{Cli, Commands, COMMAND_NAMES};
use ikup::config::Config;

/// `sys.argv.insert(1, "display")`: if the first non-global-flag argument
/// isn't a recognized subcommand, assume `display` was meant (`ikup a.png`
/// instead of `ikup display a.png`).
fn preprocess_args(mut args: Vec<String>) -> Vec<String> {
    let mut i = 1;
    while i < args.len() {
        let a = args[i].as_str();
        if a == "-h" || a == "--help" || a == "-V" || a == "--version" {
            return args;
        }
        if a == "--config" {
            i += 2;
            continue;
        }
        if a.starts_with("--config=") {
            i += 1;
            continue;
        }
        if a == "-v" || a == "--verbose" || a == "-q" || a == "--quiet" {
            i += 1;
            continue;
        }
        break;
    }
    if i >= args.len() {
        args.push("display".to_string());
    } else if !COMMAND_NAMES.contains(&args[i].as_str()) {
        args.insert(i, "display".to_string());
    }
    args
}

fn level_from_name(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// `-v`/`-q` nudge the configured level up/down the usual
/// off/error/warn/info/debug/trace ladder.
fn resolve_log_level(config_level: &str, verbose: u8, quiet: u8) -> LevelFilter {
    const LADDER: [LevelFilter; 6] = [
        LevelFilter::Off,
        LevelFilter::Error,
        LevelFilter::Warn,
        LevelFilter::Info,
        LevelFilter::Debug,
        LevelFilter::Trace,
    ];
    let base = level_from_name(config_level).unwrap_or(LevelFilter::Warn);
    let base_idx = LADDER.iter().position(|l| *l == base).unwrap_or(2) as i32;
    let shifted = base_idx + verbose as i32 - quiet as i32;
    LADDER[shifted.clamp(0, LADDER.len() as i32 - 1) as usize]
}

fn init_logging(config: &Config, verbose: u8, quiet: u8) {
    let level = resolve_log_level(&config.log_level, verbose, quiet);
    if level == LevelFilter::Off {
        return;
    }
    if std::fs::create_dir_all(&config.id_database_dir).is_err() {
        return;
    }
    if let Ok(file) = File::create(config.id_database_dir.join("ikup.log")) {
        let _ = WriteLogger::init(level, simplelog::Config::default(), file);
    }
}

fn is_broken_pipe(err: &ikup::Error) -> bool {
    matches!(err, ikup::Error::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe)
}

fn main() -> ExitCode {
    let argv = preprocess_args(std::env::args().collect());
    let cli = Cli::parse_from(argv);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    init_logging(&config, cli.verbose, cli.quiet);
    log::debug!("dispatching subcommand");

    let result = match cli.command {
        Commands::Display(args) => commands::run_display(config, args),
        Commands::Upload(args) => commands::run_upload(config, args),
        Commands::GetId(args) => commands::run_get_id(config, args),
        Commands::Placeholder(args) => commands::run_placeholder(config, args),
        Commands::List(args) => commands::run_filter("list", config, args),
        Commands::Forget(args) => commands::run_filter("forget", config, args),
        Commands::Dirty(args) => commands::run_filter("dirty", config, args),
        Commands::Reupload(args) => commands::run_filter("reupload", config, args),
        Commands::Fix(args) => commands::run_filter("fix", config, args),
        Commands::Cleanup => commands::run_cleanup(config),
        Commands::DumpConfig(args) => commands::run_dump_config(config, args),
        Commands::Status => commands::run_status(config),
        Commands::Help { topic } => Ok(commands::run_help(topic)),
    };

    match result {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) if is_broken_pipe(&e) => ExitCode::from(1),
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_image_path_gets_implicit_display() {
        let out = preprocess_args(args(&["ikup", "a.png"]));
        assert_eq!(out, args(&["ikup", "display", "a.png"]));
    }

    #[test]
    fn recognized_subcommand_is_left_alone() {
        let out = preprocess_args(args(&["ikup", "list", "--all"]));
        assert_eq!(out, args(&["ikup", "list", "--all"]));
    }

    #[test]
    fn global_flags_are_skipped_before_checking_the_subcommand() {
        let out = preprocess_args(args(&["ikup", "--config", "x.toml", "-v", "a.png"]));
        assert_eq!(out, args(&["ikup", "--config", "x.toml", "-v", "display", "a.png"]));
    }

    #[test]
    fn help_and_version_flags_pass_through_untouched() {
        assert_eq!(preprocess_args(args(&["ikup", "--help"])), args(&["ikup", "--help"]));
        assert_eq!(preprocess_args(args(&["ikup", "-V"])), args(&["ikup", "-V"]));
    }

    #[test]
    fn no_arguments_at_all_falls_back_to_display() {
        assert_eq!(preprocess_args(args(&["ikup"])), args(&["ikup", "display"]));
    }

    #[test]
    fn log_level_shifts_along_the_ladder() {
        assert_eq!(resolve_log_level("info", 0, 0), LevelFilter::Info);
        assert_eq!(resolve_log_level("info", 2, 0), LevelFilter::Trace);
        assert_eq!(resolve_log_level("info", 0, 5), LevelFilter::Off);
    }
}
