#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::CmdContext;
use histrail_core::config::resolve_config;
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "htr: maintain histrail audit-trail stores",
    long_about = None
)]
struct Cli {
    /// Enable debug logging unless HISTRAIL_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// History store path. Defaults to [store].path in .histrail/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for --format json.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Retention",
        about = "Archive old records",
        long_about = "Copy records older than the window into the archive table, then remove them from the live table.",
        after_help = "EXAMPLES:\n    # Archive everything older than 90 days\n    htr archive --days 90\n\n    # Weeks win when both are given\n    htr archive --days 90 --weeks 8\n\n    # Emit machine-readable output\n    htr archive --weeks 8 --json"
    )]
    Archive(cmd::archive::ArchiveArgs),

    #[command(
        next_help_heading = "Retention",
        about = "Delete old records",
        long_about = "Permanently delete records older than the window from the live table, or from the archive with --archived.",
        after_help = "EXAMPLES:\n    # Drop live records older than 30 days\n    htr delete --days 30\n\n    # Purge the archive\n    htr delete --weeks 52 --archived"
    )]
    Delete(cmd::delete::DeleteArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show history records",
        long_about = "List the records of an entity type, or of one instance, newest first with a change summary.\n\nRecords stored without a diff get one computed on first read. htr has no field metadata, so that diff compares values exactly: a related-id list that only changed order is reported as changed.",
        after_help = "EXAMPLES:\n    # Last 20 changes to any Episode\n    htr history Episode\n\n    # Full history of one poll\n    htr history Poll 42 -n 100\n\n    # Emit machine-readable output\n    htr history Poll 42 --json"
    )]
    History(cmd::history::HistoryArgs),

    #[command(
        next_help_heading = "Read",
        about = "Count stored records",
        long_about = "Count records in the live table, or in the archive with --archived.",
        after_help = "EXAMPLES:\n    # Exact live count\n    htr count\n\n    # Quick estimate of the archive size\n    htr count --archived --approximate"
    )]
    Count(cmd::count::CountArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("HISTRAIL_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "histrail=debug,info"
        } else {
            "histrail=info,warn"
        })
    });

    let format = env::var("HISTRAIL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_root = env::current_dir()?;
    let config = resolve_config(&project_root)?;
    let output = output::resolve_output_mode(cli.format, cli.json, config.output.as_deref());
    let store_path = cli.db.clone().unwrap_or_else(|| config.store_path.clone());
    debug!(store = %store_path.display(), ?output, "resolved settings");

    let ctx = CmdContext {
        store_path,
        config,
        output,
    };

    match &cli.command {
        Commands::Archive(args) => cmd::archive::run_archive(args, &ctx),
        Commands::Delete(args) => cmd::delete::run_delete(args, &ctx),
        Commands::History(args) => cmd::history::run_history(args, &ctx),
        Commands::Count(args) => cmd::count::run_count(args, &ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["htr", "count", "--db", "/tmp/h.sqlite3", "--json", "-v"]);
        assert!(cli.json);
        assert!(cli.verbose);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/h.sqlite3")));
        assert!(matches!(cli.command, Commands::Count(_)));
    }

    #[test]
    fn format_flag_parses_value_enum() {
        let cli = Cli::parse_from(["htr", "--format", "text", "count"]);
        assert_eq!(cli.format, Some(OutputMode::Text));
    }

    #[test]
    fn window_flags_are_optional_at_parse_time() {
        let cli = Cli::parse_from(["htr", "archive"]);
        let Commands::Archive(args) = cli.command else {
            panic!("expected archive");
        };
        assert_eq!(args.window.days, None);
        assert_eq!(args.window.weeks, None);

        let cli = Cli::parse_from(["htr", "delete", "--weeks", "2", "--archived"]);
        let Commands::Delete(args) = cli.command else {
            panic!("expected delete");
        };
        assert_eq!(args.window.weeks, Some(2));
        assert!(args.archived);
    }

    #[test]
    fn history_takes_type_id_and_limit() {
        let cli = Cli::parse_from(["htr", "history", "Poll", "42", "-n", "5"]);
        let Commands::History(args) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(args.entity_type, "Poll");
        assert_eq!(args.object_id.as_deref(), Some("42"));
        assert_eq!(args.limit, 5);

        let cli = Cli::parse_from(["htr", "history", "Episode"]);
        let Commands::History(args) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(args.object_id, None);
        assert_eq!(args.limit, 20);
    }
}
