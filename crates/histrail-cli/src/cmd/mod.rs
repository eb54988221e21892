pub mod archive;
pub mod count;
pub mod delete;
pub mod history;

use crate::output::{CliError, OutputMode, render_error};
use clap::Args;
use histrail_core::config::EffectiveConfig;
use histrail_core::db::open_existing;
use histrail_core::db::retention::RetentionWindow;
use histrail_core::error::ErrorCode;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Settings every command runs with.
#[derive(Debug)]
pub struct CmdContext {
    pub store_path: PathBuf,
    pub config: EffectiveConfig,
    pub output: OutputMode,
}

/// Age threshold flags shared by `archive` and `delete`.
#[derive(Args, Debug, Default, Clone, Copy)]
pub struct WindowArgs {
    /// Act on records at least this many days old.
    #[arg(long)]
    pub days: Option<u32>,

    /// Act on records at least this many weeks old. Wins over --days.
    #[arg(long)]
    pub weeks: Option<u32>,
}

/// Flags win; `[retention]` defaults from config apply only when neither
/// flag is given.
pub fn resolve_window(args: WindowArgs, ctx: &CmdContext) -> anyhow::Result<RetentionWindow> {
    let (days, weeks) = if args.days.is_some() || args.weeks.is_some() {
        (args.days, args.weeks)
    } else {
        (ctx.config.retention.default_days, ctx.config.retention.default_weeks)
    };
    match RetentionWindow::from_args(days, weeks) {
        Ok(window) => Ok(window),
        Err(err) => {
            render_error(
                ctx.output,
                &CliError::from_code(err.code(), err.to_string())
                    .with_suggestion("pass --days N or --weeks N, or set [retention] default_days"),
            )?;
            Err(err.into())
        }
    }
}

/// Open the store at `path`, refusing to create one from scratch.
pub fn open_existing_store(path: &Path, output: OutputMode) -> anyhow::Result<Connection> {
    if !path.exists() {
        let msg = format!("history store not found at {}", path.display());
        render_error(output, &CliError::from_code(ErrorCode::StoreOpenFailed, &msg))?;
        anyhow::bail!("{msg}");
    }
    open_existing(path)
}
