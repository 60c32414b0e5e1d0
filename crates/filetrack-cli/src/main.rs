//! filetrack - Permit file tracking
//!
//! Resolves uploads to stable file identities, moves files through the
//! PRELIMS → PRODUCTION → COMPLETED → QC → DELIVERED stages, and reports
//! how long each stage took against its SLA.

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::Cell;

mod cmd;
mod config;

use cmd::stage::Operation;
use config::Config;

#[derive(Parser)]
#[command(name = "filetrack")]
#[command(about = "Permit file identity and stage tracking")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./filetrack.toml or ~/.config/filetrack/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Store directory (overrides the config file)
    #[arg(long, global = true)]
    store: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file for a stage
    Upload(cmd::upload::UploadArgs),
    /// Open or complete tasks
    Task(cmd::task::TaskArgs),
    /// Move a COMPLETED file into QC
    Promote(cmd::stage::StageArgs),
    /// Assign the open stage to someone
    Assign(cmd::stage::StageArgs),
    /// Close the current stage
    Complete(cmd::stage::StageArgs),
    /// Show a file's identity, history and references
    Show(cmd::show::ShowArgs),
    /// Look a file up by name
    Find(cmd::show::FindArgs),
    /// List a file's versions
    Versions(cmd::show::FileArgs),
    /// Per-stage durations and SLA status
    Report(cmd::show::FileArgs),
    /// Merge identities that share a fingerprint
    Consolidate(cmd::consolidate::ConsolidateArgs),
    /// Store-wide counts
    Stats,
    /// Maintain the store directory
    Store(cmd::store::StoreArgs),
    /// Show stage order and SLA thresholds
    Stages,
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = filetrack_core::ProgressContext::new();

    // TTY: warn unless --debug, bars show activity. Otherwise info.
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    filetrack_core::init_logging(quiet, cli.debug, multi)?;

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    if let Some(dir) = cli.store {
        config.store.dir = dir;
    }

    match cli.command {
        Command::Upload(args) => cmd::upload::run(args, &config),
        Command::Task(args) => cmd::task::run(args, &config),
        Command::Promote(args) => cmd::stage::run(Operation::Promote, args, &config),
        Command::Assign(args) => cmd::stage::run(Operation::Assign, args, &config),
        Command::Complete(args) => cmd::stage::run(Operation::Complete, args, &config),
        Command::Show(args) => cmd::show::show(args, &config),
        Command::Find(args) => cmd::show::find(args, &config),
        Command::Versions(args) => cmd::show::versions(args, &config),
        Command::Report(args) => cmd::show::report(args, &config),
        Command::Consolidate(args) => cmd::consolidate::run(args, &config, &progress),
        Command::Stats => cmd::consolidate::stats(&config),
        Command::Store(args) => cmd::store::run(args, &config, &progress),
        Command::Stages => {
            let mut table =
                cmd::table(&["Stage", "Name", "Permit status", "Ideal", "Max", "Auto-advance"]);
            for (stage, threshold) in config.stages.iter() {
                table.add_row(vec![
                    Cell::new(stage),
                    Cell::new(stage.display_name()),
                    Cell::new(stage.permit_status()),
                    Cell::new(format!("{} min", threshold.ideal_minutes)),
                    Cell::new(format!("{} min", threshold.max_minutes)),
                    Cell::new(if stage.auto_advances() { "yes" } else { "no" }),
                ]);
            }
            eprintln!("\n{table}");
            Ok(())
        }
        Command::Config => {
            let mut table = cmd::table(&["Setting", "Value"]);
            table.add_row(vec![
                "Store directory",
                &config.store.dir.display().to_string(),
            ]);
            table.add_row(vec![
                "Trust filename",
                if config.identity.trust_filename { "yes" } else { "no" },
            ]);
            table.add_row(vec![
                "Unique fingerprint",
                if config.identity.unique_fingerprint { "yes" } else { "no" },
            ]);
            for (stage, threshold) in config.stages.iter() {
                table.add_row(vec![
                    &format!("{stage} SLA"),
                    &format!("{} / {} min", threshold.ideal_minutes, threshold.max_minutes),
                ]);
            }

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
