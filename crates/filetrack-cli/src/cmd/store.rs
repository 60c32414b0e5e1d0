//! `filetrack store` - maintain the document directory

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color};

use filetrack_core::ProgressContext;

use super::{open_store, table};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub action: StoreAction,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// Check every document parses and is filed under its own key
    Verify,
    /// Remove temp files left by interrupted writes
    Cleanup,
}

pub fn run(args: StoreArgs, config: &Config, progress: &ProgressContext) -> Result<()> {
    let store = open_store(&config.store.dir)?;
    match args.action {
        StoreAction::Verify => {
            let sp = progress.spinner("verify");
            sp.set_message(store.base().display().to_string());
            let issues = store.verify();
            sp.finish_and_clear();
            let issues = issues?;
            if issues.is_empty() {
                eprintln!("All documents in {} verified OK.", store.base().display());
                return Ok(());
            }
            let mut table = table(&["Document", "Problem"]);
            for issue in &issues {
                table.add_row(vec![
                    Cell::new(&issue.path),
                    Cell::new(&issue.problem).fg(Color::Red),
                ]);
            }
            eprintln!("\n{table}");
            anyhow::bail!("{} document(s) have integrity issues", issues.len());
        }
        StoreAction::Cleanup => {
            let removed = store.cleanup_tmp()?;
            if removed == 0 {
                eprintln!("Nothing to clean up.");
            } else {
                eprintln!("Removed {removed} temp file(s).");
            }
            Ok(())
        }
    }
}
