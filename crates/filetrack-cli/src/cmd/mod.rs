//! Subcommands and the helpers they share

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use filetrack_core::SystemClock;
use filetrack_store::FsStore;
use filetrack_workflow::{Actor, LifecycleError, Workflow};

use crate::config::Config;

pub mod consolidate;
pub mod show;
pub mod stage;
pub mod store;
pub mod task;
pub mod upload;

/// Who is acting.
#[derive(Args, Debug, Clone)]
pub struct ActorArgs {
    /// Employee id of the person acting
    #[arg(long = "actor")]
    pub actor_id: String,

    /// Display name (default: the id)
    #[arg(long)]
    pub actor_name: Option<String>,
}

impl ActorArgs {
    pub fn actor(&self) -> Actor {
        let name = self.actor_name.as_deref().unwrap_or(&self.actor_id);
        Actor::new(self.actor_id.as_str(), name)
    }
}

pub fn open_store(dir: &Path) -> Result<FsStore> {
    FsStore::open(dir).with_context(|| format!("Failed to open store at {}", dir.display()))
}

/// Workflow over the filesystem store named in the config.
pub fn open_workflow(config: &Config) -> Result<Workflow> {
    let store = open_store(&config.store.dir)?;
    Ok(Workflow::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.workflow(),
    ))
}

/// Table with the shared look and `headers` in cyan.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    table
}

pub fn time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Print what a rejection means for the caller, then hand the error back.
pub fn explain(err: LifecycleError) -> anyhow::Error {
    if let Some(rejection) = err.rejection() {
        let mut table = table(&["Rejected", "Current", "Suggested next"]);
        table.add_row(vec![
            Cell::new(rejection.code()).fg(Color::Red),
            Cell::new(or_dash(rejection.current_stage())),
            Cell::new(or_dash(rejection.suggested_next())),
        ]);
        eprintln!("\n{table}");
    }
    err.into()
}
