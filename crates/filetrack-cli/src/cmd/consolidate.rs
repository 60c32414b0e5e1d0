//! `filetrack consolidate | stats` - duplicate identities

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color};

use filetrack_core::{short_fingerprint, ProgressContext};

use super::{open_workflow, table};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ConsolidateArgs {
    /// Actually merge (otherwise dry-run)
    #[arg(long)]
    pub confirm: bool,
}

pub fn run(args: ConsolidateArgs, config: &Config, progress: &ProgressContext) -> Result<()> {
    let workflow = open_workflow(config)?;
    let consolidator = workflow.consolidator();
    let groups = consolidator.detect_groups()?;

    if groups.is_empty() {
        eprintln!("No duplicate identities.");
        return Ok(());
    }

    if !args.confirm {
        let mut table = table(&["Fingerprint", "Keeps", "Absorbs"]);
        for group in &groups {
            let duplicates: Vec<_> = group.duplicates.iter().map(|d| d.as_str()).collect();
            table.add_row(vec![
                Cell::new(short_fingerprint(&group.fingerprint)),
                Cell::new(&group.target),
                Cell::new(duplicates.join(", ")),
            ]);
        }
        eprintln!("\nWould consolidate {} duplicate groups:", groups.len());
        eprintln!("{table}");
        eprintln!("Run with --confirm to actually merge.");
        return Ok(());
    }

    let pb = progress.count_bar("consolidate", groups.len() as u64);
    let report = consolidator.run_with(|group, result| {
        pb.set_message(group.target.to_string());
        pb.inc(1);
        if let Err(e) = result {
            progress.println(format!(
                "  {} ({}): {e}",
                group.target,
                short_fingerprint(&group.fingerprint)
            ));
        }
    })?;
    pb.finish_and_clear();

    let mut table = table(&["Groups", "Merged", "Removed", "Refs moved", "Failed"]);
    let failed = Cell::new(report.failures.len());
    table.add_row(vec![
        Cell::new(report.groups_found),
        Cell::new(report.groups_consolidated),
        Cell::new(report.duplicates_removed),
        Cell::new(report.refs_moved),
        if report.failures.is_empty() {
            failed
        } else {
            failed.fg(Color::Red)
        },
    ]);
    eprintln!("\n{table}");

    if !report.failures.is_empty() {
        eprintln!("Rerun to retry the failed groups.");
    }
    Ok(())
}

pub fn stats(config: &Config) -> Result<()> {
    let workflow = open_workflow(config)?;
    let stats = workflow.consolidator().statistics()?;

    let mut table = table(&["Metric", "Count"]);
    table.add_row(vec![Cell::new("Identities"), Cell::new(stats.identities)]);
    table.add_row(vec![Cell::new("With fingerprint"), Cell::new(stats.fingerprinted)]);
    table.add_row(vec![Cell::new("Tracked"), Cell::new(stats.trackings)]);
    table.add_row(vec![Cell::new("References"), Cell::new(stats.refs)]);
    table.add_row(vec![Cell::new("Duplicate groups"), Cell::new(stats.duplicate_groups)]);
    table.add_row(vec![Cell::new("Duplicates"), Cell::new(stats.total_duplicates)]);
    eprintln!("\n{table}");
    Ok(())
}
