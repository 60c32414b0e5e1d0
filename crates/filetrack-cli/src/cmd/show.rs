//! `filetrack show | find | versions | report` - read-only views

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color};

use filetrack_core::{short_fingerprint, FileId, SlaStatus};
use filetrack_workflow::LifecycleView;

use super::{explain, open_workflow, or_dash, table, time};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub file_id: String,

    /// Print the view as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct FindArgs {
    /// Original file name (exact, then case-insensitive)
    pub name: String,
}

#[derive(Args, Debug)]
pub struct FileArgs {
    pub file_id: String,
}

fn sla_cell(status: Option<SlaStatus>) -> Cell {
    match status {
        Some(SlaStatus::WithinIdeal) => Cell::new(SlaStatus::WithinIdeal).fg(Color::Green),
        Some(SlaStatus::OverIdeal) => Cell::new(SlaStatus::OverIdeal).fg(Color::Yellow),
        Some(status) => Cell::new(status).fg(Color::Red),
        None => Cell::new("-").fg(Color::DarkGrey),
    }
}

fn load(config: &Config, file_id: String) -> Result<LifecycleView> {
    let workflow = open_workflow(config)?;
    workflow.view(&FileId::new(file_id)).map_err(explain)
}

pub fn show(args: ShowArgs, config: &Config) -> Result<()> {
    let view = load(config, args.file_id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let mut summary = table(&["File", "Name", "Fingerprint", "Stage", "Status", "Assignee"]);
    summary.add_row(vec![
        Cell::new(&view.file_id),
        Cell::new(&view.original_name),
        Cell::new(or_dash(view.content_fingerprint.as_deref().map(short_fingerprint))),
        Cell::new(or_dash(view.current_stage)),
        Cell::new(or_dash(view.permit_status)),
        Cell::new(or_dash(
            view.current_assignment.as_ref().map(|a| a.assignee_name.as_str()),
        )),
    ]);
    eprintln!("\n{summary}");

    if view.history.is_empty() {
        eprintln!("Not tracked yet.");
        return Ok(());
    }

    let mut history = table(&["Stage", "Assignee", "Entered", "Completed", "Minutes", "SLA", "Merged from"]);
    for line in &view.history {
        history.add_row(vec![
            Cell::new(line.stage),
            Cell::new(or_dash(line.assignee.as_deref())),
            Cell::new(time(&line.entered_at)),
            Cell::new(or_dash(line.completed_at.as_ref().map(time))),
            Cell::new(or_dash(line.duration_minutes)),
            sla_cell(line.sla_status),
            Cell::new(or_dash(line.merged_from.as_ref())),
        ]);
    }
    eprintln!("{history}");

    let task_count: usize = view.tasks_by_stage.values().map(Vec::len).sum();
    if task_count + view.other_refs.len() > 0 {
        let mut refs = table(&["Ref", "Kind", "Stage", "Open"]);
        for reference in view
            .tasks_by_stage
            .values()
            .flatten()
            .chain(&view.other_refs)
        {
            refs.add_row(vec![
                Cell::new(&reference.ref_id),
                Cell::new(reference.kind),
                Cell::new(or_dash(reference.stage)),
                Cell::new(if reference.open { "yes" } else { "no" }),
            ]);
        }
        eprintln!("{refs}");
    }
    Ok(())
}

pub fn find(args: FindArgs, config: &Config) -> Result<()> {
    let workflow = open_workflow(config)?;
    match workflow.resolver().find_by_name(&args.name)? {
        Some(identity) => {
            let mut table = table(&["File", "Name", "Versions", "Created"]);
            table.add_row(vec![
                Cell::new(&identity.file_id),
                Cell::new(&identity.original_name),
                Cell::new(identity.version_history.len()),
                Cell::new(time(&identity.created_at)),
            ]);
            eprintln!("\n{table}");
            println!("{}", identity.file_id);
        }
        None => eprintln!("No file named {}.", args.name),
    }
    Ok(())
}

pub fn versions(args: FileArgs, config: &Config) -> Result<()> {
    let view = load(config, args.file_id)?;
    let mut table = table(&["Version", "Fingerprint", "Bytes", "Uploaded", "By", "Reason"]);
    for version in &view.versions {
        let current = view.content_fingerprint.as_deref() == Some(version.fingerprint.as_str());
        let number = Cell::new(version.version_number);
        table.add_row(vec![
            if current { number.fg(Color::Green) } else { number },
            Cell::new(short_fingerprint(&version.fingerprint)),
            Cell::new(version.byte_size),
            Cell::new(time(&version.uploaded_at)),
            Cell::new(&version.uploaded_by),
            Cell::new(&version.reason),
        ]);
    }
    eprintln!("\n{table}");
    Ok(())
}

pub fn report(args: FileArgs, config: &Config) -> Result<()> {
    let view = load(config, args.file_id)?;
    let Some(report) = view.report else {
        eprintln!("{} is not tracked yet.", view.file_id);
        return Ok(());
    };

    let mut table = table(&["Stage", "Assignee", "Minutes", "SLA"]);
    for line in &report.lines {
        table.add_row(vec![
            Cell::new(line.stage),
            Cell::new(or_dash(line.assignee.as_deref())),
            Cell::new(or_dash(line.duration_minutes)),
            sla_cell(line.sla_status),
        ]);
    }
    eprintln!("\n{table}");
    eprintln!(
        "Total {} min, {} escalation(s), {} penalty point(s)",
        report.total_minutes, report.breaches, report.penalty_total
    );
    Ok(())
}
