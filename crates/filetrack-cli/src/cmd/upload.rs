//! `filetrack upload` - file an upload for a stage

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color};

use filetrack_core::{short_fingerprint, fingerprint, Stage};
use filetrack_workflow::{UploadOutcome, UploadRequest};

use super::{ActorArgs, explain, open_workflow, or_dash, table};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// File to upload
    pub path: PathBuf,

    /// Stage the upload is for (PRELIMS, PRODUCTION, COMPLETED, QC, DELIVERED)
    #[arg(short, long)]
    pub stage: Stage,

    /// Name to record instead of the file name
    #[arg(long)]
    pub name: Option<String>,

    #[command(flatten)]
    pub actor: ActorArgs,
}

pub fn run(args: UploadArgs, config: &Config) -> Result<()> {
    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    let name = match args.name {
        Some(name) => name,
        None => args
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", args.path.display()))?,
    };

    let workflow = open_workflow(config)?;
    let outcome = workflow
        .submit(UploadRequest {
            bytes: &bytes,
            original_name: &name,
            requested_stage: args.stage,
            actor: args.actor.actor(),
        })
        .map_err(explain)?;

    let (action, matched_by, version) = match &outcome {
        UploadOutcome::Created { .. } => ("created", None, None),
        UploadOutcome::Continued {
            matched_by,
            new_version,
            ..
        } => ("continued", Some(*matched_by), *new_version),
        UploadOutcome::Progressed {
            matched_by,
            new_version,
            ..
        } => ("progressed", Some(*matched_by), *new_version),
    };

    let mut table = table(&["File", "Stage", "Outcome", "Matched by", "Version", "Fingerprint"]);
    let fp = fingerprint(&bytes);
    table.add_row(vec![
        Cell::new(outcome.file_id()),
        Cell::new(outcome.stage()),
        Cell::new(action).fg(Color::Green),
        Cell::new(or_dash(matched_by)),
        Cell::new(or_dash(version)),
        Cell::new(short_fingerprint(&fp)),
    ]);
    eprintln!("\n{table}");
    println!("{}", outcome.file_id());
    Ok(())
}
