//! `filetrack promote | assign | complete` - manual stage operations

use anyhow::Result;
use clap::Args;

use filetrack_core::{FileId, StageTracking};

use super::{ActorArgs, explain, open_workflow, or_dash};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct StageArgs {
    pub file_id: String,

    #[command(flatten)]
    pub actor: ActorArgs,
}

/// Manual operation on a file's stage.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    Promote,
    Assign,
    Complete,
}

pub fn run(op: Operation, args: StageArgs, config: &Config) -> Result<()> {
    let workflow = open_workflow(config)?;
    let lifecycle = workflow.lifecycle();
    let file_id = FileId::new(args.file_id);
    let actor = args.actor.actor();

    let tracking = match op {
        Operation::Promote => lifecycle.promote_to_qc(&file_id, &actor),
        Operation::Assign => lifecycle.assign(&file_id, &actor),
        Operation::Complete => lifecycle.mark_current_stage_complete(&file_id, &actor),
    }
    .map_err(explain)?;

    print_state(&tracking);
    Ok(())
}

fn print_state(tracking: &StageTracking) {
    eprintln!(
        "{}: {} ({}), assigned to {}",
        tracking.file_id,
        tracking.current_stage,
        tracking.current_status,
        or_dash(
            tracking
                .current_assignment
                .as_ref()
                .map(|a| a.assignee_name.as_str())
        )
    );
}
