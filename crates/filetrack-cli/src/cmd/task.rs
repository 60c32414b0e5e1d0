//! `filetrack task` - hooks for the task system

use anyhow::Result;
use clap::{Args, Subcommand};

use filetrack_core::{FileId, Stage};
use filetrack_workflow::{AutoProgress, TaskCompleted};

use super::{ActorArgs, explain, open_workflow};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub action: TaskAction,
}

#[derive(Subcommand, Debug)]
pub enum TaskAction {
    /// Register a task for the file's current stage
    Open {
        file_id: String,
        /// Stage the task belongs to
        #[arg(short, long)]
        stage: Stage,
        /// Task id in the task system
        task_id: String,
    },
    /// Report a finished task; may advance the file
    Complete {
        file_id: String,
        #[arg(short, long)]
        stage: Stage,
        task_id: String,
        #[command(flatten)]
        actor: ActorArgs,
    },
}

pub fn run(args: TaskArgs, config: &Config) -> Result<()> {
    let workflow = open_workflow(config)?;
    match args.action {
        TaskAction::Open {
            file_id,
            stage,
            task_id,
        } => {
            let file_id = FileId::new(file_id);
            workflow
                .lifecycle()
                .register_task(&file_id, stage, &task_id)
                .map_err(explain)?;
            eprintln!("Task {task_id} opened for {file_id} at {stage}.");
        }
        TaskAction::Complete {
            file_id,
            stage,
            task_id,
            actor,
        } => {
            let event = TaskCompleted {
                file_id: FileId::new(file_id),
                stage,
                task_id,
                actor: actor.actor(),
            };
            let progress = workflow
                .lifecycle()
                .on_task_completed(&event)
                .map_err(explain)?;
            match progress {
                AutoProgress::Advanced { from, to } => {
                    eprintln!("{} moved from {from} to {to}.", event.file_id)
                }
                AutoProgress::AwaitingPromotion => {
                    eprintln!("{} is {stage}; waiting for promotion to QC.", event.file_id)
                }
                AutoProgress::TasksOutstanding { open } => {
                    eprintln!("{open} {stage} task(s) still open for {}.", event.file_id)
                }
                AutoProgress::Stale { current } => {
                    eprintln!("Ignored: {} is already at {current}.", event.file_id)
                }
            }
        }
    }
    Ok(())
}
