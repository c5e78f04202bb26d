//! Session commands shared by the one-shot subcommands and the interactive loop

use crate::step_input::JsonStep;
use anyhow::Result;
use review_core::{NextOutcome, ReviewError, ReviewGateway, ReviewSession};
use std::sync::Arc;

pub type CliSession = ReviewSession<Arc<dyn ReviewGateway>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Status,
    /// Raw JSON step data, if any was given
    Next(Option<String>),
    Back,
    Jump(usize),
    Save,
    Complete,
    Cancel,
    Quit,
}

pub const HELP: &str = "commands: status, next <json>, back, jump <index>, save, complete, cancel, quit";

impl SessionCommand {
    /// Parse one line of interactive input
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_lowercase().as_str() {
            "status" | "s" => Ok(Self::Status),
            "next" | "n" => Ok(Self::Next((!rest.is_empty()).then(|| rest.to_string()))),
            "back" | "b" => Ok(Self::Back),
            "jump" | "j" => rest
                .parse()
                .map(Self::Jump)
                .map_err(|_| format!("jump needs a step index, got '{}'", rest)),
            "save" => Ok(Self::Save),
            "complete" => Ok(Self::Complete),
            "cancel" => Ok(Self::Cancel),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("unknown command '{}'; {}", other, HELP)),
        }
    }
}

fn step_label(session: &CliSession, index: usize) -> String {
    session
        .registry()
        .get(index)
        .map(|s| s.label.clone())
        .unwrap_or_else(|| format!("step {}", index))
}

/// Run one command against an initialized session
pub async fn execute(session: &mut CliSession, command: &SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Status | SessionCommand::Quit => {}
        SessionCommand::Next(raw) => {
            let step = JsonStep::parse(raw.as_deref())?;
            match session.next(&step).await? {
                NextOutcome::Advanced { from, to } => println!(
                    "Completed {}, now at {} ({})",
                    step_label(session, from),
                    to,
                    step_label(session, to)
                ),
                NextOutcome::CompletedLast { index } => {
                    println!("Completed {}; the review can be completed now", step_label(session, index))
                }
                NextOutcome::Unchanged { .. } => println!("This is the last step; use 'complete' to finish"),
            }
        }
        SessionCommand::Back => {
            let at = session.back()?;
            println!("At {} ({})", at, step_label(session, at));
        }
        SessionCommand::Jump(index) => {
            let at = session.jump_to(*index)?;
            if at != *index {
                println!("Cannot jump to {}; only completed steps and the next open one are reachable", index);
            }
            println!("At {} ({})", at, step_label(session, at));
        }
        SessionCommand::Save => {
            session.save().await?;
            println!("Saved");
        }
        SessionCommand::Complete => {
            let review = session.complete().await?;
            println!("Review {} completed", review.id);
        }
        SessionCommand::Cancel => {
            let review = session.cancel().await?;
            println!("Review {} cancelled", review.id);
        }
    }
    Ok(())
}

pub fn print_status(session: &CliSession) {
    let snapshot = session.snapshot();
    let Some(review) = snapshot.review.as_ref() else {
        println!("No review loaded (session {})", snapshot.phase);
        return;
    };

    println!("Review   {} ({})", review.id, review.status);
    println!("Patient  {}", review.patient_id);
    for step in session.registry().iter() {
        let cursor = if step.order == snapshot.current_step_index { ">" } else { " " };
        let done = if review.is_step_completed(&step.id) { "x" } else { " " };
        let required = if step.validation_required { "" } else { " (optional)" };
        println!(" {} [{}] {} {}{}", cursor, done, step.order, step.label, required);
    }
    println!(
        "Progress {:.1}%{}",
        snapshot.completion_percentage,
        if snapshot.can_complete { ", ready to complete" } else { "" }
    );
    if snapshot.dirty {
        println!("Unsaved changes");
    }
    if let Some(error) = snapshot.last_error.as_deref() {
        println!("Last error: {}", error);
    }
}

/// Local problems are the user's to fix; everything else is logged as a failure
pub fn report_error(error: &anyhow::Error) {
    match error.downcast_ref::<ReviewError>() {
        Some(e) if e.is_local() => eprintln!("! {}", e),
        _ => log::error!("{:#}", error),
    }
}
