//! `medialink mark`: optimistic play-state changes.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use medialink_core::{
    Endpoint, Engine, LibraryItem, MediaKey, Mutation, MutationOutcome, StoreChange,
};

use crate::cli::{GlobalOpts, MarkAction, MarkArgs, MarkChange};
use crate::error::CliError;
use crate::output;

fn mutation(change: &MarkChange) -> Mutation {
    match (change.action, change.rating) {
        (Some(MarkAction::Played), _) => Mutation::MarkPlayed,
        (Some(MarkAction::Unplayed), _) => Mutation::MarkUnplayed,
        (Some(MarkAction::Toggle), _) => Mutation::TogglePlayed,
        (None, Some(rating)) => Mutation::SetRating(rating),
        (None, None) => Mutation::ClearResume,
    }
}

fn detail(item: &LibraryItem) -> String {
    let mut out = format!("{} {}", item.key(), item.label());
    if let Some(state) = item.play_state() {
        out.push_str(&format!(
            "\n  playcount  {}\n  rating     {}",
            state.playcount, state.user_rating
        ));
        if !state.last_played.is_empty() {
            out.push_str(&format!("\n  lastplayed {}", state.last_played));
        }
        if let Some(resume) = &state.resume {
            out.push_str(&format!("\n  resume     {:.0}s of {:.0}s", resume.position, resume.total));
        }
    }
    out
}

pub async fn handle(
    engine: &Engine,
    endpoint: Endpoint,
    args: MarkArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let host = endpoint.host.clone();
    engine.connect(endpoint).await?;
    let result = apply(engine, &host, &args, global).await;
    engine.disconnect().await;
    result
}

async fn apply(
    engine: &Engine,
    host: &str,
    args: &MarkArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let deadline = Instant::now() + args.wait;
    engine.ready(args.wait).await.map_err(|_| CliError::NotReady {
        host: host.to_owned(),
        waited: humantime::format_duration(args.wait).to_string(),
    })?;

    wait_for_item(engine, args.key, deadline).await?;

    let handle = engine.mutate(args.key, &mutation(&args.change))?;
    let outcome = handle.settled().await;
    tracing::info!(key = %args.key, %outcome, "write-back settled");

    match outcome {
        MutationOutcome::Applied | MutationOutcome::Superseded => {
            if let Some(item) = engine.mirror().item(&args.key) {
                let out = output::render_single(global.output, &*item, detail, |i| i.key().to_string())?;
                output::print_output(&out, global.quiet);
            }
            Ok(())
        }
        MutationOutcome::Reverted | MutationOutcome::Abandoned => Err(CliError::MutationFailed {
            key: args.key.to_string(),
            outcome: outcome.to_string(),
        }),
    }
}

/// Fetch `key` and wait until it is in the mirror.
async fn wait_for_item(engine: &Engine, key: MediaKey, deadline: Instant) -> Result<(), CliError> {
    let mut changes = engine.mirror().changes();
    engine.refresh(key.into())?;

    while engine.mirror().item(&key).is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining == Duration::ZERO {
            return Err(CliError::NotFound { key: key.to_string() });
        }
        match tokio::time::timeout(remaining, changes.recv()).await {
            Ok(Ok(StoreChange::Removed(removed))) if removed == key => {
                return Err(CliError::NotFound { key: key.to_string() });
            }
            Ok(Ok(_) | Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) | Err(_) => {
                return Err(CliError::NotFound { key: key.to_string() });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(action: Option<MarkAction>, rating: Option<u8>, clear_resume: bool) -> MarkChange {
        MarkChange {
            action,
            rating,
            clear_resume,
        }
    }

    #[test]
    fn flags_map_to_mutations() {
        assert!(matches!(
            mutation(&change(Some(MarkAction::Toggle), None, false)),
            Mutation::TogglePlayed
        ));
        assert!(matches!(
            mutation(&change(None, Some(7), false)),
            Mutation::SetRating(7)
        ));
        assert!(matches!(
            mutation(&change(None, None, true)),
            Mutation::ClearResume
        ));
    }
}
