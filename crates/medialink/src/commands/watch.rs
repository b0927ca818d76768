//! `medialink watch`: stream connection state and server notifications.

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use medialink_core::{ConnectionState, Endpoint, Engine, Event, Origin};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Line<'a> {
    State { state: String },
    Event(&'a Event),
}

fn render(line: &Line<'_>) -> String {
    match line {
        Line::State { state } => format!("-- {state}"),
        Line::Event(event) => describe(event),
    }
}

fn describe(event: &Event) -> String {
    let subject = event
        .media_key()
        .as_ref()
        .map(ToString::to_string)
        .or_else(|| event.player_id.map(|id| format!("player {id}")))
        .or_else(|| event.library.map(|library| format!("{library} library")))
        .unwrap_or_default();
    let origin = if event.origin == Origin::SelfOrigin {
        " (ours)"
    } else {
        ""
    };
    format!(
        "{} {:<16} {:<28} {subject}{origin}",
        event.received_at.format("%H:%M:%S%.3f"),
        event.kind,
        event.method,
    )
}

pub async fn handle(
    engine: &Engine,
    endpoint: Endpoint,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut states = engine.subscribe_state();
    let mut events = engine.subscribe_events();
    engine.connect(endpoint).await?;

    let stop = async {
        match args.duration {
            Some(duration) => tokio::time::sleep_until(Instant::now() + duration).await,
            None => std::future::pending().await,
        }
    };
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(stop, ctrl_c);

    let emit = |line: &Line<'_>| -> Result<(), CliError> {
        let out = output::render_line(global.output, line, render)?;
        output::print_output(&out, global.quiet);
        Ok(())
    };

    let result = loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => break Ok(()),
            () = &mut stop => break Ok(()),
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state: ConnectionState = *states.borrow_and_update();
                if let Err(e) = emit(&Line::State { state: state.to_string() }) {
                    break Err(e);
                }
            }
            received = events.recv() => match received {
                Ok(event) => {
                    if let Err(e) = emit(&Line::Event(&event)) {
                        break Err(e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind, notifications dropped");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    engine.disconnect().await;
    result
}
