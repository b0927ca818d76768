//! `medialink status`: connect, sync, and summarize the mirror.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use medialink_core::{Endpoint, Engine, MediaScope, Segment, StoreChange};

use crate::cli::{GlobalOpts, OutputFormat, StatusArgs};
use crate::error::CliError;
use crate::output;

use super::util::{self, SegmentRow};

#[derive(Debug, Serialize)]
struct StatusReport {
    identity: String,
    state: String,
    synced: bool,
    segments: Vec<SegmentRow>,
}

fn detail(report: &StatusReport) -> String {
    let mut out = format!("{}  {}", report.identity, report.state);
    if !report.synced {
        out.push_str("  (not fully synced, showing cached data)");
    }
    let table = output::render_list(
        OutputFormat::Table,
        &report.segments,
        SegmentRow::clone,
        |row| row.segment.clone(),
    )
    .unwrap_or_default();
    let _ = write!(out, "\n{table}");
    out
}

pub async fn handle(
    engine: &Engine,
    endpoint: Endpoint,
    args: StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let host = endpoint.host.clone();
    let identity = endpoint.identity();
    let scope = endpoint.scope;

    engine.connect(endpoint).await?;
    let synced = sync(engine, scope, args.wait).await;
    let report = StatusReport {
        identity,
        state: engine.state().to_string(),
        synced,
        segments: util::live_segments(engine.mirror(), scope),
    };
    engine.disconnect().await;

    let out = output::render_single(global.output, &report, detail, |r| r.state.clone())?;
    output::print_output(&out, global.quiet);

    if synced {
        Ok(())
    } else {
        Err(CliError::NotReady {
            host,
            waited: humantime::format_duration(args.wait).to_string(),
        })
    }
}

/// Wait for `Ready`, then until every in-scope segment has been refreshed
/// from the server at least once.
async fn sync(engine: &Engine, scope: MediaScope, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    let mut changes = engine.mirror().changes();
    if engine.ready(wait).await.is_err() {
        return false;
    }

    let mut outstanding: BTreeSet<Segment> = Segment::all_in_scope(scope).collect();
    while !outstanding.is_empty() {
        match tokio::time::timeout_at(deadline, changes.recv()).await {
            Ok(Ok(StoreChange::Segment(segment))) => {
                outstanding.remove(&segment);
            }
            Ok(Ok(_)) => {}
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::debug!(skipped, "status missed store changes");
            }
            Ok(Err(RecvError::Closed)) | Err(_) => return false,
        }
    }
    true
}
