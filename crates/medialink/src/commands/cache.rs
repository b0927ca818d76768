//! `medialink cache`: inspect or clear the on-disk snapshot without
//! connecting to a server.

use std::sync::Arc;

use medialink_config::Config;
use medialink_core::{FileSnapshotStore, SnapshotCache};

use crate::cli::{CacheArgs, CacheCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util::{self, SegmentRow};

pub async fn handle(args: CacheArgs, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    let dir = config::snapshot_dir(cfg);

    match args.command {
        CacheCommand::Path => {
            output::print_output(&dir.display().to_string(), global.quiet);
            Ok(())
        }

        CacheCommand::Show => {
            let identity = config::resolve_identity(global, cfg)?;
            let cache = SnapshotCache::new(Arc::new(FileSnapshotStore::new(dir)));
            let Some(snapshot) = cache.load(&identity).await else {
                if !global.quiet {
                    eprintln!("No snapshot for {identity}");
                }
                return Ok(());
            };
            let rows = util::snapshot_segments(&snapshot);
            let out = output::render_list(global.output, &rows, SegmentRow::clone, |r| {
                format!("{}\t{}", r.segment, r.items)
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        CacheCommand::Clear => {
            let identity = config::resolve_identity(global, cfg)?;
            let cache = SnapshotCache::new(Arc::new(FileSnapshotStore::new(dir)));
            cache.clear(&identity).await?;
            if !global.quiet {
                eprintln!("Snapshot for {identity} cleared");
            }
            Ok(())
        }
    }
}
