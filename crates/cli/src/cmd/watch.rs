//! Watch paths and print deliveries

use crate::bookmark::{Bookmark, BookmarkWriter};
use crate::output;
use crate::rescan;
use crate::settings::{CliSettings, OutputSettings};
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Args;
use fsstream_core::{CreateOption, FsEvent};
use fsstream_watcher::{Delivery, DispatchMode, WatchSettings};
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Paths to watch (default: current directory)
    pub paths: Vec<PathBuf>,

    /// Replay history after this event id
    #[arg(long, value_name = "ID")]
    pub since: Option<u64>,

    /// Minimum delay between batches, in milliseconds
    #[arg(long, value_name = "MS")]
    pub latency: Option<u64>,

    /// Stream option, repeatable (file-events, no-defer, watch-root, mark-self, ...)
    #[arg(long = "flag", value_name = "OPT")]
    pub flags: Vec<CreateOption>,

    /// Run the handler on the native source's thread
    #[arg(long)]
    pub inline: bool,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print JSON lines instead of colored text
    #[arg(long)]
    pub json: bool,

    /// Resume from and record the last event id in this file
    #[arg(long, value_name = "FILE")]
    pub bookmark: Option<PathBuf>,

    /// Walk directories flagged for rescanning and list changed files
    #[arg(long)]
    pub rescan: bool,
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let settings = match &args.config {
        Some(path) => CliSettings::load(path)?,
        None => CliSettings::default(),
    };
    let (mut watch, output) = merge(args, settings);

    if watch.paths.is_empty() {
        watch.paths.push(".".to_string());
    }
    watch.paths = watch
        .paths
        .iter()
        .map(|path| canonical(path))
        .collect::<Result<_>>()?;

    if watch.since.is_none() {
        if let Some(path) = &output.bookmark {
            if let Some(bookmark) = Bookmark::load(path)? {
                info!("Resuming after bookmarked event {}", bookmark.last_event_id);
                watch.since = Some(bookmark.last_event_id.get());
            }
        }
    }

    let config = watch.into_config();
    let (subscription, mut rx) =
        fsstream_watcher::subscribe(config).context("Failed to start watching")?;
    if !subscription.is_started() {
        bail!("The native event source refused to start");
    }

    eprintln!(
        "{} Watching {} ({})",
        "✓".green(),
        subscription.config().paths.join(", "),
        subscription.id()
    );

    let mut session = Session::new(output);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
            delivery = rx.recv() => {
                let Some(delivery) = delivery else {
                    warn!("Event channel closed");
                    break;
                };
                session.handle(delivery).await?;
                while let Ok(next) = rx.try_recv() {
                    session.handle(next).await?;
                }
                session.flush_bookmark()?;
            }
        }
    }

    session.finish()?;
    drop(subscription);
    Ok(())
}

/// Command-line values win over the settings file
fn merge(args: WatchArgs, settings: CliSettings) -> (WatchSettings, OutputSettings) {
    let CliSettings {
        mut watch,
        mut output,
    } = settings;

    if !args.paths.is_empty() {
        watch.paths = args
            .paths
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
    }
    if args.since.is_some() {
        watch.since = args.since;
    }
    if let Some(latency) = args.latency {
        watch.latency_ms = latency;
    }
    for flag in args.flags {
        if !watch.flags.contains(&flag) {
            watch.flags.push(flag);
        }
    }
    if args.inline {
        watch.dispatch = DispatchMode::Inline;
    }

    output.json |= args.json;
    output.rescan |= args.rescan;
    if args.bookmark.is_some() {
        output.bookmark = args.bookmark;
    }

    (watch, output)
}

fn canonical(path: &str) -> Result<String> {
    let resolved = std::fs::canonicalize(path).with_context(|| format!("Cannot watch {}", path))?;
    Ok(resolved.to_string_lossy().into_owned())
}

struct Session {
    output: OutputSettings,
    bookmark: Option<BookmarkWriter>,
    last_delivery: SystemTime,
}

impl Session {
    fn new(output: OutputSettings) -> Self {
        let bookmark = output.bookmark.clone().map(BookmarkWriter::new);
        Self {
            output,
            bookmark,
            last_delivery: SystemTime::now(),
        }
    }

    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        let now = Local::now();
        if self.output.json {
            println!("{}", output::render_json(&delivery, now)?);
        } else {
            println!("{}", output::render_line(&delivery, now));
        }

        if let FsEvent::MustScanSubdirs { path, .. } = &delivery.event {
            if self.output.rescan {
                self.rescan(path).await?;
            }
        }

        if let Some(writer) = self.bookmark.as_mut() {
            writer.observe(&delivery.event)?;
        }
        self.last_delivery = SystemTime::now();
        Ok(())
    }

    async fn rescan(&self, path: &str) -> Result<Vec<PathBuf>> {
        let changed = rescan::rescan(PathBuf::from(path), self.last_delivery).await?;
        if self.output.json {
            let paths: Vec<_> = changed.iter().map(|p| p.to_string_lossy()).collect();
            println!("{}", json!({ "rescan": path, "changed": paths }));
        } else {
            for file in &changed {
                println!("  {} {}", "rescan".yellow(), file.display());
            }
        }
        Ok(changed)
    }

    fn flush_bookmark(&mut self) -> Result<()> {
        match self.bookmark.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.flush_bookmark()?;
        if let Some(last) = self.bookmark.as_ref().and_then(BookmarkWriter::last) {
            info!("Bookmarked event {}", last);
        }
        Ok(())
    }
}
