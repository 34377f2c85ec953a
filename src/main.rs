mod cli;
mod config;
mod error;
mod filter;
mod fs_util;
mod sync;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use colored::Colorize;
use config::Config;
use filter::RootedFilter;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync::coordinator::{SyncCoordinator, SyncSession};
use sync::mirror::{recursive_copy, CopyObserver, IncludeAll, InclusionPredicate};
use sync::output::SyncEvent;
use sync::SyncStats;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    // Handle profile-only flags (print and exit)
    if cli.list_profiles {
        let profiles = config.list_profiles();
        if profiles.is_empty() {
            println!("No profiles configured");
            if let Ok(path) = Config::config_path() {
                println!("\nCreate profiles in: {}", path.display());
            }
        } else {
            println!("Available profiles:");
            for name in profiles {
                println!("  {}", name);
            }
        }
        return Ok(());
    }

    if let Some(ref profile_name) = cli.show_profile {
        match config.show_profile(profile_name) {
            Some(output) => {
                println!("{}", output);
                return Ok(());
            }
            None => {
                anyhow::bail!("Profile '{}' not found", profile_name);
            }
        }
    }

    if let Some(ref profile_name) = cli.profile {
        let profile = config
            .get_profile(profile_name)
            .ok_or_else(|| anyhow::anyhow!("Profile '{}' not found", profile_name))?
            .clone();
        cli.merge_profile(&profile);
    }

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().as_str()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    cli.validate()?;
    let (source, destination) = cli.resolved_paths()?;

    let rules = cli.build_filter()?;
    let predicate: Arc<dyn InclusionPredicate> = if rules.is_empty() {
        Arc::new(IncludeAll)
    } else {
        tracing::debug!("Using {} filter rules", rules.rule_count());
        Arc::new(RootedFilter::new(&source, rules))
    };

    let quiet = cli.quiet || cli.json;
    if !quiet {
        println!("mirrorwatch v{}", env!("CARGO_PKG_VERSION"));
        println!("Mirroring {} → {}", source.display(), destination.display());
        if !cli.once {
            println!("Watching for changes (Ctrl-C to stop)\n");
        }
    }
    if cli.json {
        SyncEvent::Start {
            source: source.clone(),
            destination: destination.clone(),
            watch: !cli.once,
        }
        .emit();
    }

    let started = Instant::now();
    let result = if cli.once {
        mirror_once(&source, &destination, predicate, &cli).await
    } else {
        mirror_and_watch(&source, &destination, predicate, &cli).await
    };

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            if cli.json {
                SyncEvent::Error {
                    error: format!("{:#}", e),
                }
                .emit();
            }
            return Err(e);
        }
    };

    let duration = started.elapsed();
    if cli.json {
        SyncEvent::Summary {
            files_copied: stats.files_copied,
            files_deleted: stats.files_deleted,
            trees_deleted: stats.trees_deleted,
            events_handled: stats.events_handled,
            events_ignored: stats.events_ignored,
            duration_secs: duration.as_secs_f64(),
        }
        .emit();
    } else if !cli.quiet {
        print_summary(&stats, duration, cli.once);
    }

    Ok(())
}

async fn mirror_once(
    source: &Path,
    destination: &Path,
    predicate: Arc<dyn InclusionPredicate>,
    cli: &Cli,
) -> Result<SyncStats> {
    let progress = progress_bar(cli.quiet || cli.json);
    let copied = Arc::new(AtomicUsize::new(0));
    let observer = copy_observer(progress.clone(), copied.clone(), cli.json);

    recursive_copy(source, destination, predicate.as_ref(), observer.as_ref()).await?;
    progress.finish_and_clear();

    Ok(SyncStats {
        files_copied: copied.load(Ordering::Relaxed),
        ..SyncStats::default()
    })
}

async fn mirror_and_watch(
    source: &Path,
    destination: &Path,
    predicate: Arc<dyn InclusionPredicate>,
    cli: &Cli,
) -> Result<SyncStats> {
    let progress = progress_bar(cli.quiet || cli.json);
    let copied = Arc::new(AtomicUsize::new(0));
    let observer = copy_observer(progress.clone(), copied, cli.json);

    let session = SyncSession::new(source, destination, predicate)?;
    let mut coordinator = SyncCoordinator::start(session)
        .await?
        .with_observer(observer)
        .with_json_output(cli.json);

    let result = tokio::select! {
        result = coordinator.run() => result,
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            signal.map_err(error::SyncError::from)
        }
    };

    coordinator.shutdown();
    progress.finish_and_clear();
    result?;

    Ok(coordinator.stats().clone())
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {pos} files copied {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn copy_observer(
    progress: ProgressBar,
    copied: Arc<AtomicUsize>,
    json: bool,
) -> Arc<dyn CopyObserver> {
    Arc::new(move |source: &Path, destination: &Path| {
        copied.fetch_add(1, Ordering::Relaxed);
        if json {
            SyncEvent::Copy {
                source: PathBuf::from(source),
                destination: PathBuf::from(destination),
            }
            .emit();
        } else {
            progress.inc(1);
            progress.set_message(destination.display().to_string());
        }
    })
}

fn print_summary(stats: &SyncStats, duration: Duration, once: bool) {
    if once {
        println!("\n{}\n", "✓ Mirror complete".green().bold());
    } else {
        println!("\n{}\n", "✓ Stopped watching".green().bold());
    }

    if stats.files_copied > 0 {
        println!("  Files copied:      {}", stats.files_copied.to_string().green());
    } else {
        println!("  Files copied:      {}", stats.files_copied.to_string().bright_black());
    }

    if !once {
        if stats.files_deleted > 0 {
            println!("  Files deleted:     {}", stats.files_deleted.to_string().red());
        } else {
            println!("  Files deleted:     {}", stats.files_deleted.to_string().bright_black());
        }
        if stats.trees_deleted > 0 {
            println!("  Trees deleted:     {}", stats.trees_deleted.to_string().red());
        }
        println!("  Events handled:    {}", stats.events_handled.to_string().blue());
        if stats.events_ignored > 0 {
            println!("  Events ignored:    {}", stats.events_ignored.to_string().yellow());
        }
    }

    println!();
    println!("  Duration:          {}", format_duration(duration).cyan());
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        if mins >= 60 {
            let hours = mins / 60;
            let mins = mins % 60;
            format!("{}h {}m {}s", hours, mins, secs)
        } else {
            format!("{}m {}s", mins, secs)
        }
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
