use crate::config::Profile;
use crate::filter::FilterEngine;
use crate::fs_util::resolve_against;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mirrorwatch")]
#[command(about = "Mirror a directory tree and keep it in sync as it changes", long_about = None)]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Mirror once, then keep the copy up to date until Ctrl-C
    mirrorwatch /source /destination

    # One-shot mirror, no watching
    mirrorwatch /source /destination --once

    # Skip build output and logs
    mirrorwatch /source /destination --exclude target/ --exclude '*.log'

    # Only text files (directories must be included to be descended into)
    mirrorwatch /source /destination --include '*/' --include '*.txt' --exclude '*'

    # Machine-readable output
    mirrorwatch /source /destination --json

    # Saved settings
    mirrorwatch --profile docs

Filter rules are checked in this order, first match wins:
--filter, --filter-from, --include, --exclude. Unmatched paths are included.")]
pub struct Cli {
    /// Source directory
    /// Optional when using --profile
    pub source: Option<PathBuf>,

    /// Destination directory (created if missing)
    /// Optional when using --profile
    pub destination: Option<PathBuf>,

    /// Mirror once and exit instead of watching for changes
    #[arg(long)]
    pub once: bool,

    /// Exclude paths matching pattern (can be repeated)
    /// Examples: "*.log", "node_modules/", "build/*.o"
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Include paths matching pattern (can be repeated)
    #[arg(long)]
    pub include: Vec<String>,

    /// rsync-style filter rule: "+ PATTERN" or "- PATTERN" (can be repeated)
    #[arg(long, allow_hyphen_values = true)]
    pub filter: Vec<String>,

    /// Read filter rules from a file, one per line
    #[arg(long)]
    pub filter_from: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only show errors)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output JSON (newline-delimited JSON for scripting)
    #[arg(long)]
    pub json: bool,

    /// Config file with named profiles
    #[arg(long, env = "MIRRORWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use named profile from config file
    #[arg(long)]
    pub profile: Option<String>,

    /// List all available profiles
    #[arg(long)]
    pub list_profiles: bool,

    /// Show details of a specific profile
    #[arg(long)]
    pub show_profile: Option<String>,
}

impl Cli {
    /// Fill in settings the command line left unset from a profile
    pub fn merge_profile(&mut self, profile: &Profile) {
        if self.source.is_none() {
            self.source = profile.source.as_ref().map(PathBuf::from);
        }
        if self.destination.is_none() {
            self.destination = profile.destination.as_ref().map(PathBuf::from);
        }
        if self.exclude.is_empty() {
            if let Some(ref excludes) = profile.exclude {
                self.exclude = excludes.clone();
            }
        }
        if self.include.is_empty() {
            if let Some(ref includes) = profile.include {
                self.include = includes.clone();
            }
        }
        if self.filter_from.is_none() {
            self.filter_from = profile.filter_from.clone();
        }
        if !self.once {
            self.once = profile.once.unwrap_or(false);
        }
        if !self.json {
            self.json = profile.json.unwrap_or(false);
        }
        if !self.quiet {
            self.quiet = profile.quiet.unwrap_or(false);
        }
        if self.verbose == 0 {
            self.verbose = profile.verbose.unwrap_or(0);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // --list-profiles and --show-profile don't need source/destination
        if self.list_profiles || self.show_profile.is_some() {
            return Ok(());
        }

        if self.source.is_none() || self.destination.is_none() {
            anyhow::bail!("Source and destination are required (or use --profile)");
        }

        let (source, destination) = self.resolved_paths()?;
        if !source.exists() {
            anyhow::bail!("Source path does not exist: {}", source.display());
        }
        if !source.is_dir() {
            anyhow::bail!("Source must be a directory: {}", source.display());
        }
        if destination.starts_with(&source) {
            anyhow::bail!(
                "Destination {} is inside source {}; it would mirror into itself",
                destination.display(),
                source.display()
            );
        }

        Ok(())
    }

    /// Source and destination as absolute, normalized paths
    pub fn resolved_paths(&self) -> anyhow::Result<(PathBuf, PathBuf)> {
        let cwd = std::env::current_dir().context("Failed to read the current directory")?;
        let source = self
            .source
            .as_deref()
            .context("Source path is required")?;
        let destination = self
            .destination
            .as_deref()
            .context("Destination path is required")?;
        Ok((
            resolve_against(&cwd, source)?,
            resolve_against(&cwd, destination)?,
        ))
    }

    /// Build the filter rules in precedence order
    pub fn build_filter(&self) -> anyhow::Result<FilterEngine> {
        let mut filter = FilterEngine::new();
        for rule in &self.filter {
            filter.add_rule(rule)?;
        }
        if let Some(ref path) = self.filter_from {
            filter.add_rules_from_file(path)?;
        }
        for pattern in &self.include {
            filter.add_include(pattern)?;
        }
        for pattern in &self.exclude {
            filter.add_exclude(pattern)?;
        }
        Ok(filter)
    }

    pub fn log_level(&self) -> tracing::Level {
        if self.quiet || self.json {
            return tracing::Level::ERROR;
        }

        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
