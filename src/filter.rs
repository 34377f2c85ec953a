use crate::fs_util::NodeKind;
use crate::sync::mirror::InclusionPredicate;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Filter rule action
#[derive(Debug, Clone, PartialEq)]
pub enum FilterAction {
    Include,
    Exclude,
}

/// A single filter rule
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub action: FilterAction,
    /// Compiled glob pattern
    pub pattern: glob::Pattern,
    /// Original pattern string (for debugging)
    pub pattern_str: String,
    /// Whether pattern contains '/' (match the whole relative path)
    pub has_slash: bool,
    /// Whether pattern ends with '/' (directories only)
    pub is_dir_only: bool,
}

impl FilterRule {
    pub fn new(action: FilterAction, pattern: &str) -> Result<Self> {
        let pattern_str = pattern.to_string();
        let is_dir_only = pattern.ends_with('/');
        let pattern_for_glob = pattern.trim_end_matches('/');

        if pattern_for_glob.is_empty() {
            anyhow::bail!("Empty filter pattern");
        }

        let has_slash = pattern_for_glob.contains('/');
        let pattern = glob::Pattern::new(pattern_for_glob)
            .with_context(|| format!("Invalid filter pattern: {}", pattern))?;

        Ok(Self {
            action,
            pattern,
            pattern_str,
            has_slash,
            is_dir_only,
        })
    }

    /// Check if this rule matches a path relative to the source root
    ///
    /// rsync-style:
    /// - Trailing '/' only matches directories
    /// - A pattern containing '/' matches the full relative path
    /// - Otherwise the basename is matched
    ///
    /// Directory contents need no special case: a rejected directory is
    /// never descended into.
    pub fn matches(&self, relative: &Path, kind: NodeKind) -> bool {
        if self.is_dir_only && kind != NodeKind::Directory {
            return false;
        }

        if self.has_slash {
            relative
                .to_str()
                .is_some_and(|path_str| self.pattern.matches(path_str))
        } else {
            relative
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|basename| self.pattern.matches(basename))
        }
    }
}

/// Ordered include/exclude rules, first match wins, default include
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    rules: Vec<FilterRule>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a filter rule from rsync-style syntax
    ///
    /// - "+ pattern" - Include rule
    /// - "- pattern" - Exclude rule
    /// - "pattern" - Defaults to exclude
    pub fn add_rule(&mut self, rule: &str) -> Result<()> {
        let rule = rule.trim();

        if rule.is_empty() || rule.starts_with('#') {
            return Ok(());
        }

        let (action, pattern) = if let Some(pattern) = rule.strip_prefix('+') {
            (FilterAction::Include, pattern.trim())
        } else if let Some(pattern) = rule.strip_prefix('-') {
            (FilterAction::Exclude, pattern.trim())
        } else {
            (FilterAction::Exclude, rule)
        };

        let rule = FilterRule::new(action, pattern)?;
        self.rules.push(rule);
        Ok(())
    }

    pub fn add_include(&mut self, pattern: &str) -> Result<()> {
        let rule = FilterRule::new(FilterAction::Include, pattern)?;
        self.rules.push(rule);
        Ok(())
    }

    pub fn add_exclude(&mut self, pattern: &str) -> Result<()> {
        let rule = FilterRule::new(FilterAction::Exclude, pattern)?;
        self.rules.push(rule);
        Ok(())
    }

    /// Load filter rules from a file, one rule per line
    pub fn add_rules_from_file(&mut self, file_path: &Path) -> Result<()> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open filter file: {}", file_path.display()))?;

        let reader = BufReader::new(file);

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.with_context(|| {
                format!("Failed to read line {} from {}", line_num + 1, file_path.display())
            })?;

            self.add_rule(&line).with_context(|| {
                format!("Invalid rule at line {} in {}", line_num + 1, file_path.display())
            })?;
        }

        Ok(())
    }

    /// Whether an entry at `relative` (relative to the source root) is mirrored
    pub fn should_include(&self, relative: &Path, kind: NodeKind) -> bool {
        match self.rules.iter().find(|rule| rule.matches(relative, kind)) {
            Some(rule) => {
                tracing::trace!("{} matched rule {}", relative.display(), rule.pattern_str);
                rule.action == FilterAction::Include
            }
            None => true,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Filter rules anchored at a source root, usable as an inclusion predicate
#[derive(Debug, Clone)]
pub struct RootedFilter {
    root: PathBuf,
    engine: FilterEngine,
}

impl RootedFilter {
    pub fn new(root: impl Into<PathBuf>, engine: FilterEngine) -> Self {
        Self {
            root: root.into(),
            engine,
        }
    }
}

impl InclusionPredicate for RootedFilter {
    fn includes(&self, path: &Path, kind: NodeKind) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => true,
            Ok(relative) => self.engine.should_include(relative, kind),
            Err(_) => self.engine.should_include(path, kind),
        }
    }
}
