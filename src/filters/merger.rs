use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::app::Result;
use crate::domain::{DownloadedSubscription, Subscription};
use crate::filters::{is_filter_rule, to_allow_rule, to_block_rule};
use crate::store::CoreStore;

/// User-defined domains turned into rules during the merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomRules {
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub path: PathBuf,
    pub rules: usize,
    /// URLs of local-file subscriptions that could not be read.
    pub unreadable: Vec<String>,
}

/// Builds the consolidated rule file handed to the browser.
pub struct Merger {
    dir: PathBuf,
}

impl Merger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the deduplicated rules of every input to a fresh file, then swaps the
    /// store's pointer to it and removes the previous file.
    ///
    /// Rules keep first-seen order: local files, allowed domains, blocked domains,
    /// then downloaded lists in the order given.
    pub fn merge(
        &self,
        downloaded: &[DownloadedSubscription],
        local_files: &[Subscription],
        custom: &CustomRules,
        store: &dyn CoreStore,
    ) -> Result<MergeOutcome> {
        fs::create_dir_all(&self.dir)?;

        let mut rules = RuleSet::default();
        let mut unreadable = Vec::new();

        for subscription in local_files {
            let path = subscription.local_path();
            match File::open(&path).and_then(|f| rules.extend_from(BufReader::new(f))) {
                Ok(added) => {
                    debug!("Local file {}: {} rules", path.display(), added);
                }
                Err(e) => {
                    warn!("Cannot read local subscription {}: {}", path.display(), e);
                    unreadable.push(subscription.url.clone());
                }
            }
        }

        for domain in &custom.allowed_domains {
            rules.insert(to_allow_rule(domain));
        }
        for domain in &custom.blocked_domains {
            rules.insert(to_block_rule(domain));
        }

        for subscription in downloaded {
            let file = File::open(&subscription.path)?;
            let added = rules.extend_from(BufReader::new(file))?;
            debug!("Filter: {} - {}: rule size: {}", subscription.url, subscription.path.display(), added);
        }

        let temp = tempfile::Builder::new()
            .prefix("filter")
            .suffix(".txt")
            .tempfile_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            for rule in &rules.ordered {
                writer.write_all(rule.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        let (_, new_path) = temp.keep()?;

        let old_path = store.subscriptions_path()?;
        if let Err(e) = store.set_subscriptions_path(Some(&new_path)) {
            let _ = fs::remove_file(&new_path);
            return Err(e);
        }

        if let Some(old) = old_path.filter(|old| old != &new_path) {
            if let Err(e) = fs::remove_file(&old) {
                warn!("Could not delete previous filter file {}: {}", old.display(), e);
            }
        }

        info!(
            "filters file: {}, rules: {}",
            new_path.display(),
            rules.ordered.len()
        );

        Ok(MergeOutcome {
            path: new_path,
            rules: rules.ordered.len(),
            unreadable,
        })
    }

    /// Deletes files in the merge directory older than `keep`. Newer files belong
    /// to a merge that finished after this one and are left alone. Best-effort.
    pub fn clean_stale(&self, keep: &Path) {
        let Ok(kept_at) = fs::metadata(keep).and_then(|m| m.modified()) else {
            warn!("Current filter file {} is missing, skipping cleanup", keep.display());
            return;
        };
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path == keep {
                continue;
            }
            let newer = entry
                .metadata()
                .and_then(|m| m.modified())
                .is_ok_and(|at| at > kept_at);
            if newer {
                debug!("Keeping newer file: {}", path.display());
            } else {
                debug!("Removing old file: {}", path.display());
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Could not remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

#[derive(Default)]
struct RuleSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl RuleSet {
    fn insert(&mut self, rule: String) -> bool {
        if self.seen.contains(&rule) {
            return false;
        }
        self.seen.insert(rule.clone());
        self.ordered.push(rule);
        true
    }

    fn extend_from<R: BufRead>(&mut self, reader: R) -> std::io::Result<usize> {
        let mut added = 0;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if is_filter_rule(line) && self.insert(line.to_string()) {
                added += 1;
            }
        }
        Ok(added)
    }
}
