//! The local fact store
//!
//! Facts live as one YAML file per host somewhere under `<vardir>/yaml`.
//! The lookup is recursive; when several files match, the most recently
//! modified one wins.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::Result;

static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\s+"_timestamp":) .*"#).unwrap());
static EXPIRATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\s+expiration:) .*").unwrap());

const FACTS_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f +00:00";

/// Find the facts file for a host. Returns `None` when the host is unknown.
pub fn facts_file(vardir: &Path, hostname: &str) -> Option<PathBuf> {
    let wanted = format!("{hostname}.yaml");
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in WalkDir::new(vardir.join("yaml"))
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        if entry.file_name().to_str() == Some(wanted.as_str()) {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if best.as_ref().is_none_or(|(time, _)| modified > *time) {
                best = Some((modified, entry.into_path()));
            }
        }
    }
    best.map(|(_, path)| path)
}

/// All hosts known to the local fact store, sorted.
pub fn known_hosts(vardir: &Path) -> Vec<String> {
    let mut hosts: Vec<String> = WalkDir::new(vardir.join("yaml").join("facts"))
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(".yaml"))
                .map(String::from)
        })
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

/// Refresh the cache timestamp and expiration of a facts file so the
/// compiler does not discard it as stale. The file contains serialized
/// runtime structures, so this is a line-level rewrite, not a YAML load.
pub fn refresh_facts_timestamps(facts_path: &Path) -> Result<()> {
    let now = Utc::now();
    let expiration = now + Duration::days(1);
    let ts_sub = format!("$1 {}", now.format(FACTS_DATE_FORMAT));
    let exp_sub = format!("$1 {}", expiration.format(FACTS_DATE_FORMAT));

    let original = std::fs::read_to_string(facts_path)?;
    let mut patched = String::with_capacity(original.len());
    for line in original.lines() {
        let line = TIMESTAMP_RE.replace(line, ts_sub.as_str());
        let line = EXPIRATION_RE.replace(&line, exp_sub.as_str());
        patched.push_str(&line);
        patched.push('\n');
    }

    let tmp_path = facts_path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, patched)?;
    std::fs::rename(&tmp_path, facts_path)?;
    Ok(())
}
