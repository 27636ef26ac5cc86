//! Per-host outcomes and their aggregation over one run

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// The single label assigned to a host at the end of a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HostOutcome {
    /// No difference, or the change fixed a broken compilation.
    Noop,

    /// Differences restricted to non-core resources.
    Diff,

    /// Differences touching at least one core resource.
    CoreDiff,

    /// The change breaks compilation.
    Error,

    /// Both compilations failed, or the diff step errored.
    Fail,

    /// The host was not processed because the run was aborted.
    Cancelled,
}

impl HostOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostOutcome::Noop => "noop",
            HostOutcome::Diff => "diff",
            HostOutcome::CoreDiff => "core_diff",
            HostOutcome::Error => "error",
            HostOutcome::Fail => "fail",
            HostOutcome::Cancelled => "cancelled",
        }
    }

    /// Upper-case label used in summary lines.
    pub fn label(&self) -> &'static str {
        match self {
            HostOutcome::Noop => "NOOP",
            HostOutcome::Diff => "DIFF",
            HostOutcome::CoreDiff => "CORE_DIFF",
            HostOutcome::Error => "ERROR",
            HostOutcome::Fail => "FAIL",
            HostOutcome::Cancelled => "CANCELLED",
        }
    }

    /// Long description used in the build summary.
    pub fn description(&self) -> &'static str {
        match self {
            HostOutcome::Noop => "No difference or change fixed compilation",
            HostOutcome::Diff => "Differences to Puppet defined resources",
            HostOutcome::CoreDiff => "Differences to core resources",
            HostOutcome::Error => "Failed to compile when change is applied",
            HostOutcome::Fail => "Both catalogs failed to compile or diff errored",
            HostOutcome::Cancelled => "Not run due to --fail-fast",
        }
    }

    /// Short phrase shown on the host page.
    pub fn short_description(&self) -> &'static str {
        match self {
            HostOutcome::Noop => "no change",
            HostOutcome::Diff => "changes detected",
            HostOutcome::CoreDiff => "changes to core resources detected",
            HostOutcome::Error => "change fails",
            HostOutcome::Fail => "compiler failure",
            HostOutcome::Cancelled => "not run",
        }
    }

    /// Outcomes that mark the whole run as failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, HostOutcome::Error | HostOutcome::Fail)
    }

    /// All outcomes except `Cancelled` are final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HostOutcome::Cancelled)
    }
}

impl std::fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one run, threaded through the reporter instead of globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub change_id: u64,
    pub job_id: u64,
    pub puppet_version: String,
}

/// The raw result of one host worker, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResult {
    pub hostname: String,

    /// True when the base compilation failed.
    pub base_error: bool,

    /// True when the change compilation failed.
    pub change_error: bool,

    /// `None` for no differences (or when a compile failed), `Some(true)`
    /// for differences present, `Some(false)` when the diff step errored.
    pub has_diff: Option<bool>,

    /// True when the differences touch a core resource.
    pub has_core_diff: bool,

    /// True when the worker was cancelled before finishing.
    pub cancelled: bool,
}

impl HostResult {
    pub fn new(
        hostname: impl Into<String>,
        base_error: bool,
        change_error: bool,
        has_diff: Option<bool>,
        has_core_diff: bool,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            base_error,
            change_error,
            has_diff,
            has_core_diff,
            cancelled: false,
        }
    }

    /// Result for a host whose worker never ran, or was aborted.
    pub fn cancelled(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            base_error: false,
            change_error: false,
            has_diff: None,
            has_core_diff: false,
            cancelled: true,
        }
    }

    /// Result for a host with no facts artifact: both sides count as failed.
    pub fn missing_facts(hostname: impl Into<String>) -> Self {
        Self::new(hostname, true, true, None, false)
    }

    /// Result for a worker that raised an unexpected error.
    pub fn unexpected_failure(hostname: impl Into<String>) -> Self {
        // Classified like a double compile failure.
        Self::new(hostname, true, true, None, false)
    }

    /// Classify this result into exactly one outcome label.
    pub fn outcome(&self) -> HostOutcome {
        if self.cancelled {
            return HostOutcome::Cancelled;
        }
        if self.base_error {
            if self.change_error {
                HostOutcome::Fail
            } else {
                // The change fixed a broken compilation.
                HostOutcome::Noop
            }
        } else if self.change_error {
            HostOutcome::Error
        } else {
            match self.has_diff {
                None => HostOutcome::Noop,
                Some(false) => HostOutcome::Fail,
                Some(true) => {
                    if self.has_core_diff {
                        HostOutcome::CoreDiff
                    } else {
                        HostOutcome::Diff
                    }
                }
            }
        }
    }
}

/// The state of every host of a run: each host sits in exactly one outcome
/// bucket at any observation. Hosts start in the `Cancelled` bucket (rendered
/// as RUNNING in partial summaries) and move to a terminal bucket exactly
/// once.
#[derive(Debug, Clone, Default)]
pub struct StatesCollection {
    states: BTreeMap<HostOutcome, BTreeSet<String>>,
}

impl StatesCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the collection with all hosts of the run in the not-yet-finished
    /// bucket.
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collection = Self::new();
        collection
            .states
            .entry(HostOutcome::Cancelled)
            .or_default()
            .extend(hosts.into_iter().map(Into::into));
        collection
    }

    /// Record the outcome of one host. A terminal outcome is never
    /// overwritten; a host may only leave the `Cancelled` bucket.
    pub fn add(&mut self, hostname: &str, outcome: HostOutcome) {
        if let Some(current) = self.outcome_of(hostname) {
            if current.is_terminal() {
                return;
            }
            if let Some(bucket) = self.states.get_mut(&HostOutcome::Cancelled) {
                bucket.remove(hostname);
            }
        }
        self.states
            .entry(outcome)
            .or_default()
            .insert(hostname.to_string());
    }

    /// Record a host result.
    pub fn add_result(&mut self, result: &HostResult) {
        self.add(&result.hostname, result.outcome());
    }

    pub fn outcome_of(&self, hostname: &str) -> Option<HostOutcome> {
        self.states
            .iter()
            .find(|(_, hosts)| hosts.contains(hostname))
            .map(|(outcome, _)| *outcome)
    }

    pub fn get(&self, outcome: HostOutcome) -> Option<&BTreeSet<String>> {
        self.states.get(&outcome).filter(|hosts| !hosts.is_empty())
    }

    /// Non-empty buckets in outcome order.
    pub fn iter(&self) -> impl Iterator<Item = (HostOutcome, &BTreeSet<String>)> {
        self.states
            .iter()
            .filter(|(_, hosts)| !hosts.is_empty())
            .map(|(outcome, hosts)| (*outcome, hosts))
    }

    /// All hosts across all buckets.
    pub fn hosts(&self) -> BTreeSet<String> {
        self.states.values().flatten().cloned().collect()
    }

    /// True when any host ended in `error` or `fail`.
    pub fn run_failed(&self) -> bool {
        self.iter().any(|(outcome, _)| outcome.is_failure())
    }

    /// One-line summary. With `partial` the not-yet-finished bucket is
    /// labelled RUNNING instead of CANCELLED.
    pub fn summary(&self, partial: bool) -> String {
        let parts: Vec<String> = self
            .iter()
            .map(|(outcome, hosts)| {
                let label = if partial && outcome == HostOutcome::Cancelled {
                    "RUNNING"
                } else {
                    outcome.label()
                };
                format!("{} {}", hosts.len(), label)
            })
            .collect();
        format!("Nodes: {}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_derivation_is_total_and_unambiguous() {
        for base_error in [false, true] {
            for change_error in [false, true] {
                for has_diff in [None, Some(false), Some(true)] {
                    for has_core_diff in [false, true] {
                        for cancelled in [false, true] {
                            let mut result = HostResult::new(
                                "h1",
                                base_error,
                                change_error,
                                has_diff,
                                has_core_diff,
                            );
                            result.cancelled = cancelled;
                            let outcome = result.outcome();

                            if cancelled {
                                assert_eq!(outcome, HostOutcome::Cancelled);
                            } else if base_error && change_error {
                                assert_eq!(outcome, HostOutcome::Fail);
                            } else if base_error {
                                assert_eq!(outcome, HostOutcome::Noop);
                            } else if change_error {
                                assert_eq!(outcome, HostOutcome::Error);
                            } else {
                                match has_diff {
                                    None => assert_eq!(outcome, HostOutcome::Noop),
                                    Some(false) => assert_eq!(outcome, HostOutcome::Fail),
                                    Some(true) if has_core_diff => {
                                        assert_eq!(outcome, HostOutcome::CoreDiff)
                                    }
                                    Some(true) => assert_eq!(outcome, HostOutcome::Diff),
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn every_seeded_host_is_in_exactly_one_bucket() {
        let mut states = StatesCollection::with_hosts(["h1", "h2", "h3"]);
        states.add("h1", HostOutcome::Noop);
        states.add("h2", HostOutcome::Error);

        for host in ["h1", "h2", "h3"] {
            let buckets = states
                .iter()
                .filter(|(_, hosts)| hosts.contains(host))
                .count();
            assert_eq!(buckets, 1, "{host} must be in exactly one bucket");
        }
        assert_eq!(states.outcome_of("h3"), Some(HostOutcome::Cancelled));
    }

    #[test]
    fn terminal_outcomes_are_never_demoted() {
        let mut states = StatesCollection::with_hosts(["h1"]);
        states.add("h1", HostOutcome::Diff);
        states.add("h1", HostOutcome::Cancelled);
        assert_eq!(states.outcome_of("h1"), Some(HostOutcome::Diff));

        // Repeated identical adds are idempotent.
        states.add("h1", HostOutcome::Diff);
        assert_eq!(states.hosts().len(), 1);
    }

    #[test]
    fn summary_renders_counts_in_outcome_order() {
        let mut states = StatesCollection::new();
        states.add("h1", HostOutcome::Noop);
        states.add("h2", HostOutcome::Noop);
        states.add("h3", HostOutcome::Error);
        assert_eq!(states.summary(false), "Nodes: 2 NOOP 1 ERROR");
    }

    #[test]
    fn partial_summary_labels_pending_hosts_as_running() {
        let mut states = StatesCollection::with_hosts(["h1", "h2"]);
        states.add("h1", HostOutcome::Noop);
        assert_eq!(states.summary(true), "Nodes: 1 NOOP 1 RUNNING");
        assert_eq!(states.summary(false), "Nodes: 1 NOOP 1 CANCELLED");
    }

    #[test]
    fn run_failed_on_error_or_fail() {
        let mut states = StatesCollection::new();
        states.add("h1", HostOutcome::Noop);
        assert!(!states.run_failed());
        states.add("h2", HostOutcome::Error);
        assert!(states.run_failed());
    }

    #[test]
    fn missing_facts_classifies_as_fail() {
        assert_eq!(
            HostResult::missing_facts("h1").outcome(),
            HostOutcome::Fail
        );
    }

    #[test]
    fn fixed_compilation_classifies_as_noop() {
        let result = HostResult::new("h1", true, false, None, false);
        assert_eq!(result.outcome(), HostOutcome::Noop);
    }
}
