//! Machine-readable twins of the HTML pages

use std::collections::BTreeMap;

use serde::Serialize;

use catdiff_core::{CatalogDiff, HostOutcome, RunContext, StatesCollection};

use crate::error::Result;

#[derive(Serialize)]
struct HostReport<'a> {
    host: &'a str,
    outcome: HostOutcome,
    description: &'static str,
    change_id: u64,
    job_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    diff: Option<&'a CatalogDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    core_diff: Option<&'a CatalogDiff>,
}

/// Payload of `<host>/host.json`.
pub fn host_json(
    ctx: &RunContext,
    hostname: &str,
    outcome: HostOutcome,
    diff: Option<&CatalogDiff>,
    core_diff: Option<&CatalogDiff>,
) -> Result<String> {
    let report = HostReport {
        host: hostname,
        outcome,
        description: outcome.description(),
        change_id: ctx.change_id,
        job_id: ctx.job_id,
        diff,
        core_diff,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

#[derive(Serialize)]
struct BuildState {
    description: &'static str,
    hosts: Vec<String>,
}

#[derive(Serialize)]
struct Build {
    puppet_version: String,
    job_id: u64,
    change_id: u64,
    hosts: Vec<String>,
    states: BTreeMap<&'static str, BuildState>,
}

/// Payload of `<outdir>/build.json`. Hosts still being compiled can be
/// inferred by comparing the `hosts` list with the per-state host lists.
pub fn build_json(ctx: &RunContext, states: &StatesCollection) -> Result<String> {
    let build = Build {
        puppet_version: ctx.puppet_version.clone(),
        job_id: ctx.job_id,
        change_id: ctx.change_id,
        hosts: states.hosts().into_iter().collect(),
        states: states
            .iter()
            .map(|(outcome, hosts)| {
                (
                    outcome.as_str(),
                    BuildState {
                        description: outcome.description(),
                        hosts: hosts.iter().cloned().collect(),
                    },
                )
            })
            .collect(),
    };
    Ok(serde_json::to_string(&build)?)
}
