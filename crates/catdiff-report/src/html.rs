//! HTML rendering of host pages and the run index

use minijinja::{Environment, context};
use serde::Serialize;

use catdiff_core::{CatalogDiff, HostOutcome, RunContext, StatesCollection};

use crate::error::Result;

const HOSTPAGE_TEMPLATE: &str = include_str!("templates/hostpage.html.jinja");
const FULLDIFF_TEMPLATE: &str = include_str!("templates/fulldiff.html.jinja");
const INDEX_TEMPLATE: &str = include_str!("templates/index.html.jinja");

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("hostpage.html", HOSTPAGE_TEMPLATE)?;
    env.add_template("fulldiff.html", FULLDIFF_TEMPLATE)?;
    env.add_template("index.html", INDEX_TEMPLATE)?;
    Ok(env)
}

/// Render the per-host page with the main (intersection) diff and, when
/// present, the core-resource diff.
pub fn render_host_page(
    ctx: &RunContext,
    hostname: &str,
    outcome: HostOutcome,
    diff: Option<&CatalogDiff>,
    core_diff: Option<&CatalogDiff>,
) -> Result<String> {
    let env = environment()?;
    let page = env.get_template("hostpage.html")?.render(context! {
        host => hostname,
        change_id => ctx.change_id,
        job_id => ctx.job_id,
        puppet_version => ctx.puppet_version,
        outcome => outcome.as_str(),
        desc => outcome.short_description(),
        diff_text => diff.map(CatalogDiff::format_text),
        core_diff_text => core_diff.map(CatalogDiff::format_text),
    })?;
    Ok(page)
}

/// Render the page holding the union diff of both catalogs.
pub fn render_full_diff_page(
    ctx: &RunContext,
    hostname: &str,
    full_diff: Option<&CatalogDiff>,
) -> Result<String> {
    let env = environment()?;
    let page = env.get_template("fulldiff.html")?.render(context! {
        host => hostname,
        change_id => ctx.change_id,
        job_id => ctx.job_id,
        full_diff_text => full_diff.map(CatalogDiff::format_text),
    })?;
    Ok(page)
}

#[derive(Serialize)]
struct IndexState {
    label: &'static str,
    description: &'static str,
    hosts: Vec<String>,
    linked: bool,
}

/// Render the run index. With `partial` the page self-refreshes and the
/// not-yet-finished hosts are shown as RUNNING without links.
pub fn render_index(
    ctx: &RunContext,
    states: &StatesCollection,
    partial: bool,
) -> Result<String> {
    let rows: Vec<IndexState> = states
        .iter()
        .map(|(outcome, hosts)| {
            let pending = outcome == HostOutcome::Cancelled;
            IndexState {
                label: if partial && pending {
                    "RUNNING"
                } else {
                    outcome.label()
                },
                description: if partial && pending {
                    "Still being compiled"
                } else {
                    outcome.description()
                },
                hosts: hosts.iter().cloned().collect(),
                // Pages exist only for finished hosts.
                linked: !pending,
            }
        })
        .collect();

    let env = environment()?;
    let page = env.get_template("index.html")?.render(context! {
        change_id => ctx.change_id,
        job_id => ctx.job_id,
        puppet_version => ctx.puppet_version,
        partial => partial,
        summary => states.summary(partial),
        states => rows,
    })?;
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_context() -> RunContext {
        RunContext {
            change_id: 4242,
            job_id: 17,
            puppet_version: "7.23.0".to_string(),
        }
    }

    #[test]
    fn host_page_shows_outcome_and_diff() {
        let page = render_host_page(
            &run_context(),
            "h1.example.org",
            HostOutcome::Diff,
            Some(&CatalogDiff {
                total: 3,
                only_in_self: Default::default(),
                only_in_other: Default::default(),
                resource_diffs: vec![],
                perc_changed: "33.33%".to_string(),
            }),
            None,
        )
        .unwrap();
        assert!(page.contains("h1.example.org"));
        assert!(page.contains("4242"));
        assert!(page.contains("changes detected"));
        assert!(page.contains("33.33%"));
        assert!(!page.contains("Core resource differences"));
    }

    #[test]
    fn host_page_shows_core_section_when_present() {
        let core = CatalogDiff {
            total: 1,
            only_in_self: Default::default(),
            only_in_other: ["Package[x]".to_string()].into(),
            resource_diffs: vec![],
            perc_changed: "100.00%".to_string(),
        };
        let page = render_host_page(
            &run_context(),
            "h1",
            HostOutcome::CoreDiff,
            None,
            Some(&core),
        )
        .unwrap();
        assert!(page.contains("Core resource differences"));
        assert!(page.contains("Package[x]"));
    }

    #[test]
    fn full_diff_page_without_diff_says_so() {
        let page = render_full_diff_page(&run_context(), "h1", None).unwrap();
        assert!(page.contains("No differences"));
    }

    #[test]
    fn index_links_finished_hosts_only() {
        let mut states = StatesCollection::with_hosts(["h1", "h2"]);
        states.add("h1", HostOutcome::Noop);

        let page = render_index(&run_context(), &states, true).unwrap();
        assert!(page.contains(r#"<a href="h1/index.html">h1</a>"#));
        assert!(!page.contains(r#"<a href="h2/index.html">"#));
        assert!(page.contains("RUNNING"));
        assert!(page.contains("http-equiv=\"refresh\""));

        let final_page = render_index(&run_context(), &states, false).unwrap();
        assert!(final_page.contains("CANCELLED"));
        assert!(!final_page.contains("http-equiv=\"refresh\""));
    }
}
