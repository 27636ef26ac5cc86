//! Structural diff between two catalogs
//!
//! Two set operations are supported: the intersection diff compares only
//! resources present on both sides (missing resources are recorded in the
//! `only_in_*` sets but not expanded), while the union diff also expands
//! missing resources against a shell so their full definition shows up.
//! Either can be restricted to core resources.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::TextDiff;

use crate::catalog::{Catalog, Content, Resource};

/// Resource types whose content changes get a unified line diff.
const CONTENT_DIFF_TYPES: &[&str] = &["File", "Concat_fragment"];

/// The diff of a single resource present on both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// The `Type[Title]` key of the resource.
    pub resource: String,

    /// Unified line diff of the content, when the type is file-like.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Two-sided parameter diff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
}

/// The structural diff between two catalogs. `None` at the call sites means
/// the catalogs agree on the compared resource set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDiff {
    /// Number of resources considered on the base side.
    pub total: usize,

    /// Keys present only in the base catalog.
    pub only_in_self: BTreeSet<String>,

    /// Keys present only in the other catalog.
    pub only_in_other: BTreeSet<String>,

    /// Per-resource diffs for shared keys (and, for union diffs, for
    /// resources missing on one side).
    pub resource_diffs: Vec<ResourceDiff>,

    /// Share of affected resources, formatted to two decimals. The
    /// denominator is the base catalog's resource count, so a change that
    /// adds many resources can exceed 100%.
    pub perc_changed: String,
}

impl CatalogDiff {
    /// Count of added, removed and changed resources.
    pub fn affected(&self) -> usize {
        self.resource_diffs.len() + self.only_in_self.len() + self.only_in_other.len()
    }

    /// Plain-text rendering used for the `.diff` artifact and the report
    /// pages.
    pub fn format_text(&self) -> String {
        let mut out = format!(
            "Resources: {} total, {} affected ({})\n",
            self.total,
            self.affected(),
            self.perc_changed
        );
        for key in &self.only_in_self {
            out.push_str(&format!("- {key} only in the base catalog\n"));
        }
        for key in &self.only_in_other {
            out.push_str(&format!("+ {key} only in the changed catalog\n"));
        }
        for diff in &self.resource_diffs {
            out.push_str(&format!("\n*** {} ***\n", diff.resource));
            if let Some(content) = &diff.content {
                out.push_str(content);
                if !content.ends_with('\n') {
                    out.push('\n');
                }
            }
            if let Some(parameters) = &diff.parameters {
                out.push_str(parameters);
            }
        }
        out
    }
}

impl Resource {
    /// Diff against another resource carrying the same key. Returns `None`
    /// when the definitions agree.
    pub fn diff_if_changed(&self, other: &Resource) -> Option<ResourceDiff> {
        if self.same_definition(other) {
            return None;
        }

        let mut diff = ResourceDiff {
            resource: self.key(),
            content: None,
            parameters: None,
        };

        if self.content != other.content
            && CONTENT_DIFF_TYPES.contains(&self.resource_type.as_str())
        {
            let mine = self
                .content
                .as_ref()
                .map(Content::diffable_text)
                .unwrap_or_default();
            let theirs = other
                .content
                .as_ref()
                .map(Content::diffable_text)
                .unwrap_or_default();
            let text_diff = TextDiff::from_lines(&mine, &theirs);
            let unified = text_diff
                .unified_diff()
                .context_radius(3)
                .header(&format!("{}.orig", self.title), &self.title)
                .to_string();
            diff.content = Some(unified);
        }

        if self.parameters != other.parameters {
            diff.parameters = Some(parameters_diff(
                &self.parameters,
                &other.parameters,
                &format!("{}.orig", self.key()),
                &self.key(),
            ));
        }

        Some(diff)
    }
}

impl Catalog {
    /// Diff over the keys present in both catalogs.
    pub fn diff_intersection(&self, other: &Catalog, core_only: bool) -> Option<CatalogDiff> {
        let mine = self.keys(core_only);
        let theirs = other.keys(core_only);

        let resource_diffs = mine
            .intersection(&theirs)
            .filter_map(|key| self.resources[*key].diff_if_changed(&other.resources[*key]))
            .collect();

        assemble(&mine, &theirs, resource_diffs)
    }

    /// Diff over the union of both key sets. A resource missing on one side
    /// is expanded against a shell carrying only type, title and the
    /// exported flag, so its definition appears in the diff.
    pub fn diff_union(&self, other: &Catalog, core_only: bool) -> Option<CatalogDiff> {
        let mine = self.keys(core_only);
        let theirs = other.keys(core_only);

        let resource_diffs = mine
            .union(&theirs)
            .filter_map(|key| {
                match (self.resources.get(*key), other.resources.get(*key)) {
                    (Some(a), Some(b)) => a.diff_if_changed(b),
                    (Some(a), None) => a.diff_if_changed(&a.shell()),
                    (None, Some(b)) => b.shell().diff_if_changed(b),
                    (None, None) => None,
                }
            })
            .collect();

        assemble(&mine, &theirs, resource_diffs)
    }
}

fn assemble(
    mine: &BTreeSet<&str>,
    theirs: &BTreeSet<&str>,
    resource_diffs: Vec<ResourceDiff>,
) -> Option<CatalogDiff> {
    let only_in_self: BTreeSet<String> = mine
        .difference(theirs)
        .map(|key| key.to_string())
        .collect();
    let only_in_other: BTreeSet<String> = theirs
        .difference(mine)
        .map(|key| key.to_string())
        .collect();

    let affected = resource_diffs.len() + only_in_self.len() + only_in_other.len();
    if affected == 0 {
        return None;
    }

    let total = mine.len();
    let perc_changed = format!("{:.2}%", 100.0 * affected as f64 / total.max(1) as f64);

    Some(CatalogDiff {
        total,
        only_in_self,
        only_in_other,
        resource_diffs,
        perc_changed,
    })
}

/// Two-sided parameter diff: parameters only in the old definition, only in
/// the new one, and modified ones. The arrows are column-aligned to the
/// longest parameter name, the way the compiler prints resources.
fn parameters_diff(
    orig: &HashMap<String, Value>,
    other: &HashMap<String, Value>,
    fromfile: &str,
    tofile: &str,
) -> String {
    let old: BTreeSet<&str> = orig.keys().map(String::as_str).collect();
    let new: BTreeSet<&str> = other.keys().map(String::as_str).collect();

    let only_in_old: Vec<&str> = old.difference(&new).copied().collect();
    let only_in_new: Vec<&str> = new.difference(&old).copied().collect();
    let changed: Vec<&str> = old
        .intersection(&new)
        .filter(|key| orig[**key] != other[**key])
        .copied()
        .collect();

    let width = only_in_old
        .iter()
        .chain(&only_in_new)
        .chain(&changed)
        .map(|name| name.len())
        .max()
        .unwrap_or(0);

    let mut out = format!("--- {fromfile}\n+++ {tofile}\n\n");
    for name in &only_in_old {
        out.push_str(&format!("-    {name:<width$} => {}\n", render_value(&orig[*name])));
    }
    for name in &only_in_new {
        out.push_str(&format!("+    {name:<width$} => {}\n", render_value(&other[*name])));
    }
    for name in &changed {
        out.push_str("@@\n");
        out.push_str(&format!("-    {name:<width$} => {}\n", render_value(&orig[*name])));
        out.push_str(&format!("+    {name:<width$} => {}\n", render_value(&other[*name])));
    }
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
