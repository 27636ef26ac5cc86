//! Host-expression resolution
//!
//! A selector expression is a comma-separated list of tokens. Most tokens
//! name hosts directly; prefixed tokens query the host directory or the
//! local fact store. The resolved set is de-duplicated and partitioned by
//! realm, since the workspace has to be reconfigured between realms.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Result, RunError};
use crate::facts;
use crate::ports::{HostDirectory, NodeInfo, Workspace};

/// Hosts under this domain live in the cloud realm; everything else is
/// production.
pub const CLOUD_DOMAIN_SUFFIX: &str = ".wmcloud.org";

/// The canonical scratch host included by the `basic` selector.
const CANONICAL_TEST_HOST: &str = "sretest1001.eqiad.wmnet";

static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,\s*").unwrap());
static FIRST_DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").unwrap());

/// Deployment realm of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Realm {
    Production,
    Cloud,
}

impl Realm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Realm::Production => "production",
            Realm::Cloud => "cloud",
        }
    }

    pub fn of_host(hostname: &str) -> Realm {
        if hostname.ends_with(CLOUD_DOMAIN_SUFFIX) {
            Realm::Cloud
        } else {
            Realm::Production
        }
    }
}

impl std::fmt::Display for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved host set of one run, partitioned by realm. Order of first
/// mention is preserved within each realm.
#[derive(Debug, Clone, Default)]
pub struct HostSelection {
    pub production: Vec<String>,
    pub cloud: Vec<String>,
}

impl HostSelection {
    /// Partition a host list by realm, dropping duplicates.
    pub fn partition<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selection = Self::default();
        let mut seen = HashSet::new();
        for host in hosts {
            let host = host.into();
            if host.is_empty() || !seen.insert(host.clone()) {
                continue;
            }
            match Realm::of_host(&host) {
                Realm::Production => selection.production.push(host),
                Realm::Cloud => selection.cloud.push(host),
            }
        }
        selection
    }

    pub fn for_realm(&self, realm: Realm) -> &[String] {
        match realm {
            Realm::Production => &self.production,
            Realm::Cloud => &self.cloud,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.production.is_empty() && self.cloud.is_empty()
    }

    pub fn len(&self) -> usize {
        self.production.len() + self.cloud.len()
    }

    /// All hosts, production first.
    pub fn all(&self) -> Vec<String> {
        self.production
            .iter()
            .chain(self.cloud.iter())
            .cloned()
            .collect()
    }
}

/// Resolves selector expressions against the host directory, the local fact
/// store and the change itself.
pub struct HostSelector {
    directory: Arc<dyn HostDirectory>,
    workspace: Arc<dyn Workspace>,
    puppet_var: PathBuf,
}

impl HostSelector {
    pub fn new(
        directory: Arc<dyn HostDirectory>,
        workspace: Arc<dyn Workspace>,
        puppet_var: PathBuf,
    ) -> Self {
        Self {
            directory,
            workspace,
            puppet_var,
        }
    }

    /// Expand an expression into the de-duplicated, realm-partitioned host
    /// set. An empty result is fatal.
    pub async fn resolve(&self, expression: &str) -> Result<HostSelection> {
        let expression = expression.trim();
        let mut hosts: Vec<String> = Vec::new();
        if expression.is_empty() {
            debug!("empty selector, using every host known to the local fact store");
            hosts = facts::known_hosts(&self.puppet_var);
        } else {
            for token in split_tokens(expression) {
                hosts.extend(self.resolve_token(&token).await?);
            }
        }

        let selection = HostSelection::partition(hosts);
        if selection.is_empty() {
            return Err(RunError::NoHosts);
        }
        info!(
            production = selection.production.len(),
            cloud = selection.cloud.len(),
            "resolved host selection"
        );
        Ok(selection)
    }

    async fn resolve_token(&self, token: &str) -> Result<Vec<String>> {
        if let Some(pattern) = token.strip_prefix("re:") {
            let re = Regex::new(pattern).map_err(|error| RunError::InvalidSelector {
                token: token.to_string(),
                message: error.to_string(),
            })?;
            Ok(facts::known_hosts(&self.puppet_var)
                .into_iter()
                .filter(|host| re.is_match(host))
                .collect())
        } else if let Some(role) = token.strip_prefix("O:") {
            Ok(dedup_by_tag_class(self.directory.hosts_with_role(role).await?))
        } else if let Some(profile) = token.strip_prefix("P:") {
            Ok(dedup_by_tag_class(
                self.directory.hosts_with_profile(profile).await?,
            ))
        } else if let Some(class) = token.strip_prefix("C:") {
            Ok(dedup_by_tag_class(self.directory.hosts_with_class(class).await?))
        } else if let Some(resource_type) = token.strip_prefix("R:") {
            Ok(dedup_by_tag_class(
                self.directory.hosts_with_resource(resource_type).await?,
            ))
        } else if let Some(query) = token.strip_prefix("cumin:") {
            Ok(self
                .directory
                .query(query)
                .await?
                .into_iter()
                .map(|node| node.certname)
                .collect())
        } else if token == "auto" {
            self.resolve_auto().await
        } else if token == "basic" {
            Ok(basic_hosts())
        } else {
            // Unknown prefixes are literal hostnames.
            Ok(vec![token.to_string()])
        }
    }

    /// Infer hosts from the change itself: changed role and profile
    /// manifests are resolved through the directory.
    async fn resolve_auto(&self) -> Result<Vec<String>> {
        let changed = self.workspace.changed_files().await?;
        let mut nodes = Vec::new();
        for path in &changed {
            if let Some(role) = manifest_class(path, "role") {
                debug!(%path, %role, "change touches a role manifest");
                nodes.extend(self.directory.hosts_with_role(&role).await?);
            } else if let Some(profile) = manifest_class(path, "profile") {
                debug!(%path, %profile, "change touches a profile manifest");
                nodes.extend(self.directory.hosts_with_profile(&profile).await?);
            }
        }
        Ok(dedup_by_tag_class(nodes))
    }
}

/// Split on commas with optional surrounding whitespace, discarding empty
/// tokens left by trailing separators.
fn split_tokens(expression: &str) -> Vec<String> {
    SEPARATOR_RE
        .split(expression)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

/// Class path of a changed manifest inside the given module, e.g.
/// `modules/role/manifests/cache/text.pp` -> `cache::text`. The module's
/// own `init.pp` does not name a queryable class.
fn manifest_class(path: &str, module: &str) -> Option<String> {
    let rest = path
        .strip_prefix(&format!("modules/{module}/manifests/"))?
        .strip_suffix(".pp")?;
    if rest == "init" {
        return None;
    }
    Some(rest.replace('/', "::"))
}

/// Collapse hosts carrying an identical tag set into one representative per
/// equivalence class. The class key pairs the hostname prefix before the
/// first digit with the sorted tag set, so `web1001` and `web1002` with the
/// same tags compile only once.
fn dedup_by_tag_class(mut nodes: Vec<NodeInfo>) -> Vec<String> {
    nodes.sort_by(|a, b| a.certname.cmp(&b.certname));
    let mut seen_classes = HashSet::new();
    let mut hosts = Vec::new();
    for node in nodes {
        let prefix = match FIRST_DIGIT_RE.find(&node.certname) {
            Some(found) => &node.certname[..found.start()],
            None => node.certname.as_str(),
        };
        let mut tags = node.tags.clone();
        tags.sort();
        let key = format!("{prefix}|{}", tags.join(","));
        if seen_classes.insert(key) {
            hosts.push(node.certname);
        }
    }
    hosts
}

fn basic_hosts() -> Vec<String> {
    let mut hosts = Vec::new();
    if let Some(local) = local_hostname() {
        hosts.push(local);
    }
    hosts.push(CANONICAL_TEST_HOST.to_string());
    hosts
}

fn local_hostname() -> Option<String> {
    if let Ok(hostname) = std::env::var("HOSTNAME")
        && !hostname.trim().is_empty()
    {
        return Some(hostname.trim().to_string());
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
