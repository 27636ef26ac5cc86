//! PuppetDB-backed `HostDirectory`
//!
//! Tag queries are answered from the resources endpoint: roles, profiles
//! and classes are `Class` resources with title-cased titles, resource
//! queries match the resource type directly. The free-form query is passed
//! through untouched.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Result, RunError};
use crate::ports::{HostDirectory, NodeInfo};

pub const DEFAULT_PUPPETDB_URL: &str = "https://localhost:8080";

pub struct PuppetDbDirectory {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ResourceRow {
    certname: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl PuppetDbDirectory {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("catdiff/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| RunError::Directory {
                message: format!("cannot build HTTP client: {error}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn resources(&self, pql: String) -> Result<Vec<NodeInfo>> {
        let url = format!("{}/pdb/query/v4", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "query": pql }))
            .send()
            .await
            .map_err(|error| RunError::Directory {
                message: format!("query against {url} failed: {error}"),
            })?;
        if !response.status().is_success() {
            return Err(RunError::Directory {
                message: format!("query against {url} returned {}", response.status()),
            });
        }
        let rows: Vec<ResourceRow> =
            response.json().await.map_err(|error| RunError::Directory {
                message: format!("malformed response from {url}: {error}"),
            })?;

        let mut nodes: Vec<NodeInfo> = rows
            .into_iter()
            .map(|row| NodeInfo {
                certname: row.certname,
                tags: row.tags,
            })
            .collect();
        nodes.sort_by(|a, b| a.certname.cmp(&b.certname));
        nodes.dedup_by(|a, b| a.certname == b.certname);
        Ok(nodes)
    }

    async fn class_resources(&self, class: &str) -> Result<Vec<NodeInfo>> {
        self.resources(format!(
            r#"resources[certname, tags] {{ type = "Class" and title = "{}" }}"#,
            title_case(class)
        ))
        .await
    }
}

#[async_trait]
impl HostDirectory for PuppetDbDirectory {
    async fn hosts_with_role(&self, role: &str) -> Result<Vec<NodeInfo>> {
        self.class_resources(&format!("role::{role}")).await
    }

    async fn hosts_with_profile(&self, profile: &str) -> Result<Vec<NodeInfo>> {
        self.class_resources(&format!("profile::{profile}")).await
    }

    async fn hosts_with_class(&self, class: &str) -> Result<Vec<NodeInfo>> {
        self.class_resources(class).await
    }

    async fn hosts_with_resource(&self, resource_type: &str) -> Result<Vec<NodeInfo>> {
        self.resources(format!(
            r#"resources[certname, tags] {{ type = "{}" }}"#,
            title_case(resource_type)
        ))
        .await
    }

    async fn query(&self, query: &str) -> Result<Vec<NodeInfo>> {
        self.resources(query.to_string()).await
    }
}

/// PuppetDB stores class titles with every `::` segment capitalized.
fn title_case(class: &str) -> String {
    class
        .split("::")
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("::")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_case_capitalizes_segments() {
        assert_eq!(title_case("role::cache::text"), "Role::Cache::Text");
        assert_eq!(title_case("sshkey"), "Sshkey");
        assert_eq!(title_case(""), "");
    }
}
