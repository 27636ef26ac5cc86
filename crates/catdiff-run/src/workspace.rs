//! Git-backed `Workspace`
//!
//! Materializes the paired base/change trees for one run. Each tree is a
//! clone of the configuration source plus a clone of the private overlay;
//! the change tree additionally has the proposed change checked out and
//! rebased onto the mainline branch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::directories::Directories;
use crate::error::{Result, RunError};
use crate::ports::Workspace;
use crate::selector::Realm;

/// Modules provided by the private overlay, linked into the source tree.
const PRIVATE_MODULES: &[&str] = &["passwords", "contacts", "privateexim"];

/// Branch the change is rebased onto.
const SOURCE_BRANCH: &str = "production";

pub struct GitWorkspace {
    dirs: Directories,
    puppet_src: PathBuf,
    puppet_private: PathBuf,
    puppet_netbox: PathBuf,
    puppet_var: PathBuf,
    change_id: u64,
}

impl GitWorkspace {
    pub fn new(config: &ControllerConfig, dirs: Directories, change_id: u64) -> Self {
        Self {
            puppet_src: config.puppet_src.clone(),
            puppet_private: config.puppet_private.clone(),
            puppet_netbox: config.puppet_netbox.clone(),
            puppet_var: config.puppet_var.clone(),
            dirs,
            change_id,
        }
    }

    async fn git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.args(args);
        let output = cmd.output().await.map_err(|error| RunError::Workspace {
            message: format!("cannot run git: {error}"),
        })?;
        if !output.status.success() {
            return Err(RunError::Workspace {
                message: format!(
                    "git {} failed ({}): {}",
                    args.join(" "),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Clone the source and the private overlay into one tree and wire the
    /// private modules and the generated hiera data into place.
    async fn prepare_tree(&self, tree: &Path) -> Result<()> {
        debug!(tree = %tree.display(), "cloning tree");
        let src = tree.join("src");
        let private = tree.join("private");
        let puppet_src = self.puppet_src.to_string_lossy();
        let puppet_private = self.puppet_private.to_string_lossy();
        self.git(None, &["clone", "-q", &*puppet_src, &*src.to_string_lossy()])
            .await?;
        self.git(
            None,
            &["clone", "-q", &*puppet_private, &*private.to_string_lossy()],
        )
        .await?;

        for module in PRIVATE_MODULES {
            let target = private.join("modules").join(module);
            let link = src.join("modules").join(module);
            if target.is_dir() && !link.exists() {
                std::os::unix::fs::symlink(&target, &link)?;
            }
        }
        if self.puppet_netbox.is_dir() {
            std::os::unix::fs::symlink(&self.puppet_netbox, tree.join("netbox-hiera"))?;
        }
        let ssl = self.puppet_var.join("ssl");
        if ssl.is_dir() {
            copy_dir_recursive(&ssl, &src.join("ssl"))?;
        }
        Ok(())
    }

    /// Resolve the newest patchset of the change on the source's review
    /// remote.
    async fn resolve_change_ref(&self, repo: &Path) -> Result<String> {
        let prefix = format!(
            "refs/changes/{:02}/{}/",
            self.change_id % 100,
            self.change_id
        );
        let listing = self
            .git(Some(repo), &["ls-remote", "origin", &format!("{prefix}*")])
            .await?;
        latest_patchset_ref(&listing).ok_or_else(|| RunError::Workspace {
            message: format!("change {} not found on origin", self.change_id),
        })
    }

    /// Check the change out in the change tree and rebase it onto the
    /// mainline branch.
    async fn apply_change(&self) -> Result<()> {
        let src = self.dirs.change_dir.join("src");
        let change_ref = self.resolve_change_ref(&src).await?;
        info!(change = self.change_id, %change_ref, "applying change");
        self.git(Some(&src), &["fetch", "-q", "origin", &change_ref]).await?;
        self.git(Some(&src), &["checkout", "-q", "FETCH_HEAD"]).await?;
        self.git(Some(&src), &["pull", "-q", "--rebase", "origin", SOURCE_BRANCH])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn prepare(&self) -> Result<()> {
        debug!(base = %self.dirs.base_dir.display(), "creating run directories");
        for tree in [&self.dirs.prod_dir, &self.dirs.change_dir] {
            tokio::fs::create_dir_all(tree.join("catalogs")).await?;
        }
        tokio::fs::create_dir_all(&self.dirs.diff_dir).await?;
        tokio::fs::create_dir_all(&self.dirs.output_dir).await?;

        self.prepare_tree(&self.dirs.prod_dir).await?;
        self.prepare_tree(&self.dirs.change_dir).await?;
        self.apply_change().await
    }

    async fn refresh(&self, source: &Path) -> Result<()> {
        debug!(source = %source.display(), "refreshing repository");
        self.git(Some(source), &["pull", "-q", "--rebase"]).await?;
        Ok(())
    }

    async fn update_config(&self, realm: Realm) -> Result<()> {
        for tree in [&self.dirs.prod_dir, &self.dirs.change_dir] {
            let src = tree.join("src");
            let hiera_source = src
                .join("modules/puppetmaster/files")
                .join(format!("{realm}.hiera.yaml"));
            if !hiera_source.is_file() {
                return Err(RunError::Workspace {
                    message: format!(
                        "no hiera configuration for realm {realm} in {}",
                        src.display()
                    ),
                });
            }
            let content = tokio::fs::read_to_string(&hiera_source).await?;
            let rewritten = rewrite_hiera(&content, &tree.join("private"), &src);
            tokio::fs::write(src.join("hiera.yaml"), rewritten).await?;
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        debug!(base = %self.dirs.base_dir.display(), "removing working trees");
        match tokio::fs::remove_dir_all(&self.dirs.base_dir).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn changed_files(&self) -> Result<Vec<String>> {
        // Resolved against the local source clone so the selector can run
        // before the workspace trees exist.
        let change_ref = self.resolve_change_ref(&self.puppet_src).await?;
        self.git(Some(&self.puppet_src), &["fetch", "-q", "origin", &change_ref])
            .await?;
        let listing = self
            .git(
                Some(&self.puppet_src),
                &[
                    "diff",
                    "--name-only",
                    &format!("origin/{SOURCE_BRANCH}...FETCH_HEAD"),
                ],
            )
            .await?;
        Ok(listing.lines().map(String::from).collect())
    }
}

/// Pick the highest numbered patchset out of an `ls-remote` listing.
fn latest_patchset_ref(listing: &str) -> Option<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|reference| {
            let patchset: u32 = reference.rsplit('/').next()?.parse().ok()?;
            Some((patchset, reference.to_string()))
        })
        .max_by_key(|(patchset, _)| *patchset)
        .map(|(_, reference)| reference)
}

/// Point the hiera hierarchy at this run's trees instead of the system
/// locations. The private tree must be substituted first, it shares the
/// public prefix.
fn rewrite_hiera(content: &str, private: &Path, src: &Path) -> String {
    content
        .replace("/etc/puppet/private", &private.to_string_lossy())
        .replace("/etc/puppet", &src.to_string_lossy())
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
