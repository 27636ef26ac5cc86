//! Default `Compiler` implementation driving the external `puppet` binary
//!
//! The compiler writes its artifacts to the well-known per-host paths of the
//! tree it compiled against: the filtered catalog on success, the error log
//! on failure. A cancelled compilation kills the child process.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::directories::Directories;
use crate::error::{Result, RunError};
use crate::ports::{CompileLabel, CompileStatus, Compiler};

/// The compiler logs a lot of noise to stdout alongside the catalog.
static NOISE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Info|[Nn]otice|[Ww]arning)").unwrap());

const ERROR_TAIL_LINES: usize = 10;

pub struct PuppetCompiler {
    dirs: Directories,
    binary: String,
}

impl PuppetCompiler {
    pub fn new(dirs: Directories) -> Self {
        Self {
            dirs,
            binary: "puppet".to_string(),
        }
    }

    /// Override the compiler binary, mainly for tests.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl Compiler for PuppetCompiler {
    async fn compile(
        &self,
        hostname: &str,
        label: CompileLabel,
        vardir: &Path,
        extra_flags: &[String],
        cancel: &CancellationToken,
    ) -> Result<CompileStatus> {
        let tree = self.dirs.tree(label);
        let srcdir = tree.join("src");
        let privdir = tree.join("private");
        let files = self.dirs.host_files(hostname);

        let mut cmd = Command::new(&self.binary);
        cmd.arg("master")
            .arg(format!("--vardir={}", vardir.display()))
            .arg(format!(
                "--modulepath={}:{}",
                privdir.join("modules").display(),
                srcdir.join("modules").display()
            ))
            .arg(format!("--confdir={}", srcdir.display()))
            .arg(format!("--templatedir={}", srcdir.join("templates").display()))
            .arg(format!("--compile={hostname}"))
            .arg("--color=false")
            .args(extra_flags)
            .env("RUBYLIB", srcdir.join("modules/wmflib/lib"))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(host = hostname, label = %label, "invoking compiler");
        let child = cmd.spawn().map_err(|error| RunError::Compiler {
            message: format!("cannot spawn {}: {error}", self.binary),
        })?;

        // kill_on_drop tears the child down if cancellation wins the race.
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|error| RunError::Compiler {
                message: format!("waiting for {} failed: {error}", self.binary),
            })?,
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
        };

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut catalog = String::with_capacity(stdout.len());
            for line in stdout.lines() {
                if !NOISE_RE.is_match(line) {
                    catalog.push_str(line);
                    catalog.push('\n');
                }
            }
            tokio::fs::write(files.catalog(label), catalog).await?;
            Ok(CompileStatus::Ok)
        } else {
            tokio::fs::write(files.errors(label), &output.stderr).await?;
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut tail: Vec<String> = stderr
                .lines()
                .rev()
                .take(ERROR_TAIL_LINES)
                .map(String::from)
                .collect();
            tail.reverse();
            info!(host = hostname, label = %label, code, "compilation failed");
            Ok(CompileStatus::FailedWithCode { code, output: tail })
        }
    }

    async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|error| RunError::Compiler {
                message: format!("cannot probe {} version: {error}", self.binary),
            })?;
        if !output.status.success() {
            return Err(RunError::Compiler {
                message: format!("{} --version exited with {}", self.binary, output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_compiler(dir: &Path, script: &str) -> String {
        let path = dir.join("puppet");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn setup(base: &Path) -> Directories {
        let dirs = Directories::new(base, 1);
        for tree in [&dirs.prod_dir, &dirs.change_dir] {
            std::fs::create_dir_all(tree.join("catalogs")).unwrap();
        }
        dirs
    }

    #[tokio::test]
    async fn successful_compile_filters_noise_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = setup(tmp.path());
        let script = r#"echo 'Info: Loading facts'
echo 'Notice: Compiled catalog'
echo '{"name": "h1", "resources": []}'
echo 'Warning: deprecation'"#;
        let compiler =
            PuppetCompiler::new(dirs.clone()).with_binary(fake_compiler(tmp.path(), script));

        let status = compiler
            .compile("h1", CompileLabel::Base, tmp.path(), &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(status.is_ok());
        let catalog =
            std::fs::read_to_string(dirs.host_files("h1").catalog(CompileLabel::Base)).unwrap();
        assert_eq!(catalog, "{\"name\": \"h1\", \"resources\": []}\n");
    }

    #[tokio::test]
    async fn failed_compile_writes_error_log_and_code() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = setup(tmp.path());
        let script = "echo 'Error: something broke' >&2\nexit 1";
        let compiler =
            PuppetCompiler::new(dirs.clone()).with_binary(fake_compiler(tmp.path(), script));

        let status = compiler
            .compile("h1", CompileLabel::Change, tmp.path(), &[], &CancellationToken::new())
            .await
            .unwrap();
        match status {
            CompileStatus::FailedWithCode { code, output } => {
                assert_eq!(code, 1);
                assert_eq!(output, vec!["Error: something broke".to_string()]);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        let log =
            std::fs::read_to_string(dirs.host_files("h1").errors(CompileLabel::Change)).unwrap();
        assert!(log.contains("something broke"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_compile() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = setup(tmp.path());
        let compiler =
            PuppetCompiler::new(dirs).with_binary(fake_compiler(tmp.path(), "sleep 30"));

        let token = CancellationToken::new();
        let cancellation = token.clone();
        let compile = compiler.compile("h1", CompileLabel::Base, tmp.path(), &[], &cancellation);
        tokio::pin!(compile);

        tokio::select! {
            _ = &mut compile => panic!("compile must not finish before cancellation"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => token.cancel(),
        }
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), compile)
            .await
            .expect("cancelled compile must return promptly");
        assert!(matches!(outcome, Err(RunError::Cancelled)));
    }

    #[tokio::test]
    async fn version_probe_trims_output() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = setup(tmp.path());
        let compiler =
            PuppetCompiler::new(dirs).with_binary(fake_compiler(tmp.path(), "echo 7.23.0"));
        assert_eq!(compiler.version().await.unwrap(), "7.23.0");
    }
}
