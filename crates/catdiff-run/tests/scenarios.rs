//! End-to-end runs over mock ports: compiler behaviour is scripted per
//! host and side, the workspace is a bare directory layout, the reporter
//! records what it is asked to render.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use catdiff_core::{CatalogDiff, HostOutcome, StatesCollection};
use tokio_util::sync::CancellationToken;

use catdiff_run::error::Result;
use catdiff_run::{
    CompileLabel, CompileStatus, Compiler, Controller, ControllerConfig, Directories,
    HostDirectory, NodeInfo, Realm, Reporter, Workspace,
};

fn catalog_json(name: &str, resources: serde_json::Value) -> String {
    serde_json::json!({"name": name, "resources": resources}).to_string()
}

fn plain_resources() -> serde_json::Value {
    serde_json::json!([
        {"type": "File", "title": "/etc/motd", "exported": false,
         "parameters": {"content": "one\ntwo\n", "mode": "0444"}},
        {"type": "Class", "title": "Base", "exported": false},
    ])
}

#[derive(Clone)]
struct SideScript {
    ok: bool,
    catalog: String,
    delay: Duration,
}

impl SideScript {
    fn clean(catalog: String) -> Self {
        Self {
            ok: true,
            catalog,
            delay: Duration::ZERO,
        }
    }

    fn failing() -> Self {
        Self {
            ok: false,
            catalog: String::new(),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct ScriptedCompiler {
    dirs: Directories,
    scripts: HashMap<(String, CompileLabel), SideScript>,
    sequence: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedCompiler {
    fn new(dirs: Directories) -> Self {
        Self {
            dirs,
            scripts: HashMap::new(),
            sequence: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn script(mut self, host: &str, label: CompileLabel, side: SideScript) -> Self {
        self.scripts.insert((host.to_string(), label), side);
        self
    }

    /// Both sides clean with identical catalogs.
    fn clean_host(self, host: &str) -> Self {
        let catalog = catalog_json(host, plain_resources());
        self.script(host, CompileLabel::Base, SideScript::clean(catalog.clone()))
            .script(host, CompileLabel::Change, SideScript::clean(catalog))
    }
}

#[async_trait]
impl Compiler for ScriptedCompiler {
    async fn compile(
        &self,
        hostname: &str,
        label: CompileLabel,
        _vardir: &Path,
        _extra_flags: &[String],
        cancel: &CancellationToken,
    ) -> Result<CompileStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sequence.lock().unwrap().push(hostname.to_string());
        let side = self
            .scripts
            .get(&(hostname.to_string(), label))
            .cloned()
            .unwrap_or_else(|| SideScript::failing());

        if !side.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(side.delay) => {}
                _ = cancel.cancelled() => return Err(catdiff_run::RunError::Cancelled),
            }
        }

        let files = self.dirs.host_files(hostname);
        if side.ok {
            std::fs::write(files.catalog(label), &side.catalog)?;
            Ok(CompileStatus::Ok)
        } else {
            std::fs::write(files.errors(label), "Error: compilation failed\n")?;
            Ok(CompileStatus::FailedWithCode {
                code: 1,
                output: vec!["Error: compilation failed".to_string()],
            })
        }
    }

    async fn version(&self) -> Result<String> {
        Ok("7.0-test".to_string())
    }
}

struct DirWorkspace {
    dirs: Directories,
    config_updates: Mutex<Vec<Realm>>,
}

impl DirWorkspace {
    fn new(dirs: Directories) -> Self {
        Self {
            dirs,
            config_updates: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Workspace for DirWorkspace {
    async fn prepare(&self) -> Result<()> {
        for tree in [&self.dirs.prod_dir, &self.dirs.change_dir] {
            std::fs::create_dir_all(tree.join("catalogs"))?;
            std::fs::create_dir_all(tree.join("src"))?;
        }
        std::fs::create_dir_all(&self.dirs.diff_dir)?;
        std::fs::create_dir_all(&self.dirs.output_dir)?;
        Ok(())
    }

    async fn refresh(&self, _source: &Path) -> Result<()> {
        Ok(())
    }

    async fn update_config(&self, realm: Realm) -> Result<()> {
        self.config_updates.lock().unwrap().push(realm);
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn changed_files(&self) -> Result<Vec<String>> {
        Ok(vec![])
    }
}

struct EmptyDirectory;

#[async_trait]
impl HostDirectory for EmptyDirectory {
    async fn hosts_with_role(&self, _role: &str) -> Result<Vec<NodeInfo>> {
        Ok(vec![])
    }
    async fn hosts_with_profile(&self, _profile: &str) -> Result<Vec<NodeInfo>> {
        Ok(vec![])
    }
    async fn hosts_with_class(&self, _class: &str) -> Result<Vec<NodeInfo>> {
        Ok(vec![])
    }
    async fn hosts_with_resource(&self, _resource_type: &str) -> Result<Vec<NodeInfo>> {
        Ok(vec![])
    }
    async fn query(&self, _query: &str) -> Result<Vec<NodeInfo>> {
        Ok(vec![])
    }
}

#[derive(Default)]
struct RecordingReporter {
    hosts: Mutex<Vec<(String, HostOutcome)>>,
    final_states: Mutex<Option<StatesCollection>>,
    partial_renders: AtomicUsize,
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn render_host(
        &self,
        hostname: &str,
        outcome: HostOutcome,
        _diff: Option<&CatalogDiff>,
        _core_diff: Option<&CatalogDiff>,
        _full_diff: Option<&CatalogDiff>,
    ) -> Result<()> {
        self.hosts
            .lock()
            .unwrap()
            .push((hostname.to_string(), outcome));
        Ok(())
    }

    async fn render_index(&self, states: &StatesCollection, partial: bool) -> Result<()> {
        if partial {
            self.partial_renders.fetch_add(1, Ordering::SeqCst);
        } else {
            *self.final_states.lock().unwrap() = Some(states.clone());
        }
        Ok(())
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    dirs: Directories,
    config: ControllerConfig,
    workspace: Arc<DirWorkspace>,
    reporter: Arc<RecordingReporter>,
}

impl Harness {
    fn new(hosts: &[&str], pool_size: usize, fail_fast: bool) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("work");
        let puppet_var = tmp.path().join("var");
        std::fs::create_dir_all(puppet_var.join("yaml/facts")).unwrap();
        for host in hosts {
            std::fs::write(
                puppet_var.join("yaml/facts").join(format!("{host}.yaml")),
                "\"_timestamp\": old\n",
            )
            .unwrap();
        }
        let config = ControllerConfig {
            base: base.clone(),
            puppet_var,
            puppet_src: tmp.path().join("nonexistent-src"),
            puppet_private: tmp.path().join("nonexistent-private"),
            pool_size,
            fail_fast,
            ..ControllerConfig::default()
        };
        let dirs = Directories::new(&base, 1);
        Self {
            workspace: Arc::new(DirWorkspace::new(dirs.clone())),
            reporter: Arc::new(RecordingReporter::default()),
            _tmp: tmp,
            dirs,
            config,
        }
    }

    fn compiler(&self) -> ScriptedCompiler {
        ScriptedCompiler::new(self.dirs.clone())
    }

    async fn run(&self, expression: &str, compiler: ScriptedCompiler) -> (bool, StatesCollection) {
        let controller = Controller::new(
            self.config.clone(),
            4242,
            1,
            expression,
            self.workspace.clone(),
            Arc::new(compiler),
            Arc::new(EmptyDirectory),
        )
        .unwrap()
        .with_reporter(self.reporter.clone());

        let run_failed = controller.run().await.unwrap();
        let states = self
            .reporter
            .final_states
            .lock()
            .unwrap()
            .clone()
            .expect("final index must have been rendered");
        (run_failed, states)
    }
}

fn hosts_of(states: &StatesCollection, outcome: HostOutcome) -> Vec<String> {
    states
        .get(outcome)
        .map(|hosts| hosts.iter().cloned().collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn clean_hosts_with_identical_catalogs_are_noop() {
    let harness = Harness::new(&["h1", "h2"], 2, false);
    let compiler = harness.compiler().clean_host("h1").clean_host("h2");

    // Trailing comma leaves an empty token that must be discarded.
    let (run_failed, states) = harness.run("h1,h2,", compiler).await;

    assert!(!run_failed);
    assert_eq!(hosts_of(&states, HostOutcome::Noop), vec!["h1", "h2"]);
    assert_eq!(states.hosts().len(), 2);
}

#[tokio::test]
async fn change_compile_failure_is_an_error_and_fails_the_run() {
    let harness = Harness::new(&["h1"], 2, false);
    let compiler = harness
        .compiler()
        .script(
            "h1",
            CompileLabel::Base,
            SideScript::clean(catalog_json("h1", plain_resources())),
        )
        .script("h1", CompileLabel::Change, SideScript::failing());

    let (run_failed, states) = harness.run("h1", compiler).await;

    assert!(run_failed);
    assert_eq!(hosts_of(&states, HostOutcome::Error), vec!["h1"]);
}

#[tokio::test]
async fn change_fixing_a_broken_base_is_noop() {
    let harness = Harness::new(&["h1"], 2, false);
    let compiler = harness
        .compiler()
        .script("h1", CompileLabel::Base, SideScript::failing())
        .script(
            "h1",
            CompileLabel::Change,
            SideScript::clean(catalog_json("h1", plain_resources())),
        );

    let (run_failed, states) = harness.run("h1", compiler).await;

    assert!(!run_failed);
    assert_eq!(hosts_of(&states, HostOutcome::Noop), vec!["h1"]);
}

#[tokio::test]
async fn changed_file_content_produces_a_diff_with_unified_content() {
    let harness = Harness::new(&["h1", "h2"], 2, false);
    let changed = serde_json::json!([
        {"type": "File", "title": "/etc/motd", "exported": false,
         "parameters": {"content": "one\nthree\n", "mode": "0444"}},
        {"type": "Class", "title": "Base", "exported": false},
    ]);
    let compiler = harness
        .compiler()
        .script(
            "h1",
            CompileLabel::Base,
            SideScript::clean(catalog_json("h1", plain_resources())),
        )
        .script(
            "h1",
            CompileLabel::Change,
            SideScript::clean(catalog_json("h1", changed)),
        )
        .clean_host("h2");

    let (run_failed, states) = harness.run("h1,h2", compiler).await;

    assert!(!run_failed);
    assert_eq!(hosts_of(&states, HostOutcome::Diff), vec!["h1"]);
    assert_eq!(hosts_of(&states, HostOutcome::Noop), vec!["h2"]);

    let diff_text =
        std::fs::read_to_string(harness.dirs.host_files("h1").diff()).unwrap();
    assert!(diff_text.contains("--- /etc/motd.orig"));
    assert!(diff_text.contains("+++ /etc/motd"));
    assert!(diff_text.contains("-two"));
    assert!(diff_text.contains("+three"));
}

#[tokio::test]
async fn fail_fast_cancels_outstanding_hosts() {
    let harness = Harness::new(&["h1", "h2", "h3"], 2, true);
    let slow_catalog = catalog_json("slow", plain_resources());
    let compiler = harness
        .compiler()
        .script(
            "h1",
            CompileLabel::Base,
            SideScript::clean(catalog_json("h1", plain_resources())),
        )
        .script("h1", CompileLabel::Change, SideScript::failing())
        .script(
            "h2",
            CompileLabel::Base,
            SideScript::clean(slow_catalog.clone()).with_delay(Duration::from_secs(3)),
        )
        .script(
            "h2",
            CompileLabel::Change,
            SideScript::clean(slow_catalog.clone()),
        )
        .script(
            "h3",
            CompileLabel::Base,
            SideScript::clean(slow_catalog.clone()).with_delay(Duration::from_secs(3)),
        )
        .script("h3", CompileLabel::Change, SideScript::clean(slow_catalog));

    let (run_failed, states) = harness.run("h1,h2,h3", compiler).await;

    assert!(run_failed);
    assert_eq!(hosts_of(&states, HostOutcome::Error), vec!["h1"]);
    // Every host ends in exactly one of error, cancelled or noop.
    let mut all: Vec<String> = Vec::new();
    for outcome in [HostOutcome::Error, HostOutcome::Cancelled, HostOutcome::Noop] {
        all.extend(hosts_of(&states, outcome));
    }
    all.sort();
    assert_eq!(all, vec!["h1", "h2", "h3"]);
    // The slow hosts cannot have finished cleanly.
    assert!(!hosts_of(&states, HostOutcome::Cancelled).is_empty());
}

#[tokio::test]
async fn added_core_resource_classifies_core_diff() {
    let harness = Harness::new(&["h1"], 2, false);
    let changed = serde_json::json!([
        {"type": "File", "title": "/etc/motd", "exported": false,
         "parameters": {"content": "one\ntwo\n", "mode": "0444"}},
        {"type": "Class", "title": "Base", "exported": false},
        {"type": "Package", "title": "x", "exported": false,
         "parameters": {"ensure": "present"}},
    ]);
    let compiler = harness
        .compiler()
        .script(
            "h1",
            CompileLabel::Base,
            SideScript::clean(catalog_json("h1", plain_resources())),
        )
        .script(
            "h1",
            CompileLabel::Change,
            SideScript::clean(catalog_json("h1", changed)),
        );

    let (run_failed, states) = harness.run("h1", compiler).await;

    assert!(!run_failed);
    assert_eq!(hosts_of(&states, HostOutcome::CoreDiff), vec!["h1"]);
}

#[tokio::test]
async fn pool_size_does_not_change_outcomes() {
    let mut outcomes = Vec::new();
    for pool_size in [1, 8] {
        let harness = Harness::new(&["h1", "h2", "h3"], pool_size, false);
        let compiler = harness
            .compiler()
            .clean_host("h1")
            .clean_host("h2")
            .script(
                "h3",
                CompileLabel::Base,
                SideScript::clean(catalog_json("h3", plain_resources())),
            )
            .script("h3", CompileLabel::Change, SideScript::failing());

        let (run_failed, states) = harness.run("h1,h2,h3", compiler).await;
        assert!(run_failed);
        outcomes.push((
            hosts_of(&states, HostOutcome::Noop),
            hosts_of(&states, HostOutcome::Error),
        ));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

#[tokio::test]
async fn production_partition_runs_before_cloud() {
    let cloud_host = "web.project.wmcloud.org";
    let harness = Harness::new(&["h1", cloud_host], 4, false);
    let compiler = harness.compiler().clean_host("h1").clean_host(cloud_host);

    let (run_failed, states) = harness.run(&format!("{cloud_host},h1"), compiler).await;

    assert!(!run_failed);
    assert_eq!(
        hosts_of(&states, HostOutcome::Noop),
        vec!["h1", cloud_host]
    );
    // The workspace was reconfigured once per realm, production first.
    assert_eq!(
        harness.workspace.config_updates.lock().unwrap().as_slice(),
        &[Realm::Production, Realm::Cloud]
    );
}

#[tokio::test]
async fn empty_selection_aborts_the_run() {
    let harness = Harness::new(&[], 2, false);
    let controller = Controller::new(
        harness.config.clone(),
        4242,
        1,
        "",
        harness.workspace.clone(),
        Arc::new(harness.compiler()),
        Arc::new(EmptyDirectory),
    )
    .unwrap()
    .with_reporter(harness.reporter.clone());

    let error = controller.run().await.unwrap_err();
    assert!(matches!(error, catdiff_run::RunError::NoHosts));
    assert!(error.is_usage());
}

#[tokio::test]
async fn cancellation_signal_is_sticky() {
    let token = CancellationToken::new();
    let cancellation = token.clone();
    token.cancel();
    token.cancel();
    assert!(cancellation.is_cancelled());
    cancellation.cancelled().await;
}
