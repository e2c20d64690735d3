use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

use crate::activation::{ActivationError, ActivationEvent, ActivationTrigger, ContributionError, ContributionKind};
use crate::config::RuntimeConfig;
use crate::event::types::{INSTALL_PROGRESS, PLUGIN_ACTIVATED, PLUGIN_STATE_CHANGED};
use crate::event::{InstallPhase, InstallProgress, PluginActivated, PluginStateChanged, sync_event_handler, typed_event_handler};
use crate::isolation::PluginFactory;
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::{ErrorCode, PluginError};
use crate::plugin_system::lifecycle::PluginState;
use crate::plugin_system::manifest::{ManifestBuilder, PluginManifest};
use crate::plugin_system::runtime::{CancellationSignal, PluginRuntime};
use crate::plugin_system::traits::{Plugin, PluginContext};
use crate::plugin_system::version::SemanticVersion;

type Journal = Arc<Mutex<Vec<String>>>;

/// Per-plugin fault switches, flipped by tests between operations
#[derive(Default)]
struct Switches {
    fail_init: AtomicBool,
    panic_init: AtomicBool,
    fail_deactivate: AtomicBool,
    init_delay_ms: AtomicU64,
}

struct TestPlugin {
    id: String,
    journal: Journal,
    switches: Arc<Switches>,
}

#[async_trait]
impl Plugin for TestPlugin {
    async fn initialize(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.journal.lock().unwrap().push(format!("init:{}", self.id));
        assert_eq!(ctx.plugin_id(), self.id);
        let delay = self.switches.init_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.switches.panic_init.load(Ordering::SeqCst) {
            panic!("init exploded");
        }
        if self.switches.fail_init.load(Ordering::SeqCst) {
            return Err(PluginError::InitializationFailed("boom".into()));
        }
        Ok(())
    }

    async fn register_contributions(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let journal = self.journal.clone();
        let id = self.id.clone();
        ctx.register_command(
            &format!("{}.run", self.id),
            Some("Run"),
            Arc::new(move |args: &[Value]| {
                journal.lock().unwrap().push(format!("run:{}:{}", id, args.len()));
                Ok(json!({ "plugin": id.clone(), "args": args.len() }))
            }),
        )?;
        ctx.subscribe("test.ping", sync_event_handler(|_| Ok(()))).await;
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), PluginError> {
        self.journal.lock().unwrap().push(format!("deactivate:{}", self.id));
        if self.switches.fail_deactivate.load(Ordering::SeqCst) {
            return Err(PluginError::TeardownFailed("stuck".into()));
        }
        Ok(())
    }
}

struct Harness {
    runtime: PluginRuntime,
    journal: Journal,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let mut config = RuntimeConfig::default()
            .with_plugins_root(dir.path().join("plugins"))
            .with_data_root(dir.path().join("data"));
        config.unload.max_attempts = 2;
        config.unload.retry_delay_ms = 1;
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        Self {
            runtime: PluginRuntime::new(config),
            journal: Arc::new(Mutex::new(Vec::new())),
            dir,
        }
    }

    fn plugins_root(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    fn factory(&self, id: &str) -> (PluginFactory, Arc<Switches>) {
        let switches = Arc::new(Switches::default());
        let journal = self.journal.clone();
        let id = id.to_string();
        let shared = switches.clone();
        let factory: PluginFactory = Arc::new(move || {
            Box::new(TestPlugin {
                id: id.clone(),
                journal: journal.clone(),
                switches: shared.clone(),
            }) as Box<dyn Plugin>
        });
        (factory, switches)
    }

    fn builtin(&self, manifest: PluginManifest) -> Arc<Switches> {
        let (factory, switches) = self.factory(&manifest.id);
        self.runtime.register_builtin(manifest, factory).unwrap();
        switches
    }

    /// Writes `<plugins>/<id>/manifest.json` whose module is the static `<id>.so`
    fn on_disk(&self, root: &Path, id: &str, version: &str, extra: Value) -> Arc<Switches> {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        let mut manifest = json!({
            "id": id,
            "name": id,
            "version": version,
            "main": format!("{}.so", id),
            "contributes": { "commands": [{ "id": format!("{}.run", id), "title": "Run" }] }
        });
        if let (Some(target), Some(fields)) = (manifest.as_object_mut(), extra.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
        let (factory, switches) = self.factory(id);
        self.runtime.static_modules().register(&format!("{}.so", id), factory);
        switches
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn count(&self, entry: &str) -> usize {
        self.journal().iter().filter(|e| *e == entry).count()
    }
}

fn manifest(id: &str, deps: &[&str]) -> ManifestBuilder {
    deps.iter().fold(
        ManifestBuilder::new(id, id, SemanticVersion::new(1, 0, 0)).command(&format!("{}.run", id), "Run"),
        |builder, dep| builder.dependency(PluginDependency::parse(dep).unwrap()),
    )
}

#[tokio::test]
async fn test_startup_activates_dependency_chain_in_order() {
    let h = Harness::new();
    h.builtin(manifest("utils", &[]).build());
    h.builtin(manifest("core", &["utils@^1.0.0"]).build());
    h.builtin(manifest("ui", &["core@^1.0.0"]).activation(ActivationTrigger::startup()).build());

    let report = h.runtime.startup().await;
    assert!(report.is_clean());
    assert_eq!(report.activated, vec!["ui".to_string()]);
    assert_eq!(h.journal(), vec!["init:utils", "init:core", "init:ui"]);
    for id in ["utils", "core", "ui"] {
        assert_eq!(h.runtime.state(id), Some(PluginState::Active));
    }
}

#[tokio::test]
async fn test_proxy_command_activates_owner_with_original_arguments() {
    let h = Harness::new();
    h.builtin(manifest("hello", &[]).build());
    assert_eq!(h.runtime.state("hello"), Some(PluginState::NotLoaded));
    assert_eq!(
        h.runtime.contributions().is_proxy(ContributionKind::Command, "hello.run"),
        Some(true)
    );

    let result = h.runtime.execute_command("hello.run", &[json!(1), json!(2)]).await.unwrap();

    assert_eq!(result, json!({ "plugin": "hello", "args": 2 }));
    assert_eq!(h.runtime.state("hello"), Some(PluginState::Active));
    assert_eq!(
        h.runtime.contributions().is_proxy(ContributionKind::Command, "hello.run"),
        Some(false)
    );
    assert_eq!(h.journal(), vec!["init:hello", "run:hello:2"]);

    let record = h.runtime.records().into_iter().find(|r| r.id == "hello").unwrap();
    assert_eq!(record.trigger.as_deref(), Some("onCommand:hello.run"));
}

#[tokio::test]
async fn test_fault_in_one_plugin_does_not_stop_siblings() {
    let h = Harness::new();
    let bad = h.builtin(manifest("bad", &[]).activation(ActivationTrigger::startup()).build());
    bad.fail_init.store(true, Ordering::SeqCst);
    h.builtin(manifest("good", &[]).activation(ActivationTrigger::startup()).build());

    let report = h.runtime.startup().await;
    assert_eq!(report.activated, vec!["good".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].code, ErrorCode::ActivationFailed);
    assert_eq!(report.failures[0].plugin_id.as_deref(), Some("bad"));

    assert_eq!(h.runtime.state("bad"), Some(PluginState::Error));
    let record = h.runtime.records().into_iter().find(|r| r.id == "bad").unwrap();
    assert_eq!(record.error_count, 1);
    assert!(record.last_error.unwrap().contains("initialize failed"));

    // Error records are excluded from routing until reload.
    assert!(h.runtime.startup().await.activated.is_empty());
    assert_eq!(h.count("init:bad"), 1);
}

#[tokio::test]
async fn test_panic_in_initialize_is_caught() {
    let h = Harness::new();
    let switches = h.builtin(manifest("wild", &[]).build());
    switches.panic_init.store(true, Ordering::SeqCst);

    let err = h.runtime.activate("wild").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ActivationFailed);
    assert!(err.message.contains("initialize panicked: init exploded"));
    assert_eq!(h.runtime.state("wild"), Some(PluginState::Error));
}

#[tokio::test]
async fn test_proxy_of_failed_plugin_reports_failure_then_unavailable() {
    let h = Harness::new();
    let switches = h.builtin(manifest("bad", &[]).build());
    switches.fail_init.store(true, Ordering::SeqCst);

    let first = h.runtime.execute_command("bad.run", &[]).await.unwrap_err();
    assert!(matches!(
        first,
        ContributionError::Activation(ActivationError::ActivationFailed { ref code, ref plugin_id, .. })
            if code == "ACTIVATION_FAILED" && plugin_id == "bad"
    ));

    let second = h.runtime.execute_command("bad.run", &[]).await.unwrap_err();
    assert!(matches!(second, ContributionError::Unavailable { ref owner, .. } if owner == "bad"));
    assert_eq!(h.count("init:bad"), 1);
}

#[tokio::test]
async fn test_concurrent_proxy_calls_share_one_activation() {
    let h = Harness::new();
    let switches = h.builtin(manifest("slow", &[]).build());
    switches.init_delay_ms.store(50, Ordering::SeqCst);

    let first_args = [json!(1)];
    let (first, second) = tokio::join!(
        h.runtime.execute_command("slow.run", &first_args),
        h.runtime.execute_command("slow.run", &[])
    );

    assert_eq!(first.unwrap(), json!({ "plugin": "slow", "args": 1 }));
    assert_eq!(second.unwrap(), json!({ "plugin": "slow", "args": 0 }));
    assert_eq!(h.count("init:slow"), 1);
    assert_eq!(h.runtime.state("slow"), Some(PluginState::Active));
}

#[tokio::test]
async fn test_unload_after_failure_keeps_plugin_excluded_until_reload() {
    let h = Harness::new();
    let switches = h.builtin(manifest("flaky", &[]).activation(ActivationTrigger::startup()).build());
    switches.fail_init.store(true, Ordering::SeqCst);
    assert_eq!(h.runtime.startup().await.failures.len(), 1);
    assert_eq!(h.runtime.state("flaky"), Some(PluginState::Error));

    h.runtime.unload("flaky").await.unwrap();
    switches.fail_init.store(false, Ordering::SeqCst);
    assert_eq!(h.runtime.state("flaky"), Some(PluginState::NotLoaded));

    assert!(h.runtime.startup().await.activated.is_empty());
    let err = h.runtime.execute_command("flaky.run", &[]).await.unwrap_err();
    assert!(matches!(err, ContributionError::Unavailable { ref owner, .. } if owner == "flaky"));
    assert_eq!(h.runtime.activate("flaky").await.unwrap_err().code, ErrorCode::InvalidState);
    assert_eq!(h.count("init:flaky"), 1);

    h.runtime.reload("flaky").await.unwrap();
    assert_eq!(h.runtime.startup().await.activated, vec!["flaky".to_string()]);
    assert_eq!(h.count("init:flaky"), 2);
}

#[tokio::test]
async fn test_fire_event_never_reactivates() {
    let h = Harness::new();
    h.builtin(manifest("once", &[]).activation(ActivationTrigger::Any).build());

    let first = h.runtime.fire_event(ActivationEvent::language("en")).await;
    assert_eq!(first.activated, vec!["once".to_string()]);
    let second = h.runtime.fire_event(ActivationEvent::language("en")).await;
    assert!(second.activated.is_empty());

    h.runtime.deactivate("once").await.unwrap();
    assert!(h.runtime.startup().await.activated.is_empty());
    assert_eq!(h.count("init:once"), 1);
}

#[tokio::test]
async fn test_concurrent_activation_runs_once() {
    let h = Harness::new();
    h.builtin(manifest("solo", &[]).build());

    let (a, b) = tokio::join!(h.runtime.activate("solo"), h.runtime.activate("solo"));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.count("init:solo"), 1);
}

#[tokio::test]
async fn test_deactivate_disposes_registrations() {
    let h = Harness::new();
    h.builtin(manifest("hello", &[]).build());
    h.runtime.activate("hello").await.unwrap();
    assert_eq!(h.runtime.events().subscriber_count("test.ping").await, 1);
    assert!(h.runtime.contributions().command("hello.run").is_some());

    h.runtime.deactivate("hello").await.unwrap();

    assert_eq!(h.runtime.state("hello"), Some(PluginState::Deactivated));
    assert!(h.runtime.contributions().command("hello.run").is_none());
    assert_eq!(h.runtime.events().subscriber_count("test.ping").await, 0);

    // Deactivated plugins can be activated again explicitly.
    h.runtime.activate("hello").await.unwrap();
    assert_eq!(h.count("init:hello"), 2);
    assert_eq!(h.runtime.events().subscriber_count("test.ping").await, 1);
}

#[tokio::test]
async fn test_deactivating_dependency_stops_dependents_first() {
    let h = Harness::new();
    h.builtin(manifest("utils", &[]).build());
    h.builtin(manifest("core", &["utils"]).build());
    h.runtime.activate("core").await.unwrap();

    h.runtime.deactivate("utils").await.unwrap();

    let journal = h.journal();
    let core = journal.iter().position(|e| e == "deactivate:core").unwrap();
    let utils = journal.iter().position(|e| e == "deactivate:utils").unwrap();
    assert!(core < utils);
    assert_eq!(h.runtime.state("core"), Some(PluginState::Deactivated));
}

#[tokio::test]
async fn test_failed_deactivation_marks_error_and_still_disposes() {
    let h = Harness::new();
    let switches = h.builtin(manifest("sticky", &[]).build());
    h.runtime.activate("sticky").await.unwrap();
    switches.fail_deactivate.store(true, Ordering::SeqCst);

    let err = h.runtime.deactivate("sticky").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DeactivationFailed);
    assert_eq!(h.runtime.state("sticky"), Some(PluginState::Error));
    assert!(h.runtime.contributions().command("sticky.run").is_none());
}

#[tokio::test]
async fn test_reload_is_the_way_out_of_error() {
    let h = Harness::new();
    let switches = h.builtin(manifest("flaky", &[]).build());
    switches.fail_init.store(true, Ordering::SeqCst);
    assert!(h.runtime.activate("flaky").await.is_err());

    let err = h.runtime.activate("flaky").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);

    assert!(h.runtime.reload("flaky").await.unwrap());
    assert_eq!(h.runtime.state("flaky"), Some(PluginState::NotLoaded));
    assert_eq!(
        h.runtime.contributions().is_proxy(ContributionKind::Command, "flaky.run"),
        Some(true)
    );

    switches.fail_init.store(false, Ordering::SeqCst);
    h.runtime.execute_command("flaky.run", &[]).await.unwrap();
    assert_eq!(h.runtime.state("flaky"), Some(PluginState::Active));
}

#[tokio::test]
async fn test_cancellation_leaves_plugin_pending() {
    let h = Harness::new();
    h.builtin(manifest("slow", &[]).activation(ActivationTrigger::startup()).build());
    let cancel = CancellationSignal::new();
    cancel.cancel();

    let report = h.runtime.fire_event_with(ActivationEvent::startup(), cancel).await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].code, ErrorCode::Cancelled);
    assert_eq!(h.runtime.state("slow"), Some(PluginState::NotLoaded));
    assert!(h.journal().is_empty());

    assert_eq!(h.runtime.startup().await.activated, vec!["slow".to_string()]);
}

#[tokio::test]
async fn test_missing_dependency_fails_without_error_state() {
    let h = Harness::new();
    h.builtin(manifest("ui", &["core@^1.0.0"]).activation(ActivationTrigger::startup()).build());

    let report = h.runtime.startup().await;
    assert_eq!(report.failures[0].code, ErrorCode::MissingDependency);
    assert_eq!(h.runtime.state("ui"), Some(PluginState::NotLoaded));

    h.builtin(manifest("core", &[]).build());
    assert_eq!(h.runtime.startup().await.activated, vec!["ui".to_string()]);
    assert_eq!(h.runtime.state("core"), Some(PluginState::Active));
}

#[tokio::test]
async fn test_unknown_plugin_is_not_found() {
    let h = Harness::new();
    assert_eq!(h.runtime.activate("ghost").await.unwrap_err().code, ErrorCode::PluginNotFound);
    assert_eq!(h.runtime.unload("ghost").await.unwrap_err().code, ErrorCode::PluginNotFound);
    assert_eq!(h.runtime.uninstall("ghost").await.unwrap_err().code, ErrorCode::PluginNotFound);
}

#[tokio::test]
async fn test_cannot_reregister_live_plugin() {
    let h = Harness::new();
    h.builtin(manifest("hello", &[]).build());
    h.runtime.activate("hello").await.unwrap();
    let (factory, _) = h.factory("hello");
    let err = h
        .runtime
        .register_builtin(manifest("hello", &[]).build(), factory)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
    assert_eq!(h.runtime.state("hello"), Some(PluginState::Active));
}

#[tokio::test]
async fn test_isolated_plugin_unload_reports_leak() {
    let h = Harness::new();
    h.on_disk(&h.plugins_root(), "iso", "1.0.0", json!({ "activationEvents": ["onStartup"] }));
    let report = h.runtime.discover().await;
    assert_eq!(report.plugins.len(), 1);

    h.runtime.startup().await;
    assert_eq!(h.runtime.state("iso"), Some(PluginState::Active));
    assert_eq!(h.runtime.contexts().loaded_ids(), vec!["iso".to_string()]);
    let record = h.runtime.records().into_iter().find(|r| r.id == "iso").unwrap();
    assert!(record.context_generation.is_some());
    assert!(h.dir.path().join("data").join("iso").is_dir());

    let held = h.runtime.contexts().get_context("iso").unwrap();
    assert!(!h.runtime.unload("iso").await.unwrap());
    assert_eq!(h.runtime.state("iso"), Some(PluginState::NotLoaded));
    assert_eq!(h.runtime.contexts().leaked_ids(), vec!["iso".to_string()]);
    assert!(held.is_unload_requested());

    drop(held);
    assert_eq!(h.runtime.retry_leaked(), vec!["iso".to_string()]);
}

#[tokio::test]
async fn test_isolated_plugin_unload_releases_context() {
    let h = Harness::new();
    h.on_disk(&h.plugins_root(), "iso", "1.0.0", json!({}));
    h.runtime.discover().await;
    h.runtime.activate("iso").await.unwrap();

    assert!(h.runtime.unload("iso").await.unwrap());
    assert!(h.runtime.contexts().loaded_ids().is_empty());
    assert!(h.runtime.contexts().leaked_ids().is_empty());
    assert_eq!(h.count("deactivate:iso"), 1);
}

#[tokio::test]
async fn test_missing_module_marks_error() {
    let h = Harness::new();
    let dir = h.plugins_root().join("broken");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        r#"{ "id": "broken", "name": "Broken", "version": "1.0.0", "main": "nowhere.so" }"#,
    )
    .unwrap();
    h.runtime.discover().await;

    let err = h.runtime.activate("broken").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ModuleLoadFailed);
    assert_eq!(h.runtime.state("broken"), Some(PluginState::Error));
}

#[tokio::test]
async fn test_reload_rereads_manifest_and_reactivates() {
    let h = Harness::new();
    h.on_disk(&h.plugins_root(), "iso", "1.0.0", json!({}));
    h.runtime.discover().await;
    h.runtime.activate("iso").await.unwrap();
    let first_generation = h.runtime.contexts().get_context("iso").unwrap().generation();

    let manifest_path = h.plugins_root().join("iso").join("manifest.json");
    let updated = std::fs::read_to_string(&manifest_path).unwrap().replace("1.0.0", "1.1.0");
    std::fs::write(&manifest_path, updated).unwrap();

    assert!(h.runtime.reload("iso").await.unwrap());
    assert_eq!(h.runtime.state("iso"), Some(PluginState::Active));
    let record = h.runtime.records().into_iter().find(|r| r.id == "iso").unwrap();
    assert_eq!(record.version, "1.1.0");
    assert!(record.context_generation.unwrap() > first_generation);
}

#[tokio::test]
async fn test_discover_skips_live_plugins() {
    let h = Harness::new();
    h.on_disk(&h.plugins_root(), "iso", "1.0.0", json!({}));
    h.runtime.discover().await;
    h.runtime.activate("iso").await.unwrap();

    let again = h.runtime.discover().await;
    assert!(again.plugins.is_empty());
    assert!(again.failures.is_empty());
    assert_eq!(h.runtime.state("iso"), Some(PluginState::Active));
}

#[tokio::test]
async fn test_uninstall_removes_plugin_and_directory() {
    let h = Harness::new();
    h.on_disk(&h.plugins_root(), "iso", "1.0.0", json!({}));
    h.runtime.discover().await;
    h.runtime.activate("iso").await.unwrap();

    assert!(h.runtime.uninstall("iso").await.unwrap());

    assert_eq!(h.runtime.state("iso"), Some(PluginState::Uninstalled));
    assert!(!h.plugins_root().join("iso").exists());
    assert!(!h.runtime.resolve_for("iso").is_success());
    assert!(h.runtime.contributions().command("iso.run").is_none());
    assert_eq!(h.runtime.events().subscriber_count("test.ping").await, 0);
}

#[tokio::test]
async fn test_uninstall_pending_builtin() {
    let h = Harness::new();
    h.builtin(manifest("hello", &[]).keybinding("hello.run", "ctrl+h").build());
    assert_eq!(h.runtime.contributions().keybindings().len(), 1);

    assert!(h.runtime.uninstall("hello").await.unwrap());
    assert_eq!(h.runtime.state("hello"), None);
    assert!(h.runtime.contributions().keybindings().is_empty());
    assert!(h.runtime.contributions().command("hello.run").is_none());
}

#[tokio::test]
async fn test_install_directory_copies_and_activates_on_startup() {
    let h = Harness::new();
    let staging = h.dir.path().join("staging");
    h.on_disk(&staging, "inst", "1.0.0", json!({ "activationEvents": ["onStartup"] }));

    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = phases.clone();
    h.runtime
        .events()
        .subscribe(
            INSTALL_PROGRESS,
            "test",
            typed_event_handler(move |e: &InstallProgress| {
                sink.lock().unwrap().push(e.phase);
                Ok(())
            }),
        )
        .await;

    let id = h.runtime.install_directory(&staging.join("inst")).await.unwrap();

    assert_eq!(id, "inst");
    assert!(h.plugins_root().join("inst").join("manifest.json").is_file());
    assert_eq!(h.runtime.state("inst"), Some(PluginState::Active));
    assert_eq!(
        *phases.lock().unwrap(),
        vec![
            InstallPhase::Validating,
            InstallPhase::Installing,
            InstallPhase::Activating,
            InstallPhase::Completed
        ]
    );

    let err = h.runtime.install_directory(&staging.join("inst")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn test_install_rolls_back_unresolvable_plugin() {
    let h = Harness::new();
    let staging = h.dir.path().join("staging");
    h.on_disk(&staging, "needy", "1.0.0", json!({ "dependencies": ["ghost@^1.0.0"] }));

    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = phases.clone();
    h.runtime
        .events()
        .subscribe(
            INSTALL_PROGRESS,
            "test",
            typed_event_handler(move |e: &InstallProgress| {
                sink.lock().unwrap().push(e.phase);
                Ok(())
            }),
        )
        .await;

    let err = h.runtime.install_directory(&staging.join("needy")).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::MissingDependency);
    assert!(!h.plugins_root().join("needy").exists());
    assert!(h.runtime.pending_ids().is_empty());
    assert_eq!(h.runtime.state("needy"), None);
    let phases = phases.lock().unwrap();
    assert_eq!(phases[phases.len() - 2..], [InstallPhase::RollingBack, InstallPhase::Failed]);
}

#[tokio::test]
async fn test_install_rejects_invalid_manifest() {
    let h = Harness::new();
    let staging = h.dir.path().join("staging").join("junk");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("manifest.json"), "{ not json").unwrap();

    let err = h.runtime.install_directory(&staging).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ManifestInvalid);
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let h = Harness::new();
    h.builtin(manifest("hello", &[]).build());

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    h.runtime
        .events()
        .subscribe(
            PLUGIN_STATE_CHANGED,
            "test",
            typed_event_handler(move |e: &PluginStateChanged| {
                sink.lock().unwrap().push((e.old_state, e.new_state));
                Ok(())
            }),
        )
        .await;
    let activated = Arc::new(Mutex::new(Vec::new()));
    let sink = activated.clone();
    h.runtime
        .events()
        .subscribe(
            PLUGIN_ACTIVATED,
            "test",
            typed_event_handler(move |e: &PluginActivated| {
                sink.lock().unwrap().push((e.plugin_id.clone(), e.trigger.clone()));
                Ok(())
            }),
        )
        .await;

    h.runtime.activate("hello").await.unwrap();

    use PluginState::*;
    assert_eq!(
        *changes.lock().unwrap(),
        vec![(NotLoaded, Loading), (Loading, Loaded), (Loaded, Activating), (Activating, Active)]
    );
    assert_eq!(*activated.lock().unwrap(), vec![("hello".to_string(), None)]);
}

#[tokio::test]
async fn test_shutdown_deactivates_dependents_first() {
    let h = Harness::new();
    h.builtin(manifest("utils", &[]).build());
    h.builtin(manifest("core", &["utils"]).build());
    h.builtin(manifest("idle", &[]).build());
    h.runtime.activate("core").await.unwrap();

    let report = h.runtime.shutdown().await;

    assert_eq!(report.deactivated, vec!["core".to_string(), "utils".to_string()]);
    assert!(report.failures.is_empty());
    assert!(report.leaked.is_empty());
    assert_eq!(
        h.journal()[2..],
        ["deactivate:core".to_string(), "deactivate:utils".to_string()]
    );
    assert_eq!(h.runtime.pending_ids(), vec!["core", "idle", "utils"]);
}

#[tokio::test]
async fn test_records_cover_pending_and_loaded() {
    let h = Harness::new();
    h.builtin(manifest("a", &[]).build());
    h.builtin(manifest("b", &["a@^1.0.0"]).build());
    h.runtime.activate("a").await.unwrap();

    let records = h.runtime.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "a");
    assert!(!records[0].pending);
    assert!(records[0].builtin);
    assert_eq!(records[0].registrations, 2);
    assert!(records[1].pending);
    assert_eq!(records[1].dependencies, vec!["a@^1.0.0".to_string()]);
}
