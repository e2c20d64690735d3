use std::time::Duration;

use crate::activation::ActivationEvent;
use crate::event::types::{INSTALL_PROGRESS, PLUGIN_ACTIVATED, PLUGIN_STATE_CHANGED};
use crate::event::{Event, InstallPhase, InstallProgress, PluginActivated, PluginStateChanged};
use crate::plugin_system::lifecycle::PluginState;

#[test]
fn test_event_names() {
    let changed = PluginStateChanged {
        plugin_id: "p".into(),
        old_state: PluginState::Loaded,
        new_state: PluginState::Activating,
    };
    assert_eq!(changed.name(), PLUGIN_STATE_CHANGED);

    let activated = PluginActivated {
        plugin_id: "p".into(),
        trigger: Some(ActivationEvent::command("p.run")),
        elapsed: Duration::from_millis(5),
    };
    assert_eq!(activated.name(), PLUGIN_ACTIVATED);

    let progress = InstallProgress::new("p", InstallPhase::Validating, 0.25, "checking manifest");
    assert_eq!(progress.name(), INSTALL_PROGRESS);
}

#[test]
fn test_install_progress_fraction_is_clamped() {
    assert_eq!(InstallProgress::new("p", InstallPhase::Completed, 1.5, "").fraction, 1.0);
    assert_eq!(InstallProgress::new("p", InstallPhase::Failed, -0.5, "").fraction, 0.0);
}

#[test]
fn test_clone_event_preserves_payload() {
    let original = PluginStateChanged {
        plugin_id: "p".into(),
        old_state: PluginState::Active,
        new_state: PluginState::Deactivating,
    };
    let boxed = original.clone_event();
    let back = boxed.as_any().downcast_ref::<PluginStateChanged>().unwrap();
    assert_eq!(back, &original);
}
