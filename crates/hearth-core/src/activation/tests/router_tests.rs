use crate::activation::router::ActivationEventRouter;
use crate::activation::trigger::{ActivationEvent, ActivationKind, ActivationTrigger};

fn router_with_two() -> ActivationEventRouter {
    let router = ActivationEventRouter::new();
    router.register("alpha", vec![ActivationTrigger::startup()]);
    router.register(
        "beta",
        vec![
            ActivationTrigger::on(ActivationKind::Command, "beta.run"),
            ActivationTrigger::startup(),
        ],
    );
    router
}

#[test]
fn test_match_event_in_registration_order() {
    let router = router_with_two();
    assert_eq!(
        router.match_event(&ActivationEvent::startup()),
        vec!["alpha".to_string(), "beta".to_string()]
    );
}

#[test]
fn test_plugin_matched_at_most_once() {
    let router = router_with_two();
    assert_eq!(router.match_event(&ActivationEvent::command("beta.run")), vec!["beta".to_string()]);
    // beta already matched; only alpha remains for startup
    assert_eq!(router.match_event(&ActivationEvent::startup()), vec!["alpha".to_string()]);
    assert!(router.match_event(&ActivationEvent::startup()).is_empty());
}

#[test]
fn test_peek_does_not_mark() {
    let router = router_with_two();
    assert_eq!(router.peek_matches(&ActivationEvent::command("beta.run")).len(), 1);
    assert!(!router.is_activated("beta"));
    assert_eq!(router.match_event(&ActivationEvent::command("beta.run")).len(), 1);
    assert!(router.is_activated("beta"));
}

#[test]
fn test_reset_allows_rematch() {
    let router = router_with_two();
    router.match_event(&ActivationEvent::startup());
    router.reset("alpha");
    assert_eq!(router.match_event(&ActivationEvent::startup()), vec!["alpha".to_string()]);
}

#[test]
fn test_take_removes_from_pending_and_keeps_mark() {
    let router = router_with_two();
    let triggers = router.take("alpha").expect("alpha is pending");
    assert_eq!(triggers, vec![ActivationTrigger::startup()]);
    assert!(!router.is_pending("alpha"));
    assert!(router.is_activated("alpha"));
    router.reset("alpha");
    assert!(router.match_event(&ActivationEvent::startup()).iter().all(|id| id != "alpha"));
}

#[test]
fn test_remove_forgets_entirely() {
    let router = router_with_two();
    router.match_event(&ActivationEvent::startup());
    assert!(router.remove("beta"));
    assert!(!router.is_activated("beta"));
    assert_eq!(router.pending_ids(), vec!["alpha".to_string()]);
    assert!(!router.remove("beta"));
}

#[test]
fn test_register_replaces_triggers() {
    let router = router_with_two();
    router.register("alpha", vec![ActivationTrigger::on(ActivationKind::View, "alpha.view")]);
    assert_eq!(router.pending_ids(), vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(router.peek_matches(&ActivationEvent::startup()), vec!["beta".to_string()]);
}

#[test]
fn test_excluded_plugin_survives_reset_until_readmitted() {
    let router = router_with_two();
    router.exclude("beta");
    router.reset("beta");
    assert_eq!(router.peek_matches(&ActivationEvent::startup()), vec!["alpha".to_string()]);
    assert!(router.match_event(&ActivationEvent::command("beta.run")).is_empty());
    assert!(router.is_excluded("beta"));

    assert!(router.readmit("beta"));
    assert_eq!(router.match_event(&ActivationEvent::command("beta.run")), vec!["beta".to_string()]);
}

#[test]
fn test_remove_clears_exclusion() {
    let router = router_with_two();
    router.exclude("alpha");
    router.remove("alpha");
    assert!(!router.is_excluded("alpha"));
}
