use crate::activation::trigger::{ActivationEvent, ActivationKind, ActivationTrigger};

#[test]
fn test_parse_trigger_with_argument() {
    let trigger = ActivationTrigger::parse("onCommand:hello.say").unwrap();
    assert_eq!(trigger, ActivationTrigger::on(ActivationKind::Command, "hello.say"));
    assert_eq!(trigger.to_string(), "onCommand:hello.say");
}

#[test]
fn test_parse_wildcard_and_startup() {
    assert_eq!(ActivationTrigger::parse("*").unwrap(), ActivationTrigger::Any);
    assert_eq!(ActivationTrigger::parse("onStartup").unwrap(), ActivationTrigger::startup());
}

#[test]
fn test_parse_rejects_unknown_kind() {
    let err = ActivationTrigger::parse("onSunrise:early").unwrap_err();
    assert!(err.to_string().contains("onSunrise"));
}

#[test]
fn test_wildcard_matches_every_event() {
    let any = ActivationTrigger::Any;
    assert!(any.matches(&ActivationEvent::startup()));
    assert!(any.matches(&ActivationEvent::command("x")));
    assert!(any.matches(&ActivationEvent::uri("https")));
}

#[test]
fn test_argument_must_match_when_both_present() {
    let trigger = ActivationTrigger::on(ActivationKind::View, "explorer");
    assert!(trigger.matches(&ActivationEvent::view("explorer")));
    assert!(!trigger.matches(&ActivationEvent::view("outline")));
    assert!(!trigger.matches(&ActivationEvent::command("explorer")));
}

#[test]
fn test_missing_argument_matches_any_argument() {
    let trigger = ActivationTrigger::parse("onLanguage").unwrap();
    assert!(trigger.matches(&ActivationEvent::language("fr-CA")));
}

#[test]
fn test_event_parse_rejects_wildcard() {
    assert!(ActivationEvent::parse("*").is_err());
    let event: ActivationEvent = "onFileType:rs".parse().unwrap();
    assert_eq!(event, ActivationEvent::file_type("rs"));
}
