use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use crate::isolation::context::SharedModuleTable;
use crate::isolation::error::IsolationError;
use crate::isolation::manager::{IsolationContextManager, UnloadPolicy};

use super::static_loader;

fn fast_manager() -> IsolationContextManager {
    IsolationContextManager::new(
        static_loader(),
        Arc::new(SharedModuleTable::default()),
        UnloadPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
        },
    )
}

#[test]
fn test_create_and_get_context() {
    let manager = fast_manager();
    let dir = tempdir().unwrap();
    let context = manager
        .create_context("noop", &dir.path().join("noop.so"), dir.path())
        .unwrap();

    let fetched = manager.get_context("noop").expect("context should be live");
    assert!(Arc::ptr_eq(&context, &fetched));
    assert_eq!(manager.loaded_ids(), vec!["noop".to_string()]);
}

#[test]
fn test_create_context_propagates_load_failure() {
    let manager = fast_manager();
    let dir = tempdir().unwrap();
    let err = manager
        .create_context("ghost", &dir.path().join("ghost.so"), dir.path())
        .unwrap_err();
    assert!(matches!(err, IsolationError::ModuleNotFound { .. }));
    assert!(manager.get_context("ghost").is_none());
}

#[test]
fn test_generations_increase_on_recreate() {
    let manager = fast_manager();
    let dir = tempdir().unwrap();
    let module = dir.path().join("noop.so");

    let first = manager.create_context("noop", &module, dir.path()).unwrap();
    let first_generation = first.generation();
    drop(first);
    let second = manager.create_context("noop", &module, dir.path()).unwrap();

    assert!(second.generation() > first_generation);
    assert!(manager.leaked_ids().is_empty());
}

#[test]
fn test_recreate_while_referenced_invalidates_old_handles() {
    let manager = fast_manager();
    let dir = tempdir().unwrap();
    let module = dir.path().join("noop.so");

    let first = manager.create_context("noop", &module, dir.path()).unwrap();
    let old_instance = first.instantiate().unwrap();
    let _second = manager.create_context("noop", &module, dir.path()).unwrap();

    assert!(old_instance.get().is_none());
    assert_eq!(manager.leaked_ids(), vec!["noop".to_string()]);
}

#[tokio::test]
async fn test_unload_async_succeeds_when_released() {
    let manager = fast_manager();
    let dir = tempdir().unwrap();
    let context = manager
        .create_context("noop", &dir.path().join("noop.so"), dir.path())
        .unwrap();
    let instance = context.instantiate().unwrap();
    drop(instance);
    drop(context);

    assert!(manager.unload_context_async("noop", 3).await);
    assert!(manager.get_context("noop").is_none());
    assert!(manager.leaked_ids().is_empty());
}

#[tokio::test]
async fn test_unload_unknown_id_is_trivially_released() {
    let manager = fast_manager();
    assert!(manager.unload_context_async("never-loaded", 1).await);
}

#[tokio::test]
async fn test_unload_reports_leak_and_retry_recovers_it() {
    let manager = fast_manager();
    let dir = tempdir().unwrap();
    let context = manager
        .create_context("noop", &dir.path().join("noop.so"), dir.path())
        .unwrap();
    let stray = context.instantiate().unwrap();
    drop(context);

    assert!(!manager.unload_with_policy("noop").await, "a held handle must block release");
    assert_eq!(manager.leaked_ids(), vec!["noop".to_string()]);
    assert!(manager.retry_leaked().is_empty());

    drop(stray);
    assert_eq!(manager.retry_leaked(), vec!["noop".to_string()]);
    assert!(manager.leaked_ids().is_empty());
}

#[tokio::test]
async fn test_unload_completes_when_holder_releases_during_polling() {
    let manager = Arc::new(IsolationContextManager::new(
        static_loader(),
        Arc::new(SharedModuleTable::default()),
        UnloadPolicy {
            max_attempts: 50,
            retry_delay: Duration::from_millis(2),
        },
    ));
    let dir = tempdir().unwrap();
    let context = manager
        .create_context("noop", &dir.path().join("noop.so"), dir.path())
        .unwrap();

    let holder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(context);
    });

    assert!(manager.unload_with_policy("noop").await);
    holder.await.unwrap();
}
