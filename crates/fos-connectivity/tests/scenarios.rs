//! Connectivity manager scenarios
//!
//! Drives a manager against the in-memory platform through install, update,
//! connectivity loss and failure paths.

use std::sync::Arc;
use std::time::Duration;

use fos_connectivity::platform::memory::CachedResponse;
use fos_connectivity::*;
use smol::Timer;

fn platform() -> Arc<MemoryPlatform> {
    Arc::new(MemoryPlatform::for_origin("https://bi.example").unwrap())
}

fn seed_caches(platform: &MemoryPlatform) {
    platform.put_cached("precache-v1", "https://bi.example/index.html", CachedResponse::new(200, b"<html>".to_vec()));
    platform.put_cached("precache-v1", "https://bi.example/app.js", CachedResponse::new(200, b"js".to_vec()));
    platform.put_cached("api-runtime", "https://bi.example/api/reports", CachedResponse::new(200, b"[]".to_vec()));
    platform.put_cached("fonts", "https://bi.example/inter.woff2", CachedResponse::new(200, vec![0; 16]));
}

async fn wait_for(stream: &SnapshotStream, pred: impl Fn(&ConnectivitySnapshot) -> bool) -> ConnectivitySnapshot {
    let next = async {
        while let Ok(snapshot) = stream.recv().await {
            if pred(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    };
    let timeout = async {
        Timer::after(Duration::from_secs(5)).await;
        None
    };
    smol::future::or(next, timeout)
        .await
        .expect("manager closed or timed out")
}

async fn installed(platform: &Arc<MemoryPlatform>) -> ConnectivityManager {
    let manager = ConnectivityManager::start(Arc::clone(platform));
    wait_for(&manager.subscribe(), |s| s.installed).await;
    manager
}

async fn settle() {
    Timer::after(Duration::from_millis(20)).await;
}

fn assert_invariants(state: &ConnectivityState) {
    if state.installed() {
        assert!(state.registration().is_some(), "installed without a registration");
    }
    if state.update_available() {
        assert!(state.installed(), "update flagged without an install");
    }
}

// ============================================================================
// UNSUPPORTED PLATFORM
// ============================================================================

#[test]
fn test_unsupported_snapshot() {
    smol::block_on(async {
        let platform = Arc::new(
            MemoryPlatform::for_origin("https://bi.example")
                .unwrap()
                .with_support(false)
                .with_online(false),
        );
        let manager = ConnectivityManager::start(Arc::clone(&platform));

        assert_eq!(
            manager.snapshot().await,
            ConnectivitySnapshot { supported: false, installed: false, online: false, update_available: false }
        );
    });
}

#[test]
fn test_unsupported_never_registers_or_listens() {
    smol::block_on(async {
        let platform = Arc::new(MemoryPlatform::for_origin("https://bi.example").unwrap().with_support(false));
        let manager = ConnectivityManager::start(Arc::clone(&platform));
        let before = manager.snapshot().await;

        platform.set_online(false);
        settle().await;

        let state = manager.state().await.unwrap();
        assert_eq!(state.phase(), Phase::Unsupported);
        assert_eq!(state.snapshot(), before);
        assert_eq!(platform.calls().register, 0);
        assert!(!platform.is_attached());
    });
}

#[test]
fn test_unsupported_actions_are_noops() {
    smol::block_on(async {
        let platform = Arc::new(MemoryPlatform::for_origin("https://bi.example").unwrap().with_support(false));
        seed_caches(&platform);
        let manager = ConnectivityManager::start(Arc::clone(&platform));

        assert!(!manager.apply_pending_update().await);
        assert_eq!(manager.purge_caches().await, PurgeReport::default());
        assert!(!manager.unregister().await);
        assert_eq!(platform.calls(), Default::default());
        assert_eq!(platform.cache_count(), 3);
    });
}

// ============================================================================
// REGISTRATION
// ============================================================================

#[test]
fn test_registration_succeeds() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;

        let state = manager.state().await.unwrap();
        assert_eq!(state.phase(), Phase::Installed);
        assert!(!state.update_available());
        assert_eq!(state.registration().unwrap().scope, "https://bi.example/");
        assert_invariants(&state);
    });
}

#[test]
fn test_registration_uses_configured_script() {
    smol::block_on(async {
        let platform = platform();
        let config = ConnectivityConfig::from_json(r#"{"script_url": "/app/worker.js", "scope": "/app/"}"#).unwrap();
        let manager = ConnectivityManager::builder(Arc::clone(&platform))
            .config(config)
            .start();
        wait_for(&manager.subscribe(), |s| s.installed).await;

        let state = manager.state().await.unwrap();
        let registration = state.registration().unwrap();
        assert_eq!(registration.script_url, "https://bi.example/app/worker.js");
        assert_eq!(registration.scope, "https://bi.example/app/");
    });
}

#[test]
fn test_registration_failure_is_terminal() {
    smol::block_on(async {
        let platform = platform();
        platform.fail_registration(Some(PlatformError::Network("script fetch failed".into())));
        let reporter = Arc::new(RecordingReporter::default());
        let manager = ConnectivityManager::builder(Arc::clone(&platform))
            .reporter(reporter.clone())
            .start();

        let updates = manager.subscribe();
        while manager.state().await.unwrap().phase() == Phase::Registering {
            settle().await;
        }

        platform.fail_registration(None);
        settle().await;

        let state = manager.state().await.unwrap();
        assert_eq!(state.phase(), Phase::RegistrationFailed);
        assert!(!state.installed());
        assert!(state.registration().is_none());
        assert_eq!(platform.calls().register, 1);
        assert_eq!(
            reporter.errors(),
            vec![ConnectivityError::Registration(PlatformError::Network("script fetch failed".into()))]
        );

        // Connectivity is still tracked
        platform.set_online(false);
        let snapshot = wait_for(&updates, |s| !s.online).await;
        assert!(!snapshot.installed);
    });
}

#[test]
fn test_security_rejection_reported() {
    smol::block_on(async {
        let platform = platform();
        let reporter = Arc::new(RecordingReporter::default());
        let config = ConnectivityConfig {
            script_url: "https://cdn.example/sw.js".into(),
            ..Default::default()
        };
        let manager = ConnectivityManager::builder(Arc::clone(&platform))
            .config(config)
            .reporter(reporter.clone())
            .start();

        while manager.state().await.unwrap().phase() == Phase::Registering {
            settle().await;
        }
        assert!(matches!(
            reporter.errors().as_slice(),
            [ConnectivityError::Registration(PlatformError::Security(_))]
        ));
    });
}

// ============================================================================
// UPDATES
// ============================================================================

#[test]
fn test_first_install_never_flags_update() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;
        settle().await;

        assert!(!manager.snapshot().await.update_available);
        assert!(platform.controller().is_some());
    });
}

#[test]
fn test_update_detected_and_applied() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;
        let updates = manager.subscribe();

        let deployed = platform.deploy_update();
        assert_eq!(deployed.len(), 1);
        let snapshot = wait_for(&updates, |s| s.update_available).await;
        assert!(snapshot.installed);

        assert!(manager.apply_pending_update().await);
        assert_eq!(platform.calls().skip_waiting, 1);
        assert!(!manager.snapshot().await.update_available);

        settle().await;
        assert_eq!(platform.controller(), Some(deployed[0]));
        let state = manager.state().await.unwrap();
        assert!(!state.update_available());
        assert_invariants(&state);
    });
}

#[test]
fn test_controller_change_clears_update() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;
        let updates = manager.subscribe();

        let deployed = platform.deploy_update();
        wait_for(&updates, |s| s.update_available).await;

        // Another tab activated the waiting worker
        platform.skip_waiting(deployed[0]).unwrap();
        let snapshot = wait_for(&updates, |s| !s.update_available).await;
        assert!(snapshot.installed);
        assert!(!manager.apply_pending_update().await);
    });
}

#[test]
fn test_update_without_controller_is_not_flagged() {
    smol::block_on(async {
        let platform = Arc::new(
            MemoryPlatform::for_origin("https://bi.example")
                .unwrap()
                .with_client_claim(false),
        );
        let manager = installed(&platform).await;
        assert!(platform.controller().is_none());

        platform.deploy_update();
        settle().await;

        assert!(!manager.snapshot().await.update_available);
    });
}

#[test]
fn test_apply_without_update_changes_nothing() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;
        let before = manager.state().await.unwrap();

        assert!(!manager.apply_pending_update().await);
        assert!(!manager.apply_pending_update().await);

        assert_eq!(manager.state().await.unwrap(), before);
        assert_eq!(platform.calls().skip_waiting, 0);
    });
}

#[test]
fn test_update_waiting_from_earlier_session_is_flagged() {
    smol::block_on(async {
        let platform = platform();
        // A previous page load installed the old script and took control
        platform.register("/sw.js", None).await.unwrap();
        assert!(platform.controller().is_some());

        let config = ConnectivityConfig {
            script_url: "/sw.js?v=2".into(),
            ..Default::default()
        };
        let manager = ConnectivityManager::builder(Arc::clone(&platform))
            .config(config)
            .start();
        let snapshot = wait_for(&manager.subscribe(), |s| s.installed).await;
        assert!(snapshot.update_available);
        assert_invariants(&manager.state().await.unwrap());

        assert!(manager.apply_pending_update().await);
        assert_eq!(platform.calls().skip_waiting, 1);
    });
}

#[test]
fn test_skip_waiting_failure_keeps_update() {
    smol::block_on(async {
        let platform = platform();
        let reporter = Arc::new(RecordingReporter::default());
        let manager = ConnectivityManager::builder(Arc::clone(&platform))
            .reporter(reporter.clone())
            .start();
        let updates = manager.subscribe();
        wait_for(&updates, |s| s.installed).await;

        platform.deploy_update();
        wait_for(&updates, |s| s.update_available).await;
        platform.fail_skip_waiting(Some(PlatformError::NotFound));

        assert!(!manager.apply_pending_update().await);
        assert!(manager.snapshot().await.update_available);
        assert_eq!(platform.calls().skip_waiting, 1);
        assert!(matches!(
            reporter.errors().as_slice(),
            [ConnectivityError::SkipWaiting(PlatformError::NotFound)]
        ));
    });
}

#[test]
fn test_apply_with_nothing_waiting_keeps_flag() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;
        let updates = manager.subscribe();
        platform.deploy_update();
        wait_for(&updates, |s| s.update_available).await;

        // The registration disappears without any lifecycle event
        let state = manager.state().await.unwrap();
        assert!(platform.unregister(state.registration().unwrap()).await.unwrap());

        assert!(!manager.apply_pending_update().await);
        assert!(manager.snapshot().await.update_available);
        assert_eq!(platform.calls().skip_waiting, 0);
    });
}

// ============================================================================
// CONNECTIVITY
// ============================================================================

#[test]
fn test_connectivity_loss_and_restore() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;
        let updates = manager.subscribe();
        platform.deploy_update();
        wait_for(&updates, |s| s.update_available).await;

        platform.set_online(false);
        let offline = wait_for(&updates, |s| !s.online).await;
        platform.set_online(true);
        let online = wait_for(&updates, |s| s.online).await;

        for snapshot in [offline, online] {
            assert!(snapshot.installed);
            assert!(snapshot.update_available);
        }
    });
}

#[test]
fn test_initial_online_from_platform() {
    smol::block_on(async {
        let platform = Arc::new(MemoryPlatform::for_origin("https://bi.example").unwrap().with_online(false));
        let manager = installed(&platform).await;
        assert!(!manager.snapshot().await.online);
    });
}

#[test]
fn test_offline_flip_right_after_start_is_seen() {
    smol::block_on(async {
        let platform = platform();
        platform.hold_registrations();
        let manager = ConnectivityManager::start(Arc::clone(&platform));

        platform.set_online(false);
        assert!(!manager.snapshot().await.online);
        assert_eq!(manager.state().await.unwrap().phase(), Phase::Registering);

        platform.release_registrations();
        let snapshot = wait_for(&manager.subscribe(), |s| s.installed).await;
        assert!(!snapshot.online);
    });
}

// ============================================================================
// CACHE PURGE
// ============================================================================

#[test]
fn test_purge_when_not_installed_makes_no_calls() {
    smol::block_on(async {
        let platform = platform();
        seed_caches(&platform);
        platform.hold_registrations();
        let manager = ConnectivityManager::start(Arc::clone(&platform));
        let before = manager.state().await.unwrap();

        assert_eq!(manager.purge_caches().await, PurgeReport::default());
        assert_eq!(platform.calls().cache_calls(), 0);
        assert_eq!(platform.cache_count(), 3);
        assert_eq!(manager.state().await.unwrap(), before);
        platform.release_registrations();
    });
}

#[test]
fn test_purge_empties_storage_and_is_idempotent() {
    smol::block_on(async {
        let platform = platform();
        seed_caches(&platform);
        let manager = installed(&platform).await;

        let first = manager.purge_caches().await;
        assert_eq!(first.deleted.len(), 3);
        assert!(first.is_clean());
        assert!(platform.cache_names().await.unwrap().is_empty());
        assert!(platform.cached("https://bi.example/index.html").is_none());

        let second = manager.purge_caches().await;
        assert_eq!(second.attempted(), 0);
        assert!(manager.snapshot().await.installed);
    });
}

#[test]
fn test_purge_continues_past_failures() {
    smol::block_on(async {
        let platform = platform();
        seed_caches(&platform);
        platform.fail_cache_deletion("api-runtime");
        let reporter = Arc::new(RecordingReporter::default());
        let manager = ConnectivityManager::builder(Arc::clone(&platform))
            .reporter(reporter.clone())
            .start();
        wait_for(&manager.subscribe(), |s| s.installed).await;

        let report = manager.purge_caches().await;
        assert_eq!(report.deleted, vec!["fonts", "precache-v1"]);
        assert_eq!(report.failed, vec!["api-runtime"]);
        assert_eq!(report.attempted(), 3);
        assert_eq!(platform.cache_count(), 1);
        assert!(matches!(
            reporter.errors().as_slice(),
            [ConnectivityError::CacheOperation { name, .. }] if name == "api-runtime"
        ));
    });
}

#[test]
fn test_purge_listing_failure_is_reported() {
    smol::block_on(async {
        let platform = platform();
        seed_caches(&platform);
        platform.fail_cache_listing(Some(PlatformError::Storage("quota backend offline".into())));
        let reporter = Arc::new(RecordingReporter::default());
        let manager = ConnectivityManager::builder(Arc::clone(&platform))
            .reporter(reporter.clone())
            .start();
        wait_for(&manager.subscribe(), |s| s.installed).await;

        assert_eq!(manager.purge_caches().await, PurgeReport::default());
        assert_eq!(platform.cache_count(), 3);
        assert_eq!(platform.calls().delete_cache, 0);
        assert!(matches!(
            reporter.errors().as_slice(),
            [ConnectivityError::CacheListing(PlatformError::Storage(_))]
        ));
    });
}

// ============================================================================
// UNREGISTER & TEARDOWN
// ============================================================================

#[test]
fn test_unregister() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;

        assert!(manager.unregister().await);
        let state = manager.state().await.unwrap();
        assert_eq!(state.phase(), Phase::Unregistered);
        assert!(!state.installed());
        assert!(state.registration().is_none());
        assert!(platform.registrations().is_empty());

        assert!(!manager.unregister().await);
        assert_eq!(manager.purge_caches().await, PurgeReport::default());
        assert_invariants(&state);
    });
}

#[test]
fn test_drop_detaches_listeners() {
    smol::block_on(async {
        let platform = platform();
        let manager = installed(&platform).await;
        assert!(platform.is_attached());

        drop(manager);
        settle().await;
        assert!(!platform.is_attached());
    });
}
