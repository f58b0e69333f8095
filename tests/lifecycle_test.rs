//! Camera lifecycle behaviour against the scripted synthetic camera.

use fruitscan::testing::{Scene, SyntheticOpener};
use fruitscan::types::{CameraState, Label, RecordOrigin, VoteSource};
use fruitscan::{CameraLifecycle, FruitScanConfig, ScanError};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn test_config(dir: &Path) -> FruitScanConfig {
    let mut config = FruitScanConfig::default();
    config.camera.settle_delay_ms = 0;
    config.camera.open_retry_delay_ms = 0;
    config.camera.target_fps = 200;
    config.storage.stats_path = dir.join("stats.json").display().to_string();
    config.storage.output_directory = dir.join("captures").display().to_string();
    config
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_concurrent_starts_open_one_device() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Healthy);
    let camera = CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener.clone())).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let camera = camera.clone();
            thread::spawn(move || camera.start(0))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().unwrap().is_running);
    }

    assert_eq!(opener.opens(), 1);
    assert_eq!(opener.open_handles(), 1);
    camera.stop().unwrap();
    assert_eq!(opener.open_handles(), 0);
}

#[test]
fn test_start_on_other_index_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Healthy);
    let camera = CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener.clone())).unwrap();

    camera.start(0).unwrap();
    let status = camera.start(1).unwrap();
    assert_eq!(status.source_index, Some(1));
    assert_eq!(opener.opens(), 2);
    assert!(wait_until(Duration::from_secs(1), || opener.open_handles() == 1));
    camera.stop().unwrap();
}

#[test]
fn test_live_mode_records_settled_object_once() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Healthy);
    let camera = CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener.clone())).unwrap();

    assert!(camera.toggle_live().unwrap());
    assert!(wait_until(Duration::from_secs(3), || camera.get_stats().summary.total_objects >= 1));

    // the same fruit keeps settling on the same label
    let served = opener.frames_served();
    assert!(wait_until(Duration::from_secs(2), || opener.frames_served() >= served + 20));
    let snapshot = camera.get_stats();
    assert_eq!(snapshot.summary.total_objects, 1);
    let record = &snapshot.history[0];
    assert_eq!(record.label, Label::Acceptable);
    assert_eq!(record.origin, RecordOrigin::Live);
    assert_eq!(record.source, VoteSource::Fused);

    // a new fruit settles again
    opener.set_scene(Scene::Empty);
    assert!(wait_until(Duration::from_secs(1), || {
        camera.latest().is_some_and(|l| l.analysis.verdict.label == Label::NoObject)
    }));
    opener.set_scene(Scene::Blemished);
    assert!(wait_until(Duration::from_secs(3), || camera.get_stats().summary.total_objects >= 2));
    assert_eq!(camera.get_stats().summary.objects_by_status.defective, 1);

    camera.stop().unwrap();
}

#[test]
fn test_non_live_mode_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Blemished);
    let camera = CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener.clone())).unwrap();

    camera.start(0).unwrap();
    assert!(wait_until(Duration::from_secs(2), || opener.frames_served() >= 20));
    assert!(camera.get_stats().summary.is_zero());
    camera.stop().unwrap();
}

#[test]
fn test_capture_saves_artifacts_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Healthy);
    let camera = CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener)).unwrap();

    let record = camera.capture_once().unwrap();
    assert_eq!(record.label, Label::Acceptable);
    assert_eq!(record.fruit_type, "Apple");
    assert!(record.bbox.is_some());
    for path in [&record.file_paths.original, &record.file_paths.roi, &record.file_paths.mask] {
        assert!(Path::new(path.as_deref().unwrap()).exists());
    }
    let metadata = std::fs::read_dir(dir.path().join("captures").join("metadata")).unwrap().count();
    assert_eq!(metadata, 1);

    let (history, total) = camera.get_history(10);
    assert_eq!(total, 1);
    assert_eq!(history[0].id, record.id);
    camera.stop().unwrap();
}

#[test]
fn test_capture_of_empty_scene_counts_non_object() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Empty);
    let camera = CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener)).unwrap();

    let record = camera.capture_once().unwrap();
    assert_eq!(record.label, Label::NoObject);
    assert!(!record.is_object);
    assert_eq!(record.fruit_type, "None");
    assert_eq!(camera.get_stats().summary.total_non_objects, 1);
    camera.stop().unwrap();
}

#[test]
fn test_capture_fails_when_device_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Healthy);
    let camera = CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener.clone())).unwrap();

    opener.fail_next_opens(2);
    assert!(matches!(camera.capture_once(), Err(ScanError::DeviceUnavailable(_))));
    assert!(camera.get_stats().summary.is_zero());
    assert_eq!(camera.status().state, CameraState::Error);
}

#[test]
fn test_stop_is_bounded_when_read_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.camera.stop_timeout_ms = 50;
    let opener = SyntheticOpener::with_interval(Scene::Healthy, Duration::from_millis(600));
    let camera = CameraLifecycle::with_opener(config, Box::new(opener.clone())).unwrap();

    camera.start(0).unwrap();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    let status = camera.stop().unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(status.state, CameraState::Stopped);

    // the abandoned run still holds the device mid-read
    let health = camera.health();
    assert_eq!(health.devices_pending_release, 1);
    assert_eq!(health.status, "degraded");

    // the loop releases the device once the blocked read returns
    assert!(wait_until(Duration::from_secs(3), || opener.open_handles() == 0));
    let health = camera.health();
    assert_eq!(health.devices_pending_release, 0);
    assert_eq!(health.status, "healthy");
}

#[test]
fn test_reset_during_live_mode() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Healthy);
    let camera = Arc::new(CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener)).unwrap());

    camera.toggle_live().unwrap();
    assert!(wait_until(Duration::from_secs(3), || camera.get_stats().summary.total_objects >= 1));

    let snapshot = camera.reset_stats().unwrap();
    assert!(snapshot.summary.is_zero());
    // the smoother forgot the settled label, so the fruit is recorded again
    assert!(wait_until(Duration::from_secs(3), || camera.get_stats().summary.total_objects == 1));
    assert!(camera.get_stats().summary.is_consistent());
    camera.stop().unwrap();
}

#[test]
fn test_health_reports_degraded_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let opener = SyntheticOpener::new(Scene::Healthy);
    let camera = CameraLifecycle::with_opener(test_config(dir.path()), Box::new(opener.clone())).unwrap();

    let health = camera.health();
    assert_eq!(health.status, "healthy");
    assert!(!health.model_loaded);

    opener.fail_next_opens(2);
    let _ = camera.start(0);
    assert_eq!(camera.health().status, "degraded");
    assert_eq!(camera.health().camera_state, CameraState::Error);

    camera.stop().unwrap();
    assert_eq!(camera.health().status, "healthy");
}

#[test]
fn test_health_recovers_after_stats_write_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("state");
    std::fs::write(&blocker, "a file, not a directory").unwrap();
    let mut config = test_config(dir.path());
    config.storage.stats_path = blocker.join("stats.json").display().to_string();
    let opener = SyntheticOpener::new(Scene::Blemished);
    let camera = CameraLifecycle::with_opener(config, Box::new(opener)).unwrap();

    assert!(camera.capture_once().is_err());
    let health = camera.health();
    assert!(!health.stats_persisted);
    assert_eq!(health.status, "degraded");

    std::fs::remove_file(&blocker).unwrap();
    camera.capture_once().unwrap();
    let health = camera.health();
    assert!(health.stats_persisted);
    assert_eq!(health.status, "healthy");
    assert_eq!(camera.get_stats().summary.total_objects, 2);

    camera.stop().unwrap();
    let reopened = fruitscan::stats::StatsStore::open(blocker.join("stats.json"), 100).unwrap();
    assert_eq!(reopened.read().summary.total_objects, 2);
}
