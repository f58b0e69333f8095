use fruitscan::FruitScanConfig;

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("fruitscan.toml");

    let mut config = FruitScanConfig::default();
    config.detection.fruit_type = "Pear".to_string();
    config.smoothing.window_size = 7;
    config.model.path = Some("models/fruit.onnx".to_string());
    config.save_to_file(&path).unwrap();

    let loaded = FruitScanConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded.detection.fruit_type, "Pear");
    assert_eq!(loaded.smoothing.window_size, 7);
    assert_eq!(loaded.model.path.as_deref(), Some("models/fruit.onnx"));
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.toml");
    std::fs::write(&path, "[camera]\ntarget_fps = 15\n").unwrap();

    let config = FruitScanConfig::load_from_file(&path).unwrap();
    assert_eq!(config.camera.target_fps, 15);
    assert_eq!(config.camera.resolution, [1280, 720]);
    assert_eq!(config.storage.history_limit, 1000);
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = FruitScanConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.smoothing.window_size, 5);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[camera\ntarget_fps = ").unwrap();
    assert!(FruitScanConfig::load_from_file(&path).is_err());
}

#[test]
fn test_layered_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layered.toml");
    std::fs::write(&path, "[camera]\ntarget_fps = 15\n[storage]\nhistory_limit = 10\n").unwrap();

    std::env::set_var("FRUITSCAN__STORAGE__HISTORY_LIMIT", "25");
    let config = FruitScanConfig::load_layered(&path);
    std::env::remove_var("FRUITSCAN__STORAGE__HISTORY_LIMIT");

    let config = config.unwrap();
    assert_eq!(config.camera.target_fps, 15);
    assert_eq!(config.storage.history_limit, 25);
    assert_eq!(config.detection.min_roi_area, 1500);
}

#[test]
fn test_default_load_reads_environment() {
    std::env::set_var("FRUITSCAN__CAMERA__FIRST_FRAME_TIMEOUT_MS", "4321");
    let config = FruitScanConfig::load_or_default();
    std::env::remove_var("FRUITSCAN__CAMERA__FIRST_FRAME_TIMEOUT_MS");

    assert_eq!(config.camera.first_frame_timeout_ms, 4321);
}
