use super::*;

#[test]
fn test_defaults_when_sections_missing() {
    let cfg: Config = toml::from_str("").unwrap();
    assert_eq!(cfg.irc.port, 6060);
    assert_eq!(cfg.irc.server_name, "wairc");
    assert_eq!(cfg.irc.password_grace_secs, 5);
    assert_eq!(cfg.bridge.setup_attempts, 5);
    assert_eq!(cfg.bridge.message_poll_ms, 500);
    assert_eq!(cfg.replay.seen_ids_capacity, 750);
    assert_eq!(cfg.replay.prefetch_capacity, 50);
    assert_eq!(cfg.replay.mode, ReplayMode::Normal);
    assert_eq!(cfg.maps.provider, MapProvider::GoogleMaps);
}

#[test]
fn test_replay_mode_from_toml() {
    let toml_str = r#"
        [replay]
        mode = "alternative"
        seen_ids_capacity = 100
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.replay.mode, ReplayMode::Alternative);
    assert_eq!(cfg.replay.seen_ids_capacity, 100);
    assert_eq!(cfg.replay.prefetch_capacity, 50);
}

#[test]
fn test_map_provider_from_toml() {
    let toml_str = r#"
        [maps]
        provider = "open-street-map"
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.maps.provider, MapProvider::OpenStreetMap);
}

#[test]
fn test_map_urls() {
    assert_eq!(
        MapProvider::GoogleMaps.url(52.5, 4.25),
        "https://maps.google.com/?q=52.500000,4.250000"
    );
    assert_eq!(
        MapProvider::OpenStreetMap.url(52.5, 4.25),
        "https://www.openstreetmap.org/#map=19/52.500000/4.250000"
    );
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = load("/nonexistent/__wairc_config__.toml").unwrap();
    assert_eq!(cfg.irc.host, "localhost");
    assert_eq!(cfg.files.port, 3000);
}

#[test]
fn test_load_rejects_zero_capacity() {
    let path = std::env::temp_dir().join("__wairc_test_zero_capacity__.toml");
    std::fs::write(&path, "[replay]\nprefetch_capacity = 0\n").unwrap();
    let result = load(path.to_str().unwrap());
    assert!(matches!(result, Err(WaircError::Config(_))));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_shellexpand_leaves_absolute_paths() {
    assert_eq!(shellexpand("/var/lib/wairc"), "/var/lib/wairc");
}
