use rust_decimal::Decimal;
use spayd::config::Config;

#[test]
fn defaults_are_sane() {
    let config = Config::default();

    assert_eq!(config.http_bind_port, 7080);
    assert_eq!(config.rpc_url, "https://api.mainnet-beta.solana.com");
    assert_eq!(
        config.token_mint,
        "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
    );
    assert_eq!(config.amount_tolerance, Decimal::new(1, 2));
    assert_eq!(config.default_expiry_secs, 300);
    assert_eq!(config.extension_window_secs, 120);
    assert_eq!(config.stream_ceiling_secs, 900);
    assert!(config.http_password.is_none());
    assert!(!config.is_auth_enabled());
    assert!(config.merchant_webhooks.endpoints.is_empty());
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spayd.conf");

    let mut config = Config::default();
    config.http_bind_port = 9999;
    config.http_password = Some("hunter2".to_string());
    config.webhook_secret = Some("provider-secret".to_string());
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.http_bind_port, 9999);
    assert_eq!(loaded.http_password.as_deref(), Some("hunter2"));
    assert_eq!(loaded.webhook_secret.as_deref(), Some("provider-secret"));
    assert_eq!(loaded.http_address(), format!("{}:9999", loaded.http_bind_ip));
}

#[test]
fn load_or_create_generates_and_persists_a_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spayd.conf");

    let (config, generated) = Config::load_or_create(&path).unwrap();
    assert!(generated);
    let password = config.http_password.clone().expect("password missing");
    // 32 random bytes, hex encoded
    assert_eq!(password.len(), 64);

    // Second load keeps the same password instead of regenerating
    let (reloaded, generated_again) = Config::load_or_create(&path).unwrap();
    assert!(!generated_again);
    assert_eq!(reloaded.http_password.as_deref(), Some(password.as_str()));
}

#[test]
fn corrupted_config_is_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spayd.conf");
    std::fs::write(&path, "this is { not toml").unwrap();

    let (config, _generated) = Config::load_or_create(&path).unwrap();
    assert_eq!(config.http_bind_port, 7080);
}

#[test]
fn partial_config_files_fill_in_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spayd.conf");
    std::fs::write(
        &path,
        "http-bind-port = 8123\nrpc-url = \"https://rpc.example.com\"\n",
    )
    .unwrap();

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.http_bind_port, 8123);
    assert_eq!(config.rpc_url, "https://rpc.example.com");
    // Unspecified keys fall back to defaults
    assert_eq!(config.default_expiry_secs, 300);
    assert_eq!(config.stream_keepalive_secs, 15);
}
