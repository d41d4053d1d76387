use std::path::PathBuf;
use std::time::Duration;

use craftplane::{config::GlobalConfig, AppError};

#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.port, 8080);
    assert_eq!(config.identity_length, 6);
    assert_eq!(config.build_dir, PathBuf::from("build"));
    assert_eq!(config.stop_command, "stop");
    assert!(config.jvm_flags.iter().any(|f| f == "-Dcom.mojang.eula.agree=true"));
}

#[test]
fn overrides_are_applied() {
    let config = GlobalConfig::from_toml_str(
        r#"
listen_address = "127.0.0.1"
port = 9000
build_dir = "/srv/craft"
java_binary = "/opt/java/bin/java"
jvm_flags = ["-XX:+UseZGC"]
identity_length = 10
client_buffer = 32
startup_timeout_seconds = 5
shutdown_grace_seconds = 2
retained_logs = 3

[paper]
download_url = "http://mirror.local/paper/{version}.jar"

[spigot]
build_tools_url = "http://mirror.local/BuildTools.jar"
"#,
    )
    .expect("valid config");

    assert_eq!(config.port, 9000);
    assert_eq!(config.jvm_flags, vec!["-XX:+UseZGC".to_owned()]);
    assert_eq!(config.identity_length, 10);
    assert_eq!(config.startup_timeout(), Duration::from_secs(5));
    assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
    assert_eq!(config.jars_dir(), PathBuf::from("/srv/craft/jars"));
    assert_eq!(config.tools_dir(), PathBuf::from("/srv/craft/tools"));
    assert_eq!(config.servers_dir(), PathBuf::from("/srv/craft/servers"));
    assert_eq!(config.spigot.build_tools_url, "http://mirror.local/BuildTools.jar");
}

#[test]
fn identity_length_out_of_range_is_rejected() {
    for raw in ["identity_length = 3", "identity_length = 65"] {
        let result = GlobalConfig::from_toml_str(raw);
        assert!(matches!(result, Err(AppError::Config(_))), "{raw}");
    }
}

#[test]
fn zero_client_buffer_is_rejected() {
    let result = GlobalConfig::from_toml_str("client_buffer = 0");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn zero_startup_timeout_is_rejected() {
    let result = GlobalConfig::from_toml_str("startup_timeout_seconds = 0");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn paper_url_without_placeholder_is_rejected() {
    let result = GlobalConfig::from_toml_str(
        r#"
[paper]
download_url = "http://mirror.local/paper.jar"
"#,
    );
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn malformed_toml_is_config_error() {
    let result = GlobalConfig::from_toml_str("port = \"not a number\"");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn load_from_missing_path_is_config_error() {
    let result = GlobalConfig::load_from_path("/nonexistent/craftplane.toml");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("craftplane.toml");
    std::fs::write(&path, "port = 7000\n").expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load config");
    assert_eq!(config.port, 7000);
}
