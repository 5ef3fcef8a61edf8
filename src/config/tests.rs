//! Tests for configuration module.

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn create_temp_config() -> NamedTempFile {
    let config_content = r#"
[general]
ports = "8080,8083s"
document_root = "/srv/shim/wwwroot"
scidb_host = "coordinator.local"
scidb_port = 1240
tmp_dir = "/dev/shm"
max_sessions = 24
session_timeout = 120
save_instance_id = 2
use_aio = true
"#;
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[tokio::test]
#[serial_test::serial]
async fn test_config() {
    let temp_file = create_temp_config();
    let file_path = temp_file.path().to_str().unwrap();

    parse(file_path).await.unwrap();

    let config = get_config();
    assert_eq!(config.general.ports, "8080,8083s");
    assert_eq!(config.general.scidb_host, "coordinator.local");
    assert_eq!(config.general.scidb_port, 1240);
    assert_eq!(config.general.tmp_dir, "/dev/shm");
    assert_eq!(config.general.max_sessions, 24);
    assert_eq!(config.general.session_timeout, 120);
    assert_eq!(config.general.save_instance_id, 2);
    assert!(config.general.use_aio);
    // untouched fields keep their defaults
    assert_eq!(config.general.scidb_proc_name, "SciDB");

    set_config(Config::default());
}

#[test]
fn test_validate_rejects_out_of_range_values() {
    let mut config = Config::default();
    config.general.max_sessions = MAX_SESSIONS_LIMIT + 1;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.general.max_sessions = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.general.session_timeout = MIN_SESSION_TIMEOUT - 1;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.general.ports = "8080,http".to_string();
    assert!(config.validate().is_err());

    assert!(Config::default().validate().is_ok());
}

#[test]
fn test_parse_ports() {
    let ports = parse_ports("8080,8083s").unwrap();
    assert_eq!(
        ports,
        vec![
            ListenPort {
                port: 8080,
                tls: false
            },
            ListenPort {
                port: 8083,
                tls: true
            },
        ]
    );

    assert!(parse_ports("").is_err());
    assert!(parse_ports("s").is_err());
    assert_eq!(parse_ports(" 9090 ").unwrap().len(), 1);
}
