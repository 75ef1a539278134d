use std::io::Write;

use hydrolink::{Config, Error};

#[test]
fn loads_file_and_fills_credentials_from_cli() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[polling]
interval_secs = 120

[mqtt]
host = "broker.local"
topic_prefix = "home/softener"
"#
    )
    .unwrap();

    let config = Config::load(file.path())
        .unwrap()
        .with_credentials(Some("me@example.com".into()), Some("secret".into()));
    config.validate().unwrap();

    assert_eq!(config.polling.interval_secs, 120);
    assert_eq!(config.polling.retry_attempts, 3);
    assert_eq!(config.websocket.message_limit, 17);
    let mqtt = config.mqtt.unwrap();
    assert_eq!(mqtt.port, 1883);
    assert_eq!(mqtt.topic_prefix, "home/softener");
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
}

#[test]
fn credentials_are_required() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[account]\nemail = \"me@example.com\"").unwrap();

    let config = Config::load(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}
