#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use mural_hub::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
hub:
  listen: "0.0.0.0:8080"
  comand_timeout_ms: 5000 # typo should fail
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(err.to_string().contains("config"));
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.hub.listen, "0.0.0.0:8080");
    assert_eq!(cfg.hub.set_image_timeout_ms, 60_000);
}

#[test]
fn bad_listen_rejected() {
    let bad = r#"
version: 1
hub:
  listen: "not-an-addr"
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn wrong_version_rejected() {
    let bad = "version: 2\n";
    assert!(config::load_from_str(bad).is_err());
}
