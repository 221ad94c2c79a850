#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use dcsbus_controller::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
controller:
  hook_version: "1.1"
installations:
  - id: "DCS.server1"
    server_name: "Alpha"
    dcs_prot: 6666 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
controller:
  hook_version: "1.1"
  agent: "node-a"
installations:
  - id: "DCS.server1"
    server_name: "Alpha"
    dcs_port: 6666
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.controller.listen, "127.0.0.1:10081");
    assert_eq!(cfg.controller.agent, "node-a");
    assert_eq!(cfg.store.pool_size, 4);
    assert_eq!(cfg.installations[0].dcs_host, "127.0.0.1");
    assert_eq!(cfg.controller.register_secs_per_server(), 3);
}

#[test]
fn duplicate_server_names_are_rejected() {
    let bad = r#"
version: 1
controller:
  hook_version: "1.1"
installations:
  - { id: "DCS.a", server_name: "Alpha", dcs_port: 6666 }
  - { id: "DCS.b", server_name: "Alpha", dcs_port: 6667 }
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(err.to_string().contains("duplicate server_name"));
}

#[test]
fn invalid_listen_address_is_rejected() {
    let bad = r#"
version: 1
controller:
  listen: "not-an-addr"
  hook_version: "1.1"
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn pool_size_range_is_enforced() {
    let bad = r#"
version: 1
controller:
  hook_version: "1.1"
store:
  pool_size: 0
"#;
    assert!(config::load_from_str(bad).is_err());
}
