//! Datagram decode vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use dcsbus_core::protocol::{decode_datagram, Registration};

use vector_loader::load;

#[test]
fn datagram_vectors() {
    let files = [
        "envelope_min.json",
        "envelope_reply.json",
        "envelope_registration.json",
        "missing_server_name.json",
        "missing_command.json",
        "not_json.json",
    ];

    for f in files {
        let v = load(f);
        let res = decode_datagram(v.datagram.as_bytes());

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let env = res.expect("expected ok envelope");
        let ex = v.expect.expect("missing expect block");

        let desc = &v.description;
        assert_eq!(env.server_name, ex["server_name"].as_str().unwrap(), "vector={desc}");
        assert_eq!(env.command, ex["command"].as_str().unwrap(), "vector={desc}");
        assert_eq!(env.channel.as_deref(), ex["channel"].as_str(), "vector={desc}");
        assert_eq!(env.sync_token().is_some(), ex["sync"].as_bool().unwrap(), "vector={desc}");
        assert_eq!(env.fields.len() as u64, ex["fields"].as_u64().unwrap(), "vector={desc}");
    }
}

#[test]
fn registration_vector_parses() {
    let v = load("envelope_registration.json");
    let env = decode_datagram(v.datagram.as_bytes()).unwrap();
    assert!(env.is_registration());

    let reg = Registration::from_envelope(&env).unwrap();
    assert_eq!(reg.hook_version, "1.1");
    assert_eq!(reg.host, "127.0.0.1");
    assert_eq!(reg.port, 6666);
    assert_eq!(reg.dcs_version.as_deref(), Some("2.8.1.34667"));
    assert!(reg.has_mission());
    assert!(reg.pause);
    assert_eq!(reg.server_settings["name"], "Alpha");
}
