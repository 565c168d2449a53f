use std::cell::{Cell, RefCell};
use std::io::Cursor;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use tradfri_blink::pairing::{self, CredentialSource};
use tradfri_blink::{
    Command, CredentialStore, Effects, Error, KeyExchange, Pairing, Result, SecurityCode, Session,
    Transport,
};

#[derive(Default)]
struct FakeGateway {
    pairings: Cell<usize>,
    sent: RefCell<Vec<String>>,
}

impl KeyExchange for FakeGateway {
    async fn generate_psk(&self, _identity: &str, code: &SecurityCode) -> Result<String> {
        assert_eq!(code.as_str(), "1234567890123456");
        self.pairings.set(self.pairings.get() + 1);
        Ok("fresh-psk".into())
    }
}

impl Transport for &FakeGateway {
    async fn request(&self, command: &Command) -> Result<Vec<u8>> {
        self.sent.borrow_mut().push(command.to_string());
        let body = match command.path_string().as_str() {
            "15001" => json!([65537, 65538]),
            "15001/65537" => json!({ "9003": 65537, "9001": "bath", "3311": [{ "5850": 1 }] }),
            "15001/65538" => json!({ "9003": 65538, "9001": "hall", "3311": [{ "5850": 1 }] }),
            "15004" | "15005" | "15010" => json!([]),
            "15011/15012" => json!({ "9029": "1.3.0014", "9054": 0, "9083": "911-22-333" }),
            _ => return Ok(Vec::new()),
        };
        Ok(serde_json::to_vec(&body)?)
    }
}

#[test]
fn first_run_pairs_then_fetches_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("tradfri_standalone_psk.conf"));
    let gateway = FakeGateway::default();

    let source = CredentialSource::select(&store.load_or_default(), "192.168.0.108", None);
    assert_eq!(source, CredentialSource::Prompt);
    let acquired = source
        .resolve(&mut Cursor::new("1234567890123456\n"), &mut Vec::<u8>::new())
        .unwrap();
    let record = smol::block_on(pairing::bootstrap(
        &store,
        "192.168.0.108",
        acquired,
        &gateway,
    ))
    .unwrap();

    assert_eq!(gateway.pairings.get(), 1);
    let stored = store.load().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored["192.168.0.108"], record);
    assert_eq!(record.key, "fresh-psk");

    let session = Session::new(&gateway);
    let snapshot = smol::block_on(session.snapshot()).unwrap();
    assert_eq!(snapshot.lights.len(), 2);
    assert_eq!(snapshot.gateway.firmware_version, "1.3.0014");
    assert_eq!(snapshot.gateway.homekit_id.as_deref(), Some("911-22-333"));
}

#[test]
fn second_run_reuses_stored_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("psk.conf"));
    let gateway = FakeGateway::default();
    let code = SecurityCode::new("1234567890123456").unwrap();

    let first = smol::block_on(pairing::bootstrap(
        &store,
        "gw",
        Pairing::Unpaired(code),
        &gateway,
    ))
    .unwrap();

    let source = CredentialSource::select(&store.load().unwrap(), "gw", Some("ignored".into()));
    let acquired = source
        .resolve(&mut Cursor::new(""), &mut Vec::<u8>::new())
        .unwrap();
    let second = smol::block_on(pairing::bootstrap(&store, "gw", acquired, &gateway)).unwrap();

    assert_eq!(first, second);
    assert_eq!(gateway.pairings.get(), 1);
}

#[test]
fn wrong_length_code_never_reaches_gateway() {
    let result = CredentialSource::Prompt.resolve(&mut Cursor::new("12345\n"), &mut Vec::<u8>::new());

    assert!(matches!(result, Err(Error::InvalidSecurityCode { length: 5 })));
}

#[test]
fn shared_colour_blink_sends_six_commands() {
    let gateway = FakeGateway::default();
    let session = Session::new(&gateway);
    let snapshot = smol::block_on(session.snapshot()).unwrap();
    gateway.sent.borrow_mut().clear();

    let mut effects = Effects::new(&session, &snapshot.lights, StdRng::seed_from_u64(3));
    smol::block_on(effects.blink_on_off(
        Duration::ZERO,
        Duration::ZERO,
        Duration::ZERO,
        false,
    ))
    .unwrap();

    let sent = gateway.sent.borrow();
    assert_eq!(
        *sent,
        vec![
            r#"PUT 15001/65537 {"3311":[{"5709":25022,"5710":24884}]}"#,
            r#"PUT 15001/65538 {"3311":[{"5709":25022,"5710":24884}]}"#,
            r#"PUT 15001/65537 {"3311":[{"5712":0,"5851":100}]}"#,
            r#"PUT 15001/65538 {"3311":[{"5712":0,"5851":100}]}"#,
            r#"PUT 15001/65537 {"3311":[{"5712":0,"5851":0}]}"#,
            r#"PUT 15001/65538 {"3311":[{"5712":0,"5851":0}]}"#,
        ]
    );
}
