use std::sync::Arc;
use std::time::Duration;

use openssl::pkey::Private;
use openssl::rsa::Rsa;
use ssz::{Decode, Encode};
use ssz_types::VariableList;

use dkg_crypto::bls::{SecretKey, Signature};
use dkg_crypto::rsa as rsa_ops;
use wire::{
    build_shares_blob, BlsSignRequest, Init, MultipleSignedTransports, Operator, Ping, Pong,
    RequestId, SignedTransport, Transport, TransportType,
};

use crate::switch::{Switch, SwitchConfig, SwitchError};

const VERSION: &[u8] = b"v1.0.2";

struct Initiator {
    private: Rsa<Private>,
    encoded_public: Vec<u8>,
}

fn make_initiator() -> Initiator {
    let (private, public) = rsa_ops::generate_rsa_keys().unwrap();
    Initiator {
        private,
        encoded_public: rsa_ops::encode_public_key(&public).unwrap(),
    }
}

fn sign_transport(key: &Rsa<Private>, transport: Transport, signer: u64) -> Vec<u8> {
    let signature = rsa_ops::sign_rsa(key, &transport.as_ssz_bytes()).unwrap();
    SignedTransport {
        message: transport,
        signer,
        signature: VariableList::new(signature).unwrap(),
    }
    .as_ssz_bytes()
}

struct Fixture {
    switch: Arc<Switch>,
    initiator: Initiator,
    operators: Vec<(u64, Rsa<Private>, Vec<u8>)>,
}

fn make_fixture() -> Fixture {
    let initiator = make_initiator();
    let mut operators = Vec::new();
    for id in 1..=4u64 {
        let (private, public) = rsa_ops::generate_rsa_keys().unwrap();
        let encoded = rsa_ops::encode_public_key(&public).unwrap();
        operators.push((id, private, encoded));
    }
    let mut config = SwitchConfig::new(operators[0].1.clone(), VERSION.to_vec());
    config.phase_window = Duration::from_millis(200);
    Fixture {
        switch: Switch::new(config).unwrap(),
        initiator,
        operators,
    }
}

fn init_body(fixture: &Fixture, id: RequestId) -> Vec<u8> {
    let operators: Vec<Operator> = fixture
        .operators
        .iter()
        .map(|(id, _, encoded)| Operator::new(*id, encoded.clone()).unwrap())
        .collect();
    let init = Init {
        operators: VariableList::new(operators).unwrap(),
        t: 3,
        withdrawal_credentials: VariableList::new(vec![0x11; 20]).unwrap(),
        fork: [0u8; 4],
        owner: [0x22; 20],
        nonce: 0,
        initiator_public_key: VariableList::new(fixture.initiator.encoded_public.clone()).unwrap(),
    };
    let transport =
        Transport::new(TransportType::Init, id, init.as_ssz_bytes(), VERSION).unwrap();
    sign_transport(&fixture.initiator.private, transport, 0)
}

fn ceremony_error(result: Result<Vec<u8>, SwitchError>) -> String {
    match result {
        Err(SwitchError::Ceremony(message)) => message,
        other => panic!("expected ceremony error, got {other:?}"),
    }
}

#[tokio::test]
async fn init_returns_a_signed_exchange() {
    let fixture = make_fixture();
    let body = init_body(&fixture, [1u8; 24]);
    let response = fixture.switch.init_instance(&body).await.unwrap();
    let st = SignedTransport::from_ssz_bytes(&response).unwrap();
    assert_eq!(st.message.msg_type, TransportType::Exchange);
    assert_eq!(st.signer, 1);
    assert_eq!(st.message.identifier, [1u8; 24]);
    let public = rsa_ops::parse_public_key(&fixture.operators[0].2).unwrap();
    rsa_ops::verify_rsa(&public, &st.message.as_ssz_bytes(), &st.signature).unwrap();
}

#[tokio::test]
async fn same_request_id_twice_is_rejected() {
    let fixture = make_fixture();
    let body = init_body(&fixture, [2u8; 24]);
    fixture.switch.init_instance(&body).await.unwrap();
    let err = ceremony_error(fixture.switch.init_instance(&body).await);
    assert_eq!(err, "got init msg for existing instance");
}

#[tokio::test]
async fn unknown_instance_is_a_transport_error() {
    let fixture = make_fixture();
    let bundle = MultipleSignedTransports {
        identifier: [9u8; 24],
        messages: VariableList::new(vec![]).unwrap(),
        signature: VariableList::new(vec![0u8; 16]).unwrap(),
    };
    match fixture.switch.process_message(&bundle.as_ssz_bytes()).await {
        Err(SwitchError::Transport(message)) => {
            assert_eq!(
                message,
                "got message to instance that I don't have, send Init first"
            );
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn version_mismatch_is_rejected() {
    let fixture = make_fixture();
    let transport = Transport::new(TransportType::Init, [3u8; 24], vec![], b"v1.0.0").unwrap();
    let body = sign_transport(&fixture.initiator.private, transport, 0);
    let err = ceremony_error(fixture.switch.init_instance(&body).await);
    assert_eq!(err, "wrong version");
}

#[tokio::test]
async fn tampered_initiator_signature_is_rejected() {
    let fixture = make_fixture();
    let mut body = init_body(&fixture, [4u8; 24]);
    let len = body.len();
    body[len - 1] ^= 0xff;
    let err = ceremony_error(fixture.switch.init_instance(&body).await);
    assert!(err.contains("signature isn't valid"), "got: {err}");
}

#[tokio::test]
async fn instance_cap_is_enforced() {
    let fixture = make_fixture();
    for i in 0..crate::MAX_INSTANCES {
        let mut id = [0u8; 24];
        id[..8].copy_from_slice(&(i as u64).to_le_bytes());
        id[8] = 0xaa;
        fixture.switch.init_instance(&init_body(&fixture, id)).await.unwrap();
    }
    let err = ceremony_error(
        fixture
            .switch
            .init_instance(&init_body(&fixture, [0xbb; 24]))
            .await,
    );
    assert_eq!(err, "max number of instances ongoing, please wait");
}

#[tokio::test]
async fn health_check_returns_a_signed_pong() {
    let fixture = make_fixture();
    let ping = Ping::default();
    let transport =
        Transport::new(TransportType::Ping, [0u8; 24], ping.as_ssz_bytes(), VERSION).unwrap();
    let body = sign_transport(&fixture.initiator.private, transport, 0);
    let response = fixture.switch.health_check(&body).unwrap();
    let st = SignedTransport::from_ssz_bytes(&response).unwrap();
    assert_eq!(st.message.msg_type, TransportType::Pong);
    assert_eq!(st.message.version.to_vec(), VERSION.to_vec());
    let pong = Pong::from_ssz_bytes(&st.message.data).unwrap();
    let public = rsa_ops::parse_public_key(&pong.pub_key).unwrap();
    rsa_ops::verify_rsa(&public, &st.message.as_ssz_bytes(), &st.signature).unwrap();
}

#[tokio::test]
async fn sign_request_decrypts_the_share_and_signs() {
    let fixture = make_fixture();

    // Build a keyshares payload where our operator (id 1) holds a real share.
    let share = SecretKey::random();
    let own_public = rsa_ops::parse_public_key(&fixture.operators[0].2).unwrap();
    let encrypted = rsa_ops::encrypt_share(&own_public, share.serialize_hex().as_bytes()).unwrap();
    let mut entries = vec![(share.public_key().to_bytes(), encrypted)];
    for _ in 1..4 {
        let other = SecretKey::random();
        entries.push((other.public_key().to_bytes(), vec![0u8; 256]));
    }
    let blob = build_shares_blob(&[0u8; 96], &entries).unwrap();

    let operators: Vec<Operator> = fixture
        .operators
        .iter()
        .map(|(id, _, encoded)| Operator::new(*id, encoded.clone()).unwrap())
        .collect();
    let request = BlsSignRequest {
        operators: VariableList::new(operators).unwrap(),
        t: 3,
        keyshares: VariableList::new(blob).unwrap(),
        signing_root: [0x5a; 32],
        initiator_public_key: VariableList::new(fixture.initiator.encoded_public.clone()).unwrap(),
    };
    let transport = Transport::new(
        TransportType::BlsSignRequest,
        [5u8; 24],
        request.as_ssz_bytes(),
        VERSION,
    )
    .unwrap();
    let body = sign_transport(&fixture.initiator.private, transport, 0);

    let response = fixture.switch.init_instance(&body).await.unwrap();
    let st = SignedTransport::from_ssz_bytes(&response).unwrap();
    assert_eq!(st.message.msg_type, TransportType::BlsSignRequest);
    assert_eq!(st.signer, 1);
    let signature = Signature::from_bytes(&st.message.data).unwrap();
    assert!(share.public_key().verify(&[0x5a; 32], &signature));
}
