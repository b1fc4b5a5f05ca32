//! End-to-end ceremonies against real operator servers on loopback.

use std::time::Duration;

use alloy_primitives::keccak256;
use k256::ecdsa::SigningKey;
use rand::RngCore;
use ssz_types::VariableList;
use tree_hash::TreeHash;

use dkg_crypto::bls::{PublicKey, Signature};
use dkg_crypto::deposit::{self, Network};
use dkg_crypto::rsa as rsa_ops;
use initiator::{
    load_operators_json, Initiator, NoContractVerifier, OperatorInfoJson,
};
use operator::{router, Switch, SwitchConfig};
use wire::SignedReshare;

const VERSION: &str = "v1.0.2";

struct TestOperator {
    id: u64,
    public_key_b64: String,
    addr: String,
}

async fn spawn_operator(id: u64, version: &str) -> TestOperator {
    let (private, public) = rsa_ops::generate_rsa_keys().unwrap();
    let encoded = rsa_ops::encode_public_key(&public).unwrap();
    let mut config = SwitchConfig::new(private, version.as_bytes().to_vec());
    config.phase_window = Duration::from_millis(300);
    let switch = Switch::new(config).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, router(switch)).await.unwrap();
    });
    TestOperator {
        id,
        public_key_b64: String::from_utf8(encoded).unwrap(),
        addr,
    }
}

fn registry_json(ops: &[&TestOperator]) -> Vec<u8> {
    let entries: Vec<OperatorInfoJson> = ops
        .iter()
        .map(|op| OperatorInfoJson {
            ip: op.addr.clone(),
            id: op.id,
            public_key: op.public_key_b64.clone(),
        })
        .collect();
    serde_json::to_vec(&entries).unwrap()
}

fn make_initiator(ops: &[&TestOperator], version: &str) -> Initiator {
    let (private, _) = rsa_ops::generate_rsa_keys().unwrap();
    let operators = load_operators_json(&registry_json(ops)).unwrap();
    Initiator::new(private, operators, version).unwrap()
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

fn owner_key_and_address() -> (SigningKey, [u8; 20]) {
    let key = SigningKey::random(&mut rand::rngs::OsRng);
    let encoded = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    (key, address)
}

#[tokio::test]
async fn full_ceremony_lifecycle() {
    let mut operators = Vec::new();
    for id in 1..=4u64 {
        operators.push(spawn_operator(id, VERSION).await);
    }
    let refs: Vec<&TestOperator> = operators.iter().collect();
    let initiator = make_initiator(&refs, VERSION);

    let (owner_key, owner) = owner_key_and_address();
    let withdraw: [u8; 20] = random_bytes();
    let id = dkg_crypto::new_request_id();

    let (deposit_json, keyshares, proofs) = initiator
        .start_dkg(id, withdraw, &[1, 2, 3, 4], Network::Mainnet, owner, 0)
        .await
        .unwrap();

    // Deposit data checks.
    assert_eq!(deposit_json.amount, 32_000_000_000);
    assert_eq!(deposit_json.network_name, "mainnet");
    assert_eq!(deposit_json.pubkey.len(), 96);
    initiator::validate_deposit_json(&deposit_json).unwrap();

    // The recovered master signature verifies against the validator key.
    let validator_bytes: [u8; 48] = hex::decode(&deposit_json.pubkey)
        .unwrap()
        .try_into()
        .unwrap();
    let validator = PublicKey::from_bytes(&validator_bytes).unwrap();
    let root = deposit::deposit_signing_root(
        &validator_bytes,
        &withdraw,
        Network::Mainnet.fork_version(),
        deposit_json.amount,
    )
    .unwrap();
    let master: [u8; 96] = hex::decode(&deposit_json.signature)
        .unwrap()
        .try_into()
        .unwrap();
    assert!(validator.verify(&root, &Signature::from_bytes(&master).unwrap()));

    // Keyshares payload shape.
    let item = &keyshares.shares[0];
    assert_eq!(item.payload.operator_ids, vec![1, 2, 3, 4]);
    assert_eq!(
        item.payload.shares_data.len(),
        2 + 2 * (96 + 4 * (48 + 256))
    );
    assert_eq!(proofs.len(), 4);

    // A second ceremony reusing the same request id is refused.
    let err = initiator
        .start_dkg(id, withdraw, &[1, 2, 3, 4], Network::Mainnet, owner, 0)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("got init msg for existing instance"),
        "got: {err}"
    );

    // All four operators answer pings.
    let report = initiator.health_check(&[1, 2, 3, 4]).await.unwrap();
    for entry in report {
        let pong = entry.unwrap();
        assert_eq!(pong.version, VERSION);
    }

    // Re-sign an arbitrary root with the existing shares.
    let signing_root: [u8; 32] = random_bytes();
    let resign_id = dkg_crypto::new_request_id();
    let master_sig = initiator
        .resign(resign_id, &keyshares, signing_root)
        .await
        .unwrap();
    assert!(validator.verify(&signing_root, &Signature::from_bytes(&master_sig).unwrap()));

    // Reshare to a brand new committee.
    let mut new_operators = Vec::new();
    for new_id in 5..=8u64 {
        new_operators.push(spawn_operator(new_id, VERSION).await);
    }
    let mut all_refs: Vec<&TestOperator> = operators.iter().collect();
    all_refs.extend(new_operators.iter());
    let reshare_initiator = make_initiator(&all_refs, VERSION);

    let reshare = reshare_initiator
        .build_reshare_message(&keyshares, &[5, 6, 7, 8], 1)
        .unwrap();
    let reshare_root: [u8; 32] = reshare.tree_hash_root().0;
    let (signature, recovery) = owner_key.sign_prehash_recoverable(&reshare_root).unwrap();
    let mut owner_sig = signature.to_bytes().to_vec();
    owner_sig.push(recovery.to_byte() + 27);
    let signed = SignedReshare {
        reshare,
        signature: VariableList::new(owner_sig).unwrap(),
    };

    let reshare_id = dkg_crypto::new_request_id();
    let (new_keyshares, new_proofs) = reshare_initiator
        .start_resharing(reshare_id, signed, &proofs, &NoContractVerifier)
        .await
        .unwrap();

    let new_item = &new_keyshares.shares[0];
    assert_eq!(new_item.payload.operator_ids, vec![5, 6, 7, 8]);
    assert_eq!(new_item.payload.public_key, item.payload.public_key);
    assert_eq!(new_item.data.owner_nonce, 1);
    assert_eq!(new_proofs.len(), 4);

    // The new committee can sign for the same validator key.
    let reshare_resign_root: [u8; 32] = random_bytes();
    let sig = reshare_initiator
        .resign(dkg_crypto::new_request_id(), &new_keyshares, reshare_resign_root)
        .await
        .unwrap();
    assert!(validator.verify(&reshare_resign_root, &Signature::from_bytes(&sig).unwrap()));
}

#[tokio::test]
async fn seven_operator_ceremony_reaches_threshold() {
    let mut operators = Vec::new();
    for id in 1..=7u64 {
        operators.push(spawn_operator(id, VERSION).await);
    }
    let refs: Vec<&TestOperator> = operators.iter().collect();
    let initiator = make_initiator(&refs, VERSION);

    let (_, owner) = owner_key_and_address();
    let withdraw: [u8; 20] = random_bytes();
    let (deposit_json, keyshares, _) = initiator
        .start_dkg(
            dkg_crypto::new_request_id(),
            withdraw,
            &[1, 2, 3, 4, 5, 6, 7],
            Network::Holesky,
            owner,
            3,
        )
        .await
        .unwrap();
    assert_eq!(deposit_json.network_name, "holesky");
    assert_eq!(keyshares.shares[0].payload.operator_ids.len(), 7);

    // The payload head carries the recovered owner/nonce master signature.
    let blob_hex = keyshares.shares[0].payload.shares_data.clone();
    let blob = hex::decode(blob_hex.trim_start_matches("0x")).unwrap();
    let parsed = wire::parse_shares_blob(&blob, 7).unwrap();
    let validator =
        PublicKey::from_bytes(&hex::decode(&deposit_json.pubkey).unwrap()).unwrap();
    let digest = deposit::owner_nonce_digest(&owner, 3);
    let master = Signature::from_bytes(&parsed.signature).unwrap();
    assert!(validator.verify(&digest, &master));
}

#[tokio::test]
async fn version_skew_aborts_the_ceremony() {
    let mut operators = Vec::new();
    for id in 1..=4u64 {
        operators.push(spawn_operator(id, VERSION).await);
    }
    let refs: Vec<&TestOperator> = operators.iter().collect();
    let initiator = make_initiator(&refs, "v1.0.0");

    let (_, owner) = owner_key_and_address();
    let err = initiator
        .start_dkg(
            dkg_crypto::new_request_id(),
            random_bytes(),
            &[1, 2, 3, 4],
            Network::Mainnet,
            owner,
            0,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("wrong version"), "got: {err}");
}

#[tokio::test]
async fn unknown_operator_is_rejected_before_any_network_io() {
    let operators = [
        spawn_operator(6, VERSION).await,
        spawn_operator(7, VERSION).await,
        spawn_operator(8, VERSION).await,
        spawn_operator(9, VERSION).await,
    ];
    let refs: Vec<&TestOperator> = operators.iter().collect();
    let initiator = make_initiator(&refs, VERSION);

    let (_, owner) = owner_key_and_address();
    let err = initiator
        .start_dkg(
            dkg_crypto::new_request_id(),
            random_bytes(),
            &[101, 6, 7, 8],
            Network::Mainnet,
            owner,
            0,
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "operator is not in given operator data list");
}
