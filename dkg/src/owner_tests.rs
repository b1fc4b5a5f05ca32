use openssl::pkey::Private;
use openssl::rsa::Rsa;
use ssz::{Decode, Encode};
use ssz_types::VariableList;
use tokio::sync::mpsc;

use dkg_crypto::bls::{PublicKey, SecretKey, Signature};
use dkg_crypto::deposit::{self, Network, MAX_EFFECTIVE_BALANCE_GWEI};
use dkg_crypto::rsa as rsa_ops;
use dkg_crypto::threshold;
use wire::{
    build_shares_blob, CeremonyResult, Init, Operator, Reshare, SignedTransport, TransportType,
};

use crate::{LocalOwner, OwnerOpts, PhaseTimer};

const VERSION: &[u8] = b"v1.0.2";

struct TestOperator {
    id: u64,
    private: Rsa<Private>,
    encoded_public: Vec<u8>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

fn make_operators(ids: &[u64]) -> Vec<TestOperator> {
    ids.iter()
        .map(|&id| {
            let (private, public) = rsa_ops::generate_rsa_keys().unwrap();
            let encoded_public = rsa_ops::encode_public_key(&public).unwrap();
            let (tx, rx) = mpsc::unbounded_channel();
            TestOperator {
                id,
                private,
                encoded_public,
                rx,
                tx,
            }
        })
        .collect()
}

fn wire_operators(ops: &[TestOperator]) -> VariableList<Operator, ssz_types::typenum::U13> {
    VariableList::new(
        ops.iter()
            .map(|op| Operator::new(op.id, op.encoded_public.clone()).unwrap())
            .collect(),
    )
    .unwrap()
}

fn recv_signed(op: &mut TestOperator) -> SignedTransport {
    let bytes = op.rx.try_recv().expect("a broadcast should be queued");
    SignedTransport::from_ssz_bytes(&bytes).unwrap()
}

fn opts(op: &TestOperator) -> OwnerOpts {
    OwnerOpts {
        operator_id: op.id,
        private_key: op.private.clone(),
        version: VERSION.to_vec(),
        outbound: op.tx.clone(),
    }
}

fn sample_init(ops: &[TestOperator], owner: [u8; 20], nonce: u64) -> Init {
    Init {
        operators: wire_operators(ops),
        t: (ops.len() - (ops.len() - 1) / 3) as u64,
        withdrawal_credentials: VariableList::new(vec![0x11; 20]).unwrap(),
        fork: Network::Mainnet.fork_version(),
        owner,
        nonce,
        initiator_public_key: VariableList::new(b"unused-in-owner-tests".to_vec()).unwrap(),
    }
}

/// Drives a full ceremony across the given owners: exchange fan-in, deal
/// fan-in, then the response-phase timeout. Returns whatever each owner
/// broadcast last (outputs), by owner index.
fn drive_ceremony(owners: &mut [LocalOwner], ops: &mut [TestOperator]) -> Vec<Option<SignedTransport>> {
    let exchanges: Vec<SignedTransport> = ops.iter_mut().map(recv_signed).collect();
    for owner in owners.iter_mut() {
        for exchange in &exchanges {
            owner.process(exchange).unwrap();
        }
    }

    let mut deals = Vec::new();
    for op in ops.iter_mut() {
        if let Ok(bytes) = op.rx.try_recv() {
            deals.push(SignedTransport::from_ssz_bytes(&bytes).unwrap());
        }
    }
    for owner in owners.iter_mut() {
        for deal in &deals {
            owner.process(deal).unwrap();
        }
    }

    let mut outputs = Vec::new();
    for (owner, op) in owners.iter_mut().zip(ops.iter_mut()) {
        let next = owner.on_phase_timeout(PhaseTimer::Response).unwrap();
        assert!(next.is_none(), "happy path should not need justifications");
        outputs.push(
            op.rx
                .try_recv()
                .ok()
                .map(|bytes| SignedTransport::from_ssz_bytes(&bytes).unwrap()),
        );
    }
    outputs
}

fn decode_results(outputs: Vec<Option<SignedTransport>>) -> Vec<CeremonyResult> {
    outputs
        .into_iter()
        .flatten()
        .map(|st| {
            assert_eq!(st.message.msg_type, TransportType::Output);
            CeremonyResult::decode(&st.message.data).unwrap()
        })
        .collect()
}

#[test]
fn four_operator_ceremony_produces_verifiable_outputs() {
    let owner_address = [0x42u8; 20];
    let nonce = 0u64;
    let request_id = [7u8; 24];
    let mut ops = make_operators(&[1, 2, 3, 4]);
    let init = sample_init(&ops, owner_address, nonce);

    let mut owners: Vec<LocalOwner> = ops
        .iter()
        .map(|op| LocalOwner::new_init(opts(op), request_id, init.clone()).unwrap())
        .collect();
    let results = decode_results(drive_ceremony(&mut owners, &mut ops));
    assert_eq!(results.len(), 4);

    let validator = results[0].validator_pubkey;
    let validator_pk = PublicKey::from_bytes(&validator).unwrap();
    let root = deposit::deposit_signing_root(
        &validator,
        &init.withdrawal_credentials,
        init.fork,
        MAX_EFFECTIVE_BALANCE_GWEI,
    )
    .unwrap();
    let digest = deposit::owner_nonce_digest(&owner_address, nonce);

    let mut deposit_partials = Vec::new();
    let mut share_pubkeys = Vec::new();
    for result in &results {
        assert_eq!(result.validator_pubkey, validator);
        assert_eq!(&result.commits[..48], validator.as_slice());

        let share_pk = PublicKey::from_bytes(&result.share_pubkey).unwrap();
        let deposit_sig =
            Signature::from_bytes(result.deposit_partial_signature.as_ref().unwrap()).unwrap();
        assert!(share_pk.verify(&root, &deposit_sig));
        let nonce_sig = Signature::from_bytes(&result.owner_nonce_partial_signature).unwrap();
        assert!(share_pk.verify(&digest, &nonce_sig));

        // The encrypted share must round-trip with the operator key and
        // match the published share public key.
        let op = ops
            .iter()
            .find(|o| o.id == result.operator_id)
            .unwrap();
        let plain = rsa_ops::decrypt_share(&op.private, &result.encrypted_share).unwrap();
        let share_sk = SecretKey::deserialize_hex(&String::from_utf8(plain).unwrap()).unwrap();
        assert_eq!(share_sk.public_key().to_bytes(), result.share_pubkey);

        // The proof is RSA-signed by the operator.
        let proof_pub = rsa_ops::parse_public_key(&op.encoded_public).unwrap();
        rsa_ops::verify_rsa(
            &proof_pub,
            &result.signed_proof.proof.as_ssz_bytes(),
            &result.signed_proof.signature,
        )
        .unwrap();

        deposit_partials.push((result.operator_id, deposit_sig));
        share_pubkeys.push((result.operator_id, share_pk));
    }

    // Any three of four shares recover the key and the deposit signature.
    let recovered =
        threshold::recover_and_verify_signature(&deposit_partials[..3], &validator_pk, &root)
            .unwrap();
    assert!(validator_pk.verify(&root, &recovered));
    let recovered_pk = threshold::recover_validator_public_key(&share_pubkeys[1..]).unwrap();
    assert_eq!(recovered_pk.to_bytes(), validator);
}

#[test]
fn resharing_to_a_new_committee_preserves_the_validator_key() {
    let owner_address = [0x24u8; 20];
    let request_id = [8u8; 24];
    let mut old_ops = make_operators(&[1, 2, 3, 4]);
    let init = sample_init(&old_ops, owner_address, 0);
    let mut owners: Vec<LocalOwner> = old_ops
        .iter()
        .map(|op| LocalOwner::new_init(opts(op), request_id, init.clone()).unwrap())
        .collect();
    let results = decode_results(drive_ceremony(&mut owners, &mut old_ops));
    let validator = results[0].validator_pubkey;

    // Assemble the keyshares payload the way the orchestrator does.
    let nonce_partials: Vec<(u64, Signature)> = results
        .iter()
        .map(|r| {
            (
                r.operator_id,
                Signature::from_bytes(&r.owner_nonce_partial_signature).unwrap(),
            )
        })
        .collect();
    let master_nonce_sig = threshold::recover_signature(&nonce_partials).unwrap();
    let entries: Vec<([u8; 48], Vec<u8>)> = results
        .iter()
        .map(|r| (r.share_pubkey, r.encrypted_share.clone()))
        .collect();
    let blob = build_shares_blob(&master_nonce_sig.to_bytes(), &entries).unwrap();

    let mut new_ops = make_operators(&[5, 6, 7, 8]);
    let reshare = Reshare {
        validator_pubkey: ssz_types::FixedVector::new(validator.to_vec()).unwrap(),
        old_operators: wire_operators(&old_ops),
        new_operators: wire_operators(&new_ops),
        old_t: 3,
        new_t: 3,
        owner: ssz_types::FixedVector::new(owner_address.to_vec()).unwrap(),
        nonce: 1,
        keyshares: VariableList::new(blob).unwrap(),
        initiator_public_key: VariableList::new(b"unused".to_vec()).unwrap(),
    };

    let reshare_id = [9u8; 24];
    // Old committee uses fresh channels for the second ceremony.
    let mut all_ops = Vec::new();
    all_ops.append(&mut old_ops);
    all_ops.append(&mut new_ops);
    for op in all_ops.iter_mut() {
        let (tx, rx) = mpsc::unbounded_channel();
        op.tx = tx;
        op.rx = rx;
    }
    let mut reshare_owners: Vec<LocalOwner> = all_ops
        .iter()
        .map(|op| LocalOwner::new_reshare(opts(op), reshare_id, reshare.clone()).unwrap())
        .collect();
    let outputs = drive_ceremony(&mut reshare_owners, &mut all_ops);

    // Old-only members finish silently; the new committee publishes outputs.
    for (op, output) in all_ops.iter().zip(outputs.iter()) {
        if op.id <= 4 {
            assert!(output.is_none(), "old-only operator must not publish");
        } else {
            assert!(output.is_some());
        }
    }
    let new_results = decode_results(outputs);
    assert_eq!(new_results.len(), 4);
    let digest = deposit::owner_nonce_digest(&owner_address, 1);
    let mut partials = Vec::new();
    for result in &new_results {
        assert_eq!(result.validator_pubkey, validator);
        assert!(result.deposit_partial_signature.is_none());
        let share_pk = PublicKey::from_bytes(&result.share_pubkey).unwrap();
        let sig = Signature::from_bytes(&result.owner_nonce_partial_signature).unwrap();
        assert!(share_pk.verify(&digest, &sig));
        partials.push((result.operator_id, sig));
    }
    let validator_pk = PublicKey::from_bytes(&validator).unwrap();
    threshold::recover_and_verify_signature(&partials[..3], &validator_pk, &digest).unwrap();
}

#[test]
fn version_mismatch_is_rejected() {
    let request_id = [1u8; 24];
    let mut ops = make_operators(&[1, 2, 3, 4]);
    let init = sample_init(&ops, [0u8; 20], 0);
    let mut owner = LocalOwner::new_init(opts(&ops[0]), request_id, init.clone()).unwrap();
    let _own_exchange = recv_signed(&mut ops[0]);

    let _peer = LocalOwner::new_init(opts(&ops[1]), request_id, init).unwrap();
    let mut exchange = recv_signed(&mut ops[1]);
    exchange.message.version = VariableList::new(b"v1.0.0".to_vec()).unwrap();
    let err = owner.process(&exchange).unwrap_err();
    assert_eq!(err.to_string(), "wrong version");
}

#[test]
fn duplicate_exchange_is_rejected() {
    let request_id = [2u8; 24];
    let mut ops = make_operators(&[1, 2, 3, 4]);
    let init = sample_init(&ops, [0u8; 20], 0);
    let mut owner = LocalOwner::new_init(opts(&ops[0]), request_id, init.clone()).unwrap();
    let _own = recv_signed(&mut ops[0]);
    let _peer = LocalOwner::new_init(opts(&ops[1]), request_id, init).unwrap();
    let exchange = recv_signed(&mut ops[1]);
    owner.process(&exchange).unwrap();
    let err = owner.process(&exchange).unwrap_err();
    assert_eq!(err.to_string(), "duplicate message");
}

#[test]
fn message_for_another_ceremony_is_rejected() {
    let mut ops = make_operators(&[1, 2, 3, 4]);
    let init = sample_init(&ops, [0u8; 20], 0);
    let mut owner = LocalOwner::new_init(opts(&ops[0]), [3u8; 24], init.clone()).unwrap();
    let _own = recv_signed(&mut ops[0]);
    let _peer = LocalOwner::new_init(opts(&ops[1]), [4u8; 24], init).unwrap();
    let exchange = recv_signed(&mut ops[1]);
    let err = owner.process(&exchange).unwrap_err();
    assert!(err.to_string().contains("wrong ceremony identifier"));
}

#[test]
fn wrong_committee_sizes_are_rejected() {
    let ops = make_operators(&[1, 2, 3, 4, 5]);
    let mut init = sample_init(&ops, [0u8; 20], 0);
    init.t = 4;
    let err = LocalOwner::new_init(opts(&ops[0]), [5u8; 24], init).unwrap_err();
    assert_eq!(err.to_string(), "amount of operators should be 4,7,10,13");
}

#[test]
fn operator_missing_from_the_set_is_rejected() {
    let ops = make_operators(&[1, 2, 3, 4]);
    let outsider = make_operators(&[9]);
    let init = sample_init(&ops, [0u8; 20], 0);
    let err = LocalOwner::new_init(opts(&outsider[0]), [6u8; 24], init).unwrap_err();
    assert_eq!(err.to_string(), "my operator is missing inside the op list");
}
