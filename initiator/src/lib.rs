//! Ceremony orchestrator: validates the operator set, drives the three-phase
//! message flow against every operator in parallel, verifies all partial
//! signatures, reconstructs the master signatures and emits the deposit-data
//! and keyshares artifacts.

use std::time::Duration;

use openssl::pkey::Private;
use openssl::rsa::Rsa;
use ssz::{Decode, Encode};
use ssz_types::{FixedVector, VariableList};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tree_hash::TreeHash;

use dkg_crypto::bls::{PublicKey, Signature};
use dkg_crypto::deposit::{self, Network};
use dkg_crypto::rsa as rsa_ops;
use dkg_crypto::threshold as bls_threshold;
use wire::{
    parse_shares_blob, BlsSignRequest, CeremonyResult, ErrSsz, Init, MultipleSignedTransports,
    Operator, Ping, Pong, RequestId, Reshare, ResultData, SignedProof, SignedReshare,
    SignedTransport, Transport, TransportType,
};

pub use artifacts::{
    build_deposit_json, build_keyshares, validate_deposit_json, validate_keyshares,
    DepositDataJson, KeyShares, KeySharesItem, OperatorData, ShareData, SharesPayload,
    DEPOSIT_CLI_VERSION, KEYSHARES_VERSION,
};
pub use error::InitiatorError;
pub use registry::{
    load_operators_json, threshold, validated_operator_data, OperatorInfo, OperatorInfoJson,
    Operators,
};
pub use reshare::{
    verify_owner_signature, EcdsaOwnerVerifier, NoContractVerifier, OwnerSignatureVerifier,
};

mod artifacts;
mod error;
mod registry;
mod reshare;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const API_INIT: &str = "init";
const API_RESHARE: &str = "reshare";
const API_DKG: &str = "dkg";
const API_RESULTS: &str = "results";
const API_HEALTH_CHECK: &str = "health_check";

/// A healthy operator's reply to a ping.
#[derive(Debug, Clone)]
pub struct PongInfo {
    pub id: u64,
    pub addr: String,
    pub version: String,
    pub pub_key: String,
}

/// The coordinator of a single ceremony. Not trusted with key material;
/// trusted for liveness and correct routing only.
pub struct Initiator {
    client: reqwest::Client,
    operators: Operators,
    private_key: Rsa<Private>,
    encoded_public: Vec<u8>,
    version: Vec<u8>,
}

impl Initiator {
    pub fn new(
        private_key: Rsa<Private>,
        operators: Operators,
        version: &str,
    ) -> Result<Self, InitiatorError> {
        let public = rsa_ops::public_from_private(&private_key)?;
        let encoded_public = rsa_ops::encode_public_key(&public)?;
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| InitiatorError::Transport(format!("cannot build http client: {e}")))?;
        Ok(Self {
            client,
            operators,
            private_key,
            encoded_public,
            version: version.as_bytes().to_vec(),
        })
    }

    /// Runs a fresh DKG ceremony and returns the verified artifacts.
    pub async fn start_dkg(
        &self,
        id: RequestId,
        withdraw: [u8; 20],
        ids: &[u64],
        network: Network,
        owner: [u8; 20],
        nonce: u64,
    ) -> Result<(DepositDataJson, KeyShares, Vec<SignedProof>), InitiatorError> {
        let ops = validated_operator_data(ids, &self.operators)?;
        info!(
            reqid = hex::encode(id),
            operators = ?ids,
            "starting dkg ceremony"
        );
        let init = Init {
            operators: VariableList::new(ops.clone())
                .map_err(|_| InitiatorError::Config("too many operators".into()))?,
            t: threshold(ops.len()),
            withdrawal_credentials: VariableList::new(withdraw.to_vec())
                .map_err(|_| InitiatorError::Config("withdrawal credentials malformed".into()))?,
            fork: network.fork_version(),
            owner,
            nonce,
            initiator_public_key: VariableList::new(self.encoded_public.clone())
                .map_err(|_| InitiatorError::Config("initiator key exceeds the cap".into()))?,
        };

        let results = self.run_message_flow(id, &init, &ops).await?;
        info!(reqid = hex::encode(id), "dkg completed, verifying artifacts");

        self.verify_proofs(&results, &ops, owner)?;
        let deposit_json =
            self.reconstruct_and_verify_deposit_data(&results, &withdraw, network)?;
        validate_deposit_json(&deposit_json)?;

        let master_nonce_sig = self.verify_owner_nonce_signatures(&results, owner, nonce)?;
        let keyshares = build_keyshares(&results, &ops, owner, nonce, &master_nonce_sig)?;
        validate_keyshares(&keyshares, &results, owner, nonce)?;
        info!(reqid = hex::encode(id), "verified master signatures");

        let proofs: Vec<SignedProof> = results.iter().map(|r| r.signed_proof.clone()).collect();
        self.send_results(id, &ops, Some(&deposit_json), &keyshares, &proofs)
            .await?;
        Ok((deposit_json, keyshares, proofs))
    }

    /// Builds the reshare message for a keyshares file so the owner account
    /// can sign its root offline.
    pub fn build_reshare_message(
        &self,
        keyshares: &KeyShares,
        new_ids: &[u64],
        nonce: u64,
    ) -> Result<Reshare, InitiatorError> {
        let item = keyshares
            .shares
            .first()
            .ok_or_else(|| InitiatorError::Config("keyshares file has no shares".into()))?;
        let old_ops = validated_operator_data(&item.payload.operator_ids, &self.operators)?;
        let new_ops = validated_operator_data(new_ids, &self.operators)?;
        let validator = hex::decode(item.payload.public_key.trim_start_matches("0x"))
            .map_err(|e| InitiatorError::Config(format!("cant decode validator pub key {e}")))?;
        let owner: [u8; 20] = parse_owner_address(&item.data.owner_address)?;
        let blob = hex::decode(item.payload.shares_data.trim_start_matches("0x"))
            .map_err(|e| InitiatorError::Config(format!("cant decode enc shares {e}")))?;
        Ok(Reshare {
            validator_pubkey: FixedVector::new(validator)
                .map_err(|_| InitiatorError::Config("validator pub key must be 48 bytes".into()))?,
            old_operators: VariableList::new(old_ops)
                .map_err(|_| InitiatorError::Config("too many operators".into()))?,
            new_operators: VariableList::new(new_ops)
                .map_err(|_| InitiatorError::Config("too many operators".into()))?,
            old_t: threshold(item.payload.operator_ids.len()),
            new_t: threshold(new_ids.len()),
            owner: FixedVector::new(owner.to_vec()).expect("20 bytes"),
            nonce,
            keyshares: VariableList::new(blob)
                .map_err(|_| InitiatorError::Config("shares data exceeds the cap".into()))?,
            initiator_public_key: VariableList::new(self.encoded_public.clone())
                .map_err(|_| InitiatorError::Config("initiator key exceeds the cap".into()))?,
        })
    }

    /// Runs a resharing ceremony: the old committee re-deals its shares to
    /// the new committee, preserving the validator key.
    pub async fn start_resharing(
        &self,
        id: RequestId,
        signed: SignedReshare,
        proofs: &[SignedProof],
        contract_verifier: &dyn OwnerSignatureVerifier,
    ) -> Result<(KeyShares, Vec<SignedProof>), InitiatorError> {
        let reshare = signed.reshare;
        let owner: [u8; 20] = reshare
            .owner
            .to_vec()
            .try_into()
            .expect("fixed 20 byte field");
        let root: [u8; 32] = reshare.tree_hash_root().0;
        verify_owner_signature(contract_verifier, owner, root, &signed.signature)?;
        self.verify_reshare_proofs(&reshare, proofs)?;

        let old_ops: Vec<Operator> = reshare.old_operators.to_vec();
        let new_ops: Vec<Operator> = reshare.new_operators.to_vec();
        let mut all_ops = old_ops.clone();
        for op in &new_ops {
            if !all_ops.iter().any(|o| o.id == op.id) {
                all_ops.push(op.clone());
            }
        }
        all_ops.sort_by_key(|op| op.id);
        info!(
            reqid = hex::encode(id),
            old = ?old_ops.iter().map(|o| o.id).collect::<Vec<_>>(),
            new = ?new_ops.iter().map(|o| o.id).collect::<Vec<_>>(),
            "starting resharing ceremony"
        );

        // Phase 1: reshare message to everyone involved.
        let body = self.sign_transport(TransportType::Reshare, id, reshare.as_ssz_bytes())?;
        let responses = self.send_to_all(API_RESHARE, body, &all_ops).await?;
        let exchanges = self.verify_responses(id, &responses)?;

        // Phase 2: exchanges to everyone; old operators answer with deals,
        // new-only operators have nothing to say yet.
        let bundle = self.make_bundle(id, &exchanges)?;
        let responses = self.send_to_all(API_DKG, bundle, &all_ops).await?;
        let deals: Vec<SignedTransport> = self
            .verify_responses(id, &responses)?
            .into_iter()
            .filter(|st| st.message.msg_type != TransportType::Empty)
            .collect();

        // Phase 3: deals to the new committee, which produces the outputs.
        let bundle = self.make_bundle(id, &deals)?;
        let responses = self.send_to_all(API_DKG, bundle, &new_ops).await?;
        let results = self.parse_results(id, &responses, &reshare.validator_pubkey)?;

        self.verify_proofs(&results, &new_ops, owner)?;
        let master_nonce_sig =
            self.verify_owner_nonce_signatures(&results, owner, reshare.nonce)?;
        let keyshares = build_keyshares(&results, &new_ops, owner, reshare.nonce, &master_nonce_sig)?;
        validate_keyshares(&keyshares, &results, owner, reshare.nonce)?;

        let new_proofs: Vec<SignedProof> = results.iter().map(|r| r.signed_proof.clone()).collect();
        self.send_results(id, &new_ops, None, &keyshares, &new_proofs)
            .await?;
        Ok((keyshares, new_proofs))
    }

    /// Asks the holders of an existing keyshares file to partially sign
    /// `signing_root` with their decrypted shares, and reconstructs the
    /// master signature.
    pub async fn resign(
        &self,
        id: RequestId,
        keyshares: &KeyShares,
        signing_root: [u8; 32],
    ) -> Result<[u8; 96], InitiatorError> {
        let item = keyshares
            .shares
            .first()
            .ok_or_else(|| InitiatorError::Config("keyshares file has no shares".into()))?;
        let ops = validated_operator_data(&item.payload.operator_ids, &self.operators)?;
        let blob_bytes = hex::decode(item.payload.shares_data.trim_start_matches("0x"))
            .map_err(|e| InitiatorError::Config(format!("cant decode enc shares {e}")))?;
        let blob = parse_shares_blob(&blob_bytes, ops.len())
            .map_err(|e| InitiatorError::Config(e.to_string()))?;
        let validator_bytes = hex::decode(item.payload.public_key.trim_start_matches("0x"))
            .map_err(|e| InitiatorError::Config(format!("cant decode validator pub key {e}")))?;
        let validator = PublicKey::from_bytes(&validator_bytes)?;

        let request = BlsSignRequest {
            operators: VariableList::new(ops.clone())
                .map_err(|_| InitiatorError::Config("too many operators".into()))?,
            t: threshold(ops.len()),
            keyshares: VariableList::new(blob_bytes)
                .map_err(|_| InitiatorError::Config("shares data exceeds the cap".into()))?,
            signing_root,
            initiator_public_key: VariableList::new(self.encoded_public.clone())
                .map_err(|_| InitiatorError::Config("initiator key exceeds the cap".into()))?,
        };
        let body =
            self.sign_transport(TransportType::BlsSignRequest, id, request.as_ssz_bytes())?;
        let responses = self.send_to_all(API_INIT, body, &ops).await?;
        let messages = self.verify_responses(id, &responses)?;

        let mut partials = Vec::with_capacity(messages.len());
        for (st, (position, op)) in messages.iter().zip(ops.iter().enumerate()) {
            if st.message.msg_type != TransportType::BlsSignRequest {
                return Err(InitiatorError::Operator {
                    id: op.id,
                    message: format!("unexpected resign response {}", st.message.msg_type),
                });
            }
            let signature = Signature::from_bytes(&st.message.data)?;
            let share_pk = PublicKey::from_bytes(&blob.share_pubkeys[position])?;
            if !share_pk.verify(&signing_root, &signature) {
                return Err(InitiatorError::Operator {
                    id: op.id,
                    message: "partial signature is invalid".into(),
                });
            }
            partials.push((op.id, signature));
        }
        let master =
            bls_threshold::recover_and_verify_signature(&partials, &validator, &signing_root)?;
        Ok(master.to_bytes())
    }

    /// Pings the given operators; failures are reported per operator.
    pub async fn health_check(
        &self,
        ids: &[u64],
    ) -> Result<Vec<Result<PongInfo, InitiatorError>>, InitiatorError> {
        let mut ops = Vec::with_capacity(ids.len());
        for id in ids {
            let info = self.operators.get(id).ok_or_else(|| {
                InitiatorError::Config("operator is not in given operator data list".into())
            })?;
            ops.push(
                Operator::new(info.id, info.encoded_pub_key.clone())
                    .map_err(|_| InitiatorError::Config("operator key exceeds the cap".into()))?,
            );
        }
        let ping = Ping::default();
        let body =
            self.sign_transport(TransportType::Ping, [0u8; 24], ping.as_ssz_bytes())?;
        let mut report = Vec::with_capacity(ops.len());
        for op in &ops {
            let addr = self.operators[&op.id].addr.clone();
            let url = format!("{addr}/{API_HEALTH_CHECK}");
            let result = match post_bytes(&self.client, &url, body.clone()).await {
                Ok(bytes) => self.parse_pong(op.id, &addr, &bytes),
                Err(e) => Err(e),
            };
            report.push(result);
        }
        Ok(report)
    }

    fn parse_pong(&self, id: u64, addr: &str, bytes: &[u8]) -> Result<PongInfo, InitiatorError> {
        let st = decode_response(id, bytes)?;
        if st.message.msg_type != TransportType::Pong {
            return Err(InitiatorError::Operator {
                id,
                message: "wrong incoming message type from operator".into(),
            });
        }
        let pong = Pong::from_ssz_bytes(&st.message.data).map_err(|e| InitiatorError::Operator {
            id,
            message: format!("bad pong: {e:?}"),
        })?;
        let key = rsa_ops::parse_public_key(&pong.pub_key)?;
        rsa_ops::verify_rsa(&key, &st.message.as_ssz_bytes(), &st.signature)?;
        Ok(PongInfo {
            id: st.signer,
            addr: addr.to_string(),
            version: String::from_utf8_lossy(&st.message.version).into_owned(),
            pub_key: String::from_utf8_lossy(&pong.pub_key).into_owned(),
        })
    }

    /// The three message phases of a fresh ceremony.
    async fn run_message_flow(
        &self,
        id: RequestId,
        init: &Init,
        ops: &[Operator],
    ) -> Result<Vec<CeremonyResult>, InitiatorError> {
        debug!("phase 1: sending init message to operators");
        let body = self.sign_transport(TransportType::Init, id, init.as_ssz_bytes())?;
        let responses = self.send_to_all(API_INIT, body, ops).await?;
        let exchanges = self.verify_responses(id, &responses)?;

        debug!("phase 2: sending exchange messages");
        let bundle = self.make_bundle(id, &exchanges)?;
        let responses = self.send_to_all(API_DKG, bundle, ops).await?;
        let deals = self.verify_responses(id, &responses)?;

        debug!("phase 3: sending deal bundles");
        let bundle = self.make_bundle(id, &deals)?;
        let responses = self.send_to_all(API_DKG, bundle, ops).await?;
        self.parse_results(id, &responses, &[])
    }

    fn sign_transport(
        &self,
        msg_type: TransportType,
        id: RequestId,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, InitiatorError> {
        let transport = Transport::new(msg_type, id, data, &self.version)
            .map_err(|_| InitiatorError::Transport("payload exceeds the transport cap".into()))?;
        let signature = rsa_ops::sign_rsa(&self.private_key, &transport.as_ssz_bytes())?;
        let signed = SignedTransport {
            message: transport,
            signer: 0,
            signature: VariableList::new(signature).expect("256 bytes fit the cap"),
        };
        Ok(signed.as_ssz_bytes())
    }

    /// Posts to every operator in parallel and collects the responses sorted
    /// by ascending operator id. Any single failure aborts.
    async fn send_to_all(
        &self,
        method: &str,
        body: Vec<u8>,
        ops: &[Operator],
    ) -> Result<Vec<(u64, Vec<u8>)>, InitiatorError> {
        let (tx, mut rx) = mpsc::channel(ops.len());
        for op in ops {
            let info = self.operators.get(&op.id).ok_or_else(|| {
                InitiatorError::Config("operator is not in given operator data list".into())
            })?;
            let client = self.client.clone();
            let url = format!("{}/{}", info.addr, method);
            let body = body.clone();
            let tx = tx.clone();
            let op_id = op.id;
            tokio::spawn(async move {
                let result = post_bytes(&client, &url, body).await;
                let _ = tx.send((op_id, result)).await;
            });
        }
        drop(tx);

        let mut responses = Vec::with_capacity(ops.len());
        while let Some((op_id, result)) = rx.recv().await {
            match result {
                Ok(bytes) => {
                    debug!(operator = op_id, method, "operator responded");
                    responses.push((op_id, bytes));
                }
                Err(e) => {
                    return Err(InitiatorError::Operator {
                        id: op_id,
                        message: e.to_string(),
                    })
                }
            }
        }
        responses.sort_by_key(|(id, _)| *id);
        Ok(responses)
    }

    /// Decodes and authenticates every response; the ceremony id must match
    /// and each signature must verify against the claimed signer's registry
    /// key.
    fn verify_responses(
        &self,
        id: RequestId,
        responses: &[(u64, Vec<u8>)],
    ) -> Result<Vec<SignedTransport>, InitiatorError> {
        let mut messages = Vec::with_capacity(responses.len());
        for (op_id, bytes) in responses {
            let st = decode_response(*op_id, bytes)?;
            if st.message.identifier != id {
                return Err(InitiatorError::Ceremony(format!(
                    "incoming message has wrong ID, aborting... operator {}, msg ID {}",
                    st.signer,
                    hex::encode(st.message.identifier)
                )));
            }
            let signer_key = self
                .operators
                .get(&st.signer)
                .map(|info| &info.pub_key)
                .ok_or_else(|| {
                    InitiatorError::Ceremony(format!(
                        "cant find operator {} in operators information", st.signer
                    ))
                })?;
            rsa_ops::verify_rsa(signer_key, &st.message.as_ssz_bytes(), &st.signature)?;
            messages.push(st);
        }
        Ok(messages)
    }

    /// Combines verified peer messages into one initiator-signed bundle.
    fn make_bundle(
        &self,
        id: RequestId,
        messages: &[SignedTransport],
    ) -> Result<Vec<u8>, InitiatorError> {
        let mut concatenated = Vec::new();
        for st in messages {
            concatenated.extend_from_slice(&st.as_ssz_bytes());
        }
        let signature = rsa_ops::sign_rsa(&self.private_key, &concatenated)?;
        let bundle = MultipleSignedTransports {
            identifier: id,
            messages: VariableList::new(messages.to_vec())
                .map_err(|_| InitiatorError::Transport("too many bundle messages".into()))?,
            signature: VariableList::new(signature).expect("256 bytes fit the cap"),
        };
        Ok(bundle.as_ssz_bytes())
    }

    /// Parses the final round's responses into ceremony results, sorted by
    /// operator id, with a common validator key.
    fn parse_results(
        &self,
        id: RequestId,
        responses: &[(u64, Vec<u8>)],
        expected_validator: &[u8],
    ) -> Result<Vec<CeremonyResult>, InitiatorError> {
        let mut results = Vec::with_capacity(responses.len());
        for st in self.verify_responses(id, responses)? {
            match st.message.msg_type {
                TransportType::Output => {}
                TransportType::Error => {
                    let message: String = serde_json::from_slice(&st.message.data)
                        .unwrap_or_else(|_| {
                            String::from_utf8_lossy(&st.message.data).into_owned()
                        });
                    return Err(InitiatorError::Operator {
                        id: st.signer,
                        message,
                    });
                }
                TransportType::Empty => {
                    return Err(InitiatorError::Operator {
                        id: st.signer,
                        message: "operator produced no output within the allotted time".into(),
                    });
                }
                _ => {
                    return Err(InitiatorError::Ceremony(
                        "wrong DKG result message type".into(),
                    ));
                }
            }
            let result = CeremonyResult::decode(&st.message.data)
                .map_err(|e| InitiatorError::Ceremony(format!("bad ceremony result: {e}")))?;
            if result.request_id != id {
                return Err(InitiatorError::Ceremony("DKG result has wrong ID".into()));
            }
            results.push(result);
        }
        results.sort_by_key(|r| r.operator_id);
        if results.is_empty() {
            return Err(InitiatorError::Ceremony("no ceremony results".into()));
        }
        for result in &results {
            if result.validator_pubkey != results[0].validator_pubkey
                || (!expected_validator.is_empty()
                    && result.validator_pubkey.as_slice() != expected_validator)
            {
                return Err(InitiatorError::Operator {
                    id: result.operator_id,
                    message: "sent wrong validator public key".into(),
                });
            }
        }
        Ok(results)
    }

    /// Checks each result's proof binding and RSA signature.
    fn verify_proofs(
        &self,
        results: &[CeremonyResult],
        ops: &[Operator],
        owner: [u8; 20],
    ) -> Result<(), InitiatorError> {
        for (result, op) in results.iter().zip(ops.iter()) {
            let proof = &result.signed_proof.proof;
            if proof.validator_pubkey != result.validator_pubkey
                || proof.share_pubkey != result.share_pubkey
                || proof.encrypted_share.to_vec() != result.encrypted_share
                || proof.owner != owner
            {
                return Err(InitiatorError::Operator {
                    id: result.operator_id,
                    message: "ceremony proof does not match the result".into(),
                });
            }
            let key = self
                .operators
                .get(&op.id)
                .map(|info| &info.pub_key)
                .ok_or_else(|| {
                    InitiatorError::Config("operator is not in given operator data list".into())
                })?;
            rsa_ops::verify_rsa(key, &proof.as_ssz_bytes(), &result.signed_proof.signature)
                .map_err(|_| InitiatorError::Operator {
                    id: result.operator_id,
                    message: "ceremony proof signature is invalid".into(),
                })?;
        }
        Ok(())
    }

    /// Verifies every partial deposit signature, recovers the master
    /// signature and assembles the deposit file.
    fn reconstruct_and_verify_deposit_data(
        &self,
        results: &[CeremonyResult],
        withdraw: &[u8; 20],
        network: Network,
    ) -> Result<DepositDataJson, InitiatorError> {
        let validator_bytes = results[0].validator_pubkey;
        let validator = PublicKey::from_bytes(&validator_bytes)?;
        let root = deposit::deposit_signing_root(
            &validator_bytes,
            withdraw,
            network.fork_version(),
            deposit::MAX_EFFECTIVE_BALANCE_GWEI,
        )?;

        let mut partials = Vec::with_capacity(results.len());
        let mut share_pubkeys = Vec::with_capacity(results.len());
        for result in results {
            let share_pk = PublicKey::from_bytes(&result.share_pubkey)?;
            let sig_bytes = result.deposit_partial_signature.as_ref().ok_or_else(|| {
                InitiatorError::Operator {
                    id: result.operator_id,
                    message: "result carries no deposit signature".into(),
                }
            })?;
            let signature = Signature::from_bytes(sig_bytes)?;
            partials.push((result.operator_id, share_pk, signature));
            share_pubkeys.push((result.operator_id, share_pk));
        }
        bls_threshold::verify_partial_signatures(&partials, &root)
            .map_err(|e| InitiatorError::Ceremony(format!("failed to verify partial signatures: {e}")))?;

        let recovered = bls_threshold::recover_validator_public_key(&share_pubkeys)?;
        if recovered.to_bytes() != validator_bytes {
            return Err(InitiatorError::Ceremony(
                "incoming validator pub key is not equal recovered from shares".into(),
            ));
        }
        let sig_partials: Vec<(u64, Signature)> = partials
            .iter()
            .map(|(id, _, sig)| (*id, *sig))
            .collect();
        let master = bls_threshold::recover_and_verify_signature(&sig_partials, &validator, &root)?;
        build_deposit_json(&validator_bytes, withdraw, network, &master)
    }

    /// Verifies every partial owner/nonce signature and recovers the master.
    fn verify_owner_nonce_signatures(
        &self,
        results: &[CeremonyResult],
        owner: [u8; 20],
        nonce: u64,
    ) -> Result<Signature, InitiatorError> {
        let digest = deposit::owner_nonce_digest(&owner, nonce);
        let mut partials = Vec::with_capacity(results.len());
        let mut with_keys = Vec::with_capacity(results.len());
        for result in results {
            let share_pk = PublicKey::from_bytes(&result.share_pubkey)?;
            let signature = Signature::from_bytes(&result.owner_nonce_partial_signature)?;
            with_keys.push((result.operator_id, share_pk, signature));
            partials.push((result.operator_id, signature));
        }
        bls_threshold::verify_partial_signatures(&with_keys, &digest)
            .map_err(|e| InitiatorError::Ceremony(format!("failed to verify partial signatures: {e}")))?;
        let validator = PublicKey::from_bytes(&results[0].validator_pubkey)?;
        Ok(bls_threshold::recover_and_verify_signature(
            &partials, &validator, &digest,
        )?)
    }

    fn verify_reshare_proofs(
        &self,
        reshare: &Reshare,
        proofs: &[SignedProof],
    ) -> Result<(), InitiatorError> {
        if proofs.len() != reshare.old_operators.len() {
            return Err(InitiatorError::Config(
                "proof count does not match the old committee".into(),
            ));
        }
        for (proof, op) in proofs.iter().zip(reshare.old_operators.iter()) {
            if proof.proof.validator_pubkey.as_slice() != &reshare.validator_pubkey[..]
                || proof.proof.owner.as_slice() != &reshare.owner[..]
            {
                return Err(InitiatorError::Operator {
                    id: op.id,
                    message: "proof does not match the reshare message".into(),
                });
            }
            let key = self
                .operators
                .get(&op.id)
                .map(|info| &info.pub_key)
                .ok_or_else(|| {
                    InitiatorError::Config("operator is not in given operator data list".into())
                })?;
            rsa_ops::verify_rsa(key, &proof.proof.as_ssz_bytes(), &proof.signature)
                .map_err(|_| InitiatorError::Operator {
                    id: op.id,
                    message: "proof signature is invalid".into(),
                })?;
        }
        Ok(())
    }

    async fn send_results(
        &self,
        id: RequestId,
        ops: &[Operator],
        deposit: Option<&DepositDataJson>,
        keyshares: &KeyShares,
        proofs: &[SignedProof],
    ) -> Result<(), InitiatorError> {
        let deposit_bytes = match deposit {
            Some(json) => serde_json::to_vec(json)
                .map_err(|e| InitiatorError::Ceremony(format!("cannot encode deposit data: {e}")))?,
            None => Vec::new(),
        };
        let keyshares_bytes = serde_json::to_vec(keyshares)
            .map_err(|e| InitiatorError::Ceremony(format!("cannot encode keyshares: {e}")))?;
        let result_data = ResultData {
            operators: VariableList::new(ops.to_vec())
                .map_err(|_| InitiatorError::Transport("too many operators".into()))?,
            identifier: id,
            deposit_data: VariableList::new(deposit_bytes)
                .map_err(|_| InitiatorError::Transport("deposit data exceeds the cap".into()))?,
            keyshares_data: VariableList::new(keyshares_bytes)
                .map_err(|_| InitiatorError::Transport("keyshares exceed the cap".into()))?,
            proofs: VariableList::new(proofs.to_vec())
                .map_err(|_| InitiatorError::Transport("too many proofs".into()))?,
        };
        let body = self.sign_transport(TransportType::Result, id, result_data.as_ssz_bytes())?;
        self.send_to_all(API_RESULTS, body, ops)
            .await
            .map_err(|e| InitiatorError::Ceremony(format!("error storing results at operators: {e}")))?;
        Ok(())
    }
}

/// The root the owner account signs to authorize a reshare.
pub fn reshare_root(reshare: &Reshare) -> [u8; 32] {
    reshare.tree_hash_root().0
}

/// Wraps a reshare message with the owner's signature bytes.
pub fn make_signed_reshare(
    reshare: Reshare,
    signature: Vec<u8>,
) -> Result<SignedReshare, InitiatorError> {
    Ok(SignedReshare {
        reshare,
        signature: VariableList::new(signature)
            .map_err(|_| InitiatorError::Config("owner signature exceeds the cap".into()))?,
    })
}

/// Decodes an operator response, surfacing `ErrSSZ` bodies as that
/// operator's error.
fn decode_response(op_id: u64, bytes: &[u8]) -> Result<SignedTransport, InitiatorError> {
    match SignedTransport::from_ssz_bytes(bytes) {
        Ok(st) => Ok(st),
        Err(decode_err) => match ErrSsz::from_ssz_bytes(bytes) {
            Ok(err) => Err(InitiatorError::Operator {
                id: op_id,
                message: err.message(),
            }),
            Err(_) => Err(InitiatorError::Transport(format!(
                "failed to decode operator {op_id} response: {decode_err:?}"
            ))),
        },
    }
}

fn parse_owner_address(address: &str) -> Result<[u8; 20], InitiatorError> {
    let bytes = hex::decode(address.trim_start_matches("0x"))
        .map_err(|e| InitiatorError::Config(format!("not valid ETH address: {e}")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| InitiatorError::Config(format!("not valid ETH address with len {}", b.len())))
}

async fn post_bytes(
    client: &reqwest::Client,
    url: &str,
    body: Vec<u8>,
) -> Result<Vec<u8>, InitiatorError> {
    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .send()
        .await
        .map_err(|e| InitiatorError::Transport(format!("{url}: {e}")))?;
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| InitiatorError::Transport(format!("{url}: {e}")))?;
    if !status.is_success() {
        return Err(InitiatorError::Transport(format!(
            "{url}: http {status}: {}",
            String::from_utf8_lossy(&bytes)
        )));
    }
    Ok(bytes.to_vec())
}
