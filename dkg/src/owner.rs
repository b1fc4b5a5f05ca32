use std::collections::BTreeMap;

use blstrs::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::{Curve, Group};
use openssl::pkey::{Private, Public};
use openssl::rsa::Rsa;
use rand::rngs::OsRng;
use ssz::{Decode, Encode};
use ssz_types::VariableList;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use dkg_crypto::bls::SecretKey;
use dkg_crypto::deposit::{self, MAX_EFFECTIVE_BALANCE_GWEI};
use dkg_crypto::rsa as rsa_ops;
use pedersen::{DealStatus, DkgConfig, DkgState, Node, PhaseEnd};
use wire::{
    parse_shares_blob, CeremonyResult, Exchange, Init, KyberMessage, Operator, Proof, RequestId,
    Reshare, SharesBlob, SignedProof, SignedTransport, Transport, TransportType,
};

use crate::error::OwnerError;

/// Tells the owning task which phase window to arm next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTimer {
    Response,
    Justification,
}

/// Construction parameters handed down by the switch.
pub struct OwnerOpts {
    pub operator_id: u64,
    pub private_key: Rsa<Private>,
    pub version: Vec<u8>,
    /// Signed transport bytes to relay back to the initiator.
    pub outbound: UnboundedSender<Vec<u8>>,
}

#[derive(Debug)]
enum Ceremony {
    Fresh {
        init: Init,
    },
    Reshare {
        reshare: Reshare,
        /// Our decrypted old share, present iff we sit in the old committee.
        old_share: Option<Scalar>,
        blob: SharesBlob,
    },
}

impl Ceremony {
    fn owner_address(&self) -> [u8; 20] {
        match self {
            Self::Fresh { init } => init.owner,
            Self::Reshare { reshare, .. } => {
                let mut owner = [0u8; 20];
                owner.copy_from_slice(&reshare.owner);
                owner
            }
        }
    }

    fn nonce(&self) -> u64 {
        match self {
            Self::Fresh { init } => init.nonce,
            Self::Reshare { reshare, .. } => reshare.nonce,
        }
    }

    /// Every operator expected to send an exchange message.
    fn participants(&self) -> Vec<&Operator> {
        match self {
            Self::Fresh { init } => init.operators.iter().collect(),
            Self::Reshare { reshare, .. } => {
                let mut all: Vec<&Operator> = reshare.old_operators.iter().collect();
                for op in reshare.new_operators.iter() {
                    if !all.iter().any(|o| o.id == op.id) {
                        all.push(op);
                    }
                }
                all
            }
        }
    }

    fn exchange_type(&self) -> TransportType {
        match self {
            Self::Fresh { .. } => TransportType::Exchange,
            Self::Reshare { .. } => TransportType::ReshareExchange,
        }
    }

    fn kyber_type(&self) -> TransportType {
        match self {
            Self::Fresh { .. } => TransportType::Kyber,
            Self::Reshare { .. } => TransportType::ReshareKyber,
        }
    }
}

/// One ceremony's state at one operator: verifies peer messages, drives the
/// DKG engine and emits the final output. Owned by a single task; all methods
/// take `&mut self` and communication happens over the outbound channel.
#[derive(Debug)]
pub struct LocalOwner {
    id: u64,
    request_id: RequestId,
    private_key: Rsa<Private>,
    own_public: Rsa<Public>,
    encoded_public: Vec<u8>,
    version: Vec<u8>,
    outbound: UnboundedSender<Vec<u8>>,
    verify_keys: BTreeMap<u64, Rsa<Public>>,
    ceremony: Ceremony,
    secret: Scalar,
    exchanges: BTreeMap<u64, Exchange>,
    dkg: Option<DkgState>,
    done: bool,
}

fn check_committee_size(n: usize) -> Result<(), OwnerError> {
    if !matches!(n, 4 | 7 | 10 | 13) {
        return Err(OwnerError::BadParameters(
            "amount of operators should be 4,7,10,13".into(),
        ));
    }
    Ok(())
}

fn expected_threshold(n: usize) -> u64 {
    (n - (n - 1) / 3) as u64
}

fn decode_g1(bytes: &[u8]) -> Result<G1Projective, OwnerError> {
    let arr: [u8; 48] = bytes
        .try_into()
        .map_err(|_| OwnerError::Malformed("point must be 48 bytes".into()))?;
    Option::<G1Affine>::from(G1Affine::from_compressed(&arr))
        .map(Into::into)
        .ok_or_else(|| OwnerError::Malformed("point is not on the curve".into()))
}

impl LocalOwner {
    /// Creates an owner for a fresh ceremony and broadcasts its exchange.
    pub fn new_init(opts: OwnerOpts, request_id: RequestId, init: Init) -> Result<Self, OwnerError> {
        let n = init.operators.len();
        check_committee_size(n)?;
        if init.t != expected_threshold(n) {
            return Err(OwnerError::BadParameters(format!(
                "wrong threshold {} for {} operators",
                init.t, n
            )));
        }
        deposit::eth1_withdrawal_credentials(&init.withdrawal_credentials)?;
        let mut owner = Self::build(opts, request_id, Ceremony::Fresh { init })?;
        let exchange = Exchange {
            pk: VariableList::new(
                (G1Projective::generator() * owner.secret)
                    .to_affine()
                    .to_compressed()
                    .to_vec(),
            )
            .expect("48 bytes fit the cap"),
            commits: VariableList::new(Vec::new()).expect("empty fits"),
        };
        owner.broadcast(owner.ceremony.exchange_type(), exchange.as_ssz_bytes())?;
        Ok(owner)
    }

    /// Creates an owner for a resharing ceremony. Old committee members
    /// recover their share from the keyshares payload and attach its public
    /// commitment to the exchange.
    pub fn new_reshare(
        opts: OwnerOpts,
        request_id: RequestId,
        reshare: Reshare,
    ) -> Result<Self, OwnerError> {
        check_committee_size(reshare.old_operators.len())?;
        check_committee_size(reshare.new_operators.len())?;
        if reshare.old_t != expected_threshold(reshare.old_operators.len())
            || reshare.new_t != expected_threshold(reshare.new_operators.len())
        {
            return Err(OwnerError::BadParameters("wrong threshold".into()));
        }
        let blob = parse_shares_blob(&reshare.keyshares, reshare.old_operators.len())
            .map_err(|e| OwnerError::BadParameters(e.to_string()))?;

        let own_id = opts.operator_id;
        let old_position = reshare
            .old_operators
            .iter()
            .position(|op| op.id == own_id);

        let old_share = match old_position {
            None => None,
            Some(idx) => {
                let plain = rsa_ops::decrypt_share(&opts.private_key, &blob.encrypted_shares[idx])?;
                let share_hex = String::from_utf8(plain)
                    .map_err(|_| OwnerError::Malformed("decrypted share is not hex".into()))?;
                let share = SecretKey::deserialize_hex(&share_hex)?;
                if share.public_key().to_bytes() != blob.share_pubkeys[idx] {
                    return Err(OwnerError::BadParameters(
                        "encrypted share does not match its public key".into(),
                    ));
                }
                Some(share.to_scalar())
            }
        };

        let commits = old_position
            .map(|idx| blob.share_pubkeys[idx].to_vec())
            .unwrap_or_default();

        let ceremony = Ceremony::Reshare {
            reshare,
            old_share,
            blob,
        };
        let mut owner = Self::build(opts, request_id, ceremony)?;
        let exchange = Exchange {
            pk: VariableList::new(
                (G1Projective::generator() * owner.secret)
                    .to_affine()
                    .to_compressed()
                    .to_vec(),
            )
            .expect("48 bytes fit the cap"),
            commits: VariableList::new(commits).expect("one point fits the cap"),
        };
        owner.broadcast(owner.ceremony.exchange_type(), exchange.as_ssz_bytes())?;
        Ok(owner)
    }

    fn build(
        opts: OwnerOpts,
        request_id: RequestId,
        ceremony: Ceremony,
    ) -> Result<Self, OwnerError> {
        let own_public = rsa_ops::public_from_private(&opts.private_key)?;
        let encoded_public = rsa_ops::encode_public_key(&own_public)?;

        let mut verify_keys = BTreeMap::new();
        let mut listed = false;
        for op in ceremony.participants() {
            let key = rsa_ops::parse_public_key(&op.pub_key)?;
            if op.id == opts.operator_id {
                if op.pub_key.to_vec() != encoded_public {
                    return Err(OwnerError::BadParameters(
                        "my operator is missing inside the op list".into(),
                    ));
                }
                listed = true;
            }
            verify_keys.insert(op.id, key);
        }
        if !listed {
            return Err(OwnerError::BadParameters(
                "my operator is missing inside the op list".into(),
            ));
        }

        Ok(Self {
            id: opts.operator_id,
            request_id,
            private_key: opts.private_key,
            own_public,
            encoded_public,
            version: opts.version,
            outbound: opts.outbound,
            verify_keys,
            ceremony,
            secret: Scalar::random(&mut OsRng),
            exchanges: BTreeMap::new(),
            dkg: None,
            done: false,
        })
    }

    pub fn operator_id(&self) -> u64 {
        self.id
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Handles one verified-envelope peer message relayed by the initiator.
    pub fn process(&mut self, st: &SignedTransport) -> Result<Option<PhaseTimer>, OwnerError> {
        if self.done {
            debug!(id = self.id, "ignoring message for finished ceremony");
            return Ok(None);
        }
        let msg = &st.message;
        if msg.identifier != self.request_id {
            return Err(OwnerError::WrongCeremony);
        }
        if msg.version.to_vec() != self.version {
            return Err(OwnerError::WrongVersion);
        }
        let key = self
            .verify_keys
            .get(&st.signer)
            .ok_or(OwnerError::UnknownSigner(st.signer))?;
        rsa_ops::verify_rsa(key, &msg.as_ssz_bytes(), &st.signature)?;
        debug!(
            id = self.id,
            from = st.signer,
            msg_type = %msg.msg_type,
            "verified incoming ceremony message"
        );

        match msg.msg_type {
            TransportType::Exchange | TransportType::ReshareExchange => {
                if msg.msg_type != self.ceremony.exchange_type() {
                    return Err(OwnerError::State(
                        "exchange type does not match the ceremony".into(),
                    ));
                }
                self.process_exchange(st.signer, &msg.data)
            }
            TransportType::Kyber | TransportType::ReshareKyber => {
                if msg.msg_type != self.ceremony.kyber_type() {
                    return Err(OwnerError::State(
                        "kyber message type does not match the ceremony".into(),
                    ));
                }
                self.process_kyber(st.signer, &msg.data)
            }
            other => Err(OwnerError::State(format!(
                "unexpected message type {other}"
            ))),
        }
    }

    fn process_exchange(
        &mut self,
        from: u64,
        data: &[u8],
    ) -> Result<Option<PhaseTimer>, OwnerError> {
        if self.dkg.is_some() {
            return Err(OwnerError::State(
                "exchange arrived after the protocol started".into(),
            ));
        }
        let exchange = Exchange::from_ssz_bytes(data)
            .map_err(|e| OwnerError::Malformed(format!("bad exchange: {e:?}")))?;
        if self.exchanges.contains_key(&from) {
            return Err(OwnerError::Duplicate);
        }
        if let Ceremony::Reshare { reshare, blob, .. } = &self.ceremony {
            // Old committee exchanges must re-state the share commitment
            // published in the keyshares payload.
            if let Some(idx) = reshare.old_operators.iter().position(|op| op.id == from) {
                if exchange.commits.to_vec() != blob.share_pubkeys[idx].to_vec() {
                    return Err(OwnerError::Malformed(
                        "exchange commits do not match the keyshares payload".into(),
                    ));
                }
            }
        }
        self.exchanges.insert(from, exchange);

        if self.exchanges.len() < self.ceremony.participants().len() {
            return Ok(None);
        }
        self.start_protocol()
    }

    fn node(&self, op: &Operator) -> Result<Node, OwnerError> {
        let exchange = self
            .exchanges
            .get(&op.id)
            .ok_or_else(|| OwnerError::State(format!("no exchange from operator {}", op.id)))?;
        Ok(Node {
            id: op.id,
            public: decode_g1(&exchange.pk)?,
        })
    }

    fn start_protocol(&mut self) -> Result<Option<PhaseTimer>, OwnerError> {
        info!(id = self.id, "all exchanges received, starting dkg");
        let cfg = match &self.ceremony {
            Ceremony::Fresh { init } => {
                let nodes = init
                    .operators
                    .iter()
                    .map(|op| self.node(op))
                    .collect::<Result<Vec<_>, _>>()?;
                DkgConfig::fresh(self.id, self.secret, nodes, init.t)
            }
            Ceremony::Reshare {
                reshare,
                old_share,
                blob,
            } => {
                let new_nodes = reshare
                    .new_operators
                    .iter()
                    .map(|op| self.node(op))
                    .collect::<Result<Vec<_>, _>>()?;
                let old_nodes = reshare
                    .old_operators
                    .iter()
                    .map(|op| self.node(op))
                    .collect::<Result<Vec<_>, _>>()?;
                let old_share_commits = reshare
                    .old_operators
                    .iter()
                    .zip(blob.share_pubkeys.iter())
                    .map(|(op, pk)| Ok((op.id, decode_g1(pk)?)))
                    .collect::<Result<_, OwnerError>>()?;
                DkgConfig {
                    me: self.id,
                    secret: self.secret,
                    new_nodes,
                    old_nodes,
                    t: reshare.new_t,
                    old_t: reshare.old_t,
                    old_share: *old_share,
                    old_share_commits,
                    old_public: Some(decode_g1(&reshare.validator_pubkey)?),
                }
            }
        };
        let mut state = DkgState::new(cfg)?;
        let (bundle, status) = state.start()?;
        self.dkg = Some(state);
        if let Some(bundle) = bundle {
            let encoded = pedersen::encode_deal_bundle(&bundle)
                .map_err(|e| OwnerError::Malformed(e.to_string()))?;
            self.broadcast_kyber(TransportType::KyberDealBundle, encoded)?;
        }
        // A single committee cannot complete here; completion happens when
        // the relayed bundles arrive.
        debug_assert!(matches!(status, DealStatus::Pending));

        // Old-committee dealers outside the new committee have dealt all they
        // hold; the initiator stops talking to them here.
        if let Ceremony::Reshare { reshare, .. } = &self.ceremony {
            if !reshare.new_operators.iter().any(|op| op.id == self.id) {
                info!(id = self.id, "dealt the old share, nothing left to hold");
                self.done = true;
            }
        }
        Ok(None)
    }

    fn process_kyber(&mut self, from: u64, data: &[u8]) -> Result<Option<PhaseTimer>, OwnerError> {
        if from == self.id {
            // Our own broadcast relayed back to us; already accounted for.
            return Ok(None);
        }
        let kyber = KyberMessage::from_ssz_bytes(data)
            .map_err(|e| OwnerError::Malformed(format!("bad kyber message: {e:?}")))?;
        let dkg = self
            .dkg
            .as_mut()
            .ok_or_else(|| OwnerError::State("kyber message before all exchanges".into()))?;
        match kyber.msg_type {
            TransportType::KyberDealBundle => {
                let bundle = pedersen::decode_deal_bundle(&kyber.data)
                    .map_err(|e| OwnerError::Malformed(e.to_string()))?;
                if bundle.dealer != from {
                    return Err(OwnerError::Malformed(
                        "deal bundle dealer does not match the signer".into(),
                    ));
                }
                // Once the last dealer's bundle is in, the response window
                // opens: silence within it is approval.
                match dkg.receive_deal(bundle)? {
                    DealStatus::Pending => Ok(None),
                    DealStatus::Complete { response: None } => Ok(Some(PhaseTimer::Response)),
                    DealStatus::Complete {
                        response: Some(response),
                    } => {
                        let encoded = pedersen::encode_response_bundle(&response)
                            .map_err(|e| OwnerError::Malformed(e.to_string()))?;
                        self.broadcast_kyber(TransportType::KyberResponseBundle, encoded)?;
                        Ok(Some(PhaseTimer::Response))
                    }
                }
            }
            TransportType::KyberResponseBundle => {
                let bundle = pedersen::decode_response_bundle(&kyber.data)
                    .map_err(|e| OwnerError::Malformed(e.to_string()))?;
                if bundle.sender != from {
                    return Err(OwnerError::Malformed(
                        "response bundle sender does not match the signer".into(),
                    ));
                }
                dkg.receive_response(bundle)?;
                Ok(None)
            }
            TransportType::KyberJustificationBundle => {
                let bundle = pedersen::decode_justification_bundle(&kyber.data)
                    .map_err(|e| OwnerError::Malformed(e.to_string()))?;
                if bundle.dealer != from {
                    return Err(OwnerError::Malformed(
                        "justification bundle dealer does not match the signer".into(),
                    ));
                }
                dkg.receive_justification(bundle)?;
                Ok(None)
            }
            other => Err(OwnerError::Malformed(format!(
                "unknown kyber message type {other}"
            ))),
        }
    }

    /// Invoked by the owning task when a phase window elapses.
    pub fn on_phase_timeout(&mut self, timer: PhaseTimer) -> Result<Option<PhaseTimer>, OwnerError> {
        if self.done {
            return Ok(None);
        }
        let dkg = self
            .dkg
            .as_mut()
            .ok_or_else(|| OwnerError::State("phase timeout before the protocol started".into()))?;
        match timer {
            PhaseTimer::Response => match dkg.on_response_phase_end()? {
                PhaseEnd::Finished(key) => {
                    self.finish(key)?;
                    Ok(None)
                }
                PhaseEnd::Justifying(bundle) => {
                    if let Some(bundle) = bundle {
                        let encoded = pedersen::encode_justification_bundle(&bundle)
                            .map_err(|e| OwnerError::Malformed(e.to_string()))?;
                        self.broadcast_kyber(TransportType::KyberJustificationBundle, encoded)?;
                    }
                    Ok(Some(PhaseTimer::Justification))
                }
            },
            PhaseTimer::Justification => {
                let key = dkg.on_justification_phase_end()?;
                self.finish(key)?;
                Ok(None)
            }
        }
    }

    fn finish(&mut self, key: Option<pedersen::DistKeyShare>) -> Result<(), OwnerError> {
        self.done = true;
        let Some(key) = key else {
            info!(id = self.id, "ceremony finished without a share to hold");
            return Ok(());
        };
        info!(id = self.id, "dkg ceremony finished successfully");
        self.post_dkg(key)
    }

    fn post_dkg(&mut self, key: pedersen::DistKeyShare) -> Result<(), OwnerError> {
        let share_sk = SecretKey::from_scalar(key.share.value);
        let share_pk = share_sk.public_key();
        let validator_pubkey: [u8; 48] = key.public_key().to_affine().to_compressed();

        let owner_address = self.ceremony.owner_address();
        let nonce = self.ceremony.nonce();

        let deposit_partial = match &self.ceremony {
            Ceremony::Fresh { init } => {
                let root = deposit::deposit_signing_root(
                    &validator_pubkey,
                    &init.withdrawal_credentials,
                    init.fork,
                    MAX_EFFECTIVE_BALANCE_GWEI,
                )?;
                let sig = share_sk.sign(&root);
                if !share_pk.verify(&root, &sig) {
                    return Err(OwnerError::Crypto(dkg_crypto::CryptoError::Deposit(
                        "partial deposit root signature is not valid".into(),
                    )));
                }
                Some(sig.to_bytes().to_vec())
            }
            Ceremony::Reshare { .. } => None,
        };

        let digest = deposit::owner_nonce_digest(&owner_address, nonce);
        let owner_nonce_partial = share_sk.sign(&digest);
        if !share_pk.verify(&digest, &owner_nonce_partial) {
            return Err(OwnerError::Crypto(dkg_crypto::CryptoError::Deposit(
                "partial owner and nonce signature is not valid".into(),
            )));
        }

        let encrypted_share = self.encrypt_share_checked(&share_sk)?;

        let proof = Proof {
            validator_pubkey,
            encrypted_share: VariableList::new(encrypted_share.clone())
                .expect("256 bytes fit the cap"),
            share_pubkey: share_pk.to_bytes(),
            owner: owner_address,
        };
        let proof_sig = rsa_ops::sign_rsa(&self.private_key, &proof.as_ssz_bytes())?;
        let proof_sig: [u8; 256] = proof_sig
            .try_into()
            .map_err(|_| OwnerError::Malformed("proof signature is not 256 bytes".into()))?;

        let result = CeremonyResult {
            operator_id: self.id,
            request_id: self.request_id,
            rsa_pub_key: String::from_utf8(self.encoded_public.clone())
                .map_err(|_| OwnerError::Malformed("encoded public key is not utf8".into()))?,
            validator_pubkey,
            share_pubkey: share_pk.to_bytes(),
            encrypted_share,
            deposit_partial_signature: deposit_partial,
            owner_nonce_partial_signature: owner_nonce_partial.to_bytes(),
            commits: key.commits_bytes(),
            signed_proof: SignedProof {
                proof,
                signature: proof_sig,
            },
        };
        let encoded = result
            .encode()
            .map_err(|e| OwnerError::Malformed(format!("failed to encode output: {e}")))?;
        self.broadcast(TransportType::Output, encoded)?;
        Ok(())
    }

    /// Encrypts the BLS share to our own RSA key, then decrypts it again to
    /// prove the stored blob is recoverable.
    fn encrypt_share_checked(&self, share_sk: &SecretKey) -> Result<Vec<u8>, OwnerError> {
        let plain = share_sk.serialize_hex();
        let ciphertext = rsa_ops::encrypt_share(&self.own_public, plain.as_bytes())?;
        let recovered = rsa_ops::decrypt_share(&self.private_key, &ciphertext)?;
        let recovered_hex = String::from_utf8(recovered)
            .map_err(|_| OwnerError::Malformed("decrypted share is not hex".into()))?;
        let recovered_sk = SecretKey::deserialize_hex(&recovered_hex)?;
        if recovered_sk.to_bytes_be() != share_sk.to_bytes_be() {
            return Err(OwnerError::State("cant encrypt private share".into()));
        }
        Ok(ciphertext)
    }

    fn broadcast_kyber(&self, msg_type: TransportType, data: Vec<u8>) -> Result<(), OwnerError> {
        let kyber = KyberMessage {
            msg_type,
            data: VariableList::new(data)
                .map_err(|_| OwnerError::Malformed("bundle exceeds the kyber cap".into()))?,
        };
        self.broadcast(self.ceremony.kyber_type(), kyber.as_ssz_bytes())
    }

    fn broadcast(&self, msg_type: TransportType, data: Vec<u8>) -> Result<(), OwnerError> {
        let transport = Transport::new(msg_type, self.request_id, data, &self.version)
            .map_err(|_| OwnerError::Malformed("payload exceeds the transport cap".into()))?;
        let signature = rsa_ops::sign_rsa(&self.private_key, &transport.as_ssz_bytes())?;
        let signed = SignedTransport {
            message: transport,
            signer: self.id,
            signature: VariableList::new(signature).expect("256 bytes fit the cap"),
        };
        if self.outbound.send(signed.as_ssz_bytes()).is_err() {
            warn!(id = self.id, "outbound channel closed, dropping broadcast");
        }
        Ok(())
    }

    /// Reports a terminal error back to the initiator. Best effort; the
    /// instance is evicted afterwards either way.
    pub fn broadcast_error(&mut self, message: &str) {
        self.done = true;
        let Ok(data) = serde_json::to_vec(&message) else {
            return;
        };
        if let Err(e) = self.broadcast(TransportType::Error, data) {
            warn!(id = self.id, error = %e, "failed to broadcast ceremony error");
        }
    }
}
