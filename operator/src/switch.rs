use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use openssl::pkey::{Private, Public};
use openssl::rsa::Rsa;
use parking_lot::RwLock;
use ssz::{Decode, Encode};
use ssz_types::VariableList;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Sleep};
use tracing::{debug, error, info, warn};

use dkg::{LocalOwner, OwnerOpts, PhaseTimer};
use dkg_crypto::bls::SecretKey;
use dkg_crypto::rsa as rsa_ops;
use wire::{
    parse_shares_blob, BlsSignRequest, ErrSsz, Init, MultipleSignedTransports, Operator, Ping,
    Pong, RequestId, Reshare, ResultData, SignedTransport, Transport, TransportType,
    ValidateKeyshares,
};

/// Upper bound on ceremonies this process keeps live state for.
pub const MAX_INSTANCES: usize = 1024;
/// Instances older than this are swept away.
pub const MAX_INSTANCE_TIME: Duration = Duration::from_secs(5 * 60);

/// Reply-channel read window for exchange and deal rounds.
const EXCHANGE_READ_TIMEOUT: Duration = Duration::from_millis(50);
/// Reply-channel read window once kyber bundles flow; covers the protocol's
/// response and justification phases.
const KYBER_READ_TIMEOUT: Duration = Duration::from_secs(11);

/// Errors leaving the switch, split by how the HTTP layer reports them.
#[derive(Debug)]
pub enum SwitchError {
    /// Parse failure or missing instance: a plain 4xx body.
    Transport(String),
    /// Ceremony-level failure: travels as `ErrSSZ` with HTTP 200.
    Ceremony(String),
}

impl std::fmt::Display for SwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) | Self::Ceremony(e) => f.write_str(e),
        }
    }
}

impl std::error::Error for SwitchError {}

impl From<dkg_crypto::CryptoError> for SwitchError {
    fn from(e: dkg_crypto::CryptoError) -> Self {
        Self::Ceremony(e.to_string())
    }
}

pub struct SwitchConfig {
    pub private_key: Rsa<Private>,
    pub version: Vec<u8>,
    /// Where `/results` artifacts land; `None` disables persistence.
    pub output_dir: Option<PathBuf>,
    /// Length of the protocol's response/justification windows.
    pub phase_window: Duration,
}

impl SwitchConfig {
    pub fn new(private_key: Rsa<Private>, version: Vec<u8>) -> Self {
        Self {
            private_key,
            version,
            output_dir: None,
            phase_window: Duration::from_secs(5),
        }
    }
}

struct InstanceHandle {
    inbound: mpsc::UnboundedSender<SignedTransport>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    initiator_key: Rsa<Public>,
    operator_id: u64,
}

#[derive(Default)]
struct InstanceMap {
    instances: HashMap<RequestId, Arc<InstanceHandle>>,
    init_times: HashMap<RequestId, Instant>,
}

impl InstanceMap {
    /// Removes instances past their TTL; returns how many were dropped.
    fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<RequestId> = self
            .init_times
            .iter()
            .filter(|(_, t)| now.duration_since(**t) > MAX_INSTANCE_TIME)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.instances.remove(id);
            self.init_times.remove(id);
        }
        expired.len()
    }
}

/// Process-wide ceremony multiplexer: a bounded instance registry behind one
/// read-write lock, with each ceremony running on its own task.
pub struct Switch {
    private_key: Rsa<Private>,
    encoded_public: Vec<u8>,
    version: Vec<u8>,
    output_dir: Option<PathBuf>,
    phase_window: Duration,
    state: RwLock<InstanceMap>,
}

impl Switch {
    pub fn new(config: SwitchConfig) -> Result<Arc<Self>, SwitchError> {
        let public = rsa_ops::public_from_private(&config.private_key)
            .map_err(|e| SwitchError::Ceremony(e.to_string()))?;
        let encoded_public =
            rsa_ops::encode_public_key(&public).map_err(|e| SwitchError::Ceremony(e.to_string()))?;
        Ok(Arc::new(Self {
            private_key: config.private_key,
            encoded_public,
            version: config.version,
            output_dir: config.output_dir,
            phase_window: config.phase_window,
            state: RwLock::new(InstanceMap::default()),
        }))
    }

    pub fn encoded_public_key(&self) -> &[u8] {
        &self.encoded_public
    }

    fn check_version(&self, transport: &Transport) -> Result<(), SwitchError> {
        if transport.version.to_vec() != self.version {
            return Err(SwitchError::Ceremony("wrong version".into()));
        }
        Ok(())
    }

    /// Locates our own operator id by matching the encoded public key.
    fn own_id(&self, operators: &[Operator]) -> Result<u64, SwitchError> {
        operators
            .iter()
            .find(|op| op.pub_key.to_vec() == self.encoded_public)
            .map(|op| op.id)
            .ok_or_else(|| {
                SwitchError::Ceremony("my operator is missing inside the op list".into())
            })
    }

    fn verify_initiator(
        &self,
        st: &SignedTransport,
        initiator_public_key: &[u8],
    ) -> Result<Rsa<Public>, SwitchError> {
        if st.signer != 0 {
            return Err(SwitchError::Ceremony(
                "ceremony message is not signed by an initiator".into(),
            ));
        }
        let key = rsa_ops::parse_public_key(initiator_public_key)?;
        rsa_ops::verify_rsa(&key, &st.message.as_ssz_bytes(), &st.signature)
            .map_err(|e| SwitchError::Ceremony(format!("init message signature isn't valid: {e}")))?;
        Ok(key)
    }

    /// Claims a slot for `id` under the instance cap and TTL rules.
    fn reserve(&self, id: RequestId) -> Result<(), SwitchError> {
        let mut state = self.state.write();
        if state.instances.len() >= MAX_INSTANCES {
            let cleaned = state.sweep();
            if state.instances.len() >= MAX_INSTANCES {
                return Err(SwitchError::Ceremony(
                    "max number of instances ongoing, please wait".into(),
                ));
            }
            debug!(cleaned, "swept expired instances");
        }
        if let Some(created) = state.init_times.get(&id) {
            if created.elapsed() <= MAX_INSTANCE_TIME {
                return Err(SwitchError::Ceremony(
                    "got init msg for existing instance".into(),
                ));
            }
            state.instances.remove(&id);
            state.init_times.remove(&id);
        }
        Ok(())
    }

    fn insert(&self, id: RequestId, handle: Arc<InstanceHandle>) -> Result<(), SwitchError> {
        let mut state = self.state.write();
        if state.instances.contains_key(&id) {
            return Err(SwitchError::Ceremony(
                "got init msg for existing instance".into(),
            ));
        }
        state.instances.insert(id, handle);
        state.init_times.insert(id, Instant::now());
        Ok(())
    }

    fn evict(&self, id: &RequestId) {
        let mut state = self.state.write();
        state.instances.remove(id);
        state.init_times.remove(id);
    }

    fn lookup(&self, id: &RequestId) -> Option<Arc<InstanceHandle>> {
        self.state.read().instances.get(id).cloned()
    }

    /// `/init`: creates an instance and returns its signed exchange. Requests
    /// for existing shares (`BlsSignRequest`, `ValidateKeyshares`) are served
    /// statelessly from the same entry point.
    pub async fn init_instance(&self, body: &[u8]) -> Result<Vec<u8>, SwitchError> {
        let st = SignedTransport::from_ssz_bytes(body)
            .map_err(|e| SwitchError::Transport(format!("failed to decode envelope: {e:?}")))?;
        self.check_version(&st.message)?;
        match st.message.msg_type {
            TransportType::Init => {}
            TransportType::BlsSignRequest | TransportType::ValidateKeyshares => {
                return self.sign_with_share(&st);
            }
            other => {
                return Err(SwitchError::Transport(format!(
                    "unexpected message type {other}"
                )))
            }
        }
        let init = Init::from_ssz_bytes(&st.message.data)
            .map_err(|e| SwitchError::Transport(format!("failed to decode init: {e:?}")))?;
        let initiator_key = self.verify_initiator(&st, &init.initiator_public_key)?;
        let operator_id = self.own_id(&init.operators)?;
        let id = st.message.identifier;
        info!(reqid = hex::encode(id), operator_id, "initializing DKG instance");

        self.reserve(id)?;
        let (handle, response) = self
            .spawn_instance(id, operator_id, initiator_key, |opts| {
                LocalOwner::new_init(opts, id, init)
            })
            .await?;
        self.insert(id, handle)?;
        Ok(response)
    }

    /// `/reshare`: same as `/init` for the resharing variant.
    pub async fn reshare_instance(&self, body: &[u8]) -> Result<Vec<u8>, SwitchError> {
        let st = SignedTransport::from_ssz_bytes(body)
            .map_err(|e| SwitchError::Transport(format!("failed to decode envelope: {e:?}")))?;
        self.check_version(&st.message)?;
        if st.message.msg_type != TransportType::Reshare {
            return Err(SwitchError::Transport(format!(
                "unexpected message type {}",
                st.message.msg_type
            )));
        }
        let reshare = Reshare::from_ssz_bytes(&st.message.data)
            .map_err(|e| SwitchError::Transport(format!("failed to decode reshare: {e:?}")))?;
        let initiator_key = self.verify_initiator(&st, &reshare.initiator_public_key)?;
        let all: Vec<Operator> = reshare
            .old_operators
            .iter()
            .chain(reshare.new_operators.iter())
            .cloned()
            .collect();
        let operator_id = self.own_id(&all)?;
        let id = st.message.identifier;
        info!(reqid = hex::encode(id), operator_id, "starting reshare protocol");

        self.reserve(id)?;
        let (handle, response) = self
            .spawn_instance(id, operator_id, initiator_key, |opts| {
                LocalOwner::new_reshare(opts, id, reshare)
            })
            .await?;
        self.insert(id, handle)?;
        Ok(response)
    }

    async fn spawn_instance(
        &self,
        id: RequestId,
        operator_id: u64,
        initiator_key: Rsa<Public>,
        make_owner: impl FnOnce(OwnerOpts) -> Result<LocalOwner, dkg::OwnerError>,
    ) -> Result<(Arc<InstanceHandle>, Vec<u8>), SwitchError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let opts = OwnerOpts {
            operator_id,
            private_key: self.private_key.clone(),
            version: self.version.clone(),
            outbound: outbound_tx,
        };
        let owner = make_owner(opts).map_err(|e| SwitchError::Ceremony(e.to_string()))?;
        tokio::spawn(instance_task(owner, inbound_rx, self.phase_window));

        let handle = Arc::new(InstanceHandle {
            inbound: inbound_tx,
            outbound: tokio::sync::Mutex::new(outbound_rx),
            initiator_key,
            operator_id,
        });
        // The exchange was queued synchronously during owner construction.
        let response = self
            .read_response(&handle, EXCHANGE_READ_TIMEOUT)
            .await?
            .ok_or_else(|| SwitchError::Ceremony("instance produced no exchange".into()))?;
        Ok((handle, response))
    }

    async fn read_response(
        &self,
        handle: &InstanceHandle,
        window: Duration,
    ) -> Result<Option<Vec<u8>>, SwitchError> {
        let mut rx = handle.outbound.lock().await;
        match tokio::time::timeout(window, rx.recv()).await {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) | Err(_) => Ok(None),
        }
    }

    /// `/dkg`: relays a bundle of peer messages into the instance and waits
    /// for its next broadcast.
    pub async fn process_message(&self, body: &[u8]) -> Result<Vec<u8>, SwitchError> {
        let bundle = MultipleSignedTransports::from_ssz_bytes(body)
            .map_err(|e| SwitchError::Transport(format!("failed to decode bundle: {e:?}")))?;
        let id = bundle.identifier;
        let handle = self.lookup(&id).ok_or_else(|| {
            SwitchError::Transport("got message to instance that I don't have, send Init first".into())
        })?;

        let mut concatenated = Vec::new();
        for st in bundle.messages.iter() {
            concatenated.extend_from_slice(&st.as_ssz_bytes());
        }
        rsa_ops::verify_rsa(&handle.initiator_key, &concatenated, &bundle.signature)
            .map_err(|e| SwitchError::Ceremony(e.to_string()))?;

        let window = match bundle.messages.first().map(|st| st.message.msg_type) {
            Some(TransportType::Kyber) | Some(TransportType::ReshareKyber) => KYBER_READ_TIMEOUT,
            _ => EXCHANGE_READ_TIMEOUT,
        };
        for st in bundle.messages.iter() {
            if handle.inbound.send(st.clone()).is_err() {
                // The instance task exited; its last words are in the
                // outbound queue and picked up below.
                warn!(reqid = hex::encode(id), "instance task is gone");
                break;
            }
        }

        let response = match self.read_response(&handle, window).await? {
            Some(bytes) => bytes,
            None => self.empty_response(id, handle.operator_id)?,
        };
        if let Ok(st) = SignedTransport::from_ssz_bytes(&response) {
            if st.message.msg_type == TransportType::Error {
                warn!(reqid = hex::encode(id), "ceremony errored, evicting instance");
                self.evict(&id);
            }
        }
        Ok(response)
    }

    /// The signed placeholder returned when an instance has nothing to say
    /// within the window.
    fn empty_response(&self, id: RequestId, operator_id: u64) -> Result<Vec<u8>, SwitchError> {
        let transport = Transport::new(TransportType::Empty, id, Vec::new(), &self.version)
            .map_err(|_| SwitchError::Ceremony("failed to build empty response".into()))?;
        let signature = rsa_ops::sign_rsa(&self.private_key, &transport.as_ssz_bytes())?;
        let st = SignedTransport {
            message: transport,
            signer: operator_id,
            signature: VariableList::new(signature).expect("256 bytes fit the cap"),
        };
        Ok(st.as_ssz_bytes())
    }

    /// `/health_check`: a signed pong carrying our public key; the version
    /// rides in the transport.
    pub fn health_check(&self, body: &[u8]) -> Result<Vec<u8>, SwitchError> {
        let st = SignedTransport::from_ssz_bytes(body)
            .map_err(|e| SwitchError::Transport(format!("failed to decode envelope: {e:?}")))?;
        if st.message.msg_type != TransportType::Ping {
            return Err(SwitchError::Transport(format!(
                "unexpected message type {}",
                st.message.msg_type
            )));
        }
        let _ping = Ping::from_ssz_bytes(&st.message.data)
            .map_err(|e| SwitchError::Transport(format!("failed to decode ping: {e:?}")))?;
        let pong = Pong {
            pub_key: VariableList::new(self.encoded_public.clone())
                .map_err(|_| SwitchError::Ceremony("encoded key exceeds the cap".into()))?,
        };
        let transport = Transport::new(
            TransportType::Pong,
            st.message.identifier,
            pong.as_ssz_bytes(),
            &self.version,
        )
        .map_err(|_| SwitchError::Ceremony("failed to build pong".into()))?;
        let signature = rsa_ops::sign_rsa(&self.private_key, &transport.as_ssz_bytes())?;
        let signed = SignedTransport {
            message: transport,
            signer: 0,
            signature: VariableList::new(signature).expect("256 bytes fit the cap"),
        };
        Ok(signed.as_ssz_bytes())
    }

    /// `/results`: persists the final ceremony artifacts for audit.
    pub fn store_results(&self, body: &[u8]) -> Result<Vec<u8>, SwitchError> {
        let st = SignedTransport::from_ssz_bytes(body)
            .map_err(|e| SwitchError::Transport(format!("failed to decode envelope: {e:?}")))?;
        if st.message.msg_type != TransportType::Result {
            return Err(SwitchError::Transport(format!(
                "unexpected message type {}",
                st.message.msg_type
            )));
        }
        let results = ResultData::from_ssz_bytes(&st.message.data)
            .map_err(|e| SwitchError::Transport(format!("failed to decode results: {e:?}")))?;
        let handle = self.lookup(&results.identifier).ok_or_else(|| {
            SwitchError::Transport("got message to instance that I don't have, send Init first".into())
        })?;
        if st.signer != 0 {
            return Err(SwitchError::Ceremony(
                "results are not signed by the initiator".into(),
            ));
        }
        rsa_ops::verify_rsa(
            &handle.initiator_key,
            &st.message.as_ssz_bytes(),
            &st.signature,
        )
        .map_err(|e| SwitchError::Ceremony(e.to_string()))?;

        if let Some(dir) = &self.output_dir {
            let ceremony_dir = dir.join(hex::encode(results.identifier));
            std::fs::create_dir_all(&ceremony_dir)
                .map_err(|e| SwitchError::Ceremony(format!("cannot store results: {e}")))?;
            let files = [
                ("deposit_data.json", results.deposit_data.to_vec()),
                ("keyshares.json", results.keyshares_data.to_vec()),
                (
                    "proofs.json",
                    serde_json_bytes(&results).unwrap_or_default(),
                ),
            ];
            for (name, data) in files {
                if data.is_empty() {
                    continue;
                }
                std::fs::write(ceremony_dir.join(name), data)
                    .map_err(|e| SwitchError::Ceremony(format!("cannot store results: {e}")))?;
            }
            info!(
                reqid = hex::encode(results.identifier),
                "stored ceremony artifacts"
            );
        }
        Ok(Vec::new())
    }

    /// Decrypts our existing share out of a keyshares payload and signs the
    /// requested root with it. Serves both re-signing and keyshares
    /// validation; no instance state is created.
    fn sign_with_share(&self, st: &SignedTransport) -> Result<Vec<u8>, SwitchError> {
        let (operators, keyshares, initiator_public_key, root): (
            Vec<Operator>,
            Vec<u8>,
            Vec<u8>,
            Vec<u8>,
        ) = match st.message.msg_type {
            TransportType::BlsSignRequest => {
                let req = BlsSignRequest::from_ssz_bytes(&st.message.data).map_err(|e| {
                    SwitchError::Transport(format!("failed to decode sign request: {e:?}"))
                })?;
                (
                    req.operators.to_vec(),
                    req.keyshares.to_vec(),
                    req.initiator_public_key.to_vec(),
                    req.signing_root.to_vec(),
                )
            }
            TransportType::ValidateKeyshares => {
                let req = ValidateKeyshares::from_ssz_bytes(&st.message.data).map_err(|e| {
                    SwitchError::Transport(format!("failed to decode validation request: {e:?}"))
                })?;
                (
                    req.operators.to_vec(),
                    req.keyshares.to_vec(),
                    req.initiator_public_key.to_vec(),
                    st.message.identifier.to_vec(),
                )
            }
            _ => unreachable!("dispatched on message type"),
        };
        self.verify_initiator(st, &initiator_public_key)?;
        let operator_id = self.own_id(&operators)?;
        let position = operators
            .iter()
            .position(|op| op.id == operator_id)
            .expect("own id located above");
        let blob = parse_shares_blob(&keyshares, operators.len())
            .map_err(|e| SwitchError::Ceremony(e.to_string()))?;
        let plain = rsa_ops::decrypt_share(&self.private_key, &blob.encrypted_shares[position])?;
        let share_hex = String::from_utf8(plain)
            .map_err(|_| SwitchError::Ceremony("decrypted share is not hex".into()))?;
        let share = SecretKey::deserialize_hex(&share_hex)?;
        if share.public_key().to_bytes() != blob.share_pubkeys[position] {
            return Err(SwitchError::Ceremony(
                "encrypted share does not match its public key".into(),
            ));
        }
        let signature = share.sign(&root);
        let transport = Transport::new(
            st.message.msg_type,
            st.message.identifier,
            signature.to_bytes().to_vec(),
            &self.version,
        )
        .map_err(|_| SwitchError::Ceremony("failed to build response".into()))?;
        let rsa_sig = rsa_ops::sign_rsa(&self.private_key, &transport.as_ssz_bytes())?;
        let signed = SignedTransport {
            message: transport,
            signer: operator_id,
            signature: VariableList::new(rsa_sig).expect("256 bytes fit the cap"),
        };
        Ok(signed.as_ssz_bytes())
    }
}

fn serde_json_bytes(results: &ResultData) -> Option<Vec<u8>> {
    let proofs: Vec<&wire::SignedProof> = results.proofs.iter().collect();
    serde_json::to_vec(&proofs).ok()
}

/// The error payload for HTTP bodies.
pub fn error_body(message: &str) -> Vec<u8> {
    ErrSsz::new(message).as_ssz_bytes()
}

/// One ceremony's task: owns the `LocalOwner`, feeds it inbound messages and
/// fires its phase windows.
async fn instance_task(
    mut owner: LocalOwner,
    mut inbound: mpsc::UnboundedReceiver<SignedTransport>,
    window: Duration,
) {
    let mut pending: Option<(PhaseTimer, Pin<Box<Sleep>>)> = None;
    loop {
        let step = if let Some((timer, sleep)) = pending.as_mut() {
            tokio::select! {
                biased;
                msg = inbound.recv() => match msg {
                    Some(st) => Step::Message(st),
                    None => Step::Closed,
                },
                _ = sleep.as_mut() => Step::Timeout(*timer),
            }
        } else {
            match inbound.recv().await {
                Some(st) => Step::Message(st),
                None => Step::Closed,
            }
        };
        let outcome = match step {
            Step::Closed => break,
            Step::Message(st) => owner.process(&st),
            Step::Timeout(timer) => {
                pending = None;
                owner.on_phase_timeout(timer)
            }
        };
        match outcome {
            Ok(Some(timer)) => {
                let deadline = tokio::time::Instant::now() + window;
                pending = Some((timer, Box::pin(sleep_until(deadline))));
            }
            Ok(None) => {
                if owner.is_done() {
                    debug!(id = owner.operator_id(), "ceremony task finished");
                    break;
                }
            }
            Err(e) => {
                error!(id = owner.operator_id(), error = %e, "ceremony failed");
                owner.broadcast_error(&e.to_string());
                break;
            }
        }
    }
}

enum Step {
    Message(SignedTransport),
    Timeout(PhaseTimer),
    Closed,
}
