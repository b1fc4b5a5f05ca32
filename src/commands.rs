use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use dkg_crypto::deposit::Network;
use dkg_crypto::keystore;
use dkg_crypto::rsa as rsa_ops;
use initiator::{
    load_operators_json, make_signed_reshare, reshare_root, Initiator, KeyShares,
    NoContractVerifier, Operators,
};
use operator::{Switch, SwitchConfig};
use wire::SignedProof;

use crate::cli::{
    GenerateKeysArgs, InitArgs, PingArgs, ReshareArgs, ResignArgs, StartOperatorArgs,
};
use crate::config::{self, resolve, resolve_list};

fn version() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

fn parse_address(s: &str) -> Result<[u8; 20], String> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| format!("not valid ETH address: {e}"))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| format!("not valid ETH address with len {len}"))
}

fn parse_root(s: &str) -> Result<[u8; 32], String> {
    let bytes =
        hex::decode(s.trim_start_matches("0x")).map_err(|e| format!("not valid root: {e}"))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| format!("signing root must be 32 bytes, got {len}"))
}

fn load_registry(path: &Path) -> Result<Operators, String> {
    let raw = std::fs::read(path)
        .map_err(|e| format!("cannot read operators info {}: {e}", path.display()))?;
    load_operators_json(&raw).map_err(|e| e.to_string())
}

/// Loads an RSA key from an encrypted keystore, or generates an ephemeral
/// one when no keystore is configured.
fn load_or_generate_key(
    keystore_path: Option<&Path>,
    password_path: Option<&Path>,
) -> Result<openssl::rsa::Rsa<openssl::pkey::Private>, String> {
    match keystore_path {
        None => {
            info!("no initiator key configured, generating an ephemeral one");
            let (private, _) = rsa_ops::generate_rsa_keys().map_err(|e| e.to_string())?;
            Ok(private)
        }
        Some(path) => {
            let password_path =
                password_path.ok_or("missing required flag --initiator-privkey-password")?;
            load_keystore_key(path, password_path)
        }
    }
}

fn load_keystore_key(
    keystore_path: &Path,
    password_path: &Path,
) -> Result<openssl::rsa::Rsa<openssl::pkey::Private>, String> {
    let blob = std::fs::read(keystore_path)
        .map_err(|e| format!("cannot read key file {}: {e}", keystore_path.display()))?;
    let password = std::fs::read_to_string(password_path)
        .map_err(|e| format!("cannot read password file {}: {e}", password_path.display()))?;
    let pem =
        keystore::decrypt_json(&blob, password.trim()).map_err(|e| e.to_string())?;
    rsa_ops::private_key_from_pem(&pem).map_err(|e| e.to_string())
}

fn write_artifact(dir: &Path, name: &str, data: &[u8]) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    let path = dir.join(name);
    std::fs::write(&path, data).map_err(|e| format!("cannot write {}: {e}", path.display()))?;
    info!(path = %path.display(), "wrote artifact");
    Ok(())
}

fn ceremony_dir(base: &Path, id: &[u8; 24]) -> PathBuf {
    base.join(hex::encode(id))
}

fn load_keyshares(path: &Path) -> Result<KeyShares, String> {
    let raw = std::fs::read(path)
        .map_err(|e| format!("cannot read keyshares {}: {e}", path.display()))?;
    serde_json::from_slice(&raw).map_err(|e| format!("cannot parse keyshares: {e}"))
}

pub async fn run_init(args: InitArgs) -> Result<(), String> {
    let file = config::load(args.config.as_deref())?;
    let registry_path = resolve(
        args.operators_info_path,
        file.operators_info_path,
        "operators-info-path",
    )?;
    let ids = resolve_list(args.operator_ids, file.operator_ids, "operator-ids")?;
    let withdraw = parse_address(&resolve(
        args.withdraw_address,
        file.withdraw_address,
        "withdraw-address",
    )?)?;
    let owner = parse_address(&resolve(
        args.owner_address,
        file.owner_address,
        "owner-address",
    )?)?;
    let nonce = resolve(args.nonce, file.nonce, "nonce")?;
    let network = Network::from_name(&resolve(args.network, file.network, "network")?)
        .map_err(|e| e.to_string())?;
    let output = resolve(args.output_path, file.output_path, "output-path")?;
    let key = load_or_generate_key(
        args.initiator_privkey
            .or(file.initiator_privkey)
            .as_deref(),
        args.initiator_privkey_password
            .or(file.initiator_privkey_password)
            .as_deref(),
    )?;

    let operators = load_registry(&registry_path)?;
    let client = Initiator::new(key, operators, &version()).map_err(|e| e.to_string())?;
    let id = dkg_crypto::new_request_id();
    info!(reqid = hex::encode(id), "starting dkg ceremony");
    let (deposit, keyshares, proofs) = client
        .start_dkg(id, withdraw, &ids, network, owner, nonce)
        .await
        .map_err(|e| e.to_string())?;

    let dir = ceremony_dir(&output, &id);
    write_artifact(
        &dir,
        "deposit_data.json",
        &serde_json::to_vec_pretty(&deposit).map_err(|e| e.to_string())?,
    )?;
    write_artifact(
        &dir,
        "keyshares.json",
        &serde_json::to_vec_pretty(&keyshares).map_err(|e| e.to_string())?,
    )?;
    write_artifact(
        &dir,
        "proofs.json",
        &serde_json::to_vec_pretty(&proofs).map_err(|e| e.to_string())?,
    )?;
    info!("ceremony completed successfully");
    Ok(())
}

pub async fn run_reshare(args: ReshareArgs) -> Result<(), String> {
    let file = config::load(args.config.as_deref())?;
    let registry_path = resolve(
        args.operators_info_path,
        file.operators_info_path,
        "operators-info-path",
    )?;
    let keyshares_path = resolve(args.keyshares, file.keyshares, "keyshares")?;
    let new_ids = resolve_list(
        args.new_operator_ids,
        file.new_operator_ids,
        "new-operator-ids",
    )?;
    let nonce = resolve(args.nonce, file.nonce, "nonce")?;
    let key = load_or_generate_key(
        args.initiator_privkey
            .or(file.initiator_privkey)
            .as_deref(),
        args.initiator_privkey_password
            .or(file.initiator_privkey_password)
            .as_deref(),
    )?;

    let operators = load_registry(&registry_path)?;
    let keyshares = load_keyshares(&keyshares_path)?;
    let client = Initiator::new(key, operators, &version()).map_err(|e| e.to_string())?;
    let reshare = client
        .build_reshare_message(&keyshares, &new_ids, nonce)
        .map_err(|e| e.to_string())?;
    let root = reshare_root(&reshare);

    let Some(signature) = args.signature.or(file.signature) else {
        // Two-step flow: hand the root to the owner account for signing.
        println!("{}", hex::encode(root));
        info!("sign this root with the owner account, then rerun with --signature");
        return Ok(());
    };
    let signature = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| format!("not a valid signature hex: {e}"))?;

    let proofs_path = resolve(args.proofs, file.proofs, "proofs")?;
    let proofs_raw = std::fs::read(&proofs_path)
        .map_err(|e| format!("cannot read proofs {}: {e}", proofs_path.display()))?;
    let proofs: Vec<SignedProof> =
        serde_json::from_slice(&proofs_raw).map_err(|e| format!("cannot parse proofs: {e}"))?;
    let output = resolve(args.output_path, file.output_path, "output-path")?;

    let signed = make_signed_reshare(reshare, signature).map_err(|e| e.to_string())?;
    let id = dkg_crypto::new_request_id();
    info!(reqid = hex::encode(id), "starting resharing ceremony");
    let (new_keyshares, new_proofs) = client
        .start_resharing(id, signed, &proofs, &NoContractVerifier)
        .await
        .map_err(|e| e.to_string())?;

    let dir = ceremony_dir(&output, &id);
    write_artifact(
        &dir,
        "keyshares.json",
        &serde_json::to_vec_pretty(&new_keyshares).map_err(|e| e.to_string())?,
    )?;
    write_artifact(
        &dir,
        "proofs.json",
        &serde_json::to_vec_pretty(&new_proofs).map_err(|e| e.to_string())?,
    )?;
    info!("resharing completed successfully");
    Ok(())
}

pub async fn run_resign(args: ResignArgs) -> Result<(), String> {
    let file = config::load(args.config.as_deref())?;
    let registry_path = resolve(
        args.operators_info_path,
        file.operators_info_path,
        "operators-info-path",
    )?;
    let keyshares_path = resolve(args.keyshares, file.keyshares, "keyshares")?;
    let root = parse_root(&resolve(args.signing_root, file.signing_root, "signing-root")?)?;
    let key = load_or_generate_key(
        args.initiator_privkey
            .or(file.initiator_privkey)
            .as_deref(),
        args.initiator_privkey_password
            .or(file.initiator_privkey_password)
            .as_deref(),
    )?;

    let operators = load_registry(&registry_path)?;
    let keyshares = load_keyshares(&keyshares_path)?;
    let client = Initiator::new(key, operators, &version()).map_err(|e| e.to_string())?;
    let id = dkg_crypto::new_request_id();
    let signature = client
        .resign(id, &keyshares, root)
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", hex::encode(signature));
    if let Some(output) = args.output_path.or(file.output_path) {
        write_artifact(
            &ceremony_dir(&output, &id),
            "signature.txt",
            hex::encode(signature).as_bytes(),
        )?;
    }
    Ok(())
}

pub async fn run_ping(args: PingArgs) -> Result<(), String> {
    let registry_path = args
        .operators_info_path
        .ok_or("missing required flag --operators-info-path")?;
    let operators = load_registry(&registry_path)?;
    let ids: Vec<u64> = if args.operator_ids.is_empty() {
        operators.keys().copied().collect()
    } else {
        args.operator_ids
    };
    let (key, _) = rsa_ops::generate_rsa_keys().map_err(|e| e.to_string())?;
    let client = Initiator::new(key, operators, &version()).map_err(|e| e.to_string())?;
    let report = client.health_check(&ids).await.map_err(|e| e.to_string())?;
    let mut unhealthy = 0usize;
    for (id, entry) in ids.iter().zip(report) {
        match entry {
            Ok(pong) => info!(
                operator = pong.id,
                addr = pong.addr,
                version = pong.version,
                "operator online and healthy"
            ),
            Err(e) => {
                unhealthy += 1;
                error!(operator = id, error = %e, "operator not healthy");
            }
        }
    }
    if unhealthy > 0 {
        return Err(format!("{unhealthy} operators are not healthy"));
    }
    Ok(())
}

pub async fn run_start_operator(args: StartOperatorArgs) -> Result<(), String> {
    let file = config::load(args.config.as_deref())?;
    let keystore_path = resolve(args.privkey, file.privkey, "privkey")?;
    let password_path = resolve(
        args.privkey_password,
        file.privkey_password,
        "privkey-password",
    )?;
    let port = resolve(args.port, file.port, "port")?;
    let private_key = load_keystore_key(&keystore_path, &password_path)?;

    let mut switch_config = SwitchConfig::new(private_key, version().into_bytes());
    switch_config.output_dir = args.output_path.or(file.output_path);
    let switch = Switch::new(switch_config).map_err(|e| e.to_string())?;
    info!(
        port,
        public_key = %String::from_utf8_lossy(switch.encoded_public_key()),
        "starting operator"
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    operator::run(switch, addr).await
}

pub fn run_generate_keys(args: GenerateKeysArgs) -> Result<(), String> {
    let output = args.output_path.ok_or("missing required flag --output-path")?;
    let (private, public) = rsa_ops::generate_rsa_keys().map_err(|e| e.to_string())?;
    let pem = rsa_ops::private_key_to_pem(&private).map_err(|e| e.to_string())?;
    let password = keystore::generate_secure_password();
    let encrypted = keystore::encrypt(&pem, &password).map_err(|e| e.to_string())?;

    write_artifact(
        &output,
        "encrypted_private_key.json",
        &serde_json::to_vec_pretty(&encrypted).map_err(|e| e.to_string())?,
    )?;
    write_artifact(&output, "password", password.as_bytes())?;
    let encoded = rsa_ops::encode_public_key(&public).map_err(|e| e.to_string())?;
    info!(
        public_key = %String::from_utf8_lossy(&encoded),
        "generated operator keys"
    );
    Ok(())
}
