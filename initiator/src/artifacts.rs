//! The published ceremony artifacts: deposit-data JSON, SSV keyshares JSON
//! and their validation.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dkg_crypto::bls::{PublicKey, Signature};
use dkg_crypto::deposit::{self, Network, MAX_EFFECTIVE_BALANCE_GWEI};
use wire::{build_shares_blob, parse_shares_blob, CeremonyResult, Operator};

use crate::error::InitiatorError;

/// Minimum launchpad-accepted deposit CLI version.
pub const DEPOSIT_CLI_VERSION: &str = "2.7.0";
/// Version tag of emitted keyshares files.
pub const KEYSHARES_VERSION: &str = "v1.1.0";

/// The ETH2 launchpad deposit file. All hex fields are unprefixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositDataJson {
    pub pubkey: String,
    pub withdrawal_credentials: String,
    pub amount: u64,
    pub signature: String,
    pub deposit_message_root: String,
    pub deposit_data_root: String,
    pub fork_version: String,
    pub network_name: String,
    pub deposit_cli_version: String,
}

/// The SSV keyshares file registered with the SSV contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShares {
    pub version: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub shares: Vec<KeySharesItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySharesItem {
    pub data: ShareData,
    pub payload: SharesPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareData {
    #[serde(rename = "ownerNonce")]
    pub owner_nonce: u64,
    /// Checksummed hex address.
    #[serde(rename = "ownerAddress")]
    pub owner_address: String,
    /// `0x`-prefixed validator public key.
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub operators: Vec<OperatorData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorData {
    pub id: u64,
    /// Base64 PEM encoded RSA public key.
    #[serde(rename = "operatorKey")]
    pub operator_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharesPayload {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "operatorIds")]
    pub operator_ids: Vec<u64>,
    /// `0x || signature(96) || pubkeys(48 * N) || encrypted shares(256 * N)`.
    #[serde(rename = "sharesData")]
    pub shares_data: String,
}

/// Builds the deposit file from the recovered master signature.
pub fn build_deposit_json(
    validator_pubkey: &[u8; 48],
    withdrawal_address: &[u8],
    network: Network,
    master_signature: &Signature,
) -> Result<DepositDataJson, InitiatorError> {
    let fork = network.fork_version();
    let credentials = deposit::eth1_withdrawal_credentials(withdrawal_address)?;
    let message_root = deposit::deposit_message_root(
        validator_pubkey,
        credentials,
        MAX_EFFECTIVE_BALANCE_GWEI,
    )?;
    let signature = master_signature.to_bytes();
    let data_root = deposit::deposit_data_root(
        validator_pubkey,
        credentials,
        MAX_EFFECTIVE_BALANCE_GWEI,
        &signature,
    )?;
    Ok(DepositDataJson {
        pubkey: hex::encode(validator_pubkey),
        withdrawal_credentials: hex::encode(credentials),
        amount: MAX_EFFECTIVE_BALANCE_GWEI,
        signature: hex::encode(signature),
        deposit_message_root: hex::encode(message_root),
        deposit_data_root: hex::encode(data_root),
        fork_version: hex::encode(fork),
        network_name: network.name().to_string(),
        deposit_cli_version: DEPOSIT_CLI_VERSION.to_string(),
    })
}

/// Field-format and signature checks on an emitted deposit file.
pub fn validate_deposit_json(json: &DepositDataJson) -> Result<(), InitiatorError> {
    if json.pubkey.len() != 96
        || json.withdrawal_credentials.len() != 64
        || json.signature.len() != 192
        || json.deposit_message_root.len() != 64
        || json.deposit_data_root.len() != 64
        || json.fork_version.len() != 8
    {
        return Err(InitiatorError::Ceremony(
            "resulting deposit data json has wrong fields length".into(),
        ));
    }
    if json.amount != MAX_EFFECTIVE_BALANCE_GWEI {
        return Err(InitiatorError::Ceremony(
            "resulting deposit data json has wrong amount".into(),
        ));
    }
    let cli = semver::Version::parse(&json.deposit_cli_version)
        .map_err(|e| InitiatorError::Ceremony(format!("bad deposit cli version: {e}")))?;
    let min = semver::Version::parse(DEPOSIT_CLI_VERSION).expect("constant parses");
    if cli < min {
        return Err(InitiatorError::Ceremony(
            "resulting deposit data json has wrong deposit cli version".into(),
        ));
    }

    let decode = |field: &str, name: &str| {
        hex::decode(field)
            .map_err(|e| InitiatorError::Ceremony(format!("bad {name} hex: {e}")))
    };
    let pubkey: [u8; 48] = decode(&json.pubkey, "pubkey")?
        .try_into()
        .expect("length checked above");
    let credentials: [u8; 32] = decode(&json.withdrawal_credentials, "withdrawal credentials")?
        .try_into()
        .expect("length checked above");
    let signature: [u8; 96] = decode(&json.signature, "signature")?
        .try_into()
        .expect("length checked above");
    let fork: [u8; 4] = decode(&json.fork_version, "fork version")?
        .try_into()
        .expect("length checked above");

    // Recompute both roots and verify the master signature.
    let message_root = deposit::deposit_message_root(&pubkey, credentials, json.amount)?;
    if hex::encode(message_root) != json.deposit_message_root {
        return Err(InitiatorError::Ceremony(
            "deposit message root does not match".into(),
        ));
    }
    let data_root = deposit::deposit_data_root(&pubkey, credentials, json.amount, &signature)?;
    if hex::encode(data_root) != json.deposit_data_root {
        return Err(InitiatorError::Ceremony(
            "deposit data root does not match".into(),
        ));
    }
    deposit::verify_deposit_data(&pubkey, &credentials[12..], fork, json.amount, &signature)?;
    Ok(())
}

/// Assembles the keyshares file from ceremony results already sorted by
/// ascending operator id.
pub fn build_keyshares(
    results: &[CeremonyResult],
    ops: &[Operator],
    owner: [u8; 20],
    nonce: u64,
    master_owner_nonce_sig: &Signature,
) -> Result<KeyShares, InitiatorError> {
    let entries: Vec<([u8; 48], Vec<u8>)> = results
        .iter()
        .map(|r| (r.share_pubkey, r.encrypted_share.clone()))
        .collect();
    let blob = build_shares_blob(&master_owner_nonce_sig.to_bytes(), &entries)
        .map_err(|e| InitiatorError::Ceremony(e.to_string()))?;

    let mut operator_data = Vec::with_capacity(results.len());
    for (result, op) in results.iter().zip(ops.iter()) {
        // The RSA key in the result must be the registry key we addressed.
        if result.rsa_pub_key.as_bytes() != &op.pub_key[..] {
            return Err(InitiatorError::Operator {
                id: result.operator_id,
                message: "ceremony result carries an unexpected RSA key".into(),
            });
        }
        operator_data.push(OperatorData {
            id: result.operator_id,
            operator_key: result.rsa_pub_key.clone(),
        });
    }

    let public_key = format!("0x{}", hex::encode(results[0].validator_pubkey));
    Ok(KeyShares {
        version: KEYSHARES_VERSION.to_string(),
        created_at: Utc::now(),
        shares: vec![KeySharesItem {
            data: ShareData {
                owner_nonce: nonce,
                owner_address: Address::from(owner).to_checksum(None),
                public_key: public_key.clone(),
                operators: operator_data,
            },
            payload: SharesPayload {
                public_key,
                operator_ids: results.iter().map(|r| r.operator_id).collect(),
                shares_data: format!("0x{}", hex::encode(blob)),
            },
        }],
    })
}

/// Structural and cryptographic checks on an emitted keyshares file, against
/// the ceremony results it was built from.
pub fn validate_keyshares(
    keyshares: &KeyShares,
    results: &[CeremonyResult],
    owner: [u8; 20],
    nonce: u64,
) -> Result<(), InitiatorError> {
    let item = keyshares
        .shares
        .first()
        .ok_or_else(|| InitiatorError::Ceremony("keyshares file has no shares".into()))?;
    if item.data.owner_nonce != nonce {
        return Err(InitiatorError::Ceremony("incorrect keyshares nonce".into()));
    }
    if item.data.owner_address != Address::from(owner).to_checksum(None) {
        return Err(InitiatorError::Ceremony("incorrect keyshares owner".into()));
    }
    let expected_pubkey = format!("0x{}", hex::encode(results[0].validator_pubkey));
    if item.data.public_key != expected_pubkey || item.payload.public_key != expected_pubkey {
        return Err(InitiatorError::Ceremony(
            "incorrect keyshares validator pub key".into(),
        ));
    }
    let expected_ids: Vec<u64> = results.iter().map(|r| r.operator_id).collect();
    if item.payload.operator_ids != expected_ids {
        return Err(InitiatorError::Ceremony(
            "incorrect keyshares operator IDs".into(),
        ));
    }

    let blob_bytes = hex::decode(item.payload.shares_data.trim_start_matches("0x"))
        .map_err(|e| InitiatorError::Ceremony(format!("cant decode enc shares {e}")))?;
    let blob = parse_shares_blob(&blob_bytes, results.len())
        .map_err(|e| InitiatorError::Ceremony(e.to_string()))?;

    // Both payload sections must line up with the ascending-id results.
    for (i, result) in results.iter().enumerate() {
        if blob.share_pubkeys[i] != result.share_pubkey
            || blob.encrypted_shares[i] != result.encrypted_share
        {
            return Err(InitiatorError::Ceremony("shares order is incorrect".into()));
        }
    }

    let digest = deposit::owner_nonce_digest(&owner, nonce);
    let master = Signature::from_bytes(&blob.signature)?;
    let validator = PublicKey::from_bytes(&results[0].validator_pubkey)?;
    if !validator.verify(&digest, &master) {
        return Err(InitiatorError::Ceremony(
            "owner+nonce signature is invalid at keyshares json".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod artifact_tests {
    use super::*;
    use dkg_crypto::bls::SecretKey;

    #[test]
    fn deposit_json_builds_and_validates() {
        let sk = SecretKey::random();
        let pubkey = sk.public_key().to_bytes();
        let withdraw = [0x44u8; 20];
        let root = deposit::deposit_signing_root(
            &pubkey,
            &withdraw,
            Network::Holesky.fork_version(),
            MAX_EFFECTIVE_BALANCE_GWEI,
        )
        .unwrap();
        let sig = sk.sign(&root);
        let json = build_deposit_json(&pubkey, &withdraw, Network::Holesky, &sig).unwrap();
        assert_eq!(json.amount, 32_000_000_000);
        assert_eq!(json.network_name, "holesky");
        validate_deposit_json(&json).unwrap();

        let mut wrong = json.clone();
        wrong.amount = 16_000_000_000;
        assert!(validate_deposit_json(&wrong).is_err());
    }

    #[test]
    fn stale_deposit_cli_version_is_rejected() {
        let sk = SecretKey::random();
        let pubkey = sk.public_key().to_bytes();
        let withdraw = [0x44u8; 20];
        let root = deposit::deposit_signing_root(
            &pubkey,
            &withdraw,
            Network::Mainnet.fork_version(),
            MAX_EFFECTIVE_BALANCE_GWEI,
        )
        .unwrap();
        let sig = sk.sign(&root);
        let mut json = build_deposit_json(&pubkey, &withdraw, Network::Mainnet, &sig).unwrap();
        json.deposit_cli_version = "2.6.0".into();
        let err = validate_deposit_json(&json).unwrap_err();
        assert!(err.to_string().contains("deposit cli version"));
    }

    fn sample_results(owner: [u8; 20], nonce: u64) -> (Vec<CeremonyResult>, Signature) {
        // A degree-2 polynomial shared among four operators.
        use blstrs_shim::*;
        let master = SecretKey::random();
        let shares = share_out(&master, 4, 3);
        let digest = deposit::owner_nonce_digest(&owner, nonce);
        let validator = master.public_key().to_bytes();
        let results: Vec<CeremonyResult> = shares
            .iter()
            .map(|(id, sk)| CeremonyResult {
                operator_id: *id,
                request_id: [0u8; 24],
                rsa_pub_key: format!("key-{id}"),
                validator_pubkey: validator,
                share_pubkey: sk.public_key().to_bytes(),
                encrypted_share: vec![*id as u8; 256],
                deposit_partial_signature: None,
                owner_nonce_partial_signature: sk.sign(&digest).to_bytes(),
                commits: validator.to_vec(),
                signed_proof: wire::SignedProof {
                    proof: wire::Proof {
                        validator_pubkey: validator,
                        encrypted_share: ssz_types::VariableList::new(vec![*id as u8; 256])
                            .unwrap(),
                        share_pubkey: sk.public_key().to_bytes(),
                        owner,
                    },
                    signature: [0u8; 256],
                },
            })
            .collect();
        let partials: Vec<(u64, Signature)> = results
            .iter()
            .map(|r| {
                (
                    r.operator_id,
                    Signature::from_bytes(&r.owner_nonce_partial_signature).unwrap(),
                )
            })
            .collect();
        let master_sig = dkg_crypto::threshold::recover_signature(&partials).unwrap();
        (results, master_sig)
    }

    /// Tiny local Shamir split for test data.
    mod blstrs_shim {
        use dkg_crypto::bls::SecretKey;

        pub fn share_out(master: &SecretKey, n: u64, t: usize) -> Vec<(u64, SecretKey)> {
            use blstrs::Scalar;
            use ff::Field;
            let mut coeffs = vec![master.to_scalar()];
            for _ in 1..t {
                coeffs.push(Scalar::random(&mut rand::rngs::OsRng));
            }
            (1..=n)
                .map(|id| {
                    let x = Scalar::from(id);
                    let mut acc = Scalar::ZERO;
                    for c in coeffs.iter().rev() {
                        acc = acc * x + c;
                    }
                    (id, SecretKey::from_scalar(acc))
                })
                .collect()
        }
    }

    fn ops_for(results: &[CeremonyResult]) -> Vec<Operator> {
        results
            .iter()
            .map(|r| Operator::new(r.operator_id, r.rsa_pub_key.as_bytes().to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn keyshares_build_and_validate() {
        let owner = [0x77u8; 20];
        let (results, master_sig) = sample_results(owner, 5);
        let keyshares =
            build_keyshares(&results, &ops_for(&results), owner, 5, &master_sig).unwrap();
        validate_keyshares(&keyshares, &results, owner, 5).unwrap();
        assert!(keyshares.shares[0].payload.shares_data.starts_with("0x"));
        assert_eq!(keyshares.shares[0].data.operators.len(), 4);
    }

    #[test]
    fn reversed_encrypted_shares_fail_the_order_check() {
        let owner = [0x77u8; 20];
        let (results, master_sig) = sample_results(owner, 5);
        let keyshares =
            build_keyshares(&results, &ops_for(&results), owner, 5, &master_sig).unwrap();

        // Reverse the encrypted-share section while keeping pubkeys ascending.
        let blob_hex = keyshares.shares[0].payload.shares_data.clone();
        let mut blob = hex::decode(blob_hex.trim_start_matches("0x")).unwrap();
        let enc_offset = 96 + 4 * 48;
        let mut sections: Vec<Vec<u8>> = blob[enc_offset..]
            .chunks(256)
            .map(|c| c.to_vec())
            .collect();
        sections.reverse();
        blob.truncate(enc_offset);
        for section in sections {
            blob.extend_from_slice(&section);
        }
        let mut tampered = keyshares.clone();
        tampered.shares[0].payload.shares_data = format!("0x{}", hex::encode(blob));

        let err = validate_keyshares(&tampered, &results, owner, 5).unwrap_err();
        assert_eq!(err.to_string(), "shares order is incorrect");
    }

    #[test]
    fn wrong_nonce_fails_signature_validation() {
        let owner = [0x77u8; 20];
        let (results, master_sig) = sample_results(owner, 5);
        let keyshares =
            build_keyshares(&results, &ops_for(&results), owner, 6, &master_sig).unwrap();
        let err = validate_keyshares(&keyshares, &results, owner, 6).unwrap_err();
        assert!(err.to_string().contains("owner+nonce signature is invalid"));
    }
}
