//! Deposit-data roots and the owner/nonce digest for the SSV registry.

use alloy_primitives::keccak256;
use ssz_types::typenum::{U4, U48, U96};
use ssz_types::FixedVector;
use tree_hash::{Hash256, TreeHash};
use tree_hash_derive::TreeHash;

use crate::bls::{PublicKey, Signature};
use crate::error::CryptoError;

/// The only deposit amount a ceremony will sign.
pub const MAX_EFFECTIVE_BALANCE_GWEI: u64 = 32_000_000_000;

const DOMAIN_DEPOSIT: [u8; 4] = [0x03, 0x00, 0x00, 0x00];

/// Ethereum networks the ceremony can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Prater,
    Holesky,
}

impl Network {
    pub fn fork_version(&self) -> [u8; 4] {
        match self {
            Self::Mainnet => [0x00, 0x00, 0x00, 0x00],
            Self::Prater => [0x00, 0x00, 0x10, 0x20],
            Self::Holesky => [0x01, 0x01, 0x70, 0x00],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Prater => "prater",
            Self::Holesky => "holesky",
        }
    }

    pub fn from_fork(fork: [u8; 4]) -> Result<Self, CryptoError> {
        match fork {
            [0x00, 0x00, 0x00, 0x00] => Ok(Self::Mainnet),
            [0x00, 0x00, 0x10, 0x20] => Ok(Self::Prater),
            [0x01, 0x01, 0x70, 0x00] => Ok(Self::Holesky),
            other => Err(CryptoError::Deposit(format!(
                "unknown fork version {}",
                hex::encode(other)
            ))),
        }
    }

    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name {
            "mainnet" => Ok(Self::Mainnet),
            "prater" | "goerli" => Ok(Self::Prater),
            "holesky" => Ok(Self::Holesky),
            other => Err(CryptoError::Deposit(format!("unknown network {other}"))),
        }
    }
}

#[derive(TreeHash)]
struct DepositMessage {
    pubkey: FixedVector<u8, U48>,
    withdrawal_credentials: Hash256,
    amount: u64,
}

#[derive(TreeHash)]
struct DepositDataContainer {
    pubkey: FixedVector<u8, U48>,
    withdrawal_credentials: Hash256,
    amount: u64,
    signature: FixedVector<u8, U96>,
}

#[derive(TreeHash)]
struct SigningData {
    object_root: Hash256,
    domain: Hash256,
}

#[derive(TreeHash)]
struct ForkData {
    current_version: FixedVector<u8, U4>,
    genesis_validators_root: Hash256,
}

/// ETH1 withdrawal credentials: `0x01 || 0x00 * 11 || address`.
pub fn eth1_withdrawal_credentials(withdrawal_address: &[u8]) -> Result<[u8; 32], CryptoError> {
    if withdrawal_address.len() != 20 {
        return Err(CryptoError::Deposit(
            "withdrawal credentials malformed".into(),
        ));
    }
    let mut creds = [0u8; 32];
    creds[0] = 0x01;
    creds[12..].copy_from_slice(withdrawal_address);
    Ok(creds)
}

fn check_amount(amount: u64) -> Result<(), CryptoError> {
    if amount != MAX_EFFECTIVE_BALANCE_GWEI {
        return Err(CryptoError::Deposit(format!("wrong amount {amount}")));
    }
    Ok(())
}

fn fixed<N: ssz_types::typenum::Unsigned>(bytes: &[u8]) -> FixedVector<u8, N> {
    FixedVector::new(bytes.to_vec()).expect("caller provides correctly sized bytes")
}

/// `compute_domain(DOMAIN_DEPOSIT, fork_version, genesis_validators_root=0)`.
pub fn deposit_domain(fork: [u8; 4]) -> Hash256 {
    let fork_data = ForkData {
        current_version: fixed::<U4>(&fork),
        genesis_validators_root: Hash256::ZERO,
    };
    let fork_data_root = fork_data.tree_hash_root();
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(&DOMAIN_DEPOSIT);
    domain[4..].copy_from_slice(&fork_data_root.as_slice()[..28]);
    Hash256::from(domain)
}

pub fn deposit_message_root(
    pubkey: &[u8; 48],
    withdrawal_credentials: [u8; 32],
    amount: u64,
) -> Result<[u8; 32], CryptoError> {
    check_amount(amount)?;
    let message = DepositMessage {
        pubkey: fixed::<U48>(pubkey),
        withdrawal_credentials: Hash256::from(withdrawal_credentials),
        amount,
    };
    Ok(message.tree_hash_root().0)
}

/// The root every operator partially signs for the deposit.
pub fn deposit_signing_root(
    pubkey: &[u8; 48],
    withdrawal_address: &[u8],
    fork: [u8; 4],
    amount: u64,
) -> Result<[u8; 32], CryptoError> {
    let creds = eth1_withdrawal_credentials(withdrawal_address)?;
    let message_root = deposit_message_root(pubkey, creds, amount)?;
    let signing = SigningData {
        object_root: Hash256::from(message_root),
        domain: deposit_domain(fork),
    };
    Ok(signing.tree_hash_root().0)
}

pub fn deposit_data_root(
    pubkey: &[u8; 48],
    withdrawal_credentials: [u8; 32],
    amount: u64,
    signature: &[u8; 96],
) -> Result<[u8; 32], CryptoError> {
    check_amount(amount)?;
    let data = DepositDataContainer {
        pubkey: fixed::<U48>(pubkey),
        withdrawal_credentials: Hash256::from(withdrawal_credentials),
        amount,
        signature: fixed::<U96>(signature),
    };
    Ok(data.tree_hash_root().0)
}

/// Recomputes the signing root and checks the master signature against it.
pub fn verify_deposit_data(
    pubkey: &[u8; 48],
    withdrawal_address: &[u8],
    fork: [u8; 4],
    amount: u64,
    signature: &[u8; 96],
) -> Result<(), CryptoError> {
    let root = deposit_signing_root(pubkey, withdrawal_address, fork, amount)?;
    let pk = PublicKey::from_bytes(pubkey)?;
    let sig = Signature::from_bytes(signature)?;
    if !pk.verify(&root, &sig) {
        return Err(CryptoError::Deposit(
            "deposit root signature recovered from shares is invalid".into(),
        ));
    }
    Ok(())
}

/// `keccak256("0x{owner_lowercase_hex}:{nonce}")`, the message the SSV
/// registry contract expects the keyshares signature over.
pub fn owner_nonce_digest(owner: &[u8; 20], nonce: u64) -> [u8; 32] {
    let data = format!("0x{}:{}", hex::encode(owner), nonce);
    keccak256(data.as_bytes()).0
}

#[cfg(test)]
mod deposit_tests {
    use super::*;
    use crate::bls::SecretKey;

    #[test]
    fn withdrawal_credentials_have_eth1_prefix() {
        let addr = [0xabu8; 20];
        let creds = eth1_withdrawal_credentials(&addr).unwrap();
        assert_eq!(creds[0], 0x01);
        assert_eq!(&creds[1..12], &[0u8; 11]);
        assert_eq!(&creds[12..], &addr);
    }

    #[test]
    fn malformed_withdrawal_credentials_rejected() {
        assert!(eth1_withdrawal_credentials(&[0u8; 19]).is_err());
        assert!(eth1_withdrawal_credentials(&[0u8; 32]).is_err());
    }

    #[test]
    fn wrong_amount_is_rejected() {
        let pk = [1u8; 48];
        assert!(deposit_message_root(&pk, [0u8; 32], 16_000_000_000).is_err());
        assert!(deposit_message_root(&pk, [0u8; 32], MAX_EFFECTIVE_BALANCE_GWEI).is_ok());
    }

    #[test]
    fn signing_root_depends_on_fork() {
        let sk = SecretKey::random();
        let pk = sk.public_key().to_bytes();
        let withdraw = [2u8; 20];
        let mainnet = deposit_signing_root(
            &pk,
            &withdraw,
            Network::Mainnet.fork_version(),
            MAX_EFFECTIVE_BALANCE_GWEI,
        )
        .unwrap();
        let holesky = deposit_signing_root(
            &pk,
            &withdraw,
            Network::Holesky.fork_version(),
            MAX_EFFECTIVE_BALANCE_GWEI,
        )
        .unwrap();
        assert_ne!(mainnet, holesky);
    }

    #[test]
    fn deposit_signature_round_trip() {
        let sk = SecretKey::random();
        let pk = sk.public_key().to_bytes();
        let withdraw = [7u8; 20];
        let fork = Network::Mainnet.fork_version();
        let root =
            deposit_signing_root(&pk, &withdraw, fork, MAX_EFFECTIVE_BALANCE_GWEI).unwrap();
        let sig = sk.sign(&root).to_bytes();
        verify_deposit_data(&pk, &withdraw, fork, MAX_EFFECTIVE_BALANCE_GWEI, &sig).unwrap();
    }

    #[test]
    fn owner_nonce_digest_is_lowercase_prefixed() {
        let owner = [0xAAu8; 20];
        let zero = owner_nonce_digest(&owner, 0);
        let one = owner_nonce_digest(&owner, 1);
        assert_ne!(zero, one);
        let expected = keccak256(format!("0x{}:{}", "aa".repeat(20), 0).as_bytes()).0;
        assert_eq!(zero, expected);
    }

    #[test]
    fn network_fork_round_trip() {
        for net in [Network::Mainnet, Network::Prater, Network::Holesky] {
            assert_eq!(Network::from_fork(net.fork_version()).unwrap(), net);
            assert_eq!(Network::from_name(net.name()).unwrap(), net);
        }
        assert!(Network::from_fork([9, 9, 9, 9]).is_err());
    }
}
