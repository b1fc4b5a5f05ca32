//! Owner-signature verification for reshare messages.
//!
//! Externally-owned accounts sign the reshare root with plain ECDSA; contract
//! accounts validate through EIP-1271, which needs an Ethereum JSON-RPC
//! client and therefore stays behind a trait the embedding application
//! implements.

use alloy_primitives::{keccak256, Address};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};

use crate::error::InitiatorError;

const ECDSA_SIGNATURE_LEN: usize = 65;

/// Validates an owner's signature over a 32-byte reshare root.
pub trait OwnerSignatureVerifier: Send + Sync {
    fn verify(&self, owner: [u8; 20], root: [u8; 32], signature: &[u8])
        -> Result<bool, InitiatorError>;
}

/// EOA verification: recovers the signer from a 65-byte `r || s || v`
/// signature and compares the derived address.
#[derive(Debug, Default)]
pub struct EcdsaOwnerVerifier;

impl OwnerSignatureVerifier for EcdsaOwnerVerifier {
    fn verify(
        &self,
        owner: [u8; 20],
        root: [u8; 32],
        signature: &[u8],
    ) -> Result<bool, InitiatorError> {
        if signature.len() != ECDSA_SIGNATURE_LEN {
            return Err(InitiatorError::Ceremony(format!(
                "ecdsa signature must be {ECDSA_SIGNATURE_LEN} bytes, got {}",
                signature.len()
            )));
        }
        let recovery = match signature[64] {
            v @ 27..=28 => v - 27,
            v @ 0..=1 => v,
            v => {
                return Err(InitiatorError::Ceremony(format!(
                    "invalid ecdsa recovery id {v}"
                )))
            }
        };
        let recovery = RecoveryId::try_from(recovery)
            .map_err(|e| InitiatorError::Ceremony(format!("invalid recovery id: {e}")))?;
        let parsed = EcdsaSignature::from_slice(&signature[..64])
            .map_err(|e| InitiatorError::Ceremony(format!("invalid ecdsa signature: {e}")))?;
        let key = VerifyingKey::recover_from_prehash(&root, &parsed, recovery)
            .map_err(|e| InitiatorError::Ceremony(format!("ecdsa recovery failed: {e}")))?;
        Ok(address_of(&key) == Address::from(owner))
    }
}

fn address_of(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Placeholder for deployments without an Ethereum client configured.
#[derive(Debug, Default)]
pub struct NoContractVerifier;

impl OwnerSignatureVerifier for NoContractVerifier {
    fn verify(&self, _: [u8; 20], _: [u8; 32], _: &[u8]) -> Result<bool, InitiatorError> {
        Err(InitiatorError::Ceremony(
            "EIP-1271 verification requires an Ethereum JSON-RPC client".into(),
        ))
    }
}

/// Picks ECDSA for 65-byte signatures, the contract verifier otherwise.
pub fn verify_owner_signature(
    contract_verifier: &dyn OwnerSignatureVerifier,
    owner: [u8; 20],
    root: [u8; 32],
    signature: &[u8],
) -> Result<(), InitiatorError> {
    let valid = if signature.len() == ECDSA_SIGNATURE_LEN {
        EcdsaOwnerVerifier.verify(owner, root, signature)?
    } else {
        contract_verifier.verify(owner, root, signature)?
    };
    if !valid {
        return Err(InitiatorError::Ceremony(
            "reshare message signature isn't valid".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod reshare_sig_tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn sign_prehash(key: &SigningKey, root: [u8; 32]) -> Vec<u8> {
        let (signature, recovery) = key.sign_prehash_recoverable(&root).unwrap();
        let mut out = signature.to_bytes().to_vec();
        out.push(recovery.to_byte() + 27);
        out
    }

    #[test]
    fn recovers_the_signing_owner() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let owner: [u8; 20] = address_of(key.verifying_key()).into();
        let root = [0x5au8; 32];
        let signature = sign_prehash(&key, root);
        verify_owner_signature(&NoContractVerifier, owner, root, &signature).unwrap();
    }

    #[test]
    fn wrong_owner_is_rejected() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let root = [0x5au8; 32];
        let signature = sign_prehash(&key, root);
        let err =
            verify_owner_signature(&NoContractVerifier, [9u8; 20], root, &signature).unwrap_err();
        assert_eq!(err.to_string(), "reshare message signature isn't valid");
    }

    #[test]
    fn contract_signatures_need_a_client() {
        let err = verify_owner_signature(&NoContractVerifier, [0u8; 20], [0u8; 32], &[1, 2, 3])
            .unwrap_err();
        assert!(err.to_string().contains("EIP-1271"));
    }
}
