use serde::{Deserialize, Serialize};

use crate::messages::SignedProof;
use crate::serde_hex;

/// One operator's final output of a ceremony, carried as JSON inside an
/// `Output` transport, exactly like the rest of the published artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CeremonyResult {
    pub operator_id: u64,
    #[serde(with = "serde_hex::fixed")]
    pub request_id: [u8; 24],
    /// Base64 PEM encoded RSA public key of the operator.
    pub rsa_pub_key: String,
    #[serde(with = "serde_hex::fixed")]
    pub validator_pubkey: [u8; 48],
    #[serde(with = "serde_hex::fixed")]
    pub share_pubkey: [u8; 48],
    #[serde(with = "serde_hex")]
    pub encrypted_share: Vec<u8>,
    /// Absent in resharing ceremonies.
    #[serde(with = "serde_hex::option", default)]
    pub deposit_partial_signature: Option<Vec<u8>>,
    #[serde(with = "serde_hex::fixed")]
    pub owner_nonce_partial_signature: [u8; 96],
    /// Concatenated compressed G1 points of the public polynomial.
    #[serde(with = "serde_hex")]
    pub commits: Vec<u8>,
    pub signed_proof: SignedProof,
}

impl CeremonyResult {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod result_tests {
    use super::*;
    use crate::messages::Proof;
    use ssz_types::VariableList;

    fn sample() -> CeremonyResult {
        CeremonyResult {
            operator_id: 4,
            request_id: [1u8; 24],
            rsa_pub_key: "TFMtLS0=".into(),
            validator_pubkey: [2u8; 48],
            share_pubkey: [3u8; 48],
            encrypted_share: vec![4u8; 256],
            deposit_partial_signature: Some(vec![5u8; 96]),
            owner_nonce_partial_signature: [6u8; 96],
            commits: vec![7u8; 48 * 3],
            signed_proof: SignedProof {
                proof: Proof {
                    validator_pubkey: [2u8; 48],
                    encrypted_share: VariableList::new(vec![4u8; 256]).unwrap(),
                    share_pubkey: [3u8; 48],
                    owner: [8u8; 20],
                },
                signature: [9u8; 256],
            },
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let res = sample();
        let bytes = res.encode().unwrap();
        assert_eq!(res, CeremonyResult::decode(&bytes).unwrap());
    }

    #[test]
    fn reshare_result_has_no_deposit_signature() {
        let mut res = sample();
        res.deposit_partial_signature = None;
        let bytes = res.encode().unwrap();
        let decoded = CeremonyResult::decode(&bytes).unwrap();
        assert!(decoded.deposit_partial_signature.is_none());
    }
}
