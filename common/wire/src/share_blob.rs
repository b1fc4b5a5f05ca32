//! Layout of the SSV on-chain shares payload:
//! `signature(96) || share_pubkeys(48 * N) || encrypted_shares(256 * N)`,
//! both sections in ascending operator-id order.

use crate::{BLS_PUBKEY_LEN, BLS_SIGNATURE_LEN, ENCRYPTED_SHARE_LEN};

#[derive(Debug, Clone, PartialEq)]
pub struct SharesBlob {
    pub signature: [u8; BLS_SIGNATURE_LEN],
    pub share_pubkeys: Vec<[u8; BLS_PUBKEY_LEN]>,
    pub encrypted_shares: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub struct BlobError(pub String);

impl std::fmt::Display for BlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BlobError {}

/// Assembles the payload from per-operator `(share_pubkey, encrypted_share)`
/// pairs, which must already be in ascending operator-id order.
pub fn build_shares_blob(
    signature: &[u8; BLS_SIGNATURE_LEN],
    entries: &[([u8; BLS_PUBKEY_LEN], Vec<u8>)],
) -> Result<Vec<u8>, BlobError> {
    let mut blob = Vec::with_capacity(
        BLS_SIGNATURE_LEN + entries.len() * (BLS_PUBKEY_LEN + ENCRYPTED_SHARE_LEN),
    );
    blob.extend_from_slice(signature);
    for (pubkey, _) in entries {
        blob.extend_from_slice(pubkey);
    }
    for (_, encrypted) in entries {
        if encrypted.len() != ENCRYPTED_SHARE_LEN {
            return Err(BlobError(format!(
                "encrypted share has {} bytes, want {ENCRYPTED_SHARE_LEN}",
                encrypted.len()
            )));
        }
        blob.extend_from_slice(encrypted);
    }
    Ok(blob)
}

/// Splits a payload for `operator_count` operators back into its sections.
pub fn parse_shares_blob(blob: &[u8], operator_count: usize) -> Result<SharesBlob, BlobError> {
    let pubkeys_offset = BLS_PUBKEY_LEN * operator_count + BLS_SIGNATURE_LEN;
    let expected = ENCRYPTED_SHARE_LEN * operator_count + pubkeys_offset;
    if blob.len() != expected {
        return Err(BlobError("shares data len is not correct".into()));
    }
    let signature: [u8; BLS_SIGNATURE_LEN] = blob[..BLS_SIGNATURE_LEN]
        .try_into()
        .expect("length checked above");
    let share_pubkeys = blob[BLS_SIGNATURE_LEN..pubkeys_offset]
        .chunks(BLS_PUBKEY_LEN)
        .map(|c| c.try_into().expect("chunk size is exact"))
        .collect();
    let encrypted_shares = blob[pubkeys_offset..]
        .chunks(ENCRYPTED_SHARE_LEN)
        .map(|c| c.to_vec())
        .collect();
    Ok(SharesBlob {
        signature,
        share_pubkeys,
        encrypted_shares,
    })
}

#[cfg(test)]
mod share_blob_tests {
    use super::*;

    #[test]
    fn build_parse_round_trip() {
        let entries: Vec<([u8; 48], Vec<u8>)> = (0..4u8)
            .map(|i| ([i; 48], vec![i + 10; 256]))
            .collect();
        let blob = build_shares_blob(&[9u8; 96], &entries).unwrap();
        assert_eq!(blob.len(), 96 + 4 * (48 + 256));
        let parsed = parse_shares_blob(&blob, 4).unwrap();
        assert_eq!(parsed.signature, [9u8; 96]);
        assert_eq!(parsed.share_pubkeys.len(), 4);
        assert_eq!(parsed.share_pubkeys[2], [2u8; 48]);
        assert_eq!(parsed.encrypted_shares[3], vec![13u8; 256]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = parse_shares_blob(&[0u8; 100], 4).unwrap_err();
        assert_eq!(err.to_string(), "shares data len is not correct");
    }

    #[test]
    fn short_encrypted_share_is_rejected() {
        let entries = vec![([0u8; 48], vec![0u8; 255])];
        assert!(build_shares_blob(&[0u8; 96], &entries).is_err());
    }
}
