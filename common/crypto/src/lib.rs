//! Cryptographic primitives for DKG ceremonies: RSA transport authentication
//! and share encryption, BLS12-381 signing, threshold recovery, deposit-data
//! roots and the keystore guarding the operator key at rest.

pub use error::CryptoError;

pub mod bls;
pub mod deposit;
pub mod keystore;
pub mod rsa;
pub mod threshold;

mod error;

use rand::RngCore;

/// Fresh ceremony identifier: 16 random bytes followed by an 8 byte nonce.
pub fn new_request_id() -> [u8; 24] {
    let mut id = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut id[..16]);
    let nonce = rand::thread_rng().next_u64();
    id[16..].copy_from_slice(&nonce.to_le_bytes());
    id
}
