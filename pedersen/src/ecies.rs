//! Share encryption for deal bundles: ephemeral ECDH on G1, SHA-256 key
//! derivation, AES-256-GCM.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use blstrs::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::{Curve, Group};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const EPHEMERAL_LEN: usize = 48;
const NONCE_LEN: usize = 12;

fn derive_key(shared: &G1Projective, ephemeral: &G1Projective) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared.to_affine().to_compressed());
    hasher.update(ephemeral.to_affine().to_compressed());
    hasher.finalize().into()
}

/// Encrypts `plaintext` to the holder's public point. Layout:
/// `ephemeral(48) || nonce(12) || ciphertext`.
pub fn encrypt(recipient: &G1Projective, plaintext: &[u8]) -> Result<Vec<u8>, String> {
    let eph_secret = Scalar::random(&mut OsRng);
    let eph_public = G1Projective::generator() * eph_secret;
    let shared = recipient * eph_secret;

    let key = derive_key(&shared, &eph_public);
    let cipher = Aes256Gcm::new(&key.into());
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| format!("share encryption failed: {e}"))?;

    let mut out = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&eph_public.to_affine().to_compressed());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a deal share with the holder's exchange secret.
pub fn decrypt(secret: &Scalar, data: &[u8]) -> Result<Vec<u8>, String> {
    if data.len() < EPHEMERAL_LEN + NONCE_LEN {
        return Err("ciphertext too short".into());
    }
    let eph_bytes: [u8; EPHEMERAL_LEN] = data[..EPHEMERAL_LEN].try_into().expect("sized above");
    let eph_public: G1Projective = Option::<G1Affine>::from(G1Affine::from_compressed(&eph_bytes))
        .ok_or("ephemeral point is not on the curve")?
        .into();
    let shared = eph_public * secret;
    let key = derive_key(&shared, &eph_public);
    let cipher = Aes256Gcm::new(&key.into());
    let nonce = Nonce::from_slice(&data[EPHEMERAL_LEN..EPHEMERAL_LEN + NONCE_LEN]);
    cipher
        .decrypt(nonce, &data[EPHEMERAL_LEN + NONCE_LEN..])
        .map_err(|e| format!("share decryption failed: {e}"))
}
