//! RSA operations for ceremony transports and share encryption.
//!
//! Public keys travel base64 encoded, wrapping a PEM block labelled
//! `RSA PUBLIC KEY` that actually carries PKIX bytes. That is the encoding
//! the deployed fleet uses, so both labels are translated on parse.

use base64::prelude::*;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{RsaPssSaltlen, Signer, Verifier};

use crate::error::CryptoError;

const RSA_BITS: u32 = 2048;

/// Generates a fresh 2048-bit RSA keypair.
pub fn generate_rsa_keys() -> Result<(Rsa<Private>, Rsa<Public>), CryptoError> {
    let private = Rsa::generate(RSA_BITS)?;
    let public = public_from_private(&private)?;
    Ok((private, public))
}

pub fn public_from_private(key: &Rsa<Private>) -> Result<Rsa<Public>, CryptoError> {
    Ok(Rsa::from_public_components(
        key.n().to_owned()?,
        key.e().to_owned()?,
    )?)
}

/// RSA-PSS-SHA256 signature with maximum salt length.
pub fn sign_rsa(key: &Rsa<Private>, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let pkey = PKey::from_rsa(key.clone())?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
    signer.set_rsa_padding(Padding::PKCS1_PSS)?;
    signer.set_rsa_pss_saltlen(RsaPssSaltlen::MAXIMUM_LENGTH)?;
    signer.update(msg)?;
    Ok(signer.sign_to_vec()?)
}

/// Verifies an RSA-PSS-SHA256 signature.
pub fn verify_rsa(key: &Rsa<Public>, msg: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let pkey = PKey::from_rsa(key.clone())?;
    let mut verifier = Verifier::new(MessageDigest::sha256(), &pkey)?;
    verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
    verifier.set_rsa_pss_saltlen(RsaPssSaltlen::MAXIMUM_LENGTH)?;
    verifier.update(msg)?;
    if verifier.verify(signature)? {
        Ok(())
    } else {
        Err(CryptoError::SignatureInvalid)
    }
}

/// Encodes a public key as base64 over a `RSA PUBLIC KEY` PEM block.
pub fn encode_public_key(key: &Rsa<Public>) -> Result<Vec<u8>, CryptoError> {
    let pem = key.public_key_to_pem()?;
    let pem_string = String::from_utf8(pem)
        .map_err(|e| CryptoError::InvalidRsaKey(format!("pem is not utf8: {e}")))?
        .replace("-----BEGIN PUBLIC KEY-----", "-----BEGIN RSA PUBLIC KEY-----")
        .replace("-----END PUBLIC KEY-----", "-----END RSA PUBLIC KEY-----");
    Ok(BASE64_STANDARD.encode(pem_string).into_bytes())
}

/// Parses a base64 PEM public key, accepting both PEM labels.
pub fn parse_public_key(encoded: &[u8]) -> Result<Rsa<Public>, CryptoError> {
    let pem_decoded = BASE64_STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidRsaKey(format!("unable to decode base64 pem data: {e}")))?;
    let pem_string = String::from_utf8(pem_decoded)
        .map_err(|e| CryptoError::InvalidRsaKey(format!("pem data is not a string: {e}")))?
        .replace("-----BEGIN RSA PUBLIC KEY-----", "-----BEGIN PUBLIC KEY-----")
        .replace("-----END RSA PUBLIC KEY-----", "-----END PUBLIC KEY-----");
    Rsa::public_key_from_pem(pem_string.as_bytes())
        .map_err(|e| CryptoError::InvalidRsaKey(format!("failed to parse RSA public key: {e}")))
}

/// PKCS#1 PEM of the private key, the payload stored inside the keystore.
pub fn private_key_to_pem(key: &Rsa<Private>) -> Result<Vec<u8>, CryptoError> {
    Ok(key.private_key_to_pem()?)
}

pub fn private_key_from_pem(pem: &[u8]) -> Result<Rsa<Private>, CryptoError> {
    Rsa::private_key_from_pem(pem)
        .map_err(|e| CryptoError::InvalidRsaKey(format!("failed to parse private key: {e}")))
}

/// PKCS#1 v1.5 encryption of a BLS share serialization. The ciphertext is
/// always one modulus, 256 bytes for the 2048-bit keys in use.
pub fn encrypt_share(key: &Rsa<Public>, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; key.size() as usize];
    let written = key.public_encrypt(plaintext, &mut buf, Padding::PKCS1)?;
    buf.truncate(written);
    Ok(buf)
}

pub fn decrypt_share(key: &Rsa<Private>, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; key.size() as usize];
    let written = key.private_decrypt(ciphertext, &mut buf, Padding::PKCS1)?;
    buf.truncate(written);
    Ok(buf)
}

#[cfg(test)]
mod rsa_tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let (private, public) = generate_rsa_keys().unwrap();
        let msg = b"transport bytes";
        let sig = sign_rsa(&private, msg).unwrap();
        assert_eq!(sig.len(), 256);
        verify_rsa(&public, msg, &sig).unwrap();
        assert!(verify_rsa(&public, b"other bytes", &sig).is_err());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (private, public) = generate_rsa_keys().unwrap();
        let mut sig = sign_rsa(&private, b"msg").unwrap();
        sig[0] ^= 0xff;
        assert!(verify_rsa(&public, b"msg", &sig).is_err());
    }

    #[test]
    fn public_key_encoding_round_trip() {
        let (_, public) = generate_rsa_keys().unwrap();
        let encoded = encode_public_key(&public).unwrap();
        let parsed = parse_public_key(&encoded).unwrap();
        assert_eq!(public.n(), parsed.n());
        assert_eq!(public.e(), parsed.e());
    }

    #[test]
    fn share_encryption_round_trip() {
        let (private, public) = generate_rsa_keys().unwrap();
        let share_hex = "aa".repeat(32);
        let ciphertext = encrypt_share(&public, share_hex.as_bytes()).unwrap();
        assert_eq!(ciphertext.len(), 256);
        let plain = decrypt_share(&private, &ciphertext).unwrap();
        assert_eq!(plain, share_hex.as_bytes());
    }
}
