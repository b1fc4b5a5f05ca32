//! Minimal-pubkey BLS12-381 signatures: public keys on G1 (48 bytes
//! compressed), signatures on G2 (96 bytes compressed), SHA-256 hash to curve.

use blstrs::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::prime::PrimeCurveAffine;
use group::{Curve, Group};
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// Domain separation tag of the Ethereum BLS signature scheme.
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

pub const PUBKEY_LEN: usize = 48;
pub const SIGNATURE_LEN: usize = 96;
pub const SCALAR_LEN: usize = 32;

#[derive(Clone)]
pub struct SecretKey(Scalar);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(pub(crate) G1Projective);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub(crate) G2Projective);

impl SecretKey {
    pub fn random() -> Self {
        Self(Scalar::random(&mut OsRng))
    }

    pub fn from_scalar(scalar: Scalar) -> Self {
        Self(scalar)
    }

    pub fn to_scalar(&self) -> Scalar {
        self.0
    }

    pub fn from_bytes_be(bytes: &[u8; SCALAR_LEN]) -> Result<Self, CryptoError> {
        Option::<Scalar>::from(Scalar::from_bytes_be(bytes))
            .map(Self)
            .ok_or_else(|| CryptoError::InvalidBlsEncoding("scalar out of field".into()))
    }

    pub fn to_bytes_be(&self) -> [u8; SCALAR_LEN] {
        self.0.to_bytes_be()
    }

    /// 64 lowercase hex characters; the form that gets RSA-encrypted.
    pub fn serialize_hex(&self) -> String {
        hex::encode(self.to_bytes_be())
    }

    pub fn deserialize_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| CryptoError::InvalidBlsEncoding(format!("share is not hex: {e}")))?;
        let arr: [u8; SCALAR_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidBlsEncoding("share has wrong length".into()))?;
        Self::from_bytes_be(&arr)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(G1Projective::generator() * self.0)
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        let h = G2Projective::hash_to_curve(msg, BLS_DST, &[]);
        Signature(h * self.0)
    }
}

impl PublicKey {
    pub fn from_point(point: G1Projective) -> Self {
        Self(point)
    }

    pub fn point(&self) -> G1Projective {
        self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PUBKEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidBlsEncoding("pubkey must be 48 bytes".into()))?;
        Option::<G1Affine>::from(G1Affine::from_compressed(&arr))
            .map(|a| Self(a.into()))
            .ok_or_else(|| CryptoError::InvalidBlsEncoding("pubkey is not on the curve".into()))
    }

    pub fn to_bytes(&self) -> [u8; PUBKEY_LEN] {
        self.0.to_affine().to_compressed()
    }

    pub fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        let h = G2Projective::hash_to_curve(msg, BLS_DST, &[]).to_affine();
        pairing(&self.0.to_affine(), &h)
            == pairing(&G1Affine::generator(), &signature.0.to_affine())
    }
}

impl Signature {
    pub fn from_point(point: G2Projective) -> Self {
        Self(point)
    }

    pub fn point(&self) -> G2Projective {
        self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidBlsEncoding("signature must be 96 bytes".into()))?;
        Option::<G2Affine>::from(G2Affine::from_compressed(&arr))
            .map(|a| Self(a.into()))
            .ok_or_else(|| CryptoError::InvalidBlsEncoding("signature is not on the curve".into()))
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0.to_affine().to_compressed()
    }
}

#[cfg(test)]
mod bls_tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let sk = SecretKey::random();
        let pk = sk.public_key();
        let sig = sk.sign(b"deposit root");
        assert!(pk.verify(b"deposit root", &sig));
        assert!(!pk.verify(b"other root", &sig));
    }

    #[test]
    fn point_serialization_round_trip() {
        let sk = SecretKey::random();
        let pk = sk.public_key();
        let sig = sk.sign(b"msg");
        assert_eq!(pk, PublicKey::from_bytes(&pk.to_bytes()).unwrap());
        assert_eq!(sig, Signature::from_bytes(&sig.to_bytes()).unwrap());
    }

    #[test]
    fn hex_share_round_trip() {
        let sk = SecretKey::random();
        let hex_repr = sk.serialize_hex();
        assert_eq!(hex_repr.len(), 64);
        let back = SecretKey::deserialize_hex(&hex_repr).unwrap();
        assert_eq!(sk.to_bytes_be(), back.to_bytes_be());
    }

    #[test]
    fn garbage_points_are_rejected() {
        assert!(PublicKey::from_bytes(&[0xffu8; 48]).is_err());
        assert!(Signature::from_bytes(&[0xffu8; 96]).is_err());
        assert!(SecretKey::deserialize_hex("zz").is_err());
    }
}
