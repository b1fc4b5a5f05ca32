//! Lagrange recovery of threshold BLS material.
//!
//! Operator ids are the 1-indexed x-coordinates of the shares. The id set is
//! sorted ascending before interpolation so recovery is deterministic across
//! implementations.

use blstrs::{G1Projective, G2Projective, Scalar};
use ff::Field;
use group::Group;

use crate::bls::{PublicKey, Signature};
use crate::error::CryptoError;

/// Lagrange basis coefficients at x = 0 for the given id set.
fn lagrange_at_zero(ids: &[u64]) -> Result<Vec<Scalar>, CryptoError> {
    let mut coeffs = Vec::with_capacity(ids.len());
    for (i, &id_i) in ids.iter().enumerate() {
        let x_i = Scalar::from(id_i);
        let mut num = Scalar::ONE;
        let mut den = Scalar::ONE;
        for (j, &id_j) in ids.iter().enumerate() {
            if i == j {
                continue;
            }
            let x_j = Scalar::from(id_j);
            num *= x_j;
            den *= x_j - x_i;
        }
        let den_inv = Option::<Scalar>::from(den.invert()).ok_or_else(|| {
            CryptoError::InvalidBlsEncoding("duplicate share index in recovery set".into())
        })?;
        coeffs.push(num * den_inv);
    }
    Ok(coeffs)
}

fn sorted_pairs<T: Copy>(pairs: &[(u64, T)]) -> Vec<(u64, T)> {
    let mut sorted = pairs.to_vec();
    sorted.sort_by_key(|(id, _)| *id);
    sorted
}

/// Interpolates a master signature from partial signatures at x = 0.
pub fn recover_signature(partials: &[(u64, Signature)]) -> Result<Signature, CryptoError> {
    let sorted = sorted_pairs(partials);
    let ids: Vec<u64> = sorted.iter().map(|(id, _)| *id).collect();
    let coeffs = lagrange_at_zero(&ids)?;
    let mut acc = G2Projective::identity();
    for ((_, sig), lambda) in sorted.iter().zip(coeffs.iter()) {
        acc += sig.point() * lambda;
    }
    Ok(Signature::from_point(acc))
}

/// Interpolates the validator public key from share public keys at x = 0.
pub fn recover_validator_public_key(
    shares: &[(u64, PublicKey)],
) -> Result<PublicKey, CryptoError> {
    let sorted = sorted_pairs(shares);
    let ids: Vec<u64> = sorted.iter().map(|(id, _)| *id).collect();
    let coeffs = lagrange_at_zero(&ids)?;
    let mut acc = G1Projective::identity();
    for ((_, pk), lambda) in sorted.iter().zip(coeffs.iter()) {
        acc += pk.point() * lambda;
    }
    Ok(PublicKey::from_point(acc))
}

/// Recovers the master signature and checks it against the validator public
/// key before returning it.
pub fn recover_and_verify_signature(
    partials: &[(u64, Signature)],
    validator: &PublicKey,
    msg: &[u8],
) -> Result<Signature, CryptoError> {
    let master = recover_signature(partials)?;
    if !validator.verify(msg, &master) {
        return Err(CryptoError::SignatureReconstruction);
    }
    Ok(master)
}

/// Verifies every partial signature against its share public key; the first
/// failure aborts with the offending operator id.
pub fn verify_partial_signatures(
    partials: &[(u64, PublicKey, Signature)],
    msg: &[u8],
) -> Result<(), CryptoError> {
    for (id, share_pk, sig) in partials {
        if !share_pk.verify(msg, sig) {
            return Err(CryptoError::PartialSignature(*id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod threshold_tests {
    use super::*;
    use crate::bls::SecretKey;
    use rand::rngs::OsRng;

    /// Split a fresh secret into `n` shares of a degree `t - 1` polynomial.
    fn share_out(n: u64, t: usize) -> (SecretKey, Vec<(u64, SecretKey)>) {
        let master = SecretKey::random();
        let mut coeffs = vec![master.to_scalar()];
        for _ in 1..t {
            coeffs.push(Scalar::random(&mut OsRng));
        }
        let shares = (1..=n)
            .map(|id| {
                let x = Scalar::from(id);
                let mut acc = Scalar::ZERO;
                for c in coeffs.iter().rev() {
                    acc = acc * x + c;
                }
                (id, SecretKey::from_scalar(acc))
            })
            .collect();
        (master, shares)
    }

    #[test]
    fn recovers_signature_from_threshold_shares() {
        for (n, t) in [(4u64, 3usize), (7, 5), (10, 7), (13, 9)] {
            let (master, shares) = share_out(n, t);
            let msg = b"root";
            let partials: Vec<(u64, Signature)> = shares
                .iter()
                .take(t)
                .map(|(id, sk)| (*id, sk.sign(msg)))
                .collect();
            let recovered =
                recover_and_verify_signature(&partials, &master.public_key(), msg).unwrap();
            assert_eq!(recovered.to_bytes(), master.sign(msg).to_bytes());
        }
    }

    #[test]
    fn any_threshold_subset_recovers_the_validator_key() {
        let (master, shares) = share_out(7, 5);
        let subset: Vec<(u64, PublicKey)> = shares
            .iter()
            .skip(2)
            .map(|(id, sk)| (*id, sk.public_key()))
            .collect();
        let recovered = recover_validator_public_key(&subset).unwrap();
        assert_eq!(recovered.to_bytes(), master.public_key().to_bytes());
    }

    #[test]
    fn too_few_shares_fail_verification() {
        let (master, shares) = share_out(7, 5);
        let msg = b"root";
        let partials: Vec<(u64, Signature)> = shares
            .iter()
            .take(4)
            .map(|(id, sk)| (*id, sk.sign(msg)))
            .collect();
        let err = recover_and_verify_signature(&partials, &master.public_key(), msg).unwrap_err();
        assert_eq!(err.to_string(), "could not reconstruct a valid signature");
    }

    #[test]
    fn recovery_is_order_independent() {
        let (_, shares) = share_out(4, 3);
        let msg = b"root";
        let forward: Vec<(u64, Signature)> = shares
            .iter()
            .take(3)
            .map(|(id, sk)| (*id, sk.sign(msg)))
            .collect();
        let mut backward = forward.clone();
        backward.reverse();
        assert_eq!(
            recover_signature(&forward).unwrap().to_bytes(),
            recover_signature(&backward).unwrap().to_bytes()
        );
    }

    #[test]
    fn bad_partial_is_pinpointed() {
        let (_, shares) = share_out(4, 3);
        let msg = b"root";
        let mut partials: Vec<(u64, PublicKey, Signature)> = shares
            .iter()
            .map(|(id, sk)| (*id, sk.public_key(), sk.sign(msg)))
            .collect();
        partials[2].2 = shares[0].1.sign(b"something else");
        match verify_partial_signatures(&partials, msg) {
            Err(CryptoError::PartialSignature(id)) => assert_eq!(id, 3),
            other => panic!("expected partial signature error, got {other:?}"),
        }
    }
}
