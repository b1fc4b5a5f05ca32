use blstrs::{G1Projective, Scalar};

/// A participant as seen by the protocol: the operator id (1-indexed, also
/// the x-coordinate of its share) and its fresh DKG public point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub id: u64,
    pub public: G1Projective,
}

/// One dealer's contribution: polynomial commitments and a share encrypted
/// to every share holder.
#[derive(Debug, Clone, PartialEq)]
pub struct DealBundle {
    pub dealer: u64,
    /// Commitments `A_k = a_k * G1` to the dealing polynomial coefficients.
    pub commits: Vec<G1Projective>,
    pub deals: Vec<Deal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    /// Operator id of the share holder this deal is addressed to.
    pub share_holder: u64,
    /// ECIES ciphertext of the evaluated share scalar.
    pub encrypted_share: Vec<u8>,
}

/// Complaints a share holder raises after verifying all deal bundles. An
/// empty complaint list is a valid explicit approval.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBundle {
    pub sender: u64,
    /// Dealer ids whose deal failed verification or was missing.
    pub complaints: Vec<u64>,
}

/// A complained-about dealer's defence: the plaintext shares for every
/// complaining holder, verifiable by everyone against the commitments.
#[derive(Debug, Clone, PartialEq)]
pub struct JustificationBundle {
    pub dealer: u64,
    pub justifications: Vec<Justification>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Justification {
    pub share_holder: u64,
    pub share: Scalar,
}

/// A holder's final share of the distributed key.
#[derive(Debug, Clone, PartialEq)]
pub struct PriShare {
    /// Operator id, the x-coordinate the share was evaluated at.
    pub index: u64,
    pub value: Scalar,
}

/// The distributed key material a holder walks away with: the public
/// polynomial (commits\[0\] is the validator public key) and its own share.
#[derive(Debug, Clone, PartialEq)]
pub struct DistKeyShare {
    pub commits: Vec<G1Projective>,
    pub share: PriShare,
}

impl DistKeyShare {
    pub fn public_key(&self) -> G1Projective {
        self.commits[0]
    }

    /// Concatenated compressed commitments, the form carried on the wire.
    pub fn commits_bytes(&self) -> Vec<u8> {
        use group::Curve;
        self.commits
            .iter()
            .flat_map(|c| c.to_affine().to_compressed())
            .collect()
    }
}
