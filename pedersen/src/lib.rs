//! Pedersen-style distributed key generation over BLS12-381 G1.
//!
//! This crate is the protocol engine only: a synchronous state machine fed
//! with deal, response and justification bundles. It performs no I/O and
//! keeps no clock; the caller decides when a phase window has elapsed and
//! calls the corresponding `*_phase_end` method. Bundles produced by the
//! machine are handed back to the caller for broadcast.
//!
//! Two variants run on the same machine: a fresh DKG, where every share
//! holder also deals, and a resharing, where the old committee deals
//! polynomials anchored at their existing shares and the new committee
//! combines them without the distributed key ever changing.

use std::collections::{BTreeMap, BTreeSet};

use blstrs::{G1Projective, Scalar};
use ff::Field;
use group::Group;
use rand::rngs::OsRng;
use tracing::{debug, warn};

pub use codec::{
    decode_deal_bundle, decode_justification_bundle, decode_response_bundle, encode_deal_bundle,
    encode_justification_bundle, encode_response_bundle, CodecError,
};
pub use types::{
    Deal, DealBundle, DistKeyShare, Justification, JustificationBundle, Node, PriShare,
    ResponseBundle,
};

mod codec;
pub mod ecies;
mod types;

/// Configuration of one participant's view of a ceremony.
#[derive(Clone)]
#[derive(Debug)]
pub struct DkgConfig {
    /// Own operator id.
    pub me: u64,
    /// Exchange secret: decrypts deals addressed to us and, in a fresh DKG,
    /// doubles as the constant term of our dealing polynomial.
    pub secret: Scalar,
    /// Share holders after the ceremony.
    pub new_nodes: Vec<Node>,
    /// Dealers of an existing key; empty for a fresh DKG.
    pub old_nodes: Vec<Node>,
    /// Threshold of the (new) key: shares needed to reconstruct.
    pub t: u64,
    /// Threshold of the old key; resharing only.
    pub old_t: u64,
    /// Our existing share; present iff we are an old-committee dealer.
    pub old_share: Option<Scalar>,
    /// Commitment to each old dealer's existing share (`share * G1`), by
    /// operator id; resharing only.
    pub old_share_commits: BTreeMap<u64, G1Projective>,
    /// The existing distributed public key; resharing only.
    pub old_public: Option<G1Projective>,
}

impl DkgConfig {
    /// Plain fresh-DKG configuration.
    pub fn fresh(me: u64, secret: Scalar, nodes: Vec<Node>, t: u64) -> Self {
        Self {
            me,
            secret,
            new_nodes: nodes,
            old_nodes: Vec::new(),
            t,
            old_t: 0,
            old_share: None,
            old_share_commits: BTreeMap::new(),
            old_public: None,
        }
    }

    fn is_reshare(&self) -> bool {
        !self.old_nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Dealing,
    Responding,
    Justifying,
    Done,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Dealing => "dealing",
            Phase::Responding => "responding",
            Phase::Justifying => "justifying",
            Phase::Done => "done",
        }
    }
}

/// Returned by [`DkgState::receive_deal`].
#[derive(Debug, Clone, PartialEq)]
pub enum DealStatus {
    /// Still waiting for bundles from other dealers.
    Pending,
    /// All dealer bundles are in; if verification produced complaints, the
    /// bundle to broadcast is attached.
    Complete { response: Option<ResponseBundle> },
}

/// Returned by [`DkgState::on_response_phase_end`].
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEnd {
    Finished(Option<DistKeyShare>),
    /// Complaints are open; if we are an accused dealer, our justification
    /// bundle to broadcast is attached.
    Justifying(Option<JustificationBundle>),
}

#[derive(Debug)]
pub enum DkgError {
    Config(String),
    /// A second bundle of the same kind from the same sender.
    Duplicate,
    UnknownDealer(u64),
    UnknownSender(u64),
    WrongPhase {
        expected: &'static str,
        actual: &'static str,
    },
    InvalidBundle(String),
    NotEnoughQualified {
        qualified: usize,
        required: usize,
    },
    MissingShare(u64),
    /// Resharing produced a different distributed key.
    KeyChanged,
}

impl std::fmt::Display for DkgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid dkg config: {e}"),
            Self::Duplicate => write!(f, "duplicate message"),
            Self::UnknownDealer(id) => write!(f, "deal bundle from unknown dealer {id}"),
            Self::UnknownSender(id) => write!(f, "bundle from unknown sender {id}"),
            Self::WrongPhase { expected, actual } => {
                write!(f, "bundle arrived in phase {actual}, expected {expected}")
            }
            Self::InvalidBundle(e) => write!(f, "invalid bundle: {e}"),
            Self::NotEnoughQualified {
                qualified,
                required,
            } => write!(f, "not enough qualified deals: {qualified} of {required}"),
            Self::MissingShare(id) => write!(f, "no usable share from dealer {id}"),
            Self::KeyChanged => write!(f, "resharing changed the distributed key"),
        }
    }
}

impl std::error::Error for DkgError {}

#[derive(Debug)]
pub struct DkgState {
    cfg: DkgConfig,
    phase: Phase,
    /// Our dealing polynomial; empty if we are not a dealer.
    my_poly: Vec<Scalar>,
    /// Verified deal bundles by dealer id.
    bundles: BTreeMap<u64, DealBundle>,
    /// Every dealer id we have seen a bundle from, valid or not.
    seen_dealers: BTreeSet<u64>,
    /// Dealers disqualified outright (malformed bundle, failed justification,
    /// missing at the phase deadline).
    invalid_dealers: BTreeSet<u64>,
    /// Decrypted (or justified) shares addressed to us, by dealer id.
    my_shares: BTreeMap<u64, Scalar>,
    /// Dealers we personally complained about.
    my_complaints: BTreeSet<u64>,
    /// Open complaints: dealer id -> accuser ids.
    complaints: BTreeMap<u64, BTreeSet<u64>>,
    responses_seen: BTreeSet<u64>,
    justifications_seen: BTreeSet<u64>,
}

impl DkgState {
    pub fn new(cfg: DkgConfig) -> Result<Self, DkgError> {
        if cfg.new_nodes.is_empty() {
            return Err(DkgError::Config("no share holders".into()));
        }
        if cfg.t == 0 || cfg.t as usize > cfg.new_nodes.len() {
            return Err(DkgError::Config(format!(
                "threshold {} out of range for {} nodes",
                cfg.t,
                cfg.new_nodes.len()
            )));
        }
        for nodes in [&cfg.new_nodes, &cfg.old_nodes] {
            let mut ids = BTreeSet::new();
            for node in nodes {
                if node.id == 0 {
                    return Err(DkgError::Config("node ids are 1-indexed".into()));
                }
                if !ids.insert(node.id) {
                    return Err(DkgError::Config(format!("duplicate node id {}", node.id)));
                }
            }
        }
        if cfg.is_reshare() {
            if cfg.old_t == 0 || cfg.old_t as usize > cfg.old_nodes.len() {
                return Err(DkgError::Config(format!(
                    "old threshold {} out of range for {} old nodes",
                    cfg.old_t,
                    cfg.old_nodes.len()
                )));
            }
            if cfg.old_public.is_none() {
                return Err(DkgError::Config("resharing needs the existing key".into()));
            }
            for node in &cfg.old_nodes {
                if !cfg.old_share_commits.contains_key(&node.id) {
                    return Err(DkgError::Config(format!(
                        "no share commitment for old dealer {}",
                        node.id
                    )));
                }
            }
            let in_old = cfg.old_nodes.iter().any(|n| n.id == cfg.me);
            if in_old != cfg.old_share.is_some() {
                return Err(DkgError::Config(
                    "old committee members must present their existing share".into(),
                ));
            }
            if let Some(share) = cfg.old_share {
                if G1Projective::generator() * share != cfg.old_share_commits[&cfg.me] {
                    return Err(DkgError::Config(
                        "own share does not match its public commitment".into(),
                    ));
                }
            }
        } else if cfg.old_share.is_some()
            || !cfg.old_share_commits.is_empty()
            || cfg.old_public.is_some()
        {
            return Err(DkgError::Config(
                "fresh ceremonies carry no old key material".into(),
            ));
        }
        let known = cfg
            .new_nodes
            .iter()
            .chain(cfg.old_nodes.iter())
            .any(|n| n.id == cfg.me);
        if !known {
            return Err(DkgError::Config("own id is not in the node set".into()));
        }
        Ok(Self {
            cfg,
            phase: Phase::Dealing,
            my_poly: Vec::new(),
            bundles: BTreeMap::new(),
            seen_dealers: BTreeSet::new(),
            invalid_dealers: BTreeSet::new(),
            my_shares: BTreeMap::new(),
            my_complaints: BTreeSet::new(),
            complaints: BTreeMap::new(),
            responses_seen: BTreeSet::new(),
            justifications_seen: BTreeSet::new(),
        })
    }

    fn dealers(&self) -> &[Node] {
        if self.cfg.is_reshare() {
            &self.cfg.old_nodes
        } else {
            &self.cfg.new_nodes
        }
    }

    fn dealer_ids(&self) -> BTreeSet<u64> {
        self.dealers().iter().map(|n| n.id).collect()
    }

    fn is_dealer(&self) -> bool {
        if self.cfg.is_reshare() {
            self.cfg.old_share.is_some()
        } else {
            true
        }
    }

    fn is_holder(&self) -> bool {
        self.cfg.new_nodes.iter().any(|n| n.id == self.cfg.me)
    }

    /// Number of valid deals required for the ceremony to stand.
    fn required_qualified(&self) -> usize {
        if self.cfg.is_reshare() {
            self.cfg.old_t as usize
        } else {
            self.cfg.t as usize
        }
    }

    /// Builds our deal bundle and processes it as if received. Returns the
    /// bundle to broadcast, or `None` if we are not a dealer.
    pub fn start(&mut self) -> Result<(Option<DealBundle>, DealStatus), DkgError> {
        if self.phase != Phase::Dealing {
            return Err(DkgError::WrongPhase {
                expected: "dealing",
                actual: self.phase.name(),
            });
        }
        if !self.is_dealer() {
            return Ok((None, DealStatus::Pending));
        }
        let constant = if self.cfg.is_reshare() {
            self.cfg.old_share.expect("dealer checked above")
        } else {
            self.cfg.secret
        };
        let mut coeffs = Vec::with_capacity(self.cfg.t as usize);
        coeffs.push(constant);
        for _ in 1..self.cfg.t {
            coeffs.push(Scalar::random(&mut OsRng));
        }
        let commits: Vec<G1Projective> = coeffs
            .iter()
            .map(|c| G1Projective::generator() * c)
            .collect();
        let mut deals = Vec::with_capacity(self.cfg.new_nodes.len());
        for node in &self.cfg.new_nodes {
            let share = eval_poly(&coeffs, &Scalar::from(node.id));
            let encrypted = ecies::encrypt(&node.public, &share.to_bytes_be())
                .map_err(DkgError::InvalidBundle)?;
            deals.push(Deal {
                share_holder: node.id,
                encrypted_share: encrypted,
            });
        }
        self.my_poly = coeffs;
        let bundle = DealBundle {
            dealer: self.cfg.me,
            commits,
            deals,
        };
        let status = self.receive_deal(bundle.clone())?;
        Ok((Some(bundle), status))
    }

    /// Ingests one dealer's bundle. When the last expected bundle arrives the
    /// returned status carries our complaint bundle, if any.
    pub fn receive_deal(&mut self, bundle: DealBundle) -> Result<DealStatus, DkgError> {
        if self.phase != Phase::Dealing {
            return Err(DkgError::WrongPhase {
                expected: "dealing",
                actual: self.phase.name(),
            });
        }
        let dealer_ids = self.dealer_ids();
        if !dealer_ids.contains(&bundle.dealer) {
            return Err(DkgError::UnknownDealer(bundle.dealer));
        }
        if !self.seen_dealers.insert(bundle.dealer) {
            return Err(DkgError::Duplicate);
        }
        let dealer = bundle.dealer;
        if let Err(reason) = self.verify_bundle(&bundle) {
            warn!(dealer, reason, "rejecting deal bundle");
            self.invalid_dealers.insert(dealer);
        } else {
            if self.is_holder() {
                self.extract_my_share(&bundle);
            }
            self.bundles.insert(dealer, bundle);
        }

        if self.seen_dealers.len() == dealer_ids.len() {
            self.phase = Phase::Responding;
            let response = if self.my_complaints.is_empty() {
                None
            } else {
                let complaints: Vec<u64> = self.my_complaints.iter().copied().collect();
                debug!(?complaints, "raising complaints");
                self.responses_seen.insert(self.cfg.me);
                Some(ResponseBundle {
                    sender: self.cfg.me,
                    complaints,
                })
            };
            Ok(DealStatus::Complete { response })
        } else {
            Ok(DealStatus::Pending)
        }
    }

    /// Structural verification of a dealer bundle.
    fn verify_bundle(&self, bundle: &DealBundle) -> Result<(), &'static str> {
        if bundle.commits.len() != self.cfg.t as usize {
            return Err("wrong number of commitments");
        }
        if self.cfg.is_reshare() {
            // The constant term must re-commit the dealer's old share.
            let expected = self.cfg.old_share_commits[&bundle.dealer];
            if bundle.commits[0] != expected {
                return Err("constant term does not re-commit the dealer's old share");
            }
        }
        Ok(())
    }

    /// Decrypts the deal addressed to us and complains on any mismatch.
    fn extract_my_share(&mut self, bundle: &DealBundle) {
        let me = self.cfg.me;
        let Some(deal) = bundle.deals.iter().find(|d| d.share_holder == me) else {
            warn!(dealer = bundle.dealer, "deal bundle carries no share for us");
            self.record_complaint(bundle.dealer, me);
            return;
        };
        let share = match ecies::decrypt(&self.cfg.secret, &deal.encrypted_share) {
            Ok(plain) => plain
                .try_into()
                .ok()
                .and_then(|arr: [u8; 32]| Option::<Scalar>::from(Scalar::from_bytes_be(&arr))),
            Err(_) => None,
        };
        let Some(share) = share else {
            warn!(dealer = bundle.dealer, "our deal share failed to decrypt");
            self.record_complaint(bundle.dealer, me);
            return;
        };
        let expected = eval_commits(&bundle.commits, &Scalar::from(me));
        if G1Projective::generator() * share != expected {
            warn!(
                dealer = bundle.dealer,
                "our deal share does not match the commitments"
            );
            self.record_complaint(bundle.dealer, me);
            return;
        }
        self.my_shares.insert(bundle.dealer, share);
    }

    fn record_complaint(&mut self, dealer: u64, accuser: u64) {
        if accuser == self.cfg.me {
            self.my_complaints.insert(dealer);
        }
        self.complaints.entry(dealer).or_default().insert(accuser);
    }

    /// Ingests another holder's complaint bundle.
    pub fn receive_response(&mut self, bundle: ResponseBundle) -> Result<(), DkgError> {
        if !matches!(self.phase, Phase::Dealing | Phase::Responding) {
            return Err(DkgError::WrongPhase {
                expected: "responding",
                actual: self.phase.name(),
            });
        }
        if !self.cfg.new_nodes.iter().any(|n| n.id == bundle.sender) {
            return Err(DkgError::UnknownSender(bundle.sender));
        }
        if !self.responses_seen.insert(bundle.sender) {
            return Err(DkgError::Duplicate);
        }
        let dealer_ids = self.dealer_ids();
        for dealer in bundle.complaints {
            if !dealer_ids.contains(&dealer) {
                return Err(DkgError::InvalidBundle(format!(
                    "complaint against unknown dealer {dealer}"
                )));
            }
            self.record_complaint(dealer, bundle.sender);
        }
        Ok(())
    }

    /// Called by the owner when the response window has elapsed. Dealers that
    /// never dealt are disqualified; open complaints move the ceremony into
    /// the justification phase.
    pub fn on_response_phase_end(&mut self) -> Result<PhaseEnd, DkgError> {
        match self.phase {
            Phase::Dealing => {
                let missing: Vec<u64> = self
                    .dealer_ids()
                    .difference(&self.seen_dealers)
                    .copied()
                    .collect();
                for dealer in missing {
                    warn!(dealer, "dealer never dealt, disqualifying");
                    self.invalid_dealers.insert(dealer);
                }
                self.phase = Phase::Responding;
            }
            Phase::Responding => {}
            _ => {
                return Err(DkgError::WrongPhase {
                    expected: "responding",
                    actual: self.phase.name(),
                })
            }
        }
        // Complaints against already-disqualified dealers need no defence.
        let open: BTreeSet<u64> = self
            .complaints
            .keys()
            .copied()
            .filter(|d| !self.invalid_dealers.contains(d))
            .collect();
        if open.is_empty() {
            return Ok(PhaseEnd::Finished(self.finalize()?));
        }
        self.phase = Phase::Justifying;
        if !open.contains(&self.cfg.me) {
            return Ok(PhaseEnd::Justifying(None));
        }
        let accusers = self.complaints.get(&self.cfg.me).cloned().unwrap_or_default();
        let justifications = accusers
            .iter()
            .map(|&holder| Justification {
                share_holder: holder,
                share: eval_poly(&self.my_poly, &Scalar::from(holder)),
            })
            .collect();
        let bundle = JustificationBundle {
            dealer: self.cfg.me,
            justifications,
        };
        self.apply_justification(&bundle);
        self.justifications_seen.insert(self.cfg.me);
        Ok(PhaseEnd::Justifying(Some(bundle)))
    }

    /// Ingests a dealer's justification bundle.
    pub fn receive_justification(&mut self, bundle: JustificationBundle) -> Result<(), DkgError> {
        if self.phase != Phase::Justifying {
            return Err(DkgError::WrongPhase {
                expected: "justifying",
                actual: self.phase.name(),
            });
        }
        if !self.dealer_ids().contains(&bundle.dealer) {
            return Err(DkgError::UnknownDealer(bundle.dealer));
        }
        if !self.justifications_seen.insert(bundle.dealer) {
            return Err(DkgError::Duplicate);
        }
        self.apply_justification(&bundle);
        Ok(())
    }

    fn apply_justification(&mut self, bundle: &JustificationBundle) {
        let Some(deal_bundle) = self.bundles.get(&bundle.dealer) else {
            return;
        };
        let commits = deal_bundle.commits.clone();
        for justification in &bundle.justifications {
            let expected = eval_commits(&commits, &Scalar::from(justification.share_holder));
            if G1Projective::generator() * justification.share != expected {
                warn!(dealer = bundle.dealer, "invalid justification, disqualifying");
                self.invalid_dealers.insert(bundle.dealer);
                return;
            }
            if let Some(accusers) = self.complaints.get_mut(&bundle.dealer) {
                accusers.remove(&justification.share_holder);
                if accusers.is_empty() {
                    self.complaints.remove(&bundle.dealer);
                }
            }
            if justification.share_holder == self.cfg.me {
                self.my_shares.insert(bundle.dealer, justification.share);
                self.my_complaints.remove(&bundle.dealer);
            }
        }
    }

    /// Called by the owner when the justification window has elapsed.
    /// Unanswered complaints expel the dealer.
    pub fn on_justification_phase_end(&mut self) -> Result<Option<DistKeyShare>, DkgError> {
        if self.phase != Phase::Justifying {
            return Err(DkgError::WrongPhase {
                expected: "justifying",
                actual: self.phase.name(),
            });
        }
        let unresolved: Vec<u64> = self.complaints.keys().copied().collect();
        for dealer in unresolved {
            warn!(dealer, "complaint left unanswered, disqualifying");
            self.invalid_dealers.insert(dealer);
        }
        self.finalize()
    }

    fn qualified(&self) -> Vec<u64> {
        self.dealer_ids()
            .into_iter()
            .filter(|d| !self.invalid_dealers.contains(d) && self.bundles.contains_key(d))
            .collect()
    }

    fn finalize(&mut self) -> Result<Option<DistKeyShare>, DkgError> {
        let qual = self.qualified();
        let required = self.required_qualified();
        if qual.len() < required {
            return Err(DkgError::NotEnoughQualified {
                qualified: qual.len(),
                required,
            });
        }
        self.phase = Phase::Done;
        if !self.is_holder() {
            // Old-committee dealers outside the new committee are done.
            return Ok(None);
        }

        let t = self.cfg.t as usize;
        let key = if self.cfg.is_reshare() {
            let lambdas = lagrange_at_zero(&qual);
            let mut share = Scalar::ZERO;
            let mut commits = vec![G1Projective::identity(); t];
            for (dealer, lambda) in qual.iter().zip(lambdas.iter()) {
                let sub_share = self
                    .my_shares
                    .get(dealer)
                    .ok_or(DkgError::MissingShare(*dealer))?;
                share += sub_share * lambda;
                let bundle = &self.bundles[dealer];
                for (k, commit) in bundle.commits.iter().enumerate() {
                    commits[k] += commit * lambda;
                }
            }
            if Some(commits[0]) != self.cfg.old_public {
                return Err(DkgError::KeyChanged);
            }
            DistKeyShare {
                commits,
                share: PriShare {
                    index: self.cfg.me,
                    value: share,
                },
            }
        } else {
            let mut share = Scalar::ZERO;
            let mut commits = vec![G1Projective::identity(); t];
            for dealer in &qual {
                let sub_share = self
                    .my_shares
                    .get(dealer)
                    .ok_or(DkgError::MissingShare(*dealer))?;
                share += sub_share;
                let bundle = &self.bundles[dealer];
                for (k, commit) in bundle.commits.iter().enumerate() {
                    commits[k] += commit;
                }
            }
            DistKeyShare {
                commits,
                share: PriShare {
                    index: self.cfg.me,
                    value: share,
                },
            }
        };
        debug!(me = self.cfg.me, qualified = qual.len(), "dkg finalized");
        Ok(Some(key))
    }
}

/// Horner evaluation of a scalar polynomial.
pub fn eval_poly(coeffs: &[Scalar], x: &Scalar) -> Scalar {
    let mut acc = Scalar::ZERO;
    for coeff in coeffs.iter().rev() {
        acc = acc * x + coeff;
    }
    acc
}

/// Evaluation of a committed polynomial in the exponent.
pub fn eval_commits(commits: &[G1Projective], x: &Scalar) -> G1Projective {
    let mut acc = G1Projective::identity();
    let mut power = Scalar::ONE;
    for commit in commits {
        acc += commit * power;
        power *= x;
    }
    acc
}

/// Lagrange basis coefficients at x = 0 over 1-indexed ids.
pub fn lagrange_at_zero(ids: &[u64]) -> Vec<Scalar> {
    let mut coeffs = Vec::with_capacity(ids.len());
    for (i, &id_i) in ids.iter().enumerate() {
        let x_i = Scalar::from(id_i);
        let mut num = Scalar::ONE;
        let mut den = Scalar::ONE;
        for (j, &id_j) in ids.iter().enumerate() {
            if i != j {
                let x_j = Scalar::from(id_j);
                num *= x_j;
                den *= x_j - x_i;
            }
        }
        let inverse = Option::<Scalar>::from(den.invert()).expect("ids are distinct");
        coeffs.push(num * inverse);
    }
    coeffs
}
