use std::collections::BTreeMap;

use openssl::pkey::Public;
use openssl::rsa::Rsa;
use serde::{Deserialize, Serialize};

use dkg_crypto::rsa as rsa_ops;
use wire::Operator;

use crate::error::InitiatorError;

/// One entry of the operators-info file published by the registry owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorInfoJson {
    pub ip: String,
    pub id: u64,
    pub public_key: String,
}

/// A registry operator with its parsed RSA key.
#[derive(Debug, Clone)]
pub struct OperatorInfo {
    pub addr: String,
    pub id: u64,
    pub pub_key: Rsa<Public>,
    /// The base64 PEM encoding as published, carried verbatim on the wire.
    pub encoded_pub_key: Vec<u8>,
}

/// Registry mapping, keyed by operator id.
pub type Operators = BTreeMap<u64, OperatorInfo>;

/// Parses the operators-info JSON list.
pub fn load_operators_json(data: &[u8]) -> Result<Operators, InitiatorError> {
    let entries: Vec<OperatorInfoJson> = serde_json::from_slice(data)
        .map_err(|e| InitiatorError::Config(format!("cannot parse operators info: {e}")))?;
    let mut operators = Operators::new();
    for entry in entries {
        if !entry.ip.starts_with("http://") && !entry.ip.starts_with("https://") {
            return Err(InitiatorError::Config(format!(
                "invalid operator URL {}",
                entry.ip
            )));
        }
        let encoded = entry.public_key.as_bytes().to_vec();
        let pub_key = rsa_ops::parse_public_key(&encoded)
            .map_err(|e| InitiatorError::Config(e.to_string()))?;
        operators.insert(
            entry.id,
            OperatorInfo {
                addr: entry.ip.trim_end_matches('/').to_string(),
                id: entry.id,
                pub_key,
                encoded_pub_key: encoded,
            },
        );
    }
    Ok(operators)
}

/// Validates a requested operator set against the registry and returns the
/// wire form, sorted by ascending id.
pub fn validated_operator_data(
    ids: &[u64],
    operators: &Operators,
) -> Result<Vec<Operator>, InitiatorError> {
    if ids.len() < 4 {
        return Err(InitiatorError::Config("wrong operators len: < 4".into()));
    }
    if ids.len() > 13 {
        return Err(InitiatorError::Config("wrong operators len: > 13".into()));
    }
    if ids.len() % 3 != 1 {
        return Err(InitiatorError::Config(
            "amount of operators should be 4,7,10,13".into(),
        ));
    }
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.windows(2).try_for_each(|w| {
        if w[0] == w[1] {
            Err(InitiatorError::Config(
                "operators ids should be unique in the list".into(),
            ))
        } else {
            Ok(())
        }
    })?;
    let mut out = Vec::with_capacity(sorted.len());
    for id in sorted {
        let info = operators.get(&id).ok_or_else(|| {
            InitiatorError::Config("operator is not in given operator data list".into())
        })?;
        out.push(
            Operator::new(info.id, info.encoded_pub_key.clone())
                .map_err(|_| InitiatorError::Config("operator key exceeds the cap".into()))?,
        );
    }
    Ok(out)
}

/// Threshold for a committee: `N - (N - 1) / 3`.
pub fn threshold(n: usize) -> u64 {
    (n - (n - 1) / 3) as u64
}
