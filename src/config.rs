//! YAML config merging: any flag left unset on the command line may come
//! from the file named by `--config`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub operators_info_path: Option<PathBuf>,
    pub operator_ids: Option<Vec<u64>>,
    pub new_operator_ids: Option<Vec<u64>>,
    pub withdraw_address: Option<String>,
    pub owner_address: Option<String>,
    pub nonce: Option<u64>,
    pub network: Option<String>,
    pub output_path: Option<PathBuf>,
    pub initiator_privkey: Option<PathBuf>,
    pub initiator_privkey_password: Option<PathBuf>,
    pub keyshares: Option<PathBuf>,
    pub proofs: Option<PathBuf>,
    pub signing_root: Option<String>,
    pub signature: Option<String>,
    pub privkey: Option<PathBuf>,
    pub privkey_password: Option<PathBuf>,
    pub port: Option<u16>,
}

pub fn load(path: Option<&Path>) -> Result<FileConfig, String> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
    serde_yaml::from_str(&raw).map_err(|e| format!("cannot parse config {}: {e}", path.display()))
}

/// CLI (and env) beats the file; a flag missing in both is an error.
pub fn resolve<T>(cli: Option<T>, file: Option<T>, flag: &str) -> Result<T, String> {
    cli.or(file).ok_or_else(|| format!("missing required flag --{flag}"))
}

/// List variant: an empty CLI list falls back to the file.
pub fn resolve_list(cli: Vec<u64>, file: Option<Vec<u64>>, flag: &str) -> Result<Vec<u64>, String> {
    if !cli.is_empty() {
        return Ok(cli);
    }
    match file {
        Some(list) if !list.is_empty() => Ok(list),
        _ => Err(format!("missing required flag --{flag}")),
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn cli_beats_file() {
        assert_eq!(resolve(Some(1u64), Some(2u64), "nonce").unwrap(), 1);
        assert_eq!(resolve(None, Some(2u64), "nonce").unwrap(), 2);
        assert!(resolve::<u64>(None, None, "nonce").is_err());
    }

    #[test]
    fn list_fallback() {
        assert_eq!(
            resolve_list(vec![1, 2], Some(vec![3]), "operator-ids").unwrap(),
            vec![1, 2]
        );
        assert_eq!(
            resolve_list(vec![], Some(vec![3]), "operator-ids").unwrap(),
            vec![3]
        );
        assert!(resolve_list(vec![], None, "operator-ids").is_err());
    }

    #[test]
    fn yaml_parses() {
        let cfg: FileConfig = serde_yaml::from_str(
            "operator_ids: [1, 2, 3, 4]\nnonce: 7\nnetwork: holesky\n",
        )
        .unwrap();
        assert_eq!(cfg.operator_ids, Some(vec![1, 2, 3, 4]));
        assert_eq!(cfg.nonce, Some(7));
        assert_eq!(cfg.network.as_deref(), Some("holesky"));
    }
}
