use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Distributed key generation ceremonies for SSV validators.
#[derive(Parser)]
#[command(name = "ssv-dkg", version, about)]
pub struct SsvDkg {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start a DKG ceremony as the initiator.
    Init(InitArgs),
    /// Transfer custody of an existing validator to a new committee.
    Reshare(ReshareArgs),
    /// Re-sign a root with the shares of an existing keyshares file.
    Resign(ResignArgs),
    /// Check that operators are reachable and healthy.
    Ping(PingArgs),
    /// Run the operator server.
    StartOperator(StartOperatorArgs),
    /// Generate an operator RSA keypair and its encrypted keystore.
    GenerateOperatorKeys(GenerateKeysArgs),
}

/// Flags can also come from a YAML config file; explicit flags and their
/// uppercased environment variables win over the file.
#[derive(Args, Clone, Default)]
pub struct InitArgs {
    /// YAML file mirroring these flags.
    #[arg(long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,
    /// Operators-info JSON file with ids, URLs and public keys.
    #[arg(long, env = "OPERATORS_INFO_PATH")]
    pub operators_info_path: Option<PathBuf>,
    /// Comma-separated operator ids, e.g. `1,2,3,4`.
    #[arg(long, env = "OPERATOR_IDS", value_delimiter = ',')]
    pub operator_ids: Vec<u64>,
    /// ETH1 withdrawal address, 0x-prefixed hex.
    #[arg(long, env = "WITHDRAW_ADDRESS")]
    pub withdraw_address: Option<String>,
    /// Owner address registering the validator with the SSV contract.
    #[arg(long, env = "OWNER_ADDRESS")]
    pub owner_address: Option<String>,
    /// Owner registration nonce.
    #[arg(long, env = "OWNER_NONCE")]
    pub nonce: Option<u64>,
    /// Target network: mainnet, prater or holesky.
    #[arg(long, env = "NETWORK")]
    pub network: Option<String>,
    /// Directory the artifacts are written to.
    #[arg(long, env = "OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,
    /// Encrypted initiator RSA keystore; a fresh key is generated if unset.
    #[arg(long, env = "INITIATOR_PRIVKEY")]
    pub initiator_privkey: Option<PathBuf>,
    /// Password file for the initiator keystore.
    #[arg(long, env = "INITIATOR_PRIVKEY_PASSWORD")]
    pub initiator_privkey_password: Option<PathBuf>,
}

#[derive(Args, Clone, Default)]
pub struct ReshareArgs {
    #[arg(long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,
    #[arg(long, env = "OPERATORS_INFO_PATH")]
    pub operators_info_path: Option<PathBuf>,
    /// Existing keyshares JSON file.
    #[arg(long, env = "KEYSHARES_PATH")]
    pub keyshares: Option<PathBuf>,
    /// Proofs JSON of the ceremony that produced the keyshares.
    #[arg(long, env = "PROOFS_PATH")]
    pub proofs: Option<PathBuf>,
    /// Comma-separated ids of the new committee.
    #[arg(long, env = "NEW_OPERATOR_IDS", value_delimiter = ',')]
    pub new_operator_ids: Vec<u64>,
    /// New owner registration nonce.
    #[arg(long, env = "OWNER_NONCE")]
    pub nonce: Option<u64>,
    /// Owner's hex signature over the reshare root. Omit it to print the
    /// root to sign and exit.
    #[arg(long, env = "OWNER_SIGNATURE")]
    pub signature: Option<String>,
    #[arg(long, env = "OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,
    #[arg(long, env = "INITIATOR_PRIVKEY")]
    pub initiator_privkey: Option<PathBuf>,
    #[arg(long, env = "INITIATOR_PRIVKEY_PASSWORD")]
    pub initiator_privkey_password: Option<PathBuf>,
}

#[derive(Args, Clone, Default)]
pub struct ResignArgs {
    #[arg(long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,
    #[arg(long, env = "OPERATORS_INFO_PATH")]
    pub operators_info_path: Option<PathBuf>,
    #[arg(long, env = "KEYSHARES_PATH")]
    pub keyshares: Option<PathBuf>,
    /// 32-byte signing root, 0x-prefixed hex.
    #[arg(long, env = "SIGNING_ROOT")]
    pub signing_root: Option<String>,
    #[arg(long, env = "OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,
    #[arg(long, env = "INITIATOR_PRIVKEY")]
    pub initiator_privkey: Option<PathBuf>,
    #[arg(long, env = "INITIATOR_PRIVKEY_PASSWORD")]
    pub initiator_privkey_password: Option<PathBuf>,
}

#[derive(Args, Clone, Default)]
pub struct PingArgs {
    #[arg(long, env = "OPERATORS_INFO_PATH")]
    pub operators_info_path: Option<PathBuf>,
    #[arg(long, env = "OPERATOR_IDS", value_delimiter = ',')]
    pub operator_ids: Vec<u64>,
}

#[derive(Args, Clone, Default)]
pub struct StartOperatorArgs {
    #[arg(long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,
    /// Encrypted RSA keystore produced by `generate-operator-keys`.
    #[arg(long, env = "PRIVKEY_PATH")]
    pub privkey: Option<PathBuf>,
    /// Password file for the keystore.
    #[arg(long, env = "PRIVKEY_PASSWORD_PATH")]
    pub privkey_password: Option<PathBuf>,
    /// Port the operator server listens on.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    /// Directory `/results` artifacts are stored in.
    #[arg(long, env = "OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,
}

#[derive(Args, Clone, Default)]
pub struct GenerateKeysArgs {
    /// Where the keystore and password files are written.
    #[arg(long, env = "OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,
}
