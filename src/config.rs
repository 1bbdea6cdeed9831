//! Environment-driven configuration, following the teacher's
//! `require_env`/`parse_env_or` + validation style.

use std::env;

#[derive(Debug, Clone)]
pub struct EnclaveConfig {
    // Server
    pub host: String,
    pub port: u16,

    // AWS / transport glue (named per spec.md §6; values are opaque here —
    // the concrete KMS/ledger/object-store clients are out of scope).
    pub aws_region: String,
    pub aws_account: String,
    pub qldb_role_arn: String,
    pub qldb_ledger_name: String,
    pub enclave_decrypt_key_template_secret_id: String,
    pub enclave_secrets_bucket_name: String,
    pub enclave_secrets_object_name: String,
    pub enclave_operator_shares_bucket_name: String,
    pub enclave_solana_address: Option<String>,
    /// Lookup key of this enclave's own identity vault — created out of
    /// band by operators once they know the identity the enclave will
    /// derive, since the enclave cannot compute its own idempotency key
    /// before it has unsealed.
    pub enclave_identity_vault_key: String,

    // Custodian credentials (populated post-unseal in production; env
    // fallbacks exist only to keep local/dev runs self-contained).
    pub zebpay_api_key: Option<String>,
    pub zebpay_signing_key: Option<String>,
    pub solana_rpc_endpoint: Option<String>,
    pub solana_signing_key: Option<String>,

    pub egress_proxy_addr: Option<String>,

    // Unseal
    pub unseal_threshold: usize,
    pub unseal_retry_secs: u64,

    // CORS
    pub allowed_origins: Vec<String>,

    // Admin API keys authorized to create/approve vaults.
    pub admin_keys: Vec<String>,
}

impl EnclaveConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let aws_region = require_env("AWS_REGION")?;
        let aws_account = require_env("AWS_ACCOUNT")?;
        let qldb_role_arn = require_env("QLDB_ROLE_ARN")?;
        let qldb_ledger_name = require_env("QLDB_LEDGER_NAME")?;
        let enclave_decrypt_key_template_secret_id =
            require_env("ENCLAVE_DECRYPT_KEY_TEMPLATE_SECRET_ID")?;
        let enclave_secrets_bucket_name = require_env("ENCLAVE_SECRETS_BUCKET_NAME")?;
        let enclave_secrets_object_name = require_env("ENCLAVE_SECRETS_OBJECT_NAME")?;
        let enclave_operator_shares_bucket_name =
            require_env("ENCLAVE_OPERATOR_SHARES_BUCKET_NAME")?;
        let enclave_solana_address = env::var("ENCLAVE_SOLANA_ADDRESS").ok().filter(|s| !s.is_empty());
        let enclave_identity_vault_key = require_env("ENCLAVE_IDENTITY_VAULT_KEY")?;

        let zebpay_api_key = env::var("ZEBPAY_API_KEY").ok().filter(|s| !s.is_empty());
        let zebpay_signing_key = env::var("ZEBPAY_SIGNING_KEY").ok().filter(|s| !s.is_empty());
        let solana_rpc_endpoint = env::var("SOLANA_RPC_ENDPOINT").ok().filter(|s| !s.is_empty());
        let solana_signing_key = env::var("SOLANA_SIGNING_KEY").ok().filter(|s| !s.is_empty());
        let egress_proxy_addr = env::var("EGRESS_PROXY_ADDR").ok().filter(|s| !s.is_empty());

        let unseal_threshold: usize = parse_env_or("ENCLAVE_UNSEAL_THRESHOLD", 2)?;
        if unseal_threshold == 0 {
            return Err(ConfigError::Invalid(
                "ENCLAVE_UNSEAL_THRESHOLD".into(),
                "must be > 0".into(),
            ));
        }
        let unseal_retry_secs: u64 = parse_env_or("ENCLAVE_UNSEAL_RETRY_SECS", 60)?;
        if unseal_retry_secs == 0 {
            return Err(ConfigError::Invalid(
                "ENCLAVE_UNSEAL_RETRY_SECS".into(),
                "must be > 0".into(),
            ));
        }

        let allowed_origins = env::var("ENCLAVE_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let admin_keys = env::var("ENCLAVE_ADMIN_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        Ok(Self {
            host: env::var("ENCLAVE_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("ENCLAVE_PORT")
                .unwrap_or_else(|_| "8443".into())
                .parse()
                .map_err(|_| ConfigError::Invalid("ENCLAVE_PORT".into(), "must be a valid port number".into()))?,
            aws_region,
            aws_account,
            qldb_role_arn,
            qldb_ledger_name,
            enclave_decrypt_key_template_secret_id,
            enclave_secrets_bucket_name,
            enclave_secrets_object_name,
            enclave_operator_shares_bucket_name,
            enclave_solana_address,
            enclave_identity_vault_key,
            zebpay_api_key,
            zebpay_signing_key,
            solana_rpc_endpoint,
            solana_signing_key,
            egress_proxy_addr,
            unseal_threshold,
            unseal_retry_secs,
            allowed_origins,
            admin_keys,
        })
    }

    /// Constant-time admin API key check for the vault-admin routes.
    pub fn is_admin_key_valid(&self, key: &str, configured: &[String]) -> bool {
        use subtle::ConstantTimeEq;
        let key_bytes = key.as_bytes();
        for valid_key in configured {
            let valid_bytes = valid_key.as_bytes();
            if key_bytes.len() == valid_bytes.len() && key_bytes.ct_eq(valid_bytes).into() {
                return true;
            }
        }
        false
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .map_err(|_| ConfigError::Missing(name.into()))
        .and_then(|v| {
            if v.is_empty() {
                Err(ConfigError::Missing(name.into()))
            } else {
                Ok(v)
            }
        })
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name.into(), format!("could not parse '{v}'"))),
        _ => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(String),
    Invalid(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "missing required env var: {name}"),
            ConfigError::Invalid(name, reason) => write!(f, "invalid env var {name}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
