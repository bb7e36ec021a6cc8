//! Faucet configuration

use crate::chain_cli::ChainCliOptions;
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{Confirmation, FeeParams};
use crate::limits::Limits;
use crate::whitelist::Whitelist;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Faucet service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Tendermint RPC endpoint of the ledger node
    pub node: String,

    pub chain_id: String,

    /// Chain binary used for queries and transactions
    pub binary_name: String,

    /// Home directory passed to the chain binary
    pub home: Option<String>,

    pub keyring_backend: String,
    pub keyring_password: Option<String>,

    /// Key name of the faucet account in the keyring
    pub account_name: String,

    /// Imported into the keyring when the key is missing
    pub account_mnemonic: Option<String>,

    /// Per-request ceiling, comma separated coins
    pub max_per_request: String,

    /// Lifetime ceiling per destination, comma separated coins
    pub max_per_account: String,

    pub gas_prices: String,
    pub gas_adjustment: String,
    pub broadcast_mode: String,

    /// Page size for transaction history queries
    pub query_page_limit: u64,

    /// How long a submitted transfer may take to show up in a block
    pub confirm_timeout_secs: u64,

    /// Delay between inclusion checks
    pub confirm_poll_interval_ms: u64,

    /// `address,allowance` file; no file means every address is allowed
    pub whitelist_file: Option<String>,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Serve /metrics
    pub metrics_enabled: bool,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        let fees = FeeParams::default();
        let confirmation = Confirmation::default();
        Self {
            server_addr: "0.0.0.0:8000".to_string(),
            log_level: "info".to_string(),
            node: "tcp://localhost:26657".to_string(),
            chain_id: String::new(),
            binary_name: "archwayd".to_string(),
            home: None,
            keyring_backend: "test".to_string(),
            keyring_password: None,
            account_name: "faucet-account".to_string(),
            account_mnemonic: None,
            max_per_request: "1000000uarch".to_string(),
            max_per_account: "10000000uarch".to_string(),
            gas_prices: fees.gas_prices,
            gas_adjustment: fees.gas_adjustment,
            broadcast_mode: fees.broadcast_mode,
            query_page_limit: 100,
            confirm_timeout_secs: confirmation.timeout.as_secs(),
            confirm_poll_interval_ms: confirmation.poll_interval.as_millis() as u64,
            whitelist_file: None,
            cors_enabled: true,
            metrics_enabled: true,
        }
    }
}

impl FaucetConfig {
    /// Load from environment variables with defaults
    pub fn from_env() -> FaucetResult<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a config file (any format the `config` crate understands), then
    /// let `FAUCET_*` variables override it.
    pub fn load(path: impl AsRef<Path>) -> FaucetResult<Self> {
        let path = path.as_ref();
        let mut config: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FaucetError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, var: F) -> FaucetResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let strings: [(&str, &mut String); 12] = [
            ("FAUCET_SERVER_ADDR", &mut self.server_addr),
            ("FAUCET_LOG_LEVEL", &mut self.log_level),
            ("FAUCET_NODE", &mut self.node),
            ("FAUCET_CHAIN_ID", &mut self.chain_id),
            ("FAUCET_BINARY_NAME", &mut self.binary_name),
            ("FAUCET_KEYRING_BACKEND", &mut self.keyring_backend),
            ("FAUCET_ACCOUNT_NAME", &mut self.account_name),
            ("FAUCET_MAX_PER_REQUEST", &mut self.max_per_request),
            ("FAUCET_MAX_PER_ACCOUNT", &mut self.max_per_account),
            ("FAUCET_GAS_PRICES", &mut self.gas_prices),
            ("FAUCET_GAS_ADJUSTMENT", &mut self.gas_adjustment),
            ("FAUCET_BROADCAST_MODE", &mut self.broadcast_mode),
        ];
        for (key, field) in strings {
            if let Some(value) = var(key) {
                *field = value;
            }
        }

        let optionals: [(&str, &mut Option<String>); 4] = [
            ("FAUCET_HOME", &mut self.home),
            ("FAUCET_KEYRING_PASSWORD", &mut self.keyring_password),
            ("FAUCET_ACCOUNT_MNEMONIC", &mut self.account_mnemonic),
            ("FAUCET_WHITELIST_FILE", &mut self.whitelist_file),
        ];
        for (key, field) in optionals {
            if let Some(value) = var(key) {
                *field = Some(value).filter(|v| !v.is_empty());
            }
        }

        let numbers: [(&str, &mut u64); 3] = [
            ("FAUCET_QUERY_PAGE_LIMIT", &mut self.query_page_limit),
            ("FAUCET_CONFIRM_TIMEOUT_SECS", &mut self.confirm_timeout_secs),
            ("FAUCET_CONFIRM_POLL_INTERVAL_MS", &mut self.confirm_poll_interval_ms),
        ];
        for (key, field) in numbers {
            if let Some(value) = var(key) {
                *field = value
                    .parse()
                    .map_err(|_| FaucetError::Config(format!("{key}: not a number: {value:?}")))?;
            }
        }
        if let Some(enabled) = var("FAUCET_CORS_ENABLED") {
            self.cors_enabled = enabled.eq_ignore_ascii_case("true");
        }
        if let Some(enabled) = var("FAUCET_METRICS_ENABLED") {
            self.metrics_enabled = enabled.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Parse the configured ceilings. Malformed coins or a per-request
    /// denomination without a lifetime ceiling are fatal.
    pub fn limits(&self) -> FaucetResult<Limits> {
        Limits::parse(&self.max_per_request, &self.max_per_account)
    }

    pub fn fee_params(&self) -> FeeParams {
        FeeParams {
            gas_prices: self.gas_prices.clone(),
            gas_adjustment: self.gas_adjustment.clone(),
            broadcast_mode: self.broadcast_mode.clone(),
        }
    }

    pub fn confirmation(&self) -> FaucetResult<Confirmation> {
        if self.confirm_timeout_secs == 0 || self.confirm_poll_interval_ms == 0 {
            return Err(FaucetError::Config(
                "confirmation timeout and poll interval must be positive".to_string(),
            ));
        }
        Ok(Confirmation {
            timeout: Duration::from_secs(self.confirm_timeout_secs),
            poll_interval: Duration::from_millis(self.confirm_poll_interval_ms),
        })
    }

    pub fn whitelist(&self) -> FaucetResult<Option<Whitelist>> {
        self.whitelist_file.as_ref().map(Whitelist::load).transpose()
    }

    pub fn chain_cli_options(&self) -> FaucetResult<ChainCliOptions> {
        if self.chain_id.trim().is_empty() {
            return Err(FaucetError::Config("chain id is required".to_string()));
        }
        if self.query_page_limit == 0 {
            return Err(FaucetError::Config("query page limit must be positive".to_string()));
        }
        Ok(ChainCliOptions {
            binary: self.binary_name.clone(),
            node: self.node.clone(),
            chain_id: self.chain_id.clone(),
            home: self.home.clone(),
            keyring_backend: self.keyring_backend.clone(),
            keyring_password: self.keyring_password.clone(),
            page_limit: self.query_page_limit,
        })
    }
}
