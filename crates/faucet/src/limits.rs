//! Distribution limits, fixed at startup.

use crate::coins::CoinSet;
use crate::error::{FaucetError, FaucetResult};
use num_bigint::BigUint;

/// Per-request and per-account ceilings.
///
/// Only denominations with a per-account ceiling are distributable. A
/// denomination without its own per-request ceiling is bounded per request
/// by its per-account ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    max_per_request: CoinSet,
    max_per_account: CoinSet,
}

impl Limits {
    pub fn new(max_per_request: CoinSet, max_per_account: CoinSet) -> FaucetResult<Self> {
        if max_per_account.is_empty() {
            return Err(FaucetError::Config(
                "per-account limit lists no denominations, nothing could be distributed".to_string(),
            ));
        }
        if let Some(denom) = max_per_request
            .denoms()
            .find(|denom| !max_per_account.contains_denom(denom))
        {
            return Err(FaucetError::Config(format!(
                "per-request limit names {denom}, which has no per-account limit"
            )));
        }

        Ok(Self {
            max_per_request,
            max_per_account,
        })
    }

    /// Parses both limits from coin lists such as `1000000uarch`.
    pub fn parse(max_per_request: &str, max_per_account: &str) -> FaucetResult<Self> {
        let per_request = CoinSet::parse_strict(max_per_request)
            .map_err(|e| FaucetError::Config(format!("max per request {max_per_request:?}: {e}")))?;
        let per_account = CoinSet::parse_strict(max_per_account)
            .map_err(|e| FaucetError::Config(format!("max per account {max_per_account:?}: {e}")))?;
        Self::new(per_request, per_account)
    }

    pub fn max_per_request(&self) -> &CoinSet {
        &self.max_per_request
    }

    pub fn max_per_account(&self) -> &CoinSet {
        &self.max_per_account
    }

    pub fn is_supported(&self, denom: &str) -> bool {
        self.max_per_account.contains_denom(denom)
    }

    /// Ceiling for a single request of `denom`.
    pub fn request_ceiling(&self, denom: &str) -> Option<&BigUint> {
        self.max_per_request
            .get(denom)
            .or_else(|| self.max_per_account.get(denom))
    }

    /// Lifetime ceiling for `denom` per destination account.
    pub fn account_ceiling(&self, denom: &str) -> Option<&BigUint> {
        self.max_per_account.get(denom)
    }
}
