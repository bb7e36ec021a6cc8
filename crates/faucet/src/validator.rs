//! Request validation against configured limits and transfer history.

use crate::coins::CoinSet;
use crate::error::{FaucetError, FaucetResult};
use crate::limits::Limits;
use crate::quota::QuotaStore;
use crate::whitelist::Whitelist;
use std::sync::Arc;
use tracing::debug;

/// A parsed request to send `coins` to `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub address: String,
    pub coins: CoinSet,
}

impl TransferRequest {
    /// Builds a request for the canonical form of `address`, see
    /// [`normalize_address`].
    pub fn new(address: impl AsRef<str>, coins: CoinSet) -> Self {
        Self {
            address: normalize_address(address.as_ref()),
            coins,
        }
    }
}

/// Canonical form of a caller-supplied address. Surrounding whitespace is
/// dropped and an all-uppercase bech32 address is lowercased, so both spell
/// the same history key. Mixed case is kept as is and rejected by
/// [`check_request`].
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.chars().any(|c| c.is_ascii_lowercase()) {
        address.to_string()
    } else {
        address.to_ascii_lowercase()
    }
}

fn is_mixed_case(address: &str) -> bool {
    address.chars().any(|c| c.is_ascii_lowercase()) && address.chars().any(|c| c.is_ascii_uppercase())
}

/// Checks that need no ledger access, in order: coins present, address
/// present and single-case, whitelist, supported denominations, per-request
/// ceiling.
pub fn check_request(
    request: &TransferRequest,
    limits: &Limits,
    whitelist: Option<&Whitelist>,
) -> FaucetResult<()> {
    if request.coins.is_empty() {
        return Err(FaucetError::NoCoins);
    }
    if request.address.trim().is_empty() {
        return Err(FaucetError::NoAddress);
    }
    // Bech32 forbids mixing cases.
    if is_mixed_case(&request.address) {
        return Err(FaucetError::InvalidRequest(format!(
            "address {:?} mixes upper and lower case",
            request.address
        )));
    }
    if let Some(whitelist) = whitelist {
        if !whitelist.allows(&request.address) {
            return Err(FaucetError::NotWhitelisted(request.address.clone()));
        }
    }

    // Every denomination is checked before any amount, so an unsupported
    // denomination rejects the whole request regardless of order.
    if let Some(denom) = request.coins.denoms().find(|denom| !limits.is_supported(denom)) {
        return Err(FaucetError::DenomNotSupported(denom.to_string()));
    }

    for (denom, requested) in &request.coins {
        if let Some(limit) = limits.request_ceiling(denom) {
            if requested > limit {
                return Err(FaucetError::ExceedsPerRequestLimit {
                    denom: denom.to_string(),
                    requested: requested.clone(),
                    limit: limit.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Rejects the request if it would take any denomination past its lifetime
/// ceiling given what was already `transferred`.
pub fn check_lifetime(request: &TransferRequest, limits: &Limits, transferred: &CoinSet) -> FaucetResult<()> {
    for (denom, requested) in &request.coins {
        let limit = limits
            .account_ceiling(denom)
            .ok_or_else(|| FaucetError::DenomNotSupported(denom.to_string()))?;
        let already = transferred.amount_of(denom);

        if &already + requested > *limit {
            return Err(FaucetError::ExceedsAccountLifetimeLimit {
                denom: denom.to_string(),
                transferred: already,
                requested: requested.clone(),
                limit: limit.clone(),
            });
        }
    }
    Ok(())
}

pub struct RequestValidator {
    limits: Arc<Limits>,
    whitelist: Option<Arc<Whitelist>>,
    quota: QuotaStore,
}

impl RequestValidator {
    pub fn new(limits: Arc<Limits>, whitelist: Option<Arc<Whitelist>>, quota: QuotaStore) -> Self {
        Self {
            limits,
            whitelist,
            quota,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn quota(&self) -> &QuotaStore {
        &self.quota
    }

    /// Validates `request`, short-circuiting on the first failure. The ledger
    /// is only queried once the request passes every static check.
    pub async fn validate(&self, request: &TransferRequest) -> FaucetResult<()> {
        check_request(request, &self.limits, self.whitelist.as_deref())?;

        let transferred = self.quota.total_transferred(&request.address).await?;
        debug!(
            address = %request.address,
            transferred = %transferred,
            requested = %request.coins,
            "Checking lifetime limit"
        );

        check_lifetime(request, &self.limits, &transferred)
    }
}
