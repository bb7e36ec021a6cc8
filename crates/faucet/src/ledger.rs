//! Boundary to the ledger: history queries and transfer submission.

use crate::coins::CoinSet;
use crate::error::FaucetResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// History pages are numbered from one.
pub const FIRST_PAGE: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

impl EventAttribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An event emitted by a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

/// A committed transaction as returned by a history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTx {
    pub hash: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub events: Vec<LedgerEvent>,
}

/// One page of a history query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxPage {
    pub txs: Vec<LedgerTx>,
    /// Page to request next, `None` once the history is exhausted.
    pub next_page: Option<u64>,
}

/// The custodial account all transfers are sent from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaucetAccount {
    /// Keyring name used to sign.
    pub name: String,
    /// On-chain address, used as the sender filter in history queries.
    pub address: String,
}

/// Fee and broadcast settings for outgoing transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeParams {
    pub gas_prices: String,
    pub gas_adjustment: String,
    pub broadcast_mode: String,
}

impl Default for FeeParams {
    fn default() -> Self {
        Self {
            gas_prices: String::new(),
            gas_adjustment: "1.3".to_string(),
            broadcast_mode: "sync".to_string(),
        }
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub tx_hash: String,
}

/// Where a broadcast transaction stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Not in a block yet, or not known to the node.
    Pending,
    /// Included in a block and executed successfully.
    Committed,
    /// Included in a block but execution failed; carries the ledger's log.
    Failed(String),
}

/// How long to wait for a broadcast transaction to land in a block.
///
/// With `sync` broadcasts the ledger acknowledges a transaction once it is
/// in the mempool, before it shows up in history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Confirmation {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Client for the ledger the faucet distributes on.
///
/// Implementations own transport-level retries and timeouts. Query failures
/// map to `LedgerQuery`/`LedgerDecode`, submission failures to `LedgerSubmit`.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Transactions sent by `sender` that transferred coins to `recipient`,
    /// one page at a time.
    async fn query_transfers(&self, sender: &str, recipient: &str, page: u64) -> FaucetResult<TxPage>;

    /// Signs and broadcasts a bank transfer from `account` to `recipient`.
    async fn submit_transfer(
        &self,
        account: &FaucetAccount,
        recipient: &str,
        coins: &CoinSet,
        fees: &FeeParams,
    ) -> FaucetResult<SubmitReceipt>;

    /// Looks up a broadcast transaction by hash.
    async fn tx_status(&self, tx_hash: &str) -> FaucetResult<TxStatus>;
}
