//! In-memory ledger for local runs without a chain, also used by the tests.
//!
//! Submitted transfers are appended to the history. By default they are
//! visible at once, like a `block` broadcast; with a visibility delay they
//! behave like a `sync` broadcast, acknowledged before they reach a block.

use crate::coins::CoinSet;
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{
    EventAttribute, FaucetAccount, FeeParams, LedgerClient, LedgerEvent, LedgerTx, SubmitReceipt, TxPage, TxStatus,
    FIRST_PAGE,
};
use crate::quota::{transfers_in, TRANSFER_EVENT};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// A transfer accepted by [`MemoryLedger::submit_transfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransfer {
    pub sender: String,
    pub recipient: String,
    pub coins: CoinSet,
}

struct Recorded {
    tx: LedgerTx,
    /// `None` for a transaction that never makes it into a block.
    visible_at: Option<Instant>,
    failure: Option<String>,
}

impl Recorded {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at.is_some_and(|at| at <= now)
    }
}

pub struct MemoryLedger {
    faucet_address: String,
    page_size: usize,
    submit_delay: Option<Duration>,
    visibility_delay: Duration,
    history: Mutex<Vec<Recorded>>,
    submissions: Mutex<Vec<SubmittedTransfer>>,
    queries: AtomicUsize,
    fail_queries: AtomicBool,
    fail_submits: AtomicBool,
    drop_submissions: AtomicBool,
    fail_execution: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(faucet_address: impl Into<String>) -> Self {
        Self {
            faucet_address: faucet_address.into(),
            page_size: 100,
            submit_delay: None,
            visibility_delay: Duration::ZERO,
            history: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            fail_queries: AtomicBool::new(false),
            fail_submits: AtomicBool::new(false),
            drop_submissions: AtomicBool::new(false),
            fail_execution: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Makes every submission take at least `delay`, widening race windows.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    /// Submitted transfers stay out of history queries for `delay` after
    /// the submission is acknowledged.
    pub fn with_visibility_delay(mut self, delay: Duration) -> Self {
        self.visibility_delay = delay;
        self
    }

    pub fn faucet_account(&self) -> FaucetAccount {
        FaucetAccount {
            name: "faucet-account".to_string(),
            address: self.faucet_address.clone(),
        }
    }

    /// Appends a raw, already committed transaction to the history.
    pub fn push_tx(&self, hash: impl Into<String>, events: Vec<LedgerEvent>) {
        let tx = LedgerTx {
            hash: hash.into(),
            timestamp: Some(Utc::now()),
            events,
        };
        lock(&self.history).push(Recorded {
            tx,
            visible_at: Some(Instant::now()),
            failure: None,
        });
    }

    /// Appends a committed faucet transfer to `recipient` and returns its hash.
    pub fn record_transfer(&self, recipient: &str, coins: &CoinSet) -> String {
        self.append_transfer(recipient, coins, Some(Instant::now()), None)
    }

    fn append_transfer(
        &self,
        recipient: &str,
        coins: &CoinSet,
        visible_at: Option<Instant>,
        failure: Option<String>,
    ) -> String {
        let mut history = lock(&self.history);
        let hash = format!("FAKE{:08X}", history.len());
        // A failed transaction moves no coins.
        let events = if failure.is_some() {
            Vec::new()
        } else {
            vec![LedgerEvent {
                kind: TRANSFER_EVENT.to_string(),
                attributes: vec![
                    EventAttribute::new("recipient", recipient),
                    EventAttribute::new("sender", self.faucet_address.as_str()),
                    EventAttribute::new("amount", coins.to_string()),
                ],
            }]
        };
        history.push(Recorded {
            tx: LedgerTx {
                hash: hash.clone(),
                timestamp: Some(Utc::now()),
                events,
            },
            visible_at,
            failure,
        });
        hash
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::SeqCst);
    }

    /// Acknowledge submissions without ever including them in a block.
    pub fn drop_submissions(&self, drop: bool) {
        self.drop_submissions.store(drop, Ordering::SeqCst);
    }

    /// Include submissions in a block but fail their execution.
    pub fn fail_execution(&self, fail: bool) {
        self.fail_execution.store(fail, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<SubmittedTransfer> {
        lock(&self.submissions).clone()
    }

    /// Highest number of submissions that were ever in progress at once.
    pub fn max_concurrent_submissions(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Sum of everything sent to `recipient` that made it into a block,
    /// whether or not it is visible yet.
    pub fn delivered_to(&self, recipient: &str) -> CoinSet {
        let mut total = CoinSet::new();
        for recorded in lock(&self.history).iter().filter(|r| r.visible_at.is_some()) {
            for transfer in recorded.tx.events.iter().flat_map(transfers_in) {
                if transfer.recipient == Some(recipient) {
                    if let Ok(coins) = CoinSet::parse(transfer.amount) {
                        total.merge(&coins);
                    }
                }
            }
        }
        total
    }

    fn matches(tx: &LedgerTx, sender: &str, recipient: &str) -> bool {
        tx.events
            .iter()
            .flat_map(transfers_in)
            .any(|t| t.recipient == Some(recipient) && t.sender == Some(sender))
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn query_transfers(&self, sender: &str, recipient: &str, page: u64) -> FaucetResult<TxPage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(FaucetError::LedgerQuery("connection refused".to_string()));
        }
        if page < FIRST_PAGE {
            return Err(FaucetError::LedgerQuery(format!("page {page} out of range")));
        }

        let now = Instant::now();
        let matching: Vec<LedgerTx> = lock(&self.history)
            .iter()
            .filter(|r| r.is_visible(now) && Self::matches(&r.tx, sender, recipient))
            .map(|r| r.tx.clone())
            .collect();

        let start = (page - FIRST_PAGE) as usize * self.page_size;
        let end = (start + self.page_size).min(matching.len());
        let txs = matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_page = (end < matching.len()).then_some(page + 1);

        Ok(TxPage { txs, next_page })
    }

    async fn submit_transfer(
        &self,
        account: &FaucetAccount,
        recipient: &str,
        coins: &CoinSet,
        _fees: &FeeParams,
    ) -> FaucetResult<SubmitReceipt> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.fail_submits.load(Ordering::SeqCst) {
            Err(FaucetError::LedgerSubmit("account sequence mismatch".to_string()))
        } else {
            let visible_at =
                (!self.drop_submissions.load(Ordering::SeqCst)).then(|| Instant::now() + self.visibility_delay);
            let failure = self
                .fail_execution
                .load(Ordering::SeqCst)
                .then(|| "out of gas in location: WriteFlat".to_string());
            let tx_hash = self.append_transfer(recipient, coins, visible_at, failure);
            lock(&self.submissions).push(SubmittedTransfer {
                sender: account.address.clone(),
                recipient: recipient.to_string(),
                coins: coins.clone(),
            });
            Ok(SubmitReceipt { tx_hash })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn tx_status(&self, tx_hash: &str) -> FaucetResult<TxStatus> {
        let now = Instant::now();
        let history = lock(&self.history);
        let status = match history.iter().find(|r| r.tx.hash == tx_hash) {
            Some(recorded) if recorded.is_visible(now) => match &recorded.failure {
                Some(log) => TxStatus::Failed(log.clone()),
                None => TxStatus::Committed,
            },
            _ => TxStatus::Pending,
        };
        Ok(status)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAUCET: &str = "archway1faucet";

    #[tokio::test]
    async fn test_delayed_transfer_hidden_until_visible() {
        let ledger = MemoryLedger::new(FAUCET).with_visibility_delay(Duration::from_millis(40));
        let receipt = ledger
            .submit_transfer(
                &ledger.faucet_account(),
                "archway1alice",
                &CoinSet::parse("5uarch").unwrap(),
                &FeeParams::default(),
            )
            .await
            .unwrap();

        let page = ledger.query_transfers(FAUCET, "archway1alice", FIRST_PAGE).await.unwrap();
        assert!(page.txs.is_empty());
        assert_eq!(ledger.tx_status(&receipt.tx_hash).await.unwrap(), TxStatus::Pending);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let page = ledger.query_transfers(FAUCET, "archway1alice", FIRST_PAGE).await.unwrap();
        assert_eq!(page.txs.len(), 1);
        assert_eq!(ledger.tx_status(&receipt.tx_hash).await.unwrap(), TxStatus::Committed);
    }

    #[tokio::test]
    async fn test_failed_execution_moves_no_coins() {
        let ledger = MemoryLedger::new(FAUCET);
        ledger.fail_execution(true);
        let receipt = ledger
            .submit_transfer(
                &ledger.faucet_account(),
                "archway1alice",
                &CoinSet::parse("5uarch").unwrap(),
                &FeeParams::default(),
            )
            .await
            .unwrap();

        assert!(matches!(ledger.tx_status(&receipt.tx_hash).await.unwrap(), TxStatus::Failed(_)));
        assert!(ledger.delivered_to("archway1alice").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_hash_is_pending() {
        let ledger = MemoryLedger::new(FAUCET);
        assert_eq!(ledger.tx_status("DEADBEEF").await.unwrap(), TxStatus::Pending);
    }
}
