//! Derives how much the faucet has already sent to an account.
//!
//! Nothing is cached: every call walks the ledger history from the first page
//! until the ledger reports no further pages.

use crate::coins::CoinSet;
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{LedgerClient, LedgerEvent, LedgerTx, FIRST_PAGE};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub const TRANSFER_EVENT: &str = "transfer";

/// Upper bound on pages walked for one account. A ledger that keeps handing
/// out pages beyond this is treated as a failed query.
pub const MAX_HISTORY_PAGES: u64 = 10_000;

/// One coin movement inside a `transfer` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer<'a> {
    pub recipient: Option<&'a str>,
    pub sender: Option<&'a str>,
    pub amount: &'a str,
}

/// Splits a `transfer` event into its coin movements.
///
/// Some ledgers merge every transfer of a message into one event whose
/// attributes repeat `recipient, sender, amount`; a movement ends at each
/// `amount` attribute.
pub fn transfers_in(event: &LedgerEvent) -> Vec<Transfer<'_>> {
    let mut transfers = Vec::new();
    if event.kind != TRANSFER_EVENT {
        return transfers;
    }

    let mut recipient = None;
    let mut sender = None;
    for attr in &event.attributes {
        match attr.key.as_str() {
            "recipient" => recipient = Some(attr.value.as_str()),
            "sender" => sender = Some(attr.value.as_str()),
            "amount" => {
                transfers.push(Transfer {
                    recipient: recipient.take(),
                    sender: sender.take(),
                    amount: attr.value.as_str(),
                });
            }
            _ => {}
        }
    }
    transfers
}

/// Computes cumulative transfers from the faucet account.
pub struct QuotaStore {
    ledger: Arc<dyn LedgerClient>,
    faucet_address: String,
}

impl QuotaStore {
    pub fn new(ledger: Arc<dyn LedgerClient>, faucet_address: impl Into<String>) -> Self {
        Self {
            ledger,
            faucet_address: faucet_address.into(),
        }
    }

    pub fn faucet_address(&self) -> &str {
        &self.faucet_address
    }

    /// Total amount per denomination ever sent from the faucet to
    /// `destination`. Empty when nothing was sent yet.
    pub async fn total_transferred(&self, destination: &str) -> FaucetResult<CoinSet> {
        let mut total = CoinSet::new();
        let mut seen = HashSet::new();
        let mut page = FIRST_PAGE;
        let mut pages_read = 0u64;

        loop {
            if pages_read >= MAX_HISTORY_PAGES {
                return Err(FaucetError::LedgerQuery(format!(
                    "history for {destination} exceeds {MAX_HISTORY_PAGES} pages"
                )));
            }

            let batch = self
                .ledger
                .query_transfers(&self.faucet_address, destination, page)
                .await?;
            pages_read += 1;
            debug!(
                destination,
                page,
                txs = batch.txs.len(),
                "Fetched transfer history page"
            );

            for tx in &batch.txs {
                // Overlapping pages must not count a transaction twice.
                if !tx.hash.is_empty() && !seen.insert(tx.hash.clone()) {
                    continue;
                }
                self.accumulate(tx, destination, &mut total)?;
            }

            match batch.next_page {
                None => break,
                Some(next) if next > page => page = next,
                Some(next) => {
                    return Err(FaucetError::LedgerQuery(format!(
                        "ledger pagination did not advance (page {page} -> {next})"
                    )));
                }
            }
        }

        Ok(total)
    }

    fn accumulate(&self, tx: &LedgerTx, destination: &str, total: &mut CoinSet) -> FaucetResult<()> {
        for event in &tx.events {
            for transfer in transfers_in(event) {
                if transfer.recipient != Some(destination) {
                    continue;
                }
                if transfer.sender.is_some_and(|s| s != self.faucet_address) {
                    continue;
                }

                let coins = CoinSet::parse(transfer.amount).map_err(|e| {
                    FaucetError::LedgerDecode(format!("tx {}: amount {:?}: {}", tx.hash, transfer.amount, e))
                })?;
                total.merge(&coins);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EventAttribute;
    use crate::memory::MemoryLedger;
    use num_bigint::BigUint;

    const FAUCET: &str = "archway1faucet";
    const ALICE: &str = "archway1alice";

    fn transfer_event(attrs: &[(&str, &str)]) -> LedgerEvent {
        LedgerEvent {
            kind: TRANSFER_EVENT.to_string(),
            attributes: attrs.iter().map(|(k, v)| EventAttribute::new(*k, *v)).collect(),
        }
    }

    #[test]
    fn test_transfers_in_merged_event() {
        let event = transfer_event(&[
            ("recipient", "archway1feecollector"),
            ("sender", FAUCET),
            ("amount", "200uarch"),
            ("recipient", ALICE),
            ("sender", FAUCET),
            ("amount", "1000uarch,5ustake"),
        ]);

        let transfers = transfers_in(&event);
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[1].recipient, Some(ALICE));
        assert_eq!(transfers[1].amount, "1000uarch,5ustake");
    }

    #[test]
    fn test_transfers_in_ignores_other_events() {
        let event = LedgerEvent {
            kind: "coin_received".to_string(),
            attributes: vec![EventAttribute::new("amount", "1uarch")],
        };
        assert!(transfers_in(&event).is_empty());
    }

    #[tokio::test]
    async fn test_no_history_is_empty() {
        let ledger = Arc::new(MemoryLedger::new(FAUCET));
        let store = QuotaStore::new(ledger, FAUCET);
        assert!(store.total_transferred(ALICE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledged_transfer_counts_once_included() {
        use crate::ledger::{FeeParams, TxStatus};
        use std::time::Duration;

        let ledger = Arc::new(MemoryLedger::new(FAUCET).with_visibility_delay(Duration::from_millis(40)));
        let store = QuotaStore::new(ledger.clone(), FAUCET);
        let receipt = ledger
            .submit_transfer(
                &ledger.faucet_account(),
                ALICE,
                &CoinSet::parse("1000uarch").unwrap(),
                &FeeParams::default(),
            )
            .await
            .unwrap();

        // Still in the mempool: history does not know about it.
        assert!(store.total_transferred(ALICE).await.unwrap().is_empty());

        while ledger.tx_status(&receipt.tx_hash).await.unwrap() == TxStatus::Pending {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let total = store.total_transferred(ALICE).await.unwrap();
        assert_eq!(total.amount_of("uarch"), BigUint::from(1000u32));
    }

    #[tokio::test]
    async fn test_sums_every_event_of_every_tx() {
        let ledger = Arc::new(MemoryLedger::new(FAUCET));
        ledger.push_tx(
            "A1",
            vec![transfer_event(&[
                ("recipient", ALICE),
                ("sender", FAUCET),
                ("amount", "100uarch"),
                ("recipient", ALICE),
                ("sender", FAUCET),
                ("amount", "7ustake"),
            ])],
        );
        ledger.record_transfer(ALICE, &CoinSet::parse("50uarch").unwrap());

        let store = QuotaStore::new(ledger, FAUCET);
        let total = store.total_transferred(ALICE).await.unwrap();
        assert_eq!(total.amount_of("uarch"), BigUint::from(150u32));
        assert_eq!(total.amount_of("ustake"), BigUint::from(7u32));
    }

    #[tokio::test]
    async fn test_fee_transfers_are_not_counted() {
        let ledger = Arc::new(MemoryLedger::new(FAUCET));
        ledger.push_tx(
            "F1",
            vec![transfer_event(&[
                ("recipient", "archway1feecollector"),
                ("sender", FAUCET),
                ("amount", "999uarch"),
                ("recipient", ALICE),
                ("sender", FAUCET),
                ("amount", "1uarch"),
            ])],
        );

        let store = QuotaStore::new(ledger, FAUCET);
        let total = store.total_transferred(ALICE).await.unwrap();
        assert_eq!(total.amount_of("uarch"), BigUint::from(1u32));
    }

    /// Reading only the first page of history under-counts what an account
    /// already received and lets it bypass its lifetime limit.
    #[tokio::test]
    async fn test_pagination_is_exhausted_not_truncated() {
        let ledger = Arc::new(MemoryLedger::new(FAUCET).with_page_size(2));
        for _ in 0..7 {
            ledger.record_transfer(ALICE, &CoinSet::parse("10uarch").unwrap());
        }

        let store = QuotaStore::new(ledger.clone(), FAUCET);
        let total = store.total_transferred(ALICE).await.unwrap();
        assert_eq!(total.amount_of("uarch"), BigUint::from(70u32));
        assert_eq!(ledger.query_count(), 4);
    }

    #[tokio::test]
    async fn test_aggregation_is_idempotent() {
        let ledger = Arc::new(MemoryLedger::new(FAUCET).with_page_size(3));
        for amount in ["1uarch", "2uarch", "3ustake", "4uarch"] {
            ledger.record_transfer(ALICE, &CoinSet::parse(amount).unwrap());
        }

        let store = QuotaStore::new(ledger, FAUCET);
        let first = store.total_transferred(ALICE).await.unwrap();
        let second = store.total_transferred(ALICE).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_undecodable_amount_is_decode_error() {
        let ledger = Arc::new(MemoryLedger::new(FAUCET));
        ledger.push_tx(
            "BAD",
            vec![transfer_event(&[
                ("recipient", ALICE),
                ("sender", FAUCET),
                ("amount", "lots"),
            ])],
        );

        let store = QuotaStore::new(ledger, FAUCET);
        let err = store.total_transferred(ALICE).await.unwrap_err();
        assert!(matches!(err, FaucetError::LedgerDecode(_)), "{err}");
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let ledger = Arc::new(MemoryLedger::new(FAUCET));
        ledger.fail_queries(true);

        let store = QuotaStore::new(ledger, FAUCET);
        let err = store.total_transferred(ALICE).await.unwrap_err();
        assert!(matches!(err, FaucetError::LedgerQuery(_)), "{err}");
    }
}
