//! Transfer orchestration.
//!
//! The orchestrator is the only component that submits transactions. Each
//! request runs through
//!
//! ```text
//! Received -> Locked -> Validating -> Rejected
//!                                  -> LockedGlobal -> Submitting -> Committed | SubmitFailed
//! ```
//!
//! The destination lock is held from validation until the transaction is in
//! a block and therefore visible to the next history query, so two requests
//! for the same account can never both pass the lifetime check against the
//! same history. The faucet account sits behind a second, global lock because
//! all transactions share its sequence number, which the chain binary reads
//! from committed state.

use crate::error::{ErrorKind, FaucetError};
use crate::ledger::{Confirmation, FaucetAccount, FeeParams, LedgerClient, TxStatus};
use crate::locks::KeyedLocks;
use crate::metrics::FaucetMetrics;
use crate::validator::{RequestValidator, TransferRequest};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-request processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Received,
    Locked,
    Validating,
    Rejected,
    LockedGlobal,
    Submitting,
    Committed,
    SubmitFailed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Rejected | TransferState::Committed | TransferState::SubmitFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Received => "received",
            TransferState::Locked => "locked",
            TransferState::Validating => "validating",
            TransferState::Rejected => "rejected",
            TransferState::LockedGlobal => "locked_global",
            TransferState::Submitting => "submitting",
            TransferState::Committed => "committed",
            TransferState::SubmitFailed => "submit_failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of a transfer request. There is no partial success.
#[derive(Debug)]
pub enum Outcome {
    Committed,
    /// Validation failed, including failures to read the transfer history.
    Rejected(FaucetError),
    /// The ledger did not accept the transaction. It may still have been
    /// broadcast, so it is never retried here.
    SubmitFailed(FaucetError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Committed)
    }

    pub fn state(&self) -> TransferState {
        match self {
            Outcome::Committed => TransferState::Committed,
            Outcome::Rejected(_) => TransferState::Rejected,
            Outcome::SubmitFailed(_) => TransferState::SubmitFailed,
        }
    }

    pub fn error(&self) -> Option<&FaucetError> {
        match self {
            Outcome::Committed => None,
            Outcome::Rejected(err) | Outcome::SubmitFailed(err) => Some(err),
        }
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.error().map(FaucetError::kind)
    }

    pub fn into_result(self) -> Result<(), FaucetError> {
        match self {
            Outcome::Committed => Ok(()),
            Outcome::Rejected(err) | Outcome::SubmitFailed(err) => Err(err),
        }
    }
}

/// The signing account and how it pays for transactions. Only reachable
/// through the global submission lock.
struct SigningAccount {
    account: FaucetAccount,
    fees: FeeParams,
}

pub struct TransferOrchestrator {
    validator: RequestValidator,
    ledger: Arc<dyn LedgerClient>,
    destinations: KeyedLocks,
    signer: Mutex<SigningAccount>,
    confirmation: Confirmation,
    metrics: Arc<FaucetMetrics>,
}

impl TransferOrchestrator {
    pub fn new(
        validator: RequestValidator,
        ledger: Arc<dyn LedgerClient>,
        account: FaucetAccount,
        fees: FeeParams,
        metrics: Arc<FaucetMetrics>,
    ) -> Self {
        Self {
            validator,
            ledger,
            destinations: KeyedLocks::new(),
            signer: Mutex::new(SigningAccount { account, fees }),
            confirmation: Confirmation::default(),
            metrics,
        }
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    pub fn metrics(&self) -> &Arc<FaucetMetrics> {
        &self.metrics
    }

    /// Destinations with a request in progress or queued.
    pub fn active_destinations(&self) -> usize {
        self.destinations.len()
    }

    /// Processes `request` to completion.
    ///
    /// The work runs on its own task: if the caller stops waiting (the HTTP
    /// client disconnected), a transaction already on its way to the ledger
    /// is still seen through and its locks released normally.
    pub async fn submit(self: &Arc<Self>, request: TransferRequest) -> Outcome {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.process(request).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Transfer task aborted: {}", err);
                Outcome::SubmitFailed(FaucetError::Internal(format!("transfer task aborted: {err}")))
            }
        }
    }

    async fn process(&self, request: TransferRequest) -> Outcome {
        let address = request.address.clone();
        debug!(address = %address, coins = %request.coins, state = %TransferState::Received);

        let outcome = {
            let _destination = self.destinations.lock(&address).await;
            self.metrics.set_destination_locks(self.destinations.len());
            debug!(address = %address, state = %TransferState::Locked);

            self.validate_then_submit(&request).await
        };
        self.metrics.set_destination_locks(self.destinations.len());
        self.metrics.record_outcome(outcome.state().as_str());

        match &outcome {
            Outcome::Committed => {}
            Outcome::Rejected(err) if err.is_caller_error() => {
                warn!(address = %address, coins = %request.coins, "Transfer rejected: {}", err);
            }
            Outcome::Rejected(err) => {
                error!(address = %address, "Transfer history unavailable: {}", err);
            }
            Outcome::SubmitFailed(err) => {
                error!(address = %address, coins = %request.coins, "Transfer submission failed: {}", err);
            }
        }
        outcome
    }

    async fn validate_then_submit(&self, request: &TransferRequest) -> Outcome {
        debug!(address = %request.address, state = %TransferState::Validating);
        if let Err(err) = self.validator.validate(request).await {
            return Outcome::Rejected(err);
        }

        let signer = self.signer.lock().await;
        debug!(address = %request.address, state = %TransferState::LockedGlobal);

        debug!(address = %request.address, state = %TransferState::Submitting);
        let started = Instant::now();
        let result = match self
            .ledger
            .submit_transfer(&signer.account, &request.address, &request.coins, &signer.fees)
            .await
        {
            Ok(receipt) => self.await_inclusion(&receipt.tx_hash).await.map(|()| receipt),
            Err(err) => Err(err),
        };
        self.metrics.observe_submit(started.elapsed());
        drop(signer);

        match result {
            Ok(receipt) => {
                info!(
                    address = %request.address,
                    coins = %request.coins,
                    tx_hash = %receipt.tx_hash,
                    "Transfer committed"
                );
                Outcome::Committed
            }
            Err(err) => Outcome::SubmitFailed(err),
        }
    }

    /// Polls the ledger until `tx_hash` is in a block. Giving up is a failed
    /// submission: the transaction may still land, so it is not retried.
    async fn await_inclusion(&self, tx_hash: &str) -> Result<(), FaucetError> {
        let deadline = Instant::now() + self.confirmation.timeout;
        loop {
            match self.ledger.tx_status(tx_hash).await {
                Ok(TxStatus::Committed) => return Ok(()),
                Ok(TxStatus::Failed(log)) => {
                    return Err(FaucetError::LedgerSubmit(format!("tx {tx_hash} failed: {log}")));
                }
                Ok(TxStatus::Pending) => debug!(tx_hash, "Waiting for inclusion"),
                Err(err) => debug!(tx_hash, "Inclusion check failed: {}", err),
            }

            if Instant::now() >= deadline {
                return Err(FaucetError::LedgerSubmit(format!(
                    "tx {tx_hash} not included within {:?}",
                    self.confirmation.timeout
                )));
            }
            tokio::time::sleep(self.confirmation.poll_interval).await;
        }
    }
}
