//! Token faucet for Cosmos SDK chains
//!
//! Sends coins from a single faucet account to callers over HTTP while
//! enforcing:
//! - Per-request ceilings per denomination
//! - Lifetime ceilings per destination, checked against the ledger's own
//!   transfer history
//! - An optional address whitelist
//!
//! Transfers to the same destination are serialized so that concurrent
//! requests cannot jointly exceed a lifetime ceiling, and submissions from
//! the faucet account go out one at a time.

pub mod api;
pub mod chain_cli;
pub mod coins;
pub mod config;
pub mod error;
pub mod ledger;
pub mod limits;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod quota;
pub mod validator;
pub mod whitelist;

pub use api::{router, AppState, RouterOptions, TransferBody, TransferResponse};
pub use chain_cli::{ChainCliClient, ChainCliOptions};
pub use coins::{Coin, CoinSet};
pub use config::FaucetConfig;
pub use error::{ErrorKind, FaucetError, FaucetResult};
pub use ledger::{Confirmation, FaucetAccount, FeeParams, LedgerClient, TxStatus};
pub use limits::Limits;
pub use metrics::FaucetMetrics;
pub use orchestrator::{Outcome, TransferOrchestrator, TransferState};
pub use quota::QuotaStore;
pub use validator::{RequestValidator, TransferRequest};
pub use whitelist::Whitelist;
