//! Ledger client backed by the chain's command-line binary.
//!
//! Queries and transactions go through `<binary> query txs`, `query tx` and
//! `<binary> tx bank send`, so signing stays inside the binary's keyring.

use crate::coins::CoinSet;
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{
    EventAttribute, FaucetAccount, FeeParams, LedgerClient, LedgerEvent, LedgerTx, SubmitReceipt, TxPage, TxStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Printed by some SDK versions instead of JSON when the keyring is empty.
const MSG_EMPTY_KEYRING: &str = "No records were found in keyring";

/// Part of the node's answer to `query tx` for a hash it has not indexed.
const MSG_TX_NOT_FOUND: &str = "not found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCliOptions {
    pub binary: String,
    pub node: String,
    pub chain_id: String,
    pub home: Option<String>,
    pub keyring_backend: String,
    pub keyring_password: Option<String>,
    pub page_limit: u64,
}

pub struct ChainCliClient {
    options: ChainCliOptions,
}

/// Captured output of one binary invocation.
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl ChainCliClient {
    pub fn new(options: ChainCliOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ChainCliOptions {
        &self.options
    }

    /// Finds the faucet key in the keyring, importing it from `mnemonic` when
    /// it is missing.
    pub async fn ensure_account(&self, name: &str, mnemonic: Option<&str>) -> FaucetResult<FaucetAccount> {
        if let Some(address) = self.key_address(name).await? {
            info!("Using faucet account {} ({})", name, address);
            return Ok(FaucetAccount {
                name: name.to_string(),
                address,
            });
        }

        let mnemonic = mnemonic.filter(|m| !m.trim().is_empty()).ok_or_else(|| {
            FaucetError::Config(format!(
                "key {name:?} not found in the {} keyring and no mnemonic configured",
                self.options.keyring_backend
            ))
        })?;

        info!("Importing faucet account {} into the keyring", name);
        let mut args = vec!["keys", "add", name, "--recover", "--output", "json"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        args.extend(self.keyring_args());

        let mut input = format!("{}\n", mnemonic.trim());
        if let Some(password) = &self.options.keyring_password {
            // New keys on a file backend ask for the passphrase twice.
            input.push_str(&format!("{password}\n{password}\n"));
        }
        let output = self.run(&args, Some(input)).await.map_err(FaucetError::Config)?;
        if !output.success {
            return Err(FaucetError::Config(format!(
                "importing key {name:?} failed: {}",
                output.stderr.trim()
            )));
        }

        let address = self.key_address(name).await?.ok_or_else(|| {
            FaucetError::Config(format!("key {name:?} still missing after import"))
        })?;
        Ok(FaucetAccount {
            name: name.to_string(),
            address,
        })
    }

    async fn key_address(&self, name: &str) -> FaucetResult<Option<String>> {
        let mut args = vec!["keys".to_string(), "show".to_string(), name.to_string(), "-a".to_string()];
        args.extend(self.keyring_args());

        let input = self.options.keyring_password.as_ref().map(|p| format!("{p}\n"));
        let output = self.run(&args, input).await.map_err(FaucetError::Config)?;
        let address = output.stdout.trim();

        if !output.success || address.is_empty() || address == MSG_EMPTY_KEYRING {
            debug!("Key {} not found: {}", name, output.stderr.trim());
            return Ok(None);
        }
        Ok(Some(address.to_string()))
    }

    fn keyring_args(&self) -> Vec<String> {
        let mut args = vec!["--keyring-backend".to_string(), self.options.keyring_backend.clone()];
        if let Some(home) = &self.options.home {
            args.push("--home".to_string());
            args.push(home.clone());
        }
        args
    }

    async fn run(&self, args: &[String], stdin: Option<String>) -> Result<CommandOutput, String> {
        debug!("Running {} {}", self.options.binary, args.join(" "));

        let mut child = Command::new(&self.options.binary)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", self.options.binary, e))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| format!("failed to write to {}: {}", self.options.binary, e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("{} did not finish: {}", self.options.binary, e))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl LedgerClient for ChainCliClient {
    async fn query_transfers(&self, sender: &str, recipient: &str, page: u64) -> FaucetResult<TxPage> {
        let args = vec![
            "query".to_string(),
            "txs".to_string(),
            "--events".to_string(),
            format!("message.sender={sender}&transfer.recipient={recipient}"),
            "--page".to_string(),
            page.to_string(),
            "--limit".to_string(),
            self.options.page_limit.to_string(),
            "--node".to_string(),
            self.options.node.clone(),
            "--chain-id".to_string(),
            self.options.chain_id.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];

        let output = self.run(&args, None).await.map_err(FaucetError::LedgerQuery)?;
        if !output.success {
            return Err(FaucetError::LedgerQuery(output.stderr.trim().to_string()));
        }
        parse_tx_page(&output.stdout, page, self.options.page_limit)
    }

    async fn submit_transfer(
        &self,
        account: &FaucetAccount,
        recipient: &str,
        coins: &CoinSet,
        fees: &FeeParams,
    ) -> FaucetResult<SubmitReceipt> {
        let mut args = vec![
            "tx".to_string(),
            "bank".to_string(),
            "send".to_string(),
            account.name.clone(),
            recipient.to_string(),
            coins.to_string(),
            "--chain-id".to_string(),
            self.options.chain_id.clone(),
            "--node".to_string(),
            self.options.node.clone(),
            "--gas".to_string(),
            "auto".to_string(),
            "--gas-adjustment".to_string(),
            fees.gas_adjustment.clone(),
            "--broadcast-mode".to_string(),
            fees.broadcast_mode.clone(),
            "--yes".to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if !fees.gas_prices.is_empty() {
            args.push("--gas-prices".to_string());
            args.push(fees.gas_prices.clone());
        }
        args.extend(self.keyring_args());

        let input = self.options.keyring_password.as_ref().map(|p| format!("{p}\n"));
        let output = self.run(&args, input).await.map_err(FaucetError::LedgerSubmit)?;
        if !output.success {
            return Err(FaucetError::LedgerSubmit(output.stderr.trim().to_string()));
        }
        parse_submit_response(&output.stdout)
    }

    async fn tx_status(&self, tx_hash: &str) -> FaucetResult<TxStatus> {
        let args = vec![
            "query".to_string(),
            "tx".to_string(),
            tx_hash.to_string(),
            "--node".to_string(),
            self.options.node.clone(),
            "--chain-id".to_string(),
            self.options.chain_id.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];

        let output = self.run(&args, None).await.map_err(FaucetError::LedgerQuery)?;
        if !output.success {
            let stderr = output.stderr.trim();
            if stderr.to_ascii_lowercase().contains(MSG_TX_NOT_FOUND) {
                return Ok(TxStatus::Pending);
            }
            return Err(FaucetError::LedgerQuery(stderr.to_string()));
        }
        parse_tx_status(&output.stdout)
    }
}

// Cosmos CLIs print 64-bit integers either as JSON numbers or as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

impl NumberOrString {
    fn as_u64(&self) -> Option<u64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::String(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxSearchResponse {
    #[serde(default)]
    page_total: Option<NumberOrString>,
    #[serde(default)]
    txs: Vec<RawTx>,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    logs: Vec<RawLog>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Vec<RawAttribute>,
}

#[derive(Debug, Deserialize)]
struct RawAttribute {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

impl From<RawEvent> for LedgerEvent {
    fn from(raw: RawEvent) -> Self {
        LedgerEvent {
            kind: raw.kind,
            attributes: raw
                .attributes
                .into_iter()
                .map(|a| EventAttribute::new(a.key, a.value.unwrap_or_default()))
                .collect(),
        }
    }
}

/// Decodes one `query txs` page. `page_total` decides whether more pages
/// follow; without it a full page means there may be more.
pub fn parse_tx_page(json: &str, page: u64, page_limit: u64) -> FaucetResult<TxPage> {
    let response: TxSearchResponse =
        serde_json::from_str(json).map_err(|e| FaucetError::LedgerQuery(format!("invalid txs response: {e}")))?;

    let full_page = response.txs.len() as u64 >= page_limit.max(1);
    let next_page = match response.page_total.as_ref().and_then(NumberOrString::as_u64) {
        Some(total) => (page < total).then_some(page + 1),
        None => full_page.then_some(page + 1),
    };

    let txs = response
        .txs
        .into_iter()
        .map(decode_tx)
        .collect::<FaucetResult<Vec<_>>>()?;

    Ok(TxPage { txs, next_page })
}

fn decode_tx(raw: RawTx) -> FaucetResult<LedgerTx> {
    let timestamp = if raw.timestamp.is_empty() {
        None
    } else {
        let parsed = DateTime::parse_from_rfc3339(&raw.timestamp).map_err(|e| {
            FaucetError::LedgerDecode(format!("tx {}: timestamp {:?}: {}", raw.txhash, raw.timestamp, e))
        })?;
        Some(parsed.with_timezone(&Utc))
    };

    // Older SDKs report events per message in `logs`, newer ones only at the
    // top level. Reading both would count every transfer twice.
    let log_events: Vec<RawEvent> = raw.logs.into_iter().flat_map(|log| log.events).collect();
    let events = if log_events.is_empty() { raw.events } else { log_events };

    Ok(LedgerTx {
        hash: raw.txhash,
        timestamp,
        events: events.into_iter().map(LedgerEvent::from).collect(),
    })
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    code: Option<NumberOrString>,
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    raw_log: String,
}

/// Decodes the output of `tx bank send --output json`. A non-zero `code`
/// means the ledger rejected the transaction.
pub fn parse_submit_response(json: &str) -> FaucetResult<SubmitReceipt> {
    let response: BroadcastResponse = serde_json::from_str(json.trim())
        .map_err(|e| FaucetError::LedgerSubmit(format!("unreadable broadcast response: {e}")))?;

    let code = response.code.as_ref().and_then(NumberOrString::as_u64).unwrap_or(0);
    if code != 0 {
        return Err(FaucetError::LedgerSubmit(format!("code {}: {}", code, response.raw_log)));
    }
    Ok(SubmitReceipt {
        tx_hash: response.txhash,
    })
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    height: Option<NumberOrString>,
    #[serde(default)]
    code: Option<NumberOrString>,
    #[serde(default)]
    raw_log: String,
}

/// Decodes the output of `query tx <hash> --output json`.
pub fn parse_tx_status(json: &str) -> FaucetResult<TxStatus> {
    let response: TxResponse = serde_json::from_str(json.trim())
        .map_err(|e| FaucetError::LedgerQuery(format!("invalid tx response: {e}")))?;

    let height = response.height.as_ref().and_then(NumberOrString::as_u64).unwrap_or(0);
    if height == 0 {
        return Ok(TxStatus::Pending);
    }
    match response.code.as_ref().and_then(NumberOrString::as_u64).unwrap_or(0) {
        0 => Ok(TxStatus::Committed),
        code => Ok(TxStatus::Failed(format!("code {}: {}", code, response.raw_log))),
    }
}
