//! Optional address whitelist.
//!
//! The whitelist file is a two-column table, one `address,allowance` row per
//! line. An allowance of zero keeps the row on file but denies the address.
//! Blank lines and lines starting with `#` are skipped. Addresses are stored
//! in the same canonical form as incoming requests.

use crate::error::{FaucetError, FaucetResult};
use crate::validator::normalize_address;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    entries: HashMap<String, u32>,
}

impl Whitelist {
    pub fn load(path: impl AsRef<Path>) -> FaucetResult<Self> {
        let path = path.as_ref();
        info!("Loading whitelist addresses from: {}", path.display());

        let contents = std::fs::read_to_string(path)
            .map_err(|e| FaucetError::Config(format!("whitelist {}: {}", path.display(), e)))?;
        let whitelist = Self::parse(&contents)?;

        info!("Loaded {} whitelist entries", whitelist.len());
        Ok(whitelist)
    }

    pub fn parse(contents: &str) -> FaucetResult<Self> {
        let mut entries = HashMap::new();

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut columns = line.split(',').map(str::trim);
            let address = columns.next().unwrap_or_default();
            let allowance = columns.next().ok_or_else(|| {
                FaucetError::Config(format!("whitelist line {}: missing allowance column", index + 1))
            })?;

            if address.is_empty() {
                return Err(FaucetError::Config(format!(
                    "whitelist line {}: empty address",
                    index + 1
                )));
            }
            let allowance = allowance.parse::<u32>().map_err(|e| {
                FaucetError::Config(format!("whitelist line {}: allowance {allowance:?}: {e}", index + 1))
            })?;

            entries.insert(normalize_address(address), allowance);
        }

        Ok(Self { entries })
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(a, n)| (normalize_address(&Into::<String>::into(a)), n))
                .collect(),
        }
    }

    /// Whether `address` may receive coins.
    pub fn allows(&self, address: &str) -> bool {
        self.allowance(address).is_some_and(|n| n > 0)
    }

    pub fn allowance(&self, address: &str) -> Option<u32> {
        self.entries.get(&normalize_address(address)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
