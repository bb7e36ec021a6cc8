//! Coins and coin sets.
//!
//! Amounts are unsigned integers of at most 78 decimal digits. A `CoinSet`
//! stores one amount per denomination, keyed alphabetically, and never holds
//! a zero amount, so an empty set means "no coins".

use crate::error::{FaucetError, FaucetResult};
use num_bigint::BigUint;
use num_traits::Zero;
use std::collections::{btree_map, BTreeMap};
use std::fmt;
use std::str::FromStr;

/// Maximum denomination length accepted by Cosmos SDK chains.
const MAX_DENOM_LEN: usize = 128;
const MIN_DENOM_LEN: usize = 3;

/// Digits in the largest 256-bit amount a Cosmos SDK ledger can hold.
pub const MAX_AMOUNT_DIGITS: usize = 78;

/// A single (denomination, amount) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub denom: String,
    pub amount: BigUint,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: impl Into<BigUint>) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.into(),
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Parses `<amount><denom>`, e.g. `10000000uarch` or `5 ibc/27394FB0`.
impl FromStr for Coin {
    type Err = FaucetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| FaucetError::InvalidCoin(format!("{s:?} has no denomination")))?;
        let (amount, denom) = s.split_at(split);
        if amount.is_empty() {
            return Err(FaucetError::InvalidCoin(format!("{s:?} has no amount")));
        }
        if denom.starts_with('.') {
            return Err(FaucetError::InvalidCoin(format!(
                "{s:?} has a decimal amount, only integers are accepted"
            )));
        }
        let denom = denom.trim_start();
        validate_denom(denom)?;
        if amount.len() > MAX_AMOUNT_DIGITS {
            return Err(FaucetError::InvalidCoin(format!(
                "amount of {denom} has {} digits, at most {MAX_AMOUNT_DIGITS} are accepted",
                amount.len()
            )));
        }

        let amount = amount
            .parse::<BigUint>()
            .map_err(|e| FaucetError::InvalidCoin(format!("{s:?}: {e}")))?;

        Ok(Coin::new(denom, amount))
    }
}

/// Checks a denomination against the Cosmos SDK rule
/// `[a-zA-Z][a-zA-Z0-9/:._-]{2,127}`.
pub fn validate_denom(denom: &str) -> FaucetResult<()> {
    let mut chars = denom.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '_' | '-'));
    let len_ok = (MIN_DENOM_LEN..=MAX_DENOM_LEN).contains(&denom.len());

    if first_ok && rest_ok && len_ok {
        Ok(())
    } else {
        Err(FaucetError::InvalidCoin(format!("invalid denomination {denom:?}")))
    }
}

/// Amounts aggregated by denomination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinSet(BTreeMap<String, BigUint>);

impl CoinSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Parses a comma-separated coin list, summing repeated denominations.
    /// Zero amounts are dropped and blank segments are ignored.
    pub fn parse(s: &str) -> FaucetResult<Self> {
        Self::parse_list([s])
    }

    /// Parses several coin strings, each of which may itself be a
    /// comma-separated list.
    pub fn parse_list<I, S>(items: I) -> FaucetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for item in items {
            for part in item.as_ref().split(',') {
                if part.trim().is_empty() {
                    continue;
                }
                let coin: Coin = part.parse()?;
                set.add(&coin.denom, &coin.amount);
            }
        }
        Ok(set)
    }

    /// Like [`CoinSet::parse`], but a repeated denomination is an error.
    /// Used for configured limits, where a duplicate is almost certainly a typo.
    pub fn parse_strict(s: &str) -> FaucetResult<Self> {
        let mut set = Self::new();
        for part in s.split(',').filter(|p| !p.trim().is_empty()) {
            let coin: Coin = part.parse()?;
            if set.0.contains_key(&coin.denom) {
                return Err(FaucetError::InvalidCoin(format!(
                    "denomination {} listed more than once",
                    coin.denom
                )));
            }
            set.add(&coin.denom, &coin.amount);
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, denom: &str) -> Option<&BigUint> {
        self.0.get(denom)
    }

    /// Amount of `denom`, zero when absent.
    pub fn amount_of(&self, denom: &str) -> BigUint {
        self.0.get(denom).cloned().unwrap_or_else(BigUint::zero)
    }

    pub fn contains_denom(&self, denom: &str) -> bool {
        self.0.contains_key(denom)
    }

    /// Adds `amount` to `denom`, creating the entry if needed.
    pub fn add(&mut self, denom: &str, amount: &BigUint) {
        if amount.is_zero() {
            return;
        }
        match self.0.get_mut(denom) {
            Some(existing) => *existing += amount,
            None => {
                self.0.insert(denom.to_string(), amount.clone());
            }
        }
    }

    /// Adds every coin of `other` into `self`.
    pub fn merge(&mut self, other: &CoinSet) {
        for (denom, amount) in other.iter() {
            self.add(denom, amount);
        }
    }

    pub fn iter(&self) -> CoinSetIter<'_> {
        CoinSetIter(self.0.iter())
    }

    pub fn denoms(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<Coin> for CoinSet {
    fn from_iter<T: IntoIterator<Item = Coin>>(iter: T) -> Self {
        let mut set = CoinSet::new();
        for coin in iter {
            set.add(&coin.denom, &coin.amount);
        }
        set
    }
}

pub struct CoinSetIter<'a>(btree_map::Iter<'a, String, BigUint>);

impl<'a> Iterator for CoinSetIter<'a> {
    type Item = (&'a str, &'a BigUint);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(denom, amount)| (denom.as_str(), amount))
    }
}

impl<'a> IntoIterator for &'a CoinSet {
    type Item = (&'a str, &'a BigUint);
    type IntoIter = CoinSetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Formats as the comma-separated list the chain CLI expects, e.g.
/// `1000uarch,5ustake`.
impl fmt::Display for CoinSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (denom, amount)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{amount}{denom}")?;
        }
        Ok(())
    }
}
