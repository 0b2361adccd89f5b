//! Symbol alias resolution.
//!
//! The same logical instrument shows up under different renderings depending
//! on which venue or data feed produced the string: `AAPL`, `AAPL.SMART`,
//! `NASDAQ.AAPL`, `SHSE.600000`, `SEHK.00700`, `00700`, `700`, `EUR.USD`,
//! `EURUSD`, `CASH.EUR.USD`. Snapshot reconciliation has to match orders
//! across those renderings, so this crate centralizes the rules in one
//! place:
//!
//! - [`resolve_contract_spec`] classifies a rendering as stock / forex /
//!   crypto and extracts the canonical core token.
//! - [`alias_set`] expands a rendering into every equivalent token.
//! - [`symbols_match`] declares two renderings equal iff their alias sets
//!   intersect.
//!
//! `alias_set` is closed under composition: running it over any of its own
//! outputs never changes a match result.

use std::collections::BTreeSet;

// Exchange hints. Explicit whitelist for the common US routes, plus a shape
// rule (2..=10 uppercase letters) so a new venue code does not require a code
// change here.
const US_PRIMARY_EXCHANGE_HINTS: &[&str] = &[
    "SMART", "ISLAND", "NASDAQ", "ARCA", "NYSE", "AMEX", "BATS", "PINK", "IEX", "CBOE", "MEMX",
    "EDGX", "EDGEA", "BYX", "BEX", "NYSENAT",
];

const CN_PREFIXES: &[&str] = &["SHSE", "SZSE"];
const HK_PREFIXES: &[&str] = &["SEHK", "HK"];

// Keeps BTC.USD / EUR.USD from being read as Ticker.Exchange.
const COMMON_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "HKD", "CNH", "CNY", "AUD", "CAD", "CHF", "NZD", "SGD",
];

fn is_currency(token: &str) -> bool {
    COMMON_CURRENCIES.contains(&token)
}

fn is_exchange_shaped(token: &str) -> bool {
    (2..=10).contains(&token.len()) && token.bytes().all(|b| b.is_ascii_uppercase())
}

fn is_likely_exchange_token(token: &str) -> bool {
    if token.is_empty() || is_currency(token) {
        return false;
    }
    US_PRIMARY_EXCHANGE_HINTS.contains(&token) || is_exchange_shaped(token)
}

/// Strips leading zeros from an all-digit code (`00700` -> `700`).
/// An all-zero code collapses to `0`.
fn strip_leading_zeros(code: &str) -> String {
    let stripped = code.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

// ---------------------------------------------------------------------------
// Contract spec
// ---------------------------------------------------------------------------

/// Canonical classification of one symbol rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractSpec {
    Stock {
        symbol: String,
        exchange: String,
        currency: String,
        primary_exchange: Option<String>,
    },
    Forex {
        pair: String,
    },
    Crypto {
        symbol: String,
        exchange: String,
        currency: String,
    },
}

/// Parse a user- or venue-rendered symbol into a unified spec.
///
/// Recognized shapes, in priority order:
///
/// 1. Three-segment: `STK.AAPL.USD`, `CASH.EUR.USD`, `CRYPTO.BTC.USD`
/// 2. Two-segment prefix forms: `SHSE.600000`, `SEHK.00700`, `NASDAQ.AAPL`
/// 3. Two-segment forex shorthand: `EUR.USD`
/// 4. Two-segment `Ticker.Exchange`: `AAPL.IEX`, `QQQ.ISLAND`
/// 5. Bare numeric HK codes: `00700`, `700`
/// 6. Everything else: US stock routed SMART/USD.
pub fn resolve_contract_spec(symbol: &str) -> ContractSpec {
    let sym = symbol.trim().to_uppercase();

    let default = ContractSpec::Stock {
        symbol: sym.clone(),
        exchange: "SMART".to_string(),
        currency: "USD".to_string(),
        primary_exchange: None,
    };

    if sym.is_empty() {
        return default;
    }

    let parts: Vec<&str> = sym.split('.').collect();

    if parts.len() == 3 {
        let (sec_type, p1, p2) = (parts[0], parts[1], parts[2]);
        match sec_type {
            "STK" => {
                return ContractSpec::Stock {
                    symbol: p1.to_string(),
                    exchange: "SMART".to_string(),
                    currency: p2.to_string(),
                    primary_exchange: None,
                }
            }
            "CASH" => {
                return ContractSpec::Forex {
                    pair: format!("{p1}{p2}"),
                }
            }
            "CRYPTO" => {
                return ContractSpec::Crypto {
                    symbol: p1.to_string(),
                    exchange: "PAXOS".to_string(),
                    currency: p2.to_string(),
                }
            }
            _ => {}
        }
    }

    if parts.len() == 2 {
        let (p1, p2) = (parts[0], parts[1]);

        if CN_PREFIXES.contains(&p1) {
            return ContractSpec::Stock {
                symbol: p2.to_string(),
                exchange: "SEHK".to_string(),
                currency: "CNH".to_string(),
                primary_exchange: None,
            };
        }

        if HK_PREFIXES.contains(&p1) {
            let code = if p2.bytes().all(|b| b.is_ascii_digit()) {
                strip_leading_zeros(p2)
            } else {
                p2.to_string()
            };
            return ContractSpec::Stock {
                symbol: code,
                exchange: "SEHK".to_string(),
                currency: "HKD".to_string(),
                primary_exchange: None,
            };
        }

        // Exchange.Ticker: NASDAQ.AAPL
        if US_PRIMARY_EXCHANGE_HINTS.contains(&p1) {
            return ContractSpec::Stock {
                symbol: p2.to_string(),
                exchange: "SMART".to_string(),
                currency: "USD".to_string(),
                primary_exchange: (p1 != "SMART").then(|| p1.to_string()),
            };
        }

        // Forex shorthand: EUR.USD
        if is_currency(p1) && is_currency(p2) {
            return ContractSpec::Forex {
                pair: format!("{p1}{p2}"),
            };
        }

        // Ticker.Exchange: AAPL.IEX / QQQ.ISLAND / EWJ.SMART
        if is_likely_exchange_token(p2) {
            return ContractSpec::Stock {
                symbol: p1.to_string(),
                exchange: "SMART".to_string(),
                currency: "USD".to_string(),
                primary_exchange: (p2 != "SMART").then(|| p2.to_string()),
            };
        }
    }

    // Bare HK numeric codes, with or without leading zeros.
    if !sym.is_empty() && sym.bytes().all(|b| b.is_ascii_digit()) {
        return ContractSpec::Stock {
            symbol: strip_leading_zeros(&sym),
            exchange: "SEHK".to_string(),
            currency: "HKD".to_string(),
            primary_exchange: None,
        };
    }

    default
}

// ---------------------------------------------------------------------------
// Alias sets
// ---------------------------------------------------------------------------

/// Expand a rendering into every equivalent token.
///
/// Covers the raw uppercase string, the canonical core from the contract
/// spec, numeric forms with and without leading zeros, and forex pair
/// concatenations. Empty input yields the empty set.
pub fn alias_set(symbol: &str) -> BTreeSet<String> {
    let raw = symbol.trim().to_uppercase();
    let mut aliases = BTreeSet::new();
    if raw.is_empty() {
        return aliases;
    }
    aliases.insert(raw.clone());

    match resolve_contract_spec(&raw) {
        ContractSpec::Stock { symbol, .. } => {
            if !symbol.is_empty() {
                if symbol.bytes().all(|b| b.is_ascii_digit()) {
                    aliases.insert(strip_leading_zeros(&symbol));
                }
                aliases.insert(symbol);
            }
        }
        ContractSpec::Forex { pair } => {
            if !pair.is_empty() {
                aliases.insert(pair);
            }
        }
        ContractSpec::Crypto { symbol, .. } => {
            if !symbol.is_empty() {
                aliases.insert(symbol);
            }
        }
    }

    // Exchange-prefixed eastern renderings keep the bare ticker as an alias
    // even when the spec routes them elsewhere: SHSE.600000 must meet a
    // snapshot that says just 600000.
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() == 2 {
        let (left, right) = (parts[0], parts[1]);
        if (CN_PREFIXES.contains(&left) || HK_PREFIXES.contains(&left)) && !right.is_empty() {
            if right.bytes().all(|b| b.is_ascii_digit()) {
                aliases.insert(strip_leading_zeros(right));
            }
            aliases.insert(right.to_string());
        }
    }

    aliases
}

/// Two renderings refer to the same instrument iff their alias sets share a
/// token.
pub fn symbols_match(left: &str, right: &str) -> bool {
    let left = left.trim();
    let right = right.trim();
    if left.is_empty() || right.is_empty() {
        return false;
    }
    let la = alias_set(left);
    let ra = alias_set(right);
    la.intersection(&ra).next().is_some()
}
