// =============================================================================
// Pair registry and timeframe set
// =============================================================================
//
// The engine recognizes a fixed universe of 65 perpetual-swap bases. Input
// symbols are normalized (trimmed, uppercased) and validated against both a
// character-shape rule and the registry before any analysis runs.

use serde::{Deserialize, Serialize};

/// The 65 recognized perpetual-swap bases.
pub const RECOGNIZED_PAIRS: [&str; 65] = [
    "BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "DOGE", "AVAX", "DOT", "LINK",
    "LTC", "BCH", "UNI", "ATOM", "NEAR", "APT", "ARB", "OP", "FIL", "TRX",
    "ETC", "XLM", "ICP", "HBAR", "INJ", "SUI", "TIA", "SEI", "TON", "AAVE",
    "MKR", "CRV", "LDO", "SNX", "COMP", "DYDX", "GMX", "PEPE", "SHIB", "WIF",
    "BONK", "FLOKI", "ORDI", "JTO", "JUP", "PYTH", "WLD", "FET", "RNDR", "GRT",
    "SAND", "MANA", "AXS", "GALA", "IMX", "APE", "CHZ", "ENS", "ALGO", "VET",
    "EOS", "STX", "RUNE", "KAS", "NOT",
];

/// A validated, case-normalized trading pair (base asset only, e.g. "BTC").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pair(String);

impl Pair {
    /// Normalize and validate a raw symbol against the registry.
    ///
    /// Normalization trims whitespace and uppercases. The shape rule is
    /// `[A-Z0-9]{2,10}` after uppercasing; anything else is rejected before
    /// the registry lookup.
    pub fn parse(raw: &str) -> Result<Self, PairError> {
        let normalized = raw.trim().to_uppercase();

        if normalized.len() < 2
            || normalized.len() > 10
            || !normalized.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(PairError::Malformed(raw.to_string()));
        }

        if !RECOGNIZED_PAIRS.contains(&normalized.as_str()) {
            return Err(PairError::Unknown(normalized));
        }

        Ok(Self(normalized))
    }

    /// The normalized base asset, e.g. "BTC".
    pub fn base(&self) -> &str {
        &self.0
    }

    /// Provider-qualified perpetual instrument id, e.g. "BTC-USDT-SWAP".
    pub fn instrument_id(&self) -> String {
        format!("{}-USDT-SWAP", self.0)
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a raw symbol was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairError {
    /// Does not match `[A-Z0-9]{2,10}` after normalization.
    Malformed(String),
    /// Well-formed but not in the recognized universe.
    Unknown(String),
}

impl std::fmt::Display for PairError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(s) => write!(f, "malformed symbol: {s:?}"),
            Self::Unknown(s) => write!(f, "unrecognized pair: {s}"),
        }
    }
}

impl std::error::Error for PairError {}

// =============================================================================
// Timeframe
// =============================================================================

/// Closed set of supported candle timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Self::M1,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H4,
        Self::D1,
    ];

    /// Parse a timeframe label, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "1m" => Some(Self::M1),
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "30m" => Some(Self::M30),
            "1h" => Some(Self::H1),
            "4h" => Some(Self::H4),
            "1d" => Some(Self::D1),
            _ => None,
        }
    }

    /// Canonical lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Candle interval in milliseconds.
    pub fn interval_ms(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::M30 => 1_800_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
