use ledger::usd_cents;
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use std::{
    fmt,
    ops::Add,
    str::FromStr,
};

/// A non-negative dollar amount held as whole cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Usd(u64);

impl Usd {
    pub const ZERO: Usd = Usd(0);

    pub const fn from_cents(cents: u64) -> Self {
        Usd(cents)
    }

    pub fn from_dollars(dollars: f64) -> Option<Self> {
        usd_cents::from_dollars(dollars).map(Usd)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub fn dollars(self) -> f64 {
        usd_cents::to_dollars(self.0)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `self × (1 + percent / 100)`, rounded to the cent.
    pub fn with_surcharge(self, percent: f64) -> Usd {
        let scaled = self.0 as f64 * (1.0 + percent / 100.0);
        Usd(scaled.round().max(0.0) as u64)
    }

    /// `percent`% of `self`, rounded to the cent.
    pub fn percent(self, percent: f64) -> Usd {
        Usd((self.0 as f64 * percent / 100.0).round().max(0.0) as u64)
    }

    pub fn saturating_sub(self, other: Usd) -> Usd {
        Usd(self.0.saturating_sub(other.0))
    }
}

impl Add for Usd {
    type Output = Usd;

    fn add(self, rhs: Usd) -> Usd {
        Usd(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Usd {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        usd_cents::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Usd {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        usd_cents::deserialize(deserializer).map(Usd)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    Ltc,
    Sol,
    Btc,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Ltc, Network::Sol, Network::Btc];

    pub fn ticker(self) -> &'static str {
        match self {
            Network::Ltc => "LTC",
            Network::Sol => "SOL",
            Network::Btc => "BTC",
        }
    }

    /// Identifier used by the secondary price provider.
    pub fn coingecko_id(self) -> &'static str {
        match self {
            Network::Ltc => "litecoin",
            Network::Sol => "solana",
            Network::Btc => "bitcoin",
        }
    }

    /// Decimal places of the chain's smallest unit (litoshi, lamport, satoshi).
    pub fn decimals(self) -> u32 {
        match self {
            Network::Ltc | Network::Btc => 8,
            Network::Sol => 9,
        }
    }

    pub fn payout_address_env(self) -> &'static str {
        match self {
            Network::Ltc => "LTC_PAYOUT_ADDRESS",
            Network::Sol => "SOL_PAYOUT_ADDRESS",
            Network::Btc => "BTC_PAYOUT_ADDRESS",
        }
    }

    /// Convert to base units rounding up, so the payee never receives less than
    /// `amount`.
    pub fn to_base_units(self, amount: f64) -> Option<u64> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        let scaled = amount * 10f64.powi(self.decimals() as i32);
        // absorb binary representation noise before rounding up
        let units = (scaled - 1e-6).ceil().max(0.0);
        if units > u64::MAX as f64 {
            return None;
        }
        Some(units as u64)
    }

    pub fn from_base_units(self, units: u64) -> f64 {
        units as f64 / 10f64.powi(self.decimals() as i32)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ticker())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LTC" => Ok(Network::Ltc),
            "SOL" => Ok(Network::Sol),
            "BTC" => Ok(Network::Btc),
            other => Err(format!("unknown network '{other}', expected LTC, SOL or BTC")),
        }
    }
}
