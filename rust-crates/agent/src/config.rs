use crate::{
    AgentError,
    Result,
    extract,
    money::{
        Network,
        Usd,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::HashMap,
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use url::Url;

pub const LIVE_TRANSFERS_ENV: &str = "ENABLE_LIVE_TRANSFERS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_network")]
    pub crypto_network: Network,
    #[serde(default = "default_tax_percentage")]
    pub tax_percentage: f64,
    #[serde(default)]
    pub betting_limits: BettingLimits,
    #[serde(default)]
    pub middleman_ids: Vec<String>,
    #[serde(default)]
    pub dice_bot_ids: Vec<String>,
    /// Users allowed to issue wallet commands by direct message.
    #[serde(default)]
    pub owner_ids: Vec<String>,
    #[serde(default)]
    pub monitored_channels: Vec<String>,
    #[serde(default)]
    pub channels: ChannelSettings,
    #[serde(default)]
    pub payment_safety: PaymentSafety,
    #[serde(default)]
    pub payout_addresses: HashMap<Network, String>,
    #[serde(default)]
    pub response_templates: ResponseTemplates,
    #[serde(default)]
    pub game_settings: GameSettings,
    #[serde(default = "default_bet_cooldown_ms")]
    pub bet_cooldown_ms: u64,
    #[serde(default = "default_channel_send_gap_ms")]
    pub channel_send_gap_ms: u64,
    #[serde(default = "default_pending_wager_ttl_ms")]
    pub pending_wager_ttl_ms: u64,
    #[serde(default = "default_payout_tolerance_percentage")]
    pub payout_tolerance_percentage: f64,
    #[serde(default = "default_payout_poll_secs")]
    pub payout_poll_secs: u64,
    /// Reject `XvY` offers whose two sides differ.
    #[serde(default = "default_true")]
    pub require_matching_bet: bool,
    #[serde(default)]
    pub simulation_mode: bool,
    #[serde(default)]
    pub wallet: WalletSettings,
    #[serde(default)]
    pub oracle: OracleSettings,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Set from the environment only, never from the document.
    #[serde(skip)]
    pub live_transfers: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BettingLimits {
    pub min: Usd,
    pub max: Usd,
}

impl Default for BettingLimits {
    fn default() -> Self {
        Self {
            min: Usd::from_cents(200),
            max: Usd::from_cents(5_000),
        }
    }
}

impl BettingLimits {
    pub fn contains(&self, amount: Usd) -> bool {
        amount >= self.min && amount <= self.max
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub vouch_channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSafety {
    #[serde(default = "default_max_payment_per_tx")]
    pub max_payment_per_tx: Usd,
    #[serde(default = "default_max_daily_usd")]
    pub max_daily_usd: Usd,
    #[serde(default)]
    pub address_allowlist: Vec<String>,
    #[serde(default)]
    pub price_safety: PriceSafety,
}

impl Default for PaymentSafety {
    fn default() -> Self {
        Self {
            max_payment_per_tx: default_max_payment_per_tx(),
            max_daily_usd: default_max_daily_usd(),
            address_allowlist: Vec::new(),
            price_safety: PriceSafety::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSafety {
    #[serde(default = "default_max_deviation_percentage")]
    pub max_deviation_percentage: f64,
    #[serde(default = "default_hard_min_price")]
    pub hard_min_price: HashMap<Network, f64>,
    #[serde(default = "default_hard_max_price")]
    pub hard_max_price: HashMap<Network, f64>,
}

impl Default for PriceSafety {
    fn default() -> Self {
        Self {
            max_deviation_percentage: default_max_deviation_percentage(),
            hard_min_price: default_hard_min_price(),
            hard_max_price: default_hard_max_price(),
        }
    }
}

impl PriceSafety {
    pub fn bounds(&self, network: Network) -> (f64, f64) {
        let min = self.hard_min_price.get(&network).copied().unwrap_or(0.0);
        let max = self
            .hard_max_price
            .get(&network)
            .copied()
            .unwrap_or(f64::INFINITY);
        (min, max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTemplates {
    #[serde(default = "default_bet_offer")]
    pub bet_offer: String,
    #[serde(default = "default_payment_sent")]
    pub payment_sent: String,
    #[serde(default = "default_vouch_win")]
    pub vouch_win: String,
}

impl Default for ResponseTemplates {
    fn default() -> Self {
        Self {
            bet_offer: default_bet_offer(),
            payment_sent: default_payment_sent(),
            vouch_win: default_vouch_win(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSettings {
    #[serde(default = "default_wins_to_complete")]
    pub wins_to_complete: u32,
    #[serde(default = "default_true")]
    pub bot_wins_ties: bool,
    #[serde(default = "default_dice_command")]
    pub dice_command: String,
    /// Hold won tickets in AWAITING_PAYOUT until the pot shows up in the wallet.
    #[serde(default = "default_true")]
    pub await_payout: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            wins_to_complete: default_wins_to_complete(),
            bot_wins_ties: true,
            dice_command: default_dice_command(),
            await_payout: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSettings {
    #[serde(default)]
    pub rpc_url: Option<Url>,
    /// Name of the environment variable holding the wallet daemon bearer token.
    #[serde(default)]
    pub auth_token_env: Option<String>,
    #[serde(default = "default_wallet_timeout_secs")]
    pub timeout_secs: u64,
    /// Starting balance used by the simulated wallet.
    #[serde(default)]
    pub simulated_balance: f64,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            rpc_url: None,
            auth_token_env: None,
            timeout_secs: default_wallet_timeout_secs(),
            simulated_balance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleSettings {
    #[serde(default)]
    pub primary_url: Option<Url>,
    #[serde(default)]
    pub secondary_url: Option<Url>,
}

fn default_network() -> Network {
    Network::Ltc
}

fn default_tax_percentage() -> f64 {
    15.0
}

fn default_bet_cooldown_ms() -> u64 {
    60_000
}

fn default_channel_send_gap_ms() -> u64 {
    2_500
}

fn default_pending_wager_ttl_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_payout_tolerance_percentage() -> f64 {
    5.0
}

fn default_payout_poll_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_payment_per_tx() -> Usd {
    Usd::from_cents(10_000)
}

fn default_max_daily_usd() -> Usd {
    Usd::from_cents(50_000)
}

fn default_max_deviation_percentage() -> f64 {
    25.0
}

fn default_hard_min_price() -> HashMap<Network, f64> {
    HashMap::from([
        (Network::Ltc, 10.0),
        (Network::Sol, 5.0),
        (Network::Btc, 5_000.0),
    ])
}

fn default_hard_max_price() -> HashMap<Network, f64> {
    HashMap::from([
        (Network::Ltc, 1_000.0),
        (Network::Sol, 2_000.0),
        (Network::Btc, 1_000_000.0),
    ])
}

fn default_bet_offer() -> String {
    "<@{user}> vs my ${calculated} I win ties, your ${base}. Open a ticket with a middleman."
        .to_string()
}

fn default_payment_sent() -> String {
    "Sent ${amount}. TX: {txid}".to_string()
}

fn default_vouch_win() -> String {
    "+vouch won ${amount} vs <@{opponent}>, middleman <@{middleman}>".to_string()
}

fn default_wins_to_complete() -> u32 {
    5
}

fn default_dice_command() -> String {
    "!dice".to_string()
}

fn default_wallet_timeout_secs() -> u64 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crypto_network: default_network(),
            tax_percentage: default_tax_percentage(),
            betting_limits: BettingLimits::default(),
            middleman_ids: Vec::new(),
            dice_bot_ids: Vec::new(),
            owner_ids: Vec::new(),
            monitored_channels: Vec::new(),
            channels: ChannelSettings::default(),
            payment_safety: PaymentSafety::default(),
            payout_addresses: HashMap::new(),
            response_templates: ResponseTemplates::default(),
            game_settings: GameSettings::default(),
            bet_cooldown_ms: default_bet_cooldown_ms(),
            channel_send_gap_ms: default_channel_send_gap_ms(),
            pending_wager_ttl_ms: default_pending_wager_ttl_ms(),
            payout_tolerance_percentage: default_payout_tolerance_percentage(),
            payout_poll_secs: default_payout_poll_secs(),
            require_matching_bet: true,
            simulation_mode: false,
            wallet: WalletSettings::default(),
            oracle: OracleSettings::default(),
            state_dir: None,
            live_transfers: false,
        }
    }
}

impl Config {
    /// Read, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            AgentError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_json(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AgentError::ConfigInvalid(format!("malformed config: {e}")))
    }

    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        self.live_transfers = env(LIVE_TRANSFERS_ENV).as_deref() == Some("true");
        for network in Network::ALL {
            if let Some(address) = env(network.payout_address_env()) {
                let address = address.trim().to_string();
                if !address.is_empty() {
                    self.payout_addresses.insert(network, address);
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AgentError::ConfigInvalid(msg));
        if self.betting_limits.min > self.betting_limits.max {
            return invalid(format!(
                "betting_limits.min ${} exceeds max ${}",
                self.betting_limits.min, self.betting_limits.max
            ));
        }
        if !self.tax_percentage.is_finite() || self.tax_percentage < 0.0 {
            return invalid(format!("tax_percentage {} is negative", self.tax_percentage));
        }
        let safety = &self.payment_safety;
        if safety.max_payment_per_tx.is_zero() || safety.max_daily_usd.is_zero() {
            return invalid("payment caps must be positive".to_string());
        }
        if safety.price_safety.max_deviation_percentage <= 0.0 {
            return invalid("max_deviation_percentage must be positive".to_string());
        }
        for network in Network::ALL {
            let (min, max) = safety.price_safety.bounds(network);
            if min >= max {
                return invalid(format!("{network} hard_min_price {min} >= hard_max_price {max}"));
            }
        }
        if self.game_settings.wins_to_complete == 0 {
            return invalid("game_settings.wins_to_complete must be at least 1".to_string());
        }
        let network = self.crypto_network;
        let Some(own_address) = self.payout_addresses.get(&network) else {
            return invalid(format!("no payout address configured for {network}"));
        };
        if !extract::is_valid_address(own_address, network) {
            return invalid(format!("payout address {own_address} is not a valid {network} address"));
        }
        Ok(())
    }

    pub fn own_payout_address(&self) -> Option<&str> {
        self.payout_addresses
            .get(&self.crypto_network)
            .map(String::as_str)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    const OWN_LTC: &str = "LQ3B5Y4bEWkfMHnFvi6VCfhMHTVVcMZQ7S";

    fn minimal_json() -> String {
        format!(r#"{{ "payout_addresses": {{ "LTC": "{OWN_LTC}" }} }}"#)
    }

    #[test]
    fn from_json__fills_documented_defaults() {
        let config = Config::from_json(&minimal_json()).unwrap();

        assert_eq!(config.crypto_network, Network::Ltc);
        assert_eq!(config.tax_percentage, 15.0);
        assert_eq!(config.betting_limits.min, Usd::from_cents(200));
        assert_eq!(config.channel_send_gap_ms, 2_500);
        assert_eq!(config.game_settings.wins_to_complete, 5);
        assert!(config.game_settings.bot_wins_ties);
        assert_eq!(config.payment_safety.price_safety.max_deviation_percentage, 25.0);
        assert!(!config.live_transfers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_json__reads_nested_safety_settings() {
        let raw = format!(
            r#"{{
                "crypto_network": "LTC",
                "payout_addresses": {{ "LTC": "{OWN_LTC}" }},
                "betting_limits": {{ "min": 2, "max": 50 }},
                "payment_safety": {{
                    "max_payment_per_tx": 60.5,
                    "max_daily_usd": 250,
                    "address_allowlist": ["LY7VX5yZgVbEsL3kS9F2a8B4c5D6e7F8g9"],
                    "price_safety": {{
                        "max_deviation_percentage": 10,
                        "hard_min_price": {{ "LTC": 20 }},
                        "hard_max_price": {{ "LTC": 500 }}
                    }}
                }},
                "auto_advertise": {{ "enabled": true }}
            }}"#
        );

        let config = Config::from_json(&raw).unwrap();

        let safety = &config.payment_safety;
        assert_eq!(safety.max_payment_per_tx, Usd::from_cents(6_050));
        assert_eq!(safety.max_daily_usd, Usd::from_cents(25_000));
        assert_eq!(safety.address_allowlist.len(), 1);
        assert_eq!(safety.price_safety.bounds(Network::Ltc), (20.0, 500.0));
        assert_eq!(config.betting_limits.max, Usd::from_cents(5_000));
    }

    #[test]
    fn apply_env__only_exact_true_enables_live_transfers() {
        let mut config = Config::from_json(&minimal_json()).unwrap();

        config.apply_env(|key| (key == LIVE_TRANSFERS_ENV).then(|| "TRUE".to_string()));
        assert!(!config.live_transfers);

        config.apply_env(|key| (key == LIVE_TRANSFERS_ENV).then(|| "true".to_string()));
        assert!(config.live_transfers);
    }

    #[test]
    fn apply_env__payout_address_override_wins() {
        let mut config = Config::from_json(&minimal_json()).unwrap();
        let override_address = "MUaHqPZrK8r4Pj8vvT8d5jvgxHJrWpH7Qz";

        config.apply_env(|key| {
            (key == "LTC_PAYOUT_ADDRESS").then(|| override_address.to_string())
        });

        assert_eq!(config.own_payout_address(), Some(override_address));
    }

    #[test]
    fn validate__rejects_inverted_limits() {
        let mut config = Config::from_json(&minimal_json()).unwrap();
        config.betting_limits = BettingLimits {
            min: Usd::from_cents(5_000),
            max: Usd::from_cents(200),
        };

        assert!(matches!(config.validate(), Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn validate__requires_payout_address_for_network() {
        let config = Config::from_json(r#"{ "crypto_network": "SOL" }"#).unwrap();

        let err = config.validate().unwrap_err();

        assert!(err.to_string().contains("no payout address configured for SOL"));
    }

    #[test]
    fn betting_limits__are_inclusive() {
        let limits = BettingLimits::default();

        assert!(limits.contains(Usd::from_cents(200)));
        assert!(limits.contains(Usd::from_cents(5_000)));
        assert!(!limits.contains(Usd::from_cents(199)));
        assert!(!limits.contains(Usd::from_cents(5_001)));
    }
}
