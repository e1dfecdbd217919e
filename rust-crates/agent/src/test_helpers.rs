use crate::{
    AgentError,
    Result,
    chat::{
        Author,
        Channel,
        ChannelKind,
        ChatEvent,
        ChatSink,
        OutboundMessage,
    },
    config::Config,
    gate::{
        GatePolicy,
        PaymentGate,
    },
    handler::Desk,
    money::Network,
    oracle::{
        PriceOracle,
        PriceProvider,
    },
    wallet::SimulatedWallet,
};
use ledger::IdempotencyLedger;
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use tempdir::TempDir;
use tokio::time::Instant;

pub const BOT: &str = "900";
pub const OPPONENT: &str = "111";
pub const MIDDLEMAN: &str = "555";
pub const DICE_BOT: &str = "777";
pub const OWNER: &str = "42";
pub const PUBLIC_CHANNEL: &str = "public";
pub const VOUCH_CHANNEL: &str = "vouches";
pub const OWN_ADDRESS: &str = "LQ3B5Y4bEWkfMHnFvi6VCfhMHTVVcMZQ7S";
pub const MM_ADDRESS: &str = "LY7VX5yZgVbEsL3kS9F2a8B4c5D6e7F8g9";
/// USD per LTC quoted by the scripted oracle.
pub const LTC_PRICE: f64 = 100.0;

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<std::result::Result<f64, String>>,
    repeat: Option<f64>,
    calls: usize,
}

/// Price provider answering from a queue of scripted results.
#[derive(Clone, Debug)]
pub struct ScriptedPrices {
    name: &'static str,
    delay: Option<Duration>,
    script: Arc<Mutex<Script>>,
}

impl ScriptedPrices {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            delay: None,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer `price` whenever the queue is empty.
    pub fn repeating(self, price: f64) -> Self {
        self.script.lock().unwrap().repeat = Some(price);
        self
    }

    pub fn push(&self, result: std::result::Result<f64, String>) {
        self.script.lock().unwrap().queue.push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().calls
    }
}

impl PriceProvider for ScriptedPrices {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_usd(&self, network: Network) -> Result<f64> {
        let next = {
            let mut script = self.script.lock().unwrap();
            script.calls += 1;
            script
                .queue
                .pop_front()
                .or(script.repeat.map(Ok))
                .unwrap_or_else(|| Err("nothing scripted".to_string()))
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        next.map_err(|reason| AgentError::PriceUnavailable { network, reason })
    }
}

/// Chat sink that keeps everything it was asked to send.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<(Instant, OutboundMessage)>>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn sent_with_times(&self) -> Vec<(Instant, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

impl ChatSink for RecordingSink {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.sent.lock().unwrap().push((Instant::now(), message));
        Ok(())
    }
}

/// Valid LTC configuration with one of every role.
pub fn test_config() -> Config {
    let mut config = Config {
        middleman_ids: vec![MIDDLEMAN.to_string()],
        dice_bot_ids: vec![DICE_BOT.to_string()],
        owner_ids: vec![OWNER.to_string()],
        monitored_channels: vec![PUBLIC_CHANNEL.to_string()],
        payout_addresses: HashMap::from([(Network::Ltc, OWN_ADDRESS.to_string())]),
        live_transfers: true,
        ..Config::default()
    };
    config.channels.vouch_channel_id = Some(VOUCH_CHANNEL.to_string());
    config
}

pub type TestTreasury = PaymentGate<SimulatedWallet, ScriptedPrices, ScriptedPrices>;

pub struct Fixture {
    pub desk: Desk<TestTreasury>,
    pub prices: ScriptedPrices,
}

/// Desk over a simulated 10 LTC wallet and a ledger in a fresh temporary
/// directory that outlives the fixture.
pub fn fixture(config: Config) -> Fixture {
    let dir = TempDir::new("desk").unwrap().into_path();
    let prices = ScriptedPrices::new("primary").repeating(LTC_PRICE);
    let oracle = PriceOracle::new(
        prices.clone(),
        ScriptedPrices::new("secondary"),
        config.payment_safety.price_safety.clone(),
    );
    let gate = PaymentGate::new(
        GatePolicy::from_config(&config),
        SimulatedWallet::new(config.crypto_network, 10.0),
        oracle,
        IdempotencyLedger::in_dir(&dir).unwrap(),
    );
    Fixture {
        desk: Desk::new(config, BOT, gate),
        prices,
    }
}

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> String {
    format!("m{}", NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
}

pub fn guild_message(
    channel_id: &str,
    channel_name: &str,
    author_id: &str,
    content: &str,
) -> ChatEvent {
    ChatEvent {
        id: next_id(),
        channel: Channel {
            id: channel_id.to_string(),
            name: channel_name.to_string(),
            kind: ChannelKind::Guild,
        },
        author: Author {
            id: author_id.to_string(),
            name: format!("user{author_id}"),
            bot: author_id == DICE_BOT || author_id == BOT,
        },
        content: content.to_string(),
        mentions: Vec::new(),
    }
}

pub fn direct_message(author_id: &str, content: &str) -> ChatEvent {
    ChatEvent {
        channel: Channel {
            id: format!("dm-{author_id}"),
            name: String::new(),
            kind: ChannelKind::Direct,
        },
        ..guild_message("", "", author_id, content)
    }
}
