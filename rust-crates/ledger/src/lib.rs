//! Durable registry of outgoing payments keyed by an idempotency id.
//!
//! Every mutation rewrites the whole ledger through a sibling `.tmp` file that is
//! renamed over the canonical file, so readers only ever see a complete document.

use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::{
    Local,
    NaiveDate,
    TimeZone,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    collections::BTreeMap,
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const LEDGER_FILE: &str = "idempotency.json";

/// Length of the hex prefix of the SHA-256 digest used as a payment id.
const PAYMENT_ID_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    Broadcast,
    Confirmed,
    Failed,
}

impl PaymentState {
    pub fn can_become(self, next: PaymentState) -> bool {
        matches!(
            (self, next),
            (PaymentState::Pending, PaymentState::Broadcast)
                | (PaymentState::Pending, PaymentState::Failed)
                | (PaymentState::Broadcast, PaymentState::Confirmed)
                | (PaymentState::Broadcast, PaymentState::Failed)
        )
    }

    /// Funds may have left the wallet.
    pub fn is_sent(self) -> bool {
        matches!(self, PaymentState::Broadcast | PaymentState::Confirmed)
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentState::Pending => "PENDING",
            PaymentState::Broadcast => "BROADCAST",
            PaymentState::Confirmed => "CONFIRMED",
            PaymentState::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub payment_id: String,
    pub to_address: String,
    #[serde(rename = "amount", with = "usd_cents")]
    pub amount_cents: u64,
    pub ticket_id: String,
    pub state: PaymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Answer to "may this payment be broadcast?".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendDecision {
    Allowed {
        reason: &'static str,
    },
    Blocked {
        reason: String,
        existing_tx_id: Option<String>,
    },
}

impl SendDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SendDecision::Allowed { .. })
    }
}

/// Outcome of the startup scan over unfinished payments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub pending: Vec<String>,
    pub broadcast: Vec<String>,
}

/// Derive the idempotency id for a payment of `amount_cents` to `address` for
/// `ticket_id`.
pub fn payment_id(ticket_id: &str, address: &str, amount_cents: u64) -> String {
    let preimage = format!("{ticket_id}:{address}:{}", usd_cents::display(amount_cents));
    let digest = Sha256::digest(preimage.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(PAYMENT_ID_LEN);
    id
}

#[derive(Debug)]
pub struct IdempotencyLedger {
    path: PathBuf,
    records: BTreeMap<String, PaymentRecord>,
}

impl IdempotencyLedger {
    /// Open the ledger stored at `path`, starting empty when the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = read_records(&path)?;
        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "loaded idempotency ledger"
        );
        Ok(Self { path, records })
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| {
            format!("Failed to create ledger directory {}", dir.display())
        })?;
        Self::open(dir.join(LEDGER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, payment_id: &str) -> Option<&PaymentRecord> {
        self.records.get(payment_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &PaymentRecord> {
        self.records.values()
    }

    pub fn can_send(&self, payment_id: &str) -> SendDecision {
        match self.records.get(payment_id) {
            None => SendDecision::Allowed {
                reason: "no prior payment",
            },
            Some(record) if record.state.is_sent() => SendDecision::Blocked {
                reason: format!("payment already {}", record.state),
                existing_tx_id: record.tx_id.clone(),
            },
            Some(record) if record.state == PaymentState::Failed => {
                SendDecision::Allowed {
                    reason: "previous attempt failed",
                }
            }
            Some(_) => SendDecision::Allowed {
                reason: "previous attempt never broadcast",
            },
        }
    }

    /// Record the intent to pay before anything touches the wallet.
    ///
    /// Returns `false` when a payment with this id may already have been sent. A
    /// PENDING or FAILED record is replaced by a fresh PENDING one.
    pub fn record_intent(
        &mut self,
        payment_id: &str,
        to_address: &str,
        amount_cents: u64,
        ticket_id: &str,
    ) -> Result<bool> {
        if let Some(existing) = self.records.get(payment_id) {
            if existing.state.is_sent() {
                tracing::warn!(
                    payment_id,
                    state = %existing.state,
                    "refusing intent for payment that may already be sent"
                );
                return Ok(false);
            }
            tracing::info!(
                payment_id,
                state = %existing.state,
                "re-arming unfinished payment"
            );
        }
        let now = now_ms();
        let record = PaymentRecord {
            payment_id: payment_id.to_string(),
            to_address: to_address.to_string(),
            amount_cents,
            ticket_id: ticket_id.to_string(),
            state: PaymentState::Pending,
            tx_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let previous = self.records.insert(payment_id.to_string(), record);
        if let Err(err) = self.flush() {
            match previous {
                Some(previous) => self.records.insert(payment_id.to_string(), previous),
                None => self.records.remove(payment_id),
            };
            return Err(err);
        }
        Ok(true)
    }

    pub fn record_broadcast(&mut self, payment_id: &str, tx_id: &str) -> Result<bool> {
        self.advance(payment_id, PaymentState::Broadcast, |record| {
            record.tx_id = Some(tx_id.to_string());
        })
    }

    pub fn record_confirmed(&mut self, payment_id: &str) -> Result<bool> {
        self.advance(payment_id, PaymentState::Confirmed, |_| {})
    }

    pub fn record_failed(&mut self, payment_id: &str, error: &str) -> Result<bool> {
        self.advance(payment_id, PaymentState::Failed, |record| {
            record.error = Some(error.to_string());
            record.tx_id = None;
        })
    }

    /// Sum of sent payments created on the current local date, in cents.
    pub fn daily_spend_cents(&self) -> u64 {
        self.daily_spend_cents_on(Local::now().date_naive())
    }

    pub fn daily_spend_cents_on(&self, date: NaiveDate) -> u64 {
        self.records
            .values()
            .filter(|record| record.state.is_sent())
            .filter(|record| local_date(record.created_at) == Some(date))
            .map(|record| record.amount_cents)
            .sum()
    }

    /// Count unfinished payments left over from a previous run.
    pub fn reconcile(&self) -> Reconciliation {
        let mut report = Reconciliation::default();
        for record in self.records.values() {
            match record.state {
                PaymentState::Pending => report.pending.push(record.payment_id.clone()),
                PaymentState::Broadcast => {
                    report.broadcast.push(record.payment_id.clone())
                }
                PaymentState::Confirmed | PaymentState::Failed => {}
            }
        }
        tracing::info!(
            pending = report.pending.len(),
            "payments left PENDING are safe to retry"
        );
        if report.broadcast.is_empty() {
            tracing::info!(broadcast = 0, "no payments awaiting confirmation");
        } else {
            for id in &report.broadcast {
                tracing::warn!(
                    payment_id = %id,
                    "payment left in BROADCAST; operator review required, retries are blocked"
                );
            }
        }
        report
    }

    fn advance(
        &mut self,
        payment_id: &str,
        next: PaymentState,
        update: impl FnOnce(&mut PaymentRecord),
    ) -> Result<bool> {
        let record = self
            .records
            .get_mut(payment_id)
            .ok_or_else(|| anyhow!("Unknown payment {payment_id}"))?;
        if !record.state.can_become(next) {
            tracing::warn!(
                payment_id,
                from = %record.state,
                to = %next,
                "refused payment state transition"
            );
            return Ok(false);
        }
        let previous = record.clone();
        record.state = next;
        record.updated_at = now_ms();
        update(record);
        if let Err(err) = self.flush() {
            self.records.insert(payment_id.to_string(), previous);
            return Err(err);
        }
        Ok(true)
    }

    fn flush(&self) -> Result<()> {
        write_records(&self.path, &self.records)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn local_date(epoch_ms: i64) -> Option<NaiveDate> {
    Local
        .timestamp_millis_opt(epoch_ms)
        .single()
        .map(|at| at.date_naive())
}

fn read_records(path: &Path) -> Result<BTreeMap<String, PaymentRecord>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = fs::read(path)
        .with_context(|| format!("Failed to read ledger {}", path.display()))?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse ledger {}", path.display()))
}

fn write_records(path: &Path, records: &BTreeMap<String, PaymentRecord>) -> Result<()> {
    let json =
        serde_json::to_vec_pretty(records).context("Failed to serialize ledger")?;
    let tmp_path = temporary_path(path);
    fs::write(&tmp_path, json).with_context(|| {
        format!("Failed to write temporary ledger {}", tmp_path.display())
    })?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to commit ledger {}", path.display()))?;
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Dollar amounts are stored as decimal numbers but handled as whole cents.
pub mod usd_cents {
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
        de::Error,
    };

    pub fn to_dollars(cents: u64) -> f64 {
        cents as f64 / 100.0
    }

    pub fn from_dollars(dollars: f64) -> Option<u64> {
        if !dollars.is_finite() || dollars < 0.0 {
            return None;
        }
        Some((dollars * 100.0).round() as u64)
    }

    /// Shortest decimal rendering: `10`, `17.25`, `0.5`.
    pub fn display(cents: u64) -> String {
        format!("{}", to_dollars(cents))
    }

    pub fn serialize<S: Serializer>(cents: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(to_dollars(*cents))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let dollars = f64::deserialize(deserializer)?;
        from_dollars(dollars)
            .ok_or_else(|| D::Error::custom(format!("invalid dollar amount {dollars}")))
    }
}
