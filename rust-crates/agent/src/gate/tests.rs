#![allow(non_snake_case)]

use super::*;
use crate::{
    config::PriceSafety,
    test_helpers::ScriptedPrices,
    wallet::{
        SimulatedWallet,
        WalletFailure,
    },
};
use ledger::PaymentState;
use tempdir::TempDir;

const DEST: &str = "LY7VX5yZgVbEsL3kS9F2a8B4c5D6e7F8g9";

type TestGate = PaymentGate<SimulatedWallet, ScriptedPrices, ScriptedPrices>;

fn live_policy() -> GatePolicy {
    GatePolicy {
        simulation: false,
        live_transfers: true,
        address_allowlist: Vec::new(),
        max_payment_per_tx: Usd::from_cents(10_000),
        max_daily_usd: Usd::from_cents(50_000),
    }
}

fn gate_with(
    dir: &TempDir,
    policy: GatePolicy,
    balance: f64,
) -> (TestGate, ScriptedPrices) {
    let primary = ScriptedPrices::new("primary").repeating(100.0);
    let secondary = ScriptedPrices::new("secondary");
    let oracle = PriceOracle::new(primary.clone(), secondary, PriceSafety::default());
    let ledger = IdempotencyLedger::in_dir(dir.path()).unwrap();
    let gate = PaymentGate::new(
        policy,
        SimulatedWallet::new(Network::Ltc, balance),
        oracle,
        ledger,
    );
    (gate, primary)
}

fn usd(cents: u64) -> Usd {
    Usd::from_cents(cents)
}

#[tokio::test]
async fn send_payment__simulation_mode_skips_ledger_and_wallet() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let policy = GatePolicy {
        simulation: true,
        ..live_policy()
    };
    let (mut gate, prices) = gate_with(&dir, policy, 10.0);

    // when
    let outcome = gate
        .send_payment(DEST, usd(1_000), Network::Ltc, "T1")
        .await
        .unwrap();

    // then
    assert!(outcome.simulated);
    assert!(outcome.tx_id.starts_with("sim_tx_"));
    assert_eq!(gate.ledger().records().count(), 0);
    assert!(gate.wallet().sent().is_empty());
    assert_eq!(prices.calls(), 0);
}

#[tokio::test]
async fn send_payment__without_live_flag_is_a_dry_run() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let policy = GatePolicy {
        live_transfers: false,
        ..live_policy()
    };
    let (mut gate, _) = gate_with(&dir, policy, 10.0);

    // when
    let outcome = gate
        .send_payment(DEST, usd(1_000), Network::Ltc, "T1")
        .await
        .unwrap();

    // then
    assert!(outcome.dry_run);
    assert!(outcome.tx_id.starts_with("dryrun_tx_"));
    assert_eq!(gate.ledger().records().count(), 0);
    assert_eq!(gate.daily_spend(), Usd::ZERO);
}

#[tokio::test]
async fn send_payment__second_identical_call_returns_first_tx_as_duplicate() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let (mut gate, _) = gate_with(&dir, live_policy(), 10.0);
    let first = gate
        .send_payment(DEST, usd(1_000), Network::Ltc, "T1")
        .await
        .unwrap();

    // when
    let second = gate
        .send_payment(DEST, usd(1_000), Network::Ltc, "T1")
        .await
        .unwrap();

    // then
    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.tx_id, first.tx_id);
    assert_eq!(gate.wallet().sent().len(), 1);
    let id = ledger::payment_id("T1", DEST, 1_000);
    assert_eq!(gate.ledger().get(&id).unwrap().state, PaymentState::Confirmed);
}

#[tokio::test]
async fn send_payment__converts_at_oracle_price() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let (mut gate, _) = gate_with(&dir, live_policy(), 10.0);

    // when
    gate.send_payment(DEST, usd(1_725), Network::Ltc, "T1")
        .await
        .unwrap();

    // then
    let sent = gate.wallet().sent();
    assert_eq!(sent[0].0, DEST);
    assert!((sent[0].1 - 0.1725).abs() < 1e-12);
}

#[tokio::test]
async fn send_payment__allowlist_rejects_unknown_destination() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let policy = GatePolicy {
        address_allowlist: vec!["MUaHqPZrK8r4Pj8vvT8d5jvgxHJrWpH7Qz".to_string()],
        ..live_policy()
    };
    let (mut gate, _) = gate_with(&dir, policy, 10.0);

    // when
    let result = gate.send_payment(DEST, usd(1_000), Network::Ltc, "T1").await;

    // then
    assert_eq!(result, Err(AgentError::DisallowedAddress(DEST.to_string())));
    assert_eq!(gate.ledger().records().count(), 0);
}

#[tokio::test]
async fn send_payment__per_transaction_cap_is_inclusive() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let (mut gate, _) = gate_with(&dir, live_policy(), 10.0);

    // when
    let over = gate.send_payment(DEST, usd(10_001), Network::Ltc, "T1").await;
    let at_cap = gate.send_payment(DEST, usd(10_000), Network::Ltc, "T2").await;

    // then
    assert!(matches!(over, Err(AgentError::TxLimitExceeded { .. })));
    assert!(at_cap.is_ok());
}

#[tokio::test]
async fn send_payment__daily_cap_accepts_exact_total_and_rejects_one_cent_more() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let policy = GatePolicy {
        max_daily_usd: usd(3_000),
        ..live_policy()
    };
    let (mut gate, _) = gate_with(&dir, policy, 10.0);
    gate.send_payment(DEST, usd(2_000), Network::Ltc, "T1")
        .await
        .unwrap();

    // when
    let over = gate.send_payment(DEST, usd(1_001), Network::Ltc, "T2").await;
    let exact = gate.send_payment(DEST, usd(1_000), Network::Ltc, "T3").await;

    // then
    assert!(matches!(over, Err(AgentError::DailyLimitExceeded { .. })));
    assert!(exact.is_ok());
    assert_eq!(gate.daily_spend(), usd(3_000));
}

#[tokio::test]
async fn send_payment__insufficient_balance_never_writes_ledger() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let (mut gate, _) = gate_with(&dir, live_policy(), 0.05);

    // when
    let result = gate.send_payment(DEST, usd(1_000), Network::Ltc, "T1").await;

    // then
    assert!(matches!(result, Err(AgentError::InsufficientBalance { .. })));
    assert_eq!(gate.ledger().records().count(), 0);
}

#[tokio::test]
async fn send_payment__price_failure_aborts_before_ledger() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let primary = ScriptedPrices::new("primary");
    let secondary = ScriptedPrices::new("secondary");
    let oracle = PriceOracle::new(primary, secondary, PriceSafety::default());
    let mut gate = PaymentGate::new(
        live_policy(),
        SimulatedWallet::new(Network::Ltc, 10.0),
        oracle,
        IdempotencyLedger::in_dir(dir.path()).unwrap(),
    );

    // when
    let result = gate.send_payment(DEST, usd(1_000), Network::Ltc, "T1").await;

    // then
    assert!(matches!(result, Err(AgentError::PriceUnavailable { .. })));
    assert_eq!(gate.ledger().records().count(), 0);
}

#[tokio::test]
async fn send_payment__broadcast_failure_is_recorded_and_retry_succeeds() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let (mut gate, _) = gate_with(&dir, live_policy(), 10.0);
    gate.wallet()
        .fail_next(WalletFailure::Rejected("node refused".into()));

    // when
    let failed = gate.send_payment(DEST, usd(1_000), Network::Ltc, "T1").await;
    let id = ledger::payment_id("T1", DEST, 1_000);
    let state_after_failure = gate.ledger().get(&id).unwrap().state;
    let retried = gate.send_payment(DEST, usd(1_000), Network::Ltc, "T1").await;

    // then
    assert!(matches!(failed, Err(AgentError::BroadcastFailed(_))));
    assert_eq!(state_after_failure, PaymentState::Failed);
    assert!(retried.is_ok());
    assert_eq!(gate.ledger().get(&id).unwrap().state, PaymentState::Confirmed);
}

#[tokio::test]
async fn send_payment__refuses_payment_left_broadcast_by_a_crash() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let id = ledger::payment_id("T1", DEST, 1_000);
    {
        let mut ledger = IdempotencyLedger::in_dir(dir.path()).unwrap();
        ledger.record_intent(&id, DEST, 1_000, "T1").unwrap();
        ledger.record_broadcast(&id, "tx-before-crash").unwrap();
    }
    let (mut gate, _) = gate_with(&dir, live_policy(), 10.0);
    let report = gate.ledger().reconcile();

    // when
    let outcome = gate
        .send_payment(DEST, usd(1_000), Network::Ltc, "T1")
        .await
        .unwrap();

    // then
    assert_eq!(report.broadcast, vec![id]);
    assert!(outcome.duplicate);
    assert_eq!(outcome.tx_id, "tx-before-crash");
    assert!(gate.wallet().sent().is_empty());
}

#[tokio::test]
async fn send_payment__invalid_address_is_rejected_before_pricing() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let (mut gate, prices) = gate_with(&dir, live_policy(), 10.0);

    // when
    let result = gate
        .send_payment("not-an-address", usd(1_000), Network::Ltc, "T1")
        .await;

    // then
    assert!(matches!(result, Err(AgentError::InvalidAddress { .. })));
    assert_eq!(prices.calls(), 0);
}

#[tokio::test]
async fn send_payment__balance_check_failure_still_sends() {
    // given
    let dir = TempDir::new("gate").unwrap();
    let (mut gate, _) = gate_with(&dir, live_policy(), 10.0);
    gate.wallet().fail_balance_next("daemon unreachable");

    // when
    let outcome = gate
        .send_payment(DEST, usd(1_000), Network::Ltc, "T1")
        .await
        .unwrap();

    // then
    assert!(!outcome.tx_id.is_empty());
    assert!(!outcome.dry_run && !outcome.duplicate);
    assert_eq!(gate.wallet().sent().len(), 1);
    let id = ledger::payment_id("T1", DEST, 1_000);
    assert_eq!(gate.ledger().get(&id).unwrap().state, PaymentState::Confirmed);
}
