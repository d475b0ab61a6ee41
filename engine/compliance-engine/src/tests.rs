//! Scenario tests for the state machine against the simulated ledger

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use emission_store::{
    ComplianceStatus, EmissionSample, EmissionStore, EntityId, InMemoryStore, MonitoredEntity,
    TimerStatus, TransactionType,
};
use ledger_gateway::{
    CreditAmount, GatewayConfig, LedgerClient, LedgerGateway, SimulatedLedger, TransactionReceipt,
    TxHash,
};
use rust_decimal::Decimal;

use crate::{
    verify, ComplianceError, ComplianceStateMachine, CycleOutcome, EngineConfig, FlaggedPolicy,
    NoOpReason, TimerOutcome,
};

const ENTITY: EntityId = EntityId(1);
const ACCOUNT: &str = "0x00000000000000000000000000000000000000e1";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap()
}

fn credits(n: i64) -> Decimal {
    Decimal::from(n)
}

fn fast_gateway() -> GatewayConfig {
    GatewayConfig { confirmation_timeout_ms: 500, confirmation_poll_ms: 5, required_confirmations: 1 }
}

struct Harness {
    store: Arc<InMemoryStore>,
    ledger: Arc<SimulatedLedger>,
    machine: Arc<ComplianceStateMachine>,
}

impl Harness {
    fn new() -> Self {
        Self::with(EngineConfig::default(), fast_gateway())
    }

    fn with(config: EngineConfig, gateway_config: GatewayConfig) -> Self {
        let ledger = Arc::new(SimulatedLedger::new());
        Self::over_client(ledger.clone(), ledger, config, gateway_config)
    }

    fn over_client(
        ledger: Arc<SimulatedLedger>,
        client: Arc<dyn LedgerClient>,
        config: EngineConfig,
        gateway_config: GatewayConfig,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(LedgerGateway::new(client, gateway_config));
        let machine = Arc::new(ComplianceStateMachine::new(store.clone(), gateway, config));
        Self { store, ledger, machine }
    }

    /// Entity with a cap, an opening balance and samples spread inside the window
    fn seed(&self, cap: Option<i64>, balance: u64, emissions: &[i64]) {
        let mut entity = MonitoredEntity::new(ENTITY, ACCOUNT);
        entity.emission_cap_per_window = cap.map(credits);
        self.store.upsert_entity(entity);
        self.ledger.seed_account(ACCOUNT, CreditAmount::from_credits(balance));
        for (i, value) in emissions.iter().enumerate() {
            let at = now() - Duration::seconds(10 * (i as i64 + 1));
            self.store.push_sample(EmissionSample::new(ENTITY, credits(*value), at));
        }
    }

    fn ledger_balance(&self) -> Decimal {
        self.ledger.balance(ACCOUNT).to_decimal().unwrap()
    }

    fn status(&self) -> ComplianceStatus {
        self.store.entity(ENTITY).unwrap().compliance_status
    }

    async fn records(&self, kind: TransactionType) -> usize {
        self.store
            .audit_records(ENTITY)
            .await
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }
}

#[tokio::test]
async fn test_scenario_a_under_cap_mints_difference() {
    let h = Harness::new();
    h.seed(Some(100), 5, &[30, 50]);

    let outcome = h.machine.run_cycle(ENTITY, now()).await.unwrap();

    match outcome {
        CycleOutcome::Minted { result, mint, record, resolved_timer } => {
            assert_eq!(result.credits_to_mint(), credits(20));
            assert_eq!(mint.balance_after, Some(credits(25)));
            assert_eq!(record.kind, TransactionType::Mint);
            assert_eq!(record.amount, credits(20));
            assert!(verify(&record));
            assert!(resolved_timer.is_none());
        }
        other => panic!("expected mint, got {other:?}"),
    }
    assert_eq!(h.ledger_balance(), credits(25));
    assert_eq!(h.status(), ComplianceStatus::Compliant);
    assert_eq!(h.store.entity(ENTITY).unwrap().cached_balance, credits(25));
}

#[tokio::test]
async fn test_confirmed_mint_recorded_when_balance_read_fails() {
    let h = Harness::new();
    h.seed(Some(100), 5, &[30, 50]);
    h.ledger.fail_next_balance_reads(1);

    let outcome = h.machine.run_cycle(ENTITY, now()).await.unwrap();

    match outcome {
        CycleOutcome::Minted { mint, record, .. } => {
            assert_eq!(mint.balance_after, None);
            assert_eq!(record.kind, TransactionType::Mint);
            assert_eq!(record.amount, credits(20));
            assert_eq!(record.ledger_tx_ref.as_deref(), Some(mint.tx_ref.as_str()));
            assert_eq!(record.balance_after, None);
            assert!(verify(&record));
        }
        other => panic!("expected mint, got {other:?}"),
    }
    assert_eq!(h.ledger_balance(), credits(25));
    assert_eq!(h.ledger.mutations_submitted(), 1);
    assert_eq!(h.records(TransactionType::Mint).await, 1);
    assert_eq!(h.status(), ComplianceStatus::Compliant);
}

#[tokio::test]
async fn test_scenario_b_over_cap_with_balance_deducts() {
    let h = Harness::new();
    h.seed(Some(100), 500, &[60, 60]);

    let outcome = h.machine.run_cycle(ENTITY, now()).await.unwrap();

    match outcome {
        CycleOutcome::Deducted { deduct, record, .. } => {
            assert!(deduct.is_settled());
            assert_eq!(record.kind, TransactionType::Deduct);
            assert_eq!(record.amount, credits(20));
            assert_eq!(record.balance_after, Some(credits(500) - credits(20)));
            assert!(record.settled);
        }
        other => panic!("expected deduction, got {other:?}"),
    }
    assert_eq!(h.ledger_balance(), credits(480));
    assert_eq!(h.status(), ComplianceStatus::OverCapSettled);
}

#[tokio::test]
async fn test_scenario_c_shortfall_flags_exactly_once() {
    let h = Harness::new();
    h.seed(Some(100), 10, &[120]);

    let outcome = h.machine.run_cycle(ENTITY, now()).await.unwrap();
    let timer = match outcome {
        CycleOutcome::Shortfall { timer: TimerOutcome::Started(timer), balance, deduct_record, .. } => {
            assert_eq!(balance, credits(10));
            assert!(deduct_record.is_none());
            timer
        }
        other => panic!("expected new shortfall timer, got {other:?}"),
    };
    assert_eq!(timer.required_amount, credits(20));
    assert_eq!(timer.expires_at, timer.started_at + Duration::minutes(2));
    assert_eq!(h.status(), ComplianceStatus::OverCapShortfall);
    assert_eq!(h.ledger.mutations_submitted(), 0);

    // at the deadline the timer is still running
    let report = h.machine.sweep_timers(timer.expires_at).await.unwrap();
    assert_eq!(report.count("pending"), 1);

    let after = timer.expires_at + Duration::seconds(1);
    let (first, second) = tokio::join!(h.machine.sweep_timers(after), h.machine.sweep_timers(after));
    let expired = first.unwrap().expired().count() + second.unwrap().expired().count();
    assert_eq!(expired, 1);

    let report = h.machine.sweep_timers(after + Duration::seconds(5)).await.unwrap();
    assert!(report.outcomes.is_empty());

    assert_eq!(h.status(), ComplianceStatus::Flagged);
    assert_eq!(h.records(TransactionType::Flag).await, 1);
    let timers = h.store.timers_for(ENTITY);
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].status, TimerStatus::Expired);
}

#[tokio::test]
async fn test_scenario_d_missing_cap_is_silent() {
    let h = Harness::new();
    h.seed(None, 50, &[120]);

    let outcome = h.machine.run_cycle(ENTITY, now()).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Skipped { entity_id: ENTITY, reason: NoOpReason::MissingCap });
    assert_eq!(h.ledger.mutations_submitted(), 0);
    assert_eq!(h.store.audit_len(), 0);
}

#[tokio::test]
async fn test_no_samples_is_silent() {
    let h = Harness::new();
    h.seed(Some(100), 50, &[]);

    let outcome = h.machine.run_cycle(ENTITY, now()).await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Skipped { reason: NoOpReason::NoSamples, .. }));
    assert_eq!(h.store.audit_len(), 0);
}

#[tokio::test]
async fn test_exactly_at_cap_touches_nothing() {
    let h = Harness::new();
    h.seed(Some(100), 50, &[100]);

    let outcome = h.machine.run_cycle(ENTITY, now()).await.unwrap();

    assert!(matches!(outcome, CycleOutcome::AtCap { .. }));
    assert_eq!(h.ledger.mutations_submitted(), 0);
    assert_eq!(h.store.audit_len(), 0);
    assert_eq!(h.status(), ComplianceStatus::Compliant);
}

#[tokio::test]
async fn test_shortfall_timer_is_not_restarted() {
    let h = Harness::new();
    h.seed(Some(100), 10, &[120]);

    let first = h.machine.run_cycle(ENTITY, now()).await.unwrap();
    let second = h.machine.run_cycle(ENTITY, now() + Duration::seconds(30)).await.unwrap();

    let started = match first {
        CycleOutcome::Shortfall { timer: TimerOutcome::Started(t), .. } => t,
        other => panic!("expected started timer, got {other:?}"),
    };
    match second {
        CycleOutcome::Shortfall { timer: TimerOutcome::AlreadyActive(t), .. } => {
            assert_eq!(t.id, started.id);
            assert_eq!(t.expires_at, started.expires_at);
        }
        other => panic!("expected existing timer, got {other:?}"),
    }
    assert_eq!(h.store.timers_for(ENTITY).len(), 1);
}

#[tokio::test]
async fn test_sweep_resolves_when_balance_topped_up() {
    let h = Harness::new();
    h.seed(Some(100), 10, &[120]);
    h.machine.run_cycle(ENTITY, now()).await.unwrap();

    h.ledger.credit(ACCOUNT, CreditAmount::from_credits(15));
    let report = h.machine.sweep_timers(now() + Duration::minutes(3)).await.unwrap();

    assert_eq!(report.count("resolved"), 1);
    assert_eq!(h.records(TransactionType::Flag).await, 0);
    assert!(h.store.active_timer(ENTITY).await.unwrap().is_none());
    assert_eq!(h.store.entity(ENTITY).unwrap().cached_balance, credits(25));
}

#[tokio::test]
async fn test_settled_deduction_resolves_active_timer() {
    let h = Harness::new();
    h.seed(Some(100), 10, &[120]);
    h.machine.run_cycle(ENTITY, now()).await.unwrap();

    h.ledger.credit(ACCOUNT, CreditAmount::from_credits(100));
    let outcome = h.machine.run_cycle(ENTITY, now() + Duration::seconds(5)).await.unwrap();

    match outcome {
        CycleOutcome::Deducted { resolved_timer: Some(timer), .. } => {
            assert_eq!(timer.status, TimerStatus::Resolved);
        }
        other => panic!("expected deduction resolving the timer, got {other:?}"),
    }
    assert_eq!(h.ledger_balance(), credits(90));
    assert_eq!(h.status(), ComplianceStatus::OverCapSettled);
}

#[tokio::test]
async fn test_flagged_entity_frozen_until_cleared() {
    let h = Harness::new();
    h.seed(Some(100), 10, &[120]);
    h.machine.run_cycle(ENTITY, now()).await.unwrap();
    h.machine.sweep_timers(now() + Duration::minutes(3)).await.unwrap();
    assert_eq!(h.status(), ComplianceStatus::Flagged);

    let frozen = h.machine.run_cycle(ENTITY, now() + Duration::seconds(10)).await.unwrap();
    assert_eq!(frozen, CycleOutcome::Frozen { entity_id: ENTITY });

    assert!(h.machine.clear_flag(ENTITY).await.unwrap());
    assert!(!h.machine.clear_flag(ENTITY).await.unwrap());
    assert_eq!(h.status(), ComplianceStatus::Compliant);

    let resumed = h.machine.run_cycle(ENTITY, now() + Duration::seconds(10)).await.unwrap();
    assert!(matches!(resumed, CycleOutcome::Shortfall { timer: TimerOutcome::Started(_), .. }));
}

#[tokio::test]
async fn test_reevaluate_policy_keeps_flagged_entity_in_play() {
    let h = Harness::with(
        EngineConfig { flagged_policy: FlaggedPolicy::Reevaluate, ..Default::default() },
        fast_gateway(),
    );
    h.seed(Some(100), 10, &[120]);
    h.machine.run_cycle(ENTITY, now()).await.unwrap();
    h.machine.sweep_timers(now() + Duration::minutes(3)).await.unwrap();

    h.ledger.credit(ACCOUNT, CreditAmount::from_credits(100));
    let outcome = h.machine.run_cycle(ENTITY, now() + Duration::seconds(10)).await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Deducted { .. }));
    assert_eq!(h.status(), ComplianceStatus::OverCapSettled);
}

#[tokio::test]
async fn test_transient_failure_aborts_only_this_cycle() {
    let h = Harness::new();
    h.seed(Some(100), 5, &[80]);

    h.ledger.fail_next_calls(1);
    let err = h.machine.run_cycle(ENTITY, now()).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.store.audit_len(), 0);
    assert!(!h.machine.in_flight().is_in_flight(ENTITY));

    let retried = h.machine.run_cycle(ENTITY, now() + Duration::minutes(1)).await.unwrap();
    assert!(matches!(retried, CycleOutcome::Minted { .. }));
}

#[tokio::test]
async fn test_unknown_entity_is_missing_configuration() {
    let h = Harness::new();

    let err = h.machine.run_cycle(EntityId(99), now()).await.unwrap_err();

    assert!(matches!(err, ComplianceError::MissingConfiguration { .. }));
}

#[tokio::test]
async fn test_register_entity_is_idempotent() {
    let h = Harness::new();
    h.store.upsert_entity(MonitoredEntity::new(EntityId(2), "0xfeed"));

    h.machine.register_entity(EntityId(2)).await.unwrap();
    h.machine.register_entity(EntityId(2)).await.unwrap();

    assert!(h.ledger.is_registered("0xfeed"));
    assert!(h.machine.register_entity(EntityId(3)).await.is_err());
}

#[tokio::test]
async fn test_delayed_confirmation_blocks_overlapping_cycle() {
    let h = Harness::with(
        EngineConfig::default(),
        GatewayConfig { confirmation_timeout_ms: 10_000, confirmation_poll_ms: 5, required_confirmations: 1 },
    );
    h.seed(Some(100), 0, &[80]);
    h.ledger.hold_confirmations();

    let machine = h.machine.clone();
    let first = tokio::spawn(async move { machine.run_cycle(ENTITY, now()).await });

    while h.ledger.mutations_submitted() == 0 {
        tokio::time::sleep(StdDuration::from_millis(1)).await;
    }

    let overlapping = h.machine.run_cycle(ENTITY, now() + Duration::minutes(5)).await.unwrap();
    assert_eq!(overlapping, CycleOutcome::Busy { entity_id: ENTITY });

    let sweep = h.machine.sweep_timers(now() + Duration::minutes(5)).await.unwrap();
    assert!(sweep.outcomes.is_empty());
    assert_eq!(h.ledger.mutations_submitted(), 1);

    h.ledger.release_confirmations();
    let finished = first.await.unwrap().unwrap();
    assert!(matches!(finished, CycleOutcome::Minted { .. }));
    assert_eq!(h.store.audit_len(), 1);
}

/// Reports a generous balance so the deduction reaches the ledger and comes back uncovered
struct StaleBalanceLedger {
    inner: Arc<SimulatedLedger>,
}

#[async_trait::async_trait]
impl LedgerClient for StaleBalanceLedger {
    async fn register_entity(&self, account: &str) -> ledger_gateway::Result<TxHash> {
        self.inner.register_entity(account).await
    }

    async fn mint(
        &self,
        account: &str,
        amount: CreditAmount,
        emission_value: CreditAmount,
        emission_cap: CreditAmount,
    ) -> ledger_gateway::Result<TxHash> {
        self.inner.mint(account, amount, emission_value, emission_cap).await
    }

    async fn deduct(
        &self,
        account: &str,
        amount: CreditAmount,
        emission_value: CreditAmount,
        emission_cap: CreditAmount,
    ) -> ledger_gateway::Result<TxHash> {
        self.inner.deduct(account, amount, emission_value, emission_cap).await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> ledger_gateway::Result<Option<TransactionReceipt>> {
        self.inner.transaction_receipt(tx_hash).await
    }

    async fn balance_of(&self, _account: &str) -> ledger_gateway::Result<CreditAmount> {
        Ok(CreditAmount::from_credits(1_000))
    }
}

#[tokio::test]
async fn test_uncovered_deduction_records_and_opens_timer() {
    let ledger = Arc::new(SimulatedLedger::new());
    let client = Arc::new(StaleBalanceLedger { inner: ledger.clone() });
    let h = Harness::over_client(ledger, client, EngineConfig::default(), fast_gateway());
    h.seed(Some(100), 10, &[120]);

    let outcome = h.machine.run_cycle(ENTITY, now()).await.unwrap();

    match outcome {
        CycleOutcome::Shortfall { deduct_record: Some(record), timer: TimerOutcome::Started(_), .. } => {
            assert_eq!(record.kind, TransactionType::Deduct);
            assert!(!record.settled);
            assert!(record.ledger_tx_ref.is_some());
        }
        other => panic!("expected uncovered deduction, got {other:?}"),
    }
    assert_eq!(h.ledger.balance(ACCOUNT), CreditAmount::from_credits(10));
    assert_eq!(h.status(), ComplianceStatus::OverCapShortfall);
}

/// Delays every balance read by a configurable amount
struct SlowBalanceLedger {
    inner: Arc<SimulatedLedger>,
    delay_ms: AtomicU64,
}

#[async_trait::async_trait]
impl LedgerClient for SlowBalanceLedger {
    async fn register_entity(&self, account: &str) -> ledger_gateway::Result<TxHash> {
        self.inner.register_entity(account).await
    }

    async fn mint(
        &self,
        account: &str,
        amount: CreditAmount,
        emission_value: CreditAmount,
        emission_cap: CreditAmount,
    ) -> ledger_gateway::Result<TxHash> {
        self.inner.mint(account, amount, emission_value, emission_cap).await
    }

    async fn deduct(
        &self,
        account: &str,
        amount: CreditAmount,
        emission_value: CreditAmount,
        emission_cap: CreditAmount,
    ) -> ledger_gateway::Result<TxHash> {
        self.inner.deduct(account, amount, emission_value, emission_cap).await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> ledger_gateway::Result<Option<TransactionReceipt>> {
        self.inner.transaction_receipt(tx_hash).await
    }

    async fn balance_of(&self, account: &str) -> ledger_gateway::Result<CreditAmount> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(StdDuration::from_millis(delay)).await;
        }
        self.inner.balance_of(account).await
    }
}

#[tokio::test]
async fn test_cycle_waits_for_running_sweep_instead_of_skipping() {
    let ledger = Arc::new(SimulatedLedger::new());
    let client = Arc::new(SlowBalanceLedger { inner: ledger.clone(), delay_ms: AtomicU64::new(0) });
    let h = Harness::over_client(ledger, client.clone(), EngineConfig::default(), fast_gateway());
    h.seed(Some(100), 0, &[130]);

    let first = h.machine.run_cycle(ENTITY, now()).await.unwrap();
    assert!(matches!(first, CycleOutcome::Shortfall { timer: TimerOutcome::Started(_), .. }));

    // next window is well under the cap
    let next_tick = now() + Duration::minutes(5);
    h.store.push_sample(EmissionSample::new(ENTITY, credits(50), next_tick - Duration::seconds(50)));
    client.delay_ms.store(200, Ordering::SeqCst);

    let machine = h.machine.clone();
    let sweep =
        tokio::spawn(async move { machine.sweep_timers(now() + Duration::minutes(1)).await });
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert!(h.machine.in_flight().is_in_flight(ENTITY));

    let outcome = h.machine.run_cycle(ENTITY, next_tick).await.unwrap();

    match outcome {
        CycleOutcome::Minted { result, .. } => assert_eq!(result.credits_to_mint(), credits(50)),
        other => panic!("expected the cycle to run after the sweep, got {other:?}"),
    }
    let report = sweep.await.unwrap().unwrap();
    assert_eq!(report.count("pending"), 1);
    assert_eq!(h.ledger_balance(), credits(50));
    assert_eq!(h.records(TransactionType::Mint).await, 1);
    assert!(h.store.active_timer(ENTITY).await.unwrap().is_none());
}
