//! Per-entity compliance state machine and BuyTimer sweep

use std::sync::Arc;

use chrono::{DateTime, Utc};
use emission_store::{
    BuyTimer, ComplianceStatus, EmissionStore, EntityId, MonitoredEntity, TimerOpen, TimerStatus,
};
use ledger_gateway::{DeductOutcome, LedgerGateway, RegistrationOutcome};
use rust_decimal::Decimal;

use crate::audit::AuditRecorder;
use crate::config::{EngineConfig, FlaggedPolicy};
use crate::error::{ComplianceError, Result};
use crate::evaluator::{ComplianceEvaluator, ComplianceWindowResult, Evaluation};
use crate::guard::InFlightRegistry;
use crate::outcome::{CycleOutcome, SweepReport, TimerOutcome};

/// Drives each entity between COMPLIANT, OVER_CAP_SETTLED,
/// OVER_CAP_SHORTFALL and FLAGGED.
///
/// A cycle makes at most one state-changing ledger call and awaits it before
/// writing the audit record. Cycles and sweep steps for the same entity never
/// overlap: both go through the shared [`InFlightRegistry`]. A cycle waits for
/// a running sweep step and is only skipped while an earlier cycle runs.
pub struct ComplianceStateMachine {
    store: Arc<dyn EmissionStore>,
    gateway: Arc<LedgerGateway>,
    evaluator: ComplianceEvaluator,
    recorder: AuditRecorder,
    in_flight: Arc<InFlightRegistry>,
    config: EngineConfig,
}

impl ComplianceStateMachine {
    pub fn new(
        store: Arc<dyn EmissionStore>,
        gateway: Arc<LedgerGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            evaluator: ComplianceEvaluator::new(store.clone(), config.clone()),
            recorder: AuditRecorder::new(store.clone()),
            in_flight: Arc::new(InFlightRegistry::new()),
            store,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn in_flight(&self) -> &Arc<InFlightRegistry> {
        &self.in_flight
    }

    pub fn store(&self) -> &Arc<dyn EmissionStore> {
        &self.store
    }

    /// Make sure the entity exists in the store and its account on the ledger
    pub async fn register_entity(&self, entity_id: EntityId) -> Result<MonitoredEntity> {
        let entity = self.load_entity(entity_id).await?;
        match self.gateway.register_entity(&entity.ledger_account).await? {
            RegistrationOutcome::Registered { tx_ref } => {
                tracing::info!(entity_id = %entity_id, tx_ref = %tx_ref, "Entity registered on ledger");
            }
            RegistrationOutcome::AlreadyRegistered => {
                tracing::debug!(entity_id = %entity_id, "Entity already known to ledger");
            }
        }
        Ok(entity)
    }

    /// Run one evaluation cycle for an entity at `now`
    pub async fn run_cycle(&self, entity_id: EntityId, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let Some(_guard) = self.in_flight.acquire_cycle(entity_id).await else {
            return Ok(CycleOutcome::Busy { entity_id });
        };

        let entity = self.load_entity(entity_id).await?;
        if entity.compliance_status == ComplianceStatus::Flagged
            && self.config.flagged_policy == FlaggedPolicy::Frozen
        {
            tracing::debug!(entity_id = %entity_id, "Entity is flagged; skipping cycle");
            return Ok(CycleOutcome::Frozen { entity_id });
        }

        let result = match self.evaluator.evaluate(entity_id, now).await? {
            Evaluation::NoOp { entity_id, reason } => {
                tracing::debug!(entity_id = %entity_id, reason = reason.as_str(), "Nothing to evaluate");
                return Ok(CycleOutcome::Skipped { entity_id, reason });
            }
            Evaluation::Evaluated(result) => result,
        };

        tracing::debug!(
            entity_id = %entity_id,
            total = %result.total_emissions,
            cap = %result.cap,
            compliant = result.is_compliant,
            "Window evaluated"
        );

        if result.is_compliant {
            self.settle_compliant(&entity, result, now).await
        } else {
            self.settle_over_cap(&entity, result, now).await
        }
    }

    async fn settle_compliant(
        &self,
        entity: &MonitoredEntity,
        result: ComplianceWindowResult,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome> {
        let amount = result.credits_to_mint();
        if amount.is_zero() {
            self.transition(entity, ComplianceStatus::Compliant).await?;
            return Ok(CycleOutcome::AtCap { entity_id: entity.id, result });
        }

        let mint = self
            .gateway
            .mint(&entity.ledger_account, amount, result.total_emissions, result.cap)
            .await?;
        let record = self.recorder.record_mint(entity.id, amount, &mint, now).await?;
        let resolved_timer = self.resolve_active_timer(entity.id, now).await?;
        self.transition(entity, ComplianceStatus::Compliant).await?;

        Ok(CycleOutcome::Minted { result, mint, record, resolved_timer })
    }

    async fn settle_over_cap(
        &self,
        entity: &MonitoredEntity,
        result: ComplianceWindowResult,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome> {
        let amount = result.credits_to_deduct();
        let balance = self.gateway.balance_of(&entity.ledger_account).await?;
        self.recorder.mirror_balance(entity.id, balance).await?;

        if balance < amount {
            let timer = self.open_shortfall(entity, amount, now).await?;
            return Ok(CycleOutcome::Shortfall { result, balance, deduct_record: None, timer });
        }

        let deduct = self
            .gateway
            .deduct(&entity.ledger_account, amount, result.total_emissions, result.cap)
            .await?;
        let record = self.recorder.record_deduct(entity.id, amount, &deduct, now).await?;

        match deduct {
            DeductOutcome::Settled { .. } => {
                let resolved_timer = self.resolve_active_timer(entity.id, now).await?;
                self.transition(entity, ComplianceStatus::OverCapSettled).await?;
                Ok(CycleOutcome::Deducted { result, deduct, record, resolved_timer })
            }
            DeductOutcome::InsufficientBalance { balance_after, .. } => {
                tracing::warn!(
                    entity_id = %entity.id,
                    checked_balance = %balance,
                    ?balance_after,
                    "Ledger reported insufficient balance after pre-check"
                );
                let timer = self.open_shortfall(entity, amount, now).await?;
                Ok(CycleOutcome::Shortfall {
                    result,
                    balance: balance_after.unwrap_or(balance),
                    deduct_record: Some(record),
                    timer,
                })
            }
        }
    }

    async fn open_shortfall(
        &self,
        entity: &MonitoredEntity,
        required: Decimal,
        now: DateTime<Utc>,
    ) -> Result<TimerOutcome> {
        let candidate = BuyTimer::new(entity.id, required, now, self.config.grace_period());
        let outcome = match self.store.open_timer(candidate).await? {
            TimerOpen::Created(timer) => {
                tracing::warn!(
                    entity_id = %entity.id,
                    required = %required,
                    expires_at = %timer.expires_at,
                    "Shortfall: buy timer started"
                );
                metrics::counter!("buy_timers_total", 1, "transition" => "started");
                TimerOutcome::Started(timer)
            }
            TimerOpen::Existing(timer) => {
                tracing::debug!(
                    entity_id = %entity.id,
                    expires_at = %timer.expires_at,
                    "Shortfall persists; buy timer already running"
                );
                TimerOutcome::AlreadyActive(timer)
            }
        };
        self.transition(entity, ComplianceStatus::OverCapShortfall).await?;
        Ok(outcome)
    }

    async fn resolve_active_timer(
        &self,
        entity_id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<Option<BuyTimer>> {
        let Some(active) = self.store.active_timer(entity_id).await? else {
            return Ok(None);
        };
        let resolved = self
            .store
            .transition_timer(active.id, TimerStatus::Active, TimerStatus::Resolved, now)
            .await?;
        if resolved.is_some() {
            tracing::info!(entity_id = %entity_id, timer_id = %active.id, "Buy timer resolved");
            metrics::counter!("buy_timers_total", 1, "transition" => "resolved");
        }
        Ok(resolved)
    }

    /// Check every ACTIVE timer at `now`, resolving or expiring as due.
    ///
    /// A failed check leaves its timer ACTIVE and is reported, not raised;
    /// only failing to list the timers is an error.
    pub async fn sweep_timers(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for timer in self.store.active_timers().await? {
            let entity_id = timer.entity_id;
            match self.sweep_timer(timer, now).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    tracing::warn!(entity_id = %entity_id, error = %e, "Timer check failed");
                    report.failures.push((entity_id, e));
                }
            }
        }
        Ok(report)
    }

    async fn sweep_timer(&self, timer: BuyTimer, now: DateTime<Utc>) -> Result<TimerOutcome> {
        let Some(_guard) = self.in_flight.try_acquire_sweep(timer.entity_id) else {
            return Ok(TimerOutcome::Busy(timer));
        };

        let entity = self.load_entity(timer.entity_id).await?;
        let balance = self.gateway.balance_of(&entity.ledger_account).await?;
        self.recorder.mirror_balance(entity.id, balance).await?;

        if balance >= timer.required_amount {
            return match self
                .store
                .transition_timer(timer.id, TimerStatus::Active, TimerStatus::Resolved, now)
                .await?
            {
                Some(resolved) => {
                    tracing::info!(
                        entity_id = %entity.id,
                        %balance,
                        required = %timer.required_amount,
                        "Shortfall covered; buy timer resolved"
                    );
                    metrics::counter!("buy_timers_total", 1, "transition" => "resolved");
                    Ok(TimerOutcome::Resolved(resolved))
                }
                None => Ok(TimerOutcome::Superseded(timer)),
            };
        }

        if !timer.is_expired_at(now) {
            return Ok(TimerOutcome::Pending(timer));
        }

        match self
            .store
            .transition_timer(timer.id, TimerStatus::Active, TimerStatus::Expired, now)
            .await?
        {
            Some(expired) => {
                let flag = self
                    .recorder
                    .record_flag(entity.id, expired.required_amount, balance, now)
                    .await?;
                self.transition(&entity, ComplianceStatus::Flagged).await?;
                tracing::warn!(
                    entity_id = %entity.id,
                    %balance,
                    required = %expired.required_amount,
                    "Buy timer expired; entity flagged"
                );
                metrics::counter!("buy_timers_total", 1, "transition" => "expired");
                Ok(TimerOutcome::Expired { timer: expired, flag })
            }
            None => Ok(TimerOutcome::Superseded(timer)),
        }
    }

    /// Release a FLAGGED entity back to COMPLIANT. Returns whether it was flagged.
    pub async fn clear_flag(&self, entity_id: EntityId) -> Result<bool> {
        let entity = self.load_entity(entity_id).await?;
        if entity.compliance_status != ComplianceStatus::Flagged {
            return Ok(false);
        }
        self.transition(&entity, ComplianceStatus::Compliant).await?;
        Ok(true)
    }

    async fn load_entity(&self, entity_id: EntityId) -> Result<MonitoredEntity> {
        self.store
            .read_entity(entity_id)
            .await?
            .ok_or_else(|| ComplianceError::missing_entity(entity_id))
    }

    async fn transition(&self, entity: &MonitoredEntity, to: ComplianceStatus) -> Result<()> {
        if entity.compliance_status != to {
            tracing::info!(
                entity_id = %entity.id,
                from = %entity.compliance_status,
                to = %to,
                "Compliance status changed"
            );
        }
        self.store.update_compliance_status(entity.id, to).await?;
        Ok(())
    }
}
