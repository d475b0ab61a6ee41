//! Windowed evaluation of emissions against the per-window cap

use std::sync::Arc;

use chrono::{DateTime, Utc};
use emission_store::{EmissionSample, EmissionStore, EntityId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, NoDataPolicy};
use crate::error::Result;

/// Why an evaluation produced nothing to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoOpReason {
    MissingCap,
    NoSamples,
}

impl NoOpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoOpReason::MissingCap => "missing_cap",
            NoOpReason::NoSamples => "no_samples",
        }
    }
}

/// Emissions for one entity over one window, compared against its cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceWindowResult {
    pub entity_id: EntityId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_emissions: Decimal,
    pub cap: Decimal,
    /// `total_emissions <= cap`
    pub is_compliant: bool,
    /// `|total_emissions - cap|`
    pub delta: Decimal,
    pub sample_count: usize,
}

impl ComplianceWindowResult {
    /// Credits earned for staying under the cap
    pub fn credits_to_mint(&self) -> Decimal {
        if self.is_compliant {
            self.delta
        } else {
            Decimal::ZERO
        }
    }

    /// Credits owed for exceeding the cap
    pub fn credits_to_deduct(&self) -> Decimal {
        if self.is_compliant {
            Decimal::ZERO
        } else {
            self.delta
        }
    }
}

/// Result of evaluating an entity at a point in time
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    NoOp { entity_id: EntityId, reason: NoOpReason },
    Evaluated(ComplianceWindowResult),
}

/// Sum `samples` and compare the total against `cap`.
///
/// Pure: the caller decides which samples belong to the window.
pub fn evaluate_window(
    entity_id: EntityId,
    samples: &[EmissionSample],
    cap: Decimal,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> ComplianceWindowResult {
    let total_emissions: Decimal = samples.iter().map(|s| s.value).sum();
    let is_compliant = total_emissions <= cap;

    ComplianceWindowResult {
        entity_id,
        window_start,
        window_end,
        total_emissions,
        cap,
        is_compliant,
        delta: (total_emissions - cap).abs(),
        sample_count: samples.len(),
    }
}

/// Reads caps and samples from the store and evaluates the trailing window
pub struct ComplianceEvaluator {
    store: Arc<dyn EmissionStore>,
    config: EngineConfig,
}

impl ComplianceEvaluator {
    pub fn new(store: Arc<dyn EmissionStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Evaluate the window `[now - window, now)` for an entity
    pub async fn evaluate(&self, entity_id: EntityId, now: DateTime<Utc>) -> Result<Evaluation> {
        let Some(cap) = self.store.read_cap(entity_id).await? else {
            return Ok(Evaluation::NoOp { entity_id, reason: NoOpReason::MissingCap });
        };

        let window_start = now - self.config.window();
        let mut samples: Vec<EmissionSample> = self
            .store
            .read_emission_samples(entity_id, window_start)
            .await?
            .into_iter()
            .filter(|s| s.timestamp >= window_start && s.timestamp < now)
            .collect();

        if samples.is_empty() {
            match self.config.no_data_policy {
                NoDataPolicy::Skip => {
                    return Ok(Evaluation::NoOp { entity_id, reason: NoOpReason::NoSamples });
                }
                NoDataPolicy::LatestSample => match self.store.read_latest_sample(entity_id).await? {
                    Some(latest) if latest.timestamp < now => samples.push(latest),
                    _ => return Ok(Evaluation::NoOp { entity_id, reason: NoOpReason::NoSamples }),
                },
            }
        }

        Ok(Evaluation::Evaluated(evaluate_window(entity_id, &samples, cap, window_start, now)))
    }
}
