//! # Report Processor
//!
//! `process_report` is the operation the HTTP layer calls once per
//! incoming safety-incident report: classify, persist, route. It always
//! returns a structured outcome; the only error it can propagate is the
//! emergency path's fatal condition. Lower tiers fail soft: enqueue
//! problems are logged and counted, never thrown.

use crate::classification::ReportClassifier;
use crate::config::AegisConfig;
use crate::constants::Tier;
use crate::error::Result;
use crate::processing::emergency::EmergencyProcessor;
use crate::queue::{BackendKind, EnqueuedJob, JobOptions, TierQueueStats, TieredQueueManager};
use crate::resilience::ConnectionHealth;
use crate::services::{Notifier, PersistenceStore};
use crate::utils::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collection receiving the initial report documents.
pub const REPORTS_COLLECTION: &str = "reports";

/// Which path ultimately carried the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueUsed {
    /// Emergency inline execution, no queue involved.
    Direct,
    Broker,
    Fallback,
    /// No queue accepted the report (degraded write or fail-soft drop).
    None,
}

impl fmt::Display for QueueUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueUsed::Direct => write!(f, "direct"),
            QueueUsed::Broker => write!(f, "broker"),
            QueueUsed::Fallback => write!(f, "fallback"),
            QueueUsed::None => write!(f, "none"),
        }
    }
}

/// Per-call overrides for report processing.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
}

impl ProcessOptions {
    fn job_options(&self) -> JobOptions {
        JobOptions {
            priority: self.priority,
            delay: None,
            max_retries: self.max_retries,
        }
    }
}

/// Structured result of one `process_report` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub success: bool,
    pub report_id: Uuid,
    pub tier: Tier,
    pub processing_time_ms: u64,
    pub queue_used: QueueUsed,
    /// True when the emergency degraded-write last resort was taken.
    pub fallback: bool,
    pub reasons: Vec<String>,
}

/// The externally consumed processing surface.
#[derive(Debug)]
pub struct ReportProcessor {
    classifier: ReportClassifier,
    manager: Arc<TieredQueueManager>,
    emergency: EmergencyProcessor,
    persistence: Arc<dyn PersistenceStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ReportProcessor {
    pub fn new(
        config: &AegisConfig,
        manager: Arc<TieredQueueManager>,
        emergency: EmergencyProcessor,
        persistence: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            classifier: ReportClassifier::new(config.classifier.clone(), &config.tiers),
            manager,
            emergency,
            persistence,
            notifier,
            clock,
        }
    }

    /// Ingest one report: classify, persist, route to its tier.
    ///
    /// Throws only on the catastrophic Emergency
    /// inline-and-degraded-write-both-failed condition.
    pub async fn process_report(
        &self,
        event: Value,
        options: ProcessOptions,
    ) -> Result<ProcessOutcome> {
        let started = Instant::now();
        let classification = self.classifier.classify(&event);

        debug!(
            tier = %classification.tier,
            reasons = ?classification.reasons,
            "Report classified"
        );

        let report_id = self.persist_report(&event, &classification).await;

        let outcome = if classification.tier.is_emergency() {
            let emergency_outcome = self
                .emergency
                .process(report_id, &event, &classification)
                .await?;

            // Fire-and-forget notification after emergency processing
            let notifier = Arc::clone(&self.notifier);
            let notify_event = json!({
                "report_id": report_id.to_string(),
                "tier": classification.tier.to_string(),
                "reasons": classification.reasons,
            });
            tokio::spawn(async move { notifier.notify(notify_event).await });

            ProcessOutcome {
                success: true,
                report_id,
                tier: classification.tier,
                processing_time_ms: started.elapsed().as_millis() as u64,
                queue_used: emergency_outcome.queue_used,
                fallback: emergency_outcome.fallback,
                reasons: classification.reasons.clone(),
            }
        } else {
            let payload = json!({
                "report_id": report_id.to_string(),
                "event": event,
                "reasons": classification.reasons,
            });

            let (success, queue_used) = match self
                .manager
                .enqueue(classification.tier, payload, options.job_options())
                .await
            {
                Ok(enqueued) => (true, queue_used_for(enqueued.backend)),
                Err(e) => {
                    // Lower tiers fail soft: log, count, continue
                    warn!(
                        tier = %classification.tier,
                        report_id = %report_id,
                        error = %e,
                        "Report enqueue failed on both backends"
                    );
                    (false, QueueUsed::None)
                }
            };

            if classification.needs_enrichment() {
                self.spawn_enrichment_job(report_id);
            }

            ProcessOutcome {
                success,
                report_id,
                tier: classification.tier,
                processing_time_ms: started.elapsed().as_millis() as u64,
                queue_used,
                fallback: false,
                reasons: classification.reasons.clone(),
            }
        };

        self.spawn_usage_event(&outcome);

        info!(
            report_id = %outcome.report_id,
            tier = %outcome.tier,
            queue_used = %outcome.queue_used,
            success = outcome.success,
            processing_time_ms = outcome.processing_time_ms,
            "📋 Report processed"
        );
        Ok(outcome)
    }

    /// Direct enqueue surface for internal producers.
    pub async fn add_job(
        &self,
        tier: Tier,
        payload: Value,
        options: JobOptions,
    ) -> Result<EnqueuedJob> {
        self.manager
            .enqueue(tier, payload, options)
            .await
            .map_err(Into::into)
    }

    /// Per-tier queue counters across both backends.
    pub async fn queue_stats(&self) -> HashMap<Tier, TierQueueStats> {
        self.manager.queue_stats().await
    }

    /// Circuit state, health score, and pool utilization.
    pub fn health_status(&self) -> ConnectionHealth {
        self.manager.guard().health_status()
    }

    /// Persist the raw report before routing. A store failure here is
    /// fail-soft: the payload still travels with the job, so processing
    /// continues under a locally generated id.
    async fn persist_report(
        &self,
        event: &Value,
        classification: &crate::classification::ClassificationResult,
    ) -> Uuid {
        let document = json!({
            "event": event,
            "tier": classification.tier.to_string(),
            "reasons": classification.reasons,
            "received_at": self.clock.now().to_rfc3339(),
        });

        match self.persistence.save(REPORTS_COLLECTION, document).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Report persist failed, continuing with generated id");
                Uuid::new_v4()
            }
        }
    }

    /// Rule-4 classifications get a background enrichment job,
    /// best-effort.
    fn spawn_enrichment_job(&self, report_id: Uuid) {
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            let payload = json!({
                "report_id": report_id.to_string(),
                "enrich": true,
            });
            if let Err(e) = manager
                .enqueue(Tier::Background, payload, JobOptions::default())
                .await
            {
                warn!(report_id = %report_id, error = %e, "Enrichment enqueue failed");
            }
        });
    }

    /// Every processed report emits a usage event on the Analytics tier,
    /// fire-and-forget.
    fn spawn_usage_event(&self, outcome: &ProcessOutcome) {
        let manager = Arc::clone(&self.manager);
        let payload = json!({
            "report_id": outcome.report_id.to_string(),
            "tier": outcome.tier.to_string(),
            "queue_used": outcome.queue_used.to_string(),
            "success": outcome.success,
        });
        tokio::spawn(async move {
            if let Err(e) = manager
                .enqueue(Tier::Analytics, payload, JobOptions::default())
                .await
            {
                debug!(error = %e, "Usage event enqueue failed");
            }
        });
    }
}

fn queue_used_for(backend: BackendKind) -> QueueUsed {
    match backend {
        BackendKind::Broker => QueueUsed::Broker,
        BackendKind::Memory => QueueUsed::Fallback,
    }
}
