//! # Emergency Direct-Path Processor
//!
//! For Emergency-classified reports only: run the handler synchronously
//! the moment classification finishes, bypassing every queue, while a
//! redundant audit copy is enqueued in the background for reconciliation.
//! If inline execution fails, a minimal degraded record flagged
//! `needs_review` goes straight to the persistence collaborator. This
//! path never panics past its caller; the only error it can return is the
//! subsystem's single fatal condition (inline execution and the degraded
//! write both failed), and that is alerted to the operator channel first.

use crate::classification::ClassificationResult;
use crate::config::AegisConfig;
use crate::constants::Tier;
use crate::error::{AegisError, Result};
use crate::processing::report_processor::QueueUsed;
use crate::queue::{BackendKind, Job, JobOptions, TieredQueueManager};
use crate::services::{Notifier, PersistenceStore};
use crate::utils::Clock;
use crate::worker::HandlerRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Collection receiving degraded last-resort writes.
pub const DEGRADED_COLLECTION: &str = "degraded_reports";

/// How an emergency report was ultimately secured.
#[derive(Debug, Clone)]
pub struct EmergencyOutcome {
    pub queue_used: QueueUsed,
    /// True when the degraded-write last resort was taken.
    pub fallback: bool,
    pub degraded_record_id: Option<Uuid>,
}

/// Synchronous bypass execution for the highest-urgency tier.
#[derive(Debug)]
pub struct EmergencyProcessor {
    registry: Arc<HandlerRegistry>,
    manager: Arc<TieredQueueManager>,
    persistence: Arc<dyn PersistenceStore>,
    notifier: Arc<dyn Notifier>,
    config: Arc<AegisConfig>,
    clock: Arc<dyn Clock>,
}

impl EmergencyProcessor {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        manager: Arc<TieredQueueManager>,
        persistence: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn Notifier>,
        config: Arc<AegisConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            manager,
            persistence,
            notifier,
            config,
            clock,
        }
    }

    /// Secure one emergency report. Errors only on the fatal
    /// inline-and-degraded-write-both-failed condition.
    pub async fn process(
        &self,
        report_id: Uuid,
        event: &Value,
        classification: &ClassificationResult,
    ) -> Result<EmergencyOutcome> {
        let payload = json!({
            "report_id": report_id.to_string(),
            "event": event,
            "reasons": classification.reasons,
        });

        // Redundant audit copy, non-blocking and best-effort: the workers
        // reconcile it against whatever the inline attempt achieved
        if self.config.emergency.audit_copy {
            self.spawn_audit_enqueue(report_id, &payload);
        }

        if let Some(handler) = self.registry.get(Tier::Emergency) {
            let job = self.inline_job(payload.clone());
            let budget = self.config.emergency.inline_timeout();

            match tokio::time::timeout(budget, handler.handle(&job)).await {
                Ok(Ok(_result)) => {
                    info!(
                        report_id = %report_id,
                        "🚑 Emergency report processed inline"
                    );
                    return Ok(EmergencyOutcome {
                        queue_used: QueueUsed::Direct,
                        fallback: false,
                        degraded_record_id: None,
                    });
                }
                Ok(Err(err)) => {
                    warn!(
                        report_id = %report_id,
                        error = %err,
                        "Inline emergency execution failed, taking degraded path"
                    );
                    return self.degraded_write(report_id, event, &err.to_string()).await;
                }
                Err(_elapsed) => {
                    warn!(
                        report_id = %report_id,
                        "Inline emergency execution timed out, taking degraded path"
                    );
                    return self
                        .degraded_write(report_id, event, "inline execution timed out")
                        .await;
                }
            }
        }

        // No inline handler wired: the queue is the primary path
        match self
            .manager
            .enqueue(Tier::Emergency, payload, JobOptions::default())
            .await
        {
            Ok(enqueued) => {
                let queue_used = match enqueued.backend {
                    BackendKind::Broker => QueueUsed::Broker,
                    BackendKind::Memory => QueueUsed::Fallback,
                };
                Ok(EmergencyOutcome {
                    queue_used,
                    fallback: false,
                    degraded_record_id: None,
                })
            }
            Err(e) => self.degraded_write(report_id, event, &e.to_string()).await,
        }
    }

    /// Last resort: a minimal persistent record flagged for review.
    async fn degraded_write(
        &self,
        report_id: Uuid,
        event: &Value,
        cause: &str,
    ) -> Result<EmergencyOutcome> {
        let record = json!({
            "report_id": report_id.to_string(),
            "event": event,
            "needs_review": true,
            "cause": cause,
            "flagged_at": self.clock.now().to_rfc3339(),
        });

        match self.persistence.save(DEGRADED_COLLECTION, record).await {
            Ok(record_id) => {
                warn!(
                    report_id = %report_id,
                    degraded_record_id = %record_id,
                    "📝 Emergency report secured via degraded write"
                );
                Ok(EmergencyOutcome {
                    queue_used: QueueUsed::None,
                    fallback: true,
                    degraded_record_id: Some(record_id),
                })
            }
            Err(e) => {
                // The one genuinely fatal condition in the subsystem
                error!(
                    report_id = %report_id,
                    error = %e,
                    "🚨 Emergency degraded write failed"
                );
                self.notifier
                    .alert_operators(
                        "emergency report could not be secured",
                        json!({
                            "report_id": report_id.to_string(),
                            "cause": cause,
                            "write_error": e.to_string(),
                        }),
                    )
                    .await;
                Err(AegisError::EmergencyPathFailure(format!(
                    "inline execution and degraded write both failed for report {report_id}: {e}"
                )))
            }
        }
    }

    fn spawn_audit_enqueue(&self, report_id: Uuid, payload: &Value) {
        let manager = Arc::clone(&self.manager);
        let mut audit_payload = payload.clone();
        if let Some(fields) = audit_payload.as_object_mut() {
            fields.insert("audit".to_string(), Value::Bool(true));
        }
        tokio::spawn(async move {
            match manager
                .enqueue(Tier::Emergency, audit_payload, JobOptions::default())
                .await
            {
                Ok(enqueued) => debug!(
                    report_id = %report_id,
                    backend = %enqueued.backend,
                    "Audit copy enqueued"
                ),
                Err(e) => warn!(
                    report_id = %report_id,
                    error = %e,
                    "Audit copy enqueue failed"
                ),
            }
        });
    }

    /// A synthetic job for the inline attempt; it never enters a queue.
    fn inline_job(&self, payload: Value) -> Job {
        let tier_config = self.config.tiers.for_tier(Tier::Emergency);
        Job::new(
            Tier::Emergency,
            payload,
            tier_config,
            &JobOptions::default(),
            self.clock.now(),
        )
    }
}
