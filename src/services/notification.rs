//! # Notification Collaborator
//!
//! Interface to the platform's notification dispatcher. Calls are
//! fire-and-forget from the core's perspective: the interface is
//! infallible and implementations swallow (and log) their own failures,
//! so a notification outage can never fail report processing.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tracing::{error, warn};

/// Notification seam. `notify` fans out user-facing notifications after
/// emergency processing; `alert_operators` is the operator channel used
/// for the one fatal condition in the subsystem.
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn notify(&self, event: Value);

    async fn alert_operators(&self, message: &str, context: Value);
}

/// Default notifier: structured log lines only. Deployments wire a real
/// dispatcher here.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: Value) {
        warn!(event = %event, "📣 NOTIFY (no dispatcher wired)");
    }

    async fn alert_operators(&self, message: &str, context: Value) {
        error!(
            message = %message,
            context = %context,
            "🚨 OPERATOR ALERT"
        );
    }
}
