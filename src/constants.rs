//! # System Constants
//!
//! The tier taxonomy and the fixed quantities shared by both queue
//! backends. Every tunable number lives in [`crate::config`]; only values
//! that are structural (and must never drift between backends) live here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority class of a job. Every job belongs to exactly one tier.
///
/// Tiers are independent queues with independent worker pools; there is no
/// ordering guarantee across tiers, only within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Life-safety-critical reports. Direct-path execution plus redundant
    /// queueing; never silently lost.
    Emergency,
    /// Default tier for ordinary reports.
    Standard,
    /// Enrichment and other deferrable work.
    Background,
    /// Usage/metrics events, lowest urgency.
    Analytics,
    /// Outbound email dispatch jobs.
    Email,
    /// Device push-notification jobs.
    Device,
}

impl Tier {
    /// All tiers, in descending urgency order.
    pub const ALL: [Tier; 6] = [
        Tier::Emergency,
        Tier::Standard,
        Tier::Email,
        Tier::Device,
        Tier::Background,
        Tier::Analytics,
    ];

    /// Queue name for this tier, shared by every backend.
    pub fn queue_name(&self) -> String {
        format!("{QUEUE_PREFIX}_{self}")
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, Tier::Emergency)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Emergency => write!(f, "emergency"),
            Tier::Standard => write!(f, "standard"),
            Tier::Background => write!(f, "background"),
            Tier::Analytics => write!(f, "analytics"),
            Tier::Email => write!(f, "email"),
            Tier::Device => write!(f, "device"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emergency" => Ok(Tier::Emergency),
            "standard" => Ok(Tier::Standard),
            "background" => Ok(Tier::Background),
            "analytics" => Ok(Tier::Analytics),
            "email" => Ok(Tier::Email),
            "device" => Ok(Tier::Device),
            _ => Err(format!("Invalid tier: {s}")),
        }
    }
}

/// Prefix for every queue name owned by this core.
pub const QUEUE_PREFIX: &str = "aegis";

/// Weight applied to a job's priority when computing its ordering score.
///
/// Large enough that priority always dominates readiness time (epoch
/// milliseconds, ~1.8e12) while `priority * WEIGHT + millis` stays well
/// inside `i64` for any realistic priority.
pub const PRIORITY_WEIGHT: i64 = 1_000_000_000_000_000;
