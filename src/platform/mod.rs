//! External platform seams: outbound delivery, profile id resolution, send pacing.
//!
//! The engine never talks to the messaging platform directly. Everything it
//! needs from the outside world comes through the traits here.

pub mod delivery;
pub mod pacing;
pub mod resolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, ResolutionError};

pub use delivery::{DryRunDelivery, WebhookDelivery};
pub use pacing::SendPacing;
pub use resolver::PatternResolver;

/// Sends one message to one subject on the external platform.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, subject: &str, message: &str) -> Result<(), DeliveryError>;
}

/// Maps a subject reference (chat url, profile url, raw id) to a stable profile id.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve_profile_id(&self, subject: &str) -> Result<String, ResolutionError>;
}

/// What happens to escalation state when a delivery fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFailurePolicy {
    /// Advance the ledger anyway (observed legacy behavior).
    #[default]
    Advance,
    /// Leave the ledger untouched so the subject is retried next batch.
    Hold,
}
