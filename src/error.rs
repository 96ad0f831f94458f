//! Engine error taxonomy
//!
//! Only device discovery exhaustion is fatal. Subscription problems are
//! recoverable through the monitor's rebind cycle, and emission problems are
//! swallowed at the sink because retrying synthetic input risks double-firing.

use crate::source::DeviceId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Discovery exceeded the configured attempt budget. Fatal: the host
    /// must be told instead of letting the engine idle forever.
    #[error("ring device not found after {attempts} discovery attempts")]
    DeviceNotFound { attempts: u32 },

    /// A subscribe/unsubscribe call against the input source failed.
    /// Recoverable: the whole binding is torn down and retried.
    #[error("subscription to device {id} failed: {reason}")]
    Subscription { id: DeviceId, reason: String },

    /// The synthetic output interface rejected an emission. Logged and
    /// dropped by the sink; this variant exists for hosts that wrap a sink.
    #[error("synthetic output rejected: {0}")]
    Emission(String),
}
