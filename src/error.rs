//! Error types for the cadence engine.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A collection could not be read or written. Batch-fatal.
    #[error("Collection {collection} unavailable: {reason}")]
    Unavailable {
        collection: &'static str,
        reason: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// A single persisted row failed to parse. Row-local: logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("Malformed row in {collection}: {reason}")]
    Malformed {
        collection: &'static str,
        reason: String,
    },
}

/// A stable profile id could not be determined for a subject.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Could not resolve profile id for {subject}: {reason}")]
pub struct ResolutionError {
    pub subject: String,
    pub reason: String,
}

/// The external platform rejected or failed an outbound message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Delivery to {subject} failed: {reason}")]
pub struct DeliveryError {
    pub subject: String,
    pub reason: String,
}

/// Errors that abort a whole batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Another batch already holds collection {collection}")]
    InFlight { collection: &'static str },

    #[error("Cadence must be at least one day, got {0}")]
    InvalidCadence(u32),
}

/// Blacklist mutation errors.
#[derive(Debug, thiserror::Error)]
pub enum BlacklistError {
    #[error("Subject id is empty")]
    EmptySubject,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Another batch already holds collection {collection}")]
    InFlight { collection: &'static str },
}
