//! Error types for chute-link

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// chute-link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Listener could not be bound (invalid address or port in use)
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Address we tried to bind
        address: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Frame failed length, marker or checksum validation
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Slot trigger for a slot that is already in flight
    #[error("Duplicate trigger for slot {0}")]
    DuplicateTrigger(u16),

    /// Slot/barcode pair rejected by the binding validator
    #[error("Binding conflict: slot {slot} vs barcode {barcode:?}")]
    BindingConflict {
        /// Slot the identification was tested against
        slot: u16,
        /// Barcode of the identification
        barcode: String,
    },

    /// No identification matched the slot before its deadline
    #[error("Match timeout for slot {0}")]
    MatchTimeout(u16),

    /// No controller is attached to receive commands
    #[error("Controller not connected")]
    NotConnected,

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Configuration values are inconsistent
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Background thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        /// Thread name
        name: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}
