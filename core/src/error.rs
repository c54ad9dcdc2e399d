use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Audio stream already running")]
    AlreadyStreaming,

    #[error("Audio stream not running")]
    NotStreaming,

    #[error("Payload of {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corrupted payload: {0}")]
    CorruptedPayload(String),

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModemError>;
