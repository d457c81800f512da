//! Error types for packet delivery

use crossbeam_channel::{SendError, TrySendError};

/// Error raised by a bus subscriber while handling a packet
///
/// The bus logs these and carries on; they never travel back to the producer.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder error: {0}")]
    Encoder(#[from] crate::Error),

    #[error("Consumer disconnected: {0}")]
    Disconnected(String),

    #[error("Consumer queue full, packet dropped")]
    Full,

    #[error("Payload samples are {got} bytes wide, consumer expects {expected}")]
    UnitSize { expected: usize, got: usize },
}

impl<T> From<SendError<T>> for DeliveryError {
    fn from(e: SendError<T>) -> Self {
        DeliveryError::Disconnected(format!("{}", e))
    }
}

impl<T> From<TrySendError<T>> for DeliveryError {
    fn from(e: TrySendError<T>) -> Self {
        match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => {
                DeliveryError::Disconnected("receiver dropped".to_string())
            }
        }
    }
}

/// Result type for subscriber deliveries
pub type SinkResult<T = ()> = Result<T, DeliveryError>;
