//! Error handling for the Nueva mix core
//!
//! Errors are only produced by control-context operations. The real-time
//! entry point never returns an error; it degrades to silence and bumps the
//! counters in [`crate::engine::PerformanceStats`].

use thiserror::Error;

/// Result type alias for Nueva operations
pub type Result<T> = std::result::Result<T, NuevaError>;

/// Main error type for Nueva operations
#[derive(Error, Debug)]
pub enum NuevaError {
    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Engine is not initialized")]
    NotInitialized,

    // Transport Errors
    #[error("Tempo out of range: {bpm} BPM (allowed 20-999)")]
    InvalidTempo { bpm: f64 },

    #[error("Invalid time signature: {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u32, denominator: u32 },

    #[error("Invalid loop range: start {start:.3}s must be before end {end:.3}s")]
    InvalidLoopRange { start: f64, end: f64 },

    // Parameter Errors
    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Track not found: {track_id}")]
    TrackNotFound { track_id: String },

    // I/O Errors
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NuevaError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            NuevaError::InvalidConfig { .. } => "INVALID_CONFIG",
            NuevaError::NotInitialized => "NOT_INITIALIZED",
            NuevaError::InvalidTempo { .. } => "INVALID_TEMPO",
            NuevaError::InvalidTimeSignature { .. } => "INVALID_TIME_SIGNATURE",
            NuevaError::InvalidLoopRange { .. } => "INVALID_LOOP_RANGE",
            NuevaError::InvalidParameter { .. } => "INVALID_PARAMETER",
            NuevaError::TrackNotFound { .. } => "TRACK_NOT_FOUND",
            NuevaError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            NuevaError::Wav(_) => "WAV_ERROR",
            NuevaError::Io(_) => "IO_ERROR",
            NuevaError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Rejected control commands leave the engine untouched, so the caller
    /// can simply retry with corrected input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NuevaError::InvalidTempo { .. }
                | NuevaError::InvalidTimeSignature { .. }
                | NuevaError::InvalidLoopRange { .. }
                | NuevaError::InvalidParameter { .. }
                | NuevaError::TrackNotFound { .. }
                | NuevaError::NotInitialized
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = NuevaError::InvalidTempo { bpm: 5.0 };
        assert_eq!(err.error_code(), "INVALID_TEMPO");
        assert_eq!(NuevaError::NotInitialized.error_code(), "NOT_INITIALIZED");
    }

    #[test]
    fn test_recoverable() {
        assert!(NuevaError::InvalidLoopRange { start: 5.0, end: 2.0 }.is_recoverable());
        let err = NuevaError::InvalidConfig {
            reason: "sample_rate must be positive".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_display_includes_values() {
        let err = NuevaError::InvalidTimeSignature {
            numerator: 7,
            denominator: 3,
        };
        assert_eq!(err.to_string(), "Invalid time signature: 7/3");
    }
}
