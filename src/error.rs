use thiserror::Error;

/// Telemetry toolkit error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Control system not running")]
    NotRunning,

    #[error("Emergency mode active")]
    EmergencyActive,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid telemetry snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Noise generation failed: {0}")]
    Noise(String),
}

impl TelemetryError {
    /// True for errors that come from calling the public API in the wrong state
    /// (as opposed to a failure inside one tick or command).
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, TelemetryError::NotRunning | TelemetryError::EmergencyActive)
    }
}

/// Result type for simulator and control operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;
