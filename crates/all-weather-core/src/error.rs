use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Singular input: {context} — {reason}")]
    SingularInput { context: String, reason: String },

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Validation mismatch in {context}: risk contribution {contribution} at index {index} does not match budget {budget} (tolerance {tolerance})")]
    ValidationMismatch {
        context: String,
        index: usize,
        contribution: Decimal,
        budget: Decimal,
        tolerance: Decimal,
    },

    #[error("Input shape error: {field} — {reason}")]
    InputShape { field: String, reason: String },

    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Date error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("{layer}: {source}")]
    Layer {
        layer: String,
        #[source]
        source: Box<AllocationError>,
    },
}

impl AllocationError {
    /// Attach the allocation layer (or environment) that produced this error.
    pub fn in_layer(self, layer: impl Into<String>) -> Self {
        AllocationError::Layer {
            layer: layer.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with every layer wrapper removed.
    pub fn root(&self) -> &AllocationError {
        match self {
            AllocationError::Layer { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for AllocationError {
    fn from(e: serde_json::Error) -> Self {
        AllocationError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_message_and_root() {
        let err = AllocationError::InputShape {
            field: "budget".into(),
            reason: "expected 3 entries, got 2".into(),
        }
        .in_layer("environment 'RISING_GROWTH'")
        .in_layer("within-environment");

        assert_eq!(
            err.to_string(),
            "within-environment: environment 'RISING_GROWTH': Input shape error: budget — expected 3 entries, got 2"
        );
        assert!(matches!(err.root(), AllocationError::InputShape { .. }));
    }
}
