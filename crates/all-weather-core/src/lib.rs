pub mod error;
pub mod returns;
pub mod risk_parity;
pub mod types;

#[cfg(feature = "hierarchical")]
pub mod allocation;

#[cfg(feature = "ingestion")]
pub mod ingestion;

#[cfg(feature = "performance")]
pub mod performance;

pub use error::AllocationError;
pub use types::*;

/// Standard result type for all allocation operations
pub type AllocationResult<T> = Result<T, AllocationError>;
