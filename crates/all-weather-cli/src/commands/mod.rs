pub mod allocate;
pub mod log_returns;
pub mod performance;
pub mod risk_parity;
