pub mod assessment;
pub mod metrics;

pub use assessment::{
    assess_performance, portfolio_simple_returns, PerformanceInput, PerformanceOutput,
    PerformancePoint, PerformanceStats,
};
