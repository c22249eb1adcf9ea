pub mod covariance;
pub mod panel;

pub use covariance::sample_covariance;
pub use panel::{AssetReturnSeries, ReturnObservation, ReturnPanel};
