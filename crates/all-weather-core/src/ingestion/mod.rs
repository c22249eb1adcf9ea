pub mod prices;

pub use prices::{
    benchmark_simple_returns, latest_first_date, log_return_panel, PriceObservation, PriceSeries,
};
