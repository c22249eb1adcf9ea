pub mod config;
pub mod hierarchical;

pub use config::{AllocationConfig, Environment};
pub use hierarchical::{
    combine_weights, AllocationOutput, BetweenEnvironmentWeight, EnvironmentReturns,
    FinalTickerWeight, HierarchicalAllocator, WithinEnvironmentWeight,
};
