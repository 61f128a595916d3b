//! fleetgrid-capacity: how much capacity a pool needs, and from where.
//!
//! - [`estimator`]: pure demand math (`desired_capacity`,
//!   `target_capacity`) plus the `simple` per-tick estimate with its
//!   over-capacity alert latch.
//! - [`selector`]: weighs a pool's launch configs by use and error share and
//!   samples them to cover a requested amount of capacity.

pub mod estimator;
pub mod selector;

pub use estimator::{CapacityEstimator, Estimate, EstimateInput, desired_capacity, target_capacity};
pub use selector::{
    LaunchConfigSelector, STARVATION_FLOOR_WEIGHT, WeightedConfig, WeightedRandomConfig,
};
