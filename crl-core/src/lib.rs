pub mod criterion;
pub mod distributions;
pub mod env;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod plugin;
pub mod replay_memory;
pub mod rng;
pub mod rollout;
pub mod strategy;
pub mod tensors;
pub mod timestep;

pub use error::{CrlError, Result};
