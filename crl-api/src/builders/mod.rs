pub mod a2c;
pub mod dqn;
pub mod models;
pub mod optimizer;
pub mod sequential;
