pub mod logger;
pub mod reward;
