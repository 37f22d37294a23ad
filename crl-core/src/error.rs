use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrlError {
    /// The strategy configuration breaks one of its contracts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An extension point a concrete strategy has to provide was called.
    #[error("`{0}` must be implemented by every RL strategy")]
    NotImplemented(&'static str),

    #[error("cannot sample {requested} steps, replay memory holds {available}")]
    InsufficientData { requested: usize, available: usize },

    #[error("environment error: {0}")]
    Env(String),

    #[error("parameter mismatch: {0}")]
    ParameterMismatch(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, CrlError>;

impl CrlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
