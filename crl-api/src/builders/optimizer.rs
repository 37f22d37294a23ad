use candle_core::Var;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};
use crl_core::{
    Result,
    optimizer::{OptimizerWithMaxGrad, StrategyOptimizer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    AdamW,
    Sgd,
}

#[derive(Debug, Clone)]
pub struct OptimizerBuilder {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    /// Only used by AdamW.
    pub weight_decay: f64,
    pub max_grad_norm: Option<f32>,
}

impl Default for OptimizerBuilder {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::AdamW,
            learning_rate: 3e-4,
            weight_decay: 0.01,
            max_grad_norm: None,
        }
    }
}

impl OptimizerBuilder {
    pub fn sgd(learning_rate: f64) -> Self {
        Self {
            kind: OptimizerKind::Sgd,
            learning_rate,
            weight_decay: 0.,
            max_grad_norm: None,
        }
    }

    pub fn build(&self, vars: Vec<Var>) -> Result<Box<dyn StrategyOptimizer>> {
        match self.kind {
            OptimizerKind::AdamW => {
                let params = ParamsAdamW {
                    lr: self.learning_rate,
                    weight_decay: self.weight_decay,
                    ..Default::default()
                };
                let optimizer = AdamW::new(vars.clone(), params)?;
                Ok(Box::new(OptimizerWithMaxGrad::new(
                    optimizer,
                    self.max_grad_norm,
                    vars,
                )))
            }
            OptimizerKind::Sgd => {
                let optimizer = SGD::new(vars.clone(), self.learning_rate)?;
                Ok(Box::new(OptimizerWithMaxGrad::new(
                    optimizer,
                    self.max_grad_norm,
                    vars,
                )))
            }
        }
    }
}
