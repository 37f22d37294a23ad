use crate::error::{CrlError, Result};
use candle_core::{Tensor, Var, backprop::GradStore};
use candle_nn::Optimizer;

/// Optimizer as seen by the training loop.
///
/// Gradients of the latest `backward` call are kept until `step` consumes them or `zero_grad`
/// drops them.
pub trait StrategyOptimizer {
    fn zero_grad(&mut self);
    fn backward(&mut self, loss: &Tensor) -> Result<()>;
    fn step(&mut self) -> Result<()>;
}

pub fn clip_grad(t: &Tensor, vars: &[Var], max_norm: f32) -> Result<GradStore> {
    let mut total_norm_squared = 0.0f32;
    let mut grad_store = t.backward()?;
    let mut clipped = vec![];
    for var in vars.iter() {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            let grad_norm_sq = grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
            total_norm_squared += grad_norm_sq;
            clipped.push(var);
        }
    }
    let total_norm = total_norm_squared.sqrt();
    if total_norm > max_norm {
        let clip_coef = max_norm / (total_norm + 1e-6);
        for var in clipped {
            let Some(old_grad) = grad_store.get(var.as_tensor()) else {
                continue;
            };
            let new_grad = old_grad.affine(clip_coef as f64, 0.)?;
            grad_store.insert(var.as_tensor(), new_grad);
        }
    }
    Ok(grad_store)
}

pub struct OptimizerWithMaxGrad<O: Optimizer> {
    pub optimizer: O,
    pub max_grad_norm: Option<f32>,
    vars: Vec<Var>,
    grads: Option<GradStore>,
}

impl<O: Optimizer> std::fmt::Debug for OptimizerWithMaxGrad<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("learning_rate", &self.optimizer.learning_rate())
            .field("max_grad_norm", &self.max_grad_norm)
            .field("pending_grads", &self.grads.is_some())
            .finish()
    }
}

impl<O: Optimizer> OptimizerWithMaxGrad<O> {
    pub fn new(optimizer: O, max_grad_norm: Option<f32>, vars: Vec<Var>) -> Self {
        Self {
            optimizer,
            max_grad_norm,
            vars,
            grads: None,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }
}

impl<O: Optimizer> StrategyOptimizer for OptimizerWithMaxGrad<O> {
    fn zero_grad(&mut self) {
        self.grads = None;
    }

    fn backward(&mut self, loss: &Tensor) -> Result<()> {
        let grads = if let Some(max_norm) = self.max_grad_norm {
            clip_grad(loss, &self.vars, max_norm)?
        } else {
            loss.backward()?
        };
        self.grads = Some(grads);
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        let grads = self
            .grads
            .take()
            .ok_or_else(|| CrlError::config("optimizer step called without a backward pass"))?;
        self.optimizer.step(&grads)?;
        Ok(())
    }
}

impl<T: StrategyOptimizer + ?Sized> StrategyOptimizer for Box<T> {
    fn zero_grad(&mut self) {
        (**self).zero_grad()
    }

    fn backward(&mut self, loss: &Tensor) -> Result<()> {
        (**self).backward(loss)
    }

    fn step(&mut self) -> Result<()> {
        (**self).step()
    }
}
