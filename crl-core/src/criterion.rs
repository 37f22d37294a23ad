use crate::error::Result;
use candle_core::Tensor;
use enum_dispatch::enum_dispatch;
use std::sync::Arc;

#[enum_dispatch]
pub trait LossFn {
    /// Reduces to a scalar tensor.
    fn loss(&self, input: &Tensor, target: &Tensor) -> Result<Tensor>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl LossFn for MseLoss {
    fn loss(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        Ok(input.sub(target)?.sqr()?.mean_all()?)
    }
}

/// Huber loss, quadratic below `beta` and linear above.
#[derive(Debug, Clone, Copy)]
pub struct SmoothL1Loss {
    pub beta: f64,
}

impl Default for SmoothL1Loss {
    fn default() -> Self {
        Self { beta: 1. }
    }
}

impl LossFn for SmoothL1Loss {
    fn loss(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        let abs_diff = input.sub(target)?.abs()?;
        let quadratic = abs_diff.minimum(self.beta)?;
        let linear = abs_diff.sub(&quadratic)?;
        let loss = quadratic.sqr()?.affine(0.5 / self.beta, 0.)?.add(&linear)?;
        Ok(loss.mean_all()?)
    }
}

type LossClosure = dyn Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync;

#[derive(Clone)]
pub struct CustomLoss(pub Arc<LossClosure>);

impl std::fmt::Debug for CustomLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CustomLoss")
    }
}

impl LossFn for CustomLoss {
    fn loss(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        (self.0)(input, target)
    }
}

#[enum_dispatch(LossFn)]
#[derive(Debug, Clone)]
pub enum Criterion {
    Mse(MseLoss),
    SmoothL1(SmoothL1Loss),
    Custom(CustomLoss),
}

impl Criterion {
    pub fn mse() -> Self {
        Self::Mse(MseLoss)
    }

    pub fn smooth_l1() -> Self {
        Self::SmoothL1(SmoothL1Loss::default())
    }

    pub fn custom(f: impl Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync + 'static) -> Self {
        Self::Custom(CustomLoss(Arc::new(f)))
    }
}
