use crate::error::{CrlError, Result};
use candle_core::{Tensor, Var};
use candle_nn::VarMap;

/// Anything exposing trainable parameters.
pub trait Parametric {
    /// Parameters keyed by name, sorted by name so two structurally equal models line up.
    fn named_vars(&self) -> Result<Vec<(String, Var)>>;

    fn vars(&self) -> Result<Vec<Var>> {
        Ok(self.named_vars()?.into_iter().map(|(_, var)| var).collect())
    }
}

pub fn sorted_vars(varmap: &VarMap) -> Result<Vec<(String, Var)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| CrlError::ParameterMismatch("variable map lock poisoned".into()))?;
    let mut vars = data
        .iter()
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect::<Vec<_>>();
    vars.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(vars)
}

#[derive(Debug, Default)]
pub struct ModelOutput {
    pub values: Option<Tensor>,
    pub policy_logits: Option<Tensor>,
}

impl ModelOutput {
    pub fn values(self) -> Result<Tensor> {
        self.values
            .ok_or_else(|| CrlError::config("model was asked for values but produced none"))
    }

    pub fn policy_logits(self) -> Result<Tensor> {
        self.policy_logits
            .ok_or_else(|| CrlError::config("model was asked for policy logits but produced none"))
    }
}

/// Joint policy/value network used by actor-critic strategies.
pub trait ActorCriticModel: Parametric {
    /// `observations` carries a leading batch dimension. Values come back with shape `(batch,)`
    /// and logits with shape `(batch, n_actions)`.
    fn forward(
        &self,
        observations: &Tensor,
        compute_value: bool,
        compute_policy: bool,
    ) -> Result<ModelOutput>;
}

/// Action-value network used by value-based strategies.
pub trait QModel: Parametric + Sized {
    /// Returns `(batch, n_actions)` action values.
    fn q_values(&self, observations: &Tensor) -> Result<Tensor>;

    /// Structural copy with its own parameters holding the same values.
    fn duplicate(&self) -> Result<Self>;
}

/// Blends `target` toward `live` in place: `target <- target * (1 - tau) + live * tau`.
///
/// Parameters are paired by name. `tau = 1` copies the live parameters, `tau = 0` leaves the
/// target untouched.
pub fn polyak_update(target: &[(String, Var)], live: &[(String, Var)], tau: f64) -> Result<()> {
    if target.len() != live.len() {
        return Err(CrlError::ParameterMismatch(format!(
            "target has {} parameters, live model has {}",
            target.len(),
            live.len()
        )));
    }
    for ((target_name, target_var), (live_name, live_var)) in target.iter().zip(live) {
        if target_name != live_name {
            return Err(CrlError::ParameterMismatch(format!(
                "target parameter {target_name} paired with {live_name}"
            )));
        }
        // exact copy at tau = 1 so a non-finite target is still overwritten
        if tau == 1. {
            target_var.set(&live_var.as_tensor().detach())?;
        } else if tau != 0. {
            let blended = target_var
                .as_tensor()
                .affine(1. - tau, 0.)?
                .add(&live_var.as_tensor().affine(tau, 0.)?)?
                .detach();
            target_var.set(&blended)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{polyak_update, sorted_vars};
    use crate::error::{CrlError, Result};
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{Init, VarMap};

    fn varmap(fill: f64) -> Result<VarMap> {
        let varmap = VarMap::new();
        for name in ["b", "a"] {
            varmap.get((2, 3), name, Init::Const(fill), DType::F32, &Device::Cpu)?;
        }
        Ok(varmap)
    }

    fn values(varmap: &VarMap) -> Result<Vec<Vec<Vec<f32>>>> {
        sorted_vars(varmap)?
            .iter()
            .map(|(_, v)| Ok(v.as_tensor().to_vec2::<f32>()?))
            .collect()
    }

    #[test]
    fn vars_are_sorted_by_name() -> Result<()> {
        let names = sorted_vars(&varmap(0.)?)?
            .into_iter()
            .map(|(n, _)| n)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }

    #[test]
    fn tau_one_is_a_hard_copy() -> Result<()> {
        let target = varmap(0.3)?;
        let live = VarMap::new();
        for name in ["a", "b"] {
            live.get((2, 3), name, Init::Randn { mean: 0., stdev: 1. }, DType::F32, &Device::Cpu)?;
        }
        polyak_update(&sorted_vars(&target)?, &sorted_vars(&live)?, 1.)?;
        assert_eq!(values(&target)?, values(&live)?);
        Ok(())
    }

    #[test]
    fn tau_one_overwrites_a_diverged_target() -> Result<()> {
        let target = varmap(f64::INFINITY)?;
        polyak_update(&sorted_vars(&target)?, &sorted_vars(&varmap(2.)?)?, 1.)?;
        assert_eq!(values(&target)?, vec![vec![vec![2f32; 3]; 2]; 2]);
        Ok(())
    }

    #[test]
    fn tau_zero_ignores_a_diverged_live_model() -> Result<()> {
        let target = varmap(0.3)?;
        let before = values(&target)?;
        polyak_update(&sorted_vars(&target)?, &sorted_vars(&varmap(f64::NAN)?)?, 0.)?;
        assert_eq!(values(&target)?, before);
        Ok(())
    }

    #[test]
    fn tau_zero_leaves_target_unchanged() -> Result<()> {
        let target = varmap(0.3)?;
        let before = values(&target)?;
        polyak_update(&sorted_vars(&target)?, &sorted_vars(&varmap(5.)?)?, 0.)?;
        assert_eq!(values(&target)?, before);
        Ok(())
    }

    #[test]
    fn blends_toward_live() -> Result<()> {
        let target = varmap(0.)?;
        polyak_update(&sorted_vars(&target)?, &sorted_vars(&varmap(1.)?)?, 0.25)?;
        let blended = sorted_vars(&target)?[0].1.as_tensor().clone();
        let expected = Tensor::full(0.25f32, (2, 3), &Device::Cpu)?;
        let diff = blended.sub(&expected)?.abs()?.max_all()?.to_scalar::<f32>()?;
        approx::assert_abs_diff_eq!(diff, 0., epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn mismatched_parameters_are_rejected() -> Result<()> {
        let target = varmap(0.)?;
        let live = VarMap::new();
        live.get((2, 3), "c", Init::Const(0.), DType::F32, &Device::Cpu)?;
        live.get((2, 3), "d", Init::Const(0.), DType::F32, &Device::Cpu)?;
        let res = polyak_update(&sorted_vars(&target)?, &sorted_vars(&live)?, 0.5);
        assert!(matches!(res, Err(CrlError::ParameterMismatch(_))));
        Ok(())
    }
}
