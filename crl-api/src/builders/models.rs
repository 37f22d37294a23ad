use crate::builders::sequential::build_sequential;
use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::{Sequential, VarBuilder, VarMap};
use crl_core::{
    Result,
    env::EnvironmentDescription,
    model::{ActorCriticModel, ModelOutput, Parametric, QModel, polyak_update, sorted_vars},
};
use std::path::Path;

/// Models whose parameters live in a single `VarMap` and can be written to disk.
pub trait Checkpoint {
    fn varmap(&self) -> &VarMap;

    fn varmap_mut(&mut self) -> &mut VarMap;

    /// Writes every parameter to a safetensors file.
    fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        Ok(self.varmap().save(path)?)
    }

    /// Overwrites the parameters with the ones stored at `path`. The layout must match.
    fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        Ok(self.varmap_mut().load(path)?)
    }
}

/// Separate policy and value MLPs sharing one parameter map.
pub struct MlpActorCritic {
    varmap: VarMap,
    policy: Sequential,
    value: Sequential,
}

impl MlpActorCritic {
    pub fn new(env_description: &EnvironmentDescription, hidden_layers: &[usize], device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let input_size = env_description.observation_size();
        let policy_layers = [hidden_layers, &[env_description.action_size()]].concat();
        let value_layers = [hidden_layers, &[1]].concat();
        let policy = build_sequential(input_size, &policy_layers, &vb, "policy")?;
        let value = build_sequential(input_size, &value_layers, &vb, "value")?;
        Ok(Self {
            varmap,
            policy,
            value,
        })
    }
}

impl Parametric for MlpActorCritic {
    fn named_vars(&self) -> Result<Vec<(String, candle_core::Var)>> {
        sorted_vars(&self.varmap)
    }
}

impl ActorCriticModel for MlpActorCritic {
    fn forward(
        &self,
        observations: &Tensor,
        compute_value: bool,
        compute_policy: bool,
    ) -> Result<ModelOutput> {
        let values = if compute_value {
            Some(self.value.forward(observations)?.squeeze(D::Minus1)?)
        } else {
            None
        };
        let policy_logits = if compute_policy {
            Some(self.policy.forward(observations)?)
        } else {
            None
        };
        Ok(ModelOutput {
            values,
            policy_logits,
        })
    }
}

impl Checkpoint for MlpActorCritic {
    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }
}

/// MLP mapping observations to one value per discrete action.
pub struct MlpQNetwork {
    varmap: VarMap,
    net: Sequential,
    input_size: usize,
    layers: Vec<usize>,
    device: Device,
}

impl MlpQNetwork {
    pub fn new(env_description: &EnvironmentDescription, hidden_layers: &[usize], device: &Device) -> Result<Self> {
        let layers = [hidden_layers, &[env_description.action_size()]].concat();
        Self::from_layers(env_description.observation_size(), layers, device)
    }

    fn from_layers(input_size: usize, layers: Vec<usize>, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = build_sequential(input_size, &layers, &vb, "q")?;
        Ok(Self {
            varmap,
            net,
            input_size,
            layers,
            device: device.clone(),
        })
    }
}

impl Parametric for MlpQNetwork {
    fn named_vars(&self) -> Result<Vec<(String, candle_core::Var)>> {
        sorted_vars(&self.varmap)
    }
}

impl QModel for MlpQNetwork {
    fn q_values(&self, observations: &Tensor) -> Result<Tensor> {
        Ok(self.net.forward(observations)?)
    }

    fn duplicate(&self) -> Result<Self> {
        let copy = Self::from_layers(self.input_size, self.layers.clone(), &self.device)?;
        polyak_update(&copy.named_vars()?, &self.named_vars()?, 1.)?;
        Ok(copy)
    }
}

impl Checkpoint for MlpQNetwork {
    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }
}

#[cfg(test)]
mod test {
    use super::{Checkpoint, MlpActorCritic, MlpQNetwork};
    use candle_core::{Device, Tensor};
    use crl_core::{
        Result,
        env::{EnvironmentDescription, Space},
        model::{ActorCriticModel, QModel},
    };

    fn description() -> EnvironmentDescription {
        EnvironmentDescription::new(Space::Continuous { size: 4 }, Space::Discrete(3))
    }

    fn observations() -> Result<Tensor> {
        Ok(Tensor::randn(0f32, 1., (5, 4), &Device::Cpu)?)
    }

    #[test]
    fn actor_critic_output_shapes() -> Result<()> {
        let model = MlpActorCritic::new(&description(), &[16], &Device::Cpu)?;
        let output = model.forward(&observations()?, true, true)?;
        assert_eq!(output.values.as_ref().map(|v| v.dims().to_vec()), Some(vec![5]));
        assert_eq!(output.policy_logits.as_ref().map(|l| l.dims().to_vec()), Some(vec![5, 3]));
        let output = model.forward(&observations()?, false, true)?;
        assert!(output.values.is_none());
        Ok(())
    }

    #[test]
    fn duplicate_holds_the_same_values_in_new_parameters() -> Result<()> {
        let model = MlpQNetwork::new(&description(), &[8, 8], &Device::Cpu)?;
        let copy = model.duplicate()?;
        let obs = observations()?;
        let diff = model.q_values(&obs)?.sub(&copy.q_values(&obs)?)?.abs()?.sum_all()?;
        assert_eq!(diff.to_scalar::<f32>()?, 0.);
        for var in copy.varmap.all_vars() {
            var.set(&var.zeros_like()?)?;
        }
        let untouched = model.q_values(&obs)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert!(untouched > 0.);
        Ok(())
    }

    #[test]
    fn checkpoints_round_trip() -> Result<()> {
        let path = std::env::temp_dir().join(format!("crl-q-{}.safetensors", std::process::id()));
        let model = MlpQNetwork::new(&description(), &[8], &Device::Cpu)?;
        model.save(&path)?;
        let mut restored = MlpQNetwork::new(&description(), &[8], &Device::Cpu)?;
        restored.load(&path)?;
        let obs = observations()?;
        let expected: Vec<Vec<f32>> = model.q_values(&obs)?.to_vec2()?;
        assert_eq!(restored.q_values(&obs)?.to_vec2::<f32>()?, expected);
        std::fs::remove_file(&path).ok();
        Ok(())
    }
}
