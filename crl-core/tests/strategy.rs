use candle_core::{Device, Tensor, Var};
use candle_nn::{Optimizer, SGD};
use crl_core::{
    env::{Env, EnvironmentDescription, Experience, SnapShot, Space},
    error::{CrlError, Result},
    optimizer::OptimizerWithMaxGrad,
    plugin::StrategyPlugin,
    rollout::Rollout,
    strategy::{ActionSampler, RLBaseStrategy, StrategyConfig, TrainingContext, UpdateRule},
};
use std::{cell::RefCell, rc::Rc};

/// Emits its step counter as observation and finishes after `episode_len` steps.
struct CountingEnv {
    t: usize,
    episode_len: usize,
    resets: usize,
}

impl CountingEnv {
    fn new(episode_len: usize) -> Self {
        Self {
            t: 0,
            episode_len,
            resets: 0,
        }
    }

    fn observation(&self) -> Result<Tensor> {
        Ok(Tensor::new(&[self.t as f32], &Device::Cpu)?)
    }
}

impl Env for CountingEnv {
    fn reset(&mut self) -> Result<Tensor> {
        self.t = 0;
        self.resets += 1;
        self.observation()
    }

    fn step(&mut self, _action: u32) -> Result<SnapShot> {
        self.t += 1;
        let terminated = self.t >= self.episode_len;
        Ok(SnapShot::new(self.observation()?, 1., terminated, false))
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(Space::Continuous { size: 1 }, Space::Discrete(2))
    }
}

struct SquaredWeightRule {
    w: Var,
}

impl ActionSampler for SquaredWeightRule {
    fn sample_rollout_action(&mut self, _observation: &Tensor, _action_space: &Space) -> Result<u32> {
        Ok(0)
    }
}

impl UpdateRule for SquaredWeightRule {
    fn update(&mut self, _rollouts: &[Rollout], _n_update_steps: usize) -> Result<Tensor> {
        Ok(self.w.as_tensor().sqr()?.sum_all()?)
    }
}

struct BaseRule;

impl ActionSampler for BaseRule {}

impl UpdateRule for BaseRule {}

fn optimizer(w: &Var) -> Result<OptimizerWithMaxGrad<SGD>> {
    let sgd = SGD::new(vec![w.clone()], 0.1)?;
    Ok(OptimizerWithMaxGrad::new(sgd, None, vec![w.clone()]))
}

fn strategy(
    per_experience_steps: usize,
    plugins: Vec<Box<dyn StrategyPlugin>>,
) -> Result<(RLBaseStrategy<SquaredWeightRule>, Var)> {
    let w = Var::new(&[1f32], &Device::Cpu)?;
    let rule = SquaredWeightRule { w: w.clone() };
    let strategy = RLBaseStrategy::new(
        rule,
        optimizer(&w)?,
        StrategyConfig::new(per_experience_steps),
        plugins,
    )?;
    Ok((strategy, w))
}

fn first_states(rollout: &Rollout) -> Result<Vec<f32>> {
    rollout
        .steps
        .iter()
        .map(|s| Ok(s.states.to_vec1::<f32>()?[0]))
        .collect()
}

#[test]
fn uncapped_rollouts_are_whole_episodes() -> Result<()> {
    let (mut strategy, _) = strategy(1, vec![])?;
    let mut env = CountingEnv::new(7);
    for max_steps in [0, -1] {
        let (rollouts, steps) = strategy.rollout(&mut env, 3, max_steps)?;
        assert_eq!(steps, 21);
        assert!(rollouts.iter().all(|r| r.len() == 7));
        assert!(rollouts.iter().all(|r| r.steps.last().is_some_and(|s| s.done)));
        assert!(strategy.ctx.observation.is_none());
    }
    assert_eq!(strategy.ctx.episode_lengths, vec![7, 7, 7]);
    assert_eq!(strategy.ctx.episode_returns, vec![7., 7., 7.]);
    Ok(())
}

#[test]
fn capped_rollouts_resume_the_episode() -> Result<()> {
    let (mut strategy, _) = strategy(1, vec![])?;
    let mut env = CountingEnv::new(10);
    let (rollouts, steps) = strategy.rollout(&mut env, 1, 3)?;
    assert_eq!(steps, 3);
    assert_eq!(first_states(&rollouts[0])?, vec![0., 1., 2.]);
    assert!(strategy.ctx.observation.is_some());

    let (rollouts, _) = strategy.rollout(&mut env, 2, 3)?;
    assert_eq!(env.resets, 1);
    assert_eq!(first_states(&rollouts[0])?, vec![3., 4., 5.]);
    assert_eq!(first_states(&rollouts[1])?, vec![6., 7., 8.]);
    assert!(rollouts.iter().all(|r| r.len() <= 3));
    Ok(())
}

#[test]
fn finished_episodes_force_a_reset() -> Result<()> {
    let (mut strategy, _) = strategy(1, vec![])?;
    let mut env = CountingEnv::new(4);
    let (rollouts, steps) = strategy.rollout(&mut env, 3, 3)?;
    assert_eq!(steps, 3 + 1 + 3);
    assert_eq!(rollouts.iter().map(Rollout::len).collect::<Vec<_>>(), vec![3, 1, 3]);
    assert!(rollouts[1].steps[0].done);
    assert_eq!(first_states(&rollouts[2])?, vec![0., 1., 2.]);
    assert_eq!(env.resets, 2);
    Ok(())
}

#[test]
fn base_rule_extension_points_are_not_implemented() -> Result<()> {
    let w = Var::new(&[1f32], &Device::Cpu)?;
    let mut strategy = RLBaseStrategy::new(BaseRule, optimizer(&w)?, StrategyConfig::new(2), vec![])?;
    let res = strategy.train(Experience::stream([CountingEnv::new(3)]));
    assert!(matches!(res, Err(CrlError::NotImplemented("sample_rollout_action"))));
    assert!(matches!(
        strategy.rule.update(&[], 1),
        Err(CrlError::NotImplemented("update"))
    ));
    Ok(())
}

#[test]
fn training_updates_parameters_and_counters() -> Result<()> {
    let (mut strategy, w) = strategy(5, vec![])?;
    strategy.train(Experience::stream([CountingEnv::new(3), CountingEnv::new(2)]))?;
    // 5 iterations of whole episodes per experience
    assert_eq!(strategy.ctx.rollout_steps, 5 * 2);
    assert_eq!(strategy.ctx.total_steps, 5 * 3 + 5 * 2);
    assert_eq!(strategy.ctx.current_experience, Some(1));
    assert!(!strategy.ctx.is_training);
    // ten SGD steps on w^2 with lr 0.1 shrink w by 0.8 each
    let w = w.as_tensor().to_vec1::<f32>()?[0];
    approx::assert_abs_diff_eq!(w, 0.8f32.powi(10), epsilon = 1e-5);
    Ok(())
}

struct Recorder {
    calls: Rc<RefCell<Vec<&'static str>>>,
    steps: Rc<RefCell<Vec<usize>>>,
}

impl Recorder {
    fn record(&self, name: &'static str, ctx: &TrainingContext) {
        self.calls.borrow_mut().push(name);
        self.steps.borrow_mut().push(ctx.total_steps);
    }
}

impl StrategyPlugin for Recorder {
    fn before_training(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("before_training", ctx);
        Ok(())
    }

    fn before_training_exp(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("before_training_exp", ctx);
        Ok(())
    }

    fn before_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("before_rollout", ctx);
        Ok(())
    }

    fn after_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("after_rollout", ctx);
        Ok(())
    }

    fn before_forward(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("before_forward", ctx);
        Ok(())
    }

    fn after_forward(&mut self, ctx: &TrainingContext) -> Result<()> {
        assert!(ctx.loss.is_some());
        self.record("after_forward", ctx);
        Ok(())
    }

    fn before_backward(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("before_backward", ctx);
        Ok(())
    }

    fn after_backward(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("after_backward", ctx);
        Ok(())
    }

    fn before_update(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("before_update", ctx);
        Ok(())
    }

    fn after_update(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("after_update", ctx);
        Ok(())
    }

    fn after_training_exp(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("after_training_exp", ctx);
        Ok(())
    }

    fn after_training(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.record("after_training", ctx);
        Ok(())
    }
}

#[test]
fn plugins_see_every_phase_in_order() -> Result<()> {
    let calls = Rc::new(RefCell::new(vec![]));
    let steps = Rc::new(RefCell::new(vec![]));
    let recorder = Recorder {
        calls: calls.clone(),
        steps: steps.clone(),
    };
    let (mut strategy, _) = strategy(1, vec![Box::new(recorder)])?;
    strategy.train(Experience::stream([CountingEnv::new(2)]))?;
    assert_eq!(
        *calls.borrow(),
        vec![
            "before_training",
            "before_training_exp",
            "before_rollout",
            "after_rollout",
            "before_forward",
            "after_forward",
            "before_backward",
            "after_backward",
            "before_update",
            "after_update",
            "after_training_exp",
            "after_training",
        ]
    );
    let steps = steps.borrow();
    assert!(steps.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(steps.last(), Some(&2));
    Ok(())
}

struct FailingPlugin;

impl StrategyPlugin for FailingPlugin {
    fn after_rollout(&mut self, _ctx: &TrainingContext) -> Result<()> {
        Err(CrlError::Env("plugin failure".into()))
    }
}

#[test]
fn plugin_errors_propagate() -> Result<()> {
    let (mut strategy, _) = strategy(3, vec![Box::new(FailingPlugin)])?;
    let res = strategy.train(Experience::stream([CountingEnv::new(2)]));
    assert!(matches!(res, Err(CrlError::Env(_))));
    assert!(!strategy.ctx.is_training);
    Ok(())
}
