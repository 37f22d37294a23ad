use crate::{
    env::{Env, Experience, Space},
    error::{CrlError, Result},
    optimizer::StrategyOptimizer,
    plugin::StrategyPlugin,
    rollout::{Rollout, Step},
    timestep::Timestep,
};
use candle_core::Tensor;
use tracing::{debug, info, trace};

// Runs the named hook of every registered plugin, in order, propagating the first error.
macro_rules! call_plugins {
    ($self:ident, $hook:ident) => {
        for plugin in $self.plugins.iter_mut() {
            plugin.$hook(&$self.ctx)?;
        }
    };
}

/// How a single rollout ends besides the episode finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RolloutMode {
    /// Rollouts only end with their episode.
    #[default]
    EpisodeBound,
    /// Rollouts end with their episode or after `max_steps` steps, whichever comes first.
    StepBound { max_steps: usize },
}

impl RolloutMode {
    /// A non-positive cap disables the cap.
    pub fn from_max_steps(max_steps: i64) -> Self {
        if max_steps <= 0 {
            Self::EpisodeBound
        } else {
            Self::StepBound {
                max_steps: max_steps as usize,
            }
        }
    }

    fn is_capped(&self, rollout_len: usize) -> bool {
        match self {
            Self::EpisodeBound => false,
            Self::StepBound { max_steps } => rollout_len >= *max_steps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutPlan {
    pub n_rollouts: usize,
    pub mode: RolloutMode,
}

impl Default for RolloutPlan {
    fn default() -> Self {
        Self {
            n_rollouts: 1,
            mode: RolloutMode::EpisodeBound,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// How many training iterations run per experience. Whether an iteration means a step or
    /// an episode is up to the update rule.
    pub per_experience_steps: Timestep,
    pub updates_per_step: usize,
}

impl StrategyConfig {
    pub fn new(per_experience_steps: impl Into<Timestep>) -> Self {
        Self {
            per_experience_steps: per_experience_steps.into(),
            updates_per_step: 1,
        }
    }
}

/// Everything the training phases share, handed to update rules and plugins.
#[derive(Debug)]
pub struct TrainingContext {
    pub is_training: bool,
    pub current_experience: Option<usize>,
    pub task_label: Option<usize>,
    pub per_experience_steps: Timestep,
    /// Training iteration within the current experience.
    pub timestep: usize,
    /// Environment steps taken since training started, warm-up collection included.
    pub total_steps: usize,
    /// Environment steps taken by the training iterations of the current experience.
    pub rollout_steps: usize,
    /// Observation an unfinished episode resumes from. `None` forces a reset.
    pub observation: Option<Tensor>,
    pub action_space: Option<Space>,
    pub rollouts: Vec<Rollout>,
    pub loss: Option<Tensor>,
    /// Returns of the episodes finished during the latest collection call.
    pub episode_returns: Vec<f32>,
    /// Lengths of the episodes finished during the latest collection call.
    pub episode_lengths: Vec<usize>,
    current_return: f32,
    current_length: usize,
}

impl TrainingContext {
    pub fn new(per_experience_steps: Timestep) -> Self {
        Self {
            is_training: false,
            current_experience: None,
            task_label: None,
            per_experience_steps,
            timestep: 0,
            total_steps: 0,
            rollout_steps: 0,
            observation: None,
            action_space: None,
            rollouts: vec![],
            loss: None,
            episode_returns: vec![],
            episode_lengths: vec![],
            current_return: 0.,
            current_length: 0,
        }
    }

    pub fn begin_experience(&mut self, current_experience: usize, task_label: usize, action_space: Space) {
        self.current_experience = Some(current_experience);
        self.task_label = Some(task_label);
        self.action_space = Some(action_space);
        self.timestep = 0;
        self.rollout_steps = 0;
        self.observation = None;
        self.rollouts.clear();
        self.loss = None;
        self.current_return = 0.;
        self.current_length = 0;
    }

    /// Drops the unfinished episode so the next collection starts from a reset.
    pub fn abandon_episode(&mut self) {
        self.observation = None;
        self.current_return = 0.;
        self.current_length = 0;
    }

    /// Collects `plan.n_rollouts` rollouts and returns them with the number of steps taken.
    ///
    /// An episode cut short by the step cap is resumed by the next call instead of resetting the
    /// environment.
    pub fn collect_rollouts(
        &mut self,
        env: &mut dyn Env,
        sampler: &mut dyn ActionSampler,
        plan: RolloutPlan,
    ) -> Result<(Vec<Rollout>, usize)> {
        self.episode_returns.clear();
        self.episode_lengths.clear();
        let action_space = env.env_description().action_space;
        let mut total = 0;
        let mut rollouts = Vec::with_capacity(plan.n_rollouts);
        for _ in 0..plan.n_rollouts {
            let mut steps = vec![];
            let mut observation = match self.observation.take() {
                Some(observation) => observation,
                None => {
                    self.current_return = 0.;
                    self.current_length = 0;
                    env.reset()?
                }
            };
            loop {
                let action = sampler.sample_rollout_action(&observation, &action_space)?;
                let snapshot = env.step(action)?;
                let done = snapshot.done();
                steps.push(Step::new(
                    &observation,
                    action,
                    done,
                    snapshot.reward,
                    &snapshot.observation,
                ));
                total += 1;
                self.current_return += snapshot.reward;
                self.current_length += 1;
                if done {
                    trace!(
                        episode_return = self.current_return,
                        length = self.current_length,
                        truncated = snapshot.truncated,
                        info = ?snapshot.info,
                        "episode finished"
                    );
                    self.episode_returns.push(self.current_return);
                    self.episode_lengths.push(self.current_length);
                    break;
                }
                observation = snapshot.observation;
                if plan.mode.is_capped(steps.len()) {
                    self.observation = Some(observation);
                    break;
                }
            }
            rollouts.push(Rollout::new(steps));
        }
        self.total_steps += total;
        trace!(
            n_rollouts = rollouts.len(),
            steps = total,
            episodes = self.episode_returns.len(),
            "collected rollouts"
        );
        Ok((rollouts, total))
    }
}

/// Picks the action played while collecting rollouts.
#[allow(unused_variables)]
pub trait ActionSampler {
    fn sample_rollout_action(&mut self, observation: &Tensor, action_space: &Space) -> Result<u32> {
        Err(CrlError::NotImplemented("sample_rollout_action"))
    }
}

/// The strategy specific half of training: how to act, how to turn rollouts into a loss, and
/// what to do around each phase.
#[allow(unused_variables)]
pub trait UpdateRule: ActionSampler {
    /// Validates the rule against the strategy configuration and derives anything that depends
    /// on it. Called once when the strategy is built.
    fn configure(&mut self, config: &StrategyConfig) -> Result<()> {
        Ok(())
    }

    fn rollout_plan(&self, config: &StrategyConfig) -> RolloutPlan {
        RolloutPlan::default()
    }

    fn before_training_exp(&mut self, ctx: &mut TrainingContext, env: &mut dyn Env) -> Result<()> {
        Ok(())
    }

    fn before_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn after_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    /// Produces the loss the optimizer step is taken on.
    fn update(&mut self, rollouts: &[Rollout], n_update_steps: usize) -> Result<Tensor> {
        Err(CrlError::NotImplemented("update"))
    }
}

pub struct RLBaseStrategy<R: UpdateRule> {
    pub rule: R,
    pub optimizer: Box<dyn StrategyOptimizer>,
    pub plugins: Vec<Box<dyn StrategyPlugin>>,
    pub config: StrategyConfig,
    pub ctx: TrainingContext,
}

impl<R: UpdateRule> RLBaseStrategy<R> {
    pub fn new(
        mut rule: R,
        optimizer: impl StrategyOptimizer + 'static,
        config: StrategyConfig,
        plugins: Vec<Box<dyn StrategyPlugin>>,
    ) -> Result<Self> {
        if config.updates_per_step == 0 {
            return Err(CrlError::config("updates_per_step must be positive"));
        }
        rule.configure(&config)?;
        Ok(Self {
            rule,
            optimizer: Box::new(optimizer),
            plugins,
            ctx: TrainingContext::new(config.per_experience_steps),
            config,
        })
    }

    pub fn add_plugin(&mut self, plugin: impl StrategyPlugin + 'static) {
        self.plugins.push(Box::new(plugin));
    }

    /// Collects `n_rollouts` rollouts with the rule's action sampler. A non-positive
    /// `max_steps` collects whole episodes only.
    pub fn rollout(
        &mut self,
        env: &mut dyn Env,
        n_rollouts: usize,
        max_steps: i64,
    ) -> Result<(Vec<Rollout>, usize)> {
        let plan = RolloutPlan {
            n_rollouts,
            mode: RolloutMode::from_max_steps(max_steps),
        };
        self.ctx.collect_rollouts(env, &mut self.rule, plan)
    }

    pub fn train<E: Env>(&mut self, experiences: impl IntoIterator<Item = Experience<E>>) -> Result<()> {
        self.ctx.is_training = true;
        let res = self.run_training(experiences);
        self.ctx.is_training = false;
        res
    }

    fn run_training<E: Env>(&mut self, experiences: impl IntoIterator<Item = Experience<E>>) -> Result<()> {
        call_plugins!(self, before_training);
        for mut experience in experiences {
            self.train_exp(&mut experience)?;
        }
        call_plugins!(self, after_training);
        Ok(())
    }

    pub fn train_exp<E: Env>(&mut self, experience: &mut Experience<E>) -> Result<()> {
        let env = &mut experience.environment;
        self.ctx.begin_experience(
            experience.current_experience,
            experience.task_label,
            env.env_description().action_space,
        );
        info!(
            experience = experience.current_experience,
            task_label = experience.task_label,
            duration = %self.config.per_experience_steps,
            "training on experience"
        );
        call_plugins!(self, before_training_exp);
        self.rule.before_training_exp(&mut self.ctx, env)?;

        for timestep in 0..self.config.per_experience_steps.value {
            self.ctx.timestep = timestep;
            self.rule.before_rollout(&self.ctx)?;
            call_plugins!(self, before_rollout);
            let plan = self.rule.rollout_plan(&self.config);
            let (rollouts, steps) = self.ctx.collect_rollouts(env, &mut self.rule, plan)?;
            self.ctx.rollouts = rollouts;
            self.ctx.rollout_steps += steps;
            self.rule.after_rollout(&self.ctx)?;
            call_plugins!(self, after_rollout);

            self.optimizer.zero_grad();
            call_plugins!(self, before_forward);
            let loss = self.rule.update(&self.ctx.rollouts, self.config.updates_per_step)?;
            self.ctx.loss = Some(loss.clone());
            call_plugins!(self, after_forward);

            call_plugins!(self, before_backward);
            self.optimizer.backward(&loss)?;
            call_plugins!(self, after_backward);

            call_plugins!(self, before_update);
            self.optimizer.step()?;
            call_plugins!(self, after_update);
            debug!(timestep, steps, "training iteration done");
        }

        call_plugins!(self, after_training_exp);
        info!(
            experience = experience.current_experience,
            rollout_steps = self.ctx.rollout_steps,
            total_steps = self.ctx.total_steps,
            "experience done"
        );
        Ok(())
    }
}
