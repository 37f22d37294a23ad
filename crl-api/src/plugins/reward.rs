use crl_core::{Result, plugin::StrategyPlugin, strategy::TrainingContext};
use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStat {
    Mean,
    Max,
    Min,
    Std,
}

impl fmt::Display for WindowStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mean => "Mean",
            Self::Max => "Max",
            Self::Min => "Min",
            Self::Std => "Std",
        };
        write!(f, "{name}")
    }
}

/// Statistics over the last `window_size` values seen.
#[derive(Debug, Clone)]
pub struct MovingWindowedStats {
    window_size: usize,
    stats: Vec<WindowStat>,
    window: VecDeque<f32>,
}

impl MovingWindowedStats {
    pub fn new(window_size: usize, stats: Vec<WindowStat>) -> Self {
        Self {
            window_size,
            stats,
            window: VecDeque::with_capacity(window_size),
        }
    }

    pub fn update(&mut self, values: impl IntoIterator<Item = f32>) {
        for value in values {
            if self.window.len() == self.window_size {
                self.window.pop_front();
            }
            if self.window_size > 0 {
                self.window.push_back(value);
            }
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn stat(&self, stat: WindowStat) -> Option<f32> {
        if self.window.is_empty() {
            return None;
        }
        let n = self.window.len() as f32;
        let mean = self.window.iter().sum::<f32>() / n;
        let value = match stat {
            WindowStat::Mean => mean,
            WindowStat::Max => self.window.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            WindowStat::Min => self.window.iter().copied().fold(f32::INFINITY, f32::min),
            WindowStat::Std => {
                (self.window.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
            }
        };
        Some(value)
    }

    /// `(name, value)` for every selected stat, e.g. `("Mean Reward (1000 steps)", 3.5)`.
    pub fn results(&self, label: &str) -> Vec<(String, f32)> {
        self.stats
            .iter()
            .filter_map(|stat| {
                self.stat(*stat).map(|value| {
                    (
                        format!("{stat} {label} ({} steps)", self.window_size),
                        value,
                    )
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub name: String,
    pub value: f32,
    pub total_steps: usize,
}

pub type MetricLog = Rc<RefCell<Vec<MetricValue>>>;

fn emit(log: &MetricLog, stats: &MovingWindowedStats, label: &str, total_steps: usize) {
    for (name, value) in stats.results(label) {
        info!(metric = %name, value, total_steps);
        log.borrow_mut().push(MetricValue {
            name,
            value,
            total_steps,
        });
    }
}

/// Windowed statistics of episode returns, emitted after every optimizer update.
#[derive(Debug)]
pub struct RewardPlugin {
    pub stats: MovingWindowedStats,
    log: MetricLog,
}

impl RewardPlugin {
    pub fn new(window_size: usize, stats: Vec<WindowStat>) -> Self {
        Self {
            stats: MovingWindowedStats::new(window_size, stats),
            log: MetricLog::default(),
        }
    }

    /// Shared handle on everything emitted so far.
    pub fn log(&self) -> MetricLog {
        self.log.clone()
    }
}

impl Default for RewardPlugin {
    fn default() -> Self {
        Self::new(1000, vec![WindowStat::Mean])
    }
}

impl StrategyPlugin for RewardPlugin {
    fn after_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.stats.update(ctx.episode_returns.iter().copied());
        Ok(())
    }

    fn after_update(&mut self, ctx: &TrainingContext) -> Result<()> {
        emit(&self.log, &self.stats, "Reward", ctx.total_steps);
        Ok(())
    }
}

/// Windowed statistics of episode lengths, emitted at the end of every experience.
#[derive(Debug)]
pub struct EpisodeLengthPlugin {
    pub stats: MovingWindowedStats,
    log: MetricLog,
}

impl EpisodeLengthPlugin {
    pub fn new(window_size: usize, stats: Vec<WindowStat>) -> Self {
        Self {
            stats: MovingWindowedStats::new(window_size, stats),
            log: MetricLog::default(),
        }
    }

    pub fn log(&self) -> MetricLog {
        self.log.clone()
    }
}

impl Default for EpisodeLengthPlugin {
    fn default() -> Self {
        Self::new(1000, vec![WindowStat::Mean])
    }
}

impl StrategyPlugin for EpisodeLengthPlugin {
    fn after_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        self.stats
            .update(ctx.episode_lengths.iter().map(|len| *len as f32));
        Ok(())
    }

    fn after_training_exp(&mut self, ctx: &TrainingContext) -> Result<()> {
        emit(&self.log, &self.stats, "Episode Length", ctx.total_steps);
        Ok(())
    }
}
