use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::CavityDevice;
use crate::error::{LockError, LockResult};
use crate::schedules::StagedEpsilon;
use crate::supervisor::{EpisodeEnd, LockSupervisor};

/// Uniform binning of a bounded continuous observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObservationGrid {
    pub min: f64,
    pub max: f64,
    pub bins: usize,
}

impl ObservationGrid {
    pub fn new(min: f64, max: f64, bins: usize) -> Self {
        Self { min, max, bins }
    }

    /// Bin index for a value; out-of-range values saturate at the edges.
    pub fn bin(&self, value: f64) -> usize {
        let span = self.max - self.min;
        let raw = ((value - self.min) / span * self.bins as f64).floor();
        (raw.max(0.0) as usize).min(self.bins - 1)
    }
}

impl Default for ObservationGrid {
    fn default() -> Self {
        Self::new(-1.0, 1.0, 21)
    }
}

/// Dense state x action value table, persisted as JSON between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QTable {
    states: usize,
    actions: usize,
    values: Vec<f64>,
}

impl QTable {
    pub fn zeros(states: usize, actions: usize) -> Self {
        Self {
            states,
            actions,
            values: vec![0.0; states * actions],
        }
    }

    pub fn states(&self) -> usize {
        self.states
    }

    pub fn actions(&self) -> usize {
        self.actions
    }

    pub fn q(&self, state: usize, action: usize) -> f64 {
        self.values[state * self.actions + action]
    }

    /// Greedy action for a state. Ties resolve to the lowest action index.
    pub fn best_action(&self, state: usize) -> usize {
        let row = &self.values[state * self.actions..(state + 1) * self.actions];
        let mut best = 0;
        for (idx, value) in row.iter().enumerate().skip(1) {
            if value.total_cmp(&row[best]) == std::cmp::Ordering::Greater {
                best = idx;
            }
        }
        best
    }

    pub fn max_q(&self, state: usize) -> f64 {
        self.q(state, self.best_action(state))
    }

    /// One temporal-difference backup.
    pub fn update(
        &mut self,
        state: usize,
        action: usize,
        reward: f64,
        next_state: usize,
        learning_rate: f64,
        discount: f64,
    ) {
        let target = reward + discount * self.max_q(next_state);
        let cell = &mut self.values[state * self.actions + action];
        *cell += learning_rate * (target - *cell);
    }

    pub fn save(&self, path: &Path) -> LockResult<()> {
        let payload = serde_json::to_string(self)
            .map_err(|err| LockError::Persistence(err.to_string()))?;
        fs::write(path, payload).map_err(|err| LockError::Persistence(err.to_string()))
    }

    /// Loads a table, validating its shape against the expected grid.
    pub fn load(path: &Path, states: usize, actions: usize) -> LockResult<Self> {
        let payload =
            fs::read_to_string(path).map_err(|err| LockError::Persistence(err.to_string()))?;
        let table: QTable = serde_json::from_str(&payload)
            .map_err(|err| LockError::Persistence(err.to_string()))?;
        if table.states != states
            || table.actions != actions
            || table.values.len() != states * actions
        {
            return Err(LockError::TableShape {
                expected: states * actions,
                received: table.values.len(),
            });
        }
        Ok(table)
    }
}

/// Tabular Q-learning parameters for the slow-drift controller.
#[derive(Debug, Clone)]
pub struct QLearningConfig {
    pub learning_rate: f64,
    pub discount: f64,
    pub epsilon: StagedEpsilon,
    pub grid: ObservationGrid,
    /// Slow-actuator increments selectable per tick.
    pub actions: Vec<f64>,
    /// Evaluation mode: greedy policy, no updates, no persistence.
    pub evaluation: bool,
    /// Where the table is persisted between episodes, if anywhere.
    pub table_path: Option<PathBuf>,
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.4,
            discount: 0.99,
            epsilon: StagedEpsilon::default(),
            grid: ObservationGrid::default(),
            actions: vec![-0.001, -0.0005, 0.0, 0.0005, 0.001],
            evaluation: false,
            table_path: None,
        }
    }
}

/// Outcome of one lock episode under the learned drift controller.
#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    pub episode: u32,
    /// Control ticks taken while locked.
    pub ticks: u64,
    pub total_reward: f64,
    pub end: EpisodeEnd,
}

/// Epsilon-greedy tabular Q-learning over slow-actuator nudges.
///
/// The controller observes the monitor-channel peak, discretised on the
/// observation grid, and picks one actuator increment per tick. Reward is 1
/// while the lock holds and 0 on the tick that loses it.
#[derive(Debug)]
pub struct QLearningController {
    config: QLearningConfig,
    table: QTable,
    rng: StdRng,
    episode: u32,
}

impl QLearningController {
    pub fn new(config: QLearningConfig, rng: StdRng) -> LockResult<Self> {
        if !(config.discount > 0.0 && config.discount < 1.0) {
            return Err(LockError::InvalidDiscount {
                discount: config.discount,
            });
        }
        if !(config.learning_rate > 0.0 && config.learning_rate <= 1.0) {
            return Err(LockError::InvalidLearningRate {
                rate: config.learning_rate,
            });
        }
        if config.grid.bins == 0 || config.actions.is_empty() {
            return Err(LockError::InvalidDiscretisation {
                states: config.grid.bins,
                actions: config.actions.len(),
            });
        }
        let table = match &config.table_path {
            Some(path) if path.exists() => {
                let table = QTable::load(path, config.grid.bins, config.actions.len())?;
                info!(path = %path.display(), "resumed value table");
                table
            }
            _ => QTable::zeros(config.grid.bins, config.actions.len()),
        };
        Ok(Self {
            config,
            table,
            rng,
            episode: 0,
        })
    }

    /// Builds a controller with a seed resolved through the determinism
    /// config (explicit seed, else environment, else entropy).
    pub fn with_seed(config: QLearningConfig, seed: Option<u64>) -> LockResult<Self> {
        let rng = cavlock_config::determinism::rng_from_optional(seed, "drift-controller");
        Self::new(config, rng)
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn episode(&self) -> u32 {
        self.episode
    }

    fn select_action(&mut self, state: usize) -> usize {
        let epsilon = if self.config.evaluation {
            0.0
        } else {
            self.config.epsilon.value(self.episode)
        };
        if self.rng.gen::<f64>() < epsilon {
            self.rng.gen_range(0..self.config.actions.len())
        } else {
            self.table.best_action(state)
        }
    }

    /// Runs one episode: acquire the lock, then nudge the slow actuator each
    /// tick until the lock is lost. The table is updated online and saved at
    /// episode end unless in evaluation mode.
    pub fn run_episode<D: CavityDevice>(
        &mut self,
        supervisor: &mut LockSupervisor<D>,
    ) -> LockResult<EpisodeSummary> {
        let episode = self.episode;
        self.episode += 1;

        match supervisor.acquire() {
            Ok(_) => {}
            Err(LockError::AttemptsExhausted { .. }) => {
                return Ok(EpisodeSummary {
                    episode,
                    ticks: 0,
                    total_reward: 0.0,
                    end: EpisodeEnd::NeverLocked,
                });
            }
            Err(err) => return Err(err),
        }

        let timings = supervisor.config().timings;
        let mut state = self
            .config
            .grid
            .bin(supervisor.check_health()?.monitor_peak);
        let mut ticks = 0u64;
        let mut total_reward = 0.0;

        loop {
            thread::sleep(timings.pre_action);
            let action = self.select_action(state);
            supervisor.nudge_slow_actuator(self.config.actions[action])?;
            thread::sleep(timings.post_action);

            let health = supervisor.check_health()?;
            let next_state = self.config.grid.bin(health.monitor_peak);
            let reward = if health.locked { 1.0 } else { 0.0 };
            total_reward += reward;
            ticks += 1;

            if !self.config.evaluation {
                self.table.update(
                    state,
                    action,
                    reward,
                    next_state,
                    self.config.learning_rate,
                    self.config.discount,
                );
            }
            debug!(episode, ticks, state, action, reward, "drift tick");
            state = next_state;

            if !health.locked {
                break;
            }
        }

        if !self.config.evaluation {
            if let Some(path) = &self.config.table_path {
                self.table.save(path)?;
            }
        }
        info!(episode, ticks, total_reward, "episode finished");
        Ok(EpisodeSummary {
            episode,
            ticks,
            total_reward,
            end: EpisodeEnd::LostAfterLock,
        })
    }
}
