use std::collections::HashMap;
use std::thread;

use crate::device::{CavityDevice, FeedbackGains, TraceRequest};
use crate::error::LockResult;
use crate::supervisor::LockSupervisor;
use crate::trace::TraceChannel;

/// Actions accepted by the episodic environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvAction {
    /// Increment the slow actuator by this amount.
    Nudge(f64),
    /// Reprogram the feedback gains, keeping the calibrated setpoint.
    Gains(FeedbackGains),
}

/// One environment transition.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: f64,
    pub reward: f64,
    /// True exactly when the monitor peak falls strictly below the health
    /// threshold. Episodes never truncate on a step budget.
    pub terminated: bool,
    pub truncated: bool,
    pub info: HashMap<String, f64>,
}

/// Episodic reset/step facade over the lock supervisor, for controller
/// experimentation outside the built-in Q-learning loop.
pub struct LockEnv<D: CavityDevice> {
    supervisor: LockSupervisor<D>,
}

impl<D: CavityDevice> LockEnv<D> {
    pub fn new(supervisor: LockSupervisor<D>) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &LockSupervisor<D> {
        &self.supervisor
    }

    /// Acquires the lock from scratch and returns the initial observation
    /// (the monitor peak) plus acquisition metadata.
    pub fn reset(&mut self) -> LockResult<(f64, HashMap<String, f64>)> {
        let acquisition = self.supervisor.acquire()?;
        let health = self.supervisor.check_health()?;
        let mut info = HashMap::new();
        info.insert("attempts".to_owned(), f64::from(acquisition.attempts));
        info.insert("setpoint".to_owned(), acquisition.fit.offset);
        info.insert("actuator".to_owned(), acquisition.resonance_actuator);
        Ok((health.monitor_peak, info))
    }

    /// Settle, apply, settle again, then reacquire. The settle intervals
    /// bound plant settling and must not be elided.
    pub fn step(&mut self, action: EnvAction) -> LockResult<StepOutcome> {
        let timings = self.supervisor.config().timings;
        let mut info = HashMap::new();
        thread::sleep(timings.pre_action);
        let (observation, reward, health) = match action {
            EnvAction::Nudge(delta) => {
                let commanded = self.supervisor.nudge_slow_actuator(delta)?;
                info.insert("actuator".to_owned(), commanded);
                thread::sleep(timings.post_action);
                let health = self.supervisor.check_health()?;
                // Reward the margin above the health threshold.
                let reward = health.monitor_peak - self.supervisor.health_threshold();
                (health.monitor_peak, reward, health)
            }
            EnvAction::Gains(gains) => {
                self.supervisor.apply_gains(gains)?;
                thread::sleep(timings.post_action);
                let trace = self
                    .supervisor
                    .acquire_trace(&TraceRequest::error_with_monitor())?;
                let observation = trace.mean(TraceChannel::Reference);
                let setpoint = self.supervisor.setpoint().unwrap_or(0.0);
                // Penalise distance of the held error signal from the
                // calibrated setpoint.
                let health = self.supervisor.check_health()?;
                (observation, -(observation - setpoint).abs(), health)
            }
        };

        let terminated = !health.locked;
        info.insert("monitor_peak".to_owned(), health.monitor_peak);
        Ok(StepOutcome {
            observation,
            reward,
            terminated,
            truncated: false,
            info,
        })
    }
}
