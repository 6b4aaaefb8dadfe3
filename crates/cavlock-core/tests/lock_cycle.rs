//! End-to-end lock cycle against a simulated plant.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use cavlock_core::{
    calibrate::lineshape_derivative, ActuatorBounds, ActuatorChannel, CavityDevice,
    DemodulatorConfig, EngageMode, EnvAction, EpisodeEnd, FeedbackConfig, FeedbackGains, LockEnv,
    LockError, LockState, LockSupervisor, QLearningConfig, QLearningController, QTable,
    ResonanceScanner, ScanConfig, ScanOutcome, ScopeTrace, SettleTimings, SignalGeneratorConfig,
    SignalSource, SupervisorConfig, TraceRequest, TriggerSource,
};

const MONITOR_SAMPLES: usize = 1024;
const RAMP_SAMPLES: usize = 2001;
const LINE_AMPLITUDE: f64 = 1.0;
const LINE_WIDTH: f64 = 0.01;

/// Mutable plant truth, shared with the test so perturbations can be
/// injected after the supervisor takes ownership of the device.
struct PlantState {
    /// Slow-actuator value at which the cavity transmits.
    resonance: f64,
    /// Transmission peak while on resonance or held by feedback.
    monitor_amplitude: f64,
    /// Amplitude lost per health observation while feedback is engaged,
    /// simulating uncompensated slow drift.
    decay_per_check: f64,
    /// Level the demodulated error signal holds at while locked.
    error_level: f64,
}

/// Minimal cavity simulation.
///
/// Transmission peaks at the trace midpoint when the slow actuator sits
/// within half a scan step of the resonance, or whenever the feedback path
/// is engaged (the fast loop is assumed to hold the lock). The calibration
/// ramp always reproduces one clean lineshape derivative.
struct SimulatedCavity {
    state: Rc<RefCell<PlantState>>,
    slow: f64,
    fast: f64,
    feedback: FeedbackConfig,
}

impl SimulatedCavity {
    fn new(state: Rc<RefCell<PlantState>>) -> Self {
        Self {
            state,
            slow: 0.0,
            fast: 0.0,
            feedback: FeedbackConfig::disabled(),
        }
    }

    fn engaged(&self) -> bool {
        let gains = self.feedback.gains;
        gains.p != 0.0 || gains.i != 0.0 || gains.d != 0.0
    }

    fn on_resonance(&self) -> bool {
        (self.slow - self.state.borrow().resonance).abs() <= 0.00025 / 2.0
    }

    /// Triangular transmission bump of the given height, peaking at `center`.
    fn bump(center: usize, height: f64) -> Vec<f64> {
        let half_width = 64.0;
        (0..MONITOR_SAMPLES)
            .map(|i| {
                let distance = (i as f64 - center as f64).abs();
                height * (1.0 - distance / half_width).max(0.0)
            })
            .collect()
    }

    fn monitor_channel(&self) -> Vec<f64> {
        let on_resonance = self.on_resonance();
        let mut state = self.state.borrow_mut();
        if self.engaged() {
            let amplitude = state.monitor_amplitude;
            state.monitor_amplitude -= state.decay_per_check;
            Self::bump(MONITOR_SAMPLES / 2, amplitude)
        } else if on_resonance {
            Self::bump(MONITOR_SAMPLES / 2, state.monitor_amplitude)
        } else {
            Self::bump(MONITOR_SAMPLES / 8, 0.2)
        }
    }

    /// Drive readback with its peak at index 0, so peak alignment is the
    /// identity and the monitor bump position is preserved.
    fn drive_channel() -> Vec<f64> {
        (0..MONITOR_SAMPLES)
            .map(|i| 1.0 - i as f64 / MONITOR_SAMPLES as f64)
            .collect()
    }

    fn calibration_ramp(&self) -> ScopeTrace {
        let xs: Vec<f64> = (0..RAMP_SAMPLES)
            .map(|i| -0.5 + i as f64 / (RAMP_SAMPLES - 1) as f64)
            .collect();
        let ys: Vec<f64> = xs
            .iter()
            .map(|&x| lineshape_derivative(x, LINE_AMPLITUDE, 0.0, LINE_WIDTH, 0.0))
            .collect();
        ScopeTrace::new(xs, ys).unwrap()
    }
}

impl CavityDevice for SimulatedCavity {
    fn set_actuator(&mut self, channel: ActuatorChannel, value: f64) -> Result<(), LockError> {
        let clamped = self.bounds(channel).clamp(value);
        match channel {
            ActuatorChannel::SlowThermal => self.slow = clamped,
            ActuatorChannel::FastPiezo => self.fast = clamped,
        }
        Ok(())
    }

    fn actuator(&self, channel: ActuatorChannel) -> f64 {
        match channel {
            ActuatorChannel::SlowThermal => self.slow,
            ActuatorChannel::FastPiezo => self.fast,
        }
    }

    fn bounds(&self, channel: ActuatorChannel) -> ActuatorBounds {
        match channel {
            ActuatorChannel::SlowThermal => ActuatorBounds::new(0.0, 1.0),
            ActuatorChannel::FastPiezo => ActuatorBounds::new(-1.0, 1.0),
        }
    }

    fn configure_signal_generator(
        &mut self,
        _config: &SignalGeneratorConfig,
    ) -> Result<(), LockError> {
        Ok(())
    }

    fn configure_demodulator(&mut self, _config: &DemodulatorConfig) -> Result<(), LockError> {
        Ok(())
    }

    fn configure_feedback(&mut self, config: &FeedbackConfig) -> Result<(), LockError> {
        self.feedback = *config;
        Ok(())
    }

    fn acquire_trace(&mut self, request: &TraceRequest) -> Result<ScopeTrace, LockError> {
        if request.trigger == TriggerSource::Ch1PositiveEdge {
            return Ok(self.calibration_ramp());
        }
        if request.channel1 == SignalSource::Demodulator {
            let error = self.state.borrow().error_level;
            return ScopeTrace::new(vec![error; MONITOR_SAMPLES], self.monitor_channel());
        }
        ScopeTrace::new(Self::drive_channel(), self.monitor_channel())
    }
}

fn plant(resonance: f64, monitor_amplitude: f64) -> (Rc<RefCell<PlantState>>, SimulatedCavity) {
    let state = Rc::new(RefCell::new(PlantState {
        resonance,
        monitor_amplitude,
        decay_per_check: 0.0,
        error_level: 0.0,
    }));
    let device = SimulatedCavity::new(Rc::clone(&state));
    (state, device)
}

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        timings: SettleTimings::immediate(),
        ..SupervisorConfig::default()
    }
}

#[test]
fn scanner_finds_the_resonant_actuator_value() {
    let (_state, mut device) = plant(0.15, 0.97);
    let scanner = ResonanceScanner::new(ScanConfig::default()).unwrap();

    match scanner.scan(&mut device).unwrap() {
        ScanOutcome::Found(value) => assert!((value - 0.15).abs() <= 0.00025 / 2.0),
        ScanOutcome::NotFound => panic!("resonance missed"),
    }
}

#[test]
fn full_cycle_locks_on_the_first_attempt() {
    let (_state, device) = plant(0.15, 0.97);
    let mut supervisor = LockSupervisor::new(device, fast_config()).unwrap();

    let acquisition = supervisor.acquire().unwrap();
    assert_eq!(acquisition.attempts, 1);
    assert!((acquisition.resonance_actuator - 0.15).abs() <= 0.00025 / 2.0);
    assert!((acquisition.fit.amplitude - LINE_AMPLITUDE).abs() < 1e-2);
    assert!((acquisition.fit.width - LINE_WIDTH).abs() < 1e-3);
    assert!(acquisition.fit.center.abs() < 1e-3);

    assert_eq!(supervisor.state(), LockState::Locked);
    assert_eq!(
        supervisor.transitions(),
        [
            LockState::Reset,
            LockState::Scanning,
            LockState::Calibrating,
            LockState::Engaging,
            LockState::Locked,
        ]
    );
    assert!(supervisor.setpoint().unwrap().abs() < 1e-3);
    assert!(supervisor.check_health().unwrap().locked);
}

#[test]
fn acquisition_gives_up_after_the_attempt_budget() {
    // Resonance outside the sweep range: every attempt exhausts the scan.
    let (_state, device) = plant(0.5, 0.97);
    let config = SupervisorConfig {
        max_attempts: 2,
        ..fast_config()
    };
    let mut supervisor = LockSupervisor::new(device, config).unwrap();

    let err = supervisor.acquire().unwrap_err();
    assert!(matches!(err, LockError::AttemptsExhausted { attempts: 2 }));
    assert_ne!(supervisor.state(), LockState::Locked);
}

#[test]
fn continuous_hold_reports_loss_when_transmission_drifts_away() {
    let (state, device) = plant(0.15, 0.97);
    state.borrow_mut().decay_per_check = 0.01;
    let mut supervisor = LockSupervisor::new(device, fast_config()).unwrap();

    supervisor.acquire().unwrap();
    let end = supervisor.hold_until_lost().unwrap();
    assert_eq!(end, EpisodeEnd::LostAfterLock);
    assert_eq!(supervisor.state(), LockState::Lost);
}

#[test]
fn episode_terminates_strictly_below_the_health_threshold() {
    let (state, device) = plant(0.15, 0.97);
    let supervisor = LockSupervisor::new(device, fast_config()).unwrap();
    let mut env = LockEnv::new(supervisor);

    let (observation, info) = env.reset().unwrap();
    assert!((observation - 0.97).abs() < 1e-12);
    assert_eq!(info["attempts"], 1.0);

    // Exactly at the threshold the lock still counts as held.
    state.borrow_mut().monitor_amplitude = 0.95;
    let outcome = env.step(EnvAction::Nudge(0.0)).unwrap();
    assert!(!outcome.terminated);
    assert!(!outcome.truncated);
    assert!(outcome.reward.abs() < 1e-12);

    state.borrow_mut().monitor_amplitude = 0.9499;
    let outcome = env.step(EnvAction::Nudge(0.0)).unwrap();
    assert!(outcome.terminated);
    assert!(!outcome.truncated);
    assert!(outcome.reward < 0.0);
}

#[test]
fn gains_step_observes_the_held_error_and_rewards_setpoint_distance() {
    let (state, device) = plant(0.15, 0.97);
    state.borrow_mut().error_level = 0.02;
    let supervisor = LockSupervisor::new(device, fast_config()).unwrap();
    let mut env = LockEnv::new(supervisor);
    env.reset().unwrap();

    let gains = FeedbackGains {
        p: 0.1,
        i: 500.0,
        d: 0.0,
    };
    let outcome = env.step(EnvAction::Gains(gains)).unwrap();
    assert!((outcome.observation - 0.02).abs() < 1e-9);
    // Setpoint fitted near zero, so the penalty tracks the held error.
    assert!(outcome.reward < 0.0);
    assert!((outcome.reward + 0.02).abs() < 2e-3);
    assert!(!outcome.terminated);

    state.borrow_mut().monitor_amplitude = 0.90;
    let outcome = env.step(EnvAction::Gains(gains)).unwrap();
    assert!(outcome.terminated);
    assert!(!outcome.truncated);
}

#[test]
fn step_waits_the_configured_settle_intervals() {
    let (_state, device) = plant(0.15, 0.97);
    let config = SupervisorConfig {
        timings: SettleTimings {
            pre_action: Duration::from_millis(30),
            post_action: Duration::from_millis(30),
            ..SettleTimings::immediate()
        },
        ..SupervisorConfig::default()
    };
    let mut env = LockEnv::new(LockSupervisor::new(device, config).unwrap());
    env.reset().unwrap();

    let started = Instant::now();
    env.step(EnvAction::Nudge(0.0)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));

    let started = Instant::now();
    env.step(EnvAction::Gains(FeedbackGains::default())).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[test]
fn q_learning_episode_persists_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let table_path = dir.path().join("qtable.json");

    // Nudge-mode supervision: any off-resonance nudge loses the lock, so
    // the episode is short but exercises the full observe/act/update loop.
    let (_state, device) = plant(0.15, 0.97);
    let config = SupervisorConfig {
        engage: EngageMode::ActuatorNudge,
        ..fast_config()
    };
    let mut supervisor = LockSupervisor::new(device, config).unwrap();

    let learner_config = QLearningConfig {
        table_path: Some(table_path.clone()),
        ..QLearningConfig::default()
    };
    let mut controller = QLearningController::with_seed(learner_config, Some(42)).unwrap();

    let summary = controller.run_episode(&mut supervisor).unwrap();
    assert_eq!(summary.episode, 0);
    assert_eq!(summary.end, EpisodeEnd::LostAfterLock);
    assert!(summary.ticks >= 1);

    // The persisted table reloads with the configured discretisation.
    assert!(table_path.exists());
    let reloaded = QTable::load(&table_path, 21, 5).unwrap();
    assert_eq!(reloaded.states(), 21);
    assert_eq!(reloaded.actions(), 5);
}

#[test]
fn never_locked_episode_is_reported_not_raised() {
    let (_state, device) = plant(0.5, 0.97);
    let config = SupervisorConfig {
        engage: EngageMode::ActuatorNudge,
        max_attempts: 1,
        ..fast_config()
    };
    let mut supervisor = LockSupervisor::new(device, config).unwrap();

    let mut controller =
        QLearningController::with_seed(QLearningConfig::default(), Some(7)).unwrap();
    let summary = controller.run_episode(&mut supervisor).unwrap();
    assert_eq!(summary.end, EpisodeEnd::NeverLocked);
    assert_eq!(summary.ticks, 0);
}
