use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::calibrate::{Calibrator, FitOptions, ResonanceFit};
use crate::device::{
    ActuatorChannel, CavityDevice, DemodulatorConfig, FeedbackConfig, FeedbackGains,
    SignalGeneratorConfig, TraceRequest,
};
use crate::error::{LockError, LockResult};
use crate::scanner::{ResonanceScanner, ScanConfig, ScanOutcome};
use crate::trace::{ScopeTrace, TraceChannel};

/// Scope record length times decimation at the 8 ns base sample period;
/// the sweep frequency is chosen so one half-ramp fills one record.
const SWEEP_RECORD_SECONDS: f64 = 8e-9 * (1 << 14) as f64 * 256.0;

/// Lock acquisition lifecycle. Owned and mutated solely by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Reset,
    Scanning,
    Calibrating,
    Engaging,
    Locked,
    Lost,
}

/// How the drift against slow perturbations is held once locked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngageMode {
    /// Program the analog feedback path with these gains and the fitted
    /// setpoint; the hardware holds the lock.
    ContinuousFeedback(FeedbackGains),
    /// Leave the feedback path unconfigured; a discrete controller nudges
    /// the slow actuator instead.
    ActuatorNudge,
}

/// Fixed settle intervals between actuation and the next observation.
/// These bound electrical and thermal settling and must not be elided.
#[derive(Debug, Clone, Copy)]
pub struct SettleTimings {
    /// Wait after the scan finds resonance, before calibrating.
    pub post_scan: Duration,
    /// Wait before each drift-control action.
    pub pre_action: Duration,
    /// Wait between an actuator nudge and the follow-up acquisition.
    pub post_action: Duration,
    /// Interval between health checks while locked.
    pub health_poll: Duration,
    /// Backoff between failed lock attempts.
    pub retry_backoff: Duration,
}

impl Default for SettleTimings {
    fn default() -> Self {
        Self {
            post_scan: Duration::from_secs(10),
            pre_action: Duration::from_millis(1),
            post_action: Duration::from_micros(100),
            health_poll: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl SettleTimings {
    /// All-zero timings for simulated plants.
    pub fn immediate() -> Self {
        Self {
            post_scan: Duration::ZERO,
            pre_action: Duration::ZERO,
            post_action: Duration::ZERO,
            health_poll: Duration::ZERO,
            retry_backoff: Duration::ZERO,
        }
    }
}

/// Supervisor tuning. Defaults carry the deployed system's constants.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub scan: ScanConfig,
    pub fit: FitOptions,
    pub engage: EngageMode,
    pub timings: SettleTimings,
    /// Bound on full-cycle retries before acquisition gives up.
    pub max_attempts: u32,
    /// Normalised monitor peak below which the lock counts as lost.
    pub health_threshold: f64,
    /// Half-ramp sweep frequency on the fast actuator.
    pub sweep_frequency: f64,
    /// Demodulation phase while locking, degrees.
    pub demodulation_phase: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            fit: FitOptions::default(),
            engage: EngageMode::ContinuousFeedback(FeedbackGains::default()),
            timings: SettleTimings::default(),
            max_attempts: 8,
            health_threshold: 0.95,
            sweep_frequency: 1.0 / SWEEP_RECORD_SECONDS,
            demodulation_phase: 20.0,
        }
    }
}

/// Successful acquisition summary.
#[derive(Debug, Clone)]
pub struct LockAcquisition {
    /// Attempts consumed, 1 when the first cycle locked.
    pub attempts: u32,
    /// Slow-actuator value at which resonance was found.
    pub resonance_actuator: f64,
    pub fit: ResonanceFit,
}

/// One health observation while locked.
#[derive(Debug, Clone, Copy)]
pub struct LockHealth {
    /// Peak of the transmission monitor, the lock-health figure and the
    /// drift controller's observation.
    pub monitor_peak: f64,
    pub locked: bool,
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeEnd {
    /// Lock was never achieved within the bounded attempt budget.
    NeverLocked,
    /// Lock was held, then the health threshold was breached.
    LostAfterLock,
}

/// Sequences scan -> calibrate -> engage -> monitor over one device.
///
/// The supervisor owns the device: the plant admits exactly one control
/// loop, so every collaborator reaches the hardware through these methods.
pub struct LockSupervisor<D: CavityDevice> {
    device: D,
    config: SupervisorConfig,
    scanner: ResonanceScanner,
    calibrator: Calibrator,
    state: LockState,
    transitions: Vec<LockState>,
    setpoint: Option<f64>,
    last_calibration: Option<(ScopeTrace, ResonanceFit)>,
}

impl<D: CavityDevice> LockSupervisor<D> {
    pub fn new(device: D, config: SupervisorConfig) -> LockResult<Self> {
        let scanner = ResonanceScanner::new(config.scan)?;
        let calibrator = Calibrator::new(config.fit);
        Ok(Self {
            device,
            config,
            scanner,
            calibrator,
            state: LockState::Reset,
            transitions: vec![LockState::Reset],
            setpoint: None,
            last_calibration: None,
        })
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Every state entered so far, in order, starting at RESET.
    pub fn transitions(&self) -> &[LockState] {
        &self.transitions
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Fitted setpoint (the model offset B) from the last calibration.
    pub fn setpoint(&self) -> Option<f64> {
        self.setpoint
    }

    pub fn health_threshold(&self) -> f64 {
        self.config.health_threshold
    }

    /// Ramp trace and fit retained from the last calibration, for offline
    /// diagnosis.
    pub fn last_calibration(&self) -> Option<&(ScopeTrace, ResonanceFit)> {
        self.last_calibration.as_ref()
    }

    fn set_state(&mut self, next: LockState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "lock state transition");
            self.state = next;
            self.transitions.push(next);
        }
    }

    /// Parks every output and returns both actuators to neutral.
    fn reset_plant(&mut self) -> LockResult<()> {
        self.set_state(LockState::Reset);
        self.device
            .configure_signal_generator(&SignalGeneratorConfig::off())?;
        self.device
            .configure_demodulator(&DemodulatorConfig::disabled())?;
        self.device.configure_feedback(&FeedbackConfig::disabled())?;
        self.device.set_actuator(ActuatorChannel::SlowThermal, 0.0)?;
        self.device.set_actuator(ActuatorChannel::FastPiezo, 0.0)?;
        Ok(())
    }

    /// Engages the repeating error-signal sweep: half-ramp on the fast
    /// actuator plus demodulation at the configured phase.
    fn engage_ramp(&mut self) -> LockResult<()> {
        self.device
            .configure_signal_generator(&SignalGeneratorConfig::sweep(
                self.config.sweep_frequency,
            ))?;
        self.device
            .configure_demodulator(&DemodulatorConfig::with_phase(
                self.config.demodulation_phase,
            ))?;
        Ok(())
    }

    /// One full RESET -> LOCKED cycle attempt. Recoverable failures are
    /// reported as errors so the bounded loop in [`acquire`] can count them.
    fn attempt_lock(&mut self) -> LockResult<Option<LockAcquisition>> {
        self.reset_plant()?;
        self.engage_ramp()?;
        self.set_state(LockState::Scanning);

        let resonance_actuator = match self.scanner.scan(&mut self.device)? {
            ScanOutcome::Found(value) => value,
            ScanOutcome::NotFound => return Ok(None),
        };

        thread::sleep(self.config.timings.post_scan);
        self.set_state(LockState::Calibrating);
        let ramp = self.device.acquire_trace(&TraceRequest::error_ramp())?;
        let fit = match self.calibrator.calibrate(&ramp) {
            Ok(fit) => fit,
            Err(err) if err.is_recoverable() => {
                warn!(%err, "calibration failed, rescanning");
                self.set_state(LockState::Scanning);
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        self.set_state(LockState::Engaging);
        // Park the sweep and hold the fast drive DC at the fitted center.
        self.device
            .configure_signal_generator(&SignalGeneratorConfig::hold(fit.center))?;
        if let EngageMode::ContinuousFeedback(gains) = self.config.engage {
            self.device
                .configure_feedback(&FeedbackConfig::engaged(gains, fit.offset))?;
        }
        self.setpoint = Some(fit.offset);
        self.last_calibration = Some((ramp, fit));

        // No independent convergence check: the feedback path being
        // configured is the locked condition.
        self.set_state(LockState::Locked);
        Ok(Some(LockAcquisition {
            attempts: 0,
            resonance_actuator,
            fit,
        }))
    }

    /// Runs RESET -> LOCKED with a bounded full-cycle retry on recoverable
    /// failure (scan exhaustion, fit failure, device fault).
    pub fn acquire(&mut self) -> LockResult<LockAcquisition> {
        for attempt in 1..=self.config.max_attempts {
            match self.attempt_lock() {
                Ok(Some(mut acquisition)) => {
                    acquisition.attempts = attempt;
                    info!(
                        attempt,
                        actuator = acquisition.resonance_actuator,
                        setpoint = acquisition.fit.offset,
                        "cavity locked"
                    );
                    return Ok(acquisition);
                }
                Ok(None) => {
                    warn!(attempt, "sweep exhausted without resonance");
                }
                Err(err) if err.is_recoverable() => {
                    warn!(attempt, %err, "lock attempt failed");
                }
                Err(err) => return Err(err),
            }
            thread::sleep(self.config.timings.retry_backoff);
        }
        Err(LockError::AttemptsExhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// Acquires one trace through the supervisor-owned device.
    pub fn acquire_trace(&mut self, request: &TraceRequest) -> LockResult<ScopeTrace> {
        self.device.acquire_trace(request)
    }

    /// One health observation. Transitions LOCKED -> LOST when the monitor
    /// peak falls strictly below the health threshold.
    pub fn check_health(&mut self) -> LockResult<LockHealth> {
        let trace = self.device.acquire_trace(&TraceRequest::monitor())?;
        let monitor_peak = trace.peak_value(TraceChannel::Monitor);
        let locked = monitor_peak >= self.config.health_threshold;
        if !locked && self.state == LockState::Locked {
            info!(monitor_peak, "lock lost");
            self.set_state(LockState::Lost);
        }
        Ok(LockHealth {
            monitor_peak,
            locked,
        })
    }

    /// Increments the slow actuator, clamped to the device bounds, and
    /// returns the value actually commanded.
    pub fn nudge_slow_actuator(&mut self, delta: f64) -> LockResult<f64> {
        let channel = ActuatorChannel::SlowThermal;
        let bounds = self.device.bounds(channel);
        let target = bounds.clamp(self.device.actuator(channel) + delta);
        self.device.set_actuator(channel, target)?;
        Ok(target)
    }

    /// Reprograms the feedback gains, keeping the calibrated setpoint.
    pub fn apply_gains(&mut self, gains: FeedbackGains) -> LockResult<()> {
        let setpoint = self.setpoint.unwrap_or(0.0);
        self.device
            .configure_feedback(&FeedbackConfig::engaged(gains, setpoint))
    }

    /// Continuous-feedback maintenance: polls lock health until it is lost.
    /// The hardware feedback path does the holding; this loop only watches.
    pub fn hold_until_lost(&mut self) -> LockResult<EpisodeEnd> {
        loop {
            thread::sleep(self.config.timings.health_poll);
            if !self.check_health()?.locked {
                return Ok(EpisodeEnd::LostAfterLock);
            }
        }
    }
}
