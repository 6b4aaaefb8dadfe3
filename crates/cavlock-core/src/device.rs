use crate::error::LockResult;
use crate::trace::ScopeTrace;

/// Actuators available on the plant. The slow channel (thermal) moves the
/// cavity length over seconds; the fast channel (piezo) follows the error
/// signal at loop bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorChannel {
    SlowThermal,
    FastPiezo,
}

/// Waveforms the signal generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    HalfRamp,
    Dc,
    Sine,
}

/// Trigger condition for a scope acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Immediately,
    Ch1PositiveEdge,
}

/// Routable signals on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Output1,
    Output2,
    Input1,
    Input2,
    Demodulator,
    Generator,
}

/// Device-declared range for an actuator. Every writer clamps into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorBounds {
    pub min: f64,
    pub max: f64,
}

impl ActuatorBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Signal generator programming for the fast-actuator sweep or hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalGeneratorConfig {
    pub waveform: Waveform,
    pub amplitude: f64,
    pub offset: f64,
    pub frequency: f64,
    pub output: SignalSource,
}

impl SignalGeneratorConfig {
    /// Repeating half-ramp sweep across the full unipolar drive range.
    pub fn sweep(frequency: f64) -> Self {
        Self {
            waveform: Waveform::HalfRamp,
            amplitude: 0.5,
            offset: 0.5,
            frequency,
            output: SignalSource::Output1,
        }
    }

    /// Constant drive holding the fast actuator at `offset`.
    pub fn hold(offset: f64) -> Self {
        Self {
            waveform: Waveform::Dc,
            amplitude: 0.0,
            offset,
            frequency: 0.0,
            output: SignalSource::Output1,
        }
    }

    /// Generator parked: zero drive, no routed output.
    pub fn off() -> Self {
        Self {
            waveform: Waveform::Dc,
            amplitude: 0.0,
            offset: 0.0,
            frequency: 0.0,
            output: SignalSource::Output1,
        }
    }
}

/// I/Q demodulator programming producing the error signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemodulatorConfig {
    pub frequency: f64,
    pub phase: f64,
    pub bandwidth: f64,
    pub gain: f64,
    pub input: SignalSource,
    pub output: SignalSource,
}

impl DemodulatorConfig {
    /// Modulation sideband demodulation at the given phase, default routing.
    pub fn with_phase(phase: f64) -> Self {
        Self {
            frequency: 25e6,
            phase,
            bandwidth: 2e6,
            gain: 0.5,
            input: SignalSource::Input1,
            output: SignalSource::Output2,
        }
    }

    pub fn disabled() -> Self {
        Self {
            gain: 0.0,
            ..Self::with_phase(0.0)
        }
    }
}

/// Proportional/integral/derivative gains for the analog feedback path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl Default for FeedbackGains {
    fn default() -> Self {
        Self {
            p: 0.0,
            i: 1e3,
            d: 0.0,
        }
    }
}

/// Full feedback-path programming, including the calibrated setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackConfig {
    pub gains: FeedbackGains,
    pub setpoint: f64,
    pub input: SignalSource,
    pub output: SignalSource,
}

impl FeedbackConfig {
    pub fn engaged(gains: FeedbackGains, setpoint: f64) -> Self {
        Self {
            gains,
            setpoint,
            input: SignalSource::Demodulator,
            output: SignalSource::Output1,
        }
    }

    pub fn disabled() -> Self {
        Self {
            gains: FeedbackGains {
                p: 0.0,
                i: 0.0,
                d: 0.0,
            },
            setpoint: 0.0,
            input: SignalSource::Demodulator,
            output: SignalSource::Output1,
        }
    }
}

/// Scope acquisition request: two synchronous channels, one trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRequest {
    pub channel1: SignalSource,
    pub channel2: SignalSource,
    pub trigger: TriggerSource,
    pub decimation: u32,
}

impl TraceRequest {
    /// Fast drive on channel 1, cavity transmission monitor on channel 2.
    pub fn monitor() -> Self {
        Self {
            channel1: SignalSource::Output1,
            channel2: SignalSource::Input2,
            trigger: TriggerSource::Immediately,
            decimation: 256,
        }
    }

    /// Ramp-synchronous capture of the demodulated error signal against the
    /// drive voltage, used for calibration.
    pub fn error_ramp() -> Self {
        Self {
            channel1: SignalSource::Output1,
            channel2: SignalSource::Demodulator,
            trigger: TriggerSource::Ch1PositiveEdge,
            decimation: 256,
        }
    }

    /// Error signal on channel 1 with the transmission monitor alongside.
    pub fn error_with_monitor() -> Self {
        Self {
            channel1: SignalSource::Demodulator,
            channel2: SignalSource::Input2,
            trigger: TriggerSource::Immediately,
            decimation: 256,
        }
    }
}

/// Capability seam to the hardware. Every call is a blocking round-trip;
/// exactly one control loop may own an implementation at a time.
pub trait CavityDevice {
    /// Drives an actuator to an absolute value. Implementations clamp to
    /// their declared bounds.
    fn set_actuator(&mut self, channel: ActuatorChannel, value: f64) -> LockResult<()>;

    /// Reads back the last commanded actuator value.
    fn actuator(&self, channel: ActuatorChannel) -> f64;

    /// Declared range for an actuator channel.
    fn bounds(&self, channel: ActuatorChannel) -> ActuatorBounds;

    fn configure_signal_generator(&mut self, config: &SignalGeneratorConfig) -> LockResult<()>;

    fn configure_demodulator(&mut self, config: &DemodulatorConfig) -> LockResult<()>;

    fn configure_feedback(&mut self, config: &FeedbackConfig) -> LockResult<()>;

    /// Captures one synchronous two-channel trace.
    fn acquire_trace(&mut self, request: &TraceRequest) -> LockResult<ScopeTrace>;
}
