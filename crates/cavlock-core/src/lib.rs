//! Lock acquisition and maintenance engine for an optical cavity.
//!
//! The crate drives one lock-in device through a full cycle: sweep the slow
//! thermal actuator until the cavity transmits, fit the demodulated error
//! signal to a lineshape-derivative model, engage feedback at the fitted
//! operating point, then watch lock health and compensate slow drift with a
//! learned nudge policy.

pub mod calibrate;
pub mod device;
pub mod drift;
pub mod env;
pub mod error;
pub mod scanner;
pub mod schedules;
pub mod supervisor;
pub mod trace;

pub use calibrate::{Calibrator, FitOptions, ResonanceFit};
pub use device::{
    ActuatorBounds, ActuatorChannel, CavityDevice, DemodulatorConfig, FeedbackConfig,
    FeedbackGains, SignalGeneratorConfig, SignalSource, TraceRequest, TriggerSource, Waveform,
};
pub use drift::{
    EpisodeSummary, ObservationGrid, QLearningConfig, QLearningController, QTable,
};
pub use env::{EnvAction, LockEnv, StepOutcome};
pub use error::{LockError, LockResult};
pub use scanner::{ResonanceScanner, ScanConfig, ScanOutcome};
pub use schedules::StagedEpsilon;
pub use supervisor::{
    EngageMode, EpisodeEnd, LockAcquisition, LockHealth, LockState, LockSupervisor,
    SettleTimings, SupervisorConfig,
};
pub use trace::{ScopeTrace, TraceChannel};
