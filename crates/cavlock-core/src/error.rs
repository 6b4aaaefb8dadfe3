use std::fmt;

/// Error type covering device faults, calibration failures, and invalid
/// controller configuration.
///
/// Lock loss is deliberately absent: losing lock is a normal episode
/// boundary, reported through [`crate::supervisor::EpisodeEnd`].
#[derive(Debug, Clone, PartialEq)]
pub enum LockError {
    /// The device transport reported a fault during a blocking round-trip.
    Device(String),
    /// The two trace channels were captured with different sample counts.
    TraceShapeMismatch { reference: usize, monitor: usize },
    /// A trace with zero samples cannot be searched or fitted.
    EmptyTrace,
    /// Scan sweep bounds or step were not a valid ascending range.
    InvalidScanRange { start: f64, stop: f64, step: f64 },
    /// The least-squares fit ran out of iterations without converging.
    FitDiverged { iterations: usize },
    /// The fit converged onto a non-finite or degenerate parameter.
    NonFiniteFit,
    /// Discount factor must stay within the closed interval [0, 1].
    InvalidDiscount { discount: f64 },
    /// Learning rate must be strictly positive.
    InvalidLearningRate { rate: f64 },
    /// Observation grid or action set was configured empty.
    InvalidDiscretisation { states: usize, actions: usize },
    /// A persisted Q-table did not match the configured dimensions.
    TableShape { expected: usize, received: usize },
    /// Every bounded lock attempt failed.
    AttemptsExhausted { attempts: u32 },
    /// Q-table could not be read from or written to disk.
    Persistence(String),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(message) => write!(f, "device fault: {message}"),
            Self::TraceShapeMismatch { reference, monitor } => write!(
                f,
                "trace channels must be equal length (reference {reference}, monitor {monitor})"
            ),
            Self::EmptyTrace => write!(f, "trace contains no samples"),
            Self::InvalidScanRange { start, stop, step } => write!(
                f,
                "scan range must ascend with a positive step; got [{start}, {stop}) step {step}"
            ),
            Self::FitDiverged { iterations } => {
                write!(f, "curve fit did not converge within {iterations} iterations")
            }
            Self::NonFiniteFit => write!(f, "curve fit produced a non-finite parameter"),
            Self::InvalidDiscount { discount } => {
                write!(f, "discount factor must lie in [0, 1]; received {discount}")
            }
            Self::InvalidLearningRate { rate } => {
                write!(f, "learning rate must be positive; received {rate}")
            }
            Self::InvalidDiscretisation { states, actions } => write!(
                f,
                "discretisation needs non-zero states and actions; got {states} x {actions}"
            ),
            Self::TableShape { expected, received } => write!(
                f,
                "persisted Q-table holds {received} entries but the controller expects {expected}"
            ),
            Self::AttemptsExhausted { attempts } => {
                write!(f, "lock not acquired after {attempts} attempts")
            }
            Self::Persistence(message) => write!(f, "q-table persistence failed: {message}"),
        }
    }
}

impl std::error::Error for LockError {}

/// Convenient result alias for the lock engine.
pub type LockResult<T> = Result<T, LockError>;

impl LockError {
    /// Recoverable failures are retried by the supervisor's bounded loop;
    /// everything else aborts the acquisition attempt chain.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Device(_) | Self::FitDiverged { .. } | Self::NonFiniteFit
        )
    }
}
