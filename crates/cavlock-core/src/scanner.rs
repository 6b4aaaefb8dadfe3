use tracing::info;

use crate::device::{ActuatorChannel, CavityDevice, TraceRequest};
use crate::error::{LockError, LockResult};
use crate::trace::TraceChannel;

/// Sweep parameters for the slow-actuator resonance search.
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    /// Accepted distance, in samples, between the monitor peak and the
    /// trace midpoint.
    pub window: usize,
    /// Minimum normalised peak amplitude for a qualifying point.
    pub threshold: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 0.3,
            step: 0.00025,
            window: 500,
            threshold: 0.95,
        }
    }
}

/// Result of one sweep: a qualifying actuator value, or a normal negative
/// outcome when the sweep exhausts without one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanOutcome {
    Found(f64),
    NotFound,
}

/// Sweeps the slow actuator until a trace shows resonance at mid-sweep.
#[derive(Debug, Clone)]
pub struct ResonanceScanner {
    config: ScanConfig,
    channel: ActuatorChannel,
    request: TraceRequest,
}

impl ResonanceScanner {
    pub fn new(config: ScanConfig) -> LockResult<Self> {
        if !(config.step > 0.0) || !(config.stop > config.start) {
            return Err(LockError::InvalidScanRange {
                start: config.start,
                stop: config.stop,
                step: config.step,
            });
        }
        Ok(Self {
            config,
            channel: ActuatorChannel::SlowThermal,
            request: TraceRequest::monitor(),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Ascending sweep; the first qualifying point wins. Each candidate is a
    /// blocking set-then-acquire round-trip, which doubles as the settle
    /// interval between actuation and observation.
    pub fn scan<D: CavityDevice>(&self, device: &mut D) -> LockResult<ScanOutcome> {
        let steps = ((self.config.stop - self.config.start) / self.config.step).ceil() as usize;
        for index in 0..steps {
            let value = self.config.start + index as f64 * self.config.step;
            if value >= self.config.stop {
                break;
            }
            device.set_actuator(self.channel, value)?;
            let trace = device
                .acquire_trace(&self.request)?
                .aligned_to_peak(TraceChannel::Reference);

            let peak_index = trace.peak_index(TraceChannel::Monitor);
            let midpoint = trace.midpoint();
            let centred = peak_index.abs_diff(midpoint) <= self.config.window;
            if centred && trace.peak_value(TraceChannel::Monitor) >= self.config.threshold {
                info!(actuator = value, peak_index, "resonance found");
                return Ok(ScanOutcome::Found(value));
            }
        }
        Ok(ScanOutcome::NotFound)
    }
}
