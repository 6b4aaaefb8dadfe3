use crate::error::{LockError, LockResult};

/// Which of the two synchronously captured channels to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceChannel {
    /// Channel 1: the drive/reference signal.
    Reference,
    /// Channel 2: the monitored signal (transmission or error).
    Monitor,
}

/// Two equal-length sample sequences captured in one scope acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTrace {
    reference: Vec<f64>,
    monitor: Vec<f64>,
}

impl ScopeTrace {
    pub fn new(reference: Vec<f64>, monitor: Vec<f64>) -> LockResult<Self> {
        if reference.len() != monitor.len() {
            return Err(LockError::TraceShapeMismatch {
                reference: reference.len(),
                monitor: monitor.len(),
            });
        }
        if reference.is_empty() {
            return Err(LockError::EmptyTrace);
        }
        Ok(Self { reference, monitor })
    }

    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    pub fn midpoint(&self) -> usize {
        self.len() / 2
    }

    pub fn reference(&self) -> &[f64] {
        &self.reference
    }

    pub fn monitor(&self) -> &[f64] {
        &self.monitor
    }

    fn samples(&self, channel: TraceChannel) -> &[f64] {
        match channel {
            TraceChannel::Reference => &self.reference,
            TraceChannel::Monitor => &self.monitor,
        }
    }

    /// Index of the first maximum sample on the chosen channel.
    pub fn peak_index(&self, channel: TraceChannel) -> usize {
        let samples = self.samples(channel);
        let mut best = 0;
        for (idx, value) in samples.iter().enumerate().skip(1) {
            if value.total_cmp(&samples[best]) == std::cmp::Ordering::Greater {
                best = idx;
            }
        }
        best
    }

    pub fn peak_value(&self, channel: TraceChannel) -> f64 {
        self.samples(channel)[self.peak_index(channel)]
    }

    pub fn mean(&self, channel: TraceChannel) -> f64 {
        let samples = self.samples(channel);
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Circularly rotates both channels so the chosen channel's peak lands
    /// at index 0. The rotation preserves the sample multiset.
    pub fn aligned_to_peak(&self, channel: TraceChannel) -> ScopeTrace {
        let peak = self.peak_index(channel);
        let mut reference = self.reference.clone();
        let mut monitor = self.monitor.clone();
        reference.rotate_left(peak);
        monitor.rotate_left(peak);
        ScopeTrace { reference, monitor }
    }
}
