/// Staged exploration schedule for epsilon-greedy drift control.
///
/// Exploration is stepped down once at a configured episode count rather
/// than annealed continuously: the plant is slow enough that a long initial
/// exploration phase is required before the table is worth trusting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagedEpsilon {
    initial: f64,
    reduced: f64,
    switch_episode: u32,
}

impl StagedEpsilon {
    pub fn new(initial: f64, reduced: f64, switch_episode: u32) -> Self {
        Self {
            initial: initial.clamp(0.0, 1.0),
            reduced: reduced.clamp(0.0, 1.0),
            switch_episode,
        }
    }

    /// Constant exploration rate.
    pub fn flat(epsilon: f64) -> Self {
        Self::new(epsilon, epsilon, 0)
    }

    pub fn value(&self, episode: u32) -> f64 {
        if episode >= self.switch_episode {
            self.reduced
        } else {
            self.initial
        }
    }

    pub fn parameters(&self) -> (f64, f64, u32) {
        (self.initial, self.reduced, self.switch_episode)
    }
}

impl Default for StagedEpsilon {
    fn default() -> Self {
        Self::new(0.7, 0.3, 1000)
    }
}
