use tracing::{debug, warn};

use crate::error::{LockError, LockResult};
use crate::trace::{ScopeTrace, TraceChannel};

/// Dispersive lineshape-derivative model evaluated at `x`:
/// f(x) = -2A(x - x0) / ((x - x0)^2 + g^2)^2 + B.
pub fn lineshape_derivative(x: f64, amplitude: f64, offset: f64, width: f64, center: f64) -> f64 {
    let u = x - center;
    let d = u * u + width * width;
    -2.0 * amplitude * u / (d * d) + offset
}

/// Converged parameters of the lineshape-derivative model.
///
/// `width` is strictly positive; the model is even in it, so a fit that
/// lands on a negative width is normalised to its magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResonanceFit {
    pub amplitude: f64,
    pub offset: f64,
    pub width: f64,
    pub center: f64,
}

impl ResonanceFit {
    pub fn evaluate(&self, x: f64) -> f64 {
        lineshape_derivative(x, self.amplitude, self.offset, self.width, self.center)
    }
}

/// Tuning for the nonlinear least-squares solver.
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Relative step / cost-change threshold treated as convergence.
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-12,
        }
    }
}

/// Fits the lineshape-derivative model to a ramp trace.
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    options: FitOptions,
}

impl Calibrator {
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }

    /// Initial-parameter heuristic over the paired (reference, monitor)
    /// samples. The amplitude's sign is not determined reliably here; the
    /// fit ladder tries both polarities.
    pub fn initial_guess(trace: &ScopeTrace) -> [f64; 4] {
        let offset = trace.mean(TraceChannel::Monitor);
        let ref_span = trace.peak_value(TraceChannel::Reference)
            - trace
                .reference()
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min);
        let width = ref_span / 10.0;
        let center = ref_span / 2.0;
        let amplitude = (trace.peak_value(TraceChannel::Monitor) - offset) * center.powi(3);
        [amplitude, offset, width, center]
    }

    /// Runs the fit, returning a recoverable error when the optimiser fails
    /// to converge or lands on a non-finite parameter.
    pub fn calibrate(&self, trace: &ScopeTrace) -> LockResult<ResonanceFit> {
        let xs = trace.reference();
        let ys = trace.monitor();

        let mut best: Option<([f64; 4], f64)> = None;
        for start in self.candidate_starts(trace) {
            match levenberg_marquardt(xs, ys, start, &self.options) {
                Ok((params, cost)) => {
                    if best.as_ref().map(|(_, c)| cost < *c).unwrap_or(true) {
                        best = Some((params, cost));
                    }
                }
                Err(err) => debug!(?start, %err, "fit start rejected"),
            }
        }

        let (params, cost) = best.ok_or(LockError::FitDiverged {
            iterations: self.options.max_iterations,
        })?;
        if params.iter().any(|p| !p.is_finite()) {
            return Err(LockError::NonFiniteFit);
        }
        let width = params[2].abs();
        if width == 0.0 {
            warn!("fit collapsed to zero linewidth");
            return Err(LockError::NonFiniteFit);
        }
        debug!(
            amplitude = params[0],
            offset = params[1],
            width,
            center = params[3],
            cost,
            "calibration fit converged"
        );
        Ok(ResonanceFit {
            amplitude: params[0],
            offset: params[1],
            width,
            center: params[3],
        })
    }

    /// Deterministic ladder of fit starts. The documented heuristic is
    /// always attempted first; refined starts re-anchor the center on the
    /// monitor extremum and walk the width down, since the heuristic's
    /// center and amplitude sign are unreliable on narrow lines.
    fn candidate_starts(&self, trace: &ScopeTrace) -> Vec<[f64; 4]> {
        let [amplitude, offset, width, center] = Self::initial_guess(trace);
        let mut starts = vec![[amplitude, offset, width, center]];

        let extremum_index = trace
            .monitor()
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                (*a - offset).abs().total_cmp(&(*b - offset).abs())
            })
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        let anchored_center = trace.reference()[extremum_index];
        let excursion = (trace.monitor()[extremum_index] - offset).abs();

        starts.push([-amplitude, offset, width, center]);
        for scale in [1.0, 0.1, 0.01] {
            let candidate_width = width * scale;
            // Peak height of the model scales as A / g^3, so anchor the
            // amplitude start on the observed excursion at this width.
            let anchored_amplitude = (excursion * candidate_width.powi(3)).max(f64::MIN_POSITIVE);
            for sign in [1.0, -1.0] {
                starts.push([
                    sign * anchored_amplitude,
                    offset,
                    candidate_width,
                    anchored_center,
                ]);
            }
        }
        starts
    }
}

/// Damped Gauss-Newton (Levenberg-Marquardt) over the four model parameters
/// with an analytic Jacobian. Returns the converged parameters and the final
/// sum of squared residuals.
fn levenberg_marquardt(
    xs: &[f64],
    ys: &[f64],
    start: [f64; 4],
    options: &FitOptions,
) -> LockResult<([f64; 4], f64)> {
    let mut params = start;
    let mut cost = residual_cost(xs, ys, &params);
    if !cost.is_finite() {
        return Err(LockError::NonFiniteFit);
    }
    let mut lambda = 1e-3;

    for _ in 0..options.max_iterations {
        let (jtj, jtr) = normal_equations(xs, ys, &params);

        loop {
            let mut damped = jtj;
            for k in 0..4 {
                damped[k][k] += lambda * jtj[k][k].max(1e-30);
            }
            let Some(step) = solve4(damped, [-jtr[0], -jtr[1], -jtr[2], -jtr[3]]) else {
                lambda *= 10.0;
                if lambda > 1e12 {
                    return Err(LockError::FitDiverged {
                        iterations: options.max_iterations,
                    });
                }
                continue;
            };

            let candidate = [
                params[0] + step[0],
                params[1] + step[1],
                params[2] + step[2],
                params[3] + step[3],
            ];
            let candidate_cost = residual_cost(xs, ys, &candidate);

            if candidate_cost.is_finite() && candidate_cost < cost {
                let step_small = step
                    .iter()
                    .zip(candidate.iter())
                    .all(|(delta, value)| delta.abs() <= options.tolerance * (value.abs() + 1.0));
                let cost_small =
                    (cost - candidate_cost) <= options.tolerance * cost.max(f64::MIN_POSITIVE);
                params = candidate;
                cost = candidate_cost;
                lambda = (lambda / 10.0).max(1e-12);
                if step_small || cost_small {
                    return Ok((params, cost));
                }
                break;
            }

            lambda *= 10.0;
            if lambda > 1e12 {
                return Err(LockError::FitDiverged {
                    iterations: options.max_iterations,
                });
            }
        }
    }

    Err(LockError::FitDiverged {
        iterations: options.max_iterations,
    })
}

fn residual_cost(xs: &[f64], ys: &[f64], params: &[f64; 4]) -> f64 {
    let [a, b, g, x0] = *params;
    xs.iter()
        .zip(ys.iter())
        .map(|(&x, &y)| {
            let r = lineshape_derivative(x, a, b, g, x0) - y;
            r * r
        })
        .sum()
}

/// Accumulates JᵀJ and Jᵀr for the current parameters.
fn normal_equations(xs: &[f64], ys: &[f64], params: &[f64; 4]) -> ([[f64; 4]; 4], [f64; 4]) {
    let [a, b, g, x0] = *params;
    let mut jtj = [[0.0f64; 4]; 4];
    let mut jtr = [0.0f64; 4];

    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let u = x - x0;
        let d = u * u + g * g;
        let d2 = d * d;
        let d3 = d2 * d;
        let residual = -2.0 * a * u / d2 + b - y;

        let grad = [
            -2.0 * u / d2,
            1.0,
            8.0 * a * u * g / d3,
            2.0 * a * (1.0 / d2 - 4.0 * u * u / d3),
        ];

        for row in 0..4 {
            jtr[row] += grad[row] * residual;
            for col in row..4 {
                jtj[row][col] += grad[row] * grad[col];
            }
        }
    }
    for row in 1..4 {
        for col in 0..row {
            jtj[row][col] = jtj[col][row];
        }
    }
    (jtj, jtr)
}

/// Solves a 4x4 linear system by Gaussian elimination with partial pivoting.
/// Returns `None` when the matrix is numerically singular.
fn solve4(mut m: [[f64; 4]; 4], mut rhs: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let mut pivot = col;
        for row in (col + 1)..4 {
            if m[row][col].abs() > m[pivot][col].abs() {
                pivot = row;
            }
        }
        if m[pivot][col].abs() < 1e-300 {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in (col + 1)..4 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = [0.0f64; 4];
    for row in (0..4).rev() {
        let mut value = rhs[row];
        for col in (row + 1)..4 {
            value -= m[row][col] * solution[col];
        }
        solution[row] = value / m[row][row];
        if !solution[row].is_finite() {
            return None;
        }
    }
    Some(solution)
}
