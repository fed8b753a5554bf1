//! Per-chunk normalised-LMS (NLMS) adaptive FIR filter — the ANC core.
//!
//! Ported from `original_source/server/anc_system.py::AdaptiveANC`, the block-level
//! variant the spec singles out as the intended design (a superseded minimal
//! per-sample draft also exists in the original source and is not implemented here).

use std::collections::VecDeque;

use log::warn;

use crate::error::AncError;

/// Tunable constants bound at startup. Defaults match §3 of the specification.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilterConfig {
    pub filter_length: usize,
    pub latency_samples: usize,
    pub mu: f64,
    pub max_adaptation_rate: f64,
    pub leakage: f64,
    pub max_weight: f64,
    pub max_delta: f64,
    pub signal_threshold: f64,
    pub window_size: usize,
    pub convergence_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filter_length: 2048,
            latency_samples: 0,
            mu: 5e-4,
            max_adaptation_rate: 0.1,
            leakage: 0.9999,
            max_weight: 2.0,
            max_delta: 0.1,
            signal_threshold: 0.1,
            window_size: 100,
            convergence_threshold: 0.01,
        }
    }
}

/// Owned state of the adaptive filter: the FIR weights, the reference delay line, the
/// bounded convergence-error history, and a monotonic chunk counter.
#[derive(Debug, Clone)]
pub struct FilterState {
    pub w: Vec<f64>,
    pub x_buffer: Vec<f64>,
    pub error_history: VecDeque<f64>,
    pub packet_count: u64,
}

impl FilterState {
    fn new(config: &FilterConfig) -> Self {
        Self {
            w: vec![0.0; config.filter_length],
            x_buffer: vec![0.0; config.filter_length + config.latency_samples],
            error_history: VecDeque::new(),
            packet_count: 0,
        }
    }
}

/// The adaptive FIR filter. Owns its `FilterState` exclusively; `process_chunk` is the
/// only operation that mutates it.
pub struct AdaptiveFilter {
    config: FilterConfig,
    state: FilterState,
}

impl AdaptiveFilter {
    pub fn new(config: FilterConfig) -> Self {
        let state = FilterState::new(&config);
        Self { config, state }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn weights(&self) -> &[f64] {
        &self.state.w
    }

    pub fn packet_count(&self) -> u64 {
        self.state.packet_count
    }

    pub fn error_history(&self) -> &VecDeque<f64> {
        &self.state.error_history
    }

    /// Ingest one paired `(reference, error)` chunk and return the anti-noise chunk.
    ///
    /// Panics if `x_ref` and `d_error` differ in length — a shape mismatch is a
    /// programming error at the call site, never a recoverable runtime condition.
    pub fn process_chunk(&mut self, x_ref: &[f64], d_error: &[f64]) -> Vec<f64> {
        if x_ref.len() != d_error.len() {
            panic!(
                "{}",
                AncError::ShapeMismatch {
                    reference_len: x_ref.len(),
                    error_len: d_error.len(),
                }
            );
        }
        let n = x_ref.len();

        // Numeric safety net: non-finite values anywhere in the inputs or in the
        // filter's own state are never allowed to propagate. Reset and drop the chunk.
        let non_finite_source = if !all_finite(x_ref) {
            Some("x_ref")
        } else if !all_finite(d_error) {
            Some("d_error")
        } else if !all_finite(&self.state.w) {
            Some("w")
        } else if !all_finite(&self.state.x_buffer) {
            Some("x_buffer")
        } else {
            None
        };
        if let Some(where_) = non_finite_source {
            let err = AncError::NumericAnomaly { where_ };
            warn!("{err}; resetting adaptive filter state and dropping chunk");
            self.state.w.fill(0.0);
            self.state.x_buffer.fill(0.0);
            return vec![0.0; n];
        }

        // 1. Signal-level gating.
        if mean_abs(x_ref) < self.config.signal_threshold || mean_abs(d_error) < self.config.signal_threshold {
            return vec![0.0; n];
        }

        // 2. DC removal.
        let x_mean = mean(x_ref);
        let d_mean = mean(d_error);
        let x_ref_dc: Vec<f64> = x_ref.iter().map(|v| v - x_mean).collect();
        let d_error_dc: Vec<f64> = d_error.iter().map(|v| v - d_mean).collect();

        // 3. Delay-line update: shift left by n, append the DC-removed reference.
        let buf_len = self.state.x_buffer.len();
        let drain = n.min(buf_len);
        self.state.x_buffer.drain(0..drain);
        self.state.x_buffer.extend_from_slice(&x_ref_dc);
        debug_assert_eq!(self.state.x_buffer.len(), buf_len);

        // 4. Reference selection: FILTER_LENGTH samples ending LATENCY_SAMPLES before
        // the tail.
        let end_idx = buf_len - self.config.latency_samples;
        let start_idx = end_idx - self.config.filter_length;
        let x_delayed = self.state.x_buffer[start_idx..end_idx].to_vec();

        // 5. Variable step size.
        let signal_power = mean_sq(&x_delayed);
        let mu_eff = (self.config.mu / (signal_power + 1e-6)).min(self.config.max_adaptation_rate);

        // 6. Filter output and block error.
        let y = dot(&self.state.w, &x_delayed);
        let e: Vec<f64> = d_error_dc.iter().map(|&d| d - y).collect();

        // 7. Weight update with leakage and clipping.
        //
        // The chunk's error vector has length N (CHUNK_SIZE) while the weight/delay
        // vectors have length FILTER_LENGTH; these only line up 1:1 when the two sizes
        // are equal. Pairing each e[i] with the newest FILTER_LENGTH-taps' matching
        // x_delayed sample (the trailing min(N, FILTER_LENGTH) entries, which are
        // exactly the freshly appended reference samples when LATENCY_SAMPLES is 0)
        // reduces to the literal element-wise update when N == FILTER_LENGTH and
        // stays well-defined for the production N << FILTER_LENGTH case. Leakage
        // still applies to every tap every chunk; only the trailing taps also receive
        // a nonzero update this cycle.
        let m = n.min(self.config.filter_length);
        let fl = self.config.filter_length;
        for i in 0..(fl - m) {
            self.state.w[i] *= self.config.leakage;
        }
        for i in 0..m {
            let w_idx = fl - m + i;
            let x_idx = x_delayed.len() - m + i;
            let delta = 2.0 * mu_eff * e[i] * x_delayed[x_idx];
            let delta = delta.clamp(-self.config.max_delta, self.config.max_delta);
            self.state.w[w_idx] = self.config.leakage * self.state.w[w_idx] + delta;
        }
        for wv in self.state.w.iter_mut() {
            *wv = wv.clamp(-self.config.max_weight, self.config.max_weight);
        }

        // 8. Output shaping.
        let max_abs_e = e.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
        let mut e_scaled = e;
        if max_abs_e > 1.0 {
            for v in e_scaled.iter_mut() {
                *v /= max_abs_e;
            }
        }

        // 9. Telemetry: mean(e^2) measured after scaling, before tanh.
        let mse = mean_sq(&e_scaled);
        self.state.error_history.push_back(mse);
        if self.state.error_history.len() > 2 * self.config.window_size {
            while self.state.error_history.len() > self.config.window_size {
                self.state.error_history.pop_front();
            }
        }
        self.state.packet_count += 1;

        e_scaled.into_iter().map(|v| v.tanh()).collect()
    }

    /// Advisory convergence indicator: does not gate adaptation.
    pub fn is_converged(&self) -> bool {
        if self.state.error_history.len() < self.config.window_size {
            return false;
        }
        let recent: Vec<f64> = self
            .state
            .error_history
            .iter()
            .rev()
            .take(self.config.window_size)
            .copied()
            .collect();
        variance(&recent) < self.config.convergence_threshold
    }

    pub fn reset(&mut self) {
        self.state = FilterState::new(&self.config);
    }
}

fn all_finite(samples: &[f64]) -> bool {
    samples.iter().all(|v| v.is_finite())
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn mean_abs(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|v| v.abs()).sum::<f64>() / samples.len() as f64
}

fn mean_sq(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|v| v * v).sum::<f64>() / samples.len() as f64
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let m = mean(samples);
    samples.iter().map(|v| (v - m).powi(2)).sum::<f64>() / samples.len() as f64
}
