//! Constant-velocity Kalman filter
//!
//! State `[x, y, vx, vy]` with a 4×4 covariance. All functions are free
//! functions over a caller-owned [`FilterState`]; nothing is kept between
//! calls, so the same code runs against any track's slot in the store.
//!
//! Process noise follows the piecewise-constant acceleration model: for each
//! axis `Q = q · G·Gᵀ` with `G = [dt²/2, dt]`. Measurements are positions
//! with isotropic noise `r`.

use serde::{Deserialize, Serialize};
use sightline_core::{SightlineError, SightlineResult};

pub type Mat4 = [[f32; 4]; 4];

/// Noise parameters shared by every track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterNoise {
    /// Acceleration variance (px²/s⁴)
    pub process_noise: f32,
    /// Position measurement variance (px²)
    pub measurement_noise: f32,
    /// Initial position variance of a new track (px²)
    pub initial_position_variance: f32,
    /// Initial velocity variance of a new track (px²/s²)
    pub initial_velocity_variance: f32,
}

impl Default for FilterNoise {
    fn default() -> Self {
        Self {
            process_noise: 500.0,
            measurement_noise: 4.0,
            initial_position_variance: 10.0,
            initial_velocity_variance: 1000.0,
        }
    }
}

impl FilterNoise {
    pub fn validate(&self) -> SightlineResult<()> {
        let fields = [
            ("process_noise", self.process_noise, false),
            ("measurement_noise", self.measurement_noise, true),
            ("initial_position_variance", self.initial_position_variance, true),
            ("initial_velocity_variance", self.initial_velocity_variance, true),
        ];
        for (name, value, strictly_positive) in fields {
            let in_range = if strictly_positive {
                value > 0.0
            } else {
                value >= 0.0
            };
            if !(value.is_finite() && in_range) {
                return Err(SightlineError::Config(format!(
                    "tracker.noise.{} out of range: {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Per-track filter state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterState {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub covariance: Mat4,
}

impl FilterState {
    /// Stationary state at `(x, y)` with the initial covariance from `noise`.
    pub fn new(x: f32, y: f32, noise: &FilterNoise) -> Self {
        let mut covariance = [[0.0; 4]; 4];
        covariance[0][0] = noise.initial_position_variance;
        covariance[1][1] = noise.initial_position_variance;
        covariance[2][2] = noise.initial_velocity_variance;
        covariance[3][3] = noise.initial_velocity_variance;
        Self {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            covariance,
        }
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.vx, self.vy)
    }

    /// Trace of the position block, a scalar uncertainty measure.
    pub fn position_uncertainty(&self) -> f32 {
        self.covariance[0][0] + self.covariance[1][1]
    }
}

/// Advance position by velocity × dt.
#[inline]
pub fn advance_position(position: f32, velocity: f32, dt: f32) -> f32 {
    position + velocity * dt
}

/// Motion-model advance only. Used for coasting.
pub fn predict_state(dt: f32, state: &mut FilterState, noise: &FilterNoise) {
    state.x = advance_position(state.x, state.vx, dt);
    state.y = advance_position(state.y, state.vy, dt);
    predict_covariance(&mut state.covariance, dt, noise);
}

/// Covariance half of [`predict_state`]: `P ← F·P·Fᵀ + Q`.
pub fn predict_covariance(p: &mut Mat4, dt: f32, noise: &FilterNoise) {
    let f = transition(dt);
    let mut next = mul(&mul(&f, p), &transpose(&f));

    let q = noise.process_noise;
    let dt2 = dt * dt;
    let q_pp = q * dt2 * dt2 / 4.0;
    let q_pv = q * dt2 * dt / 2.0;
    let q_vv = q * dt2;
    for (pos, vel) in [(0, 2), (1, 3)] {
        next[pos][pos] += q_pp;
        next[pos][vel] += q_pv;
        next[vel][pos] += q_pv;
        next[vel][vel] += q_vv;
    }
    *p = symmetrize(&next);
}

/// Predict by `dt`, then correct with a position measurement.
pub fn update(observation: (f32, f32), dt: f32, state: &mut FilterState, noise: &FilterNoise) {
    predict_state(dt, state, noise);

    let p = &state.covariance;
    let r = noise.measurement_noise;
    // S = H·P·Hᵀ + R, the top-left 2×2 block plus R.
    let s00 = p[0][0] + r;
    let s01 = p[0][1];
    let s10 = p[1][0];
    let s11 = p[1][1] + r;
    let det = s00 * s11 - s01 * s10;
    if !(det.is_finite() && det > f32::EPSILON) {
        log::debug!("Kalman correction skipped: singular innovation covariance");
        return;
    }
    let inv = [[s11 / det, -s01 / det], [-s10 / det, s00 / det]];

    // K = P·Hᵀ·S⁻¹ (4×2)
    let mut k = [[0.0f32; 2]; 4];
    for (i, row) in k.iter_mut().enumerate() {
        row[0] = p[i][0] * inv[0][0] + p[i][1] * inv[1][0];
        row[1] = p[i][0] * inv[0][1] + p[i][1] * inv[1][1];
    }

    let innovation = [observation.0 - state.x, observation.1 - state.y];
    state.x += k[0][0] * innovation[0] + k[0][1] * innovation[1];
    state.y += k[1][0] * innovation[0] + k[1][1] * innovation[1];
    state.vx += k[2][0] * innovation[0] + k[2][1] * innovation[1];
    state.vy += k[3][0] * innovation[0] + k[3][1] * innovation[1];

    // P ← (I − K·H)·P
    let mut next = *p;
    for i in 0..4 {
        for j in 0..4 {
            next[i][j] = p[i][j] - k[i][0] * p[0][j] - k[i][1] * p[1][j];
        }
    }
    state.covariance = symmetrize(&next);
}

/// Position `dt` seconds ahead. Does not touch the state.
pub fn predict(dt: f32, state: &FilterState) -> (f32, f32) {
    (
        advance_position(state.x, state.vx, dt),
        advance_position(state.y, state.vy, dt),
    )
}

fn transition(dt: f32) -> Mat4 {
    [
        [1.0, 0.0, dt, 0.0],
        [0.0, 1.0, 0.0, dt],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

fn mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            out[i][j] = (0..4).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn transpose(a: &Mat4) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            out[j][i] = a[i][j];
        }
    }
    out
}

fn symmetrize(a: &Mat4) -> Mat4 {
    let mut out = *a;
    for i in 0..4 {
        for j in (i + 1)..4 {
            let v = 0.5 * (a[i][j] + a[j][i]);
            out[i][j] = v;
            out[j][i] = v;
        }
    }
    out
}
