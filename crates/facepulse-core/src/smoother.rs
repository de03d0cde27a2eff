//! Exponential smoothers for per-entity outputs
//!
//! - `BoxSmoother`: elementwise EMA over `[x_min, y_min, x_max, y_max]`
//! - `DistributionSmoother`: EMA over a label -> probability map,
//!   renormalized after every update

use std::collections::BTreeMap;
use thiserror::Error;

use facepulse_signals::dsp::round_to;

/// Decimal places of box smoother output
pub const BOX_PRECISION: u32 = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SmootherError {
    #[error("smoothing alpha must be in (0, 1], got {0}")]
    InvalidAlpha(f64),
}

/// Stateful smoother: first sample primes the state, later samples blend in.
pub trait Smoother {
    type Value;

    fn smooth(&mut self, value: &Self::Value) -> Self::Value;

    /// Forget history; the next sample primes the state again
    fn reset(&mut self);

    fn is_primed(&self) -> bool;
}

fn check_alpha(alpha: f64) -> Result<f64, SmootherError> {
    if alpha > 0.0 && alpha <= 1.0 {
        Ok(alpha)
    } else {
        Err(SmootherError::InvalidAlpha(alpha))
    }
}

/// EMA smoother for bounding box coordinates
#[derive(Debug, Clone)]
pub struct BoxSmoother {
    alpha: f64,
    state: Option<[f64; 4]>,
}

impl BoxSmoother {
    pub fn new(alpha: f64) -> Result<Self, SmootherError> {
        Ok(Self {
            alpha: check_alpha(alpha)?,
            state: None,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Unrounded state
    pub fn state(&self) -> Option<[f64; 4]> {
        self.state
    }
}

impl Smoother for BoxSmoother {
    type Value = [f64; 4];

    fn smooth(&mut self, value: &[f64; 4]) -> [f64; 4] {
        let alpha = self.alpha;
        let next = match self.state {
            None => *value,
            Some(prev) => {
                let mut out = prev;
                for (o, v) in out.iter_mut().zip(value.iter()) {
                    *o = alpha * v + (1.0 - alpha) * *o;
                }
                out
            }
        };
        self.state = Some(next);
        next.map(|v| round_to(v, BOX_PRECISION))
    }

    fn reset(&mut self) {
        self.state = None;
    }

    fn is_primed(&self) -> bool {
        self.state.is_some()
    }
}

/// EMA smoother over a categorical probability distribution
///
/// Labels missing from an input keep their prior value unchanged. The output
/// is renormalized to sum to 1 whenever the state sum is positive.
#[derive(Debug, Clone)]
pub struct DistributionSmoother {
    alpha: f64,
    state: Option<BTreeMap<String, f64>>,
}

impl DistributionSmoother {
    pub fn new(alpha: f64) -> Result<Self, SmootherError> {
        Ok(Self {
            alpha: check_alpha(alpha)?,
            state: None,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Normalized view of the current state without updating it
    pub fn current(&self) -> Option<BTreeMap<String, f64>> {
        self.state.as_ref().map(normalized)
    }
}

fn normalized(state: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let total: f64 = state.values().sum();
    if total > 0.0 {
        state.iter().map(|(k, v)| (k.clone(), v / total)).collect()
    } else {
        state.clone()
    }
}

impl Smoother for DistributionSmoother {
    type Value = BTreeMap<String, f64>;

    fn smooth(&mut self, value: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let alpha = self.alpha;
        match self.state.as_mut() {
            None => self.state = Some(value.clone()),
            Some(state) => {
                for (label, p) in value {
                    let prev = state.get(label).copied().unwrap_or(0.0);
                    state.insert(label.clone(), alpha * p + (1.0 - alpha) * prev);
                }
            }
        }
        self.current().unwrap_or_default()
    }

    fn reset(&mut self) {
        self.state = None;
    }

    fn is_primed(&self) -> bool {
        self.state.is_some()
    }
}

/// Label with the highest probability; ties resolve to the first label in order
pub fn arg_max(dist: &BTreeMap<String, f64>) -> Option<(&str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (label, &p) in dist {
        match best {
            Some((_, bp)) if p <= bp => {}
            _ => best = Some((label.as_str(), p)),
        }
    }
    best
}
