//! Box-constrained particle-swarm optimizer.
//!
//! Each particle is a candidate parameter vector moved every iteration towards
//! its own best position and the swarm's best position, with an inertia weight
//! decaying linearly from `w0i` to `w0f`. Particles leaving the search box are
//! clamped onto the violated bound and receive a fresh random velocity.
//!
//! The optimizer never panics on a bad cost: non-finite costs rank as `+∞`,
//! so degenerate candidates simply never become the optimum. A run fails with
//! [`PsoError::InitializationFailure`] only when no initial particle has a
//! finite cost.

use htt_core::Real;
use log::{debug, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Swarm hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsoOptions {
    /// Initial inertia weight.
    pub w0i: Real,
    /// Final inertia weight.
    pub w0f: Real,
    /// Cognitive coefficient (pull towards the personal best).
    pub cp: Real,
    /// Social coefficient (pull towards the global best).
    pub cg: Real,
    /// Number of swarm updates.
    pub n_iterations: usize,
    /// Number of particles.
    pub n_particles: usize,
    /// Random-number generator seed (for reproducibility).
    pub seed: u64,
    /// Log every improvement of the global best.
    pub debug: bool,
}

impl Default for PsoOptions {
    fn default() -> Self {
        Self {
            w0i: 0.9,
            w0f: 0.4,
            cp: 1.5,
            cg: 1.5,
            n_iterations: 100,
            n_particles: 60,
            seed: 0x5eed,
            debug: false,
        }
    }
}

impl PsoOptions {
    /// Same options with a different seed.
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }
}

/// Errors returned by [`minimize`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PsoError {
    /// Bounds have different lengths or no dimension at all.
    #[error("invalid search space: {0} lower vs {1} upper bounds")]
    DimensionMismatch(usize, usize),
    /// A lower bound exceeds its upper bound, or a bound is not finite.
    #[error("invalid bounds for dimension {0}: [{1}, {2}]")]
    InvalidBounds(usize, Real, Real),
    /// Swarm needs at least one particle.
    #[error("swarm needs at least one particle")]
    EmptySwarm,
    /// No initial particle produced a finite cost.
    #[error("no initial particle produced a finite cost")]
    InitializationFailure,
}

/// Per-dimension box `[lb, ub]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub lb: Vec<Real>,
    pub ub: Vec<Real>,
}

impl SearchSpace {
    pub fn new(lb: Vec<Real>, ub: Vec<Real>) -> Result<Self, PsoError> {
        let space = Self { lb, ub };
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> Result<(), PsoError> {
        if self.lb.len() != self.ub.len() || self.lb.is_empty() {
            return Err(PsoError::DimensionMismatch(self.lb.len(), self.ub.len()));
        }
        for (i, (lo, hi)) in self.lb.iter().zip(&self.ub).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(PsoError::InvalidBounds(i, *lo, *hi));
            }
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.lb.len()
    }

    /// Whether `x` lies inside the box (bounds included).
    pub fn contains(&self, x: &[Real]) -> bool {
        x.len() == self.dim()
            && x
                .iter()
                .zip(self.lb.iter().zip(&self.ub))
                .all(|(v, (lo, hi))| v >= lo && v <= hi)
    }

    /// Whether any component of `x` sits exactly on a bound.
    pub fn on_boundary(&self, x: &[Real]) -> bool {
        x.iter()
            .zip(self.lb.iter().zip(&self.ub))
            .any(|(v, (lo, hi))| v == lo || v == hi)
    }
}

/// Objective evaluated once per particle.
///
/// Implemented for every `FnMut(&[Real]) -> Real`, so closures capturing a
/// mutable model can be passed directly.
pub trait SwarmCost {
    fn cost(&mut self, x: &[Real]) -> Real;
}

impl<F> SwarmCost for F
where
    F: FnMut(&[Real]) -> Real,
{
    fn cost(&mut self, x: &[Real]) -> Real {
        self(x)
    }
}

/// Outcome classification of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsoStatus {
    /// Optimum lies strictly inside the search box.
    Success,
    /// At least one optimum component equals a bound.
    BoundaryReached,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct PsoReport {
    /// Best position found.
    pub optimum_x: Vec<Real>,
    /// Cost at `optimum_x`.
    pub loss: Real,
    /// Size of the last improvement of the global best.
    pub tolerance: Real,
    /// Whether the global best improved at least once after initialization.
    pub valid_solution: bool,
    /// Iteration of the last improvement (`None` if it never improved).
    pub optimum_iteration: Option<usize>,
    pub status: PsoStatus,
}

fn sanitize(cost: Real) -> Real {
    if cost.is_finite() {
        cost
    } else {
        Real::INFINITY
    }
}

/// Minimize `cost` over `space`.
pub fn minimize<C: SwarmCost + ?Sized>(
    cost: &mut C,
    space: &SearchSpace,
    opts: &PsoOptions,
) -> Result<PsoReport, PsoError> {
    space.validate()?;
    if opts.n_particles == 0 {
        return Err(PsoError::EmptySwarm);
    }

    let dim = space.dim();
    let n = opts.n_particles;
    let mut rng = StdRng::seed_from_u64(opts.seed);

    let mut x = vec![0.0; n * dim];
    let mut v = vec![0.0; n * dim];
    for s in 0..n {
        for m in 0..dim {
            let (lo, hi) = (space.lb[m], space.ub[m]);
            let span = (hi - lo).abs();
            x[s * dim + m] = (lo + rng.random::<Real>() * span).clamp(lo, hi);
            v[s * dim + m] = (2.0 * rng.random::<Real>() - 1.0) * span;
        }
    }

    let mut res: Vec<Real> = x
        .chunks(dim)
        .map(|p| sanitize(cost.cost(p)))
        .collect();

    let mut best_x = x.clone();
    let mut best_res = res.clone();

    let (mut min_pos, mut min_res) = argmin(&res);
    if !min_res.is_finite() {
        warn!("pso: all {} initial particles have non-finite cost", n);
        return Err(PsoError::InitializationFailure);
    }
    let mut optimum_x = best_x[min_pos * dim..(min_pos + 1) * dim].to_vec();
    let mut optimum_res = min_res;

    let mut prev_res = optimum_res;
    let mut tolerance = 0.0;
    let mut optimum_iteration = None;
    let mut valid_solution = false;

    let n_it = opts.n_iterations.max(1) as Real;
    for it in 0..opts.n_iterations {
        let w = (opts.w0f * it as Real + opts.w0i * (n_it - it as Real)) / n_it;

        for s in 0..n {
            for m in 0..dim {
                let idx = s * dim + m;
                let (lo, hi) = (space.lb[m], space.ub[m]);
                let rp = rng.random::<Real>();
                let rg = rng.random::<Real>();

                let xi = x[idx];
                let mut vi = w * v[idx]
                    + opts.cp * rp * (best_x[idx] - xi)
                    + opts.cg * rg * (optimum_x[m] - xi);
                let mut xn = xi + vi;

                if xn < lo || xn > hi {
                    xn = xn.clamp(lo, hi);
                    let span = (hi - lo).abs();
                    vi = (2.0 * rng.random::<Real>() - 1.0) * span;
                }

                x[idx] = xn;
                v[idx] = vi;
            }
        }

        for (s, p) in x.chunks(dim).enumerate() {
            res[s] = sanitize(cost.cost(p));
        }

        for s in 0..n {
            if res[s] < best_res[s] {
                best_res[s] = res[s];
                best_x[s * dim..(s + 1) * dim].copy_from_slice(&x[s * dim..(s + 1) * dim]);
            }
        }

        (min_pos, min_res) = argmin(&res);
        if min_res < optimum_res {
            optimum_res = min_res;
            optimum_iteration = Some(it);
            valid_solution = true;
            optimum_x.copy_from_slice(&best_x[min_pos * dim..(min_pos + 1) * dim]);

            tolerance = prev_res - min_res;
            prev_res = min_res;

            if opts.debug {
                debug!(
                    "pso: iteration {} loss {:.6e} at {:?}",
                    it, optimum_res, optimum_x
                );
            }
        }
    }

    let status = if space.on_boundary(&optimum_x) {
        PsoStatus::BoundaryReached
    } else {
        PsoStatus::Success
    };

    Ok(PsoReport {
        optimum_x,
        loss: optimum_res,
        tolerance,
        valid_solution,
        optimum_iteration,
        status,
    })
}

fn argmin(values: &[Real]) -> (usize, Real) {
    let mut pos = 0;
    let mut min = Real::INFINITY;
    for (i, &r) in values.iter().enumerate() {
        if r < min {
            min = r;
            pos = i;
        }
    }
    (pos, min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(center: Vec<Real>) -> impl FnMut(&[Real]) -> Real {
        move |x: &[Real]| x.iter().zip(&center).map(|(a, b)| (a - b).powi(2)).sum()
    }

    #[test]
    fn finds_interior_minimum() {
        let space = SearchSpace::new(vec![-5.0, -5.0, -5.0], vec![5.0, 5.0, 5.0]).unwrap();
        let mut cost = sphere(vec![1.0, -2.0, 0.5]);
        let report = minimize(&mut cost, &space, &PsoOptions::default()).unwrap();
        assert!(report.loss < 1e-3, "loss too large: {}", report.loss);
        assert_eq!(report.status, PsoStatus::Success);
        assert!(report.valid_solution);
        assert!(space.contains(&report.optimum_x));
    }

    #[test]
    fn minimum_outside_box_reaches_boundary() {
        let space = SearchSpace::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let mut cost = sphere(vec![3.0, 0.5]);
        let report = minimize(&mut cost, &space, &PsoOptions::default()).unwrap();
        assert_eq!(report.status, PsoStatus::BoundaryReached);
        assert_eq!(report.optimum_x[0], 1.0);
    }

    #[test]
    fn same_seed_is_reproducible() {
        let space = SearchSpace::new(vec![-1.0; 4], vec![1.0; 4]).unwrap();
        let opts = PsoOptions {
            n_iterations: 20,
            ..PsoOptions::default()
        };
        let a = minimize(&mut sphere(vec![0.1; 4]), &space, &opts).unwrap();
        let b = minimize(&mut sphere(vec![0.1; 4]), &space, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_finite_costs_never_win() {
        let space = SearchSpace::new(vec![-2.0], vec![2.0]).unwrap();
        let mut cost = |x: &[Real]| {
            if x[0] < 0.0 {
                Real::NAN
            } else {
                (x[0] - 1.0).powi(2)
            }
        };
        let report = minimize(&mut cost, &space, &PsoOptions::default()).unwrap();
        assert!(report.loss.is_finite());
        assert!(report.optimum_x[0] >= 0.0);
    }

    #[test]
    fn all_infinite_costs_fail_initialization() {
        let space = SearchSpace::new(vec![0.0], vec![1.0]).unwrap();
        let mut cost = |_: &[Real]| Real::INFINITY;
        let err = minimize(&mut cost, &space, &PsoOptions::default()).unwrap_err();
        assert_eq!(err, PsoError::InitializationFailure);
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert_eq!(
            SearchSpace::new(vec![1.0], vec![0.0]),
            Err(PsoError::InvalidBounds(0, 1.0, 0.0))
        );
        assert!(matches!(
            SearchSpace::new(vec![0.0, 1.0], vec![1.0]),
            Err(PsoError::DimensionMismatch(2, 1))
        ));
    }
}
