//! Limited-memory BFGS over a flat parameter tensor.
//!
//! This is the classic fixed-step variant without a line search: every inner
//! iteration moves the parameters by `step_size * direction`, where the
//! direction comes from the two-loop recursion over the most recent
//! curvature pairs. The optimizer keeps its state between calls to
//! [`Lbfgs::step`], so a run can be suspended after any step and resumed
//! later.

use crate::{errors::InvalidRange, Error};
use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use std::collections::VecDeque;

/// Curvature pairs with `yᵀs` at or below this are skipped.
const MIN_CURVATURE: f64 = 1e-10;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LbfgsConfig {
    /// Step size of every update after the very first one
    pub lr: f64,
    /// Maximum number of updates per call to `step`
    pub max_iter: usize,
    /// Maximum number of closure evaluations per call to `step`, defaults to
    /// `max_iter * 5 / 4`
    pub max_eval: Option<usize>,
    /// The step ends once the largest absolute gradient component is at or
    /// below this
    pub tolerance_grad: f64,
    /// The step ends once the loss or the parameters change less than this
    pub tolerance_change: f64,
    /// Number of curvature pairs to remember
    pub history_size: usize,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            lr: 1.0,
            max_iter: 1,
            max_eval: None,
            tolerance_grad: 1e-7,
            tolerance_change: 1e-9,
            history_size: 100,
        }
    }
}

impl LbfgsConfig {
    pub fn max_eval(&self) -> usize {
        self.max_eval
            .unwrap_or_else(|| self.max_iter * 5 / 4)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(Error::InvalidRange(InvalidRange {
                min: 0.0,
                max: f64::INFINITY,
                value: self.lr,
                name: "lr",
            }));
        }

        if self.max_iter == 0 {
            return Err(Error::InvalidRange(InvalidRange {
                min: 1.0,
                max: f64::INFINITY,
                value: 0.0,
                name: "max-iter",
            }));
        }

        if self.history_size == 0 {
            return Err(Error::InvalidRange(InvalidRange {
                min: 1.0,
                max: f64::INFINITY,
                value: 0.0,
                name: "history-size",
            }));
        }

        for (name, value) in [
            ("tolerance-grad", self.tolerance_grad),
            ("tolerance-change", self.tolerance_change),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(Error::InvalidRange(InvalidRange {
                    min: 0.0,
                    max: f64::INFINITY,
                    value,
                    name,
                }));
            }
        }

        Ok(())
    }
}

fn dot<B: Backend>(a: &Tensor<B, 1>, b: &Tensor<B, 1>) -> f64 {
    (a.clone() * b.clone()).sum().into_scalar().elem()
}

fn abs_max<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().abs().max().into_scalar().elem()
}

fn abs_sum<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().abs().sum().into_scalar().elem()
}

pub struct Lbfgs<B: Backend> {
    config: LbfgsConfig,
    n_iter: usize,
    func_evals: usize,
    direction: Option<Tensor<B, 1>>,
    step_size: f64,
    old_dirs: VecDeque<Tensor<B, 1>>,
    old_steps: VecDeque<Tensor<B, 1>>,
    ro: VecDeque<f64>,
    h_diag: f64,
    prev_flat_grad: Option<Tensor<B, 1>>,
    prev_loss: f64,
}

impl<B: Backend> Lbfgs<B> {
    pub fn new(config: LbfgsConfig) -> Self {
        Self {
            config,
            n_iter: 0,
            func_evals: 0,
            direction: None,
            step_size: config.lr,
            old_dirs: VecDeque::new(),
            old_steps: VecDeque::new(),
            ro: VecDeque::new(),
            h_diag: 1.0,
            prev_flat_grad: None,
            prev_loss: 0.0,
        }
    }

    pub fn config(&self) -> &LbfgsConfig {
        &self.config
    }

    /// Total number of updates over the optimizer's lifetime
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Total number of closure evaluations over the optimizer's lifetime
    pub fn func_evals(&self) -> usize {
        self.func_evals
    }

    /// Number of curvature pairs currently remembered
    pub fn history_len(&self) -> usize {
        self.old_dirs.len()
    }

    /// Performs one optimization step and returns the loss of the first
    /// evaluation, ie. the loss before any update in this step.
    ///
    /// `closure` evaluates the loss and its gradient at the given parameters.
    /// It may modify the parameters in place before evaluating them, eg. to
    /// project them back into a valid range.
    pub fn step<F>(&mut self, params: &mut Tensor<B, 1>, mut closure: F) -> f64
    where
        F: FnMut(&mut Tensor<B, 1>) -> (f64, Tensor<B, 1>),
    {
        let LbfgsConfig {
            lr,
            max_iter,
            tolerance_grad,
            tolerance_change,
            ..
        } = self.config;
        let max_eval = self.config.max_eval();

        let (orig_loss, mut flat_grad) = closure(params);
        let mut loss = orig_loss;
        let mut current_evals = 1;
        self.func_evals += 1;

        if abs_max(&flat_grad) <= tolerance_grad {
            return orig_loss;
        }

        let mut n_iter = 0;
        while n_iter < max_iter {
            n_iter += 1;
            self.n_iter += 1;

            let direction = match (self.direction.take(), self.prev_flat_grad.take()) {
                (Some(direction), Some(prev_flat_grad)) if self.n_iter > 1 => {
                    self.update_direction(&flat_grad, direction, prev_flat_grad)
                }
                _ => {
                    self.old_dirs.clear();
                    self.old_steps.clear();
                    self.ro.clear();
                    self.h_diag = 1.0;
                    -flat_grad.clone()
                }
            };

            self.prev_flat_grad = Some(flat_grad.clone());
            self.prev_loss = loss;

            // the very first step has no curvature information to go on
            self.step_size = if self.n_iter == 1 {
                (1.0 / abs_sum(&flat_grad)).min(1.0) * lr
            } else {
                lr
            };

            let gtd = dot(&flat_grad, &direction);
            if gtd > -tolerance_change {
                self.direction = Some(direction);
                break;
            }

            let update = direction.clone().mul_scalar(self.step_size);
            *params = params.clone() + update.clone();
            self.direction = Some(direction);

            let mut opt_cond = false;
            if n_iter != max_iter {
                let (new_loss, new_grad) = closure(params);
                loss = new_loss;
                flat_grad = new_grad;
                opt_cond = abs_max(&flat_grad) <= tolerance_grad;
                current_evals += 1;
                self.func_evals += 1;
            }

            if n_iter == max_iter
                || current_evals >= max_eval
                || opt_cond
                || abs_max(&update) <= tolerance_change
                || (loss - self.prev_loss).abs() < tolerance_change
            {
                break;
            }
        }

        orig_loss
    }

    /// Records the latest curvature pair and runs the two-loop recursion.
    fn update_direction(
        &mut self,
        flat_grad: &Tensor<B, 1>,
        direction: Tensor<B, 1>,
        prev_flat_grad: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        let y = flat_grad.clone() - prev_flat_grad;
        let s = direction.mul_scalar(self.step_size);
        let ys = dot(&y, &s);

        if ys > MIN_CURVATURE {
            if self.old_dirs.len() == self.config.history_size {
                self.old_dirs.pop_front();
                self.old_steps.pop_front();
                self.ro.pop_front();
            }

            self.h_diag = ys / dot(&y, &y);
            self.old_dirs.push_back(y);
            self.old_steps.push_back(s);
            self.ro.push_back(1.0 / ys);
        }

        let count = self.old_dirs.len();
        let mut alphas = vec![0.0; count];

        let mut q = -flat_grad.clone();
        for i in (0..count).rev() {
            alphas[i] = dot(&self.old_steps[i], &q) * self.ro[i];
            q = q - self.old_dirs[i].clone().mul_scalar(alphas[i]);
        }

        let mut r = q.mul_scalar(self.h_diag);
        for i in 0..count {
            let beta = dot(&self.old_dirs[i], &r) * self.ro[i];
            r = r + self.old_steps[i].clone().mul_scalar(alphas[i] - beta);
        }

        r
    }
}
