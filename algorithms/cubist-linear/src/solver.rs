//! Least-squares solver with model simplification
//!
//! The normal equations `xTx . b = xTy` are accumulated over a set of cases and solved by
//! elimination with partial pivoting. Columns without a usable pivot are excluded and the system
//! is solved again without them. The solution is then simplified by dropping, one at a time, the
//! coefficient that contributes least to the model, and the variant with the lowest pessimistic
//! error is kept. Finally cases with very large residuals are removed from the tables and the
//! model is fitted once more.
//!
//! Column 0 of the tables stands for the target and the intercept, column `a + 1` for attribute
//! `a`.
use cubist::stats::estimate_err;
use cubist::Dataset;
use log::trace;
use ndarray::{Array1, Array2};

use crate::LinearModel;

/// Residuals larger than this multiple of the average residual mark a case as outlier
const OUTLIER_RATIO: f64 = 5.0;
/// Attributes whose variance over the cases is below this are not used
const MIN_VARIANCE: f64 = 1e-6;
/// A contribution above this multiple of the target deviation marks a model as unstable
const STABILITY_BOUND: f64 = 1000.0;

/// Read-only view of the cases a solver works on
///
/// `target` is the working target of each case, which committee members replace, and `usable`
/// flags the attributes that may appear in models at all (continuous and not skipped).
#[derive(Clone, Copy)]
pub struct Workspace<'a> {
    pub dataset: &'a Dataset,
    pub target: &'a [f64],
    pub usable: &'a [bool],
    pub floor: f64,
    pub ceiling: f64,
}

impl<'a> Workspace<'a> {
    fn weight(&self, case: usize) -> f64 {
        self.dataset.weight(case)
    }

    fn column(&self, case: usize, col: usize) -> f64 {
        if col == 0 {
            self.target[case]
        } else {
            self.dataset.cont(case, col - 1)
        }
    }

    fn is_not_applicable(&self, case: usize, col: usize) -> bool {
        col > 0 && self.dataset.value(case, col - 1).is_not_applicable()
    }

    /// Clamped value of a model given as a column vector
    fn model_value(&self, model: &[f64], case: usize) -> f64 {
        let raw = model
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, c)| **c != 0.0)
            .fold(model[0], |acc, (col, c)| acc + c * self.column(case, col));

        raw.max(self.floor).min(self.ceiling)
    }

    fn total_weight(&self, cases: &[usize]) -> f64 {
        cases.iter().map(|&i| self.weight(i)).sum()
    }

    /// Weighted average absolute error of a model over some cases
    fn average_err(&self, cases: &[usize], model: &[f64]) -> f64 {
        let (sum, sum_wt) = cases.iter().fold((0.0, 0.0), |(sum, sum_wt), &i| {
            let w = self.weight(i);
            (
                sum + w * (self.target[i] - self.model_value(model, i)).abs(),
                sum_wt + w,
            )
        });

        sum / sum_wt
    }

    /// Weighted average absolute error of `model` over `cases`
    pub fn average_error(&self, cases: &[usize], model: &LinearModel) -> f64 {
        let (sum, sum_wt) = cases.iter().fold((0.0, 0.0), |(sum, sum_wt), &i| {
            let w = self.weight(i);
            let v = model.value(self.dataset.row(i), self.floor, self.ceiling);
            (sum + w * (self.target[i] - v).abs(), sum_wt + w)
        });

        sum / sum_wt
    }
}

/// Scratch tables of the solver, reused from one regression to the next
pub struct Solver {
    ncols: usize,
    mean: Vec<f64>,
    var: Vec<f64>,
    av_dev: Vec<f64>,
    /// Columns excluded from the current model
    zero_coeff: Vec<bool>,
    /// Columns of the current model, column 0 first
    active: Vec<usize>,
    /// Lower triangle of the weighted cross products, column 0 included
    xtx: Array2<f64>,
    xty: Array1<f64>,
    filtered: Vec<usize>,
}

impl Solver {
    pub fn new(nattributes: usize) -> Self {
        let ncols = nattributes + 1;
        Solver {
            ncols,
            mean: vec![0.0; ncols],
            var: vec![0.0; ncols],
            av_dev: vec![0.0; ncols],
            zero_coeff: vec![false; ncols],
            active: Vec::with_capacity(ncols),
            xtx: Array2::zeros((ncols, ncols)),
            xty: Array1::zeros(ncols),
            filtered: Vec::new(),
        }
    }

    /// Fits a linear model to `cases`, using no attribute flagged in `do_not_use`
    ///
    /// When there are no candidate attributes, or fewer than two cases per candidate, the model
    /// is the weighted mean of the target.
    pub fn regress(
        &mut self,
        ws: &Workspace,
        cases: &[usize],
        do_not_use: Option<&[bool]>,
    ) -> LinearModel {
        let nattributes = self.ncols - 1;
        if cases.is_empty() {
            return LinearModel::constant(0.0, nattributes);
        }

        self.active.clear();
        self.active.push(0);
        self.zero_coeff[0] = false;
        for col in 0..self.ncols {
            self.mean[col] = 0.0;
            self.var[col] = 0.0;
            self.av_dev[col] = 0.0;
        }
        for a in 0..nattributes {
            let col = a + 1;
            if ws.usable[a] && !do_not_use.map_or(false, |d| d[a]) {
                self.active.push(col);
                self.zero_coeff[col] = false;
            } else {
                self.zero_coeff[col] = true;
            }
        }

        // means and variances in one pass, dropping anything with a not-applicable value
        let mut total = 0.0;
        for &i in cases {
            let w = ws.weight(i);
            total += w;

            let mut k = 0;
            while k < self.active.len() {
                let col = self.active[k];
                if ws.is_not_applicable(i, col) {
                    self.zero_coeff[col] = true;
                    self.active.swap_remove(k);
                } else {
                    let v = ws.column(i, col);
                    self.mean[col] += w * v;
                    self.var[col] += w * v * v;
                    k += 1;
                }
            }
        }

        self.mean[0] /= total;
        let mut k = 1;
        while k < self.active.len() {
            let col = self.active[k];
            self.mean[col] /= total;
            self.var[col] = (self.var[col] - total * self.mean[col] * self.mean[col]) / (total - 1.0);

            if self.var[col] < MIN_VARIANCE {
                self.zero_coeff[col] = true;
                self.active.swap_remove(k);
            } else {
                k += 1;
            }
        }

        for &i in cases {
            let w = ws.weight(i);
            for &col in &self.active {
                self.av_dev[col] += w * (ws.column(i, col) - self.mean[col]).abs();
            }
        }
        for &col in &self.active {
            self.av_dev[col] /= total;
        }

        let ncandidates = self.active.len() - 1;
        if ncandidates < 1 || total < 2.0 * ncandidates as f64 {
            return LinearModel::constant(self.mean[0], nattributes);
        }

        let mut model = vec![0.0; self.ncols];
        self.build_tables(ws, cases);
        self.solve(&mut model);
        self.simplify(ws, cases, &mut model);

        if model[1..].iter().all(|c| *c == 0.0) {
            return LinearModel::from_columns(&model);
        }

        // correct the bias caused by clamping predictions to [floor, ceiling]
        let residuals: Vec<f64> = cases
            .iter()
            .map(|&i| ws.column(i, 0) - ws.model_value(&model, i))
            .collect();
        let (sum_r, bias) = cases
            .iter()
            .zip(&residuals)
            .fold((0.0, 0.0), |(s, b), (&i, r)| {
                let w = ws.weight(i);
                (s + w * r.abs(), b + w * r)
            });
        let av_resid = sum_r / total;
        model[0] += bias / total;

        let mut filtered = std::mem::take(&mut self.filtered);
        filtered.clear();
        let mut first = true;
        for (&i, r) in cases.iter().zip(&residuals) {
            if r.abs() > OUTLIER_RATIO * av_resid {
                if first {
                    self.find_active_atts();
                    first = false;
                }
                self.remove_case(ws, i);
            } else {
                filtered.push(i);
            }
        }

        if filtered.len() < cases.len() {
            trace!("excluding {} outliers", cases.len() - filtered.len());
            self.solve(&mut model);
            self.simplify(ws, &filtered, &mut model);
        }
        self.filtered = filtered;

        LinearModel::from_columns(&model)
    }

    /// Accumulates the cross-product tables over the active columns
    fn build_tables(&mut self, ws: &Workspace, cases: &[usize]) {
        self.find_active_atts();

        for (jj, &j) in self.active.iter().enumerate() {
            self.xty[j] = 0.0;
            for &k in &self.active[..=jj] {
                self.xtx[[j, k]] = 0.0;
            }
        }

        for &i in cases {
            let w = ws.weight(i);
            let y = ws.column(i, 0);

            self.xtx[[0, 0]] += w;
            self.xty[0] += w * y;

            for jj in 1..self.active.len() {
                let j = self.active[jj];
                let xj = ws.column(i, j);
                self.xty[j] += w * xj * y;
                self.xtx[[j, 0]] += w * xj;

                for kk in 1..=jj {
                    let k = self.active[kk];
                    self.xtx[[j, k]] += w * xj * ws.column(i, k);
                }
            }
        }
    }

    /// Removes the contribution of one case from the tables
    fn remove_case(&mut self, ws: &Workspace, i: usize) {
        let w = ws.weight(i);
        let y = ws.column(i, 0);

        self.xtx[[0, 0]] -= w;
        self.xty[0] -= w * y;

        for jj in 1..self.active.len() {
            let j = self.active[jj];
            let xj = ws.column(i, j);
            self.xty[j] -= w * xj * y;
            self.xtx[[j, 0]] -= w * xj;

            for kk in 1..=jj {
                let k = self.active[kk];
                self.xtx[[j, k]] -= w * xj * ws.column(i, k);
            }
        }
    }

    /// Entry of the symmetric cross-product matrix
    fn cross(&self, a: usize, b: usize) -> f64 {
        if a >= b {
            self.xtx[[a, b]]
        } else {
            self.xtx[[b, a]]
        }
    }

    /// Solves the normal equations over the active columns into `model`
    ///
    /// A column whose best pivot is below the rounding error expected from its largest table
    /// entry is excluded for good, and the system is solved again without it.
    fn solve(&mut self, model: &mut [f64]) {
        loop {
            let m = self.active.len();
            if m == 1 {
                model.iter_mut().for_each(|c| *c = 0.0);
                model[0] = self.xty[0] / self.xtx[[0, 0]];
                return;
            }

            let mut a = Array2::<f64>::zeros((m, m));
            let mut b = Array1::<f64>::zeros(m);
            for j in 0..m {
                for k in 0..=j {
                    let v = self.cross(self.active[j], self.active[k]);
                    a[[j, k]] = v;
                    a[[k, j]] = v;
                }
                b[j] = self.xty[self.active[j]];
            }

            let mut singular = false;
            for j in 0..m {
                let jj = self.active[j];
                let max_elt = self.active[..=j]
                    .iter()
                    .map(|&k| self.cross(k, jj).abs())
                    .fold(0.0, f64::max);
                let min_pivot = m as f64 * max_elt * 1e-12;

                let mut best = j;
                let mut pivot = a[[j, j]].abs();
                for k in j + 1..m {
                    if a[[k, j]].abs() > pivot {
                        best = k;
                        pivot = a[[k, j]].abs();
                    }
                }

                if pivot < min_pivot {
                    trace!("no pivot for column {} ({} < {})", jj, pivot, min_pivot);
                    self.zero_coeff[jj] = true;
                    singular = true;
                    continue;
                }

                if best != j {
                    for col in 0..m {
                        a.swap([best, col], [j, col]);
                    }
                    b.swap(best, j);
                }

                let pivot = a[[j, j]];
                for k in j..m {
                    a[[j, k]] /= pivot;
                }
                b[j] /= pivot;

                for k in j + 1..m {
                    let factor = -a[[k, j]];
                    for col in 0..m {
                        a[[k, col]] += factor * a[[j, col]];
                    }
                    b[k] += factor * b[j];
                }
            }

            if singular {
                self.find_active_atts();
                continue;
            }

            for j in (0..m).rev() {
                for k in j + 1..m {
                    b[j] -= a[[j, k]] * b[k];
                }
            }

            model.iter_mut().for_each(|c| *c = 0.0);
            for (j, &col) in self.active.iter().enumerate() {
                model[col] = b[j];
            }
            return;
        }
    }

    /// Drops coefficients one at a time, least contribution first, and keeps the variant with
    /// the lowest pessimistic error
    ///
    /// The exclusions made while simplifying are undone afterwards; exclusions caused by
    /// singular tables persist.
    fn simplify(&mut self, ws: &Workspace, cases: &[usize], model: &mut [f64]) {
        let total = ws.total_weight(cases);
        let saved_zero = self.zero_coeff.clone();
        let mut best_model = model.to_vec();
        let mut best_adj_err = 1e10;

        loop {
            let mut stable = true;
            let mut drop: Option<(usize, f64)> = None;
            for &col in &self.active[1..] {
                let contrib = (model[col] * self.av_dev[col]).abs();
                if drop.map_or(true, |(_, least)| contrib < least) {
                    drop = Some((col, contrib));
                }
                if contrib > STABILITY_BOUND * self.av_dev[0] {
                    stable = false;
                }
            }

            let nactive = (self.active.len() - 1) as f64;
            if stable && total >= 2.0 * nactive {
                let adj_err = estimate_err(ws.average_err(cases, model), total, nactive);
                if adj_err <= best_adj_err {
                    best_adj_err = adj_err;
                    best_model.copy_from_slice(model);
                }
            }

            match drop {
                Some((col, _)) => {
                    model[col] = 0.0;
                    self.zero_coeff[col] = true;
                    self.find_active_atts();
                    self.solve(model);
                }
                None => break,
            }
        }

        model.copy_from_slice(&best_model);
        self.zero_coeff = saved_zero;
    }

    /// Rebuilds the list of active columns from the exclusions
    fn find_active_atts(&mut self) {
        let (ncols, zero) = (self.ncols, &self.zero_coeff);
        self.active.clear();
        self.active.extend((0..ncols).filter(|&col| !zero[col]));
    }
}
