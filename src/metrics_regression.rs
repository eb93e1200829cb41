//! Common metrics for regression
//!
//! This module implements the comparisons reported for a trained model: average error, error
//! relative to always predicting the mean, and correlation between predictions and targets.

use ndarray::prelude::*;
use ndarray::{Data, NdFloat, Zip};
use num_traits::FromPrimitive;

/// Regression metrics trait
pub trait Regression<A> {
    /// Maximal absolute difference
    fn max_error(&self, compare_to: &ArrayView1<A>) -> A;
    /// Mean absolute difference
    fn mean_absolute_error(&self, compare_to: &ArrayView1<A>) -> A;
    /// Mean absolute error divided by the mean absolute error of predicting the mean of
    /// `compare_to` for every case, one when the targets are all equal
    fn relative_error(&self, compare_to: &ArrayView1<A>) -> A;
    /// Mean absolute error divided by the mean absolute error of predicting `mean` for every
    /// case, one when that baseline is zero
    fn relative_error_to(&self, compare_to: &ArrayView1<A>, mean: A) -> A;
    /// Pearson correlation coefficient between the two variables
    fn correlation(&self, compare_to: &ArrayView1<A>) -> A;
}

impl<A: NdFloat + FromPrimitive, D: Data<Elem = A>> Regression<A> for ArrayBase<D, Ix1> {
    fn max_error(&self, compare_to: &ArrayView1<A>) -> A {
        Zip::from(self)
            .and(compare_to)
            .fold(A::zero(), |acc, &a, &b| acc.max((a - b).abs()))
    }

    fn mean_absolute_error(&self, compare_to: &ArrayView1<A>) -> A {
        if self.is_empty() {
            return A::zero();
        }
        let total = Zip::from(self)
            .and(compare_to)
            .fold(A::zero(), |acc, &a, &b| acc + (a - b).abs());

        total / A::from_usize(self.len()).unwrap_or_else(A::one)
    }

    fn relative_error(&self, compare_to: &ArrayView1<A>) -> A {
        let mean = compare_to.mean().unwrap_or_else(A::zero);
        self.relative_error_to(compare_to, mean)
    }

    fn relative_error_to(&self, compare_to: &ArrayView1<A>, mean: A) -> A {
        let baseline = compare_to.mapv(|y| (y - mean).abs()).mean().unwrap_or_else(A::zero);

        if baseline > A::zero() {
            self.mean_absolute_error(compare_to) / baseline
        } else {
            A::one()
        }
    }

    fn correlation(&self, compare_to: &ArrayView1<A>) -> A {
        let n = match A::from_usize(self.len()) {
            Some(n) if self.len() > 1 => n,
            _ => return A::zero(),
        };
        let (mut sx, mut sy, mut sxx, mut syy, mut sxy) =
            (A::zero(), A::zero(), A::zero(), A::zero(), A::zero());
        Zip::from(self).and(compare_to).for_each(|&x, &y| {
            sx += x;
            sy += y;
            sxx += x * x;
            syy += y * y;
            sxy += x * y;
        });

        let vx = (sxx - sx * sx / n).max(A::zero());
        let vy = (syy - sy * sy / n).max(A::zero());
        if vx > A::zero() && vy > A::zero() {
            (sxy - sx * sy / n) / (vx * vy).sqrt()
        } else {
            A::zero()
        }
    }
}
