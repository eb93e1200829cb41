//! Evaluation of candidate tests
//!
//! A test is judged by how much it reduces the standard deviation of the residuals of the
//! node's model. For a continuous attribute the residuals of the two non-N/A branches are not
//! taken as they are: each branch is assumed to be fitted by a straight line in the attribute,
//! and only the variation that such a line cannot explain counts.
use cubist::{stats::sd, Dataset};

use super::Test;
use crate::MINSPLIT;

/// A test together with the reduction in residual deviation it achieves
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Candidate {
    pub gain: f64,
    pub test: Test,
}

/// What the evaluators need to know about the node being split
pub(crate) struct SplitContext<'a> {
    pub dataset: &'a Dataset,
    /// Residual of every case, indexed by case
    pub resid: &'a [f64],
    pub node_sd: f64,
    pub global_sd: f64,
    pub min_items: f64,
}

/// Weighted counts and residual sums of the three branches, indexed from 1
#[derive(Clone, Copy, Debug, Default)]
struct Branches {
    freq: [f64; 4],
    sum: [f64; 4],
    sum_sq: [f64; 4],
}

impl Branches {
    fn add(&mut self, v: usize, w: f64, r: f64) {
        self.freq[v] += w;
        self.sum[v] += w * r;
        self.sum_sq[v] += w * r * r;
    }

    /// At least two branches hold enough cases
    fn reasonable(&self) -> bool {
        (1..=3).filter(|&v| self.freq[v] >= MINSPLIT as f64).count() >= 2
    }

    fn gain(&self, ctx: &SplitContext) -> f64 {
        let (cases, resid) = (1..=3).fold((0.0, 0.0), |(cases, resid), v| {
            (
                cases + self.freq[v],
                resid + self.freq[v] * sd(self.freq[v], self.sum[v], self.sum_sq[v], ctx.global_sd),
            )
        });

        ctx.node_sd - resid / cases
    }
}

/// Weighted sums of an attribute `x` and the residuals `y`
#[derive(Clone, Copy, Debug, Default)]
struct Moments {
    n: f64,
    x: f64,
    xx: f64,
    y: f64,
    yy: f64,
    xy: f64,
}

impl Moments {
    fn add(&mut self, x: f64, y: f64, w: f64) {
        self.n += w;
        self.x += w * x;
        self.xx += w * x * x;
        self.y += w * y;
        self.yy += w * y * y;
        self.xy += w * x * y;
    }

    fn remove(&mut self, x: f64, y: f64, w: f64) {
        self.add(x, y, -w);
    }

    /// Sum of squares left by a least-squares line through `k` cases
    ///
    /// Correlations that are not significant at the 95% level count as zero.
    fn unexplained(&self, k: usize) -> f64 {
        let mx = self.x / self.n;
        let vx = self.xx / self.n - mx * mx;
        let my = self.y / self.n;
        let vy = self.yy / self.n - my * my;

        let mut r = (self.xy - self.x * self.y / self.n) / (self.n * (vx * vy + 1e-10).sqrt());
        let exp2z = if k < 6 {
            1e38
        } else {
            (2.0 * 1.96 * (1.0 / (k - 3) as f64).sqrt()).exp()
        };
        if r.abs() < (exp2z - 1.0) / (exp2z + 1.0) {
            r = 0.0;
        }

        (1.0 - r * r) * self.n * vy
    }
}

/// Finds the best cut of a continuous attribute
pub(crate) fn eval_continuous(ctx: &SplitContext, cases: &[usize], att: usize) -> Option<Candidate> {
    let count = cases.len();
    if count < 2 * MINSPLIT {
        return None;
    }

    let mut br = Branches::default();
    let mut hi = Moments::default();
    let mut lo = Moments::default();
    let mut sorted = Vec::with_capacity(count);
    for &i in cases {
        let (r, w) = (ctx.resid[i], ctx.dataset.weight(i));
        let value = ctx.dataset.value(i, att);
        if value.is_not_applicable() {
            br.add(1, w, r);
        } else {
            let x = value.as_f64();
            sorted.push((x, r, w));
            hi.add(x, r, w);
            br.freq[3] += w;
        }
    }
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let m = sorted.len();
    let edge = if count as f64 >= 3.0 * ctx.min_items {
        ctx.min_items as usize
    } else {
        MINSPLIT
    };

    let mut best_gain = 0.0;
    let mut best = None;
    for i in 0..m.saturating_sub(edge) {
        let (x, r, w) = sorted[i];
        br.freq[2] += w;
        br.freq[3] -= w;
        lo.add(x, r, w);
        hi.remove(x, r, w);

        if sorted[i + 1].0 > x && i + 1 >= edge {
            br.sum_sq[2] = lo.unexplained(i + 1);
            br.sum_sq[3] = hi.unexplained(m - 1 - i);

            let gain = br.gain(ctx);
            if gain > best_gain {
                best_gain = gain;
                best = Some(i);
            }
        }
    }

    best.map(|i| {
        let (low, high) = (sorted[i].0, sorted[i + 1].0);
        let mut cut = 0.5 * (low + high);
        if cut >= high {
            cut = low;
        }

        Candidate {
            gain: best_gain,
            test: Test::Threshold {
                attribute: att,
                cut,
            },
        }
    })
}

/// Evaluates a discrete attribute, with one branch per category when there are two of them and
/// a subset test otherwise
pub(crate) fn eval_discrete(ctx: &SplitContext, cases: &[usize], att: usize) -> Option<Candidate> {
    if ctx.dataset.attribute(att).max_value() == 3 {
        eval_binary(ctx, cases, att)
    } else {
        eval_subset(ctx, cases, att)
    }
}

fn eval_binary(ctx: &SplitContext, cases: &[usize], att: usize) -> Option<Candidate> {
    let mut br = Branches::default();
    for &i in cases {
        let v = ctx.dataset.discrete(i, att);
        if (1..=3).contains(&v) {
            br.add(v, ctx.dataset.weight(i), ctx.resid[i]);
        }
    }

    if br.reasonable() {
        Some(Candidate {
            gain: br.gain(ctx),
            test: Test::Discrete { attribute: att },
        })
    } else {
        None
    }
}

/// Greedy search for a division of the categories into two subsets
///
/// All categories start in branch 2. At each step the category with the highest mean residual
/// moves to branch 3, or for ordered attributes the highest category, and the best division
/// seen is kept. Branch 1 holds the not-applicable code.
fn eval_subset(ctx: &SplitContext, cases: &[usize], att: usize) -> Option<Candidate> {
    let attribute = ctx.dataset.attribute(att);
    let max_value = attribute.max_value();

    let mut values = Branches::default();
    let (mut freq, mut sum, mut sum_sq) = (
        vec![0.0; max_value + 1],
        vec![0.0; max_value + 1],
        vec![0.0; max_value + 1],
    );
    for &i in cases {
        let v = ctx.dataset.discrete(i, att);
        if v >= 1 && v <= max_value {
            let (w, r) = (ctx.dataset.weight(i), ctx.resid[i]);
            freq[v] += w;
            sum[v] += w * r;
            sum_sq[v] += w * r * r;
        }
    }

    values.freq[1] = freq[1];
    values.sum[1] = sum[1];
    values.sum_sq[1] = sum_sq[1];
    for v in 2..=max_value {
        values.freq[2] += freq[v];
        values.sum[2] += sum[v];
        values.sum_sq[2] += sum_sq[v];
    }

    let mut left: Vec<bool> = (0..=max_value).map(|v| v >= 2 && freq[v] > 0.0).collect();
    let mut best_gain = -1.0;
    let mut best = None;
    for _ in 2..=max_value {
        let moved = if attribute.is_ordered() {
            (2..=max_value).rev().find(|&v| left[v])
        } else {
            (2..=max_value).filter(|&v| left[v]).fold(None, |best, v| match best {
                Some(b) if sum[v] / freq[v] <= sum[b] / freq[b] => Some(b),
                _ => Some(v),
            })
        };
        let sv = match moved {
            Some(sv) => sv,
            None => break,
        };

        left[sv] = false;
        values.freq[2] -= freq[sv];
        values.sum[2] -= sum[sv];
        values.sum_sq[2] -= sum_sq[sv];
        values.freq[3] += freq[sv];
        values.sum[3] += sum[sv];
        values.sum_sq[3] += sum_sq[sv];

        if values.reasonable() {
            let gain = values.gain(ctx);
            if gain > best_gain {
                best_gain = gain;
                let mut subsets = vec![vec![false; max_value + 1]; 3];
                subsets[0][1] = true;
                for v in 2..=max_value {
                    if freq[v] > 0.0 {
                        subsets[if left[v] { 1 } else { 2 }][v] = true;
                    }
                }
                best = Some(subsets);
            }
        }
    }

    best.map(|subsets| Candidate {
        gain: best_gain,
        test: Test::Subset {
            attribute: att,
            subsets,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubist::{Attribute, Value};
    use ndarray::{Array1, Array2};

    fn context<'a>(dataset: &'a Dataset, resid: &'a [f64]) -> SplitContext<'a> {
        let n = resid.len() as f64;
        let sum: f64 = resid.iter().sum();
        let sum_sq: f64 = resid.iter().map(|r| r * r).sum();
        let node_sd = sd(n, sum, sum_sq, 1.0);
        SplitContext {
            dataset,
            resid,
            node_sd,
            global_sd: node_sd,
            min_items: MINSPLIT as f64,
        }
    }

    #[test]
    fn three_categories_group_the_closest_means() {
        let atts = vec![Attribute::discrete("c", vec!["a", "b", "z"])];
        let codes = [2, 3, 4];
        let means = [0.0, 1.0, 10.0];
        let n = 30;
        let records = Array2::from_shape_fn((n, 1), |(i, _)| Value::Discrete(codes[i % 3]));
        let targets = Array1::from_shape_fn(n, |i| means[i % 3] + 0.1 * (i / 3) as f64);
        let data = Dataset::new(atts, records, targets).unwrap();
        let resid = data.targets().to_vec();
        let cases: Vec<usize> = (0..n).collect();

        let best = eval_discrete(&context(&data, &resid), &cases, 0).unwrap();
        assert!(best.gain > 0.0);
        match best.test {
            Test::Subset { subsets, .. } => {
                assert_eq!(subsets[0], vec![false, true, false, false, false]);
                assert_eq!(subsets[1], vec![false, false, true, true, false]);
                assert_eq!(subsets[2], vec![false, false, false, false, true]);
            }
            other => panic!("unexpected test {:?}", other),
        }
    }

    #[test]
    fn two_categories_give_a_discrete_test() {
        let atts = vec![Attribute::discrete("c", vec!["a", "b"])];
        let n = 20;
        let records = Array2::from_shape_fn((n, 1), |(i, _)| Value::Discrete(2 + i % 2));
        let targets = Array1::from_shape_fn(n, |i| (i % 2) as f64 * 5.0 + 0.01 * i as f64);
        let data = Dataset::new(atts, records, targets).unwrap();
        let resid = data.targets().to_vec();
        let cases: Vec<usize> = (0..n).collect();

        let best = eval_discrete(&context(&data, &resid), &cases, 0).unwrap();
        assert_eq!(best.test, Test::Discrete { attribute: 0 });
        assert!(best.gain > 0.0);

        // a single populated category is not a reasonable split
        let one: Vec<usize> = (0..n).step_by(2).collect();
        assert!(eval_discrete(&context(&data, &resid), &one, 0).is_none());
    }

    #[test]
    fn continuous_cut_lies_between_values() {
        let n = 40;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(n, |i| if i < 20 { 0.0 } else { 10.0 });
        let data = Dataset::from_continuous(x, y).unwrap();
        let resid = data.targets().to_vec();
        let cases: Vec<usize> = (0..n).collect();

        let best = eval_continuous(&context(&data, &resid), &cases, 0).unwrap();
        assert_eq!(
            best.test,
            Test::Threshold {
                attribute: 0,
                cut: 19.5
            }
        );

        assert!(eval_continuous(&context(&data, &resid), &cases[..5], 0).is_none());
    }
}
