//! Smoothing and pruning of model trees
//!
//! Before pruning, the model at every node is smoothed towards the models of its ancestors and its
//! coefficients are simplified. Pruning then repeatedly replaces by a leaf the subtree whose
//! removal adds the least error, in three stages:
//!
//! 1. while the estimated error of the whole tree does not increase
//! 2. while it stays within 0.5% of the estimate at the end of the first stage
//! 3. until the tree has no more leaves than the largest number of rules allowed
use cubist::progress::Progress;
use cubist_linear::LinearModel;
use log::debug;

use crate::tree::{Environment, ModelTree, NodeId, Test};

/// Smooths and prunes a tree grown over the permutation `cases`
pub(crate) struct Pruner<'a> {
    env: &'a Environment<'a>,
    target: &'a [f64],
    cases: &'a [usize],
    resid: Vec<f64>,
    parent_resid: Vec<f64>,
    total_err: f64,
    total_params: f64,
    adj_err_lim: f64,
    extra_err: f64,
    extra_params: f64,
    new_adj_err: f64,
    weakest: Option<NodeId>,
}

impl<'a> Pruner<'a> {
    pub fn new(env: &'a Environment<'a>, target: &'a [f64], cases: &'a [usize]) -> Self {
        let n = env.nsamples();
        Pruner {
            env,
            target,
            cases,
            resid: vec![0.0; n],
            parent_resid: vec![0.0; n],
            total_err: 0.0,
            total_params: 0.0,
            adj_err_lim: 0.0,
            extra_err: f64::INFINITY,
            extra_params: 0.0,
            new_adj_err: 0.0,
            weakest: None,
        }
    }

    pub fn prune(&mut self, tree: &mut ModelTree, progress: &mut dyn Progress) {
        let root = tree.root();
        let cases = self.cases;

        self.set_properties(tree, root, progress);
        self.smooth_models(tree, root, cases);
        self.find_errors(tree, root, cases);

        let mut leaves = tree.leaves(root);
        let mut stage = 1;
        loop {
            self.total_params = tree.node(root).params;
            self.total_err = tree.node(root).tree_err;
            let adj_err = self.env.adjusted_err(self.total_err, self.total_params);
            if stage == 1 {
                self.adj_err_lim = adj_err;
            }

            self.extra_err = f64::INFINITY;
            self.weakest = None;
            let found = self.find_weakest(tree, root);
            let weakest = self
                .weakest
                .filter(|_| found && (self.new_adj_err <= adj_err || stage > 1));

            match weakest {
                Some(id) => {
                    leaves = leaves + 1 - tree.leaves(id);
                    self.unsprout_and_update(tree, id, progress);
                }
                None if stage == 1 => {
                    debug!(
                        "{} leaves, estimated error {:.4} after removing weak subtrees",
                        leaves, adj_err
                    );
                    stage = 2;
                    self.adj_err_lim = adj_err * 1.005;
                }
                None => {
                    stage = 3;
                    self.adj_err_lim = f64::INFINITY;
                }
            }

            if stage == 3 && leaves <= self.env.max_rules {
                break;
            }
        }

        debug!(
            "pruned tree has {} leaves, total error {:.4}",
            leaves,
            tree.node(root).tree_err
        );
    }

    fn unsprout(&self, tree: &mut ModelTree, id: NodeId, progress: &mut dyn Progress) {
        progress.advance(tree.size(id) - 1);
        tree.unsprout(id);
    }

    /// Counts the parameters of every subtree and removes tests with a very small branch
    fn set_properties(&self, tree: &mut ModelTree, id: NodeId, progress: &mut dyn Progress) {
        if !tree.node(id).is_leaf() {
            let small = |v| (tree.node(tree.branch(id, v)).cases as f64) < self.env.min_items;
            if small(2) || small(3) {
                self.unsprout(tree, id, progress);
            }
        }

        let node = tree.node_mut(id);
        let count = node.model.count_coefficients() as f64;
        node.coeffs = if node.coeffs != 0.0 {
            0.5 * (node.coeffs + count)
        } else {
            count
        };

        if node.is_leaf() {
            node.params = node.coeffs;
            return;
        }

        node.model_copy = Some(node.model.clone());
        node.params = match node.test {
            Test::Discrete { .. } => 3.0,
            _ => 4.0,
        };

        for b in node.branches.clone() {
            if tree.node(b).cases > 0 {
                self.set_properties(tree, b, progress);
                tree.node_mut(id).params += tree.node(b).params;
            }
        }
    }

    /// Blends the model of every node with the unsmoothed models of its ancestors, then rounds
    /// its coefficients and recentres its intercept on the weighted median error
    fn smooth_models(&mut self, tree: &mut ModelTree, id: NodeId, cases: &[usize]) {
        let mut start = 0;
        for b in tree.node(id).branches.clone() {
            let count = tree.node(b).cases;
            if count > 0 {
                self.smooth_models(tree, b, &cases[start..start + count]);
                start += count;
            }
        }

        let env = self.env;
        let sum_wt: f64 = cases.iter().map(|&i| env.weight(i)).sum();
        let mut model = tree.node(id).model.clone();

        let mut curr_var = err_variance(env, self.target, &model, cases, &mut self.resid);
        if sum_wt > 2.0 && curr_var > 1e-10 {
            let mut ancestor = tree.node(id).parent;
            while let Some(p) = ancestor {
                if let Some(parent_model) = &tree.node(p).model_copy {
                    let parent_var = err_variance(
                        env,
                        self.target,
                        parent_model,
                        cases,
                        &mut self.parent_resid,
                    );

                    let (mut sum_x, mut sum_y, mut sum_xy) = (0.0, 0.0, 0.0);
                    for &i in cases {
                        let w = env.weight(i);
                        sum_x += w * self.resid[i];
                        sum_y += w * self.parent_resid[i];
                        sum_xy += w * self.resid[i] * self.parent_resid[i];
                    }
                    let cov = (sum_xy - sum_x * sum_y / sum_wt) / (sum_wt - 1.0);

                    let denom = curr_var + parent_var - 2.0 * cov;
                    let p_curr = if denom <= 1e-12 {
                        1.0
                    } else {
                        (parent_var - cov) / denom
                    };

                    if p_curr > 0.0 && p_curr < 1.0 {
                        model.blend(parent_model, p_curr);
                        curr_var = err_variance(env, self.target, &model, cases, &mut self.resid);
                    }
                }
                ancestor = tree.node(p).parent;
            }
        }

        for (a, c) in model.coefficients.iter_mut().enumerate() {
            if *c != 0.0 {
                *c = if c.abs() < env.min_coeff[a] {
                    0.0
                } else {
                    (*c / env.unit[a]).round() * env.unit[a]
                };
            }
        }

        let mut errors: Vec<(f64, f64)> = cases
            .iter()
            .map(|&i| {
                let raw = model.raw_value(env.dataset.row(i));
                (raw - self.target[i], env.weight(i))
            })
            .collect();
        model.intercept -= weighted_median(&mut errors, sum_wt / 2.0);
        model.intercept = (model.intercept / env.target_unit).round() * env.target_unit;

        tree.node_mut(id).model = model;
    }

    /// Sets the error of every node as a leaf and as a subtree, and the least extra error
    /// obtainable by pruning it or any subtree below it
    fn find_errors(&self, tree: &mut ModelTree, id: NodeId, cases: &[usize]) {
        let env = self.env;
        let node = tree.node(id);
        let err: f64 = cases
            .iter()
            .map(|&i| env.weight(i) * (self.target[i] - node.model.raw_value(env.dataset.row(i))).abs())
            .sum();

        let node = tree.node_mut(id);
        node.leaf_err = err;
        node.tree_err = err;
        node.utility = f64::INFINITY;
        if node.is_leaf() {
            return;
        }

        let mut tree_err = 0.0;
        let mut min_extra_err = f64::INFINITY;
        let mut start = 0;
        for b in tree.node(id).branches.clone() {
            let count = tree.node(b).cases;
            if count > 0 {
                self.find_errors(tree, b, &cases[start..start + count]);
                start += count;

                let child = tree.node(b);
                tree_err += child.tree_err;
                if !child.is_leaf() && child.utility < min_extra_err {
                    min_extra_err = child.utility;
                }
            }
        }

        let node = tree.node_mut(id);
        node.tree_err = tree_err;
        node.utility = min_extra_err.min(node.leaf_err - tree_err);
    }

    /// Looks for the subtree whose removal adds the least error while keeping the adjusted error
    /// of the tree within the current limit
    fn find_weakest(&mut self, tree: &ModelTree, id: NodeId) -> bool {
        let node = tree.node(id);
        if node.is_leaf() {
            return false;
        }

        let mut found = false;
        let extra_err = node.leaf_err - node.tree_err;
        let extra_params = node.coeffs - node.params;
        let adj_err = self
            .env
            .adjusted_err(extra_err + self.total_err, extra_params + self.total_params);
        if adj_err <= self.adj_err_lim && extra_err < self.extra_err {
            self.weakest = Some(id);
            self.extra_err = extra_err;
            self.extra_params = extra_params;
            self.new_adj_err = adj_err;
            found = true;
        }

        for &b in &node.branches {
            if tree.node(b).utility <= self.extra_err {
                found |= self.find_weakest(tree, b);
            }
        }

        found
    }

    /// Prunes the weakest subtree and updates the errors, parameters and utilities of its
    /// ancestors
    fn unsprout_and_update(&self, tree: &mut ModelTree, pruned: NodeId, progress: &mut dyn Progress) {
        tree.node_mut(pruned).utility = f64::INFINITY;

        let mut min_extra_err = f64::INFINITY;
        let mut current = Some(pruned);
        while let Some(id) = current {
            if id != pruned {
                for &b in &tree.node(id).branches {
                    min_extra_err = min_extra_err.min(tree.node(b).utility);
                }
            }

            let node = tree.node_mut(id);
            node.tree_err += self.extra_err;
            node.params += self.extra_params;
            if id != pruned {
                node.utility = min_extra_err.min(node.leaf_err - node.tree_err);
            }
            current = node.parent;
        }

        self.unsprout(tree, pruned, progress);
    }
}

/// Stores the error of the clamped model on every case in `err` and returns the weighted
/// variance of these errors
fn err_variance(
    env: &Environment,
    target: &[f64],
    model: &LinearModel,
    cases: &[usize],
    err: &mut [f64],
) -> f64 {
    let (mut sum_wt, mut sum, mut sum_sq) = (0.0, 0.0, 0.0);
    for &i in cases {
        let v = target[i] - model.value(env.dataset.row(i), env.floor(), env.ceiling());
        err[i] = v;
        let w = env.weight(i);
        sum_wt += w;
        sum += w * v;
        sum_sq += w * v * v;
    }

    if sum_wt <= 1.0 {
        return 1e-38;
    }
    ((sum_sq - sum * sum / sum_wt) / (sum_wt - 1.0)).max(1e-38)
}

/// Smallest value whose cumulative weight, counting from the lowest value, reaches `want`
///
/// Selection narrows a window by three-way partitions around its middle value, so the values
/// are left only partially ordered.
fn weighted_median(values: &mut [(f64, f64)], mut want: f64) -> f64 {
    let (mut lo, mut hi) = (0, values.len());
    while lo < hi {
        let pivot = values[lo + (hi - lo) / 2].0;
        let (lt, gt) = partition3(&mut values[lo..hi], pivot);

        let below: f64 = values[lo..lo + lt].iter().map(|&(_, w)| w).sum();
        let equal: f64 = values[lo + lt..lo + gt].iter().map(|&(_, w)| w).sum();
        if lt > 0 && below >= want {
            hi = lo + lt;
        } else if below + equal >= want {
            return pivot;
        } else {
            want -= below + equal;
            lo += gt;
        }
    }

    // the weights fall short of `want`
    values
        .iter()
        .map(|&(v, _)| v)
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
        .unwrap_or(0.0)
}

/// Orders `values` into those below, equal to and above `pivot`, returning the ends of the first
/// two groups
fn partition3(values: &mut [(f64, f64)], pivot: f64) -> (usize, usize) {
    let (mut lt, mut i, mut gt) = (0, 0, values.len());
    while i < gt {
        if values[i].0 < pivot {
            values.swap(lt, i);
            lt += 1;
            i += 1;
        } else if values[i].0 > pivot {
            gt -= 1;
            values.swap(i, gt);
        } else {
            i += 1;
        }
    }
    (lt, gt)
}
