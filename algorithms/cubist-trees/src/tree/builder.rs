//! Growing model trees
//!
//! Trees are grown by recursive divide and conquer over a permutation of the case indices.
//! Dividing a node moves the cases of each branch to the front of the node's slice, branch 1
//! first, so that after growth the cases of every node form a contiguous slice whose length is
//! the node's case count and whose children follow each other in branch order. Every later
//! stage walks the tree with the same permutation.
use cubist::{
    progress::Progress,
    stats::{estimate_err, sd},
    Dataset, Summary,
};
use cubist_linear::{LinearModel, Solver, Workspace};
use log::debug;

use super::split::{eval_continuous, eval_discrete, Candidate, SplitContext};
use super::{ModelTree, Node, NodeId, Test};
use crate::{EPSILON, MINSPLIT};

/// Properties of the training cases shared by every stage of model construction
///
/// They are computed once, from the actual targets, and stay the same for every member of a
/// committee.
pub(crate) struct Environment<'a> {
    pub dataset: &'a Dataset,
    pub summary: &'a Summary,
    /// Attributes that may appear in linear models
    pub usable: Vec<bool>,
    pub global_mean: f64,
    pub global_sd: f64,
    pub global_err: f64,
    /// Preference of each continuous attribute when gains are nearly tied
    pub pref: Vec<f64>,
    /// Coefficients are rounded to multiples of the attribute unit
    pub unit: Vec<f64>,
    /// Coefficients smaller than this are dropped
    pub min_coeff: Vec<f64>,
    /// Precision of the target, to which intercepts are rounded
    pub target_unit: f64,
    /// Smallest number of cases a rule should cover
    pub min_items: f64,
    /// Pruning continues until the tree has at most this many leaves
    pub max_rules: usize,
}

impl<'a> Environment<'a> {
    /// Computes the global properties of the imputed training cases
    pub fn new(dataset: &'a Dataset, summary: &'a Summary, max_rules: usize) -> Self {
        let n = dataset.nsamples();
        let natt = dataset.nattributes();
        let target_mean = summary.target().mean;

        let usable: Vec<bool> = dataset
            .attributes()
            .iter()
            .enumerate()
            .map(|(a, att)| att.is_continuous() && !att.is_ignored() && !summary.attribute(a).skipped)
            .collect();

        let (mut sum, mut sum_sq) = (0.0, 0.0);
        let mut count = vec![0usize; natt];
        let mut same = vec![0usize; natt];
        for i in 0..n {
            let (w, y) = (dataset.weight(i), dataset.target(i));
            sum += w * y;
            sum_sq += w * y * y;

            let above = y > target_mean;
            for a in (0..natt).filter(|&a| usable[a]) {
                let value = dataset.value(i, a);
                let mean = summary.attribute(a).mean;
                if !value.is_not_applicable() && value.as_f64() != mean {
                    count[a] += 1;
                    if (value.as_f64() > mean) == above {
                        same[a] += 1;
                    }
                }
            }
        }

        let cases = n as f64;
        let global_mean = sum / cases;
        let global_sd = sd(cases, sum, sum_sq, 0.0);
        let (dev, sum_wt) = (0..n).fold((0.0, 0.0), |(dev, sum_wt), i| {
            let w = dataset.weight(i);
            (dev + w * (global_mean - dataset.target(i)).abs(), sum_wt + w)
        });
        let global_err = dev / sum_wt;

        let mut pref = vec![0.0; natt];
        let mut unit = vec![1.0; natt];
        let mut min_coeff = vec![0.0; natt];
        for a in (0..natt).filter(|&a| usable[a] && count[a] > 0) {
            let agree = same[a].max(count[a] - same[a]);
            pref[a] = (2 * agree - count[a]) as f64 / cases;

            min_coeff[a] = 0.01 * global_sd / summary.attribute(a).sd;
            if min_coeff[a] > 0.0 {
                while unit[a] > min_coeff[a] {
                    unit[a] /= 10.0;
                }
            }
        }

        let target_prec = summary.target().prec;
        let target_unit = if target_prec > 0.0 { 1.0 / target_prec } else { 1.0 };

        let mut min_items = (cases / 100.0).round().min(20.0);
        if min_items > cases / max_rules as f64 {
            min_items = cases / max_rules as f64;
        }
        if min_items < MINSPLIT as f64 {
            min_items = MINSPLIT as f64;
        }

        debug!(
            "{} cases, mean {:.4}, sd {:.4}, average deviation {:.4}, rules cover at least {} cases",
            n, global_mean, global_sd, global_err, min_items
        );

        Environment {
            dataset,
            summary,
            usable,
            global_mean,
            global_sd,
            global_err,
            pref,
            unit,
            min_coeff,
            target_unit,
            min_items,
            max_rules,
        }
    }

    pub fn nsamples(&self) -> usize {
        self.dataset.nsamples()
    }

    pub fn floor(&self) -> f64 {
        self.summary.floor()
    }

    pub fn ceiling(&self) -> f64 {
        self.summary.ceiling()
    }

    pub fn weight(&self, case: usize) -> f64 {
        self.dataset.weight(case)
    }

    /// Solver workspace for a working target
    pub fn workspace<'b>(&'b self, target: &'b [f64]) -> Workspace<'b> {
        Workspace {
            dataset: self.dataset,
            target,
            usable: &self.usable,
            floor: self.summary.floor(),
            ceiling: self.summary.ceiling(),
        }
    }

    /// Pessimistic estimate of the total error of a model with `params` parameters whose
    /// actual total error over all cases is `err`
    pub fn adjusted_err(&self, err: f64, params: f64) -> f64 {
        let n = self.nsamples() as f64;
        n * estimate_err(err / n, n, params)
    }
}

/// Grows a model tree for one working target
pub(crate) struct TreeBuilder<'a> {
    env: &'a Environment<'a>,
    target: &'a [f64],
    solver: Solver,
    resid: Vec<f64>,
    do_not_use: Vec<bool>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(env: &'a Environment<'a>, target: &'a [f64]) -> Self {
        let natt = env.dataset.nattributes();
        TreeBuilder {
            env,
            target,
            solver: Solver::new(natt),
            resid: vec![0.0; env.nsamples()],
            do_not_use: vec![true; natt],
        }
    }

    /// Grows a tree over all cases; `cases` must hold every case index once
    pub fn grow(&mut self, cases: &mut [usize], progress: &mut dyn Progress) -> ModelTree {
        let mut tree = ModelTree::new();
        let root = self.form_tree(&mut tree, cases, None, progress);
        tree.set_root(root);
        tree
    }

    fn regress(&mut self, cases: &[usize], restrict: bool) -> LinearModel {
        let ws = self.env.workspace(self.target);
        let do_not_use = if restrict {
            Some(self.do_not_use.as_slice())
        } else {
            None
        };
        self.solver.regress(&ws, cases, do_not_use)
    }

    fn form_tree(
        &mut self,
        tree: &mut ModelTree,
        cases: &mut [usize],
        parent: Option<NodeId>,
        progress: &mut dyn Progress,
    ) -> NodeId {
        let env = self.env;
        let natt = env.dataset.nattributes();
        let root = cases.len() >= env.nsamples();

        let model = if root {
            None
        } else {
            self.do_not_use.iter_mut().for_each(|d| *d = true);
            let mut ancestor = parent;
            while let Some(p) = ancestor {
                if let Some(att) = tree.node(p).test.attribute() {
                    self.do_not_use[att] = false;
                }
                ancestor = tree.node(p).parent;
            }
            self.add_def_atts();

            Some(self.regress(cases, true))
        };

        let (mut sum_wt, mut raw_sum, mut sum, mut sum_sq, mut max_resid) = (0.0, 0.0, 0.0, 0.0, 0.0f64);
        for &i in cases.iter() {
            let (w, y) = (env.weight(i), self.target[i]);
            let r = match &model {
                Some(m) => y - m.value(env.dataset.row(i), env.floor(), env.ceiling()),
                None => y,
            };
            self.resid[i] = r;
            sum_wt += w;
            raw_sum += w * y;
            sum += w * r;
            sum_sq += w * r * r;
            max_resid = max_resid.max(r.abs());
        }

        let mean = raw_sum / sum_wt;
        let node_sd = sd(sum_wt, sum, sum_sq, env.global_sd);
        let model = model.unwrap_or_else(|| LinearModel::constant(mean, natt));
        let id = tree.add(Node::leaf(parent, cases.len(), mean, node_sd, model));

        if max_resid < 0.5 * env.target_unit {
            progress.advance(cases.len());
            return id;
        }

        let ctx = SplitContext {
            dataset: env.dataset,
            resid: &self.resid,
            node_sd,
            global_sd: env.global_sd,
            min_items: env.min_items,
        };
        let mut best: Option<(usize, Candidate)> = None;
        for (a, att) in env.dataset.attributes().iter().enumerate() {
            if att.is_ignored() || env.summary.attribute(a).skipped {
                continue;
            }

            let candidate = if att.is_discrete() {
                if root || att.max_value() > 3 || self.do_not_use[a] {
                    eval_discrete(&ctx, cases, a)
                } else {
                    None
                }
            } else {
                eval_continuous(&ctx, cases, a)
            };

            if let Some(c) = candidate.filter(|c| c.gain > -EPSILON) {
                let better = match &best {
                    None => true,
                    Some((b, bc)) => {
                        c.gain > bc.gain || (c.gain > 0.999 * bc.gain && env.pref[a] > env.pref[*b])
                    }
                };
                if better {
                    best = Some((a, c));
                }
            }
        }

        match best {
            None => progress.advance(cases.len()),
            Some((_, candidate)) => {
                tree.node_mut(id).test = candidate.test;
                self.divide(tree, id, cases, progress);
            }
        }

        id
    }

    /// Groups the cases of each branch and grows its subtree
    fn divide(
        &mut self,
        tree: &mut ModelTree,
        id: NodeId,
        cases: &mut [usize],
        progress: &mut dyn Progress,
    ) {
        let test = tree.node(id).test.clone();
        let att = test.attribute().unwrap_or(0);
        let dataset = self.env.dataset;

        let mut rest = cases;
        for v in 1..=3 {
            let mut first = 0;
            for j in 0..rest.len() {
                if test.group(dataset.value(rest[j], att)) == Some(v) {
                    rest.swap(first, j);
                    first += 1;
                }
            }

            let (group, tail) = std::mem::take(&mut rest).split_at_mut(first);
            rest = tail;

            let child = if group.is_empty() {
                let node = tree.node(id);
                let natt = dataset.nattributes();
                let empty = Node::leaf(
                    Some(id),
                    0,
                    node.mean,
                    node.sd,
                    LinearModel::constant(node.mean, natt),
                );
                tree.add(empty)
            } else {
                self.form_tree(tree, group, Some(id), progress)
            };
            tree.node_mut(id).branches.push(child);
        }
    }

    /// Fits the final model of every node
    ///
    /// A node may use the continuous attributes tested by its ancestors or anywhere in its
    /// subtree. Children are fitted before their parent.
    pub fn add_models(
        &mut self,
        tree: &mut ModelTree,
        id: NodeId,
        cases: &[usize],
        progress: &mut dyn Progress,
    ) {
        progress.advance(1);
        if tree.node(id).cases == 0 {
            return;
        }

        let branches = tree.node(id).branches.clone();
        let mut start = 0;
        for b in branches {
            let count = tree.node(b).cases;
            if count > 0 {
                self.add_models(tree, b, &cases[start..start + count], progress);
                start += count;
            } else {
                progress.advance(1);
            }
        }

        let dataset = self.env.dataset;
        self.do_not_use.iter_mut().for_each(|d| *d = true);
        let mut ancestor = tree.node(id).parent;
        while let Some(p) = ancestor {
            if let Some(att) = tree.node(p).test.attribute() {
                if dataset.attribute(att).is_continuous() {
                    self.do_not_use[att] = false;
                }
            }
            ancestor = tree.node(p).parent;
        }
        self.add_split_atts(tree, id);
        self.add_def_atts();

        let model = self.regress(cases, true);
        tree.node_mut(id).model = model;
    }

    /// Allows the continuous attributes tested in the subtree below `id`
    fn add_split_atts(&mut self, tree: &ModelTree, id: NodeId) {
        for (_, node) in tree.iter_from(id) {
            if let Test::Threshold { attribute, .. } = node.test {
                self.do_not_use[attribute] = false;
            }
        }
    }

    /// A derived attribute may be used as soon as one of the attributes it is computed from may
    fn add_def_atts(&mut self) {
        for (a, att) in self.env.dataset.attributes().iter().enumerate() {
            if !self.do_not_use[a] {
                continue;
            }
            if let Some(def) = att.definition() {
                if def.attributes_used().iter().any(|&u| !self.do_not_use[u]) {
                    self.do_not_use[a] = false;
                }
            }
        }
    }
}

/// Moves every cut of a continuous attribute down to the greatest training value not above it
pub(crate) fn adjust_thresholds(tree: &mut ModelTree, dataset: &Dataset) {
    let root = tree.root();
    let mut thresholds: Vec<(NodeId, usize)> = tree
        .iter_from(root)
        .filter_map(|(id, node)| match node.test {
            Test::Threshold { attribute, .. } => Some((id, attribute)),
            _ => None,
        })
        .collect();
    thresholds.sort_by_key(|(_, att)| *att);

    let mut sorted: Option<(usize, Vec<f64>)> = None;
    for (id, att) in thresholds {
        if sorted.as_ref().map(|(a, _)| *a) != Some(att) {
            let mut values: Vec<f64> = dataset
                .records()
                .column(att)
                .iter()
                .filter(|v| !v.is_not_applicable())
                .map(|v| v.as_f64())
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            sorted = Some((att, values));
        }

        if let Some((_, values)) = &sorted {
            if let Test::Threshold { cut, .. } = &mut tree.node_mut(id).test {
                let below = values.partition_point(|v| *v <= *cut);
                if let Some(v) = values.get(below.saturating_sub(1)) {
                    *cut = *v;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubist::progress::Silent;
    use cubist::{Attribute, Value};
    use ndarray::{Array1, Array2};

    fn prepare(dataset: &Dataset) -> (Dataset, Summary) {
        let summary = dataset.summarize(0.1).unwrap();
        let mut data = dataset.clone();
        data.impute(&summary);
        data.normalize_weights();
        (data, summary)
    }

    /// Two lines meeting at a jump halfway
    fn v_shape(n: usize) -> Dataset {
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(n, |i| {
            if i < n / 2 {
                i as f64
            } else {
                (n + n / 2 - i) as f64
            }
        });
        Dataset::from_continuous(x, y).unwrap()
    }

    #[test]
    fn global_properties() {
        let (data, summary) = prepare(&v_shape(100));
        let env = Environment::new(&data, &summary, 100);

        assert!((env.global_mean - 50.0).abs() < 1e-9);
        assert!(env.global_sd > 0.0);
        assert_eq!(env.min_items, MINSPLIT as f64);
        assert!((env.target_unit - 0.1).abs() < 1e-12);
        // the unit is a power of ten not above the smallest coefficient kept
        assert!(env.unit[0] <= env.min_coeff[0]);
        assert!(env.unit[0] * 10.0 > env.min_coeff[0]);
    }

    #[test]
    fn min_items_is_bounded() {
        let (data, summary) = prepare(&v_shape(3000));
        assert_eq!(Environment::new(&data, &summary, 100).min_items, 20.0);
        assert_eq!(Environment::new(&data, &summary, 500).min_items, 6.0);
        assert_eq!(Environment::new(&data, &summary, 2000).min_items, MINSPLIT as f64);
    }

    #[test]
    fn grows_one_leaf_per_line() {
        let (data, summary) = prepare(&v_shape(100));
        let env = Environment::new(&data, &summary, 100);
        let target = data.targets().to_vec();
        let mut builder = TreeBuilder::new(&env, &target);
        let mut cases: Vec<usize> = (0..100).collect();

        let mut tree = builder.grow(&mut cases, &mut Silent);
        let root = tree.root();
        assert!(matches!(tree.node(root).test, Test::Threshold { attribute: 0, .. }));
        assert_eq!(tree.leaves(root), 2);

        // the cases of each branch are contiguous
        let lo = tree.branch(root, 2);
        assert_eq!(tree.node(lo).cases, 50);
        assert!(cases[..50].iter().all(|&i| i < 50));

        builder.add_models(&mut tree, root, &cases, &mut Silent);
        let model = tree.node(lo).model();
        assert!((model.coefficients[0] - 1.0).abs() < 1e-6);

        adjust_thresholds(&mut tree, &data);
        match tree.node(root).test {
            Test::Threshold { cut, .. } => assert_eq!(cut, 49.0),
            ref other => panic!("unexpected test {:?}", other),
        }
    }

    #[test]
    fn derived_attributes_follow_their_sources() {
        use cubist::derived::{BinaryOp, Expr};

        let def = Expr::binary(BinaryOp::Mul, Expr::Attribute(0), Expr::Number(2.0));
        let atts = vec![Attribute::continuous("x"), Attribute::derived("twice", def)];
        let records = Array2::from_shape_fn((10, 2), |(i, _)| Value::Continuous(i as f64));
        let data = Dataset::new(atts, records, Array1::zeros(10)).unwrap();
        let (data, summary) = prepare(&data);
        let env = Environment::new(&data, &summary, 100);
        let target = data.targets().to_vec();
        let mut builder = TreeBuilder::new(&env, &target);

        builder.do_not_use = vec![false, true];
        builder.add_def_atts();
        assert_eq!(builder.do_not_use, vec![false, false]);

        builder.do_not_use = vec![true, true];
        builder.add_def_atts();
        assert_eq!(builder.do_not_use, vec![true, true]);
    }
}
