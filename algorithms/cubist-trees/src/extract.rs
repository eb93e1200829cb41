//! Rule extraction from a pruned model tree
//!
//! Every path from the root to a leaf reached by training cases gives a candidate rule whose
//! model is the model of the leaf. Conditions are then dropped from the rule, one at a time,
//! while dropping one improves the predictions of the cases it brings into the rule. The
//! predictions of a case are tracked as the running mean of the values of the rules which
//! cover it so far, starting from the value of the tree.
//!
//! Cases are kept in three lists: those satisfying every remaining condition, those failing
//! exactly one, and the rest. Dropping a condition only moves cases from the second list to the
//! first and from the third to the second, so the statistics of each condition are updated
//! incrementally.
use cubist::progress::Progress;
use cubist::stats::estimate_err;
use cubist_linear::LinearModel;

use crate::rules::{Condition, Rule, RuleSet};
use crate::tree::{Environment, ModelTree, NodeId};

/// A condition on the current path with the cases that fail it
struct PathCondition {
    condition: Condition,
    failed_by: Vec<bool>,
}

pub(crate) struct RuleExtractor<'a> {
    env: &'a Environment<'a>,
    extrapolation: f64,
    unbiased: bool,
    path: Vec<PathCondition>,
    /// Number of conditions on the path failed by each case
    nfail: Vec<usize>,
    /// Same while conditions of the current rule are being dropped
    local_nfail: Vec<usize>,
    fail0: Vec<usize>,
    fail1: Vec<usize>,
    fail_many: Vec<usize>,
    /// Weight of the cases satisfying the rule (`[0]`) or failing only condition `d` (`[d]`)
    total: Vec<f64>,
    /// Error of the rule on its cases (`[0]`), or the reduction in error if condition `d` was
    /// dropped (`[d]`)
    pred_err: Vec<f64>,
    deleted: Vec<bool>,
    bestd: usize,
    /// Unbounded value of the current model for each case
    cpred: Vec<f64>,
    pred_sum: Vec<f64>,
    pred_count: Vec<f64>,
    rules: Vec<Rule>,
}

impl<'a> RuleExtractor<'a> {
    pub fn new(env: &'a Environment<'a>, extrapolation: f64, unbiased: bool) -> Self {
        let n = env.nsamples();
        RuleExtractor {
            env,
            extrapolation,
            unbiased,
            path: Vec::new(),
            nfail: vec![0; n],
            local_nfail: vec![0; n],
            fail0: Vec::new(),
            fail1: Vec::new(),
            fail_many: Vec::new(),
            total: Vec::new(),
            pred_err: Vec::new(),
            deleted: Vec::new(),
            bestd: 0,
            cpred: vec![0.0; n],
            pred_sum: vec![0.0; n],
            pred_count: vec![0.0; n],
            rules: Vec::new(),
        }
    }

    /// Forms the ruleset of a tree, with rules ordered by increasing mean target
    pub fn extract(mut self, tree: &ModelTree, progress: &mut dyn Progress) -> RuleSet {
        let env = self.env;
        for i in 0..env.nsamples() {
            self.pred_sum[i] = tree.value(env.dataset.row(i), env.floor(), env.ceiling());
            self.pred_count[i] = 1.0;
        }

        self.scan(tree, tree.root(), progress);

        let mut rules = self.rules;
        rules.sort_by(|a, b| {
            a.mean
                .partial_cmp(&b.mean)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (r, rule) in rules.iter_mut().enumerate() {
            rule.number = r + 1;
        }

        RuleSet {
            rules,
            default_value: env.global_mean,
        }
    }

    fn scan(&mut self, tree: &ModelTree, id: NodeId, progress: &mut dyn Progress) {
        let node = tree.node(id);
        if node.is_leaf() {
            if node.cases >= 1 {
                self.local_nfail.copy_from_slice(&self.nfail);
                self.prune_rule(&node.model, node.coeffs);
                progress.advance(node.cases);
            }
            return;
        }

        for (v, &b) in node.branches.iter().enumerate() {
            if let Some(condition) = Condition::from_test(&node.test, v + 1) {
                self.push_condition(condition);
                self.scan(tree, b, progress);
                self.pop_condition();
            }
        }
    }

    fn push_condition(&mut self, condition: Condition) {
        let dataset = self.env.dataset;
        let failed_by: Vec<bool> = (0..dataset.nsamples())
            .map(|i| !condition.satisfied_by(dataset.row(i)))
            .collect();
        for (n, _) in self.nfail.iter_mut().zip(&failed_by).filter(|(_, f)| **f) {
            *n += 1;
        }
        self.path.push(PathCondition {
            condition,
            failed_by,
        });
    }

    fn pop_condition(&mut self) {
        if let Some(last) = self.path.pop() {
            for (n, _) in self.nfail.iter_mut().zip(&last.failed_by).filter(|(_, f)| **f) {
                *n -= 1;
            }
        }
    }

    fn failed(&self, d: usize, case: usize) -> bool {
        self.path[d - 1].failed_by[case]
    }

    /// Drops conditions from the rule of the current path and adds the result to the ruleset
    fn prune_rule(&mut self, model: &LinearModel, init_coeffs: f64) {
        let ncond = self.path.len();
        let mut remaining = ncond;
        self.bestd = 0;
        self.deleted = vec![false; ncond + 1];
        self.total = vec![0.0; ncond + 1];
        self.pred_err = vec![0.0; ncond + 1];

        loop {
            self.process_lists(model);
            if remaining == 1 {
                break;
            }

            let mut best = 0;
            for d in 1..=ncond {
                if !self.deleted[d]
                    && self.pred_err[d] >= 0.0
                    && (best == 0 || self.pred_err[d] > self.pred_err[best])
                {
                    best = d;
                }
            }
            if best == 0 {
                break;
            }

            self.bestd = best;
            self.deleted[best] = true;
            remaining -= 1;
        }

        if ncond > 0 && remaining == 0 {
            return;
        }

        let env = self.env;
        let (mut cover, mut sum_wt, mut sum) = (0, 0.0, 0.0);
        let (mut lo_val, mut hi_val) = (f64::INFINITY, f64::NEG_INFINITY);
        for &i in &self.fail0 {
            let (w, y) = (env.weight(i), env.dataset.target(i));
            cover += 1;
            sum_wt += w;
            sum += w * y;
            lo_val = lo_val.min(y);
            hi_val = hi_val.max(y);
        }
        if cover == 0 {
            return;
        }

        let est_err = estimate_err(self.pred_err[0] / self.total[0], cover as f64, init_coeffs);
        let conditions = self.remaining_conditions();
        if self.new_rule(conditions, model, cover, sum / sum_wt, lo_val, hi_val, est_err) {
            for &i in &self.fail0 {
                if self.nfail[i] != 0 {
                    self.pred_sum[i] += self.cpred[i].max(lo_val).min(hi_val);
                    self.pred_count[i] += 1.0;
                }
            }

            if self.unbiased {
                self.remove_bias(init_coeffs as usize);
            }
        }
    }

    /// Sets up the case lists, or updates them after dropping condition `bestd`
    fn process_lists(&mut self, model: &LinearModel) {
        if self.bestd == 0 {
            self.fail0.clear();
            self.fail1.clear();
            self.fail_many.clear();
            self.total.iter_mut().for_each(|t| *t = 0.0);
            self.pred_err.iter_mut().for_each(|e| *e = 0.0);

            for i in 0..self.env.nsamples() {
                match self.local_nfail[i] {
                    0 => {
                        self.update_count(0, i, model);
                        self.fail0.push(i);
                    }
                    1 => {
                        let d = self.single_fail(i);
                        self.update_count(d, i, model);
                        self.fail1.push(i);
                    }
                    _ => self.fail_many.push(i),
                }
            }
            return;
        }

        let best = self.bestd;
        for i in std::mem::take(&mut self.fail1) {
            if self.failed(best, i) {
                self.local_nfail[i] = 0;
                self.update_count(0, i, model);
                self.fail0.push(i);
            } else {
                self.fail1.push(i);
            }
        }

        for i in std::mem::take(&mut self.fail_many) {
            if self.failed(best, i) {
                self.local_nfail[i] -= 1;
                if self.local_nfail[i] == 1 {
                    let d = self.single_fail(i);
                    self.update_count(d, i, model);
                    self.fail1.push(i);
                    continue;
                }
            }
            self.fail_many.push(i);
        }
    }

    /// The only remaining condition a case fails
    fn single_fail(&self, case: usize) -> usize {
        (1..=self.path.len())
            .find(|&d| !self.deleted[d] && self.failed(d, case))
            .unwrap_or(0)
    }

    fn update_count(&mut self, d: usize, case: usize, model: &LinearModel) {
        let env = self.env;
        let (w, y) = (env.weight(case), env.dataset.target(case));
        self.total[d] += w;

        let raw = model.raw_value(env.dataset.row(case));
        self.cpred[case] = raw;
        let value = raw.max(env.floor()).min(env.ceiling());

        if d > 0 {
            let (sum, count) = (self.pred_sum[case], self.pred_count[case]);
            let old = sum / count;
            let new = (sum + value) / (count + 1.0);
            self.pred_err[d] += w * ((y - old).abs() - (y - new).abs());
        } else {
            self.pred_err[0] += w * (y - value).abs();
        }
    }

    /// Conditions that were not dropped, those satisfied by more cases first
    fn remaining_conditions(&self) -> Vec<Condition> {
        let mut kept: Vec<usize> = (1..=self.path.len()).filter(|&d| !self.deleted[d]).collect();
        kept.sort_by(|&a, &b| {
            self.total[b]
                .partial_cmp(&self.total[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        kept.iter()
            .map(|&d| self.path[d - 1].condition.clone())
            .collect()
    }

    /// Adds a rule unless a rule with the same conditions exists, in which case the model with
    /// the lower estimated error is kept
    #[allow(clippy::too_many_arguments)]
    fn new_rule(
        &mut self,
        conditions: Vec<Condition>,
        model: &LinearModel,
        cover: usize,
        mean: f64,
        lo_val: f64,
        hi_val: f64,
        est_err: f64,
    ) -> bool {
        if let Some(rule) = self
            .rules
            .iter_mut()
            .find(|r| r.same_conditions(&conditions))
        {
            if est_err < rule.est_err {
                rule.model = model.clone();
                rule.est_err = est_err;
            }
            return false;
        }

        let range = hi_val - lo_val;
        let lo_lim = match lo_val - self.extrapolation * range {
            v if v < 0.0 && lo_val >= 0.0 => 0.0,
            v => v,
        };
        let hi_lim = match hi_val + self.extrapolation * range {
            v if v > 0.0 && hi_val <= 0.0 => 0.0,
            v => v,
        };

        self.rules.push(Rule {
            number: self.rules.len() + 1,
            conditions,
            model: model.clone(),
            cover,
            mean,
            lo_val,
            hi_val,
            lo_lim,
            hi_lim,
            est_err,
        });
        true
    }

    /// Shifts the intercept of the newest rule until its mean error on the cases it covers is
    /// below half the precision of the target
    ///
    /// Bounding the values of the rule changes the mean error, so the shift is repeated while
    /// the bias keeps shrinking.
    fn remove_bias(&mut self, coeffs: usize) {
        let env = self.env;
        let rule = match self.rules.last_mut() {
            Some(rule) => rule,
            None => return,
        };
        let (lo, hi) = (rule.lo_lim, rule.hi_lim);

        let (mut tot_wt, mut tot_err) = (0.0, 0.0);
        for &i in &self.fail0 {
            let w = env.weight(i);
            tot_wt += w;
            tot_err += w * (self.cpred[i].max(lo).min(hi) - env.dataset.target(i));
        }

        let mut bias = tot_err / tot_wt;
        let mut tot_abs_err = None;
        while bias.abs() >= 0.5 * env.target_unit {
            let last_bias = bias;
            rule.model.intercept -= bias;

            let (mut err, mut abs_err) = (0.0, 0.0);
            for &i in &self.fail0 {
                let w = env.weight(i);
                self.cpred[i] -= bias;
                let e = self.cpred[i].max(lo).min(hi) - env.dataset.target(i);
                err += w * e;
                abs_err += w * e.abs();
            }
            tot_abs_err = Some(abs_err);

            bias = err / tot_wt;
            if bias.abs() >= last_bias.abs() {
                break;
            }
        }

        if let Some(abs_err) = tot_abs_err {
            rule.model.intercept = (rule.model.intercept / env.target_unit).round() * env.target_unit;
            rule.est_err = estimate_err(abs_err / tot_wt, rule.cover as f64, coeffs as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prune::Pruner;
    use crate::rules::Split;
    use crate::tree::{adjust_thresholds, TreeBuilder};
    use approx::assert_abs_diff_eq;
    use cubist::progress::Silent;
    use cubist::{Dataset, Summary, Value};
    use ndarray::{array, Array1, Array2};

    fn prepare(dataset: &Dataset) -> (Dataset, Summary) {
        let summary = dataset.summarize(0.1).unwrap();
        let mut data = dataset.clone();
        data.impute(&summary);
        data.normalize_weights();
        (data, summary)
    }

    /// y = x below 50 and 150 - x from 50 on
    fn jump(n: usize) -> Dataset {
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

    fn ruleset(env: &Environment, unbiased: bool) -> RuleSet {
        let target = env.dataset.targets().to_vec();
        let mut builder = TreeBuilder::new(env, &target);
        let mut cases: Vec<usize> = (0..env.nsamples()).collect();
        let mut tree = builder.grow(&mut cases, &mut Silent);
        let root = tree.root();
        builder.add_models(&mut tree, root, &cases, &mut Silent);
        Pruner::new(env, &target, &cases).prune(&mut tree, &mut Silent);
        adjust_thresholds(&mut tree, env.dataset);

        RuleExtractor::new(env, 0.1, unbiased).extract(&tree, &mut Silent)
    }

    #[test]
    fn one_rule_per_leaf() {
        let (data, summary) = prepare(&jump(100));
        let env = Environment::new(&data, &summary, 100);
        let rs = ruleset(&env, false);

        assert_eq!(rs.len(), 2);
        let (low, high) = (&rs.rules()[0], &rs.rules()[1]);
        assert_eq!(low.number(), 1);
        assert_eq!(low.cover(), 50);
        assert_abs_diff_eq!(low.mean(), 24.5, epsilon = 1e-9);
        assert_eq!(low.range(), (0.0, 49.0));
        // the lower limit does not cross zero
        assert_eq!(low.limits().0, 0.0);
        assert_eq!(low.conditions().len(), 1);
        assert_eq!(low.conditions()[0].split(), &Split::Threshold { cut: 49.0 });
        assert_eq!(high.cover(), 50);
        assert_abs_diff_eq!(high.mean(), 75.5, epsilon = 1e-9);

        assert_abs_diff_eq!(rs.prediction(array![Value::Continuous(10.0)].view()), 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(rs.prediction(array![Value::Continuous(60.0)].view()), 90.0, epsilon = 1e-6);
        assert_abs_diff_eq!(rs.default_value(), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn unbiased_rules_of_exact_models_are_unchanged() {
        let (data, summary) = prepare(&jump(100));
        let env = Environment::new(&data, &summary, 100);

        assert_eq!(ruleset(&env, true), ruleset(&env, false));
    }

    #[test]
    fn duplicate_rules_keep_the_lower_error() {
        let (data, summary) = prepare(&jump(100));
        let env = Environment::new(&data, &summary, 100);
        let mut extractor = RuleExtractor::new(&env, 0.1, false);
        let condition = Condition {
            attribute: 0,
            outcome: 2,
            split: Split::Threshold { cut: 49.0 },
        };

        let first = LinearModel::constant(1.0, 1);
        let better = LinearModel::constant(2.0, 1);
        let worse = LinearModel::constant(3.0, 1);

        assert!(extractor.new_rule(vec![condition.clone()], &first, 50, 24.5, 0.0, 49.0, 2.0));
        assert!(!extractor.new_rule(vec![condition.clone()], &better, 50, 24.5, 0.0, 49.0, 1.0));
        assert!(!extractor.new_rule(vec![condition.clone()], &worse, 50, 24.5, 0.0, 49.0, 3.0));
        assert_eq!(extractor.rules.len(), 1);
        assert_eq!(extractor.rules[0].model, better);
        assert_abs_diff_eq!(extractor.rules[0].est_err, 1.0);

        // another cut makes another rule
        let other = Condition {
            split: Split::Threshold { cut: 20.0 },
            ..condition
        };
        assert!(extractor.new_rule(vec![other], &worse, 20, 10.0, 0.0, 20.0, 3.0));
        assert_eq!(extractor.rules.len(), 2);
    }

    #[test]
    fn duplicates_ignore_condition_order() {
        let (data, summary) = prepare(&jump(100));
        let env = Environment::new(&data, &summary, 100);
        let mut extractor = RuleExtractor::new(&env, 0.1, false);
        let below = Condition {
            attribute: 0,
            outcome: 2,
            split: Split::Threshold { cut: 49.0 },
        };
        let above = Condition {
            attribute: 0,
            outcome: 3,
            split: Split::Threshold { cut: 10.0 },
        };

        let first = LinearModel::constant(1.0, 1);
        let better = LinearModel::constant(2.0, 1);

        let conditions = vec![below.clone(), above.clone()];
        assert!(extractor.new_rule(conditions, &first, 39, 30.0, 11.0, 49.0, 2.0));
        assert!(!extractor.new_rule(vec![above, below], &better, 39, 30.0, 11.0, 49.0, 1.0));
        assert_eq!(extractor.rules.len(), 1);
        assert_eq!(extractor.rules[0].model, better);
        assert_abs_diff_eq!(extractor.rules[0].est_err, 1.0);
    }

    #[test]
    fn bias_removal_reestimates_the_error() {
        let (data, summary) = prepare(&jump(100));
        let env = Environment::new(&data, &summary, 100);
        let mut extractor = RuleExtractor::new(&env, 0.1, true);
        let model = LinearModel::constant(16.0, 1);
        extractor.new_rule(vec![], &model, 10, 14.5, 0.0, 40.0, 1.0);

        // predictions 2 and 4 above the targets leave errors of 1 once the bias is removed
        extractor.fail0 = (10..20).collect();
        for i in 10..20 {
            extractor.cpred[i] = data.target(i) + if i % 2 == 0 { 2.0 } else { 4.0 };
        }
        extractor.remove_bias(1);

        let rule = &extractor.rules[0];
        assert_abs_diff_eq!(rule.est_err, estimate_err(1.0, 10.0, 1.0), epsilon = 1e-9);
        assert_abs_diff_eq!(rule.model.intercept, 13.0, epsilon = 1e-9);
    }

    #[test]
    fn limits_extend_the_range() {
        let (data, summary) = prepare(&jump(100));
        let env = Environment::new(&data, &summary, 100);
        let mut extractor = RuleExtractor::new(&env, 0.1, false);
        let model = LinearModel::constant(0.0, 1);

        extractor.new_rule(vec![], &model, 10, 0.0, -10.0, 10.0, 1.0);
        let (lo, hi) = extractor.rules[0].limits();
        assert_abs_diff_eq!(lo, -12.0, epsilon = 1e-9);
        assert_abs_diff_eq!(hi, 12.0, epsilon = 1e-9);
    }
}
