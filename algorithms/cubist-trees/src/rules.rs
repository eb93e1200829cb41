//! Rules and rulesets
//!
//! A rule is a conjunction of conditions, each the outcome of a test taken from a model tree,
//! together with the linear model that predicts the target of the cases satisfying it. The
//! prediction of a ruleset for a case is the mean of the values of all rules the case
//! satisfies.
use std::fmt;

use cubist::dataset::NA_CODE;
use cubist::{Attribute, Value};
use cubist_linear::LinearModel;
use ndarray::ArrayView1;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::tree::{threshold_outcome, Test};

/// How a condition tests its attribute
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub enum Split {
    /// The value has the code of the outcome
    Discrete,
    /// The value is not applicable, up to the cut or above it
    Threshold { cut: f64 },
    /// The code of the value is flagged in the subset
    Subset(Vec<bool>),
}

/// One condition of a rule
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub(crate) attribute: usize,
    pub(crate) outcome: usize,
    pub(crate) split: Split,
}

impl Condition {
    /// The condition of reaching branch `outcome` of a test
    pub(crate) fn from_test(test: &Test, outcome: usize) -> Option<Self> {
        let (attribute, split) = match test {
            Test::Leaf => return None,
            Test::Discrete { attribute } => (*attribute, Split::Discrete),
            Test::Threshold { attribute, cut } => (*attribute, Split::Threshold { cut: *cut }),
            Test::Subset {
                attribute,
                subsets,
            } => (*attribute, Split::Subset(subsets[outcome - 1].clone())),
        };

        Some(Condition {
            attribute,
            outcome,
            split,
        })
    }

    pub fn attribute(&self) -> usize {
        self.attribute
    }

    pub fn outcome(&self) -> usize {
        self.outcome
    }

    pub fn split(&self) -> &Split {
        &self.split
    }

    pub fn satisfied_by(&self, case: ArrayView1<'_, Value>) -> bool {
        let value = case[self.attribute];
        match &self.split {
            Split::Discrete => value.code() == self.outcome,
            Split::Threshold { cut } => threshold_outcome(value, *cut) == self.outcome,
            Split::Subset(subset) => subset.get(value.code()).copied().unwrap_or(false),
        }
    }

    /// Whether two conditions select the same cases
    pub(crate) fn same_as(&self, other: &Condition) -> bool {
        if self.attribute != other.attribute {
            return false;
        }
        match (&self.split, &other.split) {
            (Split::Discrete, Split::Discrete) => self.outcome == other.outcome,
            (Split::Threshold { cut: a }, Split::Threshold { cut: b }) => {
                self.outcome == other.outcome && a == b
            }
            (Split::Subset(a), Split::Subset(b)) => a == b,
            _ => false,
        }
    }

    /// Formats the condition with attribute and category names, e.g. `x <= 4.5`
    pub fn display<'a>(&'a self, attributes: &'a [Attribute]) -> DisplayCondition<'a> {
        DisplayCondition {
            condition: self,
            attribute: &attributes[self.attribute],
        }
    }
}

pub struct DisplayCondition<'a> {
    condition: &'a Condition,
    attribute: &'a Attribute,
}

impl<'a> DisplayCondition<'a> {
    fn value_name(&self, code: usize) -> &'a str {
        if code == NA_CODE {
            "N/A"
        } else {
            self.attribute.value_name(code).unwrap_or("?")
        }
    }
}

impl<'a> fmt::Display for DisplayCondition<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = self.attribute.name();
        let outcome = self.condition.outcome;
        match &self.condition.split {
            Split::Discrete => write!(f, "{} = {}", name, self.value_name(outcome)),
            Split::Threshold { .. } if outcome == 1 => write!(f, "{} = N/A", name),
            Split::Threshold { cut } if outcome == 2 => write!(f, "{} <= {}", name, cut),
            Split::Threshold { cut } => write!(f, "{} > {}", name, cut),
            Split::Subset(subset) => {
                let codes: Vec<usize> = subset
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| **s)
                    .map(|(c, _)| c)
                    .collect();
                match codes.as_slice() {
                    [code] => write!(f, "{} = {}", name, self.value_name(*code)),
                    [first, .., last] if self.attribute.is_ordered() => write!(
                        f,
                        "{} in [{}-{}]",
                        name,
                        self.value_name(*first),
                        self.value_name(*last)
                    ),
                    _ => {
                        let names: Vec<&str> = codes.iter().map(|c| self.value_name(*c)).collect();
                        write!(f, "{} in {{{}}}", name, names.join(", "))
                    }
                }
            }
        }
    }
}

/// A rule of a ruleset
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub(crate) number: usize,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) model: LinearModel,
    pub(crate) cover: usize,
    pub(crate) mean: f64,
    pub(crate) lo_val: f64,
    pub(crate) hi_val: f64,
    pub(crate) lo_lim: f64,
    pub(crate) hi_lim: f64,
    pub(crate) est_err: f64,
}

impl Rule {
    /// Position of the rule in its ruleset, starting from one
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    /// Number of training cases satisfying the rule
    pub fn cover(&self) -> usize {
        self.cover
    }

    /// Weighted mean target of the covered cases
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Lowest and highest target of the covered cases
    pub fn range(&self) -> (f64, f64) {
        (self.lo_val, self.hi_val)
    }

    /// Bounds of the values of the rule
    pub fn limits(&self) -> (f64, f64) {
        (self.lo_lim, self.hi_lim)
    }

    /// Estimated mean absolute error
    pub fn estimated_error(&self) -> f64 {
        self.est_err
    }

    pub fn matches(&self, case: ArrayView1<'_, Value>) -> bool {
        self.conditions.iter().all(|c| c.satisfied_by(case))
    }

    /// Value of the model for a case, bounded by the limits of the rule
    pub fn value(&self, case: ArrayView1<'_, Value>) -> f64 {
        self.model.value(case, self.lo_lim, self.hi_lim)
    }

    /// Whether the rule has the same conditions as `conditions`, in any order
    pub(crate) fn same_conditions(&self, conditions: &[Condition]) -> bool {
        self.conditions.len() == conditions.len()
            && self
                .conditions
                .iter()
                .all(|a| conditions.iter().any(|b| a.same_as(b)))
    }

    pub fn display<'a>(&'a self, attributes: &'a [Attribute], target: &'a str) -> DisplayRule<'a> {
        DisplayRule {
            rule: self,
            attributes,
            target,
        }
    }
}

pub struct DisplayRule<'a> {
    rule: &'a Rule,
    attributes: &'a [Attribute],
    target: &'a str,
}

impl<'a> fmt::Display for DisplayRule<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rule = self.rule;
        writeln!(
            f,
            "Rule {}: [{} cases, mean {}, range {} to {}, est err {:.4}]",
            rule.number, rule.cover, rule.mean, rule.lo_val, rule.hi_val, rule.est_err
        )?;
        if !rule.conditions.is_empty() {
            writeln!(f, "    if")?;
            for c in &rule.conditions {
                writeln!(f, "\t{}", c.display(self.attributes))?;
            }
            writeln!(f, "    then")?;
        }
        write!(f, "\t{} = {}", self.target, rule.model.display(self.attributes))
    }
}

/// Rules extracted from one model tree
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSet {
    pub(crate) rules: Vec<Rule>,
    pub(crate) default_value: f64,
}

impl RuleSet {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Value predicted for cases that satisfy no rule
    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    /// Mean value of the rules a case satisfies
    pub fn prediction(&self, case: ArrayView1<'_, Value>) -> f64 {
        let (sum, count) = self
            .rules
            .iter()
            .filter(|r| r.matches(case))
            .fold((0.0, 0usize), |(sum, count), r| (sum + r.value(case), count + 1));

        if count > 0 {
            sum / count as f64
        } else {
            self.default_value
        }
    }
}

/// How often an attribute takes part in the rules of a committee
///
/// Percentages are weighted by the number of training cases each rule covers.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeUsage {
    pub attribute: usize,
    /// Percentage of cases covered by rules with a condition on the attribute
    pub conditions: f64,
    /// Percentage of cases covered by rules whose model uses the attribute
    pub model: f64,
}

impl AttributeUsage {
    /// Usage of every attribute that takes part in at least 1% of the cases, most used in
    /// conditions first
    ///
    /// An attribute counts as used whenever an attribute derived from it is.
    pub fn compute(rulesets: &[RuleSet], attributes: &[Attribute]) -> Vec<AttributeUsage> {
        let natt = attributes.len();
        let mut total = 0.0;
        let mut conditions = vec![0.0; natt];
        let mut model = vec![0.0; natt];

        for rule in rulesets.iter().flat_map(|rs| rs.rules.iter()) {
            let cover = rule.cover as f64;
            total += cover;

            let mut used = vec![false; natt];
            for c in &rule.conditions {
                note_used(attributes, c.attribute, &mut used);
            }
            for a in (0..natt).filter(|a| used[*a]) {
                conditions[a] += cover;
            }

            let mut used = vec![false; natt];
            for a in rule.model.attributes() {
                note_used(attributes, a, &mut used);
            }
            for a in (0..natt).filter(|a| used[*a]) {
                model[a] += cover;
            }
        }

        let mut usage: Vec<AttributeUsage> = (0..natt)
            .filter(|a| conditions[*a].max(model[*a]) >= 0.01 * total && total > 0.0)
            .map(|a| AttributeUsage {
                attribute: a,
                conditions: (100.0 * conditions[a] / total).round(),
                model: (100.0 * model[a] / total).round(),
            })
            .collect();
        usage.sort_by(|a, b| {
            let a_key = (conditions[a.attribute], model[a.attribute]);
            let b_key = (conditions[b.attribute], model[b.attribute]);
            b_key
                .partial_cmp(&a_key)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        usage
    }
}

fn note_used(attributes: &[Attribute], att: usize, used: &mut [bool]) {
    if used[att] {
        return;
    }
    used[att] = true;
    if let Some(def) = attributes[att].definition() {
        for a in def.attributes_used() {
            note_used(attributes, a, used);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn rule(conditions: Vec<Condition>, model: LinearModel, cover: usize) -> Rule {
        Rule {
            number: 1,
            conditions,
            model,
            cover,
            mean: 0.0,
            lo_val: 0.0,
            hi_val: 10.0,
            lo_lim: 0.0,
            hi_lim: 10.0,
            est_err: 1.0,
        }
    }

    fn at_most(attribute: usize, cut: f64) -> Condition {
        Condition {
            attribute,
            outcome: 2,
            split: Split::Threshold { cut },
        }
    }

    #[test]
    fn conditions_follow_their_branch() {
        let subset = Condition {
            attribute: 1,
            outcome: 3,
            split: Split::Subset(vec![false, false, true, false, true]),
        };
        let discrete = Condition {
            attribute: 1,
            outcome: 2,
            split: Split::Discrete,
        };
        let case = |x: Value, c: usize| array![x, Value::Discrete(c)];

        assert!(at_most(0, 1.5).satisfied_by(case(Value::Continuous(1.5), 2).view()));
        assert!(!at_most(0, 1.5).satisfied_by(case(Value::Continuous(1.6), 2).view()));
        assert!(!at_most(0, 1.5).satisfied_by(case(Value::NotApplicable, 2).view()));
        assert!(subset.satisfied_by(case(Value::Continuous(0.0), 4).view()));
        assert!(!subset.satisfied_by(case(Value::Continuous(0.0), 3).view()));
        assert!(discrete.satisfied_by(case(Value::Continuous(0.0), 2).view()));
        assert!(!discrete.satisfied_by(case(Value::Continuous(0.0), 3).view()));
    }

    #[test]
    fn prediction_averages_matching_rules() {
        let low = rule(vec![at_most(0, 5.0)], LinearModel::constant(2.0, 1), 10);
        let mut any = rule(vec![], LinearModel::constant(0.0, 1), 20);
        any.model.coefficients[0] = 3.0;
        let rs = RuleSet {
            rules: vec![low, any],
            default_value: 7.0,
        };

        assert_abs_diff_eq!(rs.prediction(array![Value::Continuous(1.0)].view()), 2.5);
        // the second rule is capped at its upper limit
        assert_abs_diff_eq!(rs.prediction(array![Value::Continuous(6.0)].view()), 10.0);

        let empty = RuleSet {
            rules: vec![],
            default_value: 7.0,
        };
        assert_abs_diff_eq!(empty.prediction(array![Value::Continuous(1.0)].view()), 7.0);
    }

    #[test]
    fn usage_is_weighted_by_cover() {
        let atts = vec![
            Attribute::continuous("x0"),
            Attribute::continuous("x1"),
            Attribute::continuous("x2"),
        ];
        let mut uses_x1 = LinearModel::constant(0.0, 3);
        uses_x1.coefficients[1] = 1.0;
        let mut uses_x0 = LinearModel::constant(0.0, 3);
        uses_x0.coefficients[0] = 1.0;

        let rs = RuleSet {
            rules: vec![
                rule(vec![at_most(0, 1.0)], uses_x1, 30),
                rule(vec![], uses_x0, 70),
            ],
            default_value: 0.0,
        };

        let usage = AttributeUsage::compute(&[rs], &atts);
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].attribute, 0);
        assert_abs_diff_eq!(usage[0].conditions, 30.0);
        assert_abs_diff_eq!(usage[0].model, 70.0);
        assert_eq!(usage[1].attribute, 1);
        assert_abs_diff_eq!(usage[1].conditions, 0.0);
        assert_abs_diff_eq!(usage[1].model, 30.0);
    }

    #[test]
    fn display() {
        let atts = vec![
            Attribute::continuous("x"),
            Attribute::discrete("colour", vec!["red", "green", "blue"]),
        ];
        let colours = Condition {
            attribute: 1,
            outcome: 2,
            split: Split::Subset(vec![false, false, true, false, true]),
        };
        assert_eq!(at_most(0, 4.5).display(&atts).to_string(), "x <= 4.5");
        assert_eq!(colours.display(&atts).to_string(), "colour in {red, blue}");
    }
}
