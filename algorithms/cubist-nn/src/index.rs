//! K-D index of the training instances
//!
//! Every instance stores its distance to two reference points. The first is an artificial
//! point whose values lie below most of the instances, the second is the instance farthest
//! from the first. By the triangle inequality a node of the index whose instances all lie
//! between `lo` and `hi` from a reference point holds nothing closer to a query than
//! `max(lo - d, d - hi)`, where `d` is the distance from the query to that reference point.
//!
//! Nodes split on the attribute with the greatest expected contribution to the distance.
//! Continuous attributes split three ways (not applicable, at most the mean, above the mean),
//! discrete attributes into one branch per value. A discrete attribute is never split on twice
//! along a path.
use cubist::{
    dataset::{FIRST_CODE, NA_CODE},
    Attribute, Summary, Value,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use noisy_float::prelude::*;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::distance::{distance, round_distance, Scale, DISTANCE_PRECISION};
use crate::error::{NnError, Result};
use crate::MAXN;

/// A training instance close to a query
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbour {
    /// Distance to the query, rounded to `1 / DISTANCE_PRECISION`
    pub distance: f64,
    pub instance: usize,
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
enum Split {
    /// One branch per code
    Discrete,
    /// Branches for not applicable, `<= cut` and `> cut`
    Continuous { cut: f64 },
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
enum IndexNode {
    /// Instances `order[start..end]`
    Leaf { start: usize, end: usize },
    Branch {
        attribute: usize,
        split: Split,
        min_ref: [f64; 2],
        max_ref: [f64; 2],
        branches: Vec<Option<usize>>,
    },
}

/// Index of the training instances for nearest neighbour queries
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceIndex {
    records: Array2<Value>,
    scales: Vec<Scale>,
    references: [Array1<Value>; 2],
    /// Distance of every instance to each reference point
    ref_distances: Array2<f64>,
    order: Vec<usize>,
    nodes: Vec<IndexNode>,
    root: Option<usize>,
}

impl InstanceIndex {
    /// Indexes the imputed training cases `records`
    pub fn new(records: Array2<Value>, attributes: &[Attribute], summary: &Summary) -> Result<Self> {
        if records.nrows() == 0 {
            return Err(NnError::EmptyIndex);
        }
        let scales = Scale::from_summary(attributes, summary);

        let low = scales
            .iter()
            .enumerate()
            .map(|(a, scale)| match scale {
                Scale::Continuous { sd } => Value::Continuous(summary.attribute(a).mean - 2.5 * sd),
                Scale::Skip => Value::Missing,
                _ => Value::Discrete(FIRST_CODE),
            })
            .collect::<Array1<_>>();

        let n = records.nrows();
        let mut ref_distances = Array2::zeros((n, 2));
        let mut far = 0;
        for i in 0..n {
            ref_distances[(i, 0)] = distance(&scales, records.row(i), low.view(), f64::INFINITY);
            if ref_distances[(i, 0)] > ref_distances[(far, 0)] {
                far = i;
            }
        }
        let high = records.row(far).to_owned();
        for i in 0..n {
            ref_distances[(i, 1)] = distance(&scales, records.row(i), high.view(), f64::INFINITY);
        }

        let mut builder = Builder {
            records: records.view(),
            scales: &scales,
            ref_distances: ref_distances.view(),
            order: (0..n).collect(),
            nodes: Vec::new(),
            tested: vec![false; scales.len()],
        };
        let root = builder.build(0, n);
        let Builder { order, nodes, .. } = builder;

        Ok(InstanceIndex {
            records,
            scales,
            references: [low, high],
            ref_distances,
            order,
            nodes,
            root,
        })
    }

    /// Number of indexed instances
    pub fn len(&self) -> usize {
        self.records.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> &Array2<Value> {
        &self.records
    }

    pub fn scales(&self) -> &[Scale] {
        &self.scales
    }

    /// Rounded distance between a case and an indexed instance
    pub fn distance_to(&self, case: ArrayView1<'_, Value>, instance: usize) -> f64 {
        round_distance(distance(
            &self.scales,
            case,
            self.records.row(instance),
            f64::INFINITY,
        ))
    }

    /// Finds the instances closest to `case` within `max_d`, nearest first
    ///
    /// Up to `MAXN` neighbours are returned; the first `k` of them are exact, later ones are
    /// only kept when they turned up during the search. `exclude` names an instance which is
    /// the query itself.
    pub fn find_nearest(
        &self,
        case: ArrayView1<'_, Value>,
        k: usize,
        max_d: f64,
        exclude: Option<usize>,
    ) -> Vec<Neighbour> {
        let mut best = Best::new(k, max_d);
        let case_refs = [
            distance(&self.scales, case, self.references[0].view(), f64::INFINITY),
            distance(&self.scales, case, self.references[1].view(), f64::INFINITY),
        ];
        let mut att_min_d = vec![0.0; self.scales.len()];

        if let Some(root) = self.root {
            let mut search = Search {
                index: self,
                case,
                case_refs,
                exclude,
                best: &mut best,
                att_min_d: &mut att_min_d,
            };
            search.scan(root, 0.0);
        }

        best.into_neighbours()
    }

    /// Linear scan giving the same neighbours as `find_nearest`
    pub fn brute_force_nearest(
        &self,
        case: ArrayView1<'_, Value>,
        max_d: f64,
        exclude: Option<usize>,
    ) -> Vec<Neighbour> {
        let mut all: Vec<Neighbour> = (0..self.len())
            .filter(|i| Some(*i) != exclude)
            .map(|instance| Neighbour {
                distance: self.distance_to(case, instance),
                instance,
            })
            .filter(|n| n.distance <= max_d)
            .collect();
        all.sort_by_key(|n| n64(n.distance));
        all.truncate(MAXN);
        all
    }
}

/// The best neighbours found so far, with placeholders at `max_d`
struct Best {
    distances: [f64; MAXN],
    instances: [Option<usize>; MAXN],
    /// Position of the worst neighbour that must be exact
    worst: usize,
}

impl Best {
    fn new(k: usize, max_d: f64) -> Self {
        Best {
            distances: [max_d; MAXN],
            instances: [None; MAXN],
            worst: k.max(1).min(MAXN) - 1,
        }
    }

    fn worst_best(&self) -> f64 {
        self.distances[self.worst]
    }

    fn insert(&mut self, d: f64, instance: usize) {
        if d > self.worst_best() {
            return;
        }
        if let Some(pos) = self.distances.iter().position(|best| *best >= d) {
            for j in (pos + 1..MAXN).rev() {
                self.distances[j] = self.distances[j - 1];
                self.instances[j] = self.instances[j - 1];
            }
            self.distances[pos] = d;
            self.instances[pos] = Some(instance);
        }
    }

    fn into_neighbours(self) -> Vec<Neighbour> {
        self.distances
            .iter()
            .zip(self.instances.iter())
            .filter_map(|(d, i)| {
                i.map(|instance| Neighbour {
                    distance: *d,
                    instance,
                })
            })
            .collect()
    }
}

struct Search<'a, 'b> {
    index: &'a InstanceIndex,
    case: ArrayView1<'b, Value>,
    case_refs: [f64; 2],
    exclude: Option<usize>,
    best: &'a mut Best,
    att_min_d: &'a mut [f64],
}

impl<'a, 'b> Search<'a, 'b> {
    fn slack(&self) -> f64 {
        self.best.worst_best() + 0.5 / DISTANCE_PRECISION
    }

    fn check(&mut self, instance: usize) {
        if Some(instance) == self.exclude {
            return;
        }
        let thresh = self.best.worst_best() + 0.55 / DISTANCE_PRECISION;
        let d = round_distance(distance(
            &self.index.scales,
            self.case,
            self.index.records.row(instance),
            thresh,
        ));
        self.best.insert(d, instance);
    }

    fn scan(&mut self, node: usize, min_d: f64) {
        let index = self.index;
        match &index.nodes[node] {
            IndexNode::Leaf { start, end } => {
                for &instance in &index.order[*start..*end] {
                    self.check(instance);
                }
            }
            IndexNode::Branch {
                attribute,
                split,
                min_ref,
                max_ref,
                branches,
            } => {
                let out_of_reach = (0..2).any(|r| {
                    (min_ref[r] - self.case_refs[r]).max(self.case_refs[r] - max_ref[r])
                        > self.slack()
                });
                if out_of_reach {
                    return;
                }

                let a = *attribute;
                let value = self.case[a];
                let first = outcome(split, value);
                if let Some(Some(child)) = branches.get(first) {
                    self.scan(*child, min_d);
                }

                let saved = self.att_min_d[a];
                for (v, child) in branches.iter().enumerate() {
                    let child = match child {
                        Some(child) if v != first => *child,
                        _ => continue,
                    };

                    let scale = &index.scales[a];
                    self.att_min_d[a] = if is_not_applicable(split, v)
                        || is_not_applicable(split, first)
                    {
                        1.0
                    } else {
                        match split {
                            Split::Continuous { cut } => scale.beyond_cut(value.as_f64(), *cut),
                            Split::Discrete => scale.between_codes(first, v),
                        }
                    };

                    let new_min_d = min_d + self.att_min_d[a] - saved;
                    if new_min_d <= self.slack() {
                        self.scan(child, new_min_d);
                    }
                }
                self.att_min_d[a] = saved;
            }
        }
    }
}

/// Branch taken by a value
fn outcome(split: &Split, value: Value) -> usize {
    match split {
        Split::Discrete => value.code(),
        Split::Continuous { cut } => {
            if value.is_not_applicable() {
                0
            } else if value.as_f64() <= *cut {
                1
            } else {
                2
            }
        }
    }
}

fn is_not_applicable(split: &Split, branch: usize) -> bool {
    match split {
        Split::Discrete => branch == NA_CODE,
        Split::Continuous { .. } => branch == 0,
    }
}

/// Moves the entries satisfying `pred` to the front and returns their number
fn partition(order: &mut [usize], mut pred: impl FnMut(usize) -> bool) -> usize {
    let mut k = 0;
    for i in 0..order.len() {
        if pred(order[i]) {
            order.swap(i, k);
            k += 1;
        }
    }
    k
}

struct Builder<'a> {
    records: ArrayView2<'a, Value>,
    scales: &'a [Scale],
    ref_distances: ArrayView2<'a, f64>,
    order: Vec<usize>,
    nodes: Vec<IndexNode>,
    tested: Vec<bool>,
}

impl<'a> Builder<'a> {
    fn leaf(&mut self, start: usize, end: usize) -> usize {
        self.nodes.push(IndexNode::Leaf { start, end });
        self.nodes.len() - 1
    }

    /// Expected contribution of attribute `a` to the distance between two instances of
    /// `order[lo..hi]`, with the mean of its known values
    fn expected_distance(&mut self, a: usize, lo: usize, hi: usize) -> Option<(f64, f64)> {
        let records = self.records;
        let scale = self.scales[a];
        let na = partition(&mut self.order[lo..hi], |i| records[(i, a)].is_not_applicable());

        let p_na = na as f64 / (hi - lo) as f64;
        let known = &self.order[lo + na..hi];
        if known.is_empty() {
            return None;
        }
        let cases = known.len() as f64;

        let mut mean = 0.0;
        let mut expected = 0.0;
        match scale {
            Scale::Skip => return None,
            Scale::Continuous { .. } => {
                mean = known.iter().map(|i| records[(*i, a)].as_f64()).sum::<f64>() / cases;
                expected = known
                    .iter()
                    .map(|i| scale.beyond_cut(records[(*i, a)].as_f64(), mean))
                    .sum::<f64>()
                    / cases;
            }
            Scale::Ordered { categories } | Scale::Unordered { categories } => {
                let ncodes = categories as usize + FIRST_CODE;
                let mut freq = vec![0.0; ncodes];
                for i in known {
                    let code = records[(*i, a)].code();
                    if code < ncodes {
                        freq[code] += 1.0;
                    }
                }

                if let Scale::Ordered { .. } = scale {
                    for v in FIRST_CODE..ncodes {
                        for vv in FIRST_CODE..ncodes {
                            expected += freq[v] * freq[vv] * (vv as f64 - v as f64).abs();
                        }
                    }
                } else {
                    for f in &freq[FIRST_CODE..] {
                        expected += f * (cases - f) * 2.0;
                    }
                }
                expected /= categories * cases * cases;
            }
        }

        let expected = 2.0 * p_na * (1.0 - p_na) + (1.0 - p_na) * (1.0 - p_na) * expected;
        Some((expected, mean))
    }

    fn build(&mut self, lo: usize, hi: usize) -> Option<usize> {
        if hi <= lo {
            return None;
        }
        if hi - lo == 1 {
            return Some(self.leaf(lo, hi));
        }

        let mut min_ref = [f64::INFINITY; 2];
        let mut max_ref = [f64::NEG_INFINITY; 2];
        for &i in &self.order[lo..hi] {
            for r in 0..2 {
                min_ref[r] = min_ref[r].min(self.ref_distances[(i, r)]);
                max_ref[r] = max_ref[r].max(self.ref_distances[(i, r)]);
            }
        }

        let mut best: Option<(usize, f64, f64)> = None;
        for a in 0..self.scales.len() {
            let scale = self.scales[a];
            if scale.is_skipped() || (self.tested[a] && !scale.is_continuous()) {
                continue;
            }
            if let Some((expected, mean)) = self.expected_distance(a, lo, hi) {
                if expected > best.map_or(0.0, |(_, e, _)| e) {
                    best = Some((a, expected, mean));
                }
            }
        }

        let (a, _, mean) = match best {
            Some(best) => best,
            None => return Some(self.leaf(lo, hi)),
        };
        let records = self.records;

        let (split, branches) = if self.scales[a].is_continuous() {
            let na = lo + partition(&mut self.order[lo..hi], |i| {
                records[(i, a)].is_not_applicable()
            });
            let low = na + partition(&mut self.order[na..hi], |i| {
                records[(i, a)].as_f64() <= mean
            });
            if na == hi || (na == lo && low == hi) || low == lo {
                return Some(self.leaf(lo, hi));
            }

            let branches = vec![self.build(lo, na), self.build(na, low), self.build(low, hi)];
            (Split::Continuous { cut: mean }, branches)
        } else {
            self.tested[a] = true;
            let ncodes = match self.scales[a] {
                Scale::Ordered { categories } | Scale::Unordered { categories } => {
                    categories as usize + FIRST_CODE
                }
                _ => FIRST_CODE,
            };

            let mut start = lo;
            let mut branches = Vec::with_capacity(ncodes);
            for v in 0..ncodes {
                let end = start + partition(&mut self.order[start..hi], |i| records[(i, a)].code() == v);
                branches.push(self.build(start, end));
                start = end;
            }
            self.tested[a] = false;
            (Split::Discrete, branches)
        };

        self.nodes.push(IndexNode::Branch {
            attribute: a,
            split,
            min_ref,
            max_ref,
            branches,
        });
        Some(self.nodes.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cubist::Dataset;
    use ndarray::array;

    fn grid() -> Dataset {
        let x = Array2::from_shape_fn((25, 2), |(i, j)| if j == 0 { (i % 5) as f64 } else { (i / 5) as f64 });
        let y = Array1::from_shape_fn(25, |i| i as f64);
        Dataset::from_continuous(x, y).unwrap()
    }

    fn index(data: &Dataset) -> InstanceIndex {
        let summary = data.summarize(0.1).unwrap();
        InstanceIndex::new(data.records().clone(), data.attributes(), &summary).unwrap()
    }

    #[test]
    fn empty_index_is_an_error() {
        let data = grid();
        let summary = data.summarize(0.1).unwrap();
        let records = Array2::from_elem((0, 2), Value::Missing);
        assert!(matches!(
            InstanceIndex::new(records, data.attributes(), &summary),
            Err(NnError::EmptyIndex)
        ));
    }

    #[test]
    fn every_instance_is_indexed_once() {
        let data = grid();
        let index = index(&data);

        let mut order = index.order.clone();
        order.sort_unstable();
        assert_eq!(order, (0..25).collect::<Vec<_>>());

        let mut covered = vec![0; 25];
        for node in &index.nodes {
            if let IndexNode::Leaf { start, end } = node {
                for i in &index.order[*start..*end] {
                    covered[*i] += 1;
                }
            }
        }
        assert!(covered.iter().all(|c| *c == 1));
    }

    #[test]
    fn nearest_on_a_grid() {
        let data = grid();
        let index = index(&data);

        // instance 12 is the centre (2, 2) of the grid
        let found = index.find_nearest(data.row(12), 4, 10.0, Some(12));
        assert!(found.len() >= 4);
        let mut first: Vec<usize> = found[..4].iter().map(|n| n.instance).collect();
        first.sort_unstable();
        assert_eq!(first, vec![7, 11, 13, 17]);
        for n in &found[..4] {
            assert_abs_diff_eq!(n.distance, index.distance_to(data.row(12), n.instance));
        }
        assert!(found.iter().all(|n| n.instance != 12));
    }

    #[test]
    fn nothing_beyond_max_distance() {
        let data = grid();
        let index = index(&data);
        let query = array![Value::Continuous(100.0), Value::Continuous(100.0)];

        assert!(index.find_nearest(query.view(), 3, 0.5, None).is_empty());
        assert!(index.brute_force_nearest(query.view(), 0.5, None).is_empty());
    }

    #[test]
    fn identical_instances() {
        let data = Dataset::from_continuous(Array2::ones((10, 2)), Array1::zeros(10)).unwrap();
        let index = index(&data);

        let found = index.find_nearest(data.row(0), 5, 1.0, None);
        assert_eq!(found.len(), 10);
        assert!(found.iter().all(|n| n.distance == 0.0));
    }
}
