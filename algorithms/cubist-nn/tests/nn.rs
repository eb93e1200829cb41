use approx::assert_abs_diff_eq;
use cubist::{Attribute, Dataset, Value};
use cubist_nn::{InstanceIndex, Neighbour, MAXN};
use ndarray::{Array1, Array2};
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn random_case(rng: &mut SmallRng) -> Vec<Value> {
    let x = if rng.gen_bool(0.1) {
        Value::NotApplicable
    } else {
        Value::Continuous(rng.gen_range(-5.0..5.0))
    };
    let size = Value::Discrete(rng.gen_range(2..6));
    let colour = if rng.gen_bool(0.05) {
        Value::NotApplicable
    } else {
        Value::Discrete(rng.gen_range(2..5))
    };
    let z = Value::Continuous(rng.gen_range(0.0..100.0f64).floor());

    vec![x, size, colour, z]
}

fn mixed(n: usize, rng: &mut SmallRng) -> Dataset {
    let atts = vec![
        Attribute::continuous("x"),
        Attribute::discrete("size", vec!["xs", "s", "m", "l"]).ordered(),
        Attribute::discrete("colour", vec!["red", "green", "blue"]),
        Attribute::continuous("z"),
    ];
    let values: Vec<Value> = (0..n).flat_map(|_| random_case(rng)).collect();
    let records = Array2::from_shape_vec((n, 4), values).unwrap();
    let targets = Array1::from_shape_fn(n, |i| i as f64);

    Dataset::new(atts, records, targets).unwrap()
}

fn assert_same_nearest(found: &[Neighbour], expected: &[Neighbour], k: usize) {
    let k = k.min(expected.len());
    assert!(found.len() >= k);
    for (f, e) in found[..k].iter().zip(expected[..k].iter()) {
        assert_abs_diff_eq!(f.distance, e.distance);
    }
}

#[test]
fn index_agrees_with_linear_scan() {
    let mut rng = SmallRng::seed_from_u64(42);
    let data = mixed(300, &mut rng);
    let summary = data.summarize(0.1).unwrap();
    let index = InstanceIndex::new(data.records().clone(), data.attributes(), &summary).unwrap();
    assert_eq!(index.len(), 300);

    for &max_d in &[0.25, 0.5, 10.0] {
        for i in (0..300).step_by(7) {
            let expected = index.brute_force_nearest(data.row(i), max_d, Some(i));
            for &k in &[1, 3, 9] {
                let found = index.find_nearest(data.row(i), k, max_d, Some(i));
                assert!(found.iter().all(|n| n.instance != i));
                assert_same_nearest(&found, &expected, k);
            }
        }

        for _ in 0..30 {
            let query = Array1::from(random_case(&mut rng));
            let expected = index.brute_force_nearest(query.view(), max_d, None);
            for &k in &[1, 5, MAXN] {
                let found = index.find_nearest(query.view(), k, max_d, None);
                assert_same_nearest(&found, &expected, k);
            }
        }
    }
}

#[test]
fn neighbours_are_sorted_and_bounded() {
    let mut rng = SmallRng::seed_from_u64(7);
    let data = mixed(100, &mut rng);
    let summary = data.summarize(0.1).unwrap();
    let index = InstanceIndex::new(data.records().clone(), data.attributes(), &summary).unwrap();

    for i in 0..100 {
        let found = index.find_nearest(data.row(i), 9, 0.5, None);
        assert!(found.len() <= MAXN);
        assert!(found.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(found.iter().all(|n| n.distance <= 0.5));
        // without exclusion the case finds itself first
        assert_abs_diff_eq!(found[0].distance, 0.0);
    }
}
