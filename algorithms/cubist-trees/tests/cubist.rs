use approx::assert_abs_diff_eq;
use cubist::prelude::*;
use cubist_datasets::generate;
use cubist_trees::{Cubist, CubistError, InstanceMode, Split};
use ndarray::{array, Array1, Array2};
use rand::{rngs::SmallRng, SeedableRng};

type TestResult = std::result::Result<(), CubistError>;

fn query(dataset: &Dataset, rows: Array2<Value>) -> Dataset {
    Dataset::unlabeled(dataset.attributes().to_vec(), rows).unwrap()
}

#[test]
fn linear_trend_is_recovered() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::linear(200, &array![3.], 0., 0.1, &mut rng)?;

    let model = Cubist::params().fit(&train)?;
    for rule in model.committee()[0].rules() {
        let slope = rule.model().coefficients[0];
        assert!((slope - 3.).abs() < 0.3, "slope {} in rule {}", slope, rule.number());
    }

    let pred = model.predict(&query(&train, array![[Value::Continuous(10.)]]));
    assert_abs_diff_eq!(pred[0], 30., epsilon = 1.);
    Ok(())
}

#[test]
fn predictions_stay_within_the_target_range() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::friedman1(300, 1., &mut rng)?;

    for &instances in &[InstanceMode::Never, InstanceMode::Always] {
        let model = Cubist::params()
            .committees(3)
            .instances(instances)
            .fit(&train)?;
        let (floor, ceiling) = (model.summary().floor(), model.summary().ceiling());

        let extremes = Array2::from_shape_fn((4, 10), |(i, _)| {
            Value::Continuous([-100., 0., 1., 100.][i])
        });
        for &p in model.predict(&query(&train, extremes)).iter() {
            assert!(p >= floor && p <= ceiling, "{} outside [{}, {}]", p, floor, ceiling);
        }
        for &p in model.predict(&train).iter() {
            assert!(p >= floor && p <= ceiling);
        }
    }
    Ok(())
}

#[test]
fn committees_fit_friedman() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::friedman1(400, 0.5, &mut rng)?;

    let single = Cubist::params().fit(&train)?;
    let committee = Cubist::params().committees(5).fit(&train)?;

    assert_eq!(committee.committee().len(), 5);
    assert!(single.error_reduction().is_none());
    assert!(committee.error_reduction().map_or(false, |r| r > 0.));

    for model in &[single, committee] {
        let err = model.training_error();
        assert_eq!(err.cases, 400);
        assert!(err.relative_error < 0.8, "relative error {}", err.relative_error);
        assert!(err.correlation > 0.6, "correlation {}", err.correlation);
    }
    Ok(())
}

#[test]
fn auto_instances_are_kept_when_they_help() -> TestResult {
    // a single linear rule cannot follow the parabola but neighbours can
    let x = Array2::from_shape_fn((300, 1), |(i, _)| i as f64 / 3.);
    let y = x.column(0).mapv(|v| (v - 50.).powi(2));
    let train = Dataset::from_continuous(x, y)?;

    let model = Cubist::params()
        .max_rules(1)
        .instances(InstanceMode::Auto)
        .fit(&train)?;

    assert_eq!(model.committee()[0].len(), 1);
    assert!(model.instances().is_some());
    Ok(())
}

#[test]
fn auto_instances_are_dropped_on_noisy_linear_data() -> TestResult {
    // neighbours only add the noise of their own targets to an exact model
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::linear(1000, &array![3., 0., 0., 0.], 0., 5., &mut rng)?;

    let model = Cubist::params()
        .instances(InstanceMode::Auto)
        .fit(&train)?;

    assert!(model.instances().is_none());
    Ok(())
}

#[test]
fn fixed_neighbours_are_used() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::piecewise(200, 1., &mut rng)?;

    let model = Cubist::params()
        .instances(InstanceMode::Always)
        .neighbors(3)
        .fit(&train)?;

    let engine = model.instances().expect("instances are always kept");
    assert_eq!(engine.neighbors(), 3);
    assert!(engine.is_corrective());
    Ok(())
}

#[test]
fn categories_are_separated() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::categorical(300, 0., &mut rng)?;

    let model = Cubist::params().fit(&train)?;
    assert!(model.committee()[0].len() >= 2);
    assert!(model.training_error().relative_error < 0.25);

    let uses_colour = model.committee()[0]
        .rules()
        .iter()
        .flat_map(|r| r.conditions())
        .any(|c| c.attribute() == 0 && !matches!(c.split(), Split::Threshold { .. }));
    assert!(uses_colour);
    Ok(())
}

#[test]
fn unknown_values_are_imputed() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let complete = generate::friedman1(300, 0.5, &mut rng)?;
    let train = generate::with_missing(&complete, 0.1, &mut rng)?;

    let model = Cubist::params().fit(&train)?;
    let blank = Array2::from_elem((1, 10), Value::Missing);
    let pred = model.predict(&query(&train, blank));

    assert!(pred[0].is_finite());
    assert!(pred[0] >= model.summary().floor() && pred[0] <= model.summary().ceiling());
    Ok(())
}

#[test]
fn not_applicable_attribute_is_never_used() -> TestResult {
    let atts = vec![Attribute::continuous("x"), Attribute::continuous("z")];
    let records = Array2::from_shape_fn((100, 2), |(i, a)| {
        if a == 0 {
            Value::Continuous(i as f64)
        } else {
            Value::NotApplicable
        }
    });
    let y = Array1::from_shape_fn(100, |i| 2. * i as f64);
    let train = Dataset::new(atts, records, y)?;

    let model = Cubist::params().fit(&train)?;
    for rule in model.committee()[0].rules() {
        assert_eq!(rule.model().coefficients[1], 0.);
        assert!(rule.conditions().iter().all(|c| c.attribute() == 0));
    }
    Ok(())
}

#[test]
fn attribute_usage_of_piecewise_data() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::piecewise(200, 0., &mut rng)?;

    let model = Cubist::params().fit(&train)?;
    let usage = model.attribute_usage();

    assert_eq!(usage[0].attribute, 0);
    assert_abs_diff_eq!(usage[0].conditions, 100.);
    assert_abs_diff_eq!(usage[0].model, 100.);
    Ok(())
}

#[test]
fn unbiased_rules_predict_as_well() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::linear(200, &array![1., 2.], 5., 1., &mut rng)?;

    let plain = Cubist::params().fit(&train)?;
    let unbiased = Cubist::params().unbiased(true).fit(&train)?;

    assert_abs_diff_eq!(
        plain.training_error().mean_abs_error,
        unbiased.training_error().mean_abs_error,
        epsilon = 0.2
    );
    Ok(())
}

#[cfg(feature = "serde")]
#[test]
fn serde_round_trip_predicts_the_same() -> TestResult {
    let mut rng = SmallRng::seed_from_u64(42);
    let train = generate::friedman1(200, 0.5, &mut rng)?;
    let model = Cubist::params()
        .committees(2)
        .instances(InstanceMode::Always)
        .fit(&train)?;

    let json = serde_json::to_string(&model).unwrap();
    let restored: Cubist = serde_json::from_str(&json).unwrap();

    assert_abs_diff_eq!(model.predict(&train), restored.predict(&train), epsilon = 1e-9);
    Ok(())
}
