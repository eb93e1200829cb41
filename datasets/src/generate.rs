//! Utility functions for randomly generating datasets

use std::f64::consts::PI;

use cubist::{Attribute, Dataset, Result, Value};
use ndarray::{Array, Array1, Array2, ArrayBase, Axis, Data, Ix1};
use ndarray_rand::{
    rand::Rng,
    rand_distr::{Normal, Uniform},
    RandomExt,
};

/// Additive Gaussian noise of standard deviation `sd`, none when `sd` is zero
fn noise(n: usize, sd: f64, rng: &mut impl Rng) -> Array1<f64> {
    match Normal::new(0.0, sd) {
        Ok(normal) if sd > 0.0 => Array::random_using(n, normal, rng),
        _ => Array1::zeros(n),
    }
}

/// Draws `n` cases of attributes uniform on `[0, 10)` with target `x . coefficients + intercept`
/// plus Gaussian noise
///
/// There is one attribute per coefficient.
pub fn linear(
    n: usize,
    coefficients: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    intercept: f64,
    noise_sd: f64,
    rng: &mut impl Rng,
) -> Result<Dataset> {
    let x: Array2<f64> = Array::random_using((n, coefficients.len()), Uniform::new(0., 10.), rng);
    let y = x.dot(coefficients) + intercept + noise(n, noise_sd, rng);

    Dataset::from_continuous(x, y)
}

/// Draws `n` cases of a target equal to `x0` below 50 and to `150 - x0` above, with `x0`
/// uniform on `[0, 100)`
///
/// The second attribute `x1` is uniform on `[0, 100)` and unrelated to the target.
pub fn piecewise(n: usize, noise_sd: f64, rng: &mut impl Rng) -> Result<Dataset> {
    let x: Array2<f64> = Array::random_using((n, 2), Uniform::new(0., 100.), rng);
    let y = x.column(0).mapv(|v| if v < 50. { v } else { 150. - v }) + noise(n, noise_sd, rng);

    Dataset::from_continuous(x, y)
}

/// Draws `n` cases of a discrete attribute `colour` and a continuous attribute `x`
///
/// The target is `2 x` plus an offset of 0, 10 or 50 for `red`, `green` and `blue`.
pub fn categorical(n: usize, noise_sd: f64, rng: &mut impl Rng) -> Result<Dataset> {
    const OFFSETS: [f64; 3] = [0., 10., 50.];

    let attributes = vec![
        Attribute::discrete("colour", vec!["red", "green", "blue"]),
        Attribute::continuous("x"),
    ];

    let mut records = Array2::from_elem((n, 2), Value::Missing);
    let mut y = noise(n, noise_sd, rng);
    for (mut row, target) in records.rows_mut().into_iter().zip(y.iter_mut()) {
        let colour = rng.gen_range(0..OFFSETS.len());
        let x = rng.gen_range(0.0..10.0);

        // codes of values start at 2
        row[0] = Value::Discrete(colour + 2);
        row[1] = Value::Continuous(x);
        *target += OFFSETS[colour] + 2. * x;
    }

    Dataset::new(attributes, records, y)
}

/// Draws `n` cases of Friedman's first benchmark
///
/// The ten attributes are uniform on `[0, 1)` and the target is
/// `10 sin(pi x0 x1) + 20 (x2 - 0.5)^2 + 10 x3 + 5 x4` plus Gaussian noise. The last five
/// attributes are irrelevant.
pub fn friedman1(n: usize, noise_sd: f64, rng: &mut impl Rng) -> Result<Dataset> {
    let x: Array2<f64> = Array::random_using((n, 10), Uniform::new(0., 1.), rng);
    let y = x
        .axis_iter(Axis(0))
        .map(|r| {
            10. * (PI * r[0] * r[1]).sin() + 20. * (r[2] - 0.5).powi(2) + 10. * r[3] + 5. * r[4]
        })
        .collect::<Array1<f64>>()
        + noise(n, noise_sd, rng);

    Dataset::from_continuous(x, y)
}

/// Replaces each value of the non-derived attributes of `dataset` by `Missing` with probability
/// `fraction`
pub fn with_missing(dataset: &Dataset, fraction: f64, rng: &mut impl Rng) -> Result<Dataset> {
    let mut records = dataset.records().clone();
    for ((_, a), value) in records.indexed_iter_mut() {
        if dataset.attribute(a).definition().is_none() && rng.gen_bool(fraction) {
            *value = Value::Missing;
        }
    }

    Ok(Dataset::new(
        dataset.attributes().to_vec(),
        records,
        dataset.targets().clone(),
    )?
    .with_weights(dataset.weights().clone())?
    .with_target_name(dataset.target_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn linear_targets_follow_the_coefficients() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        let data = linear(50, &array![3., -1.], 2., 0., &mut rng)?;

        assert_eq!(data.nsamples(), 50);
        assert_eq!(data.nattributes(), 2);
        for i in 0..50 {
            let expected = 3. * data.cont(i, 0) - data.cont(i, 1) + 2.;
            assert_abs_diff_eq!(data.target(i), expected, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn categorical_offsets() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        let data = categorical(100, 0., &mut rng)?;

        for i in 0..100 {
            let offset = match data.attribute(0).value_name(data.discrete(i, 0)) {
                Some("red") => 0.,
                Some("green") => 10.,
                Some("blue") => 50.,
                other => panic!("unexpected colour {:?}", other),
            };
            assert_abs_diff_eq!(data.target(i), offset + 2. * data.cont(i, 1), epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn missing_fraction() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        let data = friedman1(200, 1., &mut rng)?;
        let blanked = with_missing(&data, 0.2, &mut rng)?;

        let missing = blanked.records().iter().filter(|v| v.is_missing()).count();
        assert!(missing > 300 && missing < 500, "{} missing values", missing);
        assert_eq!(blanked.targets(), data.targets());

        assert_eq!(with_missing(&data, 0., &mut rng)?.records(), data.records());
        Ok(())
    }
}
