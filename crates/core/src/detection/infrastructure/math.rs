//! Shared math utilities.
//!
//! Pairwise proximity checks, plus the vector statistics used by identity
//! matching and eye-aspect-ratio measurement.

/// Whether any unordered pair of `items` satisfies `linked`.
pub fn any_pair<T, F>(items: &[T], mut linked: F) -> bool
where
    F: FnMut(&T, &T) -> bool,
{
    items
        .iter()
        .enumerate()
        .any(|(i, a)| items[i + 1..].iter().any(|b| linked(a, b)))
}

/// Euclidean distance between two 2D points.
pub fn point_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// L2 norm of the difference of two equal-length vectors.
///
/// Returns `None` on length mismatch.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    Some(sum.sqrt())
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_any_pair_checks_every_pair_once() {
        let mut calls = 0;
        let found = any_pair(&[1, 5, 9, 20], |a, b| {
            calls += 1;
            b - a == 11
        });
        assert!(found);
        assert!(calls <= 6);
        assert!(!any_pair(&[1, 5, 9], |a, b| a == b));
    }

    #[test]
    fn test_any_pair_needs_two_items() {
        assert!(!any_pair::<i32, _>(&[], |_, _| true));
        assert!(!any_pair(&[1], |_, _| true));
    }

    #[test]
    fn test_euclidean_distance() {
        assert_relative_eq!(euclidean_distance(&[0.0, 3.0], &[4.0, 0.0]).unwrap(), 5.0);
        assert!(euclidean_distance(&[0.0], &[0.0, 1.0]).is_none());
    }

    #[test]
    fn test_std_dev_is_population() {
        let values = [0.85, 0.86, 0.87];
        assert_relative_eq!(mean(&values), 0.86, epsilon = 1e-12);
        assert_relative_eq!(std_dev(&values), (2.0f64 / 3.0).sqrt() * 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_point_distance() {
        assert_relative_eq!(point_distance((0.0, 0.0), (30.0, 40.0)), 50.0);
    }
}
