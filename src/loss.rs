//! Loss and Accuracy (host side)
//!
//! Probabilities are downloaded once per batch and reduced here. The
//! 1e-7 floor is applied again before the log, independent of whatever
//! floor the softmax kernel already applied.

use crate::kernel::PROB_FLOOR;

/// Mean cross-entropy over the batch: −(1/B) Σ ln(max(p[b, label_b], 1e-7))
pub fn cross_entropy(probs: &[f32], labels: &[u32], classes: usize) -> f32 {
    debug_assert_eq!(probs.len(), labels.len() * classes);
    if labels.is_empty() {
        return 0.0;
    }
    let total: f32 = probs
        .chunks(classes)
        .zip(labels)
        .map(|(row, &label)| -row[label as usize].max(PROB_FLOOR).ln())
        .sum();
    total / labels.len() as f32
}

/// Index of the largest entry. Ties resolve to the lowest index.
#[inline]
pub fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Rows whose argmax equals the label
pub fn count_correct(probs: &[f32], labels: &[u32], classes: usize) -> usize {
    probs
        .chunks(classes)
        .zip(labels)
        .filter(|&(row, &label)| argmax(row) == label as usize)
        .count()
}

/// Fraction of rows classified correctly, in [0, 1]
pub fn accuracy(probs: &[f32], labels: &[u32], classes: usize) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    count_correct(probs, labels, classes) as f32 / labels.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_entropy_non_negative() {
        let probs = [0.2, 0.5, 0.3, 0.6, 0.3, 0.1];
        let loss = cross_entropy(&probs, &[0, 2], 3);
        assert!(loss >= 0.0);
        let want = -(0.2f32.ln() + 0.1f32.ln()) / 2.0;
        assert!((loss - want).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_approaches_zero() {
        let mut prev = f32::INFINITY;
        for p in [0.5f32, 0.9, 0.99, 0.9999] {
            let rest = (1.0 - p) / 2.0;
            let loss = cross_entropy(&[rest, p, rest], &[1], 3);
            assert!(loss < prev);
            prev = loss;
        }
        assert!(prev < 1e-3);
    }

    #[test]
    fn test_cross_entropy_floor() {
        // A zero probability on the true class is floored, not infinite
        let loss = cross_entropy(&[1.0, 0.0], &[1], 2);
        assert!((loss - (-(1e-7f32).ln())).abs() < 1e-3);
        assert!(loss.is_finite());
    }

    #[test]
    fn test_uniform_distribution_loss() {
        let probs = vec![0.1; 10];
        let loss = cross_entropy(&probs, &[3], 10);
        assert!((loss - 10f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_argmax_and_accuracy() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);

        let probs = [0.1, 0.9, 0.8, 0.2, 0.3, 0.7];
        assert_eq!(count_correct(&probs, &[1, 1, 1], 2), 2);
        assert!((accuracy(&probs, &[1, 1, 1], 2) - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(accuracy(&[], &[], 2), 0.0);
    }
}
