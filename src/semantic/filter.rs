use crate::semantic::search::SearchHit;

/// Keep hits scoring strictly above `threshold`, in their original order.
///
/// Each hit is judged on its own rather than cutting at the first miss, so
/// the result does not depend on the input being sorted.
pub fn filter(hits: Vec<SearchHit>, threshold: f32) -> Vec<SearchHit> {
    hits.into_iter().filter(|hit| hit.score > threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CategoryRecord;

    fn hits(scores: &[f32]) -> Vec<SearchHit> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| SearchHit {
                record: CategoryRecord::from_path(&format!("Group > Item {i}")),
                score,
            })
            .collect()
    }

    #[test]
    fn test_strictly_above_threshold() {
        let kept = filter(hits(&[0.9, 0.35, 0.2]), 0.35);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn test_preserves_order_for_unsorted_input() {
        let kept = filter(hits(&[0.4, 0.1, 0.8, 0.5]), 0.3);
        let scores: Vec<f32> = kept.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![0.4, 0.8, 0.5]);
    }

    #[test]
    fn test_may_return_empty() {
        assert!(filter(hits(&[0.5, 0.4]), 0.99).is_empty());
        assert!(filter(vec![], 0.0).is_empty());
    }

    #[test]
    fn test_monotonic_in_threshold() {
        let scores = [0.91, 0.72, 0.55, 0.41, 0.33, 0.1, 0.0];
        let mut previous = usize::MAX;
        for step in 0..=20 {
            let threshold = step as f32 * 0.05;
            let count = filter(hits(&scores), threshold).len();
            assert!(count <= previous);
            previous = count;
        }
    }
}
