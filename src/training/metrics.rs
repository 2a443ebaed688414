//! Classification metrics over encoded class indices

use serde::{Deserialize, Serialize};

/// Scores of one evaluated split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Mean cross-entropy
    pub loss: f32,
    /// Fraction of correct predictions
    pub accuracy: f32,
    /// Micro-averaged F1
    pub f1_micro: f32,
    /// Macro-averaged F1
    pub f1_macro: f32,
    /// Rows are true classes, columns predicted classes
    pub confusion: Vec<Vec<usize>>,
}

impl Evaluation {
    /// Score predictions against the truth
    pub fn new(loss: f32, truth: &[u32], predicted: &[u32], num_classes: usize) -> Self {
        let confusion = confusion_matrix(truth, predicted, num_classes);
        let (f1_micro, f1_macro) = f1_scores(&confusion);
        Self {
            loss,
            accuracy: accuracy(truth, predicted),
            f1_micro,
            f1_macro,
            confusion,
        }
    }
}

/// Fraction of matching predictions; 0 when empty
pub fn accuracy(truth: &[u32], predicted: &[u32]) -> f32 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| t == p)
        .count();
    hits as f32 / truth.len() as f32
}

/// `num_classes` x `num_classes` counts, rows = truth, columns = prediction
pub fn confusion_matrix(truth: &[u32], predicted: &[u32], num_classes: usize) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0usize; num_classes]; num_classes];
    for (&t, &p) in truth.iter().zip(predicted) {
        if let Some(cell) = matrix
            .get_mut(t as usize)
            .and_then(|row| row.get_mut(p as usize))
        {
            *cell += 1;
        }
    }
    matrix
}

/// Micro and macro F1 of a confusion matrix
///
/// The macro average runs over classes that occur in the truth or the
/// predictions; a class with no true positive scores 0.
pub fn f1_scores(confusion: &[Vec<usize>]) -> (f32, f32) {
    let n = confusion.len();
    let mut tp_total = 0usize;
    let mut fp_total = 0usize;
    let mut fn_total = 0usize;
    let mut per_class = Vec::new();

    for k in 0..n {
        let tp = confusion[k][k];
        let fn_ = confusion[k].iter().sum::<usize>() - tp;
        let fp = (0..n).map(|i| confusion[i][k]).sum::<usize>() - tp;
        tp_total += tp;
        fp_total += fp;
        fn_total += fn_;

        let denominator = 2 * tp + fp + fn_;
        if denominator > 0 {
            per_class.push(2.0 * tp as f32 / denominator as f32);
        }
    }

    let micro_denominator = 2 * tp_total + fp_total + fn_total;
    let micro = if micro_denominator == 0 {
        0.0
    } else {
        2.0 * tp_total as f32 / micro_denominator as f32
    };
    let macro_ = if per_class.is_empty() {
        0.0
    } else {
        per_class.iter().sum::<f32>() / per_class.len() as f32
    };
    (micro, macro_)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_rows_are_truth() {
        let m = confusion_matrix(&[0, 0, 1, 2], &[0, 1, 1, 1], 3);
        assert_eq!(m, vec![vec![1, 1, 0], vec![0, 1, 0], vec![0, 1, 0]]);
    }

    #[test]
    fn test_f1_scores() {
        let truth = [0, 0, 1, 2];
        let pred = [0, 1, 1, 1];
        let m = confusion_matrix(&truth, &pred, 3);
        let (micro, macro_) = f1_scores(&m);

        // Micro F1 equals accuracy for single-label problems
        assert!((micro - 0.5).abs() < 1e-6);
        // Class F1: 0 -> 2/3, 1 -> 2*1/(2+2+0) = 0.5, 2 -> 0
        assert!((macro_ - (2.0 / 3.0 + 0.5) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_macro_skips_absent_classes() {
        let m = confusion_matrix(&[0, 1], &[0, 1], 4);
        let (micro, macro_) = f1_scores(&m);
        assert_eq!(micro, 1.0);
        assert_eq!(macro_, 1.0);
    }

    #[test]
    fn test_evaluation() {
        let eval = Evaluation::new(0.25, &[1, 1, 0], &[1, 0, 0], 2);
        assert!((eval.accuracy - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(eval.confusion, vec![vec![1, 0], vec![1, 1]]);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }
}
