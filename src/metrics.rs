use std::cmp::Ordering;
use std::fmt;

/// Fraction of predictions equal to the truth. Empty input scores 0.
pub fn accuracy(truth: &[u8], predicted: &[u8]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    correct as f64 / truth.len() as f64
}

/// Error rate at the 0.5 threshold, as boosting libraries report it.
pub fn classification_error(truth: &[u8], probabilities: &[f64]) -> f64 {
    let predicted: Vec<u8> = probabilities.iter().map(|&p| label_for(p)).collect();
    1.0 - accuracy(truth, &predicted)
}

/// Positive label for probabilities strictly above 0.5.
pub fn label_for(probability: f64) -> u8 {
    u8::from(probability > 0.5)
}

/// Area under the ROC curve via the rank-sum statistic, averaging tied ranks.
/// Undefined, and so `None`, when only one class is present.
pub fn roc_auc(truth: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = truth.iter().filter(|&&t| t == 1).count();
    let n_neg = truth.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; a tie group shares the mean of its ranks.
        let mean_rank = (start + 1 + end) as f64 / 2.0;
        let positives = order[start..end].iter().filter(|&&i| truth[i] == 1).count();
        positive_rank_sum += mean_rank * positives as f64;
        start = end;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Binary confusion matrix; rows are the truth, columns the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn new(truth: &[u8], predicted: &[u8]) -> Self {
        let mut counts = [[0; 2]; 2];
        for (&t, &p) in truth.iter().zip(predicted) {
            counts[usize::from(t != 0)][usize::from(p != 0)] += 1;
        }
        Self { counts }
    }

    pub fn true_negatives(&self) -> usize {
        self.counts[0][0]
    }

    pub fn false_positives(&self) -> usize {
        self.counts[0][1]
    }

    pub fn false_negatives(&self) -> usize {
        self.counts[1][0]
    }

    pub fn true_positives(&self) -> usize {
        self.counts[1][1]
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        writeln!(f, "[[{:>w$} {:>w$}]", self.counts[0][0], self.counts[0][1], w = width)?;
        write!(f, " [{:>w$} {:>w$}]]", self.counts[1][0], self.counts[1][1], w = width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision, recall and F1 with the usual averages.
/// Zero denominators score 0 rather than NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classes: [ClassScores; 2],
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    pub fn new(truth: &[u8], predicted: &[u8]) -> Self {
        let cm = ConfusionMatrix::new(truth, predicted);
        let scores = |class: usize| {
            let other = 1 - class;
            let tp = cm.counts[class][class];
            let predicted_as = tp + cm.counts[other][class];
            let support = tp + cm.counts[class][other];
            let precision = ratio(tp, predicted_as);
            let recall = ratio(tp, support);
            let f1 = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };
            ClassScores {
                precision,
                recall,
                f1,
                support,
            }
        };
        let classes = [scores(0), scores(1)];
        let total = truth.len();

        let macro_avg = ClassScores {
            precision: (classes[0].precision + classes[1].precision) / 2.0,
            recall: (classes[0].recall + classes[1].recall) / 2.0,
            f1: (classes[0].f1 + classes[1].f1) / 2.0,
            support: total,
        };
        let weight = |c: &ClassScores| ratio(c.support, total);
        let weighted = |pick: fn(&ClassScores) -> f64| {
            classes.iter().map(|c| pick(c) * weight(c)).sum::<f64>()
        };
        let weighted_avg = ClassScores {
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
            support: total,
        };

        Self {
            classes,
            accuracy: accuracy(truth, predicted),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn row(f: &mut fmt::Formatter<'_>, name: &str, s: &ClassScores) -> fmt::Result {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, s.precision, s.recall, s.f1, s.support
            )
        }
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        row(f, "0", &self.classes[0])?;
        row(f, "1", &self.classes[1])?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[1, 0, 1, 1], &[1, 0, 0, 1]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let truth = [0, 0, 1, 1];
        assert_eq!(roc_auc(&truth, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(roc_auc(&truth, &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
    }

    #[test]
    fn test_auc_handles_ties() {
        // One positive-negative pair tied: counts as half a correct ordering.
        let auc = roc_auc(&[0, 1, 0, 1], &[0.1, 0.5, 0.5, 0.9]).unwrap();
        assert_abs_diff_eq!(auc, 0.875, epsilon = 1e-12);
    }

    #[test]
    fn test_auc_undefined_for_single_class() {
        assert_eq!(roc_auc(&[1, 1], &[0.2, 0.3]), None);
    }

    #[test]
    fn test_classification_error_uses_strict_threshold() {
        assert_eq!(label_for(0.5), 0);
        assert_abs_diff_eq!(
            classification_error(&[0, 1, 1, 0], &[0.5, 0.51, 0.2, 0.1]),
            0.25,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_confusion_matrix_layout() {
        let cm = ConfusionMatrix::new(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0]);
        assert_eq!(cm.counts, [[1, 1], [1, 2]]);
        assert_eq!(cm.true_positives(), 2);
        assert_eq!(cm.false_negatives(), 1);
        assert_eq!(cm.to_string(), "[[1 1]\n [1 2]]");
    }

    #[test]
    fn test_classification_report_scores() {
        let report = ClassificationReport::new(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0]);
        let positive = report.classes[1];
        assert_abs_diff_eq!(positive.precision, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(positive.recall, 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(positive.support, 3);
        assert_abs_diff_eq!(report.accuracy, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(report.macro_avg.recall, (0.5 + 2.0 / 3.0) / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            report.weighted_avg.recall,
            0.5 * 0.4 + (2.0 / 3.0) * 0.6,
            epsilon = 1e-12
        );
        assert!(report.to_string().contains("weighted avg"));
    }

    #[test]
    fn test_report_without_positive_predictions_has_zero_precision() {
        let report = ClassificationReport::new(&[0, 1], &[0, 0]);
        assert_eq!(report.classes[1].precision, 0.0);
        assert_eq!(report.classes[1].f1, 0.0);
    }
}
