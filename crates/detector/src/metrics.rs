use std::fmt;

use echoguard_domain::{EchoguardError, Label, Result};
use serde::{Deserialize, Serialize};

/// Counts indexed `[actual][predicted]` by label code.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn get(&self, actual: Label, predicted: Label) -> usize {
        self.counts[actual.code() as usize][predicted.code() as usize]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    /// Indexed by label code.
    pub per_class: [ClassMetrics; 2],
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn average(per_class: &[ClassMetrics; 2], weights: [f64; 2], support: usize) -> ClassMetrics {
    let mut avg = ClassMetrics {
        support,
        ..Default::default()
    };
    for (metrics, w) in per_class.iter().zip(weights) {
        avg.precision += w * metrics.precision;
        avg.recall += w * metrics.recall;
        avg.f1 += w * metrics.f1;
    }
    avg
}

impl Evaluation {
    pub fn compute(actual: &[Label], predicted: &[Label]) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(EchoguardError::validation(format!(
                "{} reference labels but {} predictions",
                actual.len(),
                predicted.len()
            )));
        }
        if actual.is_empty() {
            return Err(EchoguardError::EmptyDataset);
        }

        let mut confusion = ConfusionMatrix::default();
        for (a, p) in actual.iter().zip(predicted) {
            confusion.counts[a.code() as usize][p.code() as usize] += 1;
        }

        let mut per_class = [ClassMetrics::default(); 2];
        for label in Label::ALL {
            let tp = confusion.get(label, label);
            let predicted_as: usize = Label::ALL.iter().map(|a| confusion.get(*a, label)).sum();
            let support: usize = Label::ALL.iter().map(|p| confusion.get(label, *p)).sum();
            let precision = ratio(tp, predicted_as);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            per_class[label.code() as usize] = ClassMetrics {
                precision,
                recall,
                f1,
                support,
            };
        }

        let total = actual.len();
        let correct: usize = Label::ALL.iter().map(|l| confusion.get(*l, *l)).sum();
        let macro_avg = average(&per_class, [0.5, 0.5], total);
        let weighted_avg = average(
            &per_class,
            per_class.map(|m| m.support as f64 / total as f64),
            total,
        );

        Ok(Self {
            accuracy: ratio(correct, total),
            confusion,
            per_class,
            macro_avg,
            weighted_avg,
        })
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Overall accuracy: {:.2}%", self.accuracy * 100.0)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        let row = |f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, m.precision, m.recall, m.f1, m.support
            )
        };
        for label in Label::ALL {
            let name = format!("{} ({})", label, label.code());
            row(f, &name, &self.per_class[label.code() as usize])?;
        }
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)?;
        writeln!(f)?;
        writeln!(f, "{:>14} {:>16} {:>16}", "", "Predicted REAL", "Predicted FAKE")?;
        for actual in Label::ALL {
            writeln!(
                f,
                "{:>14} {:>16} {:>16}",
                format!("Actual {actual}"),
                self.confusion.get(actual, Label::Real),
                self.confusion.get(actual, Label::Fake)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use echoguard_domain::Label::{Fake, Real};

    #[test]
    fn counts_and_scores() {
        let actual = [Real, Real, Real, Fake, Fake];
        let predicted = [Real, Fake, Real, Fake, Real];
        let eval = Evaluation::compute(&actual, &predicted).unwrap();
        assert_abs_diff_eq!(eval.accuracy, 0.6, epsilon = 1e-12);
        assert_eq!(eval.confusion.get(Real, Real), 2);
        assert_eq!(eval.confusion.get(Real, Fake), 1);
        assert_eq!(eval.confusion.get(Fake, Real), 1);
        assert_eq!(eval.confusion.get(Fake, Fake), 1);
        assert_eq!(eval.confusion.total(), 5);

        let real = eval.per_class[0];
        assert_abs_diff_eq!(real.precision, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(real.recall, 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(real.support, 3);
        let fake = eval.per_class[1];
        assert_abs_diff_eq!(fake.precision, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(fake.recall, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(
            eval.weighted_avg.f1,
            0.6 * real.f1 + 0.4 * fake.f1,
            epsilon = 1e-12
        );
    }

    #[test]
    fn class_never_predicted_scores_zero() {
        let eval = Evaluation::compute(&[Real, Fake], &[Real, Real]).unwrap();
        assert_eq!(eval.per_class[1].precision, 0.0);
        assert_eq!(eval.per_class[1].f1, 0.0);
    }

    #[test]
    fn report_mentions_both_classes() {
        let eval = Evaluation::compute(&[Real, Fake], &[Real, Fake]).unwrap();
        let report = eval.to_string();
        assert!(report.contains("Overall accuracy: 100.00%"));
        assert!(report.contains("REAL (0)"));
        assert!(report.contains("Actual FAKE"));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(Evaluation::compute(&[Real], &[]).is_err());
        assert!(Evaluation::compute(&[], &[]).is_err());
    }
}
