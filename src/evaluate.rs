use plotters::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::feature_engineering::FeatureMatrix;
use crate::metrics::{accuracy, classification_error, roc_auc, ClassificationReport, ConfusionMatrix};
use crate::models::xgboost::{EvalCurve, EvalHistory};
use crate::models::traits::Classifier;

/// Number of rounds shown when a learning curve is printed to the terminal.
const PRINTED_ROUNDS: usize = 10;

/// Scores of one model against the train and test halves of the modeling set.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub model_name: String,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub test_error: f64,
    pub test_auc: Option<f64>,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} ==", self.model_name)?;
        writeln!(f, "Train Accuracy: {:.4}", self.train_accuracy)?;
        writeln!(f, "Test Accuracy:  {:.4}", self.test_accuracy)?;
        writeln!(f, "Test Error:     {:.4}", self.test_error)?;
        match self.test_auc {
            Some(auc) => writeln!(f, "Test AUC-ROC:   {:.4}", auc)?,
            None => writeln!(f, "Test AUC-ROC:   undefined (single class)")?,
        }
        writeln!(f, "\nConfusion Matrix:\n{}", self.confusion)?;
        write!(f, "\nClassification Report:\n{}", self.report)
    }
}

pub struct Evaluator {
    curves_dir: Option<PathBuf>,
}

impl Evaluator {
    pub fn new(curves_dir: Option<&str>) -> Self {
        Self {
            curves_dir: curves_dir.map(PathBuf::from),
        }
    }

    pub fn evaluate(
        &self,
        model_name: &str,
        model: &dyn Classifier,
        x_train: &FeatureMatrix,
        y_train: &[u8],
        x_test: &FeatureMatrix,
        y_test: &[u8],
    ) -> Result<Evaluation> {
        let train_predicted = model.predict(x_train)?;
        let test_probabilities = model.predict_proba(x_test)?;
        let test_predicted = model.predict(x_test)?;

        let evaluation = Evaluation {
            model_name: model_name.to_string(),
            train_accuracy: accuracy(y_train, &train_predicted),
            test_accuracy: accuracy(y_test, &test_predicted),
            test_error: classification_error(y_test, &test_probabilities),
            test_auc: roc_auc(y_test, &test_probabilities),
            confusion: ConfusionMatrix::new(y_test, &test_predicted),
            report: ClassificationReport::new(y_test, &test_predicted),
        };
        info!(
            model = model_name,
            train_accuracy = evaluation.train_accuracy,
            test_accuracy = evaluation.test_accuracy,
            "Model evaluated"
        );
        Ok(evaluation)
    }

    /// Prints the learning curves and, when a directory is configured, saves
    /// them as `learning_curves_<model>.svg`. Returns the saved path, if any.
    pub fn show_learning_curves(
        &self,
        model_name: &str,
        history: &EvalHistory,
    ) -> Result<Option<PathBuf>> {
        println!("{}", format_learning_curves(model_name, history));

        let Some(dir) = &self.curves_dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("learning_curves_{}.svg", model_name));
        render_learning_curves(&path, model_name, history)?;
        Ok(Some(path))
    }
}

/// Renders AUC and error per round for each evaluation set as a text table.
pub fn format_learning_curves(model_name: &str, history: &EvalHistory) -> String {
    let rounds = history.rounds();
    let mut out = format!("Learning curves ({}, {} rounds)\n{:>8}", model_name, rounds, "round");
    for curve in &history.curves {
        out.push_str(&format!(" {:>12} {:>12}", format!("{} auc", curve.name), format!("{} error", curve.name)));
    }
    out.push('\n');

    if rounds == 0 {
        return out;
    }
    let step = (rounds / PRINTED_ROUNDS).max(1);
    let mut shown: Vec<usize> = (0..rounds).step_by(step).collect();
    if shown.last() != Some(&(rounds - 1)) {
        shown.push(rounds - 1);
    }
    for round in shown {
        out.push_str(&format!("{:>8}", round + 1));
        for curve in &history.curves {
            out.push_str(&format!(" {:>12.4} {:>12.4}", curve.auc[round], curve.error[round]));
        }
        out.push('\n');
    }
    out
}

fn chart_error(path: &Path, e: impl fmt::Display) -> PipelineError {
    PipelineError::Output {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn auc_of(curve: &EvalCurve) -> &[f64] {
    &curve.auc
}

fn error_of(curve: &EvalCurve) -> &[f64] {
    &curve.error
}

/// Two side-by-side line charts: AUC and classification error against round.
pub fn render_learning_curves(path: &Path, model_name: &str, history: &EvalHistory) -> Result<()> {
    let root = SVGBackend::new(path, (1500, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| chart_error(path, e))?;
    let panels = root.split_evenly((1, 2));
    let palette = [BLUE, RED, GREEN, MAGENTA];
    let rounds = history.rounds().max(1);

    let metrics: [(&str, &str, fn(&EvalCurve) -> &[f64]); 2] = [
        ("AUC-ROC", "AUC-ROC", auc_of),
        ("Classification Error", "Classification Error", error_of),
    ];

    for (panel, (title, y_label, pick)) in panels.iter().zip(metrics) {
        let finite = history
            .curves
            .iter()
            .flat_map(|c| pick(c).iter().copied())
            .filter(|v| v.is_finite());
        let (low, high) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let (low, high) = if low.is_finite() && high > low {
            (low, high)
        } else {
            (0.0, 1.0)
        };

        let mut chart = ChartBuilder::on(panel)
            .caption(format!("{} {}", model_name, title), ("sans-serif", 22))
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(0..rounds, low..high)
            .map_err(|e| chart_error(path, e))?;
        chart
            .configure_mesh()
            .x_desc("N estimators")
            .y_desc(y_label)
            .draw()
            .map_err(|e| chart_error(path, e))?;

        for (curve, &color) in history.curves.iter().zip(palette.iter().cycle()) {
            let points = pick(curve)
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .map(|(i, &v)| (i, v));
            chart
                .draw_series(LineSeries::new(points, color))
                .map_err(|e| chart_error(path, e))?
                .label(curve.name.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(|e| chart_error(path, e))?;
    }

    root.present().map_err(|e| chart_error(path, e))?;
    debug!(path = %path.display(), "Learning curves saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(rounds: usize) -> EvalHistory {
        let curve = |name: &str, offset: f64| EvalCurve {
            name: name.to_string(),
            auc: (0..rounds).map(|i| 0.5 + offset + i as f64 / (2.0 * rounds as f64)).collect(),
            error: (0..rounds).map(|i| 0.5 - i as f64 / (2.0 * rounds as f64)).collect(),
        };
        EvalHistory {
            curves: vec![curve("train", 0.01), curve("test", 0.0)],
        }
    }

    struct Constant(f64);

    impl Classifier for Constant {
        fn fit(&mut self, _: &FeatureMatrix, _: &[u8]) -> Result<()> {
            Ok(())
        }

        fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
            Ok(features
                .values
                .column(0)
                .iter()
                .map(|&v| if v > 0.0 { self.0 } else { 1.0 - self.0 })
                .collect())
        }
    }

    #[test]
    fn test_evaluate_reports_accuracy_and_confusion() {
        let x = FeatureMatrix {
            names: vec!["x".to_string()],
            values: ndarray::array![[1.0], [0.0], [1.0], [0.0]],
        };
        let y = [1, 0, 0, 0];
        let evaluation = Evaluator::new(None)
            .evaluate("constant", &Constant(0.9), &x, &y, &x, &y)
            .unwrap();

        assert_eq!(evaluation.test_accuracy, 0.75);
        assert_eq!(evaluation.train_accuracy, 0.75);
        assert_eq!(evaluation.test_error, 0.25);
        assert_eq!(evaluation.confusion.counts, [[2, 1], [0, 1]]);
        assert_eq!(evaluation.test_auc, Some(5.0 / 6.0));
        assert!(evaluation.to_string().contains("Confusion Matrix"));
    }

    #[test]
    fn test_printed_curves_include_last_round() {
        let text = format_learning_curves("baseline", &history(25));
        assert!(text.contains("train auc"));
        assert!(text.contains("test error"));
        let last = text.lines().last().unwrap();
        assert!(last.trim_start().starts_with("25 "));
    }

    #[test]
    fn test_curves_are_saved_when_directory_configured() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Evaluator::new(dir.path().to_str());
        let path = evaluator
            .show_learning_curves("tuned", &history(8))
            .unwrap()
            .unwrap();
        assert!(path.ends_with("learning_curves_tuned.svg"));
        let svg = std::fs::read_to_string(path).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_curves_are_only_printed_by_default() {
        assert_eq!(
            Evaluator::new(None)
                .show_learning_curves("baseline", &history(3))
                .unwrap(),
            None
        );
    }
}
