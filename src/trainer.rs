//! Offline training of the learned classifier from a labelled dataset.
//!
//! Dataset layout: one row per segment, columns `voltage_0 .. voltage_{N-1}`
//! and a `label` column holding `0/1/2` or `relaxed/focused/sleepy`.
use std::fmt;
use std::path::Path;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::drivers::artifact::ModelArtifact;
use crate::drivers::error::DatasetError;
use crate::drivers::features::{self, FEATURE_COUNT};
use crate::drivers::forest::{ForestParams, RandomForest};
use crate::types::MentalState;

/// Raw labelled segments as read from disk.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub segments: Vec<Vec<f64>>,
    pub labels: Vec<MentalState>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub fn load_dataset(path: &Path) -> Result<Dataset, DatasetError> {
    let read_err = |source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(read_err)?;
    let headers = reader.headers().map_err(read_err)?.clone();
    let label_col = headers
        .iter()
        .position(|h| h.trim() == "label")
        .ok_or(DatasetError::MissingLabelColumn)?;
    let voltage_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.trim().starts_with("voltage_"))
        .map(|(i, h)| (i, h.trim().to_owned()))
        .collect();
    if voltage_cols.is_empty() {
        return Err(DatasetError::MissingVoltageColumns);
    }

    let mut dataset = Dataset {
        segments: Vec::new(),
        labels: Vec::new(),
    };
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(read_err)?;
        let segment = voltage_cols
            .iter()
            .map(|(col, name)| {
                record
                    .get(*col)
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .ok_or_else(|| DatasetError::BadCell {
                        row,
                        column: name.clone(),
                    })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        let label = record
            .get(label_col)
            .ok_or_else(|| DatasetError::BadCell {
                row,
                column: "label".into(),
            })?
            .parse::<MentalState>()
            .map_err(|source| DatasetError::UnknownLabel { row, source })?;
        dataset.segments.push(segment);
        dataset.labels.push(label);
    }
    if dataset.is_empty() {
        return Err(DatasetError::Empty);
    }
    log::info!(
        "loaded {} segments of {} samples from {}",
        dataset.len(),
        voltage_cols.len(),
        path.display()
    );
    Ok(dataset)
}

/// One feature row per segment, computed with the live feature extractor.
pub fn design_matrix(segments: &[Vec<f64>], sample_rate_hz: f64) -> Array2<f64> {
    let mut x = Array2::<f64>::zeros((segments.len(), FEATURE_COUNT));
    for (mut row, segment) in x.rows_mut().into_iter().zip(segments) {
        let feats = features::extract(segment, sample_rate_hz).to_array();
        for (cell, value) in row.iter_mut().zip(feats) {
            *cell = value;
        }
    }
    x
}

/// Per-class split keeping roughly `test_fraction` of each class for testing.
///
/// Every class keeps at least one row on each side.
pub fn stratified_split(
    labels: &[MentalState],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), DatasetError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in MentalState::ALL {
        let mut rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        if rows.is_empty() {
            continue;
        }
        if rows.len() < 2 {
            return Err(DatasetError::TooFewRows {
                class: class.to_string(),
                count: rows.len(),
            });
        }
        rows.shuffle(&mut rng);
        let n_test = ((rows.len() as f64 * test_fraction).round() as usize).clamp(1, rows.len() - 1);
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationReport {
    pub per_class: Vec<(MentalState, ClassScores)>,
    pub accuracy: f64,
    pub total: usize,
}

impl ClassificationReport {
    pub fn from_predictions(truth: &[MentalState], predicted: &[MentalState]) -> Self {
        let total = truth.len();
        let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
        let per_class = MentalState::ALL
            .iter()
            .map(|&class| {
                let tp = truth
                    .iter()
                    .zip(predicted)
                    .filter(|(t, p)| **t == class && **p == class)
                    .count() as f64;
                let predicted_n = predicted.iter().filter(|p| **p == class).count() as f64;
                let support = truth.iter().filter(|t| **t == class).count();
                let precision = ratio(tp, predicted_n);
                let recall = ratio(tp, support as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);
                (
                    class,
                    ClassScores {
                        precision,
                        recall,
                        f1,
                        support,
                    },
                )
            })
            .collect();
        Self {
            per_class,
            accuracy: ratio(correct as f64, total as f64),
            total,
        }
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>12} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        for (class, s) in &self.per_class {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                class.name(),
                s.precision,
                s.recall,
                s.f1,
                s.support
            )?;
        }
        write!(f, "{:>12} {:>29.2} {:>9}", "accuracy", self.accuracy, self.total)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainOptions {
    pub sample_rate_hz: f64,
    pub test_fraction: f64,
    pub forest: ForestParams,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100.0,
            test_fraction: 0.2,
            forest: ForestParams::default(),
        }
    }
}

pub struct TrainOutcome {
    pub artifact: ModelArtifact,
    pub report: ClassificationReport,
}

/// Extracts features, fits the forest on the training split and scores the held-out split.
pub fn train(dataset: &Dataset, options: &TrainOptions) -> Result<TrainOutcome, DatasetError> {
    if dataset.is_empty() {
        return Err(DatasetError::Empty);
    }
    let x = design_matrix(&dataset.segments, options.sample_rate_hz);
    let y: Vec<usize> = dataset.labels.iter().map(|l| l.code()).collect();
    let (train_rows, test_rows) =
        stratified_split(&dataset.labels, options.test_fraction, options.forest.seed)?;
    log::info!(
        "training on {} rows, evaluating on {}",
        train_rows.len(),
        test_rows.len()
    );

    let x_train = x.select(ndarray::Axis(0), &train_rows);
    let y_train: Vec<usize> = train_rows.iter().map(|r| y[*r]).collect();
    let forest = RandomForest::fit(
        x_train.view(),
        &y_train,
        MentalState::ALL.len(),
        &options.forest,
    );
    let artifact = ModelArtifact::new(forest, options.sample_rate_hz);

    let truth: Vec<MentalState> = test_rows.iter().map(|r| dataset.labels[*r]).collect();
    let predicted: Vec<MentalState> = test_rows
        .iter()
        .map(|r| {
            let row = x.row(*r).to_vec();
            artifact
                .forest
                .predict(&row)
                .and_then(MentalState::from_code)
                .unwrap_or(MentalState::Relaxed)
        })
        .collect();
    let report = ClassificationReport::from_predictions(&truth, &predicted);
    log::info!("held-out accuracy {:.3}", report.accuracy);
    Ok(TrainOutcome { artifact, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use std::fmt::Write as _;

    fn tone(freq_hz: f64, offset: f64, n: usize, phase: f64) -> Vec<f64> {
        (0..n)
            .map(|i| offset + 0.3 * (2.0 * PI * freq_hz * i as f64 / 100.0 + phase).sin())
            .collect()
    }

    fn write_csv(path: &Path, rows: &[(Vec<f64>, &str)]) {
        let n = rows[0].0.len();
        let mut text = String::new();
        for i in 0..n {
            write!(text, "voltage_{i},").unwrap();
        }
        text.push_str("label\n");
        for (segment, label) in rows {
            for v in segment {
                write!(text, "{v},").unwrap();
            }
            writeln!(text, "{label}").unwrap();
        }
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn loads_int_and_string_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.csv");
        write_csv(
            &path,
            &[
                (vec![0.1, 0.2, 0.3], "0"),
                (vec![0.4, 0.5, 0.6], "FOCUSED"),
                (vec![0.7, 0.8, 0.9], "sleepy"),
            ],
        );
        let ds = load_dataset(&path).unwrap();
        assert_eq!(
            ds.labels,
            vec![MentalState::Relaxed, MentalState::Focused, MentalState::Sleepy]
        );
        assert_eq!(ds.segments[1], vec![0.4, 0.5, 0.6]);
    }

    #[test]
    fn unknown_label_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.csv");
        write_csv(&path, &[(vec![0.1, 0.2], "relaxed"), (vec![0.1, 0.2], "drowsy")]);
        assert!(matches!(
            load_dataset(&path),
            Err(DatasetError::UnknownLabel { row: 1, .. })
        ));
    }

    #[test]
    fn missing_columns_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let no_label = dir.path().join("a.csv");
        std::fs::write(&no_label, "voltage_0,voltage_1\n0.1,0.2\n").unwrap();
        assert!(matches!(
            load_dataset(&no_label),
            Err(DatasetError::MissingLabelColumn)
        ));
        let no_voltage = dir.path().join("b.csv");
        std::fs::write(&no_voltage, "x,label\n0.1,0\n").unwrap();
        assert!(matches!(
            load_dataset(&no_voltage),
            Err(DatasetError::MissingVoltageColumns)
        ));
        let blank_cell = dir.path().join("c.csv");
        std::fs::write(&blank_cell, "voltage_0,voltage_1,label\n0.1,,0\n").unwrap();
        assert!(matches!(
            load_dataset(&blank_cell),
            Err(DatasetError::BadCell { row: 0, .. })
        ));
    }

    #[test]
    fn split_is_stratified_and_disjoint() {
        let mut labels = vec![MentalState::Relaxed; 10];
        labels.extend(vec![MentalState::Focused; 5]);
        labels.extend(vec![MentalState::Sleepy; 5]);
        let (train, test) = stratified_split(&labels, 0.2, 42).unwrap();
        assert_eq!(train.len() + test.len(), 20);
        assert!(train.iter().all(|r| !test.contains(r)));
        let test_labels: Vec<MentalState> = test.iter().map(|r| labels[*r]).collect();
        assert_eq!(test_labels.iter().filter(|l| **l == MentalState::Relaxed).count(), 2);
        assert_eq!(test_labels.iter().filter(|l| **l == MentalState::Focused).count(), 1);
        assert_eq!(test_labels.iter().filter(|l| **l == MentalState::Sleepy).count(), 1);

        assert!(matches!(
            stratified_split(&[MentalState::Relaxed, MentalState::Focused, MentalState::Focused], 0.2, 1),
            Err(DatasetError::TooFewRows { count: 1, .. })
        ));
    }

    #[test]
    fn report_metrics() {
        use MentalState::*;
        let truth = [Relaxed, Relaxed, Focused, Sleepy];
        let predicted = [Relaxed, Focused, Focused, Sleepy];
        let report = ClassificationReport::from_predictions(&truth, &predicted);
        assert_eq!(report.accuracy, 0.75);
        let (_, relaxed) = report.per_class[0];
        assert_eq!(relaxed.precision, 1.0);
        assert_eq!(relaxed.recall, 0.5);
        assert_eq!(relaxed.support, 2);
        let (_, focused) = report.per_class[1];
        assert_eq!(focused.precision, 0.5);
        assert!(report.to_string().contains("accuracy"));
    }

    #[test]
    fn trains_a_model_that_separates_band_signatures() {
        let mut ds = Dataset {
            segments: Vec::new(),
            labels: Vec::new(),
        };
        for k in 0..12 {
            let phase = k as f64 * 0.37;
            ds.segments.push(tone(10.0, 1.2, 300, phase));
            ds.labels.push(MentalState::Relaxed);
            ds.segments.push(tone(20.0, 2.0, 300, phase));
            ds.labels.push(MentalState::Focused);
            ds.segments.push(tone(2.0, 0.8, 300, phase));
            ds.labels.push(MentalState::Sleepy);
        }
        let options = TrainOptions {
            forest: ForestParams {
                n_trees: 25,
                ..ForestParams::default()
            },
            ..TrainOptions::default()
        };
        let outcome = train(&ds, &options).unwrap();
        assert_eq!(outcome.report.total, 6);
        assert_eq!(outcome.report.accuracy, 1.0);
        let relaxed = features::extract(&tone(10.0, 1.2, 300, 0.05), 100.0);
        assert_eq!(outcome.artifact.predict(&relaxed), Some(MentalState::Relaxed));
    }
}
