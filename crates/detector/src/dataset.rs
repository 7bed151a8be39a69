use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use echoguard_audio::{AudioDecoder, FeatureExtractor, FeatureVector};
use echoguard_domain::{DetectorConfig, EchoguardError, Label, Result};
use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Feature matrix with one label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Array2<f64>,
    labels: Vec<Label>,
}

impl Dataset {
    pub fn new(features: Array2<f64>, labels: Vec<Label>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(EchoguardError::validation(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    pub fn empty(dimension: usize) -> Self {
        Self {
            features: Array2::zeros((0, dimension)),
            labels: Vec::new(),
        }
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.features.ncols()
    }

    /// Row counts indexed by label code.
    pub fn class_counts(&self) -> [usize; 2] {
        let mut counts = [0usize; 2];
        for label in &self.labels {
            counts[label.code() as usize] += 1;
        }
        counts
    }

    /// Stacks datasets in the given order.
    pub fn concat(parts: &[Dataset]) -> Result<Dataset> {
        let Some(first) = parts.first() else {
            return Err(EchoguardError::EmptyDataset);
        };
        let dimension = first.dimension();
        if let Some(bad) = parts.iter().find(|part| part.dimension() != dimension) {
            return Err(EchoguardError::DimensionMismatch {
                expected: dimension,
                actual: bad.dimension(),
            });
        }
        let views: Vec<_> = parts.iter().map(|part| part.features.view()).collect();
        let features = ndarray::concatenate(Axis(0), &views)
            .map_err(|err| EchoguardError::validation(err.to_string()))?;
        let labels = parts
            .iter()
            .flat_map(|part| part.labels.iter().copied())
            .collect();
        Dataset::new(features, labels)
    }

    pub fn select(&self, rows: &[usize]) -> Dataset {
        Dataset {
            features: self.features.select(Axis(0), rows),
            labels: rows.iter().map(|&row| self.labels[row]).collect(),
        }
    }

    /// Splits into disjoint (train, test) partitions that keep the class
    /// ratio. The test side gets `ceil(test_fraction * len)` rows, shared out
    /// between classes by largest remainder.
    pub fn stratified_split(&self, test_fraction: f64, seed: u64) -> Result<(Dataset, Dataset)> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(EchoguardError::validation(
                "test fraction must be between 0 and 1",
            ));
        }
        let total = self.len();
        let n_test = (test_fraction * total as f64).ceil() as usize;
        if n_test == 0 || n_test >= total {
            return Err(EchoguardError::validation(format!(
                "cannot split {total} rows with test fraction {test_fraction}"
            )));
        }

        let counts = self.class_counts();
        if let Some(label) = Label::ALL
            .iter()
            .find(|label| counts[label.code() as usize] == 1)
        {
            return Err(EchoguardError::validation(format!(
                "class {label} has a single sample and cannot be stratified"
            )));
        }

        let mut allocation = [0usize; 2];
        let mut remainders = Vec::with_capacity(2);
        for (code, &count) in counts.iter().enumerate() {
            let exact = count as f64 * n_test as f64 / total as f64;
            allocation[code] = exact.floor() as usize;
            remainders.push((exact - exact.floor(), code));
        }
        remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut missing = n_test - allocation.iter().sum::<usize>();
        for (_, code) in remainders {
            if missing == 0 {
                break;
            }
            if allocation[code] < counts[code] {
                allocation[code] += 1;
                missing -= 1;
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut train_rows = Vec::with_capacity(total - n_test);
        let mut test_rows = Vec::with_capacity(n_test);
        for label in Label::ALL {
            let mut rows: Vec<usize> = (0..total).filter(|&i| self.labels[i] == label).collect();
            rows.shuffle(&mut rng);
            let take = allocation[label.code() as usize];
            test_rows.extend_from_slice(&rows[..take]);
            train_rows.extend_from_slice(&rows[take..]);
        }
        train_rows.sort_unstable();
        test_rows.sort_unstable();
        debug!(
            train = train_rows.len(),
            test = test_rows.len(),
            "stratified split"
        );
        Ok((self.select(&train_rows), self.select(&test_rows)))
    }

    /// Writes the matrix as a JSON array of rows and the label codes as a
    /// JSON array, row-aligned.
    pub fn save<P: AsRef<Path>, Q: AsRef<Path>>(&self, features_path: P, labels_path: Q) -> Result<()> {
        let rows: Vec<Vec<f64>> = self.features.outer_iter().map(|row| row.to_vec()).collect();
        let mut writer = BufWriter::new(File::create(features_path.as_ref())?);
        serde_json::to_writer(&mut writer, &rows)
            .map_err(|err| EchoguardError::Serialization(err.to_string()))?;
        writer.flush()?;
        let codes: Vec<u8> = self.labels.iter().map(|label| label.code()).collect();
        let mut writer = BufWriter::new(File::create(labels_path.as_ref())?);
        serde_json::to_writer(&mut writer, &codes)
            .map_err(|err| EchoguardError::Serialization(err.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(features_path: P, labels_path: Q) -> Result<Self> {
        let reader = BufReader::new(File::open(features_path.as_ref())?);
        let rows: Vec<Vec<f64>> = serde_json::from_reader(reader)
            .map_err(|err| EchoguardError::Serialization(err.to_string()))?;
        let dimension = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|row| row.len() != dimension) {
            return Err(EchoguardError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        let n_rows = rows.len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let features = Array2::from_shape_vec((n_rows, dimension), flat)
            .map_err(|err| EchoguardError::validation(err.to_string()))?;
        let reader = BufReader::new(File::open(labels_path.as_ref())?);
        let codes: Vec<u8> = serde_json::from_reader(reader)
            .map_err(|err| EchoguardError::Serialization(err.to_string()))?;
        let labels = codes
            .into_iter()
            .map(Label::from_code)
            .collect::<Result<Vec<_>>>()?;
        Dataset::new(features, labels)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct DirectoryBuild {
    pub dataset: Dataset,
    pub failures: Vec<FileFailure>,
}

pub struct DatasetBuilder {
    extractor: FeatureExtractor,
    config: DetectorConfig,
}

impl DatasetBuilder {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor: FeatureExtractor::new(config.features.clone())?,
            config: config.clone(),
        })
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Decodes, resamples and extracts a single file.
    pub fn extract_file(&self, path: &Path) -> Result<FeatureVector> {
        let waveform = AudioDecoder::load(path, self.config.features.sample_rate)?;
        self.extractor.extract(&waveform)
    }

    /// Files in `dir` with an allowed extension, sorted by file name.
    pub fn audio_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && self.config.allows(&path) {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Extracts every allowed file in `dir` and labels the rows with `label`.
    /// Files that fail are reported and left out; only an unreadable
    /// directory fails the whole build.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub fn build(&self, dir: &Path, label: Label) -> Result<DirectoryBuild> {
        let files = self.audio_files(dir)?;
        info!(count = files.len(), %label, "extracting features");

        // indexed collect keeps the sorted file order
        let results: Vec<(PathBuf, Result<FeatureVector>)> = files
            .into_par_iter()
            .map(|path| {
                let features = self.extract_file(&path);
                (path, features)
            })
            .collect();

        let dimension = self.extractor.dimension();
        let mut flat = Vec::with_capacity(results.len() * dimension);
        let mut failures = Vec::new();
        for (path, result) in results {
            match result {
                Ok(row) => flat.extend(row.iter().copied()),
                Err(err) if !err.is_per_file() => return Err(err),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping file");
                    failures.push(FileFailure {
                        path,
                        reason: err.to_string(),
                    });
                }
            }
        }
        let rows = flat.len() / dimension;
        let features = Array2::from_shape_vec((rows, dimension), flat)
            .map_err(|err| EchoguardError::validation(err.to_string()))?;
        let dataset = Dataset::new(features, vec![label; rows])?;
        info!(rows, failures = failures.len(), %label, "directory done");
        Ok(DirectoryBuild { dataset, failures })
    }
}
