use std::f32::consts::PI;
use std::fs;
use std::path::Path;
use std::time::Duration;

use echoguard_detector::{Dataset, DatasetBuilder, Detector, ModelArtifact, TrainingPipeline};
use echoguard_domain::{DetectorConfig, EchoguardError, Label};

const RATE: u32 = 16_000;

fn write_wav(path: &Path, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}

fn tone(frequency: f32) -> Vec<f32> {
    (0..RATE)
        .map(|i| 0.5 * (2.0 * PI * frequency * i as f32 / RATE as f32).sin())
        .collect()
}

fn noise(seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..RATE)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
        })
        .collect()
}

fn populate(dir: &Path, count: usize, make: impl Fn(usize) -> Vec<f32>) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        write_wav(&dir.join(format!("clip_{i:02}.wav")), &make(i));
    }
}

#[test]
fn corrupt_files_are_skipped_and_reported() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("Real_Audio");
    populate(&dir, 10, |i| tone(220.0 + 40.0 * i as f32));
    fs::write(dir.join("broken_a.wav"), b"not audio at all").unwrap();
    fs::write(dir.join("broken_b.mp3"), [0u8; 32]).unwrap();
    fs::write(dir.join("notes.txt"), b"ignored").unwrap();

    let builder = DatasetBuilder::new(&DetectorConfig::default()).unwrap();
    let build = builder.build(&dir, Label::Real).unwrap();

    assert_eq!(build.dataset.len(), 10);
    assert_eq!(build.dataset.dimension(), 78);
    assert_eq!(build.dataset.labels(), vec![Label::Real; 10].as_slice());
    assert_eq!(build.failures.len(), 2);
    assert!(build
        .failures
        .iter()
        .all(|failure| failure.path.file_name().unwrap().to_string_lossy().starts_with("broken")));
    assert!(build.dataset.features().iter().all(|value| value.is_finite()));
}

#[test]
fn build_train_save_load_and_serve() {
    let root = tempfile::tempdir().unwrap();
    let real_dir = root.path().join("Real_Audio");
    let fake_dir = root.path().join("Fake_Audio");
    populate(&real_dir, 6, |i| tone(200.0 + 150.0 * i as f32));
    populate(&fake_dir, 6, |i| noise(i as u32 + 1));

    let config = DetectorConfig::default();
    let builder = DatasetBuilder::new(&config).unwrap();
    let real = builder.build(&real_dir, Label::Real).unwrap();
    let fake = builder.build(&fake_dir, Label::Fake).unwrap();
    assert!(real.failures.is_empty() && fake.failures.is_empty());
    let dataset = Dataset::concat(&[real.dataset, fake.dataset]).unwrap();
    assert_eq!(dataset.class_counts(), [6, 6]);

    let features_path = root.path().join("X_features.json");
    let labels_path = root.path().join("y_labels.json");
    dataset.save(&features_path, &labels_path).unwrap();
    let reloaded = Dataset::load(&features_path, &labels_path).unwrap();
    assert_eq!(reloaded.labels(), dataset.labels());

    let pipeline = TrainingPipeline::new(config.clone()).unwrap();
    let outcome = pipeline.run(&reloaded).unwrap();
    assert_eq!(outcome.train_rows + outcome.test_rows, 12);
    assert_eq!(outcome.evaluation.confusion.total(), outcome.test_rows);

    let model_path = root.path().join("svm_model.json");
    outcome.artifact.save(&model_path).unwrap();
    let loaded = ModelArtifact::load(&model_path).unwrap();
    let before = outcome.artifact.predict(dataset.features()).unwrap();
    let after = loaded.predict(dataset.features()).unwrap();
    assert_eq!(before, after);

    let detector = Detector::new(loaded, &config).unwrap();
    for (path, expected) in [
        (real_dir.join("clip_00.wav"), Label::Real),
        (fake_dir.join("clip_00.wav"), Label::Fake),
    ] {
        let row = builder.extract_file(&path).unwrap();
        let verdict = detector.classify_file(&path).unwrap();
        let from_features = detector.classify_features(&row).unwrap();
        assert_eq!(verdict, from_features);
        assert!(Label::ALL.contains(&verdict.label));
        assert!(verdict.confidence.is_finite() && verdict.confidence >= 0.0);
        let index = dataset
            .labels()
            .iter()
            .position(|label| *label == expected)
            .unwrap();
        assert_eq!(verdict.label, before[index]);
    }
}

#[tokio::test]
async fn uploads_go_through_the_same_path_as_files() {
    let root = tempfile::tempdir().unwrap();
    let real_dir = root.path().join("real");
    let fake_dir = root.path().join("fake");
    populate(&real_dir, 4, |i| tone(300.0 + 100.0 * i as f32));
    populate(&fake_dir, 4, |i| noise(i as u32 + 11));

    let config = DetectorConfig::default();
    let builder = DatasetBuilder::new(&config).unwrap();
    let dataset = Dataset::concat(&[
        builder.build(&real_dir, Label::Real).unwrap().dataset,
        builder.build(&fake_dir, Label::Fake).unwrap().dataset,
    ])
    .unwrap();
    let artifact = TrainingPipeline::new(config.clone())
        .unwrap()
        .fit(&dataset)
        .unwrap();
    let detector = Detector::new(artifact, &config).unwrap();

    let path = real_dir.join("clip_01.wav");
    let bytes = fs::read(&path).unwrap();
    let from_file = detector.classify_file(&path).unwrap();
    let from_upload = detector
        .classify_upload_with_timeout("Clip_01.WAV".into(), bytes, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(from_file, from_upload);

    let rejected = detector
        .classify_upload_with_timeout("clip.ogg".into(), vec![1, 2, 3], Duration::from_secs(30))
        .await;
    assert!(matches!(
        rejected,
        Err(EchoguardError::UnsupportedFormat { .. })
    ));
}

#[test]
fn one_second_of_silence_is_classified() {
    let root = tempfile::tempdir().unwrap();
    let real_dir = root.path().join("real");
    let fake_dir = root.path().join("fake");
    populate(&real_dir, 3, |i| tone(400.0 + 90.0 * i as f32));
    populate(&fake_dir, 3, |i| noise(i as u32 + 21));
    let silence = root.path().join("silence.wav");
    write_wav(&silence, &vec![0.0; RATE as usize]);

    let config = DetectorConfig::default();
    let builder = DatasetBuilder::new(&config).unwrap();
    let features = builder.extract_file(&silence).unwrap();
    assert_eq!(features.len(), 78);
    assert!(features.iter().all(|value| value.is_finite()));

    let dataset = Dataset::concat(&[
        builder.build(&real_dir, Label::Real).unwrap().dataset,
        builder.build(&fake_dir, Label::Fake).unwrap().dataset,
    ])
    .unwrap();
    let artifact = TrainingPipeline::new(config.clone())
        .unwrap()
        .fit(&dataset)
        .unwrap();
    let verdict = Detector::new(artifact, &config)
        .unwrap()
        .classify_file(&silence)
        .unwrap();
    assert!(Label::ALL.contains(&verdict.label));
    assert!(verdict.confidence.is_finite());
}

#[tokio::test]
async fn upload_past_its_deadline_times_out() {
    let root = tempfile::tempdir().unwrap();
    let real_dir = root.path().join("real");
    let fake_dir = root.path().join("fake");
    populate(&real_dir, 3, |i| tone(250.0 + 80.0 * i as f32));
    populate(&fake_dir, 3, |i| noise(i as u32 + 31));

    let config = DetectorConfig::default();
    let builder = DatasetBuilder::new(&config).unwrap();
    let dataset = Dataset::concat(&[
        builder.build(&real_dir, Label::Real).unwrap().dataset,
        builder.build(&fake_dir, Label::Fake).unwrap().dataset,
    ])
    .unwrap();
    let artifact = TrainingPipeline::new(config.clone())
        .unwrap()
        .fit(&dataset)
        .unwrap();
    let detector = Detector::new(artifact, &config).unwrap();

    // long enough that decoding alone outlasts a zero deadline
    let long = root.path().join("long.wav");
    let samples: Vec<f32> = (0..30).flat_map(|_| tone(440.0)).collect();
    write_wav(&long, &samples);
    let bytes = fs::read(&long).unwrap();

    let result = detector
        .classify_upload_with_timeout("long.wav".into(), bytes, Duration::ZERO)
        .await;
    assert!(matches!(result, Err(EchoguardError::Timeout(_))));
}
