use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use pixlflow::{
    DerivativePipeline, DerivativeSpec, EventLocator, MemorySink, PipelineConfig, SourceImage, Trigger,
};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    }))
}

fn encoded(raster: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    raster.write_to(&mut buffer, format).expect("Error encoding fixture.");
    buffer.into_inner()
}

fn write_fixture(dir: &Path, name: &str, width: u32, height: u32) {
    let format = ImageFormat::from_path(name).expect("fixture has a known extension");
    std::fs::write(dir.join(name), encoded(&gradient(width, height), format)).expect("Error writing fixture.");
}

fn dimensions_on_disk(path: &Path) -> (u32, u32) {
    image::open(path)
        .unwrap_or_else(|e| panic!("Error opening {}: {e}", path.display()))
        .dimensions()
}

#[tokio::test]
async fn cat_800x600_produces_eight_named_artifacts() {
    let source_dir = tempfile::tempdir().unwrap();
    let dest_dir = tempfile::tempdir().unwrap();
    write_fixture(source_dir.path(), "cat.jpg", 800, 600);

    let config = PipelineConfig::new(source_dir.path(), dest_dir.path());
    let report = config
        .runner(Trigger::Event(EventLocator::single("cat.jpg")))
        .expect("valid config")
        .run()
        .await
        .expect("Error running pipeline.");

    let outcome = report.outcome_for("cat.jpg").unwrap();
    assert_eq!(outcome.results.len(), 8);
    assert!(outcome.is_complete(), "{outcome:#?}");

    let expected: [(&str, (u32, u32)); 8] = [
        ("cat_blurred.jpg", (800, 600)),
        ("cat_upscale_2x.jpg", (1600, 1200)),
        ("cat_upscale_4x.jpg", (3200, 2400)),
        ("cat_pixelated-8x8.jpg", (800, 600)),
        ("cat_pixelated-16x16.jpg", (800, 600)),
        ("cat_pixelated-32x32.jpg", (800, 600)),
        ("cat_pixelated-48x48.jpg", (800, 600)),
        ("cat_pixelated-64x64.jpg", (800, 600)),
    ];
    for ((name, dims), result) in expected.iter().zip(&outcome.results) {
        assert_eq!(result.output_key, *name);
        assert_eq!(dimensions_on_disk(&dest_dir.path().join(name)), *dims, "{name}");
    }
    assert_eq!(std::fs::read_dir(dest_dir.path()).unwrap().count(), 8);
}

#[tokio::test]
async fn tiny_image_survives_the_coarsest_block() {
    let sink = Arc::new(MemorySink::new());
    let bytes = encoded(&gradient(4, 4), ImageFormat::Jpeg);
    let source = SourceImage::decode("tiny.jpg", bytes).unwrap();

    let outcome = DerivativePipeline::new(sink.clone()).run(source).await;

    let coarsest = outcome
        .result_for(&DerivativeSpec::square_pixelation(64))
        .expect("64x64 pixelation attempted");
    assert_eq!(coarsest.output_key, "tiny_pixelated-64x64.jpg");
    let artifact = coarsest.outcome.as_ref().expect("clamped pixelation succeeds");
    assert_eq!((artifact.width, artifact.height), (4, 4));
    assert!(outcome.is_complete());

    let stored = image::load_from_memory(&sink.get("tiny_pixelated-64x64.jpg").unwrap().bytes).unwrap();
    assert_eq!(stored.dimensions(), (4, 4));
}

#[tokio::test]
async fn identical_runs_produce_identical_bytes() {
    let bytes = encoded(&gradient(37, 23), ImageFormat::Png);

    let first = Arc::new(MemorySink::new());
    let second = Arc::new(MemorySink::new());
    DerivativePipeline::new(first.clone())
        .run(SourceImage::decode("same.png", bytes.clone()).unwrap())
        .await;
    DerivativePipeline::new(second.clone())
        .run(SourceImage::decode("same.png", bytes).unwrap())
        .await;

    assert_eq!(first.keys(), second.keys());
    for key in first.keys() {
        assert_eq!(first.get(&key), second.get(&key), "{key} differs between runs");
    }
}

#[tokio::test]
async fn directory_scan_processes_good_sources_and_skips_bad_ones() {
    let source_dir = tempfile::tempdir().unwrap();
    let dest_dir = tempfile::tempdir().unwrap();
    write_fixture(source_dir.path(), "a.png", 20, 10);
    write_fixture(source_dir.path(), "b.jpg", 9, 31);
    std::fs::write(source_dir.path().join("notes.txt"), b"not an image").unwrap();
    std::fs::create_dir(source_dir.path().join("archive")).unwrap();
    write_fixture(&source_dir.path().join("archive"), "old.png", 5, 5);

    let report = PipelineConfig::new(source_dir.path(), dest_dir.path())
        .with_key_prefix("processed")
        .runner(Trigger::DirectoryScan)
        .unwrap()
        .run()
        .await
        .unwrap();

    let seen: HashSet<_> = report.outcomes.iter().map(|o| o.source_key.as_str()).collect();
    assert_eq!(seen, HashSet::from(["a.png", "b.jpg", "notes.txt"]));
    assert_eq!(report.processed(), 2);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.derivatives_succeeded(), 16);
    assert_eq!(report.derivatives_failed(), 0);

    let namespace = dest_dir.path().join("processed");
    assert_eq!(dimensions_on_disk(&namespace.join("a_upscale_4x.png")), (80, 40));
    assert_eq!(dimensions_on_disk(&namespace.join("b_pixelated-48x48.jpg")), (9, 31));
    assert!(!namespace.join("old_blurred.png").exists());
}

#[tokio::test]
async fn dry_run_sink_receives_content_types() {
    let source_dir = tempfile::tempdir().unwrap();
    write_fixture(source_dir.path(), "shot.png", 16, 16);
    let sink = Arc::new(MemorySink::new());

    let report = PipelineConfig::new(source_dir.path(), source_dir.path().join("unused"))
        .runner_with_sink(Trigger::DirectoryScan, sink.clone())
        .run()
        .await
        .unwrap();

    assert!(report.is_clean());
    assert_eq!(sink.len(), 8);
    assert!(sink.keys().iter().all(|k| sink.get(k).unwrap().content_type == "image/png"));
    assert!(!source_dir.path().join("unused").exists());
}
