use image::{Rgb, RgbImage};
use silhouette::{
    BatchItem, EngineConfig, EngineStatus, Mask, ModelLoader, SegmentationModel,
    SilhouetteEngine, SilhouetteError, SilhouetteOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reads the mask straight from the red channel of the input
struct RedChannelModel;

impl SegmentationModel for RedChannelModel {
    fn segment(&mut self, image: &RgbImage) -> anyhow::Result<Mask> {
        let (w, h) = image.dimensions();
        Mask::new(w, h, image.pixels().map(|p| p[0]).collect())
    }

    fn input_size(&self) -> (u32, u32) {
        (256, 256)
    }
}

/// Model whose output buffer never matches the input size
struct TruncatingModel;

impl SegmentationModel for TruncatingModel {
    fn segment(&mut self, image: &RgbImage) -> anyhow::Result<Mask> {
        let (w, h) = image.dimensions();
        if (w, h) == (1, 1) {
            return Ok(Mask::filled(1, 1, 0));
        }
        Mask::new(w, h, vec![0; (w * h / 2) as usize])
    }

    fn input_size(&self) -> (u32, u32) {
        (256, 256)
    }
}

/// Model that loads fine but cannot answer the warm-up placeholder
struct BrokenWarmUpModel;

impl SegmentationModel for BrokenWarmUpModel {
    fn segment(&mut self, _image: &RgbImage) -> anyhow::Result<Mask> {
        anyhow::bail!("graph produced no output")
    }

    fn input_size(&self) -> (u32, u32) {
        (256, 256)
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    RedChannel,
    Truncating,
    BrokenWarmUp,
    FailLoad,
}

#[derive(Clone)]
struct FakeLoader {
    loads: Arc<AtomicUsize>,
    behaviour: Arc<Mutex<Behaviour>>,
    /// When set, `load` blocks until a message arrives
    gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
}

impl FakeLoader {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            loads: Arc::new(AtomicUsize::new(0)),
            behaviour: Arc::new(Mutex::new(behaviour)),
            gate: None,
        }
    }

    fn gated(behaviour: Behaviour) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let mut loader = Self::new(behaviour);
        loader.gate = Some(Arc::new(Mutex::new(rx)));
        (loader, tx)
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn set(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }
}

impl ModelLoader for FakeLoader {
    fn load(&self, _config: &EngineConfig) -> anyhow::Result<Box<dyn SegmentationModel + Send>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        match *self.behaviour.lock().unwrap() {
            Behaviour::RedChannel => Ok(Box::new(RedChannelModel)),
            Behaviour::Truncating => Ok(Box::new(TruncatingModel)),
            Behaviour::BrokenWarmUp => Ok(Box::new(BrokenWarmUpModel)),
            Behaviour::FailLoad => anyhow::bail!("model assets unavailable"),
        }
    }

    fn is_available(&self, _config: &EngineConfig) -> bool {
        true
    }
}

fn engine(loader: &FakeLoader) -> Arc<SilhouetteEngine> {
    Arc::new(SilhouetteEngine::with_loader(
        EngineConfig::new("unused.onnx"),
        loader.clone(),
    ))
}

fn solid(width: u32, height: u32, confidence: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([confidence, 0, 0]))
}

fn write_png(dir: &std::path::Path, name: &str, image: &RgbImage) -> String {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path.to_string_lossy().into_owned()
}

async fn wait_for_waiters(engine: &SilhouetteEngine, expected: usize) {
    for _ in 0..500 {
        if engine.status() == (EngineStatus::Initializing { waiters: expected }) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("waiters never attached: {:?}", engine.status());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initialize_constructs_once() {
    let (loader, release) = FakeLoader::gated(Behaviour::RedChannel);
    let engine = engine(&loader);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move { engine.initialize().await });
    }
    wait_for_waiters(&engine, 7).await;
    release.send(()).unwrap();

    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap(), Ok(()));
    }
    assert_eq!(loader.loads(), 1);
    assert!(engine.is_initialized());

    engine.initialize().await.unwrap();
    assert_eq!(loader.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_a_failure_and_later_retry() {
    let (loader, release) = FakeLoader::gated(Behaviour::FailLoad);
    let engine = engine(&loader);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..5 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move { engine.initialize().await });
    }
    wait_for_waiters(&engine, 4).await;
    release.send(()).unwrap();

    let mut errors = Vec::new();
    while let Some(result) = tasks.join_next().await {
        errors.push(result.unwrap().unwrap_err());
    }
    assert_eq!(loader.loads(), 1);
    assert!(errors.iter().all(|e| e == &errors[0]));
    assert!(matches!(&errors[0], SilhouetteError::Initialization(m) if m.contains("model assets unavailable")));
    assert_eq!(engine.status(), EngineStatus::Uninitialized);

    loader.set(Behaviour::RedChannel);
    release.send(()).unwrap();
    engine.initialize().await.unwrap();
    assert_eq!(loader.loads(), 2);
}

#[tokio::test]
async fn failed_warm_up_is_an_initialization_failure() {
    let loader = FakeLoader::new(Behaviour::BrokenWarmUp);
    let engine = engine(&loader);

    let err = engine.initialize().await.unwrap_err();
    match &err {
        SilhouetteError::Initialization(message) => {
            assert!(message.contains("Warm-up pass failed"), "{message}");
            assert!(message.contains("graph produced no output"), "{message}");
        }
        other => panic!("expected initialization failure, got {other:?}"),
    }
    assert_eq!(engine.status(), EngineStatus::Uninitialized);
    assert_eq!(loader.loads(), 1);

    let err = engine
        .transform(&solid(2, 2, 255), &SilhouetteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SilhouetteError::Initialization(_)));
    assert_eq!(loader.loads(), 2);

    loader.set(Behaviour::RedChannel);
    engine.initialize().await.unwrap();
    assert_eq!(loader.loads(), 3);
    assert!(engine.is_initialized());
}

#[tokio::test]
async fn threshold_is_strictly_above_midpoint() {
    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);

    let mut image = RgbImage::new(3, 1);
    image.put_pixel(0, 0, Rgb([128, 0, 0]));
    image.put_pixel(1, 0, Rgb([129, 0, 0]));
    image.put_pixel(2, 0, Rgb([127, 0, 0]));

    let silhouette = engine
        .transform(&image, &SilhouetteOptions::default())
        .await
        .unwrap();
    assert_eq!(silhouette.pixel(0, 0).0, [0, 0, 0, 255]);
    assert_eq!(silhouette.pixel(1, 0).0, [255, 255, 255, 255]);
    assert_eq!(silhouette.pixel(2, 0).0, [0, 0, 0, 255]);
}

#[tokio::test]
async fn transform_initializes_lazily() {
    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);
    assert_eq!(loader.loads(), 0);

    engine
        .transform(&solid(2, 2, 0), &SilhouetteOptions::default())
        .await
        .unwrap();
    assert_eq!(loader.loads(), 1);
    assert!(engine.is_initialized());
}

#[tokio::test]
async fn every_pixel_is_one_of_two_opaque_colors() {
    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);
    let options = SilhouetteOptions::from_specs("navy", "#ffcc00").unwrap();

    let image = RgbImage::from_fn(37, 19, |x, y| Rgb([((x * 7 + y * 13) % 256) as u8, 0, 0]));
    let silhouette = engine.transform(&image, &options).await.unwrap();

    assert_eq!(silhouette.dimensions(), (37, 19));
    assert_eq!(silhouette.image().pixels().count(), 37 * 19);
    for pixel in silhouette.image().pixels() {
        assert!(pixel.0 == [0, 0, 128, 255] || pixel.0 == [255, 204, 0, 255], "{pixel:?}");
    }
}

#[tokio::test]
async fn default_colors_fill_all_person_and_all_background() {
    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);
    let options = SilhouetteOptions::default();

    let person = engine.transform(&solid(5, 4, 255), &options).await.unwrap();
    assert!(person.image().pixels().all(|p| p.0 == [255, 255, 255, 255]));
    assert_eq!(person.person_pixels(), 20);

    let background = engine.transform(&solid(5, 4, 0), &options).await.unwrap();
    assert!(background.image().pixels().all(|p| p.0 == [0, 0, 0, 255]));
    assert!(background.to_data_uri().starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn empty_image_is_rejected() {
    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);

    let err = engine
        .transform(&RgbImage::new(0, 4), &SilhouetteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, SilhouetteError::InvalidImage { width: 0, height: 4 });
}

#[tokio::test]
async fn malformed_mask_is_a_transform_failure_and_engine_stays_ready() {
    let loader = FakeLoader::new(Behaviour::Truncating);
    let engine = engine(&loader);

    let err = engine
        .transform(&solid(4, 4, 255), &SilhouetteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SilhouetteError::Transform(_)), "{err:?}");
    assert!(engine.is_initialized());
}

#[tokio::test]
async fn batch_preserves_order_and_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", &solid(3, 3, 255));
    let c = write_png(dir.path(), "c.png", &solid(2, 5, 0));
    let broken = dir.path().join("b.png");
    std::fs::write(&broken, b"not an image").unwrap();

    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);
    let items = vec![
        BatchItem::new("A", a),
        BatchItem::new("B", broken.to_string_lossy()),
        BatchItem::new("C", c),
    ];

    let outcomes = engine.batch_transform(&items, None).await.unwrap();

    let ids: Vec<_> = outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, ["A", "B", "C"]);

    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].silhouette.as_ref().unwrap().dimensions(), (3, 3));

    assert!(outcomes[1].silhouette.is_none());
    assert!(!outcomes[1].error.as_deref().unwrap_or_default().is_empty());

    assert!(outcomes[2].is_success());
    assert_eq!(outcomes[2].silhouette.as_ref().unwrap().dimensions(), (2, 5));
}

#[tokio::test]
async fn placeholder_locator_fails_only_its_item() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", &solid(1, 1, 200));

    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);
    let items = vec![BatchItem::new("x", "undefined"), BatchItem::new("a", a)];

    let outcomes = engine.batch_transform(&items, None).await.unwrap();
    assert_eq!(
        outcomes[0].error.as_deref(),
        Some("failed to decode image: empty image locator")
    );
    assert!(outcomes[1].is_success());
}

#[tokio::test]
async fn progress_reported_once_per_item_ending_at_one() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_png(dir.path(), "ok.png", &solid(2, 2, 255));

    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);
    let items = vec![
        BatchItem::new("1", good.clone()),
        BatchItem::new("2", "/missing/photo.png"),
        BatchItem::new("3", good.clone()),
        BatchItem::new("4", good),
    ];

    let mut seen = Vec::new();
    let mut record = |p: f32| seen.push(p);
    engine
        .batch_transform(&items, Some(&mut record))
        .await
        .unwrap();

    assert_eq!(seen, [0.25, 0.5, 0.75, 1.0]);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn batch_aborts_only_when_initialization_fails() {
    let loader = FakeLoader::new(Behaviour::FailLoad);
    let engine = engine(&loader);

    let mut calls = 0;
    let mut record = |_: f32| calls += 1;
    let err = engine
        .batch_transform(&[BatchItem::new("a", "a.png")], Some(&mut record))
        .await
        .unwrap_err();

    assert!(matches!(err, SilhouetteError::Initialization(_)));
    assert_eq!(calls, 0);
}

#[tokio::test]
async fn empty_batch_reports_nothing() {
    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);
    let outcomes = engine.batch_transform(&[], None).await.unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn capability_check_does_not_initialize() {
    let loader = FakeLoader::new(Behaviour::RedChannel);
    let engine = engine(&loader);

    assert!(engine.is_supported());
    assert_eq!(loader.loads(), 0);
    assert_eq!(engine.status(), EngineStatus::Uninitialized);

    let onnx = SilhouetteEngine::new(EngineConfig::new("/nonexistent/model.onnx"));
    assert!(!onnx.is_supported());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_initialization_resets_state() {
    let (loader, release) = FakeLoader::gated(Behaviour::RedChannel);
    let engine = engine(&loader);

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.initialize().await })
    };
    wait_for_waiters(&engine, 0).await;
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.initialize().await })
    };
    wait_for_waiters(&engine, 1).await;

    first.abort();
    let waiter = second.await.unwrap();
    assert_eq!(
        waiter,
        Err(SilhouetteError::Initialization("initialization was cancelled".into()))
    );
    assert_eq!(engine.status(), EngineStatus::Uninitialized);

    // Unblock the orphaned load, then allow the retry's load through
    release.send(()).unwrap();
    release.send(()).unwrap();
    engine.initialize().await.unwrap();
    assert!(engine.is_initialized());
}
