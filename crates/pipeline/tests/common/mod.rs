//! Shared test doubles for pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgpipe_core::manifest::ManifestColumns;
use imgpipe_db::InMemoryStatusRepo;
use imgpipe_events::EventBus;
use imgpipe_pipeline::fetch::{FetchError, Fetcher};
use imgpipe_pipeline::publish::{PublishError, Publisher};
use imgpipe_pipeline::transform::{ImageError, ImageTransform};
use imgpipe_pipeline::JobOrchestrator;
use reqwest::Url;
use tokio::sync::Notify;

/// A small PNG with a gradient, so resize output is not trivially uniform.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 90])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Build a manifest with the default columns from `(name, refs)` rows.
pub fn manifest(rows: &[(&str, &[&str])]) -> Vec<u8> {
    let mut out = String::from("S. No.,Product Name,Input Image Urls\n");
    for (i, (name, refs)) in rows.iter().enumerate() {
        out.push_str(&format!("{},{},\"{}\"\n", i + 1, name, refs.join(",")));
    }
    out.into_bytes()
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Publishes `mem://{key}` for every source except the scripted failures.
#[derive(Default)]
pub struct ScriptedTransform {
    failing: HashSet<String>,
    pub calls: AtomicUsize,
}

impl ScriptedTransform {
    pub fn failing(sources: &[&str]) -> Self {
        Self {
            failing: sources.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageTransform for ScriptedTransform {
    async fn transform(&self, source: &str, key: &str) -> Result<String, ImageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(source) {
            return Err(FetchError::HttpStatus(503).into());
        }
        Ok(format!("mem://{key}"))
    }
}

/// Records the highest number of concurrent entries it ever observed.
#[derive(Default)]
pub struct CountingTransform {
    current: AtomicUsize,
    pub max_seen: AtomicUsize,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ImageTransform for CountingTransform {
    async fn transform(&self, _source: &str, key: &str) -> Result<String, ImageError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1)).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("mem://{key}"))
    }
}

/// Blocks every transform until [`GatedTransform::open`] is called.
#[derive(Default)]
pub struct GatedTransform {
    gate: Notify,
    opened: std::sync::atomic::AtomicBool,
}

impl GatedTransform {
    pub fn open(&self) {
        self.opened.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }
}

#[async_trait]
impl ImageTransform for GatedTransform {
    async fn transform(&self, _source: &str, key: &str) -> Result<String, ImageError> {
        loop {
            let notified = self.gate.notified();
            if self.opened.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        Ok(format!("mem://{key}"))
    }
}

// ---------------------------------------------------------------------------
// Fetch / publish
// ---------------------------------------------------------------------------

/// Serves fixed bodies by URL; anything else is a 404.
pub struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn new(bodies: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            bodies: bodies.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.bodies
            .get(url.as_str())
            .cloned()
            .ok_or(FetchError::HttpStatus(404))
    }
}

/// Keeps published artifacts in memory.
#[derive(Default)]
pub struct MemoryPublisher {
    pub artifacts: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, key: &str, bytes: &[u8]) -> Result<String, PublishError> {
        self.artifacts
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("mem://{key}"))
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PublishError> {
        Ok(self.artifacts.lock().unwrap().get(key).cloned())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub repo: Arc<InMemoryStatusRepo>,
    pub events: Arc<EventBus>,
    pub publisher: Arc<MemoryPublisher>,
}

pub fn harness(transform: Arc<dyn ImageTransform>, max_concurrent_images: usize) -> Harness {
    let repo = Arc::new(InMemoryStatusRepo::new());
    let events = Arc::new(EventBus::default());
    let publisher = Arc::new(MemoryPublisher::default());

    let orchestrator = JobOrchestrator::new(
        repo.clone(),
        events.clone(),
        transform,
        publisher.clone(),
        ManifestColumns::default(),
        max_concurrent_images,
    );

    Harness {
        orchestrator,
        repo,
        events,
        publisher,
    }
}
