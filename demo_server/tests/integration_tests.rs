use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use common::protocol::{BoundingBox, Detection, Facing, InferenceResult, ProtoMsg};
use demo_server::{
    endpoints::build_router, results_socket::spawn_results_socket, state::DemoState,
};
use futures::StreamExt;
use image::RgbImage;
use infer_loop::{
    media::{MediaDevices, MediaStream},
    model::{InferModel, LoadPolicy, ModelCache},
    overlay::ImageCanvas,
    render::BoxRenderer,
    CaptureLoop, InferenceError, LoopConfig, MediaAccessError,
};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

struct FakeDevices {
    open: Arc<AtomicUsize>,
    available: bool,
}

struct FakeStream {
    open: Arc<AtomicUsize>,
    stopped: bool,
}

impl MediaDevices for FakeDevices {
    fn open(&self, facing: Facing) -> Result<Box<dyn MediaStream>, MediaAccessError> {
        if !self.available {
            return Err(MediaAccessError::NoDevice(facing));
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            open: Arc::clone(&self.open),
            stopped: false,
        }))
    }
}

impl MediaStream for FakeStream {
    fn capture(&mut self) -> Option<RgbImage> {
        match self.stopped {
            true => None,
            false => Some(RgbImage::new(64, 48)),
        }
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.stop();
    }
}

struct OneFace;

impl InferModel for OneFace {
    fn infer(&self, _frame: &RgbImage) -> Result<InferenceResult, InferenceError> {
        Ok(InferenceResult::Detections(vec![Detection {
            bbox: BoundingBox::new(8.0, 8.0, 16.0, 16.0),
            label: "face".into(),
            score: 0.8,
        }]))
    }
}

struct TestServer {
    url: String,
    state: Arc<DemoState>,
    open: Arc<AtomicUsize>,
    loads: Arc<AtomicUsize>,
    client: reqwest::Client,
}

impl TestServer {
    async fn spawn(available: bool) -> Result<Self> {
        Self::spawn_with_policy(available, LoadPolicy::Once).await
    }

    async fn spawn_with_policy(available: bool, policy: LoadPolicy) -> Result<Self> {
        let open = Arc::new(AtomicUsize::new(0));
        let devices = FakeDevices {
            open: Arc::clone(&open),
            available,
        };
        let capture = CaptureLoop::new(
            Arc::new(devices),
            Box::<BoxRenderer>::default(),
            ImageCanvas::new(None),
            LoopConfig::default().with_interval(Duration::from_millis(10)),
        );
        let loads = Arc::new(AtomicUsize::new(0));
        let loads_ = Arc::clone(&loads);
        let models = Arc::new(ModelCache::new(
            Arc::new(move || -> Result<Arc<dyn InferModel>, InferenceError> {
                loads_.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(OneFace))
            }),
            policy,
        ));
        let state = DemoState::new(capture, models);

        let server = axum::Server::bind(&"127.0.0.1:0".parse()?)
            .serve(build_router(Arc::clone(&state)).into_make_service());
        let url = format!("http://{}", server.local_addr());
        tokio::spawn(server);

        Ok(Self {
            url,
            state,
            open,
            loads,
            client: reqwest::Client::new(),
        })
    }

    async fn post(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self.client.post(format!("{}{path}", self.url)).send().await?)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        Ok(self
            .client
            .get(format!("{}{path}", self.url))
            .send()
            .await?
            .json()
            .await?)
    }
}

async fn wait_until<F, Fut>(mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for _ in 0..300 {
        if check().await? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("condition not reached in time")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn healthcheck_is_healthy() -> Result<()> {
    let server = TestServer::spawn(true).await?;

    let body = reqwest::get(format!("{}/healthcheck", server.url))
        .await?
        .text()
        .await?;

    assert_eq!(body, "healthy");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_deliver_and_stop() -> Result<()> {
    let server = TestServer::spawn(true).await?;

    let status = server.get_json("/camera/status").await?;
    assert_eq!(status["state"], "stopped");
    assert_eq!(status["source"], Value::Null);

    let resp = server.post("/camera/start?facing=environment").await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let status: Value = resp.json().await?;
    assert_eq!(status["state"], "active");
    assert_eq!(status["source"]["facing"], "rear");
    assert_eq!(server.open.load(Ordering::SeqCst), 1);

    let srv = &server;
    wait_until(|| async move { Ok(srv.get_json("/camera/status").await?["model_loaded"] == true) })
        .await?;
    wait_until(|| async move { Ok(srv.state.results().len() == 5) }).await?;

    let results = server.get_json("/results").await?;
    let results = results.as_array().cloned().unwrap_or_default();
    assert_eq!(results.len(), 5);
    let detections = &results[0]["result"]["detections"];
    assert_eq!(detections[0]["label"], "face");
    assert!(results[0]["timestamp_ms"].as_u64() >= results[4]["timestamp_ms"].as_u64());

    let status: Value = server.post("/camera/stop").await?.json().await?;
    assert_eq!(status["state"], "stopped");
    let status: Value = server.post("/camera/stop").await?.json().await?;
    assert_eq!(status["state"], "stopped");
    assert_eq!(server.open.load(Ordering::SeqCst), 0);

    let resp = server
        .client
        .delete(format!("{}/results", server.url))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.get_json("/results").await?, Value::Array(Vec::new()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unavailable_camera_is_reported() -> Result<()> {
    let server = TestServer::spawn(false).await?;

    let resp = server.post("/camera/start").await?;

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(resp.text().await?.contains("front"));
    assert_eq!(server.get_json("/camera/status").await?["state"], "stopped");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn switch_toggles_facing() -> Result<()> {
    let server = TestServer::spawn(true).await?;
    server.post("/camera/start?facing=user").await?;

    let status: Value = server.post("/camera/switch").await?.json().await?;
    assert_eq!(status["source"]["facing"], "rear");
    let status: Value = server.post("/camera/switch?facing=front").await?.json().await?;
    assert_eq!(status["source"]["facing"], "front");

    assert_eq!(server.open.load(Ordering::SeqCst), 1);
    server.post("/camera/stop").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn results_feed_sends_proto_messages() -> Result<()> {
    let server = TestServer::spawn(true).await?;
    let (feed_addr, _) = spawn_results_socket(server.state.results_tx.clone(), "127.0.0.1:0").await?;
    let mut feed = Framed::new(TcpStream::connect(feed_addr).await?, LengthDelimitedCodec::new());

    server.post("/camera/start").await?;
    let frame = tokio::time::timeout(Duration::from_secs(3), feed.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("feed closed"))??;

    let ProtoMsg::Result(msg) = ProtoMsg::deserialize(&frame)?;
    assert_eq!(msg.result.kind(), "detections");
    assert_eq!(msg.result.len(), 1);
    server.post("/camera/stop").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlay_stream_sends_jpeg_parts() -> Result<()> {
    let server = TestServer::spawn(true).await?;
    server.post("/camera/start").await?;

    let mut resp = server
        .client
        .get(format!("{}/overlay_stream", server.url))
        .send()
        .await?;
    assert_eq!(
        resp.headers()[reqwest::header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let chunk = tokio::time::timeout(Duration::from_secs(3), resp.chunk())
        .await??
        .ok_or_else(|| anyhow::anyhow!("stream ended"))?;
    assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));

    server.post("/camera/stop").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn switch_reloads_model_when_loading_every_start() -> Result<()> {
    let server = TestServer::spawn_with_policy(true, LoadPolicy::EveryStart).await?;
    let srv = &server;
    let model_loaded =
        move || async move { Ok(srv.get_json("/camera/status").await?["model_loaded"] == true) };

    server.post("/camera/start").await?;
    wait_until(model_loaded).await?;
    assert_eq!(server.loads.load(Ordering::SeqCst), 1);

    let status: Value = server.post("/camera/switch").await?.json().await?;
    assert_eq!(status["source"]["facing"], "rear");
    wait_until(model_loaded).await?;
    assert_eq!(server.loads.load(Ordering::SeqCst), 2);

    server.post("/camera/stop").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn switch_keeps_model_when_loading_once() -> Result<()> {
    let server = TestServer::spawn(true).await?;
    let srv = &server;

    server.post("/camera/start").await?;
    wait_until(|| async move { Ok(srv.get_json("/camera/status").await?["model_loaded"] == true) })
        .await?;

    let status: Value = server.post("/camera/switch").await?.json().await?;
    assert_eq!(status["model_loaded"], true);
    assert_eq!(server.loads.load(Ordering::SeqCst), 1);

    server.post("/camera/stop").await?;
    Ok(())
}
