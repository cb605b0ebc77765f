//! Demo server binary: camera controls, overlay stream and results over HTTP.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use common::protocol::Facing;
use demo_server::{endpoints::build_router, results_socket::spawn_results_socket, state::DemoState};
use env_logger::TimestampPrecision;
use infer_loop::{
    meter::spawn_meter_logger,
    model::{LoadPolicy, ModelCache},
    nn::{UltrafaceLoader, UltrafaceVariant},
    overlay::ImageCanvas,
    render::BoxRenderer,
    sensors::V4l2Devices,
    utils::{default_model_dir, ensure_model_file},
    CaptureLoop, LoopConfig,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the HTTP server
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address of the TCP results feed
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Device of the front camera
    #[clap(long, default_value = "/dev/video0")]
    front_device: String,

    /// Device of the rear camera
    #[clap(long, default_value = "/dev/video1")]
    rear_device: String,

    /// Capture format, MJPG or RGB3
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Capture resolution as WIDTHxHEIGHT, the largest supported one if unset
    #[clap(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Milliseconds between two frames
    #[clap(long, default_value_t = 50)]
    interval_ms: u64,

    /// Camera used when a request names none
    #[clap(long, default_value = "front")]
    facing: Facing,

    /// Ultraface variant, ultraface-320 or ultraface-640
    #[clap(long, default_value = "ultraface-320")]
    model: UltrafaceVariant,

    /// Where models are downloaded to
    #[clap(long)]
    model_dir: Option<PathBuf>,

    /// Load the model again after every stop
    #[clap(long)]
    reload_model_on_start: bool,

    /// Font for labels
    #[clap(long, default_value = "resources/DejaVuSansMono.ttf")]
    font: PathBuf,

    /// Start the camera right away
    #[clap(long)]
    autostart: bool,
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|err| format!("{v:?}: {err}"));
    Ok((parse(width)?, parse(height)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let model_dir = args.model_dir.clone().unwrap_or_else(default_model_dir);
    let model_path = ensure_model_file(&reqwest::Client::new(), args.model, &model_dir).await?;
    let policy = match args.reload_model_on_start {
        true => LoadPolicy::EveryStart,
        false => LoadPolicy::Once,
    };
    let models = Arc::new(ModelCache::new(
        Arc::new(UltrafaceLoader::new(model_path, args.model)),
        policy,
    ));

    let devices = V4l2Devices {
        front: args.front_device,
        rear: args.rear_device,
        format: args.format,
        resolution: args.resolution,
        frame_interval: None,
    };
    let config = LoopConfig {
        interval: Duration::from_millis(args.interval_ms),
        default_facing: args.facing,
    };
    let capture = CaptureLoop::new(
        Arc::new(devices),
        Box::<BoxRenderer>::default(),
        ImageCanvas::with_font_file(&args.font),
        config,
    );
    spawn_meter_logger(capture.meter(), Duration::from_secs(2));

    let state = DemoState::new(capture, models);

    // Create socket to publish results via network
    let (feed_addr, _) =
        spawn_results_socket(state.results_tx.clone(), &args.socket_address).await?;
    log::info!("Results feed on {feed_addr}");

    if args.autostart {
        if let Err(err) = state.start(args.facing).await {
            log::error!("Could not start camera: {err}");
        }
    }

    // Build HTTP server with endpoints
    let app = build_router(state);

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
