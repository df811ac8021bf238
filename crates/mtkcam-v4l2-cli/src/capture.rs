// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Captures frames from the ISP through libmtkcam_v4l2.

use crate::cycle::{self, StreamSettings};
use crate::error::CliError;
use crate::metrics::MetricsCollector;
use crate::utils;
use clap::Args as ClapArgs;
use mtkcam_v4l2::backend::MtkMediaController;
use mtkcam_v4l2::pipe_mgr::{PipeTag, PipelineConfig, PipelineManager};
use std::sync::Arc;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Pipeline tag: out1, out2, out1-tuning or out2-tuning
    #[arg(short, long, default_value = "out1")]
    pipeline: PipeTag,

    /// Sensor index
    #[arg(short, long, default_value = "0")]
    sensor: u32,

    /// Number of frames to capture (0=until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    frames: u64,

    /// Resolution in WxH format
    #[arg(short, long, default_value = "1920x1080")]
    resolution: String,

    /// Image format, with the bayer order for bayer formats (e.g. bayer10:rggb)
    #[arg(long, default_value = "yuy2")]
    format: String,

    /// Kernel buffers per node (0 selects the default)
    #[arg(long, default_value = "0")]
    pool_size: u32,

    /// Media requests allocated up front
    #[arg(long, default_value = "16")]
    reserve: usize,

    /// Queue buffers before starting the stream
    #[arg(long)]
    lazy_start: bool,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::info!(
        "Starting capture of {} on sensor {}",
        args.pipeline,
        args.sensor
    );
    log::debug!("Capture parameters: {:?}", args);

    let (width, height) = utils::parse_resolution(&args.resolution)?;
    let (format, order) = utils::parse_format(&args.format)?;
    let settings = StreamSettings {
        format,
        order,
        width,
        height,
    };
    let term = utils::install_signal_handler()?;

    let backend = Arc::new(MtkMediaController::new()?);
    log::debug!(
        "libmtkcam_v4l2 version {}",
        mtkcam_v4l2::version().unwrap_or_else(|_| "unknown".into())
    );

    let config = PipelineConfig::default()
        .with_reserve_requests(args.reserve)
        .with_buffer_pool_size(args.pool_size)
        .with_lazy_start(args.lazy_start);
    let mut pipe = PipelineManager::new(args.sensor, backend, config);
    pipe.build_links(args.pipeline)?;
    let requests = pipe.sync_req_mgr().is_some();

    let mut metrics = MetricsCollector::new();
    let cycles = cycle::run(&pipe, &settings, args.frames, &term, &mut metrics)?;
    if requests {
        // Every completed cycle commits exactly one request.
        metrics.record_queued_requests(cycles);
    }
    log::info!("Captured {} frames", cycles);

    if json {
        metrics
            .print_json()
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
    } else {
        metrics.print_text();
    }
    Ok(())
}
