// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Runs full request cycles against the software backend.

use crate::cycle::{self, StreamSettings};
use crate::error::CliError;
use crate::metrics::MetricsCollector;
use crate::utils;
use clap::Args as ClapArgs;
use mtkcam_v4l2::pipe_mgr::{PipeTag, PipelineConfig, PipelineManager};
use mtkcam_v4l2::sim::SimMedia;
use std::sync::Arc;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Pipeline tag: out1, out2, out1-tuning or out2-tuning
    #[arg(short, long, default_value = "out2-tuning")]
    pipeline: PipeTag,

    /// Sensor index
    #[arg(short, long, default_value = "0")]
    sensor: u32,

    /// Number of frame cycles to run
    #[arg(short, long, default_value = "30")]
    frames: u64,

    /// Resolution in WxH format
    #[arg(short, long, default_value = "640x480")]
    resolution: String,

    /// Image format, with the bayer order for bayer formats (e.g. bayer10:rggb)
    #[arg(long, default_value = "yuy2")]
    format: String,

    /// Kernel buffers per node (0 selects the default)
    #[arg(long, default_value = "0")]
    pool_size: u32,

    /// Media requests allocated up front
    #[arg(long, default_value = "4")]
    reserve: usize,

    /// Queue buffers before starting the stream
    #[arg(long)]
    lazy_start: bool,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing simulate command: {:?}", args);

    let (width, height) = utils::parse_resolution(&args.resolution)?;
    let (format, order) = utils::parse_format(&args.format)?;
    let settings = StreamSettings {
        format,
        order,
        width,
        height,
    };
    let term = utils::install_signal_handler()?;

    let media = Arc::new(SimMedia::new());
    let config = PipelineConfig::default()
        .with_reserve_requests(args.reserve)
        .with_buffer_pool_size(args.pool_size)
        .with_lazy_start(args.lazy_start);
    let mut pipe = PipelineManager::new(args.sensor, media.clone(), config);
    pipe.build_links(args.pipeline)?;
    log::info!(
        "Simulating {} on sensor {} with {} nodes",
        args.pipeline,
        args.sensor,
        pipe.stream_nodes().len()
    );

    let mut metrics = MetricsCollector::new();
    let cycles = cycle::run(&pipe, &settings, args.frames, &term, &mut metrics)?;
    drop(pipe);

    let stats = media.stats();
    metrics.record_queued_requests(stats.queued as u64);
    log::info!(
        "{} cycles, {} requests queued, {} recycled",
        cycles,
        stats.queued,
        stats.reinit
    );

    if json {
        metrics
            .print_json()
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
    } else {
        metrics.print_text();
    }
    Ok(())
}
