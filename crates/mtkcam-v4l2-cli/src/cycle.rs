// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Frame cycle loop shared by the simulate and capture commands.
//!
//! One cycle acquires a magic number, enqueues a buffer on every node,
//! notifies the request manager, dequeues every node and validates the
//! request so it is recycled.

use crate::error::CliError;
use crate::metrics::MetricsCollector;
use mtkcam_v4l2::format::{BayerOrder, ImageFormat, ImgParam};
use mtkcam_v4l2::image::ImageBuffer;
use mtkcam_v4l2::pipe_mgr::PipelineManager;
use mtkcam_v4l2::stream_node::{BufInfo, NodeId, StreamNode};
use mtkcam_v4l2::sync_req::{sync_id_for_node, SyncId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Size requested for metadata and tuning buffers; the driver picks the
/// final size.
const META_BLOB_SIZE: u32 = 0x10000;

/// Image settings applied to every non-metadata node
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub format: ImageFormat,
    pub order: Option<BayerOrder>,
    pub width: u32,
    pub height: u32,
}

struct Lane {
    node: Arc<StreamNode>,
    role: SyncId,
    buffers: Vec<Arc<dyn ImageBuffer>>,
}

fn is_meta(id: Option<NodeId>) -> bool {
    matches!(
        id,
        Some(
            NodeId::P1MetaInput
                | NodeId::P1Meta0
                | NodeId::P1Meta1
                | NodeId::P1Meta2
                | NodeId::P1Meta3
                | NodeId::P2Tuning(_)
        )
    )
}

/// Negotiates every node of `pipe` and exports its MMAP buffers.
fn prepare(pipe: &PipelineManager, settings: &StreamSettings) -> Result<Vec<Lane>, CliError> {
    let mut lanes = Vec::with_capacity(pipe.stream_nodes().len());
    for node in pipe.stream_nodes() {
        let mut param = if is_meta(node.id()) {
            ImgParam::blob(META_BLOB_SIZE)
        } else {
            let param = ImgParam::new(settings.format, settings.width, settings.height);
            match settings.order {
                Some(order) => param.with_bayer_order(order),
                None => param,
            }
        };

        let mut buffers = Vec::new();
        node.set_format_and_get_buffers(&mut param, &mut buffers)?;
        let role = node.id().map_or(SyncId::NONE, sync_id_for_node);
        log::info!(
            "{}: {} buffers of {} bytes, role {}",
            node.name(),
            buffers.len(),
            param.size,
            role
        );
        lanes.push(Lane {
            node: Arc::clone(node),
            role,
            buffers,
        });
    }
    Ok(lanes)
}

/// Runs `frames` cycles (0 runs until `term` is set) and returns the number
/// of cycles completed.
pub fn run(
    pipe: &PipelineManager,
    settings: &StreamSettings,
    frames: u64,
    term: &AtomicBool,
    metrics: &mut MetricsCollector,
) -> Result<u64, CliError> {
    let lanes = prepare(pipe, settings)?;
    if lanes.is_empty() {
        return Err(CliError::Pipeline("pipeline has no video nodes".into()));
    }

    let sync = pipe.sync_req_mgr();
    let subdevice = pipe.p1_subdevice();
    let lead = lanes.iter().map(|l| l.role).find(|r| !r.is_empty());

    let mut cycle = 0u64;
    while (frames == 0 || cycle < frames) && !term.load(Ordering::Relaxed) {
        let start = Instant::now();

        let request = match (&sync, lead) {
            (Some(sync), Some(lead)) => {
                let magic = sync.acquire_available_magic_num(lead)?;
                let fd = sync.acquire_request_api(lead, magic).ok_or_else(|| {
                    CliError::Stream(format!("request {} vanished before use", magic))
                })?;
                for lane in lanes.iter().filter(|l| !l.role.is_empty() && l.role != lead) {
                    if sync.acquire_magic_num(lane.role, fd).is_none() {
                        log::warn!("{}: request fd {} not acquired", lane.node.name(), fd);
                    }
                }
                Some((magic, fd))
            }
            _ => None,
        };

        for (port, lane) in lanes.iter().enumerate() {
            let buffer = &lane.buffers[cycle as usize % lane.buffers.len()];
            let mut info = BufInfo::new(Arc::clone(buffer)).with_port(port as u32);
            if let (Some((magic, fd)), false) = (request, lane.role.is_empty()) {
                info = info.with_request_fd(fd).with_magic_num(magic);
            }
            lane.node
                .enque(&info, pipe.lazy_start(), subdevice.as_deref())?;
            if let (Some(sync), Some((magic, _))) = (&sync, request) {
                if !lane.role.is_empty() {
                    sync.notify_enqueued_by_magic_num(lane.role, magic)?;
                }
            }
        }

        if pipe.lazy_start() {
            for lane in lanes.iter().filter(|l| l.node.is_prepared()) {
                lane.node.start()?;
            }
        }

        for (i, lane) in lanes.iter().enumerate() {
            let done = lane.node.deque()?;
            metrics.record_buffer(lane.node.name(), u64::from(done.size));
            if i == 0 {
                metrics.track_sequence(done.sequence);
            }
            log::debug!(
                "cycle {} {} seq {} at {}ns",
                cycle,
                lane.node.name(),
                done.sequence,
                done.timestamp_ns
            );
            if let (Some(sync), Some(fd)) = (&sync, done.request_fd) {
                if !lane.role.is_empty() && sync.validate_magic_num(lane.role, fd).is_none() {
                    log::warn!("{}: request fd {} not validated", lane.node.name(), fd);
                }
            }
        }

        metrics.record_latency_us(start.elapsed().as_micros() as u64);
        cycle += 1;
    }

    for lane in &lanes {
        if lane.node.is_started() {
            if let Err(err) = lane.node.stop() {
                log::warn!("{}: stop failed: {}", lane.node.name(), err);
            }
        }
    }
    Ok(cycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtkcam_v4l2::pipe_mgr::{PipeTag, PipelineConfig};
    use mtkcam_v4l2::sim::SimMedia;

    fn settings() -> StreamSettings {
        StreamSettings {
            format: ImageFormat::Yuy2,
            order: None,
            width: 64,
            height: 32,
        }
    }

    #[test]
    fn test_run_simulated_cycles() {
        let media = Arc::new(SimMedia::new());
        let config = PipelineConfig::default().with_reserve_requests(2);
        let mut pipe = PipelineManager::new(0, media.clone(), config);
        pipe.build_links(PipeTag::Out2Tuning).unwrap();

        let term = AtomicBool::new(false);
        let mut metrics = MetricsCollector::new();
        let cycles = run(&pipe, &settings(), 5, &term, &mut metrics).unwrap();
        assert_eq!(cycles, 5);
        assert_eq!(media.stats().queued, 5);
        assert_eq!(media.stats().reinit, 5);

        let report = metrics.finalize();
        assert_eq!(report.cycles, 5);
        assert_eq!(report.dropped_frames, 0);
        assert_eq!(report.nodes.len(), 7);
        assert!(report.bytes_dequeued > 0);
    }

    #[test]
    fn test_run_stops_on_signal() {
        let media = Arc::new(SimMedia::new());
        let mut pipe = PipelineManager::new(0, media, PipelineConfig::default());
        pipe.build_links(PipeTag::Out1).unwrap();

        let term = AtomicBool::new(true);
        let mut metrics = MetricsCollector::new();
        assert_eq!(run(&pipe, &settings(), 0, &term, &mut metrics).unwrap(), 0);
    }

    #[test]
    fn test_meta_nodes() {
        assert!(is_meta(Some(NodeId::P1Meta2)));
        assert!(!is_meta(Some(NodeId::P1MainStream)));
        assert!(!is_meta(None));
    }
}
