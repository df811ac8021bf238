// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Pipeline tests driving complete frame cycles through the simulated media
// device: stream nodes, request synchronisation and the sensor registry.
//
// RUN:
//   cargo test --test pipeline

use std::fs::File;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use mtkcam_v4l2::format::ImageFormat;
use mtkcam_v4l2::image::{DmaBufImage, ImageBuffer};
use mtkcam_v4l2::pipe_mgr::{PipeTag, PipelineConfig, PipelineManager, PipelineRegistry};
use mtkcam_v4l2::sim::SimMedia;
use mtkcam_v4l2::stream_node::{BufInfo, NodeId, NodeState};
use mtkcam_v4l2::sync_req::SyncId;
use mtkcam_v4l2::Error;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

fn image() -> Arc<dyn ImageBuffer> {
    let fd: OwnedFd = File::open("/dev/null").unwrap().into();
    Arc::new(
        DmaBufImage::new(ImageFormat::Yuy2, WIDTH, HEIGHT).with_plane(
            fd,
            0,
            WIDTH * 2,
            WIDTH * HEIGHT * 2,
        ),
    )
}

fn pipeline(media: &Arc<SimMedia>, tag: PipeTag, config: PipelineConfig) -> PipelineManager {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut pipe = PipelineManager::new(0, media.clone(), config);
    pipe.build_links(tag).unwrap();
    pipe
}

#[test]
fn test_single_enque_starts_node() {
    let media = Arc::new(SimMedia::new());
    let pipe = pipeline(&media, PipeTag::Out1, PipelineConfig::default());
    let node = pipe.stream_node(NodeId::P1MainStream).unwrap();
    assert_eq!(node.state(), NodeState::Open);

    node.enque(&BufInfo::new(image()), pipe.lazy_start(), None)
        .unwrap();
    assert_eq!(node.state(), NodeState::Started);
    assert_eq!(node.in_use_count(), 1);

    let done = node.deque().unwrap();
    assert_eq!(done.sequence, 0);
    assert_eq!(done.request_fd, None);
    assert_eq!(done.size, WIDTH * HEIGHT * 2);
}

#[test]
fn test_lazy_start_pipeline() {
    let media = Arc::new(SimMedia::new());
    let pipe = pipeline(
        &media,
        PipeTag::Out1,
        PipelineConfig::default().with_lazy_start(true),
    );
    let node = pipe.stream_node(NodeId::P1MainStream).unwrap();
    node.enque(&BufInfo::new(image()), pipe.lazy_start(), None)
        .unwrap();
    assert_eq!(node.state(), NodeState::Prepared);
    assert!(matches!(node.deque(), Err(Error::InvalidState { .. })));
    node.start().unwrap();
    assert!(node.deque().is_ok());
}

#[test]
fn test_dmabuf_slot_reuse() {
    let media = Arc::new(SimMedia::new());
    let pipe = pipeline(&media, PipeTag::Out1, PipelineConfig::default());
    let node = pipe.stream_node(NodeId::P1MainStream).unwrap();
    let probe = media.probe("mtk-cam-p1 main stream").unwrap();

    let (x, y, z) = (image(), image(), image());
    for buffer in [&x, &y, &z] {
        node.enque(&BufInfo::new(buffer.clone()), false, None)
            .unwrap();
    }
    assert_eq!(node.pool_len(), 3);
    assert_eq!(node.in_use_count(), 3);

    let w = image();
    assert!(matches!(
        node.enque(&BufInfo::new(w.clone()), false, None),
        Err(Error::NoBufferAvailable)
    ));

    let first = node.deque().unwrap();
    assert!(Arc::ptr_eq(&first.buffer, &x));
    assert_eq!(first.index, 0);

    node.enque(&BufInfo::new(w.clone()), false, None).unwrap();
    let queued = probe.queued();
    let last = queued.last().unwrap();
    assert_eq!(last.index, 0);
    assert_eq!(last.planes[0].fd, w.fd(0));

    let order: Vec<_> = (0..3).map(|_| node.deque().unwrap()).collect();
    assert!(Arc::ptr_eq(&order[0].buffer, &y));
    assert!(Arc::ptr_eq(&order[1].buffer, &z));
    assert!(Arc::ptr_eq(&order[2].buffer, &w));
    assert_eq!(
        order.iter().map(|d| d.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[test]
fn test_rebind_prefers_existing_binding() {
    let media = Arc::new(SimMedia::new());
    let pipe = pipeline(&media, PipeTag::Out1, PipelineConfig::default());
    let node = pipe.stream_node(NodeId::P1MainStream).unwrap();
    let probe = media.probe("mtk-cam-p1 main stream").unwrap();

    let (x, y) = (image(), image());
    node.enque(&BufInfo::new(x.clone()), false, None).unwrap();
    node.enque(&BufInfo::new(y.clone()), false, None).unwrap();
    node.deque().unwrap();
    node.deque().unwrap();

    node.enque(&BufInfo::new(y.clone()), false, None).unwrap();
    assert_eq!(probe.queued().last().unwrap().index, 1);
    node.enque(&BufInfo::new(x.clone()), false, None).unwrap();
    assert_eq!(probe.queued().last().unwrap().index, 0);
}

#[test]
fn test_request_cycle() {
    let media = Arc::new(SimMedia::new());
    let config = PipelineConfig::default().with_reserve_requests(2);
    let pipe = pipeline(&media, PipeTag::Out2, config);
    let sync = pipe.sync_req_mgr().unwrap();
    assert_eq!(sync.mask(), SyncId::MAIN_STREAM | SyncId::PACKED_OUT);

    let main = pipe.stream_node(NodeId::P1MainStream).unwrap();
    let packed = pipe.stream_node(NodeId::P1PackedOut).unwrap();
    let roles = [(&main, SyncId::MAIN_STREAM), (&packed, SyncId::PACKED_OUT)];

    for frame in 0..4u32 {
        let magic = sync.acquire_available_magic_num(SyncId::MAIN_STREAM).unwrap();
        let fd = sync.acquire_request_api(SyncId::MAIN_STREAM, magic).unwrap();
        assert_eq!(sync.acquire_magic_num(SyncId::PACKED_OUT, fd), Some(magic));

        main.enque(
            &BufInfo::new(image()).with_request_fd(fd).with_magic_num(magic),
            false,
            None,
        )
        .unwrap();
        sync.notify_enqueued_by_magic_num(SyncId::MAIN_STREAM, magic)
            .unwrap();

        // Buffers bound to an unqueued request are not completed.
        assert!(main.deque().is_err());
        assert_eq!(media.stats().queued, frame as usize);

        packed
            .enque(
                &BufInfo::new(image()).with_request_fd(fd).with_magic_num(magic),
                false,
                None,
            )
            .unwrap();
        sync.notify_enqueued_by_request_api(SyncId::PACKED_OUT, fd)
            .unwrap();
        assert_eq!(media.stats().queued, frame as usize + 1);

        for (node, role) in roles {
            let done = node.deque().unwrap();
            assert_eq!(done.request_fd, Some(fd));
            assert_eq!(done.sequence, frame);
            let request_fd = done.request_fd.unwrap();
            assert_eq!(sync.validate_magic_num(role, request_fd), Some(magic));
        }
        assert!(sync.records().iter().all(|r| r.magic_num != magic));
        assert_eq!(media.stats().reinit, frame as usize + 1);
    }
    assert_eq!(sync.records().len(), 2);
    assert_eq!(media.stats().allocated, 2);
}

#[test]
fn test_stop_then_close() {
    let media = Arc::new(SimMedia::new());
    let pipe = pipeline(&media, PipeTag::Out1, PipelineConfig::default());
    let node = pipe.stream_node(NodeId::P1MainStream).unwrap();
    node.enque(&BufInfo::new(image()), false, None).unwrap();
    node.stop().unwrap();
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(matches!(node.deque(), Err(Error::InvalidState { .. })));
    assert!(matches!(
        node.enque(&BufInfo::new(image()), false, None),
        Err(Error::InvalidState { .. })
    ));
    node.close().unwrap();
    assert_eq!(node.state(), NodeState::Closed);
}

#[test]
fn test_registry_shares_pipeline() {
    let media = Arc::new(SimMedia::new());
    let registry = PipelineRegistry::new(media.clone(), PipelineConfig::default());
    let pipe = registry.get(2, PipeTag::Out1Tuning).unwrap();
    assert_eq!(pipe.stream_nodes().len(), 6);
    let node = pipe.stream_node(NodeId::P1MetaInput).unwrap();
    assert_eq!(node.state(), NodeState::Open);

    let again = registry.get(2, PipeTag::Unknown).unwrap();
    assert!(Arc::ptr_eq(&pipe, &again));
    assert_eq!(media.stats().opened, 1);

    drop((pipe, again));
    assert!(media.open_devices().is_empty());
}
