// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// MediaTek ISP Hardware Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - test_controller_without_library: backend reports a missing library
//
// Layer 3 (Hardware Integration - Requires MediaTek ISP):
//   - test_build_p1_pipeline: media graph for P1 OUT2 with tuning
//   - test_capture_request_cycle: main stream frames through media requests
//
// REQUIREMENTS for Layer 3 tests (marked with #[ignore]):
//   - MediaTek SoC with the mtk-cam P1 media device
//   - libmtkcam_v4l2.so on the library path
//   - Sensor 0 connected and streaming capable
//
// RUN LAYER 1:
//   cargo test --test hardware
//
// RUN LAYER 3 (on hardware):
//   cargo test --test hardware -- --ignored --nocapture

use std::sync::Arc;
use std::time::{Duration, Instant};

use mtkcam_v4l2::backend::MtkMediaController;
use mtkcam_v4l2::format::{ImageFormat, ImgParam};
use mtkcam_v4l2::image::ImageBuffer;
use mtkcam_v4l2::pipe_mgr::{PipeTag, PipelineConfig, PipelineManager};
use mtkcam_v4l2::stream_node::{BufInfo, NodeId, NodeState};
use mtkcam_v4l2::sync_req::SyncId;
use mtkcam_v4l2::Error;
use serial_test::serial;

const FRAME_COUNT: u32 = 30;

fn controller() -> Arc<MtkMediaController> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(MtkMediaController::new().expect("libmtkcam_v4l2.so is not available"))
}

#[test]
fn test_controller_without_library() {
    // Only meaningful on hosts without the vendor library.
    if let Err(err) = MtkMediaController::new() {
        assert!(matches!(err, Error::LibraryNotLoaded(_)));
        assert!(err.errno() < 0);
    }
}

#[test]
#[serial]
#[ignore = "test requires MediaTek ISP hardware"]
fn test_build_p1_pipeline() {
    let mut pipe = PipelineManager::new(0, controller(), PipelineConfig::default());
    pipe.build_links(PipeTag::Out2Tuning)
        .expect("build P1 media graph");

    assert_eq!(pipe.stream_nodes().len(), 7);
    assert!(pipe.p1_subdevice().is_some());
    let sync = pipe.sync_req_mgr().expect("request manager");
    assert_eq!(sync.mask().bits(), 0x7f);
    for node in pipe.stream_nodes() {
        log::info!("{} ({})", node.name(), node.state());
        assert_eq!(node.state(), NodeState::Open);
    }

    let mut entities = Vec::new();
    pipe.query_media_entities(&mut entities).unwrap();
    assert!(entities.iter().any(|e| e.name == "mtk-cam-p1"));
}

#[test]
#[serial]
#[ignore = "test requires MediaTek ISP hardware"]
fn test_capture_request_cycle() {
    let config = PipelineConfig::default().with_reserve_requests(4);
    let mut pipe = PipelineManager::new(0, controller(), config);
    pipe.build_links(PipeTag::Out1).expect("build P1 media graph");

    let node = pipe.stream_node(NodeId::P1MainStream).unwrap();
    let sync = pipe.sync_req_mgr().unwrap();

    let mut param = ImgParam::new(ImageFormat::Yuy2, 1920, 1080);
    let mut buffers: Vec<Arc<dyn ImageBuffer>> = Vec::new();
    node.set_format_and_get_buffers(&mut param, &mut buffers)
        .expect("MMAP buffers");
    assert!(!buffers.is_empty());

    let start = Instant::now();
    let mut next = buffers.iter().cycle();
    let mut last_sequence = None;
    for _ in 0..FRAME_COUNT {
        let magic = sync
            .acquire_available_magic_num(SyncId::MAIN_STREAM)
            .unwrap();
        let fd = sync
            .acquire_request_api(SyncId::MAIN_STREAM, magic)
            .unwrap();
        let buffer = next.next().unwrap().clone();
        let info = BufInfo::new(buffer)
            .with_request_fd(fd)
            .with_magic_num(magic);
        node.enque(&info, false, None).unwrap();
        sync.notify_enqueued_by_magic_num(SyncId::MAIN_STREAM, magic)
            .unwrap();

        let done = node.deque().unwrap();
        assert_eq!(done.request_fd, Some(fd));
        if let Some(prev) = last_sequence {
            assert!(done.sequence > prev);
        }
        last_sequence = Some(done.sequence);
        assert_eq!(
            sync.validate_magic_num(SyncId::MAIN_STREAM, fd),
            Some(magic)
        );
    }

    let elapsed = start.elapsed();
    log::info!(
        "{} frames in {:?} ({:.1} fps)",
        FRAME_COUNT,
        elapsed,
        FRAME_COUNT as f64 / elapsed.as_secs_f64()
    );
    assert!(elapsed < Duration::from_secs(10));
    node.stop().unwrap();
}
