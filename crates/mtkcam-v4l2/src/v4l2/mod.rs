// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Kernel-facing capabilities of the camera pipeline
//!
//! The pipeline layer never issues ioctls itself. Everything it needs from
//! the kernel is expressed as a small set of capability traits, implemented
//! once over `libmtkcam_v4l2` ([`crate::backend`]) and once in software
//! ([`crate::sim`]).
//!
//! # Capabilities
//!
//! | Trait | Scope | Used by |
//! |-------|-------|---------|
//! | [`MediaGraphController`] | One media controller device | [`PipelineManager`] |
//! | [`RequestAllocator`] | Media request fds of that device | [`RequestSyncManager`] |
//! | [`VideoDeviceHandle`] | One video node | [`StreamNode`] |
//! | [`SubDeviceHandle`] | One sub-device | [`StreamNode`] (crop selection) |
//!
//! # Memory Types
//!
//! | Mode | Description | Slot Binding |
//! |------|-------------|--------------|
//! | [`MemoryType::Mmap`] | Kernel allocates, user mmaps and exports | Fixed 1:1 |
//! | [`MemoryType::UserPtr`] | User passes a virtual address | LRU rebinding |
//! | [`MemoryType::DmaBuf`] | User passes dmabuf fds | LRU rebinding |
//!
//! # Example
//!
//! ```no_run
//! use mtkcam_v4l2::sim::SimMedia;
//! use mtkcam_v4l2::topology::MediaDeviceTag;
//! use mtkcam_v4l2::v4l2::MediaGraphController;
//!
//! let media = SimMedia::new();
//! let (device, entities) = media.open_and_setup_all_links(MediaDeviceTag::P1Out2, true)?;
//! for entity in entities.iter().filter(|e| e.is_video()) {
//!     let mut node = media.open_video_node(device, entity)?;
//!     println!("{}: {:?}", entity.name, node.get_format()?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! [`PipelineManager`]: crate::pipe_mgr::PipelineManager
//! [`RequestSyncManager`]: crate::sync_req::RequestSyncManager
//! [`StreamNode`]: crate::stream_node::StreamNode

mod device;
mod media;

pub use device::{
    BufferType, KernelBuffer, KernelPlane, MemoryType, PlaneFormat, QueryControl, Selection,
    SubDeviceHandle, TimeVal, V4l2Format, VideoDeviceHandle, MAP_SHARED, PROT_READ, PROT_WRITE,
    V4L2_CID_ROTATE, V4L2_CTRL_FLAG_DISABLED, V4L2_SEL_FLAG_LE, V4L2_SEL_TGT_CROP,
    V4L2_SUBDEV_FORMAT_ACTIVE,
};
pub use media::{EntityKind, MediaEntity, MediaGraphController, MediaLink, RequestAllocator};
