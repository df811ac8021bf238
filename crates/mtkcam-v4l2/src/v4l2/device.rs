// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Video node and sub-device capabilities
//!
//! This module defines the kernel-facing descriptors exchanged with a single
//! V4L2 video node and the capability traits a backend implements for it:
//!
//! - [`MemoryType`] - Buffer memory types (MMAP, USERPTR, DMABUF)
//! - [`V4l2Format`] - Negotiated pixel code, size and per-plane layout
//! - [`KernelBuffer`] - One `v4l2_buffer` as queued or dequeued
//! - [`VideoDeviceHandle`] - Format, buffer, streaming and control calls
//! - [`SubDeviceHandle`] - Selection rectangles on a sub-device pad

use std::fmt;
use std::io;
use std::os::fd::{OwnedFd, RawFd};

use crate::fourcc::FourCC;
use crate::image::Rect;

pub const V4L2_CID_ROTATE: u32 = 0x0098_0922;
pub const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

pub const V4L2_SUBDEV_FORMAT_ACTIVE: u32 = 1;
pub const V4L2_SEL_TGT_CROP: u32 = 0x0000;
pub const V4L2_SEL_FLAG_LE: u32 = 1 << 1;

pub const PROT_READ: i32 = 0x1;
pub const PROT_WRITE: i32 = 0x2;
pub const MAP_SHARED: i32 = 0x01;

/// V4L2 buffer memory type
///
/// | Memory Type | Allocation | Pool |
/// |-------------|------------|------|
/// | [`MemoryType::Mmap`] | Kernel | Fixed for the node's lifetime |
/// | [`MemoryType::UserPtr`] | User | Rebound on demand |
/// | [`MemoryType::DmaBuf`] | User | Rebound on demand |
///
/// Stream nodes default to [`MemoryType::DmaBuf`] and switch to
/// [`MemoryType::Mmap`] only when asked to export their own buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum MemoryType {
    /// Memory-mapped buffers
    ///
    /// Kernel allocates buffers, user mmaps them and exports a DMA fd for
    /// each so they can be shared downstream.
    Mmap = 1,

    /// User pointer buffers
    UserPtr = 2,

    /// DMA buffer file descriptors
    ///
    /// User passes dmabuf file descriptors. This enables zero-copy buffer
    /// sharing between the ISP and the rest of the camera stack.
    #[default]
    DmaBuf = 4,
}

impl MemoryType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(MemoryType::Mmap),
            2 => Some(MemoryType::UserPtr),
            4 => Some(MemoryType::DmaBuf),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryType::Mmap => write!(f, "MMAP"),
            MemoryType::UserPtr => write!(f, "USERPTR"),
            MemoryType::DmaBuf => write!(f, "DMABUF"),
        }
    }
}

/// Direction and layout of a video node's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    VideoCapture,
    VideoOutput,
    VideoCaptureMplane,
    VideoOutputMplane,
    MetaCapture,
    MetaOutput,
}

/// Layout of one memory plane as negotiated with the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneFormat {
    pub bytes_per_line: u32,
    pub size_image: u32,
}

/// A `v4l2_format` reduced to the fields the pipeline negotiates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct V4l2Format {
    pub pixel_format: FourCC,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<PlaneFormat>,
    pub colorspace: u32,
    pub quantization: u32,
}

impl V4l2Format {
    /// Negotiated image size of `plane`, or 0 if the plane does not exist.
    pub fn size_image(&self, plane: usize) -> u32 {
        self.planes.get(plane).map_or(0, |p| p.size_image)
    }

    pub fn set_bytes_per_line(&mut self, plane: usize, bytes_per_line: u32) {
        if self.planes.len() <= plane {
            self.planes.resize(plane + 1, PlaneFormat::default());
        }
        self.planes[plane].bytes_per_line = bytes_per_line;
    }
}

/// Kernel timestamp as reported in `v4l2_buffer.timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeVal {
    pub sec: i64,
    pub usec: i64,
}

impl TimeVal {
    pub fn as_nanos(&self) -> i64 {
        self.sec * 1_000_000_000 + self.usec * 1_000
    }
}

/// One plane of a [`KernelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelPlane {
    /// DMABUF fd; -1 when unused.
    pub fd: RawFd,
    /// USERPTR address; 0 when unused.
    pub userptr: usize,
    pub data_offset: u32,
    pub length: u32,
    pub bytes_used: u32,
}

impl Default for KernelPlane {
    fn default() -> Self {
        KernelPlane {
            fd: -1,
            userptr: 0,
            data_offset: 0,
            length: 0,
            bytes_used: 0,
        }
    }
}

/// A kernel buffer slot as handed to or returned from the driver.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelBuffer {
    pub index: u32,
    pub memory: MemoryType,
    pub planes: Vec<KernelPlane>,
    /// Media request the buffer is bound to, `None` outside the Request API.
    pub request_fd: Option<RawFd>,
    pub sequence: u32,
    pub timestamp: TimeVal,
}

impl KernelBuffer {
    pub fn length(&self, plane: usize) -> u32 {
        self.planes.get(plane).map_or(0, |p| p.length)
    }

    pub fn plane_mut(&mut self, plane: usize) -> &mut KernelPlane {
        if self.planes.len() <= plane {
            self.planes.resize(plane + 1, KernelPlane::default());
        }
        &mut self.planes[plane]
    }
}

/// Result of a control query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryControl {
    pub id: u32,
    pub flags: u32,
    pub minimum: i32,
    pub maximum: i32,
    pub default_value: i32,
}

/// A `v4l2_subdev_selection` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub pad: u32,
    pub which: u32,
    pub target: u32,
    pub flags: u32,
    pub rect: Rect,
}

/// Capability over one opened kernel video node.
///
/// Every method maps to one ioctl (or an mmap) on the node. Failures carry
/// the kernel's errno. Implementations are driven by exactly one
/// [`StreamNode`](crate::stream_node::StreamNode), which serializes calls.
pub trait VideoDeviceHandle: Send {
    fn buffer_type(&self) -> BufferType;

    fn set_format(&mut self, format: &V4l2Format) -> io::Result<()>;

    fn get_format(&mut self) -> io::Result<V4l2Format>;

    /// Requests `count` buffers of `memory` type and returns their
    /// descriptors, indexed from 0.
    fn setup_buffers(
        &mut self,
        count: u32,
        clear: bool,
        memory: MemoryType,
    ) -> io::Result<Vec<KernelBuffer>>;

    /// Maps every plane of buffer `index` and returns one address per plane.
    fn map_memory(&mut self, index: u32, prot: i32, flags: i32) -> io::Result<Vec<usize>>;

    fn unmap_memory(&mut self, addr: usize, length: u32) -> io::Result<()>;

    /// Exports every plane of buffer `index` as a DMA-BUF fd.
    fn export_frame(&mut self, index: u32) -> io::Result<Vec<OwnedFd>>;

    fn start(&mut self) -> io::Result<()>;

    fn stop(&mut self) -> io::Result<()>;

    fn put_frame(&mut self, buffer: &KernelBuffer) -> io::Result<()>;

    /// Dequeues the next completed buffer, blocking inside the driver.
    fn grab_frame(&mut self) -> io::Result<KernelBuffer>;

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()>;

    fn get_control(&mut self, id: u32) -> io::Result<i32>;

    fn query_control(&mut self, id: u32) -> io::Result<QueryControl>;
}

/// Capability over one opened sub-device, shared by the nodes it crops for.
pub trait SubDeviceHandle: Send + Sync {
    fn name(&self) -> &str;

    fn set_selection(&self, selection: &Selection) -> io::Result<()>;
}
