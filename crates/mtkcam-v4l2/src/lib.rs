// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! MTK Camera V4L2 Pipeline Layer for Rust
//!
//! Drives a MediaTek ISP capture pipeline built from several V4L2 video
//! nodes and sub-devices linked through a Linux media-controller graph. Each
//! node queues and dequeues buffers independently while the kernel media
//! Request API commits every node's buffers for one frame atomically under a
//! single request file descriptor.
//!
//! The crate is organised around three components:
//!
//! - [`stream_node::StreamNode`] owns one video node's buffer pool and state
//!   machine, and binds external [`image::ImageBuffer`]s to kernel slots.
//! - [`sync_req::RequestSyncManager`] owns the pool of kernel request
//!   descriptors shared by the cooperating nodes and queues a request only
//!   once every participating caller has enqueued its buffer.
//! - [`pipe_mgr::PipelineManager`] builds the media graph for a pipeline tag,
//!   wraps every video entity in a stream node and owns the request manager.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mtkcam_v4l2::backend::MtkMediaController;
//! use mtkcam_v4l2::pipe_mgr::{PipeTag, PipelineConfig, PipelineManager};
//!
//! let backend = Arc::new(MtkMediaController::new()?);
//! let mut pipe = PipelineManager::new(0, backend, PipelineConfig::default());
//! pipe.build_links(PipeTag::Out2Tuning)?;
//! for node in pipe.stream_nodes() {
//!     println!("{} ({})", node.name(), node.state());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Simulation
//!
//! The [`sim`] module implements every capability in software so complete
//! request cycles can be exercised without MediaTek hardware.

use std::{error, ffi::NulError, fmt, io, num::TryFromIntError};

use mtkcam_v4l2_sys as ffi;

use crate::format::{ColorProfile, ImageFormat};
use crate::pipe_mgr::PipeTag;
use crate::stream_node::NodeState;
use crate::sync_req::SyncId;

const EIO: i32 = 5;
const ENXIO: i32 = 6;
const EFAULT: i32 = 14;
const EBUSY: i32 = 16;
const EEXIST: i32 = 17;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ENOTEMPTY: i32 = 39;

/// Error type for pipeline operations
#[derive(Debug)]
pub enum Error {
    /// The vendor library (libmtkcam_v4l2.so) could not be loaded at runtime
    LibraryNotLoaded(ffi::libloading::Error),

    /// I/O error from an underlying kernel or library call
    Io(io::Error),

    /// CString creation error (null byte found in an entity name)
    CString(NulError),

    /// Integer conversion error (try_from failed)
    TryFromInt(TryFromIntError),

    /// Null pointer returned from the vendor library where a handle was expected
    NullPointer,

    /// Operation requested from a stream node state that forbids it
    InvalidState {
        op: &'static str,
        state: NodeState,
    },

    /// No pixel code exists for the requested image format and bayer order
    UnsupportedFormat(ImageFormat),

    /// No colorspace/quantization pair exists for the requested profile
    UnsupportedColorProfile(ColorProfile),

    /// The rotation/flip combination has no ROTATE control equivalent
    UnsupportedTransform(u32),

    /// Kernel buffer allocation, mapping or export failed
    BufferSetupFailed(String),

    /// Every kernel slot is in use, nothing can be rebound
    NoBufferAvailable,

    /// The buffer is not part of the node's fixed MMAP pool
    BufferNotFound,

    /// The buffer is already queued in the given slot
    BufferInUse(u32),

    /// The kernel rejected the enqueue
    EnqueueFailed(io::Error),

    /// No live request record matches the given fd or magic number
    RecordNotFound,

    /// A request record operation was called without a caller role
    InvalidCaller(SyncId),

    /// The pipeline tag has no topology entry
    UnknownPipeline(PipeTag),

    /// A pipeline already exists for the sensor with a different tag
    PipelineMismatch { current: PipeTag, requested: PipeTag },

    /// Sensor index outside the supported range
    InvalidSensor(u32),

    /// The pipeline has not built its links yet
    NotBuilt,

    /// The pipeline links were already built
    AlreadyBuilt,

    /// A query destination must be empty
    DestinationNotEmpty,

    /// The media-controller graph could not be built
    MediaGraph(String),
}

impl Error {
    /// Negative errno-style status for this error, as reported at the kernel
    /// boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Io(err) | Error::EnqueueFailed(err) => -err.raw_os_error().unwrap_or(EIO),
            Error::LibraryNotLoaded(_) | Error::NullPointer => -ENODEV,
            Error::InvalidState { .. }
            | Error::UnsupportedFormat(_)
            | Error::UnsupportedColorProfile(_)
            | Error::UnsupportedTransform(_)
            | Error::CString(_)
            | Error::TryFromInt(_)
            | Error::UnknownPipeline(_)
            | Error::InvalidSensor(_)
            | Error::InvalidCaller(_)
            | Error::NotBuilt
            | Error::DestinationNotEmpty
            | Error::BufferSetupFailed(_)
            | Error::MediaGraph(_) => -EINVAL,
            Error::NoBufferAvailable => -ENOTEMPTY,
            Error::BufferNotFound => -EFAULT,
            Error::BufferInUse(_) => -EBUSY,
            Error::RecordNotFound => -ENXIO,
            Error::PipelineMismatch { .. } | Error::AlreadyBuilt => -EEXIST,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::LibraryNotLoaded(err) => {
                write!(f, "MTK camera V4L2 library could not be loaded: {}", err)
            }
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::CString(err) => write!(f, "CString creation error: {}", err),
            Error::TryFromInt(err) => write!(f, "Integer conversion error: {}", err),
            Error::NullPointer => write!(f, "Null pointer returned from MTK camera V4L2 library"),
            Error::InvalidState { op, state } => {
                write!(f, "{} is not allowed in state {}", op, state)
            }
            Error::UnsupportedFormat(fmt) => write!(f, "Unsupported image format {:?}", fmt),
            Error::UnsupportedColorProfile(profile) => {
                write!(f, "Unsupported color profile {:?}", profile)
            }
            Error::UnsupportedTransform(transform) => {
                write!(f, "Unsupported transform {:#x}", transform)
            }
            Error::BufferSetupFailed(msg) => write!(f, "Buffer setup failed: {}", msg),
            Error::NoBufferAvailable => write!(f, "No kernel buffer available for replacement"),
            Error::BufferNotFound => write!(f, "Buffer is not part of the MMAP pool"),
            Error::BufferInUse(index) => write!(f, "Buffer is already queued in slot {}", index),
            Error::EnqueueFailed(err) => write!(f, "Enqueue failed: {}", err),
            Error::RecordNotFound => write!(f, "No request record found"),
            Error::InvalidCaller(caller) => write!(f, "Invalid request caller {}", caller),
            Error::UnknownPipeline(tag) => write!(f, "Unknown pipeline tag {}", tag),
            Error::PipelineMismatch { current, requested } => write!(
                f,
                "Pipeline already built with tag {}, cannot rebuild with {}",
                current, requested
            ),
            Error::InvalidSensor(idx) => write!(f, "Invalid sensor index {}", idx),
            Error::NotBuilt => write!(f, "Pipeline links have not been built"),
            Error::AlreadyBuilt => write!(f, "Pipeline links have already been built"),
            Error::DestinationNotEmpty => write!(f, "Query destination is not empty"),
            Error::MediaGraph(msg) => write!(f, "Media graph error: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::LibraryNotLoaded(err) => Some(err),
            Error::Io(err) | Error::EnqueueFailed(err) => Some(err),
            Error::CString(err) => Some(err),
            Error::TryFromInt(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ffi::libloading::Error> for Error {
    fn from(err: ffi::libloading::Error) -> Self {
        Error::LibraryNotLoaded(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<NulError> for Error {
    fn from(err: NulError) -> Self {
        Error::CString(err)
    }
}

impl From<TryFromIntError> for Error {
    fn from(err: TryFromIntError) -> Self {
        Error::TryFromInt(err)
    }
}

/// Calls a libmtkcam_v4l2 function, loading the library on first use, and
/// converts a negative return into an `io::Error`.
macro_rules! mtk_v4l2 {
    ($fn_name:ident($($args:expr),*)) => {{
        let lib = mtkcam_v4l2_sys::init()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::NotFound, err))?;
        #[allow(clippy::macro_metavars_in_unsafe)]
        let ret = unsafe { (lib.$fn_name)($($args),*) };
        if ret < 0 {
            Err(std::io::Error::from_raw_os_error(-ret))
        } else {
            Ok(ret)
        }
    }};
}

/// Image formats, color profiles and their V4L2 equivalents
pub mod format;

/// FourCC pixel codes
pub mod fourcc;

/// Kernel-facing capability traits and descriptors
pub mod v4l2;

/// External image buffers and crop rectangles
pub mod image;

/// Per-video-node buffer pool and state machine
pub mod stream_node;

/// Media request descriptor pool shared by cooperating nodes
pub mod sync_req;

/// Static media-controller topologies
pub mod topology;

/// Pipeline construction and per-sensor registry
pub mod pipe_mgr;

/// Hardware backend over libmtkcam_v4l2
pub mod backend;

/// Software backend for tests and dry runs
pub mod sim;

/// Returns the vendor library version string.
pub fn version() -> Result<String, Error> {
    let lib = ffi::init()?;
    let ptr = unsafe { (lib.mtk_v4l2_version)() };
    if ptr.is_null() {
        return Err(Error::NullPointer);
    }
    let cstr = unsafe { std::ffi::CStr::from_ptr(ptr) };
    Ok(cstr.to_string_lossy().into_owned())
}
