// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::type_complexity)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

include!("ffi.rs");

// Re-export libloading for error handling
pub use libloading;

use std::sync::{Mutex, OnceLock, PoisonError};

static LIBRARY: OnceLock<MtkCamV4l2Library> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Default soname searched when `MTKCAM_V4L2_LIBRARY` is not set.
pub const DEFAULT_LIBRARY: &str = "libmtkcam_v4l2.so";

/// Initialize the bindings by loading libmtkcam_v4l2.so
///
/// This must succeed before any hardware-backed media device, video node or
/// request can be used. Returns an error if the library or one of its symbols
/// cannot be loaded.
///
/// The environment variable `MTKCAM_V4L2_LIBRARY` can be used to specify a
/// custom path to the library. If not set, searches standard system paths.
pub fn init() -> Result<&'static MtkCamV4l2Library, libloading::Error> {
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    // Double-check after acquiring lock
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let lib_path =
        std::env::var("MTKCAM_V4L2_LIBRARY").unwrap_or_else(|_| DEFAULT_LIBRARY.to_string());

    let lib = unsafe { MtkCamV4l2Library::new(lib_path.as_str())? };

    Ok(LIBRARY.get_or_init(|| lib))
}

/// Try to get a reference to the loaded library without loading it
pub fn try_library() -> Option<&'static MtkCamV4l2Library> {
    LIBRARY.get()
}
