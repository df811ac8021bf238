// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Declarations for the libmtkcam_v4l2 C API (include/mtkcam_v4l2.h). Every
// function returns 0 or a positive value on success and a negative errno on
// failure unless noted otherwise.

pub const MTK_V4L2_MAX_PLANES: usize = 3;
pub const MTK_V4L2_ENTITY_NAME_LEN: usize = 64;

pub const MTK_V4L2_ENTITY_VIDEO: u32 = 1;
pub const MTK_V4L2_ENTITY_SUBDEV: u32 = 2;

pub const MTK_V4L2_MEMORY_MMAP: u32 = 1;
pub const MTK_V4L2_MEMORY_USERPTR: u32 = 2;
pub const MTK_V4L2_MEMORY_DMABUF: u32 = 4;

pub const MTK_V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const MTK_V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
pub const MTK_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;
pub const MTK_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE: u32 = 10;
pub const MTK_V4L2_BUF_TYPE_META_CAPTURE: u32 = 13;
pub const MTK_V4L2_BUF_TYPE_META_OUTPUT: u32 = 14;

pub type mtk_v4l2_node = ::std::os::raw::c_void;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct mtk_v4l2_entity {
    pub id: u32,
    pub kind: u32,
    pub name: [::std::os::raw::c_char; MTK_V4L2_ENTITY_NAME_LEN],
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct mtk_v4l2_link {
    pub source_pad: u32,
    pub sink_pad: u32,
    pub source: *const ::std::os::raw::c_char,
    pub sink: *const ::std::os::raw::c_char,
}

impl Default for mtk_v4l2_entity {
    fn default() -> Self {
        mtk_v4l2_entity {
            id: 0,
            kind: 0,
            name: [0; MTK_V4L2_ENTITY_NAME_LEN],
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct mtk_v4l2_plane_format {
    pub bytesperline: u32,
    pub sizeimage: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct mtk_v4l2_format {
    pub type_: u32,
    pub pixelformat: u32,
    pub width: u32,
    pub height: u32,
    pub num_planes: u32,
    pub plane_fmt: [mtk_v4l2_plane_format; MTK_V4L2_MAX_PLANES],
    pub colorspace: u32,
    pub quantization: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct mtk_v4l2_plane {
    pub fd: ::std::os::raw::c_int,
    pub userptr: ::std::os::raw::c_ulong,
    pub data_offset: u32,
    pub length: u32,
    pub bytesused: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct mtk_v4l2_buffer {
    pub index: u32,
    pub memory: u32,
    pub flags: u32,
    pub num_planes: u32,
    pub planes: [mtk_v4l2_plane; MTK_V4L2_MAX_PLANES],
    pub request_fd: ::std::os::raw::c_int,
    pub sequence: u32,
    pub timestamp_sec: i64,
    pub timestamp_usec: i64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct mtk_v4l2_selection {
    pub pad: u32,
    pub which: u32,
    pub target: u32,
    pub flags: u32,
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct mtk_v4l2_queryctrl {
    pub id: u32,
    pub flags: u32,
    pub minimum: i32,
    pub maximum: i32,
    pub default_value: i32,
}

pub struct MtkCamV4l2Library {
    __library: ::libloading::Library,
    pub mtk_v4l2_version: unsafe extern "C" fn() -> *const ::std::os::raw::c_char,
    pub mtk_v4l2_open_and_setup_all_links: unsafe extern "C" fn(
        tag: u32,
        enable_tuning: ::std::os::raw::c_int,
        entities: *mut mtk_v4l2_entity,
        max_entities: usize,
        num_entities: *mut usize,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_reset_all_links:
        unsafe extern "C" fn(device: ::std::os::raw::c_int) -> ::std::os::raw::c_int,
    pub mtk_v4l2_close_media_device:
        unsafe extern "C" fn(device: ::std::os::raw::c_int) -> ::std::os::raw::c_int,
    pub mtk_v4l2_enable_link: unsafe extern "C" fn(
        device: ::std::os::raw::c_int,
        link: *const mtk_v4l2_link,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_disable_link: unsafe extern "C" fn(
        device: ::std::os::raw::c_int,
        link: *const mtk_v4l2_link,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_allocate_request: unsafe extern "C" fn(
        device: ::std::os::raw::c_int,
        request_fd: *mut ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_queue_request: unsafe extern "C" fn(
        device: ::std::os::raw::c_int,
        request_fd: ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_reinit_request: unsafe extern "C" fn(
        device: ::std::os::raw::c_int,
        request_fd: ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_open_node: unsafe extern "C" fn(
        device: ::std::os::raw::c_int,
        entity_id: u32,
    ) -> *mut mtk_v4l2_node,
    pub mtk_v4l2_close_node: unsafe extern "C" fn(node: *mut mtk_v4l2_node),
    pub mtk_v4l2_node_buffer_type: unsafe extern "C" fn(node: *mut mtk_v4l2_node) -> u32,
    pub mtk_v4l2_node_set_format: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        format: *mut mtk_v4l2_format,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_get_format: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        format: *mut mtk_v4l2_format,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_setup_buffers: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        count: u32,
        clear: ::std::os::raw::c_int,
        memory: u32,
        buffers: *mut mtk_v4l2_buffer,
        max_buffers: usize,
        num_buffers: *mut usize,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_map_memory: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        index: u32,
        prot: ::std::os::raw::c_int,
        flags: ::std::os::raw::c_int,
        addrs: *mut *mut ::std::os::raw::c_void,
        max_addrs: usize,
        num_addrs: *mut usize,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_unmap_memory: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        addr: *mut ::std::os::raw::c_void,
        length: u32,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_export_frame: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        index: u32,
        fds: *mut ::std::os::raw::c_int,
        max_fds: usize,
        num_fds: *mut usize,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_start:
        unsafe extern "C" fn(node: *mut mtk_v4l2_node) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_stop:
        unsafe extern "C" fn(node: *mut mtk_v4l2_node) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_put_frame: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        buffer: *mut mtk_v4l2_buffer,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_grab_frame: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        buffer: *mut mtk_v4l2_buffer,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_set_control: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        id: u32,
        value: i32,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_get_control: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        id: u32,
        value: *mut i32,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_node_query_control: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        query: *mut mtk_v4l2_queryctrl,
    ) -> ::std::os::raw::c_int,
    pub mtk_v4l2_subdev_set_selection: unsafe extern "C" fn(
        node: *mut mtk_v4l2_node,
        selection: *const mtk_v4l2_selection,
    ) -> ::std::os::raw::c_int,
}

macro_rules! load_symbol {
    ($library:ident, $name:ident) => {
        *$library.get(concat!(stringify!($name), "\0").as_bytes())?
    };
}

impl MtkCamV4l2Library {
    /// Load the library at `path` and resolve every symbol.
    ///
    /// # Safety
    ///
    /// Running the library's initialisers is inherently unsafe; the caller
    /// must ensure `path` names a compatible libmtkcam_v4l2 build.
    pub unsafe fn new<P>(path: P) -> Result<Self, ::libloading::Error>
    where
        P: AsRef<::std::ffi::OsStr>,
    {
        let library = unsafe { ::libloading::Library::new(path)? };
        Self::from_library(library)
    }

    /// Resolve every symbol from an already opened library.
    ///
    /// # Safety
    ///
    /// The symbol signatures declared here must match the library's ABI.
    pub unsafe fn from_library<L>(library: L) -> Result<Self, ::libloading::Error>
    where
        L: Into<::libloading::Library>,
    {
        let __library = library.into();
        unsafe {
            Ok(MtkCamV4l2Library {
                mtk_v4l2_version: load_symbol!(__library, mtk_v4l2_version),
                mtk_v4l2_open_and_setup_all_links: load_symbol!(
                    __library,
                    mtk_v4l2_open_and_setup_all_links
                ),
                mtk_v4l2_reset_all_links: load_symbol!(__library, mtk_v4l2_reset_all_links),
                mtk_v4l2_close_media_device: load_symbol!(__library, mtk_v4l2_close_media_device),
                mtk_v4l2_enable_link: load_symbol!(__library, mtk_v4l2_enable_link),
                mtk_v4l2_disable_link: load_symbol!(__library, mtk_v4l2_disable_link),
                mtk_v4l2_allocate_request: load_symbol!(__library, mtk_v4l2_allocate_request),
                mtk_v4l2_queue_request: load_symbol!(__library, mtk_v4l2_queue_request),
                mtk_v4l2_reinit_request: load_symbol!(__library, mtk_v4l2_reinit_request),
                mtk_v4l2_open_node: load_symbol!(__library, mtk_v4l2_open_node),
                mtk_v4l2_close_node: load_symbol!(__library, mtk_v4l2_close_node),
                mtk_v4l2_node_buffer_type: load_symbol!(__library, mtk_v4l2_node_buffer_type),
                mtk_v4l2_node_set_format: load_symbol!(__library, mtk_v4l2_node_set_format),
                mtk_v4l2_node_get_format: load_symbol!(__library, mtk_v4l2_node_get_format),
                mtk_v4l2_node_setup_buffers: load_symbol!(__library, mtk_v4l2_node_setup_buffers),
                mtk_v4l2_node_map_memory: load_symbol!(__library, mtk_v4l2_node_map_memory),
                mtk_v4l2_node_unmap_memory: load_symbol!(__library, mtk_v4l2_node_unmap_memory),
                mtk_v4l2_node_export_frame: load_symbol!(__library, mtk_v4l2_node_export_frame),
                mtk_v4l2_node_start: load_symbol!(__library, mtk_v4l2_node_start),
                mtk_v4l2_node_stop: load_symbol!(__library, mtk_v4l2_node_stop),
                mtk_v4l2_node_put_frame: load_symbol!(__library, mtk_v4l2_node_put_frame),
                mtk_v4l2_node_grab_frame: load_symbol!(__library, mtk_v4l2_node_grab_frame),
                mtk_v4l2_node_set_control: load_symbol!(__library, mtk_v4l2_node_set_control),
                mtk_v4l2_node_get_control: load_symbol!(__library, mtk_v4l2_node_get_control),
                mtk_v4l2_node_query_control: load_symbol!(__library, mtk_v4l2_node_query_control),
                mtk_v4l2_subdev_set_selection: load_symbol!(
                    __library,
                    mtk_v4l2_subdev_set_selection
                ),
                __library,
            })
        }
    }
}
