// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::{
    ffi::{c_int, c_void, CStr, CString},
    fmt, io,
    os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
    ptr,
    sync::Arc,
};

use log::{debug, warn};
use mtkcam_v4l2_sys as ffi;

use crate::fourcc::FourCC;
use crate::topology::MediaDeviceTag;
use crate::v4l2::{
    BufferType, EntityKind, KernelBuffer, KernelPlane, MediaEntity, MediaGraphController,
    MediaLink, MemoryType, PlaneFormat, QueryControl, RequestAllocator, Selection,
    SubDeviceHandle, TimeVal, V4l2Format, VideoDeviceHandle,
};
use crate::Error;

const MAX_ENTITIES: usize = 64;
const MAX_BUFFERS: usize = 32;
const ENODEV: i32 = 19;

fn library() -> io::Result<&'static ffi::MtkCamV4l2Library> {
    ffi::init().map_err(|err| io::Error::new(io::ErrorKind::NotFound, err))
}

fn buffer_type_from_raw(raw: u32) -> BufferType {
    match raw {
        ffi::MTK_V4L2_BUF_TYPE_VIDEO_CAPTURE => BufferType::VideoCapture,
        ffi::MTK_V4L2_BUF_TYPE_VIDEO_OUTPUT => BufferType::VideoOutput,
        ffi::MTK_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE => BufferType::VideoOutputMplane,
        ffi::MTK_V4L2_BUF_TYPE_META_CAPTURE => BufferType::MetaCapture,
        ffi::MTK_V4L2_BUF_TYPE_META_OUTPUT => BufferType::MetaOutput,
        _ => BufferType::VideoCaptureMplane,
    }
}

fn buffer_type_to_raw(kind: BufferType) -> u32 {
    match kind {
        BufferType::VideoCapture => ffi::MTK_V4L2_BUF_TYPE_VIDEO_CAPTURE,
        BufferType::VideoOutput => ffi::MTK_V4L2_BUF_TYPE_VIDEO_OUTPUT,
        BufferType::VideoCaptureMplane => ffi::MTK_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
        BufferType::VideoOutputMplane => ffi::MTK_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
        BufferType::MetaCapture => ffi::MTK_V4L2_BUF_TYPE_META_CAPTURE,
        BufferType::MetaOutput => ffi::MTK_V4L2_BUF_TYPE_META_OUTPUT,
    }
}

fn format_to_ffi(format: &V4l2Format, kind: BufferType) -> ffi::mtk_v4l2_format {
    let mut raw = ffi::mtk_v4l2_format {
        type_: buffer_type_to_raw(kind),
        pixelformat: format.pixel_format.as_u32(),
        width: format.width,
        height: format.height,
        num_planes: format.planes.len().min(ffi::MTK_V4L2_MAX_PLANES) as u32,
        colorspace: format.colorspace,
        quantization: format.quantization,
        ..Default::default()
    };
    for (dst, src) in raw.plane_fmt.iter_mut().zip(&format.planes) {
        dst.bytesperline = src.bytes_per_line;
        dst.sizeimage = src.size_image;
    }
    raw
}

fn format_from_ffi(raw: &ffi::mtk_v4l2_format) -> V4l2Format {
    let planes = (raw.num_planes as usize).min(ffi::MTK_V4L2_MAX_PLANES);
    V4l2Format {
        pixel_format: FourCC::from_u32(raw.pixelformat),
        width: raw.width,
        height: raw.height,
        planes: raw.plane_fmt[..planes]
            .iter()
            .map(|p| PlaneFormat {
                bytes_per_line: p.bytesperline,
                size_image: p.sizeimage,
            })
            .collect(),
        colorspace: raw.colorspace,
        quantization: raw.quantization,
    }
}

fn buffer_to_ffi(buffer: &KernelBuffer) -> ffi::mtk_v4l2_buffer {
    let mut raw = ffi::mtk_v4l2_buffer {
        index: buffer.index,
        memory: buffer.memory as u32,
        num_planes: buffer.planes.len().min(ffi::MTK_V4L2_MAX_PLANES) as u32,
        request_fd: buffer.request_fd.unwrap_or(-1),
        ..Default::default()
    };
    for (dst, src) in raw.planes.iter_mut().zip(&buffer.planes) {
        dst.fd = src.fd;
        dst.userptr = src.userptr as _;
        dst.data_offset = src.data_offset;
        dst.length = src.length;
        dst.bytesused = src.bytes_used;
    }
    raw
}

fn buffer_from_ffi(raw: &ffi::mtk_v4l2_buffer) -> KernelBuffer {
    let planes = (raw.num_planes as usize).min(ffi::MTK_V4L2_MAX_PLANES);
    KernelBuffer {
        index: raw.index,
        memory: MemoryType::from_raw(raw.memory).unwrap_or_default(),
        planes: raw.planes[..planes]
            .iter()
            .map(|p| KernelPlane {
                fd: p.fd,
                userptr: p.userptr as usize,
                data_offset: p.data_offset,
                length: p.length,
                bytes_used: p.bytesused,
            })
            .collect(),
        request_fd: (raw.request_fd > 0).then_some(raw.request_fd),
        sequence: raw.sequence,
        timestamp: TimeVal {
            sec: raw.timestamp_sec,
            usec: raw.timestamp_usec,
        },
    }
}

/// Media controller backed by `libmtkcam_v4l2`.
///
/// Every kernel object is reached through the vendor library, which is
/// loaded on construction.
pub struct MtkMediaController {
    _private: (),
}

impl fmt::Debug for MtkMediaController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MtkMediaController").finish()
    }
}

impl MtkMediaController {
    pub fn new() -> Result<Self, Error> {
        ffi::init()?;
        Ok(MtkMediaController { _private: () })
    }

    fn link(link: &MediaLink<'_>) -> io::Result<(CString, CString)> {
        let source =
            CString::new(link.source).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let sink =
            CString::new(link.sink).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok((source, sink))
    }

    fn open_node(device: i32, entity: &MediaEntity) -> io::Result<*mut ffi::mtk_v4l2_node> {
        let lib = library()?;
        let node = unsafe { (lib.mtk_v4l2_open_node)(device, entity.id) };
        if node.is_null() {
            return Err(io::Error::last_os_error());
        }
        debug!("opened {}", entity);
        Ok(node)
    }
}

impl MediaGraphController for MtkMediaController {
    fn open_and_setup_all_links(
        &self,
        tag: MediaDeviceTag,
        enable_tuning: bool,
    ) -> io::Result<(i32, Vec<MediaEntity>)> {
        let mut raw = vec![ffi::mtk_v4l2_entity::default(); MAX_ENTITIES];
        let mut count = 0usize;
        let device = mtk_v4l2!(mtk_v4l2_open_and_setup_all_links(
            tag.as_u32(),
            c_int::from(enable_tuning),
            raw.as_mut_ptr(),
            raw.len(),
            &mut count
        ))?;
        let entities = raw[..count.min(MAX_ENTITIES)]
            .iter()
            .map(|e| {
                let name = unsafe { CStr::from_ptr(e.name.as_ptr()) };
                let kind = if e.kind == ffi::MTK_V4L2_ENTITY_VIDEO {
                    EntityKind::Video
                } else {
                    EntityKind::SubDevice
                };
                MediaEntity::new(e.id, name.to_string_lossy(), kind)
            })
            .collect();
        Ok((device, entities))
    }

    fn open_video_node(
        &self,
        device: i32,
        entity: &MediaEntity,
    ) -> io::Result<Box<dyn VideoDeviceHandle>> {
        let ptr = Self::open_node(device, entity)?;
        Ok(Box::new(MtkVideoNode {
            ptr,
            name: entity.name.clone(),
        }))
    }

    fn open_subdevice(
        &self,
        device: i32,
        entity: &MediaEntity,
    ) -> io::Result<Arc<dyn SubDeviceHandle>> {
        let ptr = Self::open_node(device, entity)?;
        Ok(Arc::new(MtkSubDevice {
            ptr,
            name: entity.name.clone(),
        }))
    }

    fn reset_all_links(&self, device: i32) -> io::Result<()> {
        mtk_v4l2!(mtk_v4l2_reset_all_links(device))?;
        Ok(())
    }

    fn close_media_device(&self, device: i32) -> io::Result<()> {
        mtk_v4l2!(mtk_v4l2_close_media_device(device))?;
        Ok(())
    }

    fn enable_link(&self, device: i32, link: &MediaLink<'_>) -> io::Result<()> {
        let (source, sink) = Self::link(link)?;
        let raw = ffi::mtk_v4l2_link {
            source_pad: link.source_pad,
            sink_pad: link.sink_pad,
            source: source.as_ptr(),
            sink: sink.as_ptr(),
        };
        mtk_v4l2!(mtk_v4l2_enable_link(device, &raw))?;
        Ok(())
    }

    fn disable_link(&self, device: i32, link: &MediaLink<'_>) -> io::Result<()> {
        let (source, sink) = Self::link(link)?;
        let raw = ffi::mtk_v4l2_link {
            source_pad: link.source_pad,
            sink_pad: link.sink_pad,
            source: source.as_ptr(),
            sink: sink.as_ptr(),
        };
        mtk_v4l2!(mtk_v4l2_disable_link(device, &raw))?;
        Ok(())
    }
}

impl RequestAllocator for MtkMediaController {
    fn allocate_request(&self, device: i32) -> io::Result<OwnedFd> {
        let mut fd: c_int = -1;
        mtk_v4l2!(mtk_v4l2_allocate_request(device, &mut fd))?;
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(ENODEV));
        }
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn reinit_request(&self, device: i32, fd: BorrowedFd<'_>) -> io::Result<()> {
        mtk_v4l2!(mtk_v4l2_reinit_request(device, fd.as_raw_fd()))?;
        Ok(())
    }

    fn queue_request(&self, device: i32, fd: BorrowedFd<'_>) -> io::Result<()> {
        mtk_v4l2!(mtk_v4l2_queue_request(device, fd.as_raw_fd()))?;
        Ok(())
    }
}

/// A video node opened through `libmtkcam_v4l2`.
pub struct MtkVideoNode {
    ptr: *mut ffi::mtk_v4l2_node,
    name: String,
}

// The library serialises access per node; the handle is only moved between
// threads, never shared.
unsafe impl Send for MtkVideoNode {}

impl fmt::Debug for MtkVideoNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MtkVideoNode({})", self.name)
    }
}

impl VideoDeviceHandle for MtkVideoNode {
    fn buffer_type(&self) -> BufferType {
        match ffi::try_library() {
            Some(lib) => buffer_type_from_raw(unsafe { (lib.mtk_v4l2_node_buffer_type)(self.ptr) }),
            None => BufferType::VideoCaptureMplane,
        }
    }

    fn set_format(&mut self, format: &V4l2Format) -> io::Result<()> {
        let mut raw = format_to_ffi(format, self.buffer_type());
        mtk_v4l2!(mtk_v4l2_node_set_format(self.ptr, &mut raw))?;
        Ok(())
    }

    fn get_format(&mut self) -> io::Result<V4l2Format> {
        let mut raw = ffi::mtk_v4l2_format {
            type_: buffer_type_to_raw(self.buffer_type()),
            ..Default::default()
        };
        mtk_v4l2!(mtk_v4l2_node_get_format(self.ptr, &mut raw))?;
        Ok(format_from_ffi(&raw))
    }

    fn setup_buffers(
        &mut self,
        count: u32,
        clear: bool,
        memory: MemoryType,
    ) -> io::Result<Vec<KernelBuffer>> {
        let mut raw = vec![ffi::mtk_v4l2_buffer::default(); MAX_BUFFERS];
        let mut num = 0usize;
        mtk_v4l2!(mtk_v4l2_node_setup_buffers(
            self.ptr,
            count,
            c_int::from(clear),
            memory as u32,
            raw.as_mut_ptr(),
            raw.len(),
            &mut num
        ))?;
        Ok(raw[..num.min(MAX_BUFFERS)]
            .iter()
            .map(buffer_from_ffi)
            .collect())
    }

    fn map_memory(&mut self, index: u32, prot: i32, flags: i32) -> io::Result<Vec<usize>> {
        let mut addrs = [ptr::null_mut::<c_void>(); ffi::MTK_V4L2_MAX_PLANES];
        let mut num = 0usize;
        mtk_v4l2!(mtk_v4l2_node_map_memory(
            self.ptr,
            index,
            prot,
            flags,
            addrs.as_mut_ptr(),
            addrs.len(),
            &mut num
        ))?;
        Ok(addrs[..num.min(addrs.len())]
            .iter()
            .map(|&addr| addr as usize)
            .collect())
    }

    fn unmap_memory(&mut self, addr: usize, length: u32) -> io::Result<()> {
        mtk_v4l2!(mtk_v4l2_node_unmap_memory(
            self.ptr,
            addr as *mut c_void,
            length
        ))?;
        Ok(())
    }

    fn export_frame(&mut self, index: u32) -> io::Result<Vec<OwnedFd>> {
        let mut fds: [c_int; ffi::MTK_V4L2_MAX_PLANES] = [-1; ffi::MTK_V4L2_MAX_PLANES];
        let mut num = 0usize;
        mtk_v4l2!(mtk_v4l2_node_export_frame(
            self.ptr,
            index,
            fds.as_mut_ptr(),
            fds.len(),
            &mut num
        ))?;
        Ok(fds[..num.min(fds.len())]
            .iter()
            .filter(|&&fd| fd >= 0)
            .map(|&fd| unsafe { OwnedFd::from_raw_fd(fd) })
            .collect())
    }

    fn start(&mut self) -> io::Result<()> {
        mtk_v4l2!(mtk_v4l2_node_start(self.ptr))?;
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        mtk_v4l2!(mtk_v4l2_node_stop(self.ptr))?;
        Ok(())
    }

    fn put_frame(&mut self, buffer: &KernelBuffer) -> io::Result<()> {
        let mut raw = buffer_to_ffi(buffer);
        mtk_v4l2!(mtk_v4l2_node_put_frame(self.ptr, &mut raw))?;
        Ok(())
    }

    fn grab_frame(&mut self) -> io::Result<KernelBuffer> {
        let mut raw = ffi::mtk_v4l2_buffer::default();
        mtk_v4l2!(mtk_v4l2_node_grab_frame(self.ptr, &mut raw))?;
        Ok(buffer_from_ffi(&raw))
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        mtk_v4l2!(mtk_v4l2_node_set_control(self.ptr, id, value))?;
        Ok(())
    }

    fn get_control(&mut self, id: u32) -> io::Result<i32> {
        let mut value = 0i32;
        mtk_v4l2!(mtk_v4l2_node_get_control(self.ptr, id, &mut value))?;
        Ok(value)
    }

    fn query_control(&mut self, id: u32) -> io::Result<QueryControl> {
        let mut raw = ffi::mtk_v4l2_queryctrl {
            id,
            ..Default::default()
        };
        mtk_v4l2!(mtk_v4l2_node_query_control(self.ptr, &mut raw))?;
        Ok(QueryControl {
            id: raw.id,
            flags: raw.flags,
            minimum: raw.minimum,
            maximum: raw.maximum,
            default_value: raw.default_value,
        })
    }
}

impl Drop for MtkVideoNode {
    fn drop(&mut self) {
        if let Some(lib) = ffi::try_library() {
            unsafe { (lib.mtk_v4l2_close_node)(self.ptr) };
        }
    }
}

/// A sub-device opened through `libmtkcam_v4l2`.
pub struct MtkSubDevice {
    ptr: *mut ffi::mtk_v4l2_node,
    name: String,
}

// Selection is a single ioctl on the sub-device fd.
unsafe impl Send for MtkSubDevice {}
unsafe impl Sync for MtkSubDevice {}

impl fmt::Debug for MtkSubDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MtkSubDevice({})", self.name)
    }
}

impl SubDeviceHandle for MtkSubDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_selection(&self, selection: &Selection) -> io::Result<()> {
        let raw = ffi::mtk_v4l2_selection {
            pad: selection.pad,
            which: selection.which,
            target: selection.target,
            flags: selection.flags,
            left: selection.rect.x,
            top: selection.rect.y,
            width: selection.rect.width,
            height: selection.rect.height,
        };
        if let Err(err) = mtk_v4l2!(mtk_v4l2_subdev_set_selection(self.ptr, &raw)) {
            warn!("{}: selection on pad {} rejected: {}", self.name, selection.pad, err);
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for MtkSubDevice {
    fn drop(&mut self) {
        if let Some(lib) = ffi::try_library() {
            unsafe { (lib.mtk_v4l2_close_node)(self.ptr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_conversion() {
        let format = V4l2Format {
            pixel_format: FourCC::new(b"NM12"),
            width: 64,
            height: 32,
            planes: vec![
                PlaneFormat {
                    bytes_per_line: 64,
                    size_image: 2048,
                },
                PlaneFormat {
                    bytes_per_line: 64,
                    size_image: 1024,
                },
            ],
            colorspace: 3,
            quantization: 2,
        };
        let raw = format_to_ffi(&format, BufferType::VideoCaptureMplane);
        assert_eq!(raw.type_, ffi::MTK_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE);
        assert_eq!(raw.num_planes, 2);
        assert_eq!(format_from_ffi(&raw), format);
    }

    #[test]
    fn test_buffer_conversion() {
        let buffer = KernelBuffer {
            index: 2,
            memory: MemoryType::DmaBuf,
            planes: vec![KernelPlane {
                fd: 9,
                length: 4096,
                bytes_used: 4096,
                ..Default::default()
            }],
            request_fd: Some(12),
            ..Default::default()
        };
        let raw = buffer_to_ffi(&buffer);
        assert_eq!(raw.memory, ffi::MTK_V4L2_MEMORY_DMABUF);
        assert_eq!(raw.request_fd, 12);
        assert_eq!(buffer_from_ffi(&raw), buffer);

        let raw = buffer_to_ffi(&KernelBuffer::default());
        assert_eq!(raw.request_fd, -1);
        assert_eq!(buffer_from_ffi(&raw).request_fd, None);
    }

    #[test]
    fn test_buffer_type_mapping() {
        for kind in [
            BufferType::VideoCapture,
            BufferType::VideoOutput,
            BufferType::VideoCaptureMplane,
            BufferType::VideoOutputMplane,
            BufferType::MetaCapture,
            BufferType::MetaOutput,
        ] {
            assert_eq!(buffer_type_from_raw(buffer_type_to_raw(kind)), kind);
        }
    }

    #[test]
    fn test_controller_requires_library() {
        match MtkMediaController::new() {
            Ok(media) => println!("vendor library loaded: {:?}", media),
            Err(e) => assert!(matches!(e, Error::LibraryNotLoaded(_))),
        }
    }
}
