// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use dma_buf::DmaBuf;

use crate::format::{BayerOrder, ColorProfile, ImageFormat, ImgParam};

/// Rectangle region for cropping.
///
/// Used as the crop target of a sub-device selection when a buffer is
/// enqueued on an MDP output node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// The left-most pixel offset for the rectangle
    pub x: i32,
    /// The top-most pixel offset for the rectangle
    pub y: i32,
    /// The width in pixels of the rectangle (end position is x+width)
    pub width: u32,
    /// The height in pixels of the rectangle (end position is y+height)
    pub height: u32,
}

impl Rect {
    /// Creates a new rectangle region.
    ///
    /// # Example
    ///
    /// ```
    /// use mtkcam_v4l2::image::Rect;
    ///
    /// let rect = Rect::new(0, 0, 640, 480);
    /// assert_eq!(rect.x, 0);
    /// assert_eq!(rect.width, 640);
    /// ```
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect({}, {}, {}x{})",
            self.x, self.y, self.width, self.height
        )
    }
}

impl From<(i32, i32, u32, u32)> for Rect {
    fn from((x, y, width, height): (i32, i32, u32, u32)) -> Self {
        Rect::new(x, y, width, height)
    }
}

impl From<Rect> for (i32, i32, u32, u32) {
    fn from(r: Rect) -> Self {
        (r.x, r.y, r.width, r.height)
    }
}

/// A reference-counted image buffer shared between the camera stack and a
/// stream node.
///
/// Stream nodes identify a buffer by its plane 0 fd (DMABUF), its plane 0
/// virtual address (USERPTR) or by `Arc` identity (MMAP pool buffers).
/// Plane accessors return -1 or 0 for planes the buffer does not have.
pub trait ImageBuffer: Send + Sync + fmt::Debug {
    fn format(&self) -> ImageFormat;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn plane_count(&self) -> usize;

    fn fd(&self, plane: usize) -> RawFd;

    /// Byte offset of the plane inside its dmabuf.
    fn offset(&self, plane: usize) -> u32;

    fn stride(&self, plane: usize) -> u32;

    /// Plane size in bytes, excluding the offset.
    fn length(&self, plane: usize) -> u32;

    /// Virtual address of the plane, 0 if it is not mapped.
    fn va(&self, plane: usize) -> usize;

    fn color_profile(&self) -> ColorProfile {
        ColorProfile::Unknown
    }

    fn bayer_order(&self) -> Option<BayerOrder> {
        None
    }

    /// Sum of all plane lengths.
    fn size(&self) -> u32 {
        (0..self.plane_count()).map(|i| self.length(i)).sum()
    }

    /// Image parameters describing this buffer, used to configure a node on
    /// first use.
    fn img_param(&self) -> ImgParam {
        let format = self.format();
        let param = if format == ImageFormat::Blob {
            ImgParam::blob(self.size())
        } else {
            let strides = (0..self.plane_count()).map(|i| self.stride(i)).collect();
            let mut param = ImgParam::new(format, self.width(), self.height())
                .with_strides(strides)
                .with_color_profile(self.color_profile());
            param.size = self.size();
            param
        };
        match self.bayer_order() {
            Some(order) => param.with_bayer_order(order),
            None => param,
        }
    }
}

/// Address identity of a shared buffer, stable for the `Arc`'s lifetime.
pub(crate) fn buffer_identity(buffer: &Arc<dyn ImageBuffer>) -> usize {
    Arc::as_ptr(buffer) as *const () as usize
}

struct DmaPlane {
    dmabuf: DmaBuf,
    offset: u32,
    stride: u32,
    length: u32,
    va: usize,
}

/// An image backed by one dmabuf per plane.
///
/// # Example
///
/// ```no_run
/// use std::fs::File;
/// use std::os::fd::OwnedFd;
/// use mtkcam_v4l2::format::ImageFormat;
/// use mtkcam_v4l2::image::DmaBufImage;
///
/// let fd: OwnedFd = File::open("/dev/dma_heap/system")?.into();
/// let image = DmaBufImage::new(ImageFormat::Yuy2, 640, 480).with_plane(fd, 0, 1280, 614400);
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct DmaBufImage {
    format: ImageFormat,
    width: u32,
    height: u32,
    planes: Vec<DmaPlane>,
    color_profile: ColorProfile,
    bayer_order: Option<BayerOrder>,
}

impl DmaBufImage {
    pub fn new(format: ImageFormat, width: u32, height: u32) -> Self {
        DmaBufImage {
            format,
            width,
            height,
            planes: Vec::new(),
            color_profile: ColorProfile::default(),
            bayer_order: None,
        }
    }

    /// Appends a plane, taking ownership of its dmabuf fd.
    pub fn with_plane(mut self, fd: OwnedFd, offset: u32, stride: u32, length: u32) -> Self {
        // SAFETY: the fd was just released from an OwnedFd, so it is open and
        // no one else owns it.
        let dmabuf = unsafe { DmaBuf::from_raw_fd(fd.into_raw_fd()) };
        self.planes.push(DmaPlane {
            dmabuf,
            offset,
            stride,
            length,
            va: 0,
        });
        self
    }

    /// Records the address the most recently added plane is mapped at.
    pub fn with_va(mut self, va: usize) -> Self {
        if let Some(plane) = self.planes.last_mut() {
            plane.va = va;
        }
        self
    }

    pub fn with_color_profile(mut self, profile: ColorProfile) -> Self {
        self.color_profile = profile;
        self
    }

    pub fn with_bayer_order(mut self, order: BayerOrder) -> Self {
        self.bayer_order = Some(order);
        self
    }

    pub fn dmabuf(&self, plane: usize) -> Option<&DmaBuf> {
        self.planes.get(plane).map(|p| &p.dmabuf)
    }
}

impl fmt::Debug for DmaBufImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fds: Vec<RawFd> = self.planes.iter().map(|p| p.dmabuf.as_raw_fd()).collect();
        f.debug_struct("DmaBufImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fds", &fds)
            .finish()
    }
}

impl ImageBuffer for DmaBufImage {
    fn format(&self) -> ImageFormat {
        self.format
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn plane_count(&self) -> usize {
        self.planes.len()
    }

    fn fd(&self, plane: usize) -> RawFd {
        self.planes.get(plane).map_or(-1, |p| p.dmabuf.as_raw_fd())
    }

    fn offset(&self, plane: usize) -> u32 {
        self.planes.get(plane).map_or(0, |p| p.offset)
    }

    fn stride(&self, plane: usize) -> u32 {
        self.planes.get(plane).map_or(0, |p| p.stride)
    }

    fn length(&self, plane: usize) -> u32 {
        self.planes.get(plane).map_or(0, |p| p.length)
    }

    fn va(&self, plane: usize) -> usize {
        self.planes.get(plane).map_or(0, |p| p.va)
    }

    fn color_profile(&self) -> ColorProfile {
        self.color_profile
    }

    fn bayer_order(&self) -> Option<BayerOrder> {
        self.bayer_order
    }
}

/// A heap-allocated image for USERPTR nodes.
///
/// Every plane is carved out of one contiguous allocation which lives as
/// long as the image.
pub struct HeapImage {
    format: ImageFormat,
    width: u32,
    height: u32,
    data: Box<[u8]>,
    strides: Vec<u32>,
    lengths: Vec<u32>,
}

impl HeapImage {
    pub fn new(format: ImageFormat, width: u32, height: u32) -> Self {
        let strides = format.strides(width);
        let lengths = format.plane_sizes(width, height);
        let total: u32 = lengths.iter().sum();
        HeapImage {
            format,
            width,
            height,
            data: vec![0u8; total as usize].into_boxed_slice(),
            strides,
            lengths,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn plane_start(&self, plane: usize) -> usize {
        self.lengths[..plane].iter().map(|&l| l as usize).sum()
    }
}

impl fmt::Debug for HeapImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("size", &self.data.len())
            .finish()
    }
}

impl ImageBuffer for HeapImage {
    fn format(&self) -> ImageFormat {
        self.format
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn plane_count(&self) -> usize {
        self.lengths.len()
    }

    fn fd(&self, _plane: usize) -> RawFd {
        -1
    }

    fn offset(&self, _plane: usize) -> u32 {
        0
    }

    fn stride(&self, plane: usize) -> u32 {
        self.strides.get(plane).copied().unwrap_or(0)
    }

    fn length(&self, plane: usize) -> u32 {
        self.lengths.get(plane).copied().unwrap_or(0)
    }

    fn va(&self, plane: usize) -> usize {
        if plane >= self.lengths.len() {
            return 0;
        }
        self.data.as_ptr() as usize + self.plane_start(plane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn null_fd() -> OwnedFd {
        File::open("/dev/null").unwrap().into()
    }

    #[test]
    fn test_rect_creation() {
        let rect = Rect::new(10, 20, 100, 200);
        assert_eq!(rect.x, 10);
        assert_eq!(rect.y, 20);
        assert_eq!(rect.width, 100);
        assert_eq!(rect.height, 200);
        assert_eq!(rect.to_string(), "Rect(10, 20, 100x200)");
    }

    #[test]
    fn test_rect_tuple_conversion() {
        let rect: Rect = (1, 2, 3, 4).into();
        assert_eq!(rect, Rect::new(1, 2, 3, 4));
        let tuple: (i32, i32, u32, u32) = rect.into();
        assert_eq!(tuple, (1, 2, 3, 4));
        assert_eq!(Rect::default(), Rect::new(0, 0, 0, 0));
    }

    #[test]
    fn test_dmabuf_image_planes() {
        let image = DmaBufImage::new(ImageFormat::Nv12, 64, 32)
            .with_plane(null_fd(), 0, 64, 2048)
            .with_plane(null_fd(), 0, 64, 1024)
            .with_va(0x1000)
            .with_color_profile(ColorProfile::Bt709Full);
        assert_eq!(image.plane_count(), 2);
        assert!(image.fd(0) >= 0);
        assert_ne!(image.fd(0), image.fd(1));
        assert_eq!(image.fd(2), -1);
        assert_eq!(image.va(0), 0);
        assert_eq!(image.va(1), 0x1000);
        assert_eq!(image.size(), 3072);
        assert!(image.dmabuf(1).is_some());

        let param = image.img_param();
        assert_eq!(param.format, ImageFormat::Nv12);
        assert_eq!(param.strides, vec![64, 64]);
        assert_eq!(param.size, 3072);
        assert_eq!(param.color_profile, ColorProfile::Bt709Full);
    }

    #[test]
    fn test_blob_param() {
        let image = DmaBufImage::new(ImageFormat::Blob, 0, 0).with_plane(null_fd(), 0, 0, 4096);
        let param = image.img_param();
        assert_eq!(param.format, ImageFormat::Blob);
        assert_eq!(param.size, 4096);
    }

    #[test]
    fn test_heap_image_layout() {
        let image = HeapImage::new(ImageFormat::Yv12, 16, 8);
        assert_eq!(image.plane_count(), 3);
        assert_eq!(image.length(0), 128);
        assert_eq!(image.length(1), 32);
        assert_eq!(image.va(1), image.va(0) + 128);
        assert_eq!(image.va(2), image.va(1) + 32);
        assert_eq!(image.data().len(), 192);
        assert_eq!(image.fd(0), -1);
    }

    #[test]
    fn test_identity_is_stable() {
        let a: Arc<dyn ImageBuffer> = Arc::new(HeapImage::new(ImageFormat::Yuy2, 4, 4));
        let b = Arc::clone(&a);
        let c: Arc<dyn ImageBuffer> = Arc::new(HeapImage::new(ImageFormat::Yuy2, 4, 4));
        assert_eq!(buffer_identity(&a), buffer_identity(&b));
        assert_ne!(buffer_identity(&a), buffer_identity(&c));
    }
}
