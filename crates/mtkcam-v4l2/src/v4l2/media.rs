// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::Arc;

use super::device::{SubDeviceHandle, VideoDeviceHandle};
use crate::topology::MediaDeviceTag;

/// Kind of entity found in a media-controller graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A V4L2 video node (`/dev/videoN`) that queues buffers.
    Video,
    /// A V4L2 sub-device (`/dev/v4l-subdevN`) such as the ISP hub or a
    /// crop/scale block.
    SubDevice,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Video => write!(f, "video"),
            EntityKind::SubDevice => write!(f, "subdev"),
        }
    }
}

/// An entity discovered while building a media graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntity {
    pub id: u32,
    pub name: String,
    pub kind: EntityKind,
}

impl MediaEntity {
    pub fn new(id: u32, name: impl Into<String>, kind: EntityKind) -> Self {
        MediaEntity {
            id,
            name: name.into(),
            kind,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == EntityKind::Video
    }
}

impl fmt::Display for MediaEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.id, self.name, self.kind)
    }
}

/// A link between two entity pads, addressed by entity name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaLink<'a> {
    pub source: &'a str,
    pub source_pad: u32,
    pub sink: &'a str,
    pub sink_pad: u32,
}

impl<'a> MediaLink<'a> {
    pub const fn new(source: &'a str, source_pad: u32, sink: &'a str, sink_pad: u32) -> Self {
        MediaLink {
            source,
            source_pad,
            sink,
            sink_pad,
        }
    }
}

impl fmt::Display for MediaLink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\":{} -> \"{}\":{}",
            self.source, self.source_pad, self.sink, self.sink_pad
        )
    }
}

/// Capability over a media controller device.
///
/// A device index returned by [`open_and_setup_all_links`] addresses every
/// later call until [`close_media_device`] releases it.
///
/// [`open_and_setup_all_links`]: MediaGraphController::open_and_setup_all_links
/// [`close_media_device`]: MediaGraphController::close_media_device
pub trait MediaGraphController: Send + Sync {
    /// Opens the media device for `tag`, enables every link of its topology
    /// and returns the device index with the entities now reachable.
    fn open_and_setup_all_links(
        &self,
        tag: MediaDeviceTag,
        enable_tuning: bool,
    ) -> io::Result<(i32, Vec<MediaEntity>)>;

    fn open_video_node(
        &self,
        device: i32,
        entity: &MediaEntity,
    ) -> io::Result<Box<dyn VideoDeviceHandle>>;

    fn open_subdevice(
        &self,
        device: i32,
        entity: &MediaEntity,
    ) -> io::Result<Arc<dyn SubDeviceHandle>>;

    fn reset_all_links(&self, device: i32) -> io::Result<()>;

    fn close_media_device(&self, device: i32) -> io::Result<()>;

    fn enable_link(&self, device: i32, link: &MediaLink<'_>) -> io::Result<()>;

    fn disable_link(&self, device: i32, link: &MediaLink<'_>) -> io::Result<()>;
}

/// Capability over kernel media requests (`MEDIA_IOC_REQUEST_ALLOC` and the
/// request fd ioctls).
pub trait RequestAllocator: Send + Sync {
    fn allocate_request(&self, device: i32) -> io::Result<OwnedFd>;

    /// Returns a completed request to the idle state so it can be reused.
    fn reinit_request(&self, device: i32, fd: BorrowedFd<'_>) -> io::Result<()>;

    /// Commits every buffer bound to the request.
    fn queue_request(&self, device: i32, fd: BorrowedFd<'_>) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_display() {
        let entity = MediaEntity::new(7, "mtk-cam-p1 main stream", EntityKind::Video);
        assert!(entity.is_video());
        assert_eq!(entity.to_string(), "[7] mtk-cam-p1 main stream (video)");
    }

    #[test]
    fn test_link_display() {
        let link = MediaLink::new("mtk-cam-p1", 1, "mtk-cam-p1 main stream", 0);
        assert_eq!(
            link.to_string(),
            "\"mtk-cam-p1\":1 -> \"mtk-cam-p1 main stream\":0"
        );
    }
}
