// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Software backend implementing every kernel capability.
//!
//! [`SimMedia`] builds media graphs from the static [`Topology`] table and
//! hands out [`SimVideoNode`]s and [`SimSubDevice`]s. Request fds and exported
//! buffer fds are real descriptors opened on `/dev/null`, so ownership and
//! close-on-drop behave as they do against the driver.
//!
//! Video nodes opened through a [`SimMedia`] complete a buffer tied to a
//! request only after that request was queued, matching the kernel's atomic
//! commit. Standalone nodes complete buffers in queue order.
//!
//! Every node and the media device accept failure injection so error paths
//! can be exercised from tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::format::{self, FORMAT_TABLE};
use crate::fourcc::FourCC;
use crate::topology::{MediaDeviceTag, Topology};
use crate::v4l2::{
    BufferType, EntityKind, KernelBuffer, KernelPlane, MediaEntity, MediaGraphController,
    MediaLink, MemoryType, PlaneFormat, QueryControl, RequestAllocator, Selection,
    SubDeviceHandle, TimeVal, V4l2Format, VideoDeviceHandle, V4L2_CID_ROTATE,
    V4L2_CTRL_FLAG_DISABLED,
};

const EIO: i32 = 5;
const EAGAIN: i32 = 11;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ERANGE: i32 = 34;

/// Size the simulated driver reports for metadata buffers.
pub const META_BUFFER_SIZE: u32 = 0x10000;
const META_FORMAT: FourCC = FourCC::new(b"MTKM");

const FRAME_INTERVAL_US: i64 = 33_333;
const MAP_BASE: usize = 0x7f00_0000_0000;

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn null_fd() -> io::Result<OwnedFd> {
    Ok(File::open("/dev/null")?.into())
}

/// Video node operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    SetFormat,
    SetupBuffers,
    MapMemory,
    ExportFrame,
    Start,
    Stop,
    PutFrame,
    GrabFrame,
    SetControl,
}

/// Request fds queued to the simulated media device and not yet reinited.
type QueuedRequests = Arc<Mutex<HashSet<RawFd>>>;

fn is_meta_node(name: &str) -> bool {
    name.contains("meta") || name.contains("Tuning")
}

fn meta_format() -> V4l2Format {
    V4l2Format {
        pixel_format: META_FORMAT,
        planes: vec![PlaneFormat {
            bytes_per_line: 0,
            size_image: META_BUFFER_SIZE,
        }],
        ..Default::default()
    }
}

fn default_format(name: &str) -> V4l2Format {
    if is_meta_node(name) {
        return meta_format();
    }
    V4l2Format {
        pixel_format: format::PIX_FMT_YUYV,
        width: 640,
        height: 480,
        planes: vec![PlaneFormat {
            bytes_per_line: 1280,
            size_image: 640 * 480 * 2,
        }],
        ..Default::default()
    }
}

/// Computes the format a driver would settle on for `requested`.
fn negotiate(current: &V4l2Format, requested: &V4l2Format) -> io::Result<V4l2Format> {
    if requested.pixel_format == FourCC::default() {
        return Ok(current.clone());
    }
    let entry = FORMAT_TABLE
        .iter()
        .find(|e| e.code == requested.pixel_format)
        .ok_or_else(|| errno(EINVAL))?;
    if requested.width == 0 || requested.height == 0 {
        return Err(errno(EINVAL));
    }
    let strides = entry.format.strides(requested.width);
    let sizes = entry.format.plane_sizes(requested.width, requested.height);
    let planes = if format::is_multiplanar(entry.code) {
        strides
            .iter()
            .zip(&sizes)
            .enumerate()
            .map(|(i, (&stride, &size))| {
                let asked = requested.planes.get(i).map_or(0, |p| p.bytes_per_line);
                let bytes_per_line = asked.max(stride);
                PlaneFormat {
                    bytes_per_line,
                    size_image: size / stride.max(1) * bytes_per_line,
                }
            })
            .collect()
    } else {
        vec![PlaneFormat {
            bytes_per_line: strides[0],
            size_image: sizes.iter().sum(),
        }]
    };
    Ok(V4l2Format {
        pixel_format: entry.code,
        width: requested.width,
        height: requested.height,
        planes,
        colorspace: requested.colorspace,
        quantization: requested.quantization,
    })
}

#[derive(Debug)]
struct NodeShared {
    name: String,
    format: V4l2Format,
    memory: MemoryType,
    buffers: u32,
    streaming: bool,
    pending: VecDeque<KernelBuffer>,
    log: Vec<KernelBuffer>,
    sequence: u32,
    mapped: HashSet<usize>,
    map_planes: usize,
    controls: HashMap<u32, i32>,
    rotate_disabled: bool,
    failures: HashSet<SimOp>,
}

impl NodeShared {
    fn check(&self, op: SimOp) -> io::Result<()> {
        if self.failures.contains(&op) {
            debug!("{}: injected {:?} failure", self.name, op);
            return Err(errno(EIO));
        }
        Ok(())
    }

    fn check_index(&self, index: u32) -> io::Result<()> {
        if index >= self.buffers {
            return Err(errno(EINVAL));
        }
        Ok(())
    }
}

/// A simulated V4L2 video node.
pub struct SimVideoNode {
    buffer_type: BufferType,
    shared: Arc<Mutex<NodeShared>>,
    requests: Option<QueuedRequests>,
}

impl SimVideoNode {
    pub fn new(name: &str, buffer_type: BufferType) -> Self {
        let mut controls = HashMap::new();
        controls.insert(V4L2_CID_ROTATE, 0);
        SimVideoNode {
            buffer_type,
            shared: Arc::new(Mutex::new(NodeShared {
                name: name.to_owned(),
                format: default_format(name),
                memory: MemoryType::DmaBuf,
                buffers: 0,
                streaming: false,
                pending: VecDeque::new(),
                log: Vec::new(),
                sequence: 0,
                mapped: HashSet::new(),
                map_planes: 1,
                controls,
                rotate_disabled: false,
                failures: HashSet::new(),
            })),
            requests: None,
        }
    }

    fn with_requests(mut self, requests: QueuedRequests) -> Self {
        self.requests = Some(requests);
        self
    }

    /// A handle that inspects and steers this node after it was boxed.
    pub fn probe(&self) -> SimNodeProbe {
        SimNodeProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeShared> {
        lock(&self.shared)
    }
}

impl VideoDeviceHandle for SimVideoNode {
    fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    fn set_format(&mut self, format: &V4l2Format) -> io::Result<()> {
        let mut node = self.lock();
        node.check(SimOp::SetFormat)?;
        if node.buffers > 0 {
            return Err(errno(EBUSY));
        }
        node.format = negotiate(&node.format, format)?;
        debug!("{}: format {:?}", node.name, node.format);
        Ok(())
    }

    fn get_format(&mut self) -> io::Result<V4l2Format> {
        Ok(self.lock().format.clone())
    }

    fn setup_buffers(
        &mut self,
        count: u32,
        _clear: bool,
        memory: MemoryType,
    ) -> io::Result<Vec<KernelBuffer>> {
        let mut node = self.lock();
        node.check(SimOp::SetupBuffers)?;
        if node.streaming {
            return Err(errno(EBUSY));
        }
        node.memory = memory;
        node.buffers = count;
        node.pending.clear();
        let planes: Vec<KernelPlane> = node
            .format
            .planes
            .iter()
            .map(|p| KernelPlane {
                length: p.size_image,
                ..Default::default()
            })
            .collect();
        Ok((0..count)
            .map(|index| KernelBuffer {
                index,
                memory,
                planes: planes.clone(),
                ..Default::default()
            })
            .collect())
    }

    fn map_memory(&mut self, index: u32, _prot: i32, _flags: i32) -> io::Result<Vec<usize>> {
        let mut node = self.lock();
        node.check(SimOp::MapMemory)?;
        node.check_index(index)?;
        if node.memory != MemoryType::Mmap {
            return Err(errno(EINVAL));
        }
        let addrs: Vec<usize> = (0..node.map_planes)
            .map(|plane| MAP_BASE + index as usize * 0x100_0000 + plane * 0x10_0000)
            .collect();
        node.mapped.extend(addrs.iter().copied());
        Ok(addrs)
    }

    fn unmap_memory(&mut self, addr: usize, _length: u32) -> io::Result<()> {
        if self.lock().mapped.remove(&addr) {
            Ok(())
        } else {
            Err(errno(EINVAL))
        }
    }

    fn export_frame(&mut self, index: u32) -> io::Result<Vec<OwnedFd>> {
        let node = self.lock();
        node.check(SimOp::ExportFrame)?;
        node.check_index(index)?;
        (0..node.format.planes.len().max(1))
            .map(|_| null_fd())
            .collect()
    }

    fn start(&mut self) -> io::Result<()> {
        let mut node = self.lock();
        node.check(SimOp::Start)?;
        if node.buffers == 0 {
            return Err(errno(EINVAL));
        }
        node.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        let mut node = self.lock();
        node.check(SimOp::Stop)?;
        node.streaming = false;
        node.pending.clear();
        Ok(())
    }

    fn put_frame(&mut self, buffer: &KernelBuffer) -> io::Result<()> {
        let mut node = self.lock();
        node.check(SimOp::PutFrame)?;
        node.check_index(buffer.index)?;
        if buffer.memory != node.memory {
            return Err(errno(EINVAL));
        }
        if node.pending.iter().any(|b| b.index == buffer.index) {
            return Err(errno(EBUSY));
        }
        trace!("{}: qbuf {}", node.name, buffer.index);
        node.log.push(buffer.clone());
        node.pending.push_back(buffer.clone());
        Ok(())
    }

    fn grab_frame(&mut self) -> io::Result<KernelBuffer> {
        let mut node = self.lock();
        node.check(SimOp::GrabFrame)?;
        if !node.streaming {
            return Err(errno(EINVAL));
        }
        let ready = match node.pending.front() {
            None => false,
            Some(front) => match (front.request_fd, &self.requests) {
                (Some(fd), Some(queued)) => lock(queued).contains(&fd),
                _ => true,
            },
        };
        if !ready {
            return Err(errno(EAGAIN));
        }
        let Some(mut buffer) = node.pending.pop_front() else {
            return Err(errno(EAGAIN));
        };
        buffer.sequence = node.sequence;
        let micros = 1_000_000 + i64::from(node.sequence) * FRAME_INTERVAL_US;
        buffer.timestamp = TimeVal {
            sec: micros / 1_000_000,
            usec: micros % 1_000_000,
        };
        node.sequence += 1;
        trace!("{}: dqbuf {} seq {}", node.name, buffer.index, buffer.sequence);
        Ok(buffer)
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut node = self.lock();
        node.check(SimOp::SetControl)?;
        if !node.controls.contains_key(&id) {
            return Err(errno(EINVAL));
        }
        if id == V4L2_CID_ROTATE && ![0, 90, 180, 270].contains(&value) {
            return Err(errno(ERANGE));
        }
        node.controls.insert(id, value);
        Ok(())
    }

    fn get_control(&mut self, id: u32) -> io::Result<i32> {
        self.lock()
            .controls
            .get(&id)
            .copied()
            .ok_or_else(|| errno(EINVAL))
    }

    fn query_control(&mut self, id: u32) -> io::Result<QueryControl> {
        let node = self.lock();
        if id != V4L2_CID_ROTATE || !node.controls.contains_key(&id) {
            return Err(errno(EINVAL));
        }
        Ok(QueryControl {
            id,
            flags: if node.rotate_disabled {
                V4L2_CTRL_FLAG_DISABLED
            } else {
                0
            },
            minimum: 0,
            maximum: 270,
            default_value: 0,
        })
    }
}

/// Test-side view of a [`SimVideoNode`].
#[derive(Clone)]
pub struct SimNodeProbe {
    shared: Arc<Mutex<NodeShared>>,
}

impl SimNodeProbe {
    fn lock(&self) -> MutexGuard<'_, NodeShared> {
        lock(&self.shared)
    }

    /// Makes `op` fail with `EIO` until [`clear`](Self::clear) is called.
    pub fn fail(&self, op: SimOp) {
        self.lock().failures.insert(op);
    }

    pub fn clear(&self, op: SimOp) {
        self.lock().failures.remove(&op);
    }

    /// Every buffer accepted by the node, in queue order.
    pub fn queued(&self) -> Vec<KernelBuffer> {
        self.lock().log.clone()
    }

    /// Buffers owned by the simulated driver.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn streaming(&self) -> bool {
        self.lock().streaming
    }

    pub fn control(&self, id: u32) -> Option<i32> {
        self.lock().controls.get(&id).copied()
    }

    pub fn set_rotate_disabled(&self, disabled: bool) {
        self.lock().rotate_disabled = disabled;
    }

    /// Number of addresses `map_memory` returns per buffer.
    pub fn set_map_planes(&self, planes: usize) {
        self.lock().map_planes = planes;
    }

    /// Addresses currently mapped.
    pub fn mapped_count(&self) -> usize {
        self.lock().mapped.len()
    }
}

/// A simulated sub-device recording the selections applied to it.
#[derive(Debug)]
pub struct SimSubDevice {
    name: String,
    selections: Mutex<Vec<Selection>>,
}

impl SimSubDevice {
    pub fn new(name: &str) -> Self {
        SimSubDevice {
            name: name.to_owned(),
            selections: Mutex::new(Vec::new()),
        }
    }

    pub fn selections(&self) -> Vec<Selection> {
        lock(&self.selections).clone()
    }
}

impl SubDeviceHandle for SimSubDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_selection(&self, selection: &Selection) -> io::Result<()> {
        if selection.rect.width == 0 || selection.rect.height == 0 {
            return Err(errno(EINVAL));
        }
        lock(&self.selections).push(*selection);
        Ok(())
    }
}

/// Call counters of a [`SimMedia`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Media devices opened.
    pub opened: usize,
    pub closed: usize,
    /// `reset_all_links` calls.
    pub reset: usize,
    pub allocated: usize,
    pub queued: usize,
    pub reinit: usize,
}

struct SimDevice {
    tag: MediaDeviceTag,
    entities: Vec<MediaEntity>,
    links: Vec<String>,
}

#[derive(Default)]
struct MediaState {
    next_device: i32,
    devices: HashMap<i32, SimDevice>,
    stats: SimStats,
    fail_allocations: bool,
    fail_open: HashSet<String>,
    probes: Vec<(String, SimNodeProbe)>,
    subdevices: Vec<Arc<SimSubDevice>>,
}

/// A simulated media controller with its request pool.
#[derive(Default)]
pub struct SimMedia {
    device_index: Option<i32>,
    state: Mutex<MediaState>,
    requests: QueuedRequests,
}

impl SimMedia {
    pub fn new() -> Self {
        SimMedia::default()
    }

    /// Reports `index` from every `open_and_setup_all_links` call.
    pub fn with_device_index(mut self, index: i32) -> Self {
        self.device_index = Some(index);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MediaState> {
        lock(&self.state)
    }

    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.lock().fail_allocations = fail;
    }

    /// Makes opening the entity called `name` fail.
    pub fn fail_open(&self, name: &str) {
        self.lock().fail_open.insert(name.to_owned());
    }

    /// Probe of the most recently opened video node called `name`.
    pub fn probe(&self, name: &str) -> Option<SimNodeProbe> {
        self.lock()
            .probes
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, probe)| probe.clone())
    }

    /// Selections applied to the most recently opened sub-device `name`.
    pub fn selections(&self, name: &str) -> Vec<Selection> {
        self.lock()
            .subdevices
            .iter()
            .rev()
            .find(|s| s.name == name)
            .map(|s| s.selections())
            .unwrap_or_default()
    }

    pub fn open_devices(&self) -> Vec<i32> {
        let mut devices: Vec<i32> = self.lock().devices.keys().copied().collect();
        devices.sort_unstable();
        devices
    }

    /// Enabled links of `device`, formatted as `"source":pad -> "sink":pad`.
    pub fn links(&self, device: i32) -> Vec<String> {
        self.lock()
            .devices
            .get(&device)
            .map(|d| d.links.clone())
            .unwrap_or_default()
    }

    fn buffer_type_for(name: &str) -> BufferType {
        let output = name.contains("input") || name.contains("Input") || name.contains("Shading");
        match (is_meta_node(name), output) {
            (true, true) => BufferType::MetaOutput,
            (true, false) => BufferType::MetaCapture,
            (false, true) => BufferType::VideoOutputMplane,
            (false, false) => BufferType::VideoCaptureMplane,
        }
    }
}

fn find_entity<'a>(device: &'a SimDevice, entity: &MediaEntity) -> io::Result<&'a MediaEntity> {
    device
        .entities
        .iter()
        .find(|e| e.id == entity.id && e.name == entity.name)
        .ok_or_else(|| errno(EINVAL))
}

impl MediaGraphController for SimMedia {
    fn open_and_setup_all_links(
        &self,
        tag: MediaDeviceTag,
        enable_tuning: bool,
    ) -> io::Result<(i32, Vec<MediaEntity>)> {
        let topo = Topology::new(tag, enable_tuning);
        let mut state = self.lock();
        state.stats.opened += 1;
        let entities: Vec<MediaEntity> = topo
            .entities
            .iter()
            .zip(1..)
            .map(|(&(name, kind), id)| MediaEntity::new(id, name, kind))
            .collect();
        let device = match self.device_index {
            Some(index) => index,
            None => {
                let index = state.next_device;
                state.next_device += 1;
                index
            }
        };
        if device >= 0 {
            state.devices.insert(
                device,
                SimDevice {
                    tag,
                    entities: entities.clone(),
                    links: topo.links.iter().map(ToString::to_string).collect(),
                },
            );
        }
        debug!(
            "sim media device {} for {} with {} links",
            device,
            tag,
            topo.links.len()
        );
        Ok((device, entities))
    }

    fn open_video_node(
        &self,
        device: i32,
        entity: &MediaEntity,
    ) -> io::Result<Box<dyn VideoDeviceHandle>> {
        let mut state = self.lock();
        let dev = state.devices.get(&device).ok_or_else(|| errno(ENODEV))?;
        let entity = find_entity(dev, entity)?;
        if entity.kind != EntityKind::Video {
            return Err(errno(EINVAL));
        }
        if state.fail_open.contains(&entity.name) {
            return Err(errno(ENODEV));
        }
        let name = entity.name.clone();
        let node = SimVideoNode::new(&name, Self::buffer_type_for(&name))
            .with_requests(Arc::clone(&self.requests));
        state.probes.push((name, node.probe()));
        Ok(Box::new(node))
    }

    fn open_subdevice(
        &self,
        device: i32,
        entity: &MediaEntity,
    ) -> io::Result<Arc<dyn SubDeviceHandle>> {
        let mut state = self.lock();
        let dev = state.devices.get(&device).ok_or_else(|| errno(ENODEV))?;
        let entity = find_entity(dev, entity)?;
        if entity.kind != EntityKind::SubDevice {
            return Err(errno(EINVAL));
        }
        if state.fail_open.contains(&entity.name) {
            return Err(errno(ENODEV));
        }
        let subdev = Arc::new(SimSubDevice::new(&entity.name));
        state.subdevices.push(Arc::clone(&subdev));
        Ok(subdev)
    }

    fn reset_all_links(&self, device: i32) -> io::Result<()> {
        let mut state = self.lock();
        state.stats.reset += 1;
        let dev = state.devices.get_mut(&device).ok_or_else(|| errno(ENODEV))?;
        debug!("sim media device {} ({}): reset links", device, dev.tag);
        dev.links.clear();
        Ok(())
    }

    fn close_media_device(&self, device: i32) -> io::Result<()> {
        let mut state = self.lock();
        state.stats.closed += 1;
        state
            .devices
            .remove(&device)
            .map(|_| ())
            .ok_or_else(|| errno(ENODEV))
    }

    fn enable_link(&self, device: i32, link: &MediaLink<'_>) -> io::Result<()> {
        let mut state = self.lock();
        let dev = state.devices.get_mut(&device).ok_or_else(|| errno(ENODEV))?;
        let known = |name: &str| dev.entities.iter().any(|e| e.name == name);
        if !known(link.source) || !known(link.sink) {
            return Err(errno(EINVAL));
        }
        let text = link.to_string();
        if !dev.links.contains(&text) {
            dev.links.push(text);
        }
        Ok(())
    }

    fn disable_link(&self, device: i32, link: &MediaLink<'_>) -> io::Result<()> {
        let mut state = self.lock();
        let dev = state.devices.get_mut(&device).ok_or_else(|| errno(ENODEV))?;
        let text = link.to_string();
        let before = dev.links.len();
        dev.links.retain(|l| *l != text);
        if dev.links.len() == before {
            return Err(errno(EINVAL));
        }
        Ok(())
    }
}

impl RequestAllocator for SimMedia {
    fn allocate_request(&self, device: i32) -> io::Result<OwnedFd> {
        let mut state = self.lock();
        if state.fail_allocations {
            return Err(errno(ENOMEM));
        }
        let fd = null_fd()?;
        state.stats.allocated += 1;
        trace!("sim media device {}: request fd {}", device, fd.as_raw_fd());
        Ok(fd)
    }

    fn reinit_request(&self, _device: i32, fd: BorrowedFd<'_>) -> io::Result<()> {
        self.lock().stats.reinit += 1;
        lock(&self.requests).remove(&fd.as_raw_fd());
        Ok(())
    }

    fn queue_request(&self, device: i32, fd: BorrowedFd<'_>) -> io::Result<()> {
        self.lock().stats.queued += 1;
        if !lock(&self.requests).insert(fd.as_raw_fd()) {
            return Err(errno(EBUSY));
        }
        trace!("sim media device {}: queued request {}", device, fd.as_raw_fd());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ImageFormat;
    use std::os::fd::AsFd;

    #[test]
    fn test_negotiate_yuyv() {
        let mut node = SimVideoNode::new("mtk-cam-p1 main stream", BufferType::VideoCaptureMplane);
        let requested = V4l2Format {
            pixel_format: format::PIX_FMT_YUYV,
            width: 64,
            height: 32,
            ..Default::default()
        };
        node.set_format(&requested).unwrap();
        let fmt = node.get_format().unwrap();
        assert_eq!(fmt.size_image(0), 64 * 32 * 2);
        assert_eq!(fmt.planes[0].bytes_per_line, 128);
    }

    #[test]
    fn test_negotiate_multiplanar() {
        let current = default_format("mtk-cam-p1 main stream");
        let requested = V4l2Format {
            pixel_format: format::PIX_FMT_NV12M,
            width: 64,
            height: 32,
            planes: vec![PlaneFormat {
                bytes_per_line: 128,
                size_image: 0,
            }],
            ..Default::default()
        };
        let fmt = negotiate(&current, &requested).unwrap();
        assert_eq!(fmt.planes.len(), ImageFormat::Nv12.plane_count());
        assert_eq!(fmt.planes[0].bytes_per_line, 128);
        assert_eq!(fmt.size_image(0), 128 * 32);
        assert_eq!(fmt.size_image(1), 64 * 16);
    }

    #[test]
    fn test_meta_keeps_format() {
        let mut node = SimVideoNode::new("mtk-cam-p1 partial meta 1", BufferType::MetaCapture);
        node.set_format(&V4l2Format::default()).unwrap();
        assert_eq!(node.get_format().unwrap().size_image(0), META_BUFFER_SIZE);
        let bogus = V4l2Format {
            pixel_format: FourCC::new(b"ABCD"),
            width: 1,
            height: 1,
            ..Default::default()
        };
        assert!(node.set_format(&bogus).is_err());
    }

    #[test]
    fn test_fifo_sequence() {
        let mut node = SimVideoNode::new("mtk-cam-p1 main stream", BufferType::VideoCaptureMplane);
        let bufs = node.setup_buffers(2, false, MemoryType::DmaBuf).unwrap();
        node.start().unwrap();
        assert_eq!(
            node.grab_frame().unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        node.put_frame(&bufs[1]).unwrap();
        assert_eq!(node.put_frame(&bufs[1]).unwrap_err().raw_os_error(), Some(EBUSY));
        node.put_frame(&bufs[0]).unwrap();
        let first = node.grab_frame().unwrap();
        let second = node.grab_frame().unwrap();
        assert_eq!((first.index, first.sequence), (1, 0));
        assert_eq!((second.index, second.sequence), (0, 1));
        assert!(second.timestamp.as_nanos() > first.timestamp.as_nanos());
    }

    #[test]
    fn test_request_gates_completion() {
        let media = SimMedia::new();
        let (device, entities) = media
            .open_and_setup_all_links(MediaDeviceTag::P1Out1, false)
            .unwrap();
        let entity = entities.iter().find(|e| e.is_video()).unwrap();
        let mut node = media.open_video_node(device, entity).unwrap();
        let request = media.allocate_request(device).unwrap();

        let mut bufs = node.setup_buffers(1, false, MemoryType::DmaBuf).unwrap();
        bufs[0].request_fd = Some(request.as_raw_fd());
        node.start().unwrap();
        node.put_frame(&bufs[0]).unwrap();
        assert!(node.grab_frame().is_err());

        media.queue_request(device, request.as_fd()).unwrap();
        assert_eq!(node.grab_frame().unwrap().request_fd, Some(request.as_raw_fd()));
        assert_eq!(media.stats().queued, 1);
    }

    #[test]
    fn test_subdevice_selection() {
        let media = SimMedia::new();
        let (device, entities) = media
            .open_and_setup_all_links(MediaDeviceTag::P2PreviewOut2, false)
            .unwrap();
        let hub = entities.iter().find(|e| !e.is_video()).unwrap();
        assert!(media.open_video_node(device, hub).is_err());
        let subdev = media.open_subdevice(device, hub).unwrap();
        assert_eq!(subdev.name(), "mtk-cam-dip preview");
        let selection = Selection {
            pad: 4,
            which: 1,
            target: 0,
            flags: 2,
            rect: (0, 0, 32, 16).into(),
        };
        subdev.set_selection(&selection).unwrap();
        assert_eq!(media.selections("mtk-cam-dip preview"), vec![selection]);
    }

    #[test]
    fn test_unknown_device() {
        let media = SimMedia::new();
        let entity = MediaEntity::new(1, "mtk-cam-p1", EntityKind::SubDevice);
        assert_eq!(
            media.open_subdevice(3, &entity).err().map(|e| e.raw_os_error()),
            Some(Some(ENODEV))
        );
        assert!(media.reset_all_links(3).is_err());
        assert_eq!(media.stats().reset, 1);
    }
}
