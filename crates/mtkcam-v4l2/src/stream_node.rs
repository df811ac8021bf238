// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::os::fd::{OwnedFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, error, info, warn};
use unix_ts::Timestamp;

use crate::format::{self, ImageFormat, ImgParam};
use crate::fourcc::FourCC;
use crate::image::{buffer_identity, DmaBufImage, ImageBuffer, Rect};
use crate::v4l2::{
    KernelBuffer, MemoryType, Selection, SubDeviceHandle, V4l2Format, VideoDeviceHandle,
    MAP_SHARED, PROT_READ, PROT_WRITE, V4L2_CID_ROTATE, V4L2_CTRL_FLAG_DISABLED,
    V4L2_SEL_FLAG_LE, V4L2_SEL_TGT_CROP, V4L2_SUBDEV_FORMAT_ACTIVE,
};
use crate::Error;

/// Kernel buffers requested when no pool size was configured.
pub const DEFAULT_POOL_SIZE: u32 = 3;

/// Crop pad of the MDP0 output on the DIP sub-device.
pub const PAD_MDP0: u32 = 4;
/// Crop pad of the MDP1 output on the DIP sub-device.
pub const PAD_MDP1: u32 = 5;

pub const TRANSFORM_FLIP_H: u32 = 0x01;
pub const TRANSFORM_FLIP_V: u32 = 0x02;
pub const TRANSFORM_ROT_90: u32 = 0x04;
pub const TRANSFORM_ROT_180: u32 = 0x03;
pub const TRANSFORM_ROT_270: u32 = 0x07;

/// Transform → (rotation in degrees, flip).
pub static TRANSFORM_TABLE: &[(u32, i32, bool)] = &[
    (0, 0, false),
    (TRANSFORM_FLIP_H, 0, true),
    (TRANSFORM_FLIP_V, 180, true),
    (TRANSFORM_ROT_90, 90, false),
    (TRANSFORM_ROT_180, 180, false),
    (TRANSFORM_FLIP_H | TRANSFORM_ROT_90, 270, true),
    (TRANSFORM_FLIP_V | TRANSFORM_ROT_90, 90, true),
    (TRANSFORM_ROT_270, 270, false),
];

/// Looks up `(rotation, flip)` for a transform.
pub fn rotation_for(transform: u32) -> Option<(i32, bool)> {
    TRANSFORM_TABLE
        .iter()
        .find(|(t, _, _)| *t == transform)
        .map(|&(_, rotation, flip)| (rotation, flip))
}

/// Lifecycle of a [`StreamNode`].
///
/// ```text
/// Closed <- Open -> Configured -> Prepared -> Started -> Stopped
///                                     \__________________/
/// ```
///
/// `Error` is entered when buffer setup or streaming control fails in the
/// kernel; the node must be recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Closed,
    Open,
    Configured,
    Prepared,
    Started,
    Stopped,
    Error,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Closed => "CLOSED",
            NodeState::Open => "OPEN",
            NodeState::Configured => "CONFIGURED",
            NodeState::Prepared => "PREPARED",
            NodeState::Started => "STARTED",
            NodeState::Stopped => "STOPPED",
            NodeState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// DIP hub a P2 node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DipPipe {
    Preview,
    Capture,
    Reprocess,
}

/// Known video nodes of the ISP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    P1MainStream,
    P1PackedOut,
    P1Meta0,
    P1Meta1,
    P1Meta2,
    P1Meta3,
    P1MetaInput,
    P2RawInput(DipPipe),
    P2Tuning(DipPipe),
    P2NrInput(DipPipe),
    P2Shading(DipPipe),
    P2Mdp0(DipPipe),
    P2Mdp1(DipPipe),
    P2Img2(DipPipe),
    P2Img3(DipPipe),
}

/// Node ID → entity name.
pub static NODE_NAMES: &[(NodeId, &str)] = &[
    (NodeId::P1MainStream, "mtk-cam-p1 main stream"),
    (NodeId::P1PackedOut, "mtk-cam-p1 packed out"),
    (NodeId::P1Meta0, "mtk-cam-p1 partial meta 0"),
    (NodeId::P1Meta1, "mtk-cam-p1 partial meta 1"),
    (NodeId::P1Meta2, "mtk-cam-p1 partial meta 2"),
    (NodeId::P1Meta3, "mtk-cam-p1 partial meta 3"),
    (NodeId::P1MetaInput, "mtk-cam-p1 meta input"),
    (NodeId::P2RawInput(DipPipe::Preview), "mtk-cam-dip preview Raw Input"),
    (NodeId::P2Tuning(DipPipe::Preview), "mtk-cam-dip preview Tuning"),
    (NodeId::P2NrInput(DipPipe::Preview), "mtk-cam-dip preview NR Input"),
    (NodeId::P2Shading(DipPipe::Preview), "mtk-cam-dip preview Shading"),
    (NodeId::P2Mdp0(DipPipe::Preview), "mtk-cam-dip preview MDP0"),
    (NodeId::P2Mdp1(DipPipe::Preview), "mtk-cam-dip preview MDP1"),
    (NodeId::P2Img2(DipPipe::Preview), "mtk-cam-dip preview IMG2"),
    (NodeId::P2Img3(DipPipe::Preview), "mtk-cam-dip preview IMG3"),
    (NodeId::P2RawInput(DipPipe::Capture), "mtk-cam-dip capture Raw Input"),
    (NodeId::P2Tuning(DipPipe::Capture), "mtk-cam-dip capture Tuning"),
    (NodeId::P2NrInput(DipPipe::Capture), "mtk-cam-dip capture NR Input"),
    (NodeId::P2Shading(DipPipe::Capture), "mtk-cam-dip capture Shading"),
    (NodeId::P2Mdp0(DipPipe::Capture), "mtk-cam-dip capture MDP0"),
    (NodeId::P2Mdp1(DipPipe::Capture), "mtk-cam-dip capture MDP1"),
    (NodeId::P2Img2(DipPipe::Capture), "mtk-cam-dip capture IMG2"),
    (NodeId::P2Img3(DipPipe::Capture), "mtk-cam-dip capture IMG3"),
    (NodeId::P2RawInput(DipPipe::Reprocess), "mtk-cam-dip reprocess Raw Input"),
    (NodeId::P2Tuning(DipPipe::Reprocess), "mtk-cam-dip reprocess Tuning"),
    (NodeId::P2NrInput(DipPipe::Reprocess), "mtk-cam-dip reprocess NR Input"),
    (NodeId::P2Shading(DipPipe::Reprocess), "mtk-cam-dip reprocess Shading"),
    (NodeId::P2Mdp0(DipPipe::Reprocess), "mtk-cam-dip reprocess MDP0"),
    (NodeId::P2Mdp1(DipPipe::Reprocess), "mtk-cam-dip reprocess MDP1"),
    (NodeId::P2Img2(DipPipe::Reprocess), "mtk-cam-dip reprocess IMG2"),
    (NodeId::P2Img3(DipPipe::Reprocess), "mtk-cam-dip reprocess IMG3"),
];

impl NodeId {
    pub fn from_name(name: &str) -> Option<NodeId> {
        NODE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|&(id, _)| id)
    }

    pub fn name(self) -> &'static str {
        NODE_NAMES
            .iter()
            .find(|(id, _)| *id == self)
            .map_or("unknown", |&(_, n)| n)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One buffer handed to [`StreamNode::enque`].
#[derive(Debug, Clone)]
pub struct BufInfo {
    pub buffer: Arc<dyn ImageBuffer>,
    /// Media request the buffer joins; values <= 0 mean no request.
    pub request_fd: RawFd,
    pub magic_num: u32,
    /// Crop applied through the DIP sub-device on MDP outputs.
    pub crop: Option<Rect>,
    pub transform: u32,
    pub port: u32,
}

impl BufInfo {
    pub fn new(buffer: Arc<dyn ImageBuffer>) -> Self {
        BufInfo {
            buffer,
            request_fd: 0,
            magic_num: 0,
            crop: None,
            transform: 0,
            port: 0,
        }
    }

    pub fn with_request_fd(mut self, fd: RawFd) -> Self {
        self.request_fd = fd;
        self
    }

    pub fn with_magic_num(mut self, magic_num: u32) -> Self {
        self.magic_num = magic_num;
        self
    }

    pub fn with_crop(mut self, crop: Rect) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_transform(mut self, transform: u32) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_port(mut self, port: u32) -> Self {
        self.port = port;
        self
    }
}

/// A buffer returned by [`StreamNode::deque`].
#[derive(Debug, Clone)]
pub struct DequeuedBuffer {
    /// The image that was enqueued into this slot.
    pub buffer: Arc<dyn ImageBuffer>,
    pub index: u32,
    pub sequence: u32,
    pub request_fd: Option<RawFd>,
    /// Kernel timestamp in nanoseconds.
    pub timestamp_ns: i64,
    pub timestamp: Timestamp,
    /// Negotiated size of plane 0.
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindKey {
    Fd(RawFd),
    Va(usize),
    Identity(usize),
}

struct Binding {
    key: BindKey,
    image: Weak<dyn ImageBuffer>,
}

impl Binding {
    fn is_live(&self) -> bool {
        self.image.strong_count() > 0
    }
}

/// What a slot held before [`Inner::rebind`] replaced its binding.
struct Rebound {
    kbuf: KernelBuffer,
    bound: Option<Binding>,
}

struct Slot {
    kbuf: KernelBuffer,
    /// Image held while the kernel owns the slot.
    queued: Option<Arc<dyn ImageBuffer>>,
    bound: Option<Binding>,
    last_used: u64,
    mapped: Option<(usize, u32)>,
    exported: Option<OwnedFd>,
}

impl Slot {
    fn in_use(&self) -> bool {
        self.queued.is_some()
    }

    fn has_live_binding(&self) -> bool {
        self.bound.as_ref().map_or(false, Binding::is_live)
    }
}

struct Inner {
    state: NodeState,
    device: Option<Box<dyn VideoDeviceHandle>>,
    memory: MemoryType,
    format: V4l2Format,
    pool_size: u32,
    active: bool,
    rotation: i32,
    slots: Vec<Slot>,
    tick: u64,
}

/// One video node of the pipeline with its kernel buffer pool.
///
/// Every public call takes the node's lock for its whole body, so a node can
/// be driven from several threads. State reads are snapshots.
pub struct StreamNode {
    name: String,
    id: Option<NodeId>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for StreamNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamNode")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

fn invalid(op: &'static str, state: NodeState) -> Error {
    error!("{} is not allowed in state {}", op, state);
    Error::InvalidState { op, state }
}

impl StreamNode {
    /// Wraps an opened video node. The node starts in [`NodeState::Open`]
    /// with DMABUF memory.
    pub fn new(name: impl Into<String>, device: Box<dyn VideoDeviceHandle>) -> Self {
        let name = name.into();
        let id = NodeId::from_name(&name);
        StreamNode {
            name,
            id,
            inner: Mutex::new(Inner {
                state: NodeState::Open,
                device: Some(device),
                memory: MemoryType::DmaBuf,
                format: V4l2Format::default(),
                pool_size: 0,
                active: false,
                rotation: 0,
                slots: Vec::new(),
                tick: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.lock().state
    }

    pub fn is_started(&self) -> bool {
        self.lock().state == NodeState::Started
    }

    pub fn is_prepared(&self) -> bool {
        self.lock().state == NodeState::Prepared
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Sets the active flag and reports whether it changed.
    pub fn set_active(&self, active: bool) -> bool {
        let mut inner = self.lock();
        let changed = inner.active != active;
        inner.active = active;
        changed
    }

    pub fn memory_type(&self) -> MemoryType {
        self.lock().memory
    }

    /// The format negotiated with the driver.
    pub fn format(&self) -> V4l2Format {
        self.lock().format.clone()
    }

    /// Number of kernel slots currently owned by the driver.
    pub fn in_use_count(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.in_use()).count()
    }

    pub fn pool_len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Chooses the memory type used by the next buffer setup.
    pub fn set_memory_type(&self, memory: MemoryType) -> Result<(), Error> {
        let mut inner = self.lock();
        match inner.state {
            NodeState::Open | NodeState::Configured => {
                inner.memory = memory;
                Ok(())
            }
            state => Err(invalid("set_memory_type", state)),
        }
    }

    /// Number of kernel buffers to request; 0 selects [`DEFAULT_POOL_SIZE`].
    pub fn set_buf_pool_size(&self, size: u32) -> Result<(), Error> {
        let mut inner = self.lock();
        match inner.state {
            NodeState::Open | NodeState::Configured => {
                inner.pool_size = size;
                Ok(())
            }
            state => Err(invalid("set_buf_pool_size", state)),
        }
    }

    /// Negotiates the format. For blob buffers `param.size` is updated to the
    /// size the driver chose.
    pub fn set_buf_format(&self, param: &mut ImgParam) -> Result<(), Error> {
        let mut inner = self.lock();
        match inner.state {
            NodeState::Open => inner.set_format(&self.name, param),
            state => Err(invalid("set_buf_format", state)),
        }
    }

    pub fn setup_buffers(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        match inner.state {
            NodeState::Configured => inner.setup_buffers(&self.name),
            state => Err(invalid("setup_buffers", state)),
        }
    }

    pub fn start(&self) -> Result<(), Error> {
        self.lock().start(&self.name)
    }

    pub fn stop(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        match inner.state {
            NodeState::Prepared | NodeState::Started => {}
            state => return Err(invalid("stop", state)),
        }
        if let Err(err) = inner.device_mut()?.stop() {
            error!("{}: stream off failed: {}", self.name, err);
            inner.state = NodeState::Error;
            return Err(err.into());
        }
        info!("{}: stopped", self.name);
        inner.state = NodeState::Stopped;
        Ok(())
    }

    /// Releases the device. Buffers still owned by the driver are dropped
    /// with it.
    pub fn close(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.state == NodeState::Closed {
            return Err(invalid("close", NodeState::Closed));
        }
        if inner.state == NodeState::Started {
            if let Err(err) = inner.device_mut()?.stop() {
                warn!("{}: stream off on close failed: {}", self.name, err);
            }
        }
        inner.release(&self.name);
        inner.device = None;
        inner.state = NodeState::Closed;
        Ok(())
    }

    /// Configures the node for MMAP and returns one image per kernel buffer.
    ///
    /// The returned images are the only buffers the node accepts afterwards.
    pub fn set_format_and_get_buffers(
        &self,
        param: &mut ImgParam,
        buffers: &mut Vec<Arc<dyn ImageBuffer>>,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        match inner.state {
            NodeState::Open | NodeState::Configured | NodeState::Prepared => {}
            state => return Err(invalid("set_format_and_get_buffers", state)),
        }
        if !buffers.is_empty() {
            return Err(Error::DestinationNotEmpty);
        }

        if inner.state == NodeState::Open {
            inner.set_format(&self.name, param)?;
        }
        if inner.state == NodeState::Configured {
            inner.memory = MemoryType::Mmap;
            inner.setup_buffers(&self.name)?;
        }
        if inner.memory != MemoryType::Mmap {
            return Err(Error::BufferSetupFailed(format!(
                "{} buffers are {} and cannot be exported",
                self.name, inner.memory
            )));
        }

        let stride = param
            .strides
            .first()
            .copied()
            .unwrap_or_else(|| inner.format.planes.first().map_or(0, |p| p.bytes_per_line));
        let mut images = Vec::with_capacity(inner.slots.len());
        for slot in inner.slots.iter_mut() {
            let (Some((va, length)), Some(fd)) = (slot.mapped, slot.exported.as_ref()) else {
                return Err(Error::BufferSetupFailed(format!(
                    "{} slot {} has no mapping",
                    self.name, slot.kbuf.index
                )));
            };
            let image: Arc<dyn ImageBuffer> = Arc::new(
                DmaBufImage::new(param.format, param.width, param.height)
                    .with_plane(fd.try_clone()?, 0, stride, length)
                    .with_va(va)
                    .with_color_profile(param.color_profile),
            );
            slot.bound = Some(Binding {
                key: BindKey::Identity(buffer_identity(&image)),
                image: Arc::downgrade(&image),
            });
            debug!(
                "{}: MMAP slot {} exported at {:#x}",
                self.name, slot.kbuf.index, va
            );
            images.push(image);
        }
        buffers.extend(images);
        Ok(())
    }

    /// Queues one buffer, configuring, preparing and starting the node
    /// first if needed.
    ///
    /// Unless `lazy_start` is set, a prepared node is started before the
    /// buffer is queued, so a single call can move a node from `Open` to
    /// `Started`.
    pub fn enque(
        &self,
        buf: &BufInfo,
        lazy_start: bool,
        subdevice: Option<&dyn SubDeviceHandle>,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        match inner.state {
            NodeState::Open | NodeState::Configured | NodeState::Prepared | NodeState::Started => {}
            state => return Err(invalid("enque", state)),
        }

        let image = &buf.buffer;
        if inner.state == NodeState::Open {
            let mut param = image.img_param();
            inner.set_format(&self.name, &mut param)?;
            if inner.format.size_image(0) != image.length(0) {
                warn!(
                    "{}: inconsistent size ({} vs {})",
                    self.name,
                    inner.format.size_image(0),
                    image.length(0)
                );
            }
        }
        if inner.state == NodeState::Configured {
            inner.setup_buffers(&self.name)?;
        }
        if !lazy_start && inner.state == NodeState::Prepared {
            inner.start(&self.name)?;
        }

        let (slot_idx, rebound) = match inner.memory {
            MemoryType::Mmap => (inner.find_mmap_slot(image)?, None),
            _ => {
                let (idx, rebound) = inner.bind_slot(&self.name, image)?;
                (idx, Some(rebound))
            }
        };

        let tick = inner.next_tick();
        let request_fd = (buf.request_fd > 0).then_some(buf.request_fd);
        let slot = &mut inner.slots[slot_idx];
        let prev_used = slot.last_used;
        let rebound = rebound.unwrap_or_else(|| Rebound {
            kbuf: slot.kbuf.clone(),
            bound: None,
        });
        slot.kbuf.request_fd = request_fd;
        let length = slot.kbuf.length(0);
        slot.kbuf.plane_mut(0).bytes_used = length;
        slot.queued = Some(Arc::clone(image));
        slot.last_used = tick;
        let kbuf = slot.kbuf.clone();

        if let (Some(subdev), Some(crop)) = (subdevice, buf.crop) {
            if let Some(pad) = crop_pad(&self.name) {
                let selection = Selection {
                    pad,
                    which: V4L2_SUBDEV_FORMAT_ACTIVE,
                    target: V4L2_SEL_TGT_CROP,
                    flags: V4L2_SEL_FLAG_LE,
                    rect: crop,
                };
                if let Err(err) = subdev.set_selection(&selection) {
                    warn!(
                        "{}: set selection on {} failed, output without selection: {}",
                        self.name,
                        subdev.name(),
                        err
                    );
                }
            }
        }

        if self.name.contains("MDP0") {
            if let Err(err) = inner.apply_transform(buf.transform) {
                warn!(
                    "{}: rotation ({} -> {:#x}) failed: {}",
                    self.name, inner.rotation, buf.transform, err
                );
            }
        }

        if let Err(err) = inner.device_mut()?.put_frame(&kbuf) {
            error!("{}: enqueue of slot {} failed: {}", self.name, kbuf.index, err);
            let restore_binding = inner.memory != MemoryType::Mmap;
            let slot = &mut inner.slots[slot_idx];
            slot.queued = None;
            slot.last_used = prev_used;
            slot.kbuf = rebound.kbuf;
            if restore_binding {
                slot.bound = rebound.bound;
            }
            return Err(Error::EnqueueFailed(err));
        }
        debug!(
            "put port={} name={} slot={} magic_num={} request_fd={:?} fd={}",
            buf.port,
            self.name,
            kbuf.index,
            buf.magic_num,
            request_fd,
            kbuf.planes.first().map_or(-1, |p| p.fd)
        );
        Ok(())
    }

    /// Dequeues the next completed buffer.
    ///
    /// # Panics
    ///
    /// Panics if the driver returns a slot the node did not queue, since the
    /// buffer tables no longer match the kernel.
    pub fn deque(&self) -> Result<DequeuedBuffer, Error> {
        let mut inner = self.lock();
        if inner.state != NodeState::Started {
            return Err(invalid("deque", inner.state));
        }

        let kbuf = inner.device_mut()?.grab_frame()?;
        let tick = inner.next_tick();
        let buffer = match inner.slots.get_mut(kbuf.index as usize) {
            Some(slot) if slot.in_use() => {
                slot.last_used = tick;
                slot.queued.take()
            }
            _ => None,
        };
        let Some(buffer) = buffer else {
            error!(
                "{}: driver returned slot {} which was not queued",
                self.name, kbuf.index
            );
            panic!("{}: slot {} not found", self.name, kbuf.index);
        };

        let timestamp_ns = kbuf.timestamp.as_nanos();
        let timestamp = Timestamp::new(kbuf.timestamp.sec, (kbuf.timestamp.usec * 1000) as u32);
        let size = inner.format.size_image(0);
        debug!(
            "deque {} slot={} sequence={} request_fd={:?} {}s:{}us",
            self.name, kbuf.index, kbuf.sequence, kbuf.request_fd, kbuf.timestamp.sec,
            kbuf.timestamp.usec
        );
        Ok(DequeuedBuffer {
            buffer,
            index: kbuf.index,
            sequence: kbuf.sequence,
            request_fd: kbuf.request_fd,
            timestamp_ns,
            timestamp,
            size,
        })
    }
}

fn crop_pad(name: &str) -> Option<u32> {
    if name.contains("MDP0") {
        Some(PAD_MDP0)
    } else if name.contains("MDP1") {
        Some(PAD_MDP1)
    } else {
        None
    }
}

fn map_slot(device: &mut dyn VideoDeviceHandle, slot: &mut Slot) -> Result<(), Error> {
    let index = slot.kbuf.index;
    let length = slot.kbuf.length(0);
    let addrs = device
        .map_memory(index, PROT_READ | PROT_WRITE, MAP_SHARED)
        .map_err(|err| Error::BufferSetupFailed(err.to_string()))?;
    let [addr] = addrs[..] else {
        for &addr in &addrs {
            let _ = device.unmap_memory(addr, length);
        }
        return Err(Error::BufferSetupFailed(format!(
            "map of slot {} returned {} planes",
            index,
            addrs.len()
        )));
    };
    slot.mapped = Some((addr, length));

    let mut fds = device
        .export_frame(index)
        .map_err(|err| Error::BufferSetupFailed(err.to_string()))?;
    if fds.len() != 1 {
        let _ = device.unmap_memory(addr, length);
        slot.mapped = None;
        return Err(Error::BufferSetupFailed(format!(
            "export of slot {} returned {} fds",
            index,
            fds.len()
        )));
    }
    slot.exported = fds.pop();
    Ok(())
}

fn unmap_slot(device: &mut dyn VideoDeviceHandle, name: &str, slot: &Slot) {
    if let Some((addr, length)) = slot.mapped {
        info!("{}: unmap {:#x} length {}", name, addr, length);
        if let Err(err) = device.unmap_memory(addr, length) {
            error!("{}: unmap failed: {}", name, err);
        }
    }
}

impl Inner {
    fn device_mut(&mut self) -> Result<&mut Box<dyn VideoDeviceHandle>, Error> {
        let state = self.state;
        self.device
            .as_mut()
            .ok_or(Error::InvalidState { op: "device", state })
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn set_format(&mut self, name: &str, param: &mut ImgParam) -> Result<(), Error> {
        let mut fmt = V4l2Format::default();
        if param.format != ImageFormat::Blob {
            let entry = format::pixel_code(param.format, param.bayer_order)
                .ok_or(Error::UnsupportedFormat(param.format))?;
            let (colorspace, quantization) = format::color_space(param.color_profile)
                .ok_or(Error::UnsupportedColorProfile(param.color_profile))?;
            info!(
                "{}: format {} -> {} {}x{}",
                name, param.format, entry.name, param.width, param.height
            );
            fmt.pixel_format = entry.code;
            fmt.width = param.width;
            fmt.height = param.height;
            fmt.colorspace = colorspace;
            fmt.quantization = quantization;
            if format::is_multiplanar(entry.code) {
                for plane in 0..param.format.plane_count() {
                    let stride = param.strides.get(plane).copied().unwrap_or(0);
                    fmt.set_bytes_per_line(plane, stride);
                }
            } else {
                fmt.set_bytes_per_line(0, 0);
            }
        } else {
            fmt.pixel_format = FourCC::default();
            fmt.set_bytes_per_line(0, 0);
        }

        let device = self.device_mut()?;
        device.set_format(&fmt)?;
        let negotiated = device.get_format()?;

        if param.format == ImageFormat::Blob {
            *param = ImgParam::blob(negotiated.size_image(0));
            debug!("{}: blob size {}", name, param.size);
        }
        self.format = negotiated;
        self.state = NodeState::Configured;
        Ok(())
    }

    fn setup_buffers(&mut self, name: &str) -> Result<(), Error> {
        match self.setup_slots(name) {
            Ok(slots) => {
                info!("{}: {} {} buffers ready", name, slots.len(), self.memory);
                self.slots = slots;
                self.state = NodeState::Prepared;
                Ok(())
            }
            Err(err) => {
                error!("{}: buffer setup failed: {}", name, err);
                self.state = NodeState::Error;
                Err(err)
            }
        }
    }

    fn setup_slots(&mut self, name: &str) -> Result<Vec<Slot>, Error> {
        let count = if self.pool_size > 0 {
            self.pool_size
        } else {
            DEFAULT_POOL_SIZE
        };
        let memory = self.memory;
        let expected = self.format.size_image(0);
        let device = self.device_mut()?;
        let kbufs = device
            .setup_buffers(count, false, memory)
            .map_err(|err| Error::BufferSetupFailed(err.to_string()))?;

        let mut slots = Vec::with_capacity(kbufs.len());
        for kbuf in kbufs {
            if kbuf.length(0) != expected {
                warn!(
                    "{}: inconsistent size ({} vs {})",
                    name,
                    kbuf.length(0),
                    expected
                );
            }
            let mut slot = Slot {
                kbuf,
                queued: None,
                bound: None,
                last_used: 0,
                mapped: None,
                exported: None,
            };
            if memory == MemoryType::Mmap {
                if let Err(err) = map_slot(&mut **device, &mut slot) {
                    for slot in &slots {
                        unmap_slot(&mut **device, name, slot);
                    }
                    return Err(err);
                }
                debug!("{}: slot {} mapped", name, slot.kbuf.index);
            }
            slots.push(slot);
        }
        Ok(slots)
    }

    fn start(&mut self, name: &str) -> Result<(), Error> {
        if self.state != NodeState::Prepared {
            return Err(invalid("start", self.state));
        }
        if let Err(err) = self.device_mut()?.start() {
            error!("{}: stream on failed: {}", name, err);
            self.state = NodeState::Error;
            return Err(err.into());
        }
        info!("{}: started", name);
        self.state = NodeState::Started;
        Ok(())
    }

    fn find_mmap_slot(&self, image: &Arc<dyn ImageBuffer>) -> Result<usize, Error> {
        let key = BindKey::Identity(buffer_identity(image));
        let found = self.slots.iter().position(|slot| {
            slot.bound
                .as_ref()
                .map_or(false, |b| b.key == key && b.is_live())
        });
        let Some(idx) = found else {
            error!("no MMAP slot is bound to {:?}", image);
            return Err(Error::BufferNotFound);
        };
        if self.slots[idx].in_use() {
            return Err(Error::BufferInUse(self.slots[idx].kbuf.index));
        }
        Ok(idx)
    }

    fn bind_slot(
        &mut self,
        name: &str,
        image: &Arc<dyn ImageBuffer>,
    ) -> Result<(usize, Rebound), Error> {
        let key = match self.memory {
            MemoryType::UserPtr => BindKey::Va(image.va(0)),
            _ => BindKey::Fd(image.fd(0)),
        };

        let existing = self.slots.iter().position(|slot| {
            slot.bound
                .as_ref()
                .map_or(false, |b| b.key == key && b.is_live())
        });
        if let Some(idx) = existing {
            if self.slots[idx].in_use() {
                error!(
                    "{}: buffer {:?} is already queued in slot {}",
                    name, key, self.slots[idx].kbuf.index
                );
                return Err(Error::BufferInUse(self.slots[idx].kbuf.index));
            }
            debug!("{}: reusing slot {} for {:?}", name, idx, key);
            return Ok((idx, self.rebind(idx, key, image)));
        }

        let unbound = self
            .slots
            .iter()
            .position(|slot| !slot.in_use() && !slot.has_live_binding());
        if let Some(idx) = unbound {
            debug!("{}: binding free slot {} to {:?}", name, idx, key);
            return Ok((idx, self.rebind(idx, key, image)));
        }

        let lru = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.in_use())
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(idx, _)| idx);
        match lru {
            Some(idx) => {
                debug!("{}: replacing slot {} with {:?}", name, idx, key);
                Ok((idx, self.rebind(idx, key, image)))
            }
            None => {
                error!("{}: no available buffer for replacement", name);
                Err(Error::NoBufferAvailable)
            }
        }
    }

    fn rebind(&mut self, idx: usize, key: BindKey, image: &Arc<dyn ImageBuffer>) -> Rebound {
        let multiplanar = format::is_multiplanar(self.format.pixel_format);
        let memory = self.memory;
        let sizes: Vec<u32> = (0..image.plane_count())
            .map(|i| self.format.size_image(i))
            .collect();
        let slot = &mut self.slots[idx];
        let kbuf = slot.kbuf.clone();
        for (plane, size) in sizes.into_iter().enumerate() {
            if plane > 0 && !multiplanar {
                break;
            }
            let kplane = slot.kbuf.plane_mut(plane);
            match memory {
                MemoryType::UserPtr => {
                    kplane.userptr = image.va(plane);
                    kplane.length = size;
                }
                _ => {
                    kplane.fd = image.fd(plane);
                    kplane.data_offset = image.offset(plane);
                    kplane.length = size + kplane.data_offset;
                }
            }
        }
        let bound = slot.bound.replace(Binding {
            key,
            image: Arc::downgrade(image),
        });
        Rebound { kbuf, bound }
    }

    fn apply_transform(&mut self, transform: u32) -> Result<(), Error> {
        let (rotation, _flip) =
            rotation_for(transform).ok_or(Error::UnsupportedTransform(transform))?;
        let device = self.device_mut()?;
        match device.query_control(V4L2_CID_ROTATE) {
            Ok(query) if query.flags & V4L2_CTRL_FLAG_DISABLED == 0 => {}
            _ => {
                info!("rotate control is not available");
                return Ok(());
            }
        }
        if let Ok(current) = device.get_control(V4L2_CID_ROTATE) {
            if current != rotation {
                device.set_control(V4L2_CID_ROTATE, rotation)?;
                self.rotation = rotation;
            }
        }
        Ok(())
    }

    fn release(&mut self, name: &str) {
        let slots = std::mem::take(&mut self.slots);
        if let Some(device) = self.device.as_mut() {
            for slot in &slots {
                unmap_slot(&mut **device, name, slot);
            }
        }
    }
}

impl Drop for StreamNode {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.state != NodeState::Closed {
            inner.release(&self.name);
        }
    }
}
