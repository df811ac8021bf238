// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, error, info, warn};

use crate::stream_node::{NodeId, StreamNode};
use crate::sync_req::{sync_id_for_node, RequestSyncManager, SyncId, DEFAULT_RESERVE};
use crate::topology::{MediaDeviceTag, P1_MEDIA_NAME};
use crate::v4l2::{
    MediaEntity, MediaGraphController, MediaLink, MemoryType, RequestAllocator, SubDeviceHandle,
};
use crate::Error;

/// Number of sensors a [`PipelineRegistry`] can hold.
pub const MAX_SENSORS: u32 = 4;

const PIPE_TAG_TUNING: u32 = 0x1_0000;

/// Pipeline topologies that can be built for a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum PipeTag {
    #[default]
    Unknown = 0,
    Out1 = 1,
    Out2 = 2,
    Out1Tuning = PIPE_TAG_TUNING | 1,
    Out2Tuning = PIPE_TAG_TUNING | 2,
}

impl PipeTag {
    pub const ALL: [PipeTag; 4] = [
        PipeTag::Out1,
        PipeTag::Out2,
        PipeTag::Out1Tuning,
        PipeTag::Out2Tuning,
    ];

    pub fn is_tuning(self) -> bool {
        self as u32 & PIPE_TAG_TUNING != 0
    }

    pub fn name(self) -> &'static str {
        match self {
            PipeTag::Unknown => "unknown",
            PipeTag::Out1 => "out1",
            PipeTag::Out2 => "out2",
            PipeTag::Out1Tuning => "out1-tuning",
            PipeTag::Out2Tuning => "out2-tuning",
        }
    }
}

impl fmt::Display for PipeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PipeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tag| tag.name() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown pipeline '{}', expected out1, out2, out1-tuning or out2-tuning",
                    s
                )
            })
    }
}

/// Pipeline tag → (media device, media device name, tuning path).
pub static PIPE_TABLE: &[(PipeTag, MediaDeviceTag, &str, bool)] = &[
    (PipeTag::Out1, MediaDeviceTag::P1Out1, P1_MEDIA_NAME, false),
    (PipeTag::Out2, MediaDeviceTag::P1Out2, P1_MEDIA_NAME, false),
    (PipeTag::Out1Tuning, MediaDeviceTag::P1Out1, P1_MEDIA_NAME, true),
    (PipeTag::Out2Tuning, MediaDeviceTag::P1Out2, P1_MEDIA_NAME, true),
];

/// Looks up the media device configuration of a pipeline tag.
pub fn media_device_for(tag: PipeTag) -> Option<(MediaDeviceTag, &'static str, bool)> {
    PIPE_TABLE
        .iter()
        .find(|(t, ..)| *t == tag)
        .map(|&(_, device, name, tuning)| (device, name, tuning))
}

/// Settings applied to every pipeline a manager builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Request fds reserved by the request manager.
    pub reserve_requests: usize,
    /// Kernel buffers per node; 0 selects the node default.
    pub buffer_pool_size: u32,
    /// Leave nodes prepared after the first enqueue instead of starting them.
    pub lazy_start: bool,
    pub memory_type: MemoryType,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            reserve_requests: DEFAULT_RESERVE,
            buffer_pool_size: 0,
            lazy_start: false,
            memory_type: MemoryType::DmaBuf,
        }
    }
}

impl PipelineConfig {
    pub fn with_reserve_requests(mut self, reserve: usize) -> Self {
        self.reserve_requests = reserve;
        self
    }

    pub fn with_buffer_pool_size(mut self, size: u32) -> Self {
        self.buffer_pool_size = size;
        self
    }

    pub fn with_lazy_start(mut self, lazy: bool) -> Self {
        self.lazy_start = lazy;
        self
    }

    pub fn with_memory_type(mut self, memory: MemoryType) -> Self {
        self.memory_type = memory;
        self
    }
}

struct Built {
    tag: PipeTag,
    device: i32,
    entities: Vec<MediaEntity>,
    nodes: Vec<Arc<StreamNode>>,
    subdevices: Vec<Arc<dyn SubDeviceHandle>>,
    p1_subdevice: Option<Arc<dyn SubDeviceHandle>>,
    sync: Option<Arc<RequestSyncManager>>,
}

/// Resets and closes a media device unless the build completed.
struct LinkGuard<'a> {
    media: &'a dyn MediaGraphController,
    device: i32,
    armed: bool,
}

impl LinkGuard<'_> {
    fn disarm(mut self) -> i32 {
        self.armed = false;
        self.device
    }
}

impl Drop for LinkGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("pipeline build failed, tearing down media device {}", self.device);
            teardown(self.media, self.device);
        }
    }
}

fn teardown(media: &dyn MediaGraphController, device: i32) {
    if let Err(err) = media.reset_all_links(device) {
        error!("reset links of media device {} failed: {}", device, err);
    }
    if let Err(err) = media.close_media_device(device) {
        error!("close of media device {} failed: {}", device, err);
    }
}

/// Builds one sensor's media graph and owns the stream nodes and request
/// manager that drive it.
///
/// Use is two-phase: [`PipelineManager::new`] records the backend and
/// settings, [`PipelineManager::build_links`] opens the media device. After
/// that the manager is read-mostly and can be shared behind an [`Arc`].
pub struct PipelineManager {
    sensor: u32,
    media: Arc<dyn MediaGraphController>,
    requests: Arc<dyn RequestAllocator>,
    config: PipelineConfig,
    built: Option<Built>,
}

impl fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineManager")
            .field("sensor", &self.sensor)
            .field("tag", &self.tag())
            .field("nodes", &self.stream_nodes().len())
            .finish()
    }
}

impl PipelineManager {
    pub fn new<B>(sensor: u32, backend: Arc<B>, config: PipelineConfig) -> Self
    where
        B: MediaGraphController + RequestAllocator + 'static,
    {
        let media: Arc<dyn MediaGraphController> = backend.clone();
        let requests: Arc<dyn RequestAllocator> = backend;
        Self::from_parts(sensor, media, requests, config)
    }

    fn from_parts(
        sensor: u32,
        media: Arc<dyn MediaGraphController>,
        requests: Arc<dyn RequestAllocator>,
        config: PipelineConfig,
    ) -> Self {
        PipelineManager {
            sensor,
            media,
            requests,
            config,
            built: None,
        }
    }

    /// Opens the media device for `tag`, links its topology and wraps every
    /// video entity in a [`StreamNode`].
    ///
    /// On failure every link set up so far is reset and the media device is
    /// closed.
    pub fn build_links(&mut self, tag: PipeTag) -> Result<(), Error> {
        if self.built.is_some() {
            return Err(Error::AlreadyBuilt);
        }
        let (device_tag, media_name, tuning) =
            media_device_for(tag).ok_or(Error::UnknownPipeline(tag))?;

        let media = &*self.media;
        let (device, entities) = media
            .open_and_setup_all_links(device_tag, tuning)
            .map_err(|err| {
                error!("sensor {}: setting up {} failed: {}", self.sensor, device_tag, err);
                Error::MediaGraph(format!("{}: {}", device_tag, err))
            })?;
        if device < 0 {
            error!("sensor {}: {} returned device {}", self.sensor, media_name, device);
            return Err(Error::MediaGraph(format!(
                "{} returned invalid device index {}",
                media_name, device
            )));
        }
        let guard = LinkGuard {
            media,
            device,
            armed: true,
        };
        info!(
            "sensor {}: {} linked on media device {} ({} entities)",
            self.sensor,
            device_tag,
            device,
            entities.len()
        );

        let mut nodes = Vec::new();
        let mut subdevices = Vec::new();
        let mut p1_subdevice = None;
        for entity in &entities {
            if entity.is_video() {
                let handle = media.open_video_node(device, entity).map_err(|err| {
                    error!("open video node {} failed: {}", entity, err);
                    Error::MediaGraph(format!("{}: {}", entity.name, err))
                })?;
                let node = StreamNode::new(entity.name.clone(), handle);
                node.set_buf_pool_size(self.config.buffer_pool_size)?;
                node.set_memory_type(self.config.memory_type)?;
                debug!("sensor {}: stream node {}", self.sensor, entity);
                nodes.push(Arc::new(node));
            } else {
                let subdev = media.open_subdevice(device, entity).map_err(|err| {
                    error!("open sub-device {} failed: {}", entity, err);
                    Error::MediaGraph(format!("{}: {}", entity.name, err))
                })?;
                if entity.name == media_name {
                    p1_subdevice = Some(Arc::clone(&subdev));
                }
                debug!("sensor {}: sub-device {}", self.sensor, entity);
                subdevices.push(subdev);
            }
        }

        let mask = nodes
            .iter()
            .filter_map(|node| node.id())
            .fold(SyncId::NONE, |mask, id| mask | sync_id_for_node(id));
        let sync = if mask.is_empty() {
            None
        } else {
            let mgr = RequestSyncManager::new(
                Arc::downgrade(&self.requests),
                device,
                mask,
                self.config.reserve_requests,
            )?;
            Some(Arc::new(mgr))
        };

        info!(
            "sensor {}: pipeline {} built with {} nodes, sync mask {}",
            self.sensor,
            tag,
            nodes.len(),
            mask
        );
        let device = guard.disarm();
        self.built = Some(Built {
            tag,
            device,
            entities,
            nodes,
            subdevices,
            p1_subdevice,
            sync,
        });
        Ok(())
    }

    pub fn sensor(&self) -> u32 {
        self.sensor
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn lazy_start(&self) -> bool {
        self.config.lazy_start
    }

    /// Tag of the built pipeline, `None` before [`build_links`].
    ///
    /// [`build_links`]: PipelineManager::build_links
    pub fn tag(&self) -> Option<PipeTag> {
        self.built.as_ref().map(|b| b.tag)
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn media_device(&self) -> Option<i32> {
        self.built.as_ref().map(|b| b.device)
    }

    fn built(&self) -> Result<&Built, Error> {
        self.built.as_ref().ok_or(Error::NotBuilt)
    }

    /// Appends every stream node to `nodes`, which must be empty.
    pub fn query_stream_nodes(&self, nodes: &mut Vec<Arc<StreamNode>>) -> Result<(), Error> {
        let built = self.built()?;
        if !nodes.is_empty() {
            return Err(Error::DestinationNotEmpty);
        }
        nodes.extend(built.nodes.iter().cloned());
        Ok(())
    }

    /// Appends every entity of the media graph to `entities`, which must be
    /// empty.
    pub fn query_media_entities(&self, entities: &mut Vec<MediaEntity>) -> Result<(), Error> {
        let built = self.built()?;
        if !entities.is_empty() {
            return Err(Error::DestinationNotEmpty);
        }
        entities.extend(built.entities.iter().cloned());
        Ok(())
    }

    pub fn stream_nodes(&self) -> &[Arc<StreamNode>] {
        self.built.as_ref().map_or(&[], |b| &b.nodes)
    }

    pub fn stream_node(&self, id: NodeId) -> Option<Arc<StreamNode>> {
        self.stream_nodes()
            .iter()
            .find(|node| node.id() == Some(id))
            .cloned()
    }

    pub fn p1_subdevice(&self) -> Option<Arc<dyn SubDeviceHandle>> {
        self.built.as_ref().and_then(|b| b.p1_subdevice.clone())
    }

    pub fn subdevice(&self, name: &str) -> Option<Arc<dyn SubDeviceHandle>> {
        self.built
            .as_ref()?
            .subdevices
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// The request manager shared by the synchronised nodes, `None` when no
    /// node of the pipeline takes part in request synchronisation.
    pub fn sync_req_mgr(&self) -> Option<Arc<RequestSyncManager>> {
        self.built.as_ref().and_then(|b| b.sync.clone())
    }

    pub fn enable_link(&self, link: &MediaLink<'_>) -> Result<(), Error> {
        let built = self.built()?;
        info!("sensor {}: enable link {}", self.sensor, link);
        self.media.enable_link(built.device, link)?;
        Ok(())
    }

    pub fn disable_link(&self, link: &MediaLink<'_>) -> Result<(), Error> {
        let built = self.built()?;
        info!("sensor {}: disable link {}", self.sensor, link);
        self.media.disable_link(built.device, link)?;
        Ok(())
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        if let Some(built) = self.built.take() {
            let device = built.device;
            drop(built);
            debug!("sensor {}: releasing media device {}", self.sensor, device);
            teardown(&*self.media, device);
        }
    }
}

/// Per-sensor cache of pipelines.
///
/// The registry only holds weak references: a pipeline lives as long as one
/// of its users keeps the returned [`Arc`].
pub struct PipelineRegistry {
    media: Arc<dyn MediaGraphController>,
    requests: Arc<dyn RequestAllocator>,
    config: PipelineConfig,
    pipelines: Mutex<[Weak<PipelineManager>; MAX_SENSORS as usize]>,
}

impl PipelineRegistry {
    pub fn new<B>(backend: Arc<B>, config: PipelineConfig) -> Self
    where
        B: MediaGraphController + RequestAllocator + 'static,
    {
        let media: Arc<dyn MediaGraphController> = backend.clone();
        let requests: Arc<dyn RequestAllocator> = backend;
        PipelineRegistry {
            media,
            requests,
            config,
            pipelines: Mutex::new(Default::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [Weak<PipelineManager>; MAX_SENSORS as usize]> {
        self.pipelines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the sensor's pipeline, building it with `tag` on first use.
    ///
    /// [`PipeTag::Unknown`] returns whatever pipeline already exists.
    pub fn get(&self, sensor: u32, tag: PipeTag) -> Result<Arc<PipelineManager>, Error> {
        if sensor >= MAX_SENSORS {
            error!("sensor index {} out of range", sensor);
            return Err(Error::InvalidSensor(sensor));
        }
        let mut pipelines = self.lock();
        let slot = &mut pipelines[sensor as usize];
        if let Some(existing) = slot.upgrade() {
            let current = existing.tag().unwrap_or_default();
            if tag == PipeTag::Unknown || tag == current {
                return Ok(existing);
            }
            error!(
                "sensor {}: pipeline {} exists, {} requested",
                sensor, current, tag
            );
            return Err(Error::PipelineMismatch {
                current,
                requested: tag,
            });
        }
        if tag == PipeTag::Unknown {
            return Err(Error::NotBuilt);
        }

        let mut pipe = PipelineManager::from_parts(
            sensor,
            Arc::clone(&self.media),
            Arc::clone(&self.requests),
            self.config,
        );
        pipe.build_links(tag)?;
        let pipe = Arc::new(pipe);
        *slot = Arc::downgrade(&pipe);
        Ok(pipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimMedia;
    use crate::stream_node::NodeState;

    #[test]
    fn test_pipe_tags() {
        assert!(PipeTag::Out2Tuning.is_tuning());
        assert!(!PipeTag::Out1.is_tuning());
        assert_eq!(PipeTag::Out1Tuning as u32, 0x10001);
        assert_eq!("OUT2-tuning".parse::<PipeTag>(), Ok(PipeTag::Out2Tuning));
        assert!("unknown".parse::<PipeTag>().is_err());
        assert_eq!(
            media_device_for(PipeTag::Out1Tuning),
            Some((MediaDeviceTag::P1Out1, "mtk-cam-p1", true))
        );
        assert_eq!(media_device_for(PipeTag::Unknown), None);
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::default();
        assert_eq!(config.reserve_requests, 16);
        assert_eq!(config.memory_type, MemoryType::DmaBuf);
        let config = config
            .with_reserve_requests(2)
            .with_buffer_pool_size(5)
            .with_lazy_start(true)
            .with_memory_type(MemoryType::UserPtr);
        assert_eq!(config.reserve_requests, 2);
        assert_eq!(config.buffer_pool_size, 5);
        assert!(config.lazy_start);
        assert_eq!(config.memory_type, MemoryType::UserPtr);
    }

    #[test]
    fn test_build_out2_tuning() {
        let media = Arc::new(SimMedia::new());
        let config = PipelineConfig::default()
            .with_reserve_requests(4)
            .with_memory_type(MemoryType::UserPtr);
        let mut pipe = PipelineManager::new(0, media.clone(), config);
        assert!(pipe.stream_nodes().is_empty());
        pipe.build_links(PipeTag::Out2Tuning).unwrap();

        assert_eq!(pipe.tag(), Some(PipeTag::Out2Tuning));
        assert_eq!(pipe.stream_nodes().len(), 7);
        assert!(pipe
            .stream_nodes()
            .iter()
            .all(|n| n.state() == NodeState::Open && n.memory_type() == MemoryType::UserPtr));
        assert!(pipe.p1_subdevice().is_some());
        assert!(pipe.stream_node(NodeId::P1PackedOut).is_some());

        let sync = pipe.sync_req_mgr().unwrap();
        assert_eq!(sync.mask().bits(), 0x7f);
        assert_eq!(sync.records().len(), 4);
        assert_eq!(media.stats().allocated, 4);

        assert!(matches!(
            pipe.build_links(PipeTag::Out1),
            Err(Error::AlreadyBuilt)
        ));
    }

    #[test]
    fn test_build_out1_plain() {
        let media = Arc::new(SimMedia::new());
        let mut pipe = PipelineManager::new(1, media, PipelineConfig::default());
        pipe.build_links(PipeTag::Out1).unwrap();
        let names: Vec<&str> = pipe.stream_nodes().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["mtk-cam-p1 main stream"]);
        assert_eq!(pipe.sync_req_mgr().unwrap().mask(), SyncId::MAIN_STREAM);
    }

    #[test]
    fn test_unknown_tag() {
        let media = Arc::new(SimMedia::new());
        let mut pipe = PipelineManager::new(0, media.clone(), PipelineConfig::default());
        assert!(matches!(
            pipe.build_links(PipeTag::Unknown),
            Err(Error::UnknownPipeline(PipeTag::Unknown))
        ));
        assert!(!pipe.is_built());
        assert_eq!(media.stats().opened, 0);
    }

    #[test]
    fn test_queries() {
        let media = Arc::new(SimMedia::new());
        let mut pipe = PipelineManager::new(0, media, PipelineConfig::default());
        let mut nodes = Vec::new();
        assert!(matches!(
            pipe.query_stream_nodes(&mut nodes),
            Err(Error::NotBuilt)
        ));
        pipe.build_links(PipeTag::Out2).unwrap();
        pipe.query_stream_nodes(&mut nodes).unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(matches!(
            pipe.query_stream_nodes(&mut nodes),
            Err(Error::DestinationNotEmpty)
        ));

        let mut entities = Vec::new();
        pipe.query_media_entities(&mut entities).unwrap();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities.iter().filter(|e| e.is_video()).count(), 2);
    }

    #[test]
    fn test_failed_build_rolls_back() {
        let media = Arc::new(SimMedia::new());
        media.fail_open("mtk-cam-p1 packed out");
        let mut pipe = PipelineManager::new(0, media.clone(), PipelineConfig::default());
        assert!(matches!(
            pipe.build_links(PipeTag::Out2),
            Err(Error::MediaGraph(_))
        ));
        assert!(!pipe.is_built());
        let stats = media.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.reset, 1);
        assert_eq!(stats.closed, 1);
    }

    #[test]
    fn test_negative_device_index() {
        let media = Arc::new(SimMedia::new().with_device_index(-19));
        let mut pipe = PipelineManager::new(0, media.clone(), PipelineConfig::default());
        assert!(matches!(
            pipe.build_links(PipeTag::Out1),
            Err(Error::MediaGraph(_))
        ));
        assert_eq!(media.stats().reset, 0);
    }

    #[test]
    fn test_drop_releases_media_device() {
        let media = Arc::new(SimMedia::new());
        let mut pipe = PipelineManager::new(0, media.clone(), PipelineConfig::default());
        pipe.build_links(PipeTag::Out1Tuning).unwrap();
        let device = pipe.media_device().unwrap();
        assert_eq!(media.open_devices(), vec![device]);
        drop(pipe);
        let stats = media.stats();
        assert_eq!(stats.reset, 1);
        assert_eq!(stats.closed, 1);
        assert!(media.open_devices().is_empty());
    }

    #[test]
    fn test_link_pass_through() {
        let media = Arc::new(SimMedia::new());
        let mut pipe = PipelineManager::new(0, media.clone(), PipelineConfig::default());
        let link = MediaLink::new("mtk-cam-p1", 2, "mtk-cam-p1 packed out", 0);
        assert!(matches!(pipe.disable_link(&link), Err(Error::NotBuilt)));
        pipe.build_links(PipeTag::Out2).unwrap();
        let device = pipe.media_device().unwrap();
        assert!(media.links(device).contains(&link.to_string()));
        pipe.disable_link(&link).unwrap();
        assert!(!media.links(device).contains(&link.to_string()));
        pipe.enable_link(&link).unwrap();
        assert!(media.links(device).contains(&link.to_string()));
    }

    #[test]
    fn test_registry() {
        let media = Arc::new(SimMedia::new());
        let registry = PipelineRegistry::new(media, PipelineConfig::default());
        assert!(matches!(
            registry.get(MAX_SENSORS, PipeTag::Out1),
            Err(Error::InvalidSensor(4))
        ));
        assert!(matches!(
            registry.get(0, PipeTag::Unknown),
            Err(Error::NotBuilt)
        ));

        let pipe = registry.get(0, PipeTag::Out2).unwrap();
        let same = registry.get(0, PipeTag::Out2).unwrap();
        assert!(Arc::ptr_eq(&pipe, &same));
        let any = registry.get(0, PipeTag::Unknown).unwrap();
        assert!(Arc::ptr_eq(&pipe, &any));
        assert!(matches!(
            registry.get(0, PipeTag::Out1),
            Err(Error::PipelineMismatch {
                current: PipeTag::Out2,
                requested: PipeTag::Out1
            })
        ));

        let other = registry.get(1, PipeTag::Out1).unwrap();
        assert_eq!(other.sensor(), 1);

        drop((pipe, same, any));
        let rebuilt = registry.get(0, PipeTag::Out1).unwrap();
        assert_eq!(rebuilt.tag(), Some(PipeTag::Out1));
    }
}
