// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, error, info, warn};

use crate::stream_node::NodeId;
use crate::v4l2::RequestAllocator;
use crate::Error;

/// Records allocated up front when no reserve count is given.
pub const DEFAULT_RESERVE: usize = 16;

/// Caller roles taking part in one media request, as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SyncId(u32);

impl SyncId {
    pub const NONE: SyncId = SyncId(0);
    pub const MAIN_STREAM: SyncId = SyncId(0x01);
    pub const PACKED_OUT: SyncId = SyncId(0x02);
    pub const TUNING: SyncId = SyncId(0x04);
    pub const META0: SyncId = SyncId(0x08);
    pub const META1: SyncId = SyncId(0x10);
    pub const META2: SyncId = SyncId(0x20);
    pub const META3: SyncId = SyncId(0x40);

    pub const fn from_bits(bits: u32) -> Self {
        SyncId(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: SyncId) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SyncId {
    type Output = SyncId;

    fn bitor(self, rhs: SyncId) -> SyncId {
        SyncId(self.0 | rhs.0)
    }
}

impl BitOrAssign for SyncId {
    fn bitor_assign(&mut self, rhs: SyncId) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncId({:#x})", self.0)
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Node → request role. Nodes without an entry never join a request.
pub static SYNC_TABLE: &[(NodeId, SyncId)] = &[
    (NodeId::P1MainStream, SyncId::MAIN_STREAM),
    (NodeId::P1PackedOut, SyncId::PACKED_OUT),
    (NodeId::P1MetaInput, SyncId::TUNING),
    (NodeId::P1Meta0, SyncId::META0),
    (NodeId::P1Meta1, SyncId::META1),
    (NodeId::P1Meta2, SyncId::META2),
    (NodeId::P1Meta3, SyncId::META3),
];

pub fn sync_id_for_node(id: NodeId) -> SyncId {
    SYNC_TABLE
        .iter()
        .find(|(node, _)| *node == id)
        .map_or(SyncId::NONE, |&(_, sync)| sync)
}

/// Snapshot of one request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    pub magic_num: u32,
    pub fd: RawFd,
    pub in_use: SyncId,
    pub done: SyncId,
    pub notified: SyncId,
}

struct Record {
    magic_num: u32,
    fd: OwnedFd,
    in_use: SyncId,
    done: SyncId,
    notified: SyncId,
}

impl Record {
    fn new(magic_num: u32, fd: OwnedFd) -> Self {
        Record {
            magic_num,
            fd,
            in_use: SyncId::NONE,
            done: SyncId::NONE,
            notified: SyncId::NONE,
        }
    }
}

struct Inner {
    records: Vec<Record>,
    counter: u32,
}

impl Inner {
    fn next_magic(&mut self) -> u32 {
        let magic = self.counter;
        self.counter = match self.counter.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        magic
    }

    fn by_fd(&self, fd: RawFd) -> Option<usize> {
        self.records.iter().position(|r| r.fd.as_raw_fd() == fd)
    }

    fn by_magic(&self, magic_num: u32) -> Option<usize> {
        self.records.iter().position(|r| r.magic_num == magic_num)
    }
}

/// Pool of media request fds shared by the nodes of one pipeline.
///
/// Every frame cycle is identified by a magic number bound to one request
/// fd. Each caller role marks the record in use when it attaches a buffer,
/// notified once its buffer is enqueued and done once the buffer came back.
/// The request is queued to the kernel exactly once, when the last role of
/// the mask notifies, and the record is recycled under a new magic number
/// when the last role is done.
pub struct RequestSyncManager {
    allocator: Weak<dyn RequestAllocator>,
    device: i32,
    mask: SyncId,
    inner: Mutex<Inner>,
}

impl fmt::Debug for RequestSyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSyncManager")
            .field("device", &self.device)
            .field("mask", &self.mask)
            .field("records", &self.lock().records.len())
            .finish()
    }
}

impl RequestSyncManager {
    /// Creates the manager and allocates `reserve` request fds.
    pub fn new(
        allocator: Weak<dyn RequestAllocator>,
        device: i32,
        mask: SyncId,
        reserve: usize,
    ) -> Result<Self, Error> {
        let mut inner = Inner {
            records: Vec::with_capacity(reserve),
            counter: 1,
        };
        let alloc = upgrade(&allocator)?;
        for _ in 0..reserve {
            let fd = alloc.allocate_request(device)?;
            let magic = inner.next_magic();
            inner.records.push(Record::new(magic, fd));
        }
        info!(
            "request manager for device {} with mask {} reserved {} requests",
            device, mask, reserve
        );
        Ok(RequestSyncManager {
            allocator,
            device,
            mask,
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every role that must finish before a request is queued or recycled.
    pub fn mask(&self) -> SyncId {
        self.mask
    }

    pub fn is_enable_request_api(&self, sync_id: SyncId) -> bool {
        !sync_id.is_empty() && self.mask.contains(sync_id)
    }

    pub fn records(&self) -> Vec<RequestRecord> {
        self.lock()
            .records
            .iter()
            .map(|r| RequestRecord {
                magic_num: r.magic_num,
                fd: r.fd.as_raw_fd(),
                in_use: r.in_use,
                done: r.done,
                notified: r.notified,
            })
            .collect()
    }

    /// Marks the record of `fd` in use by `caller` and returns its magic
    /// number.
    pub fn acquire_magic_num(&self, caller: SyncId, fd: RawFd) -> Option<u32> {
        let mut inner = self.lock();
        let Some(idx) = inner.by_fd(fd) else {
            error!("no request record for fd {}", fd);
            return None;
        };
        let record = &mut inner.records[idx];
        record.in_use |= caller;
        Some(record.magic_num)
    }

    /// Marks the record of `magic_num` in use by `caller` and returns its
    /// request fd.
    pub fn acquire_request_api(&self, caller: SyncId, magic_num: u32) -> Option<RawFd> {
        let mut inner = self.lock();
        let Some(idx) = inner.by_magic(magic_num) else {
            error!("no request record for magic number {}", magic_num);
            return None;
        };
        let record = &mut inner.records[idx];
        record.in_use |= caller;
        Some(record.fd.as_raw_fd())
    }

    /// Returns the magic number of the first record `caller` is not using,
    /// allocating a new request when every record is taken.
    ///
    /// `caller` must name at least one role.
    pub fn acquire_available_magic_num(&self, caller: SyncId) -> Result<u32, Error> {
        if caller.is_empty() {
            return Err(Error::InvalidCaller(caller));
        }
        let mut inner = self.lock();
        if let Some(record) = inner
            .records
            .iter_mut()
            .find(|r| !r.in_use.contains(caller))
        {
            record.in_use |= caller;
            return Ok(record.magic_num);
        }

        let fd = upgrade(&self.allocator)?.allocate_request(self.device)?;
        let magic = inner.next_magic();
        let mut record = Record::new(magic, fd);
        record.in_use |= caller;
        inner.records.push(record);
        debug!(
            "request pool grown to {} records for {}",
            inner.records.len(),
            caller
        );
        Ok(magic)
    }

    /// Marks the record of `fd` done for `caller` and returns its magic
    /// number. Returns `None` if the record is unknown or not in use.
    pub fn validate_magic_num(&self, caller: SyncId, fd: RawFd) -> Option<u32> {
        let mut inner = self.lock();
        let idx = inner.by_fd(fd)?;
        self.validate(&mut inner, idx, caller)
            .map(|record| record.magic_num)
    }

    /// Marks the record of `magic_num` done for `caller` and returns its
    /// request fd. Returns `None` if the record is unknown or not in use.
    pub fn validate_request_api(&self, caller: SyncId, magic_num: u32) -> Option<RawFd> {
        let mut inner = self.lock();
        let idx = inner.by_magic(magic_num)?;
        self.validate(&mut inner, idx, caller).map(|record| record.fd)
    }

    fn validate(&self, inner: &mut Inner, idx: usize, caller: SyncId) -> Option<RequestRecord> {
        let record = &mut inner.records[idx];
        if record.in_use.is_empty() {
            warn!(
                "request {} (fd {}) validated by {} before use",
                record.magic_num,
                record.fd.as_raw_fd(),
                caller
            );
            return None;
        }
        if record.done.contains(caller) {
            warn!(
                "request {} already validated by {}",
                record.magic_num, caller
            );
        }
        record.in_use |= caller;
        record.done |= caller;
        let snapshot = RequestRecord {
            magic_num: record.magic_num,
            fd: record.fd.as_raw_fd(),
            in_use: record.in_use,
            done: record.done,
            notified: record.notified,
        };
        if record.done.contains(self.mask) {
            self.retire(inner, idx);
        }
        Some(snapshot)
    }

    fn retire(&self, inner: &mut Inner, idx: usize) {
        let record = inner.records.remove(idx);
        match self.allocator.upgrade() {
            Some(alloc) => {
                if let Err(err) = alloc.reinit_request(self.device, record.fd.as_fd()) {
                    error!(
                        "reinit of request fd {} failed: {}",
                        record.fd.as_raw_fd(),
                        err
                    );
                }
            }
            None => error!("request allocator is gone, fd {} not reinitialised", record.fd.as_raw_fd()),
        }
        let magic = inner.next_magic();
        debug!(
            "request {} retired, fd {} reused as {}",
            record.magic_num,
            record.fd.as_raw_fd(),
            magic
        );
        inner.records.push(Record::new(magic, record.fd));
    }

    pub fn notify_enqueued_by_magic_num(&self, caller: SyncId, magic_num: u32) -> Result<(), Error> {
        let mut inner = self.lock();
        let idx = inner.by_magic(magic_num).ok_or_else(|| {
            error!("notify for unknown magic number {}", magic_num);
            Error::RecordNotFound
        })?;
        self.notify(&mut inner, idx, caller)
    }

    pub fn notify_enqueued_by_request_api(&self, caller: SyncId, fd: RawFd) -> Result<(), Error> {
        let mut inner = self.lock();
        let idx = inner.by_fd(fd).ok_or_else(|| {
            error!("notify for unknown request fd {}", fd);
            Error::RecordNotFound
        })?;
        self.notify(&mut inner, idx, caller)
    }

    fn notify(&self, inner: &mut Inner, idx: usize, caller: SyncId) -> Result<(), Error> {
        let record = &mut inner.records[idx];
        if record.notified.contains(caller) {
            warn!(
                "request {} already notified by {}",
                record.magic_num, caller
            );
            return Ok(());
        }
        let was_full = record.notified.contains(self.mask);
        record.notified |= caller;
        if was_full || !record.notified.contains(self.mask) {
            return Ok(());
        }

        let alloc = upgrade(&self.allocator)?;
        alloc
            .queue_request(self.device, record.fd.as_fd())
            .map_err(|err| {
                error!(
                    "queue of request {} (fd {}) failed: {}",
                    record.magic_num,
                    record.fd.as_raw_fd(),
                    err
                );
                Error::Io(err)
            })?;
        debug!(
            "request {} (fd {}) queued",
            record.magic_num,
            record.fd.as_raw_fd()
        );
        Ok(())
    }

    /// Releases `caller` from the cycle of `magic_num` without queueing.
    ///
    /// The caller's in-use, done and notified bits are set. The record is
    /// recycled if that completes the done mask. The kernel request itself
    /// is left as it is.
    pub fn abort_cycle(&self, caller: SyncId, magic_num: u32) -> Result<(), Error> {
        let mut inner = self.lock();
        let idx = inner.by_magic(magic_num).ok_or(Error::RecordNotFound)?;
        let record = &mut inner.records[idx];
        warn!("request {} aborted by {}", record.magic_num, caller);
        record.in_use |= caller;
        record.done |= caller;
        record.notified |= caller;
        if record.done.contains(self.mask) {
            self.retire(&mut inner, idx);
        }
        Ok(())
    }
}

impl Drop for RequestSyncManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        info!("closing {} request fds", inner.records.len());
        inner.records.clear();
    }
}

fn upgrade(allocator: &Weak<dyn RequestAllocator>) -> Result<Arc<dyn RequestAllocator>, Error> {
    allocator.upgrade().ok_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "request allocator dropped",
        ))
    })
}
