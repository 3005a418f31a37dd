//! Pool maintenance from the control context
//!
//! The pool lives inside the [`super::MixEngine`] the host callback owns, so
//! the control context cannot touch it directly while blocks run. Instead it
//! posts [`PoolRequest`]s over a wait-free `rtrb` queue. The mix engine
//! services them at the start of the next block and sends every buffer it
//! takes out of the pool back over a second queue. The control context drops
//! those, so neither allocation nor deallocation happens on the audio thread.
//!
//! ```
//! use nueva_rt::config::EngineConfig;
//! use nueva_rt::engine::{EngineContext, MixEngine};
//!
//! let ctx = EngineContext::new(EngineConfig::default()).unwrap();
//! let mut mixer = MixEngine::new(ctx);
//! mixer.initialize().unwrap();
//! let mut maintenance = mixer.maintenance_handle();
//!
//! assert_eq!(maintenance.top_up(2), 2);
//! let mut out = vec![0.0f32; 64];
//! mixer.process_block(None, &mut [&mut out[..]], 64);
//! assert_eq!(mixer.pool().pool_size(), 6);
//! ```

use log::debug;
use rtrb::{Consumer, Producer, RingBuffer};

use super::buffer::AudioBuffer;
use super::pool::BufferPool;
use crate::config::EngineConfig;

/// Requests that can be in flight at once
pub const MAINTENANCE_QUEUE_CAPACITY: usize = 64;

/// Work the audio thread performs on its pool between blocks
pub enum PoolRequest {
    /// Hand back free buffers idle for at least `idle_frames` blocks,
    /// keeping at least `keep` live slots
    Reclaim { idle_frames: u64, keep: usize },
    /// Add a buffer allocated on the control context as a free slot
    Adopt(Box<AudioBuffer>),
}

/// Control-side end of the maintenance queues
pub struct PoolMaintenance {
    requests: Producer<PoolRequest>,
    returns: Consumer<Box<AudioBuffer>>,
    num_channels: usize,
    block_size: usize,
    sample_rate: f64,
    idle_frames: u64,
    floor: usize,
}

/// Audio-side end of the maintenance queues, owned by the mix engine
pub(crate) struct MaintenanceEndpoint {
    requests: Consumer<PoolRequest>,
    returns: Producer<Box<AudioBuffer>>,
}

/// Build a connected pair of maintenance ends for a pool shaped by `config`
pub(crate) fn maintenance_channel(
    config: &EngineConfig,
) -> (PoolMaintenance, MaintenanceEndpoint) {
    let (request_tx, request_rx) = RingBuffer::new(MAINTENANCE_QUEUE_CAPACITY);
    // room for every live slot plus every adopt that could bounce
    let (return_tx, return_rx) =
        RingBuffer::new(config.max_buffers + MAINTENANCE_QUEUE_CAPACITY);

    let control = PoolMaintenance {
        requests: request_tx,
        returns: return_rx,
        num_channels: config.channels,
        block_size: config.block_size,
        sample_rate: config.sample_rate,
        idle_frames: config.pool_idle_frames,
        floor: config.preallocated_buffers,
    };
    let endpoint = MaintenanceEndpoint {
        requests: request_rx,
        returns: return_tx,
    };
    (control, endpoint)
}

impl PoolMaintenance {
    /// Ask for free buffers idle for at least `idle_frames` blocks, keeping
    /// `keep` live slots
    ///
    /// Returns `false` when the request queue is full.
    pub fn reclaim(&mut self, idle_frames: u64, keep: usize) -> bool {
        self.requests
            .push(PoolRequest::Reclaim { idle_frames, keep })
            .is_ok()
    }

    /// Reclaim with the configured idle threshold and warm-up floor
    pub fn reclaim_idle(&mut self) -> bool {
        self.reclaim(self.idle_frames, self.floor)
    }

    /// Allocate up to `count` buffers at the configured block shape and post
    /// them for adoption
    ///
    /// Returns how many were posted. Buffers the pool has no room for come
    /// back through [`PoolMaintenance::collect`].
    pub fn top_up(&mut self, count: usize) -> usize {
        let mut posted = 0;
        while posted < count && self.requests.slots() > 0 {
            let buffer = Box::new(AudioBuffer::with_sample_rate(
                self.num_channels,
                self.block_size,
                self.sample_rate,
            ));
            if self.requests.push(PoolRequest::Adopt(buffer)).is_err() {
                break;
            }
            posted += 1;
        }
        posted
    }

    /// Drop every buffer the audio thread has handed back
    pub fn collect(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(buffer) = self.returns.pop() {
            drop(buffer);
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Pool maintenance released {dropped} buffers");
        }
        dropped
    }

    /// Requests posted but not yet serviced
    pub fn pending(&self) -> usize {
        MAINTENANCE_QUEUE_CAPACITY - self.requests.slots()
    }
}

impl MaintenanceEndpoint {
    /// Apply pending requests to `pool`; real-time safe
    ///
    /// A request is only taken while the return queue has room, so nothing
    /// is ever dropped here.
    pub(crate) fn service(&mut self, pool: &mut BufferPool) -> usize {
        let mut serviced = 0;
        while self.returns.slots() > 0 {
            let Ok(request) = self.requests.pop() else {
                break;
            };
            match request {
                PoolRequest::Reclaim { idle_frames, keep } => {
                    while self.returns.slots() > 0 {
                        let Some(buffer) = pool.take_idle(idle_frames, keep) else {
                            break;
                        };
                        let _ = self.returns.push(buffer);
                    }
                }
                PoolRequest::Adopt(buffer) => {
                    if let Err(buffer) = pool.adopt(buffer) {
                        let _ = self.returns.push(buffer);
                    }
                }
            }
            serviced += 1;
        }
        serviced
    }
}
