//! Real-time mix core
//!
//! - Audio buffers and the pre-allocated buffer pool
//! - Pool maintenance queues between the control and audio contexts
//! - Mix engine (per-block rendering, master bus, statistics)
//! - Transport state machine and block timing
//! - Track list snapshots and the media seams
//! - Offline rendering and WAV export

pub mod buffer;
pub mod context;
pub mod io;
pub mod maintenance;
pub mod media;
pub mod mixer;
pub mod pool;
pub mod processor;
pub mod settings;
pub mod stats;
pub mod tracks;
pub mod transport;

pub use buffer::{db_to_linear, linear_to_db, AudioBuffer};
pub use context::EngineContext;
pub use io::{export_wav, render_offline, ExportFormat};
pub use maintenance::{PoolMaintenance, PoolRequest};
pub use media::ToneItem;
pub use mixer::{apply_fade, pan_to_gain_left, pan_to_gain_right, BlockSources, MixEngine};
pub use pool::{BufferPool, PooledBuffer};
pub use processor::EngineProcessor;
pub use settings::{MixSettings, MixSnapshot};
pub use stats::PerformanceStats;
pub use tracks::{
    MediaItem, MediaMap, MediaSource, Track, TrackControls, TrackId, TrackList, TrackListReader,
    TrackSource,
};
pub use transport::{
    BlockTiming, LoopRegion, LoopWrap, PlayState, TimeFormat, TransportCoordinator,
    TransportState,
};
