//! Tracks and the seams to the media subsystem
//!
//! The control context edits a [`TrackList`]; every edit publishes a new
//! immutable snapshot through an `ArcSwap`. The real-time context reads the
//! current snapshot through a [`TrackListReader`] once per block and never
//! blocks or frees memory doing so. Replaced snapshots are parked in the
//! control-side `TrackList` and dropped there once no reader holds them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::buffer::AudioBuffer;
use super::settings::{AtomicF32, MAX_MASTER_VOLUME};
use crate::error::{NuevaError, Result};

/// An immutable, shareable view of the track list
pub type TrackSnapshot = Arc<Vec<Track>>;

// ============================================================================
// Media Seams
// ============================================================================

/// Audio placed on a track's timeline
///
/// Implementations render into a buffer supplied by the mix engine and must
/// not allocate, lock or block in [`MediaItem::process_audio`].
pub trait MediaItem: Send + Sync {
    /// Whether the item has audio anywhere in `[start, end)`, in seconds
    fn overlaps_time_range(&self, start: f64, end: f64) -> bool;

    /// Add this item's audio for the block starting at `start_time`
    ///
    /// `length` is the block duration in seconds. Sample `i` of `buffer`
    /// corresponds to `start_time + i / buffer.sample_rate()`.
    fn process_audio(&self, buffer: &mut AudioBuffer, start_time: f64, length: f64);
}

/// Lookup from a track to the media items placed on it
pub trait MediaSource {
    /// Items on `track`; empty when the track is unknown
    fn items_on_track(&self, track: TrackId) -> &[Arc<dyn MediaItem>];
}

/// Anything that can hand the mix engine the current track list
pub trait TrackSource {
    /// Tracks in mix order
    ///
    /// The snapshot stays valid for as long as the caller holds it.
    fn all_tracks(&self) -> TrackSnapshot;
}

/// Media source backed by a map from track to items
#[derive(Default)]
pub struct MediaMap {
    items: HashMap<TrackId, Vec<Arc<dyn MediaItem>>>,
}

impl MediaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `item` on `track`
    pub fn add_item(&mut self, track: TrackId, item: Arc<dyn MediaItem>) {
        self.items.entry(track).or_default().push(item);
    }

    /// Drop every item on `track`, returning how many there were
    pub fn clear_track(&mut self, track: TrackId) -> usize {
        self.items.remove(&track).map_or(0, |items| items.len())
    }

    /// Total number of placed items
    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MediaSource for MediaMap {
    fn items_on_track(&self, track: TrackId) -> &[Arc<dyn MediaItem>] {
        self.items.get(&track).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl fmt::Debug for MediaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaMap")
            .field("tracks", &self.items.len())
            .field("items", &self.len())
            .finish()
    }
}

// ============================================================================
// Track
// ============================================================================

/// Stable track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-track mix parameters, adjustable while the engine runs
#[derive(Debug)]
pub struct TrackControls {
    volume: AtomicF32,
    pan: AtomicF32,
    mute: AtomicBool,
    solo: AtomicBool,
}

/// Plain copy of [`TrackControls`] read at the start of a track's mix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackMix {
    pub volume: f32,
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
}

impl TrackControls {
    pub fn new() -> Self {
        Self {
            volume: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.0),
            mute: AtomicBool::new(false),
            solo: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> TrackMix {
        TrackMix {
            volume: self.volume.load(),
            pan: self.pan.load(),
            mute: self.mute(),
            solo: self.solo(),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    /// Linear volume, clamped to `0..=2`; non-finite values are ignored
    pub fn set_volume(&self, volume: f32) {
        if volume.is_finite() {
            self.volume.store(volume.clamp(0.0, MAX_MASTER_VOLUME));
        }
    }

    pub fn pan(&self) -> f32 {
        self.pan.load()
    }

    /// Pan position, clamped to `-1..=1`; non-finite values are ignored
    pub fn set_pan(&self, pan: f32) {
        if pan.is_finite() {
            self.pan.store(pan.clamp(-1.0, 1.0));
        }
    }

    pub fn mute(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Relaxed);
    }

    pub fn solo(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }

    pub fn set_solo(&self, solo: bool) {
        self.solo.store(solo, Ordering::Relaxed);
    }
}

impl Default for TrackControls {
    fn default() -> Self {
        Self::new()
    }
}

/// A track as seen by the mix engine
///
/// Cloning is cheap; clones share the same [`TrackControls`].
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    name: Arc<str>,
    controls: Arc<TrackControls>,
}

impl Track {
    pub fn new(name: &str) -> Self {
        Self {
            id: TrackId::new(),
            name: Arc::from(name),
            controls: Arc::new(TrackControls::new()),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn controls(&self) -> &TrackControls {
        &self.controls
    }
}

// ============================================================================
// Track List
// ============================================================================

/// Control-side owner of the published track list
///
/// # Example
/// ```
/// use nueva_rt::engine::{TrackList, TrackSource};
///
/// let mut tracks = TrackList::new();
/// let reader = tracks.reader();
/// let drums = tracks.add_track("Drums");
/// tracks.add_track("Bass");
/// assert_eq!(reader.all_tracks().len(), 2);
///
/// tracks.remove(drums).unwrap();
/// assert_eq!(reader.all_tracks()[0].name(), "Bass");
/// ```
pub struct TrackList {
    published: Arc<ArcSwap<Vec<Track>>>,
    retired: Vec<TrackSnapshot>,
}

impl TrackList {
    pub fn new() -> Self {
        Self {
            published: Arc::new(ArcSwap::from_pointee(Vec::new())),
            retired: Vec::new(),
        }
    }

    /// A handle the real-time context can read snapshots through
    pub fn reader(&self) -> TrackListReader {
        TrackListReader {
            published: Arc::clone(&self.published),
        }
    }

    /// Current snapshot
    pub fn tracks(&self) -> TrackSnapshot {
        self.published.load_full()
    }

    pub fn len(&self) -> usize {
        self.published.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `track` to the end of the mix order
    pub fn add(&mut self, track: Track) -> TrackId {
        let id = track.id();
        debug!("[TRACKS] Adding '{}' ({id})", track.name());
        self.publish(|tracks| tracks.push(track));
        id
    }

    /// Create and append a track named `name`
    pub fn add_track(&mut self, name: &str) -> TrackId {
        self.add(Track::new(name))
    }

    /// Remove a track, returning it
    pub fn remove(&mut self, id: TrackId) -> Result<Track> {
        let index = self.index_of(id)?;
        let mut removed = None;
        self.publish(|tracks| removed = Some(tracks.remove(index)));
        removed.ok_or_else(|| not_found(id))
    }

    /// Remove every track
    pub fn clear(&mut self) {
        self.publish(Vec::clear);
    }

    /// Move a track to `new_index`, clamped to the end of the list
    pub fn move_track(&mut self, id: TrackId, new_index: usize) -> Result<()> {
        let index = self.index_of(id)?;
        self.publish(|tracks| {
            let track = tracks.remove(index);
            let target = new_index.min(tracks.len());
            tracks.insert(target, track);
        });
        Ok(())
    }

    /// Look a track up by id
    pub fn get(&self, id: TrackId) -> Option<Track> {
        self.published
            .load()
            .iter()
            .find(|track| track.id() == id)
            .cloned()
    }

    /// Whether any track is soloed
    pub fn any_soloed(&self) -> bool {
        self.published
            .load()
            .iter()
            .any(|track| track.controls().solo())
    }

    /// Drop retired snapshots no reader still holds
    ///
    /// Runs after every edit; call it periodically from the control context
    /// to reclaim snapshots that were still in use at the time.
    pub fn collect_garbage(&mut self) -> usize {
        let before = self.retired.len();
        self.retired.retain(|snapshot| Arc::strong_count(snapshot) > 1);
        before - self.retired.len()
    }

    /// Snapshots waiting for their readers to let go
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    fn index_of(&self, id: TrackId) -> Result<usize> {
        self.published
            .load()
            .iter()
            .position(|track| track.id() == id)
            .ok_or_else(|| not_found(id))
    }

    fn publish(&mut self, edit: impl FnOnce(&mut Vec<Track>)) {
        let mut next = Vec::clone(&self.published.load());
        edit(&mut next);
        let previous = self.published.swap(Arc::new(next));
        self.retired.push(previous);
        self.collect_garbage();
    }
}

impl Default for TrackList {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackSource for TrackList {
    fn all_tracks(&self) -> TrackSnapshot {
        self.tracks()
    }
}

impl fmt::Debug for TrackList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackList")
            .field("tracks", &self.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

fn not_found(id: TrackId) -> NuevaError {
    NuevaError::TrackNotFound {
        track_id: id.to_string(),
    }
}

/// Real-time side of a [`TrackList`]
#[derive(Clone)]
pub struct TrackListReader {
    published: Arc<ArcSwap<Vec<Track>>>,
}

impl TrackSource for TrackListReader {
    fn all_tracks(&self) -> TrackSnapshot {
        self.published.load_full()
    }
}

impl fmt::Debug for TrackListReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackListReader")
            .field("tracks", &self.published.load().len())
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
