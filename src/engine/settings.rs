//! Lock-free scalar settings shared between the control and real-time
//! contexts.
//!
//! Floats are stored as their bit patterns in unsigned atomics. The real-time
//! side only loads; the control side only stores. Relaxed ordering is enough
//! because every value is independent and a one-block-stale read is fine.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Upper bound of the master volume (linear, about +6 dB)
pub const MAX_MASTER_VOLUME: f32 = 2.0;

/// An `f32` that can be shared across threads without locking
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// An `f64` that can be shared across threads without locking
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Store `new` only if the current value is still `current`
    ///
    /// Compares bit patterns, so it is exact for every non-NaN value.
    #[inline]
    pub fn compare_exchange(&self, current: f64, new: f64) -> Result<f64, f64> {
        self.0
            .compare_exchange(
                current.to_bits(),
                new.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(f64::from_bits)
            .map_err(f64::from_bits)
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Master bus and monitoring settings
///
/// Written from the control context, read once per block by the mix engine.
#[derive(Debug)]
pub struct MixSettings {
    master_volume: AtomicF32,
    master_pan: AtomicF32,
    master_mute: AtomicBool,
    input_monitoring: AtomicBool,
}

/// Plain copy of [`MixSettings`] taken at the start of a block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixSnapshot {
    pub master_volume: f32,
    pub master_pan: f32,
    pub master_mute: bool,
    pub input_monitoring: bool,
}

impl MixSettings {
    pub fn new(input_monitoring: bool) -> Self {
        Self {
            master_volume: AtomicF32::new(1.0),
            master_pan: AtomicF32::new(0.0),
            master_mute: AtomicBool::new(false),
            input_monitoring: AtomicBool::new(input_monitoring),
        }
    }

    /// Read every setting once
    pub fn snapshot(&self) -> MixSnapshot {
        MixSnapshot {
            master_volume: self.master_volume(),
            master_pan: self.master_pan(),
            master_mute: self.master_mute(),
            input_monitoring: self.input_monitoring(),
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume.load()
    }

    /// Store a linear master volume, clamped to `0..=2`
    pub fn set_master_volume(&self, volume: f32) {
        self.master_volume.store(volume.clamp(0.0, MAX_MASTER_VOLUME));
    }

    pub fn master_pan(&self) -> f32 {
        self.master_pan.load()
    }

    /// Store a master pan position, clamped to `-1..=1`
    pub fn set_master_pan(&self, pan: f32) {
        self.master_pan.store(pan.clamp(-1.0, 1.0));
    }

    pub fn master_mute(&self) -> bool {
        self.master_mute.load(Ordering::Relaxed)
    }

    pub fn set_master_mute(&self, mute: bool) {
        self.master_mute.store(mute, Ordering::Relaxed);
    }

    /// Flip the master mute and return the new state
    pub fn toggle_master_mute(&self) -> bool {
        !self.master_mute.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn input_monitoring(&self) -> bool {
        self.input_monitoring.load(Ordering::Relaxed)
    }

    pub fn set_input_monitoring(&self, enabled: bool) {
        self.input_monitoring.store(enabled, Ordering::Relaxed);
    }
}

impl Default for MixSettings {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_float_round_trip() {
        let value = AtomicF32::new(0.25);
        assert_eq!(value.load(), 0.25);
        value.store(-1.5);
        assert_eq!(value.load(), -1.5);
    }

    #[test]
    fn test_compare_exchange_detects_concurrent_store() {
        let position = AtomicF64::new(1.0);
        assert_eq!(position.compare_exchange(1.0, 2.0), Ok(1.0));
        position.store(10.0);
        assert_eq!(position.compare_exchange(2.0, 3.0), Err(10.0));
        assert_eq!(position.load(), 10.0);
    }

    #[test]
    fn test_master_settings_clamp() {
        let settings = MixSettings::default();
        settings.set_master_volume(3.5);
        assert_eq!(settings.master_volume(), 2.0);
        settings.set_master_volume(-1.0);
        assert_eq!(settings.master_volume(), 0.0);
        settings.set_master_pan(-4.0);
        assert_eq!(settings.master_pan(), -1.0);
    }

    #[test]
    fn test_toggle_mute() {
        let settings = MixSettings::default();
        assert!(settings.toggle_master_mute());
        assert!(settings.master_mute());
        assert!(!settings.toggle_master_mute());
        assert!(!settings.snapshot().master_mute);
    }
}
