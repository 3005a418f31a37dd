//! Shared engine context
//!
//! Everything both contexts need to see lives here and is passed around as an
//! `Arc<EngineContext>`. There are no globals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::settings::MixSettings;
use super::stats::PerformanceStats;
use super::transport::TransportState;
use crate::config::EngineConfig;
use crate::error::Result;

#[derive(Debug)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub transport: TransportState,
    pub settings: MixSettings,
    pub stats: PerformanceStats,
    running_engines: AtomicUsize,
}

impl EngineContext {
    /// Validate `config` and build a fresh context
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            settings: MixSettings::new(config.input_monitoring),
            transport: TransportState::new(),
            stats: PerformanceStats::new(),
            running_engines: AtomicUsize::new(0),
            config,
        }))
    }

    /// Whether any mix engine is running against this context
    pub fn is_initialized(&self) -> bool {
        self.running_engines() > 0
    }

    /// Mix engines initialized against this context and not yet shut down
    pub fn running_engines(&self) -> usize {
        self.running_engines.load(Ordering::Acquire)
    }

    pub(crate) fn engine_started(&self) {
        self.running_engines.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn engine_stopped(&self) {
        let _ = self
            .running_engines
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_uninitialized() {
        let ctx = EngineContext::new(EngineConfig::default()).unwrap();
        assert!(!ctx.is_initialized());
        assert!(ctx.settings.input_monitoring());
    }

    #[test]
    fn test_engine_count_never_underflows() {
        let ctx = EngineContext::new(EngineConfig::default()).unwrap();
        ctx.engine_started();
        ctx.engine_started();
        ctx.engine_stopped();
        assert!(ctx.is_initialized());
        ctx.engine_stopped();
        ctx.engine_stopped();
        assert_eq!(ctx.running_engines(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            block_size: 0,
            ..EngineConfig::default()
        };
        assert!(EngineContext::new(config).is_err());
    }

    #[test]
    fn test_monitoring_follows_config() {
        let config = EngineConfig {
            input_monitoring: false,
            ..EngineConfig::default()
        };
        let ctx = EngineContext::new(config).unwrap();
        assert!(!ctx.settings.input_monitoring());
    }
}
