use std::time::Duration;

/// Tunables of the deal staging process.
#[derive(Debug, Clone, Copy)]
pub struct SealingConfig {
    /// Maximum time a sector keeps waiting for more deals before it is
    /// forced into packing.
    pub wait_deals_delay: Duration,

    /// Cap on deal sectors moving through the sealing pipeline at once.
    /// 0 means unlimited.
    pub max_sealing_sectors_for_deals: u64,

    /// Cap on sectors sitting in `WaitDeals` at once. 0 means unlimited.
    pub max_wait_deals_sectors: u64,
}

impl Default for SealingConfig {
    fn default() -> Self {
        Self {
            wait_deals_delay: Duration::from_secs(6 * 60 * 60),
            max_sealing_sectors_for_deals: 0,
            max_wait_deals_sectors: 0,
        }
    }
}

/// Source of the sealing configuration.
///
/// The packer re-reads the configuration at every decision point instead of
/// capturing it at startup, so implementations may serve live-reloaded
/// values.
pub trait SealingConfigSource: Send + Sync {
    fn sealing_config(&self) -> SealingConfig;
}

impl SealingConfigSource for SealingConfig {
    fn sealing_config(&self) -> SealingConfig {
        *self
    }
}
