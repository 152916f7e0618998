use std::path::PathBuf;

use rust_decimal::Decimal;

/// Engine configuration, passed explicitly — the engine carries no
/// ambient state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WAL file backing this engine's state.
    pub wal_path: PathBuf,
    /// Platform cut added on top of the service price at booking creation.
    pub service_fee_percent: Decimal,
    /// Slot granularity used when an availability query does not specify one.
    pub default_granularity_minutes: u32,
}

impl EngineConfig {
    pub fn new(wal_path: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: wal_path.into(),
            service_fee_percent: Decimal::from(10),
            default_granularity_minutes: 60,
        }
    }

    /// Build a config from `SLATED_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("SLATED_DATA_DIR").unwrap_or_else(|_| "./data".into());
        let mut config = Self::new(PathBuf::from(data_dir).join("bookings.wal"));
        if let Some(pct) = std::env::var("SLATED_SERVICE_FEE_PERCENT")
            .ok()
            .and_then(|s| s.parse::<Decimal>().ok())
        {
            config.service_fee_percent = pct;
        }
        if let Some(gran) = std::env::var("SLATED_SLOT_GRANULARITY_MINUTES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            config.default_granularity_minutes = gran;
        }
        config
    }
}
