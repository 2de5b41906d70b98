//! NVS persistence for link overrides with schema versioning.
//!
//! Only values that differ from the compiled-in defaults are stored; a
//! missing key means "use the default".
//!
//! # Version History
//!
//! - **v1** (current): ack_ms, debounce_ms, log_lvl
//!
//! # Adding fields
//!
//! 1. Increment CURRENT_SCHEMA_VERSION
//! 2. Implement `migrate_v1_to_v2()`
//! 3. Add the route to `migration_supported()` and `migrate_overrides()`

use core::cmp::Ordering;

use thiserror::Error;

use crate::config::{AckPolicy, LinkConfig};
use crate::logging::LogLevel;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::EspError;

/// Current NVS schema version for link overrides
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// NVS namespace for light meter configuration
pub const NVS_NAMESPACE: &str = "lightmeter";

/// Largest accepted debounce window; stored values above it are ignored.
pub const MAX_DEBOUNCE_MS: u32 = 1000;

const VERSION_KEY: &str = "schema_ver";
const ACK_KEY: &str = "ack_ms";
const DEBOUNCE_KEY: &str = "debounce_ms";
const LOG_LEVEL_KEY: &str = "log_lvl";

/// Partition handle the load/save functions take.
#[cfg(target_os = "espidf")]
pub type NvsPartition = EspDefaultNvsPartition;

/// Partition handle the load/save functions take.
#[cfg(not(target_os = "espidf"))]
pub type NvsPartition = ();

/// Migration result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationResult {
    /// Fresh install, no migration needed (using defaults)
    FreshInstall,
    /// Schema up-to-date, loaded successfully
    UpToDate,
    /// Migrated from older version
    Migrated { from_version: u32, to_version: u32 },
}

/// NVS operation errors
#[derive(Debug, Error)]
pub enum NvsError {
    /// Namespace could not be opened
    #[cfg(target_os = "espidf")]
    #[error("NVS init failed: {0}")]
    InitFailed(EspError),
    /// Schema version too new (downgrade not supported)
    #[error("stored schema v{stored_version} is newer than v{}", CURRENT_SCHEMA_VERSION)]
    TooNew { stored_version: u32 },
    /// NVS read/write error
    #[cfg(target_os = "espidf")]
    #[error("NVS I/O error: {0}")]
    IoError(#[from] EspError),
    /// Unsupported migration path
    #[error("no migration from schema v{from} to v{to}")]
    UnsupportedMigration { from: u32, to: u32 },
    /// Feature not available on this platform
    #[cfg(not(target_os = "espidf"))]
    #[error("NVS not available on this platform")]
    NotAvailable,
}

/// Persisted overrides of [`LinkConfig`] fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NvsOverrides {
    /// Acknowledgment timeout, `0` = wait forever.
    pub ack_ms: Option<u32>,
    pub debounce_ms: Option<u32>,
    /// Raw [`LogLevel`] value.
    pub log_level: Option<u8>,
}

impl NvsOverrides {
    /// Overrides that reproduce `config` on top of the defaults.
    pub fn from_config(config: &LinkConfig) -> Self {
        let defaults = LinkConfig::default();
        Self {
            ack_ms: (config.ack_policy != defaults.ack_policy).then(|| config.ack_policy.as_millis()),
            debounce_ms: (config.debounce_ms != defaults.debounce_ms).then_some(config.debounce_ms),
            log_level: (config.log_level != defaults.log_level).then_some(config.log_level as u8),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply valid overrides to `config`.
    ///
    /// Out-of-range values are skipped. Returns the number of fields applied.
    pub fn apply(&self, config: &mut LinkConfig) -> usize {
        let mut applied = 0;

        if let Some(ms) = self.ack_ms {
            config.ack_policy = AckPolicy::from_millis(ms);
            applied += 1;
        }
        if let Some(ms) = self.debounce_ms.filter(|ms| *ms <= MAX_DEBOUNCE_MS) {
            config.debounce_ms = ms;
            applied += 1;
        }
        if let Some(raw) = self.log_level.filter(|raw| *raw <= LogLevel::Trace as u8) {
            config.log_level = LogLevel::from_u8(raw);
            applied += 1;
        }

        applied
    }
}

/// Classify a stored schema version.
///
/// `0` (no version key) is a fresh install.
pub fn schema_status(stored_version: u32) -> Result<MigrationResult, NvsError> {
    match stored_version.cmp(&CURRENT_SCHEMA_VERSION) {
        Ordering::Equal => Ok(MigrationResult::UpToDate),
        Ordering::Less if stored_version == 0 => Ok(MigrationResult::FreshInstall),
        Ordering::Less => {
            if migration_supported(stored_version, CURRENT_SCHEMA_VERSION) {
                Ok(MigrationResult::Migrated {
                    from_version: stored_version,
                    to_version: CURRENT_SCHEMA_VERSION,
                })
            } else {
                Err(NvsError::UnsupportedMigration {
                    from: stored_version,
                    to: CURRENT_SCHEMA_VERSION,
                })
            }
        }
        Ordering::Greater => Err(NvsError::TooNew { stored_version }),
    }
}

/// Known migration paths.
fn migration_supported(from_version: u32, to_version: u32) -> bool {
    match (from_version, to_version) {
        // (1, 2) => true,
        _ => false,
    }
}

/// Load overrides from NVS with automatic migration
///
/// # Returns
///
/// - `Ok((overrides, MigrationResult))`: Load successful (may have migrated)
/// - `Err(NvsError::TooNew)`: Schema version too new (downgrade not supported)
/// - `Err(NvsError)`: Other NVS errors
#[cfg(target_os = "espidf")]
pub fn load_overrides(
    partition: NvsPartition,
) -> Result<(NvsOverrides, MigrationResult), NvsError> {
    let mut storage =
        EspNvs::new(partition, NVS_NAMESPACE, true).map_err(NvsError::InitFailed)?;

    let stored_version = storage.get_u32(VERSION_KEY)?.unwrap_or(0);
    let status = schema_status(stored_version)?;

    let overrides = match status {
        MigrationResult::FreshInstall => NvsOverrides::default(),
        MigrationResult::UpToDate => load_v1_overrides(&storage)?,
        MigrationResult::Migrated {
            from_version,
            to_version,
        } => {
            migrate_overrides(&mut storage, from_version, to_version)?;
            load_v1_overrides(&storage)?
        }
    };

    Ok((overrides, status))
}

/// Stub for non-ESP platforms
#[cfg(not(target_os = "espidf"))]
pub fn load_overrides(
    _partition: NvsPartition,
) -> Result<(NvsOverrides, MigrationResult), NvsError> {
    Err(NvsError::NotAvailable)
}

/// Save overrides to NVS with version stamp
///
/// `None` fields are erased so the default applies on the next boot.
#[cfg(target_os = "espidf")]
pub fn save_overrides(partition: NvsPartition, overrides: &NvsOverrides) -> Result<(), NvsError> {
    let mut storage =
        EspNvs::new(partition, NVS_NAMESPACE, true).map_err(NvsError::InitFailed)?;

    // Write version first
    storage.set_u32(VERSION_KEY, CURRENT_SCHEMA_VERSION)?;
    save_v1_overrides(&mut storage, overrides)?;

    Ok(())
}

/// Stub for non-ESP platforms
#[cfg(not(target_os = "espidf"))]
pub fn save_overrides(_partition: NvsPartition, _overrides: &NvsOverrides) -> Result<(), NvsError> {
    Err(NvsError::NotAvailable)
}

// ========================================
// v1 Schema Load/Save
// ========================================

#[cfg(target_os = "espidf")]
fn load_v1_overrides(storage: &EspNvs<NvsDefault>) -> Result<NvsOverrides, NvsError> {
    Ok(NvsOverrides {
        ack_ms: storage.get_u32(ACK_KEY)?,
        debounce_ms: storage.get_u32(DEBOUNCE_KEY)?,
        log_level: storage.get_u8(LOG_LEVEL_KEY)?,
    })
}

#[cfg(target_os = "espidf")]
fn save_v1_overrides(
    storage: &mut EspNvs<NvsDefault>,
    overrides: &NvsOverrides,
) -> Result<(), NvsError> {
    match overrides.ack_ms {
        Some(ms) => storage.set_u32(ACK_KEY, ms)?,
        None => {
            storage.remove(ACK_KEY)?;
        }
    }
    match overrides.debounce_ms {
        Some(ms) => storage.set_u32(DEBOUNCE_KEY, ms)?,
        None => {
            storage.remove(DEBOUNCE_KEY)?;
        }
    }
    match overrides.log_level {
        Some(level) => storage.set_u8(LOG_LEVEL_KEY, level)?,
        None => {
            storage.remove(LOG_LEVEL_KEY)?;
        }
    }

    Ok(())
}

// ========================================
// Migration Logic
// ========================================

#[cfg(target_os = "espidf")]
fn migrate_overrides(
    storage: &mut EspNvs<NvsDefault>,
    from_version: u32,
    to_version: u32,
) -> Result<(), NvsError> {
    // Router for migration paths; keep in sync with migration_supported()
    match (from_version, to_version) {
        // (1, 2) => migrate_v1_to_v2(storage)?,
        _ => {
            return Err(NvsError::UnsupportedMigration {
                from: from_version,
                to: to_version,
            });
        }
    }

    // Update version stamp
    storage.set_u32(VERSION_KEY, to_version)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn test_schema_status() {
        assert_eq!(schema_status(0).unwrap(), MigrationResult::FreshInstall);
        assert_eq!(schema_status(1).unwrap(), MigrationResult::UpToDate);
        assert!(matches!(
            schema_status(2),
            Err(NvsError::TooNew { stored_version: 2 })
        ));
    }

    #[test]
    fn test_nvs_namespace_constant() {
        assert_eq!(NVS_NAMESPACE, "lightmeter");
        // NVS keys are limited to 15 characters
        for key in [VERSION_KEY, ACK_KEY, DEBOUNCE_KEY, LOG_LEVEL_KEY] {
            assert!(key.len() <= 15, "{key}");
        }
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = LinkConfig::default();
        let overrides = NvsOverrides {
            ack_ms: Some(250),
            debounce_ms: Some(50),
            log_level: Some(LogLevel::Warn as u8),
        };

        assert_eq!(overrides.apply(&mut config), 3);
        assert_eq!(config.ack_policy, AckPolicy::Timeout(Duration::from_millis(250)));
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_overrides_are_skipped() {
        let mut config = LinkConfig::default();
        let overrides = NvsOverrides {
            ack_ms: None,
            debounce_ms: Some(MAX_DEBOUNCE_MS + 1),
            log_level: Some(42),
        };

        assert_eq!(overrides.apply(&mut config), 0);
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_from_config_only_stores_changes() {
        assert!(NvsOverrides::from_config(&LinkConfig::default()).is_empty());

        let mut config = LinkConfig::default();
        config.ack_policy = AckPolicy::from_millis(500);
        let overrides = NvsOverrides::from_config(&config);
        assert_eq!(overrides.ack_ms, Some(500));
        assert_eq!(overrides.debounce_ms, None);

        let mut restored = LinkConfig::default();
        overrides.apply(&mut restored);
        assert_eq!(restored, config);
    }

    #[test]
    #[cfg(not(target_os = "espidf"))]
    fn test_host_stubs() {
        assert!(matches!(load_overrides(()), Err(NvsError::NotAvailable)));
        assert!(matches!(
            save_overrides((), &NvsOverrides::default()),
            Err(NvsError::NotAvailable)
        ));
    }
}
