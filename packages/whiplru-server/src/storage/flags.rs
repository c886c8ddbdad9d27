//! Purge-filter flags (§3's `Local`/`Temporary`, carried inside an asset's
//! own opaque payload encoding). The storage manager never otherwise
//! inspects payload bytes; it only ever calls a [`PurgeFlagReader`] when
//! asked to purge by filter.
//!
//! The payload's internal serialization is out of scope for this crate, so
//! the convention below (first payload byte, bit 0 = local, bit 1 =
//! temporary; second byte = asset type) is this crate's own default reader,
//! not a wire contract. Callers with a real asset encoding should supply
//! their own reader.

use std::sync::Arc;

use whiplru_core::AssetId;

/// Local/Temporary/type flags decoded from an asset's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssetFlags {
    pub local: bool,
    pub temporary: bool,
    pub asset_type: u8,
}

/// Decodes an asset's flags from its payload bytes. `None` fields in a
/// [`PurgeFilter`] are "don't care"; the reader itself always returns
/// concrete flags.
pub type PurgeFlagReader = Arc<dyn Fn(&[u8]) -> AssetFlags + Send + Sync>;

/// Bit 0 of the first payload byte is `local`, bit 1 is `temporary`; the
/// second byte (if present) is the asset type. A short payload reads as
/// neither flag and type `0`.
#[must_use]
pub fn default_flag_reader() -> PurgeFlagReader {
    Arc::new(|payload: &[u8]| {
        let byte = payload.first().copied().unwrap_or(0);
        AssetFlags {
            local: byte & 0b0000_0001 != 0,
            temporary: byte & 0b0000_0010 != 0,
            asset_type: payload.get(1).copied().unwrap_or(0),
        }
    })
}

/// A conjunction of predicates to purge by: flags, asset type, and an
/// inclusive UUID range. Per §4.4, multiple filters passed to
/// [`super::manager::StorageManager::purge_all`] are OR-combined; this
/// struct models one such conjunction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeFilter {
    pub local: Option<bool>,
    pub temporary: Option<bool>,
    pub asset_type: Option<u8>,
    pub id_range: Option<(AssetId, AssetId)>,
}

impl PurgeFilter {
    /// A filter matching only assets flagged `local`. What `PURGELOCALS`
    /// uses.
    #[must_use]
    pub fn local_only() -> Self {
        Self {
            local: Some(true),
            ..Self::default()
        }
    }

    /// A filter matching only assets whose id falls within the inclusive
    /// range `[lo, hi]`.
    #[must_use]
    pub fn id_range(lo: AssetId, hi: AssetId) -> Self {
        Self {
            id_range: Some((lo, hi)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, id: AssetId, flags: AssetFlags) -> bool {
        self.local.map_or(true, |want| want == flags.local)
            && self.temporary.map_or(true, |want| want == flags.temporary)
            && self.asset_type.map_or(true, |want| want == flags.asset_type)
            && self.id_range.map_or(true, |(lo, hi)| id >= lo && id <= hi)
    }
}
