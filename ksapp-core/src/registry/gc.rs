//! Vendor cache garbage collection
//!
//! Whether an entry is orphaned is always recomputed from the manifest as
//! it is now, so both passes are safe to re-run.

use std::collections::BTreeSet;
use tracing::{debug, info};

use super::VendorCache;
use crate::app::App;
use crate::error::{Error, Result};
use crate::pkg::PackageId;

pub struct GarbageCollector<'a> {
    vendor: &'a VendorCache,
}

impl<'a> GarbageCollector<'a> {
    pub fn new(vendor: &'a VendorCache) -> Self {
        Self { vendor }
    }

    /// Delete the entry for `old` unless some scope still references it
    ///
    /// Must run after the manifest write that superseded `old`. Returns
    /// whether an entry was deleted.
    pub fn remove_orphans(&self, app: &App, old: &PackageId) -> Result<bool> {
        let referenced = app
            .all_libraries()
            .any(|(_, lib)| PackageId::from(lib) == *old);
        if referenced {
            debug!("{} is still referenced; keeping its vendor entry", old);
            return Ok(false);
        }

        self.delete(old)
    }

    /// Delete every vendor entry no scope references
    pub fn sweep(&self, app: &App) -> Result<Vec<PackageId>> {
        let referenced: BTreeSet<PackageId> = app
            .all_libraries()
            .map(|(_, lib)| PackageId::from(lib))
            .collect();

        let mut removed = Vec::new();
        for id in self.vendor.entries()? {
            if !referenced.contains(&id) && self.delete(&id)? {
                removed.push(id);
            }
        }
        Ok(removed)
    }

    fn delete(&self, id: &PackageId) -> Result<bool> {
        let path = self.vendor.entry_path(id)?;
        let deleted = self
            .vendor
            .remove(id)
            .map_err(|e| Error::GcDeleteFailed { path, source: e })?;
        if deleted {
            info!("Removed orphaned vendor entry {}", id);
        }
        Ok(deleted)
    }
}
