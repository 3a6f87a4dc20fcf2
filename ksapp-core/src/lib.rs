//! ksapp core library exports

pub mod app;
pub mod config;
pub mod error;
pub mod params;
pub mod pkg;
pub mod prototype;
pub mod registry;

mod fsutil;

pub use app::App;
pub use config::Settings;
pub use error::{Error, Result};
pub use params::ParamStore;
pub use pkg::{Descriptor, Package, PackageId};
pub use registry::{GarbageCollector, Installer, PackageManager, Registry, VendorCache};
