//! Registry the host runtime discovers platforms through.
//!
//! Platforms are installed explicitly. The XPU plugin's load hook is
//! [`initialize_xpu_platform`], which the host runtime calls once.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use snafu::{ResultExt, ensure};
use xpu_device::{Driver, HostDriver};

use crate::dispatch::{HostPrimitives, PrimitiveLibrary};
use crate::error::{AlreadyExistsSnafu, DeviceSnafu, NotFoundSnafu, Result};
use crate::platform::{Platform, PlatformId, XPU_PLATFORM_ID, XpuPlatform};

#[derive(Default)]
pub struct PlatformRegistry {
    platforms: RwLock<HashMap<PlatformId, Arc<dyn Platform>>>,
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.platforms.read().keys().copied().collect();
        ids.sort();
        f.debug_struct("PlatformRegistry").field("platforms", &ids).finish()
    }
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `platform`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a platform with the same id, or the same name
    /// compared case-insensitively, is already registered.
    pub fn register(&self, platform: Arc<dyn Platform>) -> Result<()> {
        let id = platform.id();
        let mut platforms = self.platforms.write();

        ensure!(!platforms.contains_key(&id), AlreadyExistsSnafu { message: format!("platform id '{id}'") });
        ensure!(
            !platforms.values().any(|existing| existing.name().eq_ignore_ascii_case(platform.name())),
            AlreadyExistsSnafu { message: format!("platform name '{}'", platform.name()) }
        );

        tracing::debug!(platform.id = %id, platform.name = platform.name(), "platform registered");
        platforms.insert(id, platform);
        Ok(())
    }

    pub fn platform(&self, id: PlatformId) -> Result<Arc<dyn Platform>> {
        self.platforms
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| NotFoundSnafu { message: format!("platform id '{id}'") }.build())
    }

    /// Look a platform up by name, ignoring case.
    pub fn platform_by_name(&self, name: &str) -> Result<Arc<dyn Platform>> {
        self.platforms
            .read()
            .values()
            .find(|platform| platform.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| NotFoundSnafu { message: format!("platform name '{name}'") }.build())
    }

    /// Registered platforms, ordered by id.
    pub fn platforms(&self) -> Vec<Arc<dyn Platform>> {
        let mut platforms: Vec<_> = self.platforms.read().values().cloned().collect();
        platforms.sort_by_key(|platform| platform.id());
        platforms
    }
}

/// Process-wide platform registry.
pub static PLATFORMS: Lazy<PlatformRegistry> = Lazy::new(PlatformRegistry::new);

/// Build an [`XpuPlatform`] over `driver` and `library` and install it in
/// `registry` under [`XPU_PLATFORM_ID`].
pub fn register_xpu_platform(
    registry: &PlatformRegistry,
    driver: Arc<dyn Driver>,
    library: Arc<dyn PrimitiveLibrary>,
) -> Result<Arc<XpuPlatform>> {
    let platform = Arc::new(XpuPlatform::new(driver, library));
    registry.register(platform.clone())?;
    Ok(platform)
}

/// Plugin load hook: install the XPU platform in [`PLATFORMS`].
///
/// A second call fails with `AlreadyExists`.
pub fn initialize_xpu_platform(
    driver: Arc<dyn Driver>,
    library: Arc<dyn PrimitiveLibrary>,
) -> Result<Arc<XpuPlatform>> {
    register_xpu_platform(&PLATFORMS, driver, library)
}

/// [`initialize_xpu_platform`] with the host driver selected by
/// `XPU_HOST_DEVICES` and the host primitives library.
pub fn initialize_host_platform() -> Result<Arc<XpuPlatform>> {
    let driver = HostDriver::from_env().context(DeviceSnafu)?;
    initialize_xpu_platform(Arc::new(driver), Arc::new(HostPrimitives))
}

/// The registered XPU platform, if the load hook has run.
pub fn xpu_platform() -> Result<Arc<dyn Platform>> {
    PLATFORMS.platform(XPU_PLATFORM_ID)
}
