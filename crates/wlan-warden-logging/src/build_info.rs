#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub pkg_version: &'static str,
    pub build_epoch: &'static str,
    pub build_iso: &'static str,
    pub git_hash: &'static str,
    pub git_dirty: &'static str,
    pub build_profile: &'static str,
    pub build_target: &'static str,
    pub build_arch: &'static str,
}

pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BUILD_EPOCH: &str = env!("WARDEN_BUILD_EPOCH");
pub const BUILD_ISO: &str = env!("WARDEN_BUILD_ISO");
pub const GIT_HASH: &str = env!("WARDEN_GIT_HASH");
pub const GIT_DIRTY: &str = env!("WARDEN_GIT_DIRTY");
pub const BUILD_PROFILE: &str = env!("WARDEN_BUILD_PROFILE");
pub const BUILD_TARGET: &str = env!("WARDEN_BUILD_TARGET");
pub const BUILD_ARCH: &str = env!("WARDEN_BUILD_ARCH");

pub const BUILD_INFO: BuildInfo = BuildInfo {
    pkg_version: PKG_VERSION,
    build_epoch: BUILD_EPOCH,
    build_iso: BUILD_ISO,
    git_hash: GIT_HASH,
    git_dirty: GIT_DIRTY,
    build_profile: BUILD_PROFILE,
    build_target: BUILD_TARGET,
    build_arch: BUILD_ARCH,
};

pub fn build_info() -> BuildInfo {
    BUILD_INFO
}

pub fn git_dirty() -> bool {
    matches!(GIT_DIRTY, "1" | "true" | "yes" | "dirty")
}

pub fn version_string() -> String {
    let dirty = if git_dirty() { " dirty" } else { "" };
    format!(
        "{} (build {} {}, git {}{})",
        PKG_VERSION, BUILD_ISO, BUILD_EPOCH, GIT_HASH, dirty
    )
}
