//! Version calculation utilities.

shadow_rs::shadow!(build_info);

/// External programs pmount relies on.
pub const REQUIRED_TOOLS: [&str; 5] = ["sfdisk", "findmnt", "mount", "umount", "qemu-nbd"];

/// Tag (or short commit) and commit date of a clean tree, `<commit>-dirty` otherwise.
#[allow(clippy::const_is_empty)]
fn git_info() -> String {
    if !build_info::GIT_CLEAN {
        return format!("{}-dirty", build_info::SHORT_COMMIT);
    }
    let revision = if build_info::TAG.is_empty() {
        build_info::SHORT_COMMIT
    } else {
        build_info::TAG
    };
    // Strip commit time and leave only date
    let date = build_info::COMMIT_DATE.split(' ').next().unwrap_or_default();
    format!("{} {}", revision, date)
}

/// Get long version of the tool.
///
/// This includes:
/// - package version
/// - git info
/// - platform info
/// - external programs used at runtime
pub fn get_long_version() -> String {
    format!(
        "{} ({})\nplatform: {}\nrequires: {}",
        build_info::PKG_VERSION,
        git_info(),
        build_info::BUILD_TARGET,
        REQUIRED_TOOLS.join(", "),
    )
}
