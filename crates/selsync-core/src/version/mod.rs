//! Semantic version bumps for published artifacts.

use semver::Version;

use crate::types::BumpKind;

/// Bump `current` by `kind`.
///
/// `major` resets minor and patch, `minor` resets patch. Pre-release and
/// build metadata are dropped.
pub fn bump(current: &str, kind: BumpKind) -> anyhow::Result<Version> {
    let mut version = Version::parse(current.trim())
        .map_err(|e| anyhow::anyhow!("Invalid semantic version '{}': {}", current, e))?;
    match kind {
        BumpKind::Major => {
            version.major += 1;
            version.minor = 0;
            version.patch = 0;
        }
        BumpKind::Minor => {
            version.minor += 1;
            version.patch = 0;
        }
        BumpKind::Patch => {
            version.patch += 1;
        }
    }
    version.pre = semver::Prerelease::EMPTY;
    version.build = semver::BuildMetadata::EMPTY;
    Ok(version)
}
