use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::catalogue::PatchCatalogue;
use crate::inject::{self, Location};
use crate::inline;
use crate::manifest::AddonManifest;
use crate::marker::MarkerHeader;
use crate::matcher::{self, MatchResult, PatchOptions};

#[cfg(target_os = "windows")]
const BINARY_NAME: &str = "TeamSpeak.exe";
#[cfg(not(target_os = "windows"))]
const BINARY_NAME: &str = "TeamSpeak";

/// Files of a client installation that the installer touches.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    pub binary: PathBuf,
    pub index: PathBuf,
}

impl InstallLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            binary: root.join(BINARY_NAME),
            index: root.join("html").join("client_ui").join("index.html"),
        }
    }
}

pub struct InjectSummary {
    pub name: String,
    pub version: String,
    pub location: Location,
    /// Blocks of earlier installs of the same addon that were replaced.
    pub replaced: usize,
}

pub fn patch_binary(
    layout: &InstallLayout,
    catalogue_path: &Path,
    options: &PatchOptions,
) -> Result<MatchResult> {
    let catalogue = PatchCatalogue::load(catalogue_path)
        .with_context(|| format!("Failed to load patch catalogue: {}", catalogue_path.display()))?;
    let result = matcher::apply(&layout.binary, &catalogue, options)
        .with_context(|| format!("Failed to patch {}", layout.binary.display()))?;
    Ok(result)
}

/// Inline the addon's fragment and inject it into the client document.
pub fn inject_addon(addon_dir: &Path, index: &Path) -> Result<InjectSummary> {
    let manifest = AddonManifest::load(addon_dir)?;
    let sources = manifest.sources_dir(addon_dir);
    let fragment_path = manifest.fragment_path(addon_dir);

    let fragment = std::fs::read_to_string(&fragment_path)
        .with_context(|| format!("Failed to read addon fragment: {}", fragment_path.display()))?;
    let fragment = inline::inline_resources(&fragment, &sources)
        .with_context(|| format!("Failed to inline resources from {}", sources.display()))?;

    let document = std::fs::read_to_string(index)
        .with_context(|| format!("Failed to read document: {}", index.display()))?;
    let replaced = inject::installed(&document)
        .iter()
        .filter(|h| h.id == manifest.id)
        .count();

    let location = manifest.location();
    let updated = inject::inject(&document, &fragment, &manifest.identity(), location)
        .with_context(|| format!("Failed to inject into {}", index.display()))?;

    std::fs::write(index, updated)
        .with_context(|| format!("Failed to write document: {}", index.display()))?;

    Ok(InjectSummary {
        name: manifest.name,
        version: manifest.version,
        location,
        replaced,
    })
}

/// Remove the addon's blocks from the document. Returns how many were removed.
pub fn remove_addon(addon_dir: &Path, index: &Path) -> Result<usize> {
    let manifest = AddonManifest::load(addon_dir)?;
    let document = std::fs::read_to_string(index)
        .with_context(|| format!("Failed to read document: {}", index.display()))?;

    let (updated, removed) = inject::remove(&document, &manifest.id)
        .with_context(|| format!("Failed to remove '{}' from {}", manifest.id, index.display()))?;
    if removed > 0 {
        std::fs::write(index, updated)
            .with_context(|| format!("Failed to write document: {}", index.display()))?;
    }
    Ok(removed)
}

pub fn list_addons(index: &Path) -> Result<Vec<MarkerHeader>> {
    let document = std::fs::read_to_string(index)
        .with_context(|| format!("Failed to read document: {}", index.display()))?;
    Ok(inject::installed(&document))
}
