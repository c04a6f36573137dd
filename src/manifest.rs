use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::inject::Location;
use crate::marker::Identity;

pub const MANIFEST_FILE: &str = "addon.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum InjectionPoint {
    #[default]
    Head,
    Body,
}

impl TryFrom<String> for InjectionPoint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_uppercase().as_str() {
            "HEAD" => Ok(InjectionPoint::Head),
            "BODY" => Ok(InjectionPoint::Body),
            _ => Err(format!("unknown injection_point '{value}', expected HEAD or BODY")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum InjectAt {
    Head,
    #[default]
    Tail,
}

impl TryFrom<String> for InjectAt {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_uppercase().as_str() {
            "HEAD" => Ok(InjectAt::Head),
            "TAIL" => Ok(InjectAt::Tail),
            _ => Err(format!("unknown inject_at '{value}', expected HEAD or TAIL")),
        }
    }
}

/// `addon.json` at the root of an addon directory.
#[derive(Debug, Clone, Deserialize)]
pub struct AddonManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default = "default_sources")]
    pub sources: String,
    pub inject: String,
    #[serde(default)]
    pub injection_point: InjectionPoint,
    #[serde(default)]
    pub inject_at: InjectAt,
}

fn default_sources() -> String {
    "src/".to_string()
}

impl AddonManifest {
    pub fn load(addon_dir: &Path) -> Result<Self> {
        let path = addon_dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read addon manifest: {}", path.display()))?;
        let manifest: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid addon manifest: {}", path.display()))?;

        if manifest.id.is_empty() || manifest.id.chars().any(char::is_whitespace) {
            anyhow::bail!("Invalid addon id '{}': must be non-empty without whitespace", manifest.id);
        }
        if manifest.version.is_empty() || manifest.version.chars().any(char::is_whitespace) {
            anyhow::bail!(
                "Invalid addon version '{}': must be non-empty without whitespace",
                manifest.version
            );
        }
        Ok(manifest)
    }

    pub fn sources_dir(&self, addon_dir: &Path) -> PathBuf {
        addon_dir.join(&self.sources)
    }

    /// The fragment file, looked up under the addon root first, then under
    /// the sources directory.
    pub fn fragment_path(&self, addon_dir: &Path) -> PathBuf {
        let direct = addon_dir.join(&self.inject);
        if direct.exists() {
            direct
        } else {
            self.sources_dir(addon_dir).join(&self.inject)
        }
    }

    pub fn location(&self) -> Location {
        Location::from_manifest(self.injection_point, self.inject_at)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            version: self.version.clone(),
            name: self.name.clone(),
        }
    }
}
