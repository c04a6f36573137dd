//! Patch catalogue: version -> platform -> file -> patch set.
//!
//! The JSON object order of the catalogue file is the match order, so the
//! catalogue is flattened into an explicit list while it is parsed. A file
//! entry that does not validate is logged and skipped; only a document whose
//! version/platform/file nesting is not objects fails to load.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use crate::error::PatchError;
use crate::fingerprint::Fingerprint;
use crate::util;

/// One in-place overwrite: `vanilla` is expected at `offset` before patching,
/// `patched` after. Both have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOp {
    pub offset: u64,
    pub vanilla: Vec<u8>,
    pub patched: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FilePatchSet {
    pub file_name: String,
    pub patched_fingerprint: Fingerprint,
    pub patches: Vec<PatchOp>,
}

#[derive(Debug, Clone)]
pub struct CatalogueEntry {
    pub version: String,
    pub platform: String,
    pub set: FilePatchSet,
}

#[derive(Debug, Clone, Default)]
pub struct PatchCatalogue {
    entries: Vec<CatalogueEntry>,
}

impl PatchCatalogue {
    #[cfg(test)]
    pub fn new(entries: Vec<CatalogueEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, PatchError> {
        let text = std::fs::read_to_string(path).map_err(|e| PatchError::io(path, e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, PatchError> {
        let raw: Ordered<Ordered<Ordered<serde_json::Value>>> = serde_json::from_str(text)
            .map_err(|e| PatchError::InvalidCatalogue(e.to_string()))?;

        let mut entries = Vec::new();
        for (version, platforms) in raw.0 {
            for (platform, files) in platforms.0 {
                for (file_name, value) in files.0 {
                    let set = serde_json::from_value::<RawFilePatch>(value)
                        .map_err(|e| format!("{file_name}: {e}"))
                        .and_then(|file_patch| file_patch.into_set(file_name));
                    match set {
                        Ok(set) => entries.push(CatalogueEntry {
                            version: version.clone(),
                            platform: platform.clone(),
                            set,
                        }),
                        Err(msg) => log::warn!("Skipping catalogue entry {version}/{platform}: {msg}"),
                    }
                }
            }
        }

        log::debug!("Loaded {} catalogue entries", entries.len());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }

    /// Entries for one platform, in catalogue order.
    pub fn for_platform<'a, 'p>(
        &'a self,
        platform: &'p str,
    ) -> impl Iterator<Item = &'a CatalogueEntry> + 'p
    where
        'a: 'p,
    {
        self.entries.iter().filter(move |e| e.platform == platform)
    }
}

/// Platform key of the running build, as used in catalogue files.
pub fn current_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else {
        "linux"
    }
}

#[derive(Deserialize)]
struct RawFilePatch {
    patched: String,
    patches: Vec<RawPatchOp>,
}

#[derive(Deserialize)]
struct RawPatchOp {
    offset: String,
    vanilla: String,
    patched: String,
}

impl RawFilePatch {
    fn into_set(self, file_name: String) -> Result<FilePatchSet, String> {
        let patched_fingerprint = Fingerprint::parse(&self.patched);
        if !patched_fingerprint.is_supported() {
            log::warn!(
                "{file_name}: unsupported fingerprint '{}', only byte windows can match",
                self.patched
            );
        }

        let patches = self
            .patches
            .into_iter()
            .map(|op| op.parse(&file_name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FilePatchSet {
            file_name,
            patched_fingerprint,
            patches,
        })
    }
}

impl RawPatchOp {
    fn parse(self, file_name: &str) -> Result<PatchOp, String> {
        let offset = util::parse_hex_offset(&self.offset)
            .ok_or_else(|| format!("{file_name}: bad offset '{}'", self.offset))?;
        let vanilla = util::parse_hex_bytes(&self.vanilla)
            .ok_or_else(|| format!("{file_name} @ {}: bad vanilla bytes", self.offset))?;
        let patched = util::parse_hex_bytes(&self.patched)
            .ok_or_else(|| format!("{file_name} @ {}: bad patched bytes", self.offset))?;

        if vanilla.is_empty() {
            return Err(format!("{file_name} @ {}: empty byte window", self.offset));
        }
        if vanilla.len() != patched.len() {
            return Err(format!(
                "{file_name} @ {}: vanilla is {} bytes but patched is {}",
                self.offset,
                vanilla.len(),
                patched.len()
            ));
        }

        Ok(PatchOp {
            offset,
            vanilla,
            patched,
        })
    }
}

/// A JSON object deserialized into a list, keeping document order.
struct Ordered<V>(Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Ordered<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = Ordered<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(Ordered(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5_A: &str = "00112233445566778899aabbccddeeff";

    #[test]
    fn test_parse_worked_example() {
        let json = format!(
            r#"{{"v1": {{"linux": {{"bin": {{"patched": "{MD5_A}",
                "patches": [{{"offset": "0x10", "vanilla": "00 01", "patched": "02 03"}}]}}}}}}}}"#
        );
        let catalogue = PatchCatalogue::from_json(&json).unwrap();
        assert_eq!(catalogue.entries().len(), 1);

        let entry = &catalogue.entries()[0];
        assert_eq!(entry.version, "v1");
        assert_eq!(entry.platform, "linux");
        assert_eq!(entry.set.file_name, "bin");
        assert_eq!(
            entry.set.patches,
            vec![PatchOp {
                offset: 0x10,
                vanilla: vec![0x00, 0x01],
                patched: vec![0x02, 0x03],
            }]
        );
    }

    #[test]
    fn test_document_order_is_kept() {
        let json = format!(
            r#"{{
                "zeta": {{"linux": {{"bin": {{"patched": "{MD5_A}", "patches": []}}}}}},
                "alpha": {{"windows": {{"bin.exe": {{"patched": "{MD5_A}", "patches": []}}}},
                           "linux": {{"bin": {{"patched": "{MD5_A}", "patches": []}}}}}},
                "mid": {{"linux": {{"bin": {{"patched": "{MD5_A}", "patches": []}}}}}}
            }}"#
        );
        let catalogue = PatchCatalogue::from_json(&json).unwrap();

        let linux: Vec<&str> = catalogue
            .for_platform("linux")
            .map(|e| e.version.as_str())
            .collect();
        assert_eq!(linux, vec!["zeta", "alpha", "mid"]);

        let windows: Vec<&str> = catalogue
            .for_platform("windows")
            .map(|e| e.version.as_str())
            .collect();
        assert_eq!(windows, vec!["alpha"]);
        assert_eq!(catalogue.for_platform("macos").count(), 0);
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let json = format!(
            r#"{{
                "v1": {{
                    "linux": {{"bin": {{"patched": "{MD5_A}",
                        "patches": [{{"offset": "10", "vanilla": "00 01", "patched": "02 03"}}]}}}},
                    "windows": {{"bin.exe": {{"patched": "{MD5_A}",
                        "patches": [{{"offset": "10", "vanilla": "00 01", "patched": "02"}}]}}}},
                    "macos": {{"bin": {{"patched": "{MD5_A}",
                        "patches": [{{"offset": "zz", "vanilla": "00", "patched": "01"}}]}}}}
                }},
                "v2": {{"linux": {{"bin": {{"patches": []}}}}}},
                "v3": {{"linux": {{"bin": {{"patched": "{MD5_A}", "patches": []}}}}}}
            }}"#
        );
        let catalogue = PatchCatalogue::from_json(&json).unwrap();

        let kept: Vec<(&str, &str)> = catalogue
            .entries()
            .iter()
            .map(|e| (e.version.as_str(), e.platform.as_str()))
            .collect();
        assert_eq!(kept, vec![("v1", "linux"), ("v3", "linux")]);
    }

    #[test]
    fn test_unsupported_fingerprint_keeps_entry() {
        let json = format!(
            r#"{{"v1": {{
                "windows": {{"bin.exe": {{"patched": "da39a3ee5e6b4b0d3255bfef95601890afd80709",
                    "patches": [{{"offset": "10", "vanilla": "00", "patched": "01"}}]}}}},
                "linux": {{"bin": {{"patched": "{MD5_A}",
                    "patches": [{{"offset": "10", "vanilla": "00", "patched": "01"}}]}}}}
            }}}}"#
        );
        let catalogue = PatchCatalogue::from_json(&json).unwrap();
        assert_eq!(catalogue.entries().len(), 2);

        let windows = catalogue.for_platform("windows").next().unwrap();
        assert!(!windows.set.patched_fingerprint.is_supported());
        assert_eq!(windows.set.patches.len(), 1);
        assert_eq!(catalogue.for_platform("linux").count(), 1);
    }

    #[test]
    fn test_not_an_object() {
        assert!(PatchCatalogue::from_json("[1, 2]").is_err());
        assert!(PatchCatalogue::from_json(r#"{"v1": ["linux"]}"#).is_err());
        assert!(PatchCatalogue::from_json("{").is_err());
    }
}
