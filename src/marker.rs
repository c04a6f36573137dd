//! Addon block markers.
//!
//! ```text
//! <!-- ADDON_START v2 {id} {version} "{base64 name}" {instance} -->
//! ...fragment...
//! <!-- ADDON_END {instance} -->
//! ```
//!
//! Scanning is a literal search for the start prefix followed by a field
//! parse, then a literal search for the end marker carrying the same instance.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

use uuid::Uuid;

pub const FORMAT_VERSION: u32 = 2;

const START_PREFIX: &str = "<!-- ADDON_START ";
const END_PREFIX: &str = "<!-- ADDON_END ";
const COMMENT_CLOSE: &str = "-->";

/// The logical unit being injected. Blocks are replaced by `id` alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub version: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHeader {
    pub format: u32,
    pub id: String,
    pub version: String,
    pub name: String,
    pub instance: String,
}

/// A start marker found in a document. `end` is `None` when no end marker with
/// the same instance follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: MarkerHeader,
    pub start: usize,
    pub end: Option<usize>,
}

/// Fresh random instance id for a new block.
pub fn new_instance_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn start_marker(identity: &Identity, instance: &str) -> String {
    format!(
        "{START_PREFIX}v{FORMAT_VERSION} {} {} \"{}\" {instance} {COMMENT_CLOSE}",
        identity.id,
        identity.version,
        BASE64_STANDARD.encode(identity.name.as_bytes())
    )
}

pub fn end_marker(instance: &str) -> String {
    format!("{END_PREFIX}{instance} {COMMENT_CLOSE}")
}

/// Wrap a fragment in a fresh start/end marker pair.
pub fn wrap(identity: &Identity, fragment: &str) -> String {
    let instance = new_instance_id();
    format!(
        "{}{fragment}{}",
        start_marker(identity, &instance),
        end_marker(&instance)
    )
}

/// Parse the fields between the start prefix and the comment close.
fn parse_header(fields: &str) -> Option<MarkerHeader> {
    let mut parts = fields.split_whitespace();
    let format = parts.next()?.strip_prefix('v')?.parse().ok()?;
    let id = parts.next()?.to_string();
    let version = parts.next()?.to_string();
    let raw_name = parts.next()?;
    let instance = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }

    let encoded = raw_name
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw_name);
    let name = BASE64_STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| encoded.to_string());

    Some(MarkerHeader {
        format,
        id,
        version,
        name,
        instance,
    })
}

/// Every addon block in `document`, in document order. Start markers whose
/// fields do not parse are skipped.
pub fn scan(document: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some(found) = document[pos..].find(START_PREFIX) {
        let start = pos + found;
        let fields_at = start + START_PREFIX.len();
        let Some(close) = document[fields_at..].find(COMMENT_CLOSE) else {
            break;
        };
        let header_end = fields_at + close + COMMENT_CLOSE.len();

        let Some(header) = parse_header(&document[fields_at..fields_at + close]) else {
            pos = header_end;
            continue;
        };

        let end_tag = end_marker(&header.instance);
        let end = document[header_end..]
            .find(&end_tag)
            .map(|i| header_end + i + end_tag.len());

        pos = end.unwrap_or(header_end);
        blocks.push(Block { header, start, end });
    }

    blocks
}
