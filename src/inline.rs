//! Inline local stylesheet and script references of an addon fragment.

use std::path::{Path, PathBuf};

/// Replace `<link rel="stylesheet" href="x.css">` with `<style>...</style>` and
/// `<script src="x.js"></script>` with `<script>...</script>` when the
/// reference is relative and `sources/<file name>` exists. Anything else is
/// copied through unchanged.
pub fn inline_resources(fragment: &str, sources: &Path) -> std::io::Result<String> {
    // ASCII lowercasing keeps byte offsets identical.
    let lower = fragment.to_ascii_lowercase();
    let mut out = String::with_capacity(fragment.len());
    let mut pos = 0;

    while let Some((start, kind)) = next_tag(&lower, pos) {
        let Some(gt) = lower[start..].find('>') else {
            break;
        };
        let open_end = start + gt + 1;
        let attrs = parse_attributes(&fragment[start + kind.tag_len()..start + gt]);

        let replacement = match kind {
            TagKind::Link => stylesheet_href(&attrs)
                .and_then(|href| resolve(href, sources))
                .map(|path| (path, open_end, "style")),
            TagKind::Script => {
                let rest = &lower[open_end..];
                let trimmed = rest.trim_start();
                let close_at = open_end + (rest.len() - trimmed.len());
                if trimmed.starts_with("</script>") {
                    attr(&attrs, "src")
                        .and_then(|src| resolve(src, sources))
                        .map(|path| (path, close_at + "</script>".len(), "script"))
                } else {
                    None
                }
            }
        };

        match replacement {
            Some((path, end, element)) => {
                let body = std::fs::read_to_string(&path)?;
                log::debug!("Inlined {} as <{element}>", path.display());
                out.push_str(&fragment[pos..start]);
                out.push_str(&format!("<{element}>{body}</{element}>"));
                pos = end;
            }
            None => {
                out.push_str(&fragment[pos..open_end]);
                pos = open_end;
            }
        }
    }

    out.push_str(&fragment[pos..]);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Link,
    Script,
}

impl TagKind {
    fn tag_len(self) -> usize {
        match self {
            TagKind::Link => "<link".len(),
            TagKind::Script => "<script".len(),
        }
    }
}

/// Next `<link` or `<script` tag opening at or after `from`.
fn next_tag(lower: &str, from: usize) -> Option<(usize, TagKind)> {
    let mut pos = from;
    while let Some(i) = lower[pos..].find('<') {
        let at = pos + i;
        let rest = &lower[at..];
        for (name, kind) in [("<link", TagKind::Link), ("<script", TagKind::Script)] {
            if rest.starts_with(name) {
                let next = rest[name.len()..].chars().next();
                if matches!(next, Some(c) if c.is_ascii_whitespace() || c == '>' || c == '/') {
                    return Some((at, kind));
                }
            }
        }
        pos = at + 1;
    }
    None
}

/// Attribute list of a tag body; names are lowercased, values unquoted.
fn parse_attributes(body: &str) -> Vec<(String, String)> {
    let bytes = body.as_bytes();
    let mut attrs = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'=' && bytes[i] != b'/' {
            i += 1;
        }
        if name_start == i {
            break;
        }
        let name = body[name_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                i += 1;
                let value_start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                value = body[value_start..i].to_string();
                i += 1;
            } else {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                value = body[value_start..i].to_string();
            }
        }
        attrs.push((name, value));
    }

    attrs
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn stylesheet_href(attrs: &[(String, String)]) -> Option<&str> {
    let rel = attr(attrs, "rel")?;
    if !rel.eq_ignore_ascii_case("stylesheet") {
        return None;
    }
    attr(attrs, "href")
}

fn is_remote_or_absolute(reference: &str) -> bool {
    reference.contains("://")
        || reference.starts_with("//")
        || reference.starts_with('/')
        || reference.starts_with("data:")
}

/// Local file a relative reference points at, if it exists.
fn resolve(reference: &str, sources: &Path) -> Option<PathBuf> {
    if reference.is_empty() || is_remote_or_absolute(reference) {
        return None;
    }
    let file_name = Path::new(reference).file_name()?;
    let path = sources.join(file_name);
    path.is_file().then_some(path)
}
