use crate::error::InjectError;
use crate::marker::{self, Identity, MarkerHeader};
use crate::manifest::{InjectAt, InjectionPoint};

/// Where a wrapped fragment goes in the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    HeadPrepend,
    HeadAppend,
    BodyPrepend,
    BodyAppend,
}

impl Location {
    pub fn from_manifest(point: InjectionPoint, at: InjectAt) -> Self {
        match (point, at) {
            (InjectionPoint::Head, InjectAt::Head) => Location::HeadPrepend,
            (InjectionPoint::Head, InjectAt::Tail) => Location::HeadAppend,
            (InjectionPoint::Body, InjectAt::Head) => Location::BodyPrepend,
            (InjectionPoint::Body, InjectAt::Tail) => Location::BodyAppend,
        }
    }

    pub fn anchor(self) -> &'static str {
        match self {
            Location::HeadPrepend => "<head>",
            Location::HeadAppend => "</head>",
            Location::BodyPrepend => "<body>",
            Location::BodyAppend => "</body>",
        }
    }

    /// Byte index where a fragment is inserted, if the anchor exists.
    fn insertion_index(self, document: &str) -> Option<usize> {
        let lower = document.to_ascii_lowercase();
        match self {
            Location::HeadPrepend => after_open_tag(&lower, "head"),
            Location::HeadAppend => lower.find("</head>"),
            Location::BodyPrepend => after_open_tag(&lower, "body"),
            Location::BodyAppend => lower.find("</body>"),
        }
    }
}

/// Index just past the first `<name>` or `<name attr...>` tag.
fn after_open_tag(lower: &str, name: &str) -> Option<usize> {
    let open = format!("<{name}");
    let mut pos = 0;
    while let Some(i) = lower[pos..].find(&open) {
        let at = pos + i + open.len();
        match lower[at..].chars().next() {
            Some('>') => return Some(at + 1),
            Some(c) if c.is_ascii_whitespace() => {
                return lower[at..].find('>').map(|gt| at + gt + 1);
            }
            _ => pos = at,
        }
    }
    None
}

/// Remove every block injected for `id`, whatever its version. Returns the
/// new document and the number of blocks removed.
pub fn remove(document: &str, id: &str) -> Result<(String, usize), InjectError> {
    let mut ranges = Vec::new();
    for block in marker::scan(document) {
        if block.header.id != id {
            continue;
        }
        let Some(end) = block.end else {
            return Err(InjectError::UnterminatedBlock {
                id: block.header.id,
                instance: block.header.instance,
            });
        };
        ranges.push(block.start..end);
    }

    if ranges.is_empty() {
        return Ok((document.to_string(), 0));
    }

    let mut out = String::with_capacity(document.len());
    let mut pos = 0;
    for range in &ranges {
        out.push_str(&document[pos..range.start]);
        pos = range.end;
    }
    out.push_str(&document[pos..]);
    Ok((out, ranges.len()))
}

/// Replace any block for `identity.id` with a freshly wrapped `fragment` at
/// `location`. On error the caller keeps the original document.
pub fn inject(
    document: &str,
    fragment: &str,
    identity: &Identity,
    location: Location,
) -> Result<String, InjectError> {
    let (mut cleaned, removed) = remove(document, &identity.id)?;
    let at = location
        .insertion_index(&cleaned)
        .ok_or(InjectError::MissingAnchor(location.anchor()))?;

    if removed > 0 {
        log::debug!("Replacing {removed} existing block(s) for '{}'", identity.id);
    }
    cleaned.insert_str(at, &marker::wrap(identity, fragment));
    Ok(cleaned)
}

/// Headers of all addon blocks present in the document.
pub fn installed(document: &str) -> Vec<MarkerHeader> {
    marker::scan(document).into_iter().map(|b| b.header).collect()
}
