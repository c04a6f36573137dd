use memmap2::Mmap;
use std::path::Path;

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must drop the `Mmap` before opening the
/// same file for writing; no other process is expected to touch it meanwhile.
pub fn mmap_file(path: &Path) -> std::io::Result<Mmap> {
    let file = std::fs::File::open(path)?;
    // SAFETY: We only read from this mapping; writers run after it is dropped.
    unsafe { Mmap::map(&file) }
}

/// Parse a catalogue offset such as `"0x1A2B"` or `"1a2b"`.
pub fn parse_hex_offset(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Parse a space-separated hex byte list such as `"90 90 EB"`.
pub fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    text.split_whitespace()
        .map(|tok| {
            if tok.len() > 2 {
                return None;
            }
            u8::from_str_radix(tok, 16).ok()
        })
        .collect()
}
