use crate::catalogue::FilePatchSet;

/// State of one patch window in a target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Vanilla,
    Patched,
    Unknown,
}

/// Classify the observed bytes of a window. A short read never equals either
/// expected value and so classifies as `Unknown`.
pub fn classify(observed: &[u8], vanilla: &[u8], patched: &[u8]) -> WindowState {
    if observed == vanilla {
        WindowState::Vanilla
    } else if observed == patched {
        WindowState::Patched
    } else {
        WindowState::Unknown
    }
}

/// Bytes of `data` in `[offset, offset + len)`, cut short at end of data.
pub fn window(data: &[u8], offset: u64, len: usize) -> &[u8] {
    let Ok(start) = usize::try_from(offset) else {
        return &[];
    };
    if start >= data.len() {
        return &[];
    }
    let end = start.saturating_add(len).min(data.len());
    &data[start..end]
}

/// Per-window states for one patch set, in patch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetClassification {
    pub states: Vec<WindowState>,
}

impl SetClassification {
    pub fn of(data: &[u8], set: &FilePatchSet) -> Self {
        let states = set
            .patches
            .iter()
            .map(|op| {
                let observed = window(data, op.offset, op.vanilla.len());
                classify(observed, &op.vanilla, &op.patched)
            })
            .collect();
        Self { states }
    }

    pub fn all_recognized(&self) -> bool {
        !self.states.contains(&WindowState::Unknown)
    }

    pub fn any_vanilla(&self) -> bool {
        self.states.contains(&WindowState::Vanilla)
    }

    pub fn patched_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == WindowState::Patched)
            .count()
    }
}
