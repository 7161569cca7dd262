//! End-of-stream text repair.
//!
//! A stream cut off by its producer can leave syntax dangling. Repair runs
//! once, on completion, before the final parse; never while streaming, where
//! the open construct is expected to close later.

use crate::boundary::{FenceTracker, open_fence_at_end};

/// Closes whatever a truncated stream left open.
pub trait TextRepair: Send + Sync {
    fn repair(&self, text: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub code_fences: bool,
    pub display_math: bool,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            code_fences: true,
            display_math: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefaultRepair {
    pub options: RepairOptions,
}

impl TextRepair for DefaultRepair {
    fn repair(&self, text: &str) -> String {
        let mut out = text.to_string();
        if self.options.code_fences {
            if let Some(fence) = open_fence_at_end(text) {
                push_line(&mut out, &fence.closing_line());
                return out;
            }
        }
        if self.options.display_math && has_open_display_math(text) {
            push_line(&mut out, "$$");
        }
        out
    }
}

/// No-op repair
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRepair;

impl TextRepair for NoRepair {
    fn repair(&self, text: &str) -> String {
        text.to_string()
    }
}

fn push_line(out: &mut String, line: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
    out.push('\n');
}

/// Odd number of unescaped `$$` outside code fences
fn has_open_display_math(text: &str) -> bool {
    let mut fences = FenceTracker::default();
    let mut open = false;
    for line in text.lines() {
        if fences.feed(line) {
            continue;
        }
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'$' if bytes.get(i + 1) == Some(&b'$') => {
                    open = !open;
                    i += 2;
                }
                _ => i += 1,
            }
        }
    }
    open
}
