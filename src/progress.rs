// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Progress reporting (spec.md §6.3, §9).
//!
//! An explicit [`ProgressRange`] is handed to each long-running step
//! instead of relying on ambient global offset/scaling state, so nested
//! stages can report progress within their own sub-range without knowing
//! where that range sits in the overall upgrade.

/// Callback contract a caller implements to receive upgrade progress.
pub trait ProgressSink {
    /// Reports overall progress as a percentage in `0..=100`. Monotonically
    /// non-decreasing across one upgrade; `done` is `true` only on the
    /// final call.
    fn update(&mut self, percent: u8, done: bool);

    /// Reports a human-readable label for the current stage, e.g.
    /// "Erasing image...", "Restarting...".
    fn display_status_text(&mut self, text: &str, done: bool);
}

/// A sink that discards all progress, for library callers that don't want
/// console output (and for tests).
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn update(&mut self, _percent: u8, _done: bool) {}
    fn display_status_text(&mut self, _text: &str, _done: bool) {}
}

/// Maps an inner 0..=100 counter onto a `[min, max]` sub-range of the
/// global progress bar, per spec.md §4.8's fixed checkpoints and
/// linearly-interpolated write phases.
#[derive(Debug, Clone, Copy)]
pub struct ProgressRange {
    min: u8,
    max: u8,
}

impl ProgressRange {
    /// Creates a sub-range `[min, max]` of the global 0-100 scale.
    #[must_use]
    pub fn new(min: u8, max: u8) -> Self {
        assert!(min <= max, "progress range must be non-decreasing");
        ProgressRange { min, max }
    }

    /// Scales `inner` (a 0..=`total` counter) into this range.
    #[must_use]
    pub fn scale(&self, inner: u64, total: u64) -> u8 {
        if total == 0 {
            return self.max;
        }
        let span = u64::from(self.max - self.min);
        self.min + u8::try_from((inner.min(total) * span) / total).unwrap_or(self.max - self.min)
    }
}
