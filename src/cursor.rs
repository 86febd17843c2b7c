//! Cursor controller: the playback position as a timeline index.
//!
//! The position is either on an entry or on one of two sentinels bounding the
//! timeline. The visual cursor is shown when the position enters the timeline
//! and hidden when it leaves; steps between entries only move it.

use serde::Serialize;

use crate::rational::RationalTime;
use crate::timeline::{ScoreTimeline, TimelineEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CursorPosition {
    BeforeFirst,
    At(usize),
    AfterLast,
}

impl CursorPosition {
    pub fn index(self) -> Option<usize> {
        match self {
            CursorPosition::At(i) => Some(i),
            _ => None,
        }
    }
}

/// The on-screen cursor drawn by the renderer.
pub trait VisualCursor {
    fn show(&mut self);
    fn hide(&mut self);
    /// Jump to timeline entry `index` without animation.
    fn move_to(&mut self, index: usize);
}

/// A renderer cursor that can only step (`next` / `previous` / `reset`),
/// like the cursor object exposed by score renderers.
pub trait StepCursor {
    /// Back to the first entry.
    fn reset(&mut self);
    fn next(&mut self);
    fn previous(&mut self);
    fn show(&mut self);
    fn hide(&mut self);
}

/// Drives a [`StepCursor`] as a [`VisualCursor`] by stepping to the target.
pub struct StepCursorAdapter<C: StepCursor> {
    inner: C,
    at: Option<usize>,
}

impl<C: StepCursor> StepCursorAdapter<C> {
    pub fn new(inner: C) -> Self {
        Self { inner, at: None }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: StepCursor> VisualCursor for StepCursorAdapter<C> {
    fn show(&mut self) {
        self.inner.show();
    }

    fn hide(&mut self) {
        self.inner.hide();
    }

    fn move_to(&mut self, index: usize) {
        let mut at = match self.at {
            // Going far back: cheaper to restart than to walk
            Some(at) if at <= index || at - index <= index => at,
            _ => {
                self.inner.reset();
                0
            }
        };
        while at < index {
            self.inner.next();
            at += 1;
        }
        while at > index {
            self.inner.previous();
            at -= 1;
        }
        self.at = Some(at);
    }
}

/// Cursor for hosts without a rendered score.
#[derive(Debug, Default)]
pub struct NoVisualCursor;

impl VisualCursor for NoVisualCursor {
    fn show(&mut self) {}
    fn hide(&mut self) {}
    fn move_to(&mut self, _index: usize) {}
}

/// Owns the playback position and keeps the visual cursor in step with it.
pub struct CursorController {
    position: CursorPosition,
    len: usize,
    visual: Box<dyn VisualCursor>,
}

impl CursorController {
    pub fn new(len: usize, visual: Box<dyn VisualCursor>) -> Self {
        Self {
            position: CursorPosition::BeforeFirst,
            len,
            visual,
        }
    }

    pub fn position(&self) -> CursorPosition {
        self.position
    }

    pub fn index(&self) -> Option<usize> {
        self.position.index()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Point at a rebuilt timeline of `len` entries; the position is reset.
    pub fn rebind(&mut self, len: usize) {
        self.reset();
        self.len = len;
    }

    pub fn reset(&mut self) {
        self.go(CursorPosition::BeforeFirst);
    }

    /// Advance one entry; from the last entry this reaches after-last,
    /// where it stays.
    pub fn next(&mut self) -> CursorPosition {
        let target = match self.position {
            CursorPosition::BeforeFirst => self.at_or_after_last(0),
            CursorPosition::At(i) => self.at_or_after_last(i + 1),
            CursorPosition::AfterLast => CursorPosition::AfterLast,
        };
        self.go(target);
        self.position
    }

    /// Step back one entry, stopping at before-first.
    pub fn previous(&mut self) -> CursorPosition {
        let target = match self.position {
            CursorPosition::BeforeFirst | CursorPosition::At(0) => CursorPosition::BeforeFirst,
            CursorPosition::At(i) => CursorPosition::At(i - 1),
            CursorPosition::AfterLast if self.len > 0 => CursorPosition::At(self.len - 1),
            CursorPosition::AfterLast => CursorPosition::BeforeFirst,
        };
        self.go(target);
        self.position
    }

    /// Move to the first entry at or after `position`, or after-last.
    pub fn seek(&mut self, timeline: &ScoreTimeline, position: RationalTime) -> CursorPosition {
        self.set_index(timeline.first_at_or_after(position));
        self.position
    }

    /// Move to entry `index`; indices past the end land on after-last.
    pub fn set_index(&mut self, index: usize) {
        let target = self.at_or_after_last(index);
        self.go(target);
    }

    pub fn current_entry<'t>(&self, timeline: &'t ScoreTimeline) -> Option<&'t TimelineEntry> {
        self.index().and_then(|i| timeline.entry(i))
    }

    fn at_or_after_last(&self, index: usize) -> CursorPosition {
        if index < self.len {
            CursorPosition::At(index)
        } else {
            CursorPosition::AfterLast
        }
    }

    fn go(&mut self, target: CursorPosition) {
        if target == self.position {
            return;
        }
        let was_visible = self.position.index().is_some();
        match target {
            CursorPosition::At(i) => {
                self.visual.move_to(i);
                if !was_visible {
                    self.visual.show();
                }
            }
            _ if was_visible => self.visual.hide(),
            _ => {}
        }
        self.position = target;
    }
}
