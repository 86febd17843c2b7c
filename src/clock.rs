//! Playback clock: maps musical position to real seconds under a tempo map.
//!
//! The tempo map is a list of piecewise-constant segments. Each segment
//! records the real time at which it begins, so a lookup is one binary
//! search plus one multiply. Tempo is given in quarter notes per minute;
//! a whole note therefore lasts `240 / bpm` seconds.
//!
//! Real time here is relative to the start of the score. The scheduler adds
//! its own origin to place the score on the host audio clock.

use crate::model::TempoMark;
use crate::rational::RationalTime;

/// Seconds per whole note at a quarter-note tempo.
pub fn whole_note_seconds(bpm: f64) -> f64 {
    240.0 / bpm
}

/// A stretch of the score played at one tempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoSegment {
    /// Musical position the segment starts at
    pub start: RationalTime,
    /// Real time (seconds from score start) of `start`
    pub real_start: f64,
    /// Quarter notes per minute
    pub bpm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackClock {
    /// Never empty; the first segment starts at position zero, real time zero.
    segments: Vec<TempoSegment>,
}

impl PlaybackClock {
    /// One tempo for the whole score.
    pub fn constant(bpm: f64) -> Self {
        Self {
            segments: vec![TempoSegment {
                start: RationalTime::ZERO,
                real_start: 0.0,
                bpm: sanitize(bpm),
            }],
        }
    }

    /// Follow the score's tempo marks, scaled so the tempo at position zero
    /// is `bpm`. A score without a mark at zero starts at `bpm` unscaled.
    pub fn from_marks(marks: &[TempoMark], bpm: f64) -> Self {
        let bpm = sanitize(bpm);
        let written_start = marks
            .iter()
            .filter(|m| m.position <= RationalTime::ZERO)
            .last()
            .map(|m| m.bpm)
            .unwrap_or(bpm);
        let factor = bpm / written_start;

        let mut clock = Self::constant(bpm);
        for mark in marks.iter().filter(|m| m.position > RationalTime::ZERO) {
            let real_start = clock.to_real(mark.position);
            let segment = TempoSegment {
                start: mark.position,
                real_start,
                bpm: sanitize(mark.bpm * factor),
            };
            match clock.segments.last_mut() {
                Some(last) if last.start == mark.position => *last = segment,
                _ => clock.segments.push(segment),
            }
        }
        clock
    }

    pub fn segments(&self) -> &[TempoSegment] {
        &self.segments
    }

    fn segment_index(&self, position: RationalTime) -> usize {
        self.segments
            .partition_point(|s| s.start <= position)
            .saturating_sub(1)
    }

    /// Real seconds from score start at which `position` sounds.
    pub fn to_real(&self, position: RationalTime) -> f64 {
        let s = &self.segments[self.segment_index(position)];
        s.real_start + (position.to_f64() - s.start.to_f64()) * whole_note_seconds(s.bpm)
    }

    /// Quarter-note tempo in effect at `position`.
    pub fn tempo_at(&self, position: RationalTime) -> f64 {
        self.segments[self.segment_index(position)].bpm
    }

    /// Multiply every tempo at and after `split` by `factor`.
    ///
    /// Real time up to `split` is unchanged, so anything already placed on
    /// the host clock before `split` stays valid.
    pub fn rescale_from(&mut self, split: RationalTime, factor: f64) {
        if !(factor.is_finite() && factor > 0.0) {
            return;
        }
        let i = self.segment_index(split);
        if self.segments[i].start != split && split > RationalTime::ZERO {
            let real_start = self.to_real(split);
            let bpm = self.segments[i].bpm;
            self.segments.insert(
                i + 1,
                TempoSegment {
                    start: split,
                    real_start,
                    bpm,
                },
            );
        }

        let first = self.segment_index(split);
        for s in &mut self.segments[first..] {
            s.bpm = sanitize(s.bpm * factor);
        }
        for j in (first + 1)..self.segments.len() {
            let prev = self.segments[j - 1];
            let span = self.segments[j].start.to_f64() - prev.start.to_f64();
            self.segments[j].real_start = prev.real_start + span * whole_note_seconds(prev.bpm);
        }
    }

    /// Make the tempo at `split` equal `bpm`, scaling later tempo marks by
    /// the same ratio.
    pub fn set_tempo_from(&mut self, split: RationalTime, bpm: f64) {
        let current = self.tempo_at(split);
        self.rescale_from(split, sanitize(bpm) / current);
    }
}

fn sanitize(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        crate::config::DEFAULT_TEMPO_BPM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: i64, d: i64) -> RationalTime {
        RationalTime::new(n, d).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn constant_tempo() {
        let clock = PlaybackClock::constant(120.0);
        assert!(approx(clock.to_real(r(1, 4)), 0.5));
        assert!(approx(clock.to_real(r(1, 1)), 2.0));
    }

    #[test]
    fn marks_are_scaled_to_the_requested_start_tempo() {
        let marks = [
            TempoMark {
                position: RationalTime::ZERO,
                bpm: 60.0,
            },
            TempoMark {
                position: r(1, 1),
                bpm: 30.0,
            },
        ];
        let clock = PlaybackClock::from_marks(&marks, 120.0);
        assert_eq!(clock.tempo_at(RationalTime::ZERO), 120.0);
        assert_eq!(clock.tempo_at(r(3, 2)), 60.0);
        assert!(approx(clock.to_real(r(1, 1)), 2.0));
        assert!(approx(clock.to_real(r(2, 1)), 6.0));
    }

    #[test]
    fn rescale_keeps_the_past_and_stays_monotone() {
        let mut clock = PlaybackClock::constant(120.0);
        let before = clock.to_real(r(1, 2));
        clock.rescale_from(r(1, 2), 0.5);
        assert!(approx(clock.to_real(r(1, 2)), before), "continuous at the split");
        assert!(approx(clock.to_real(r(1, 4)), 0.5), "earlier positions unchanged");
        assert!(approx(clock.to_real(r(1, 1)), 1.0 + 2.0));

        let mut last = f64::MIN;
        for q in 0..16 {
            let t = clock.to_real(r(q, 4));
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn set_tempo_scales_later_marks() {
        let marks = [TempoMark {
            position: r(1, 1),
            bpm: 60.0,
        }];
        let mut clock = PlaybackClock::from_marks(&marks, 120.0);
        clock.set_tempo_from(RationalTime::ZERO, 240.0);
        assert_eq!(clock.tempo_at(RationalTime::ZERO), 240.0);
        assert_eq!(clock.tempo_at(r(1, 1)), 120.0);
    }
}
