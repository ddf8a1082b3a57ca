//! Declarative effects and the event → effect binding table.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_leds::RGB8;

use crate::event::EventKind;
use crate::frame::BLACK;

/// Identifies an effect for de-duplication. Two events bound to the same
/// effect share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectId {
    Listening,
    WakeWord,
    Transcript,
    Connected,
    Disconnected,
    Off,
}

/// What happens once an effect has run through its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Keep showing the last frame until something else arrives.
    Hold,
    /// Blank the LEDs.
    RevertToIdle,
    /// May be cut short by any newer effect.
    Replaceable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Solid(RGB8),
    /// One color per LED, starting at index 0. LEDs past the end of the list
    /// are black; entries past the end of the strip are dropped.
    Pixels(Vec<RGB8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub pattern: Pattern,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect {
    pub id: EffectId,
    pub steps: Vec<Step>,
    pub completion: Completion,
}

impl Effect {
    pub fn solid(id: EffectId, color: RGB8, duration: Duration, completion: Completion) -> Self {
        Self {
            id,
            steps: vec![Step {
                pattern: Pattern::Solid(color),
                duration,
            }],
            completion,
        }
    }

    /// A solid color shown until the next effect.
    pub fn hold(id: EffectId, color: RGB8) -> Self {
        Self::solid(id, color, Duration::ZERO, Completion::Hold)
    }

    /// `count` on/off cycles, then blank.
    pub fn flash(id: EffectId, color: RGB8, on: Duration, off: Duration, count: u32) -> Self {
        let steps = (0..count)
            .flat_map(|_| {
                [
                    Step {
                        pattern: Pattern::Solid(color),
                        duration: on,
                    },
                    Step {
                        pattern: Pattern::Solid(BLACK),
                        duration: off,
                    },
                ]
            })
            .collect();
        Self {
            id,
            steps,
            completion: Completion::RevertToIdle,
        }
    }

    /// No steps: completes the moment it starts and leaves the strip dark.
    pub fn off() -> Self {
        Self {
            id: EffectId::Off,
            steps: Vec::new(),
            completion: Completion::RevertToIdle,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.duration).sum()
    }
}

/// Effect colors as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub listening: [u8; 3],
    pub wake: [u8; 3],
    pub transcript: [u8; 3],
    pub connected: [u8; 3],
    pub disconnected: [u8; 3],
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            listening: [255, 255, 0],
            wake: [0, 0, 255],
            transcript: [0, 255, 0],
            connected: [0, 255, 0],
            disconnected: [255, 0, 0],
        }
    }
}

fn rgb([r, g, b]: [u8; 3]) -> RGB8 {
    RGB8::new(r, g, b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub wake_ms: u64,
    pub transcript_ms: u64,
    pub flash_on_ms: u64,
    pub flash_off_ms: u64,
    pub flash_count: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            wake_ms: 1000,
            transcript_ms: 1000,
            flash_on_ms: 300,
            flash_off_ms: 300,
            flash_count: 3,
        }
    }
}

/// Static mapping from event kind to the effect it triggers.
#[derive(Debug, Clone)]
pub struct EffectTable {
    effects: HashMap<EventKind, Effect>,
}

impl EffectTable {
    pub fn new(palette: &Palette, timing: &Timing) -> Self {
        let listening = Effect::hold(EffectId::Listening, rgb(palette.listening));
        let mut table = Self::empty();
        table.bind(EventKind::StreamingStarted, listening.clone());
        table.bind(EventKind::VoiceStarted, listening);
        table.bind(
            EventKind::Detection,
            Effect::solid(
                EffectId::WakeWord,
                rgb(palette.wake),
                Duration::from_millis(timing.wake_ms),
                Completion::RevertToIdle,
            ),
        );
        table.bind(
            EventKind::Transcript,
            Effect::solid(
                EffectId::Transcript,
                rgb(palette.transcript),
                Duration::from_millis(timing.transcript_ms),
                Completion::RevertToIdle,
            ),
        );
        table.bind(
            EventKind::SatelliteConnected,
            Effect::flash(
                EffectId::Connected,
                rgb(palette.connected),
                Duration::from_millis(timing.flash_on_ms),
                Duration::from_millis(timing.flash_off_ms),
                timing.flash_count,
            ),
        );
        table.bind(
            EventKind::SatelliteDisconnected,
            Effect::hold(EffectId::Disconnected, rgb(palette.disconnected)),
        );
        table.bind(EventKind::StreamingStopped, Effect::off());
        table.bind(EventKind::RunSatellite, Effect::off());
        table
    }

    pub fn empty() -> Self {
        Self {
            effects: HashMap::new(),
        }
    }

    pub fn bind(&mut self, kind: EventKind, effect: Effect) {
        self.effects.insert(kind, effect);
    }

    pub fn lookup(&self, kind: EventKind) -> Option<&Effect> {
        self.effects.get(&kind)
    }
}

impl Default for EffectTable {
    fn default() -> Self {
        Self::new(&Palette::default(), &Timing::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bindings() {
        let table = EffectTable::default();
        let listening = table.lookup(EventKind::StreamingStarted).unwrap();
        assert_eq!(listening, table.lookup(EventKind::VoiceStarted).unwrap());
        assert_eq!(listening.completion, Completion::Hold);
        assert_eq!(
            listening.steps[0].pattern,
            Pattern::Solid(RGB8::new(255, 255, 0))
        );

        let wake = table.lookup(EventKind::Detection).unwrap();
        assert_eq!(wake.id, EffectId::WakeWord);
        assert_eq!(wake.total_duration(), Duration::from_secs(1));
        assert_eq!(wake.completion, Completion::RevertToIdle);

        assert_eq!(
            table.lookup(EventKind::RunSatellite).unwrap().id,
            EffectId::Off
        );
        assert_eq!(
            table.lookup(EventKind::SatelliteDisconnected).unwrap().completion,
            Completion::Hold
        );
    }

    #[test]
    fn test_flash_alternates_color_and_black() {
        let table = EffectTable::default();
        let flash = table.lookup(EventKind::SatelliteConnected).unwrap();
        assert_eq!(flash.steps.len(), 6);
        assert_eq!(flash.total_duration(), Duration::from_millis(1800));
        for (i, step) in flash.steps.iter().enumerate() {
            let expected = if i % 2 == 0 { RGB8::new(0, 255, 0) } else { BLACK };
            assert_eq!(step.pattern, Pattern::Solid(expected));
        }
    }

    #[test]
    fn test_palette_and_timing_overrides() {
        let palette = Palette {
            wake: [10, 20, 30],
            ..Palette::default()
        };
        let timing = Timing {
            wake_ms: 250,
            flash_count: 0,
            ..Timing::default()
        };
        let table = EffectTable::new(&palette, &timing);
        let wake = table.lookup(EventKind::Detection).unwrap();
        assert_eq!(wake.steps[0].pattern, Pattern::Solid(RGB8::new(10, 20, 30)));
        assert_eq!(wake.total_duration(), Duration::from_millis(250));
        assert!(
            table
                .lookup(EventKind::SatelliteConnected)
                .unwrap()
                .steps
                .is_empty()
        );
    }

    #[test]
    fn test_empty_table_binds_nothing() {
        let table = EffectTable::empty();
        assert!(EventKind::ALL.iter().all(|k| table.lookup(*k).is_none()));
    }
}
