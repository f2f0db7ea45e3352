//! Event selection and statistics for file readers.
use std::collections::BTreeMap;

use super::error::FileIOError;
use super::event::{Event, EventSp};
use super::io::FileReader;

/// Ranges an event must fall into to be selected. A range given as `(0, 0)` on the command
/// line means "no restriction" and is stored as None. A zero upper bound with a non-zero lower
/// bound leaves the range open ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSelection {
    /// Half open `[low, high)`.
    pub event: Option<(u32, u32)>,
    /// Half open `[low, high)`.
    pub trigger: Option<(u32, u32)>,
    /// Closed `[low, high]`, the whole event time range must lie inside.
    pub timestamp: Option<(u64, u64)>,
}

fn range<T: Default + PartialEq>(low: T, high: T, open: T) -> Option<(T, T)> {
    match (low == T::default(), high == T::default()) {
        (true, true) => None,
        (false, true) => Some((low, open)),
        _ => Some((low, high)),
    }
}

impl EventSelection {
    pub fn from_bounds(
        event: (u32, u32),
        trigger: (u32, u32),
        timestamp: (u64, u64),
    ) -> Self {
        Self {
            event: range(event.0, event.1, u32::MAX),
            trigger: range(trigger.0, trigger.1, u32::MAX),
            timestamp: range(timestamp.0, timestamp.1, u64::MAX),
        }
    }

    /// True if any range was given.
    pub fn is_active(&self) -> bool {
        self.event.is_some() || self.trigger.is_some() || self.timestamp.is_some()
    }

    pub fn accepts(&self, event: &Event) -> bool {
        let in_event = self
            .event
            .map(|(lo, hi)| event.event_n() >= lo && event.event_n() < hi)
            .unwrap_or(true);
        let in_trigger = self
            .trigger
            .map(|(lo, hi)| event.trigger_n() >= lo && event.trigger_n() < hi)
            .unwrap_or(true);
        let in_time = self
            .timestamp
            .map(|(lo, hi)| event.timestamp_begin() >= lo && event.timestamp_end() <= hi)
            .unwrap_or(true);
        in_event && in_trigger && in_time
    }
}

/// Read `reader` to its end. Every event is recorded in `stats` and handed to `on_event`
/// together with the reader's progress. Returns the number of events read.
pub fn read_to_end<F, E>(
    reader: &mut dyn FileReader,
    stats: &mut ReaderStats,
    mut on_event: F,
) -> Result<u64, E>
where
    F: FnMut(&EventSp, f32) -> Result<(), E>,
    E: From<FileIOError>,
{
    let mut event_count: u64 = 0;
    while let Some(ev) = reader.read()? {
        stats.record(&ev);
        on_event(&ev, reader.progress())?;
        event_count += 1;
    }
    Ok(event_count)
}

/// Summary of a file as gathered by the reader tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub events: u64,
    pub trigger_low: Option<u32>,
    pub trigger_high: Option<u32>,
    /// Stream number to description of every sub-event source seen.
    pub devices: BTreeMap<u32, String>,
}

impl ReaderStats {
    pub fn record(&mut self, event: &Event) {
        self.events += 1;
        for sub in event.sub_events() {
            let tg = sub.trigger_n();
            self.trigger_low = Some(self.trigger_low.map_or(tg, |low| low.min(tg)));
            self.trigger_high = Some(self.trigger_high.map_or(tg, |high| high.max(tg)));
            self.devices
                .entry(sub.stream_n())
                .or_insert_with(|| sub.description().to_string());
        }
    }
}
