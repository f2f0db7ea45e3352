use super::{Composite, EventBuilder, StreamQueue};
use crate::config::ConfigSpc;
use crate::constants::*;
use crate::correlator::{find_sync, is_valid, Side, SyncParams, SyncReport};
use crate::event::Event;

fn any_empty(queues: &[StreamQueue]) -> bool {
    queues.is_empty() || queues.iter().any(|q| q.is_empty())
}

/// Drop every queue head that `keep` rejects. Returns true if anything was dropped.
fn drop_unusable(queues: &mut [StreamQueue], keep: impl Fn(&Event) -> bool) -> bool {
    let mut dropped = false;
    for queue in queues.iter_mut() {
        if queue.front().is_some_and(|ev| !keep(ev)) {
            spdlog::debug!("Dropping unusable event from {}", queue.name);
            queue.drop_front();
            dropped = true;
        }
    }
    dropped
}

fn pop_heads(queues: &mut [StreamQueue]) -> Composite {
    queues.iter_mut().filter_map(|q| q.pop_front()).collect()
}

/// Matches events whose key (trigger or event number) is equal in every stream. The
/// smallest key is assumed lost in the streams lacking it and its events are dropped.
pub struct KeyedBuilder {
    name: &'static str,
    key: fn(&Event) -> Option<u64>,
}

impl KeyedBuilder {
    pub fn trigger_n() -> Self {
        Self {
            name: "TriggerN",
            key: |ev| ev.is_flag_trigger().then(|| ev.trigger_n() as u64),
        }
    }

    pub fn event_n() -> Self {
        Self {
            name: "EventN",
            key: |ev| Some(ev.event_n() as u64),
        }
    }
}

impl EventBuilder for KeyedBuilder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn build(&mut self, queues: &mut [StreamQueue], _flush: bool) -> Vec<Composite> {
        let key = self.key;
        let mut out = Vec::new();
        while !any_empty(queues) {
            if drop_unusable(queues, |ev| key(ev).is_some()) {
                continue;
            }
            let keys: Vec<u64> = queues
                .iter()
                .filter_map(|q| q.front().and_then(|ev| key(ev)))
                .collect();
            let Some(min) = keys.iter().min().copied() else {
                break;
            };
            if keys.iter().all(|k| *k == min) {
                out.push(pop_heads(queues));
                continue;
            }
            for queue in queues.iter_mut() {
                if queue.front().and_then(|ev| key(ev)) == Some(min) {
                    spdlog::debug!("{} {} missing in some stream, dropping it from {}", self.name, min, queue.name);
                    queue.drop_front();
                }
            }
        }
        out
    }
}

/// Matches events whose time windows overlap in every stream. Windows are half open;
/// identical point windows also match.
pub struct TimestampBuilder;

impl EventBuilder for TimestampBuilder {
    fn name(&self) -> &'static str {
        "Timestamp"
    }

    fn build(&mut self, queues: &mut [StreamQueue], _flush: bool) -> Vec<Composite> {
        let mut out = Vec::new();
        while !any_empty(queues) {
            if drop_unusable(queues, Event::is_flag_timestamp) {
                continue;
            }
            let windows: Vec<(u64, u64)> = queues
                .iter()
                .filter_map(|q| q.front())
                .map(|ev| (ev.timestamp_begin(), ev.timestamp_end()))
                .collect();
            let max_begin = windows.iter().map(|w| w.0).max().unwrap_or(0);
            let min_end = windows.iter().map(|w| w.1).min().unwrap_or(0);
            if max_begin < min_end || windows.iter().all(|w| *w == windows[0]) {
                out.push(pop_heads(queues));
                continue;
            }
            // the window ending first cannot overlap anything still to come
            let first = windows
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| w.1)
                .map(|(i, _)| i)
                .unwrap_or(0);
            queues[first].drop_front();
        }
        out
    }
}

/// Aligns streams by a wrapping BCID tag using [`find_sync`]. The first connection is the
/// reference; a reference event is built only if every other stream has a synchronised
/// partner for it.
///
/// Configuration keys: `BcidTag`, `BcidWindow`, `BcidModulus`, `BcidRange`, `BcidMinRun`.
pub struct BcidBuilder {
    tag: String,
    window: usize,
    params: SyncParams,
}

impl BcidBuilder {
    pub fn new(config: ConfigSpc) -> Self {
        let defaults = SyncParams::default();
        let (tag, window, params) = match config {
            Some(conf) => (
                conf.get("BcidTag", String::from(DEFAULT_BCID_TAG)),
                conf.get("BcidWindow", DEFAULT_BCID_WINDOW),
                SyncParams {
                    modulus: conf.get("BcidModulus", defaults.modulus),
                    range: conf.get("BcidRange", defaults.range),
                    min_run: conf.get("BcidMinRun", defaults.min_run),
                },
            ),
            None => (String::from(DEFAULT_BCID_TAG), DEFAULT_BCID_WINDOW, defaults),
        };
        let params = match params.validate() {
            Ok(()) => params,
            Err(e) => {
                spdlog::warn!("Bad BCID builder settings ({}), using defaults", e);
                defaults
            }
        };
        Self {
            tag,
            window: window.max(1),
            params,
        }
    }

    fn ids(&self, queue: &StreamQueue) -> Vec<Option<u32>> {
        queue
            .events
            .iter()
            .map(|ev| ev.tags().try_get::<u32>(&self.tag))
            .collect()
    }
}

impl EventBuilder for BcidBuilder {
    fn name(&self) -> &'static str {
        "Bcid"
    }

    fn build(&mut self, queues: &mut [StreamQueue], flush: bool) -> Vec<Composite> {
        if any_empty(queues) {
            return Vec::new();
        }
        if !flush && queues.iter().any(|q| q.len() < self.window) {
            return Vec::new();
        }
        if queues.len() == 1 {
            return queues[0].events.drain(..).map(|ev| vec![ev]).collect();
        }

        let reference = self.ids(&queues[0]);
        let mut reports: Vec<SyncReport> = Vec::with_capacity(queues.len() - 1);
        for queue in &queues[1..] {
            match find_sync(&self.ids(queue), &reference, &self.params) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    spdlog::error!("BCID alignment of {} failed: {}", queue.name, e);
                    return Vec::new();
                }
            }
        }

        // for each reference event matched everywhere, its partner index in every queue
        let mut rows: Vec<Vec<usize>> = Vec::new();
        for r in 0..reference.len() {
            if !reports
                .iter()
                .all(|rep| is_valid(&rep.blocks, Side::Reference, r))
            {
                continue;
            }
            let mut row = Vec::with_capacity(queues.len());
            row.push(r);
            for rep in &reports {
                if let Some(b) = rep
                    .blocks
                    .iter()
                    .find(|b| r >= b.offset2 && r < b.offset2 + b.length)
                {
                    row.push(b.offset1 + (r - b.offset2));
                }
            }
            rows.push(row);
        }

        let out: Vec<Composite> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(queues.iter())
                    .filter_map(|(idx, q)| q.events.get(*idx).cloned())
                    .collect()
            })
            .collect();

        match rows.last() {
            Some(last) if !flush => {
                for (queue, idx) in queues.iter_mut().zip(last.iter()) {
                    queue.consume(idx + 1, rows.len());
                }
            }
            _ => {
                if rows.is_empty() && !flush {
                    spdlog::warn!(
                        "No BCID match within {} events, discarding the window",
                        self.window
                    );
                }
                for queue in queues.iter_mut() {
                    let n = queue.len();
                    queue.consume(n, rows.len());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn queue(id: u32, events: Vec<Event>) -> StreamQueue {
        let mut q = StreamQueue::new(id, &format!("q{id}"));
        q.events.extend(events.into_iter().map(Arc::new));
        q
    }

    fn bcid_events(ids: &[u32]) -> Vec<Event> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let mut ev = Event::raw("Ex0Raw");
                ev.set_event_n(i as u32);
                ev.set_tag(DEFAULT_BCID_TAG, *id);
                ev
            })
            .collect()
    }

    fn timed(begin: u64, end: u64) -> Event {
        let mut ev = Event::raw("Ex0Raw");
        ev.set_timestamp(begin, end);
        ev
    }

    #[test]
    fn test_event_n_keyed() {
        let mk = |n: &[u32]| {
            n.iter()
                .map(|n| {
                    let mut ev = Event::raw("Ex0Raw");
                    ev.set_event_n(*n);
                    ev
                })
                .collect::<Vec<_>>()
        };
        let mut queues = vec![queue(1, mk(&[0, 1, 2, 3])), queue(2, mk(&[0, 2, 3]))];
        let mut builder = KeyedBuilder::event_n();
        let out = builder.build(&mut queues, false);
        let built: Vec<u32> = out.iter().map(|c| c[1].event_n()).collect();
        assert_eq!(built, vec![0, 2, 3]);
        assert_eq!(queues[0].dropped, 1);
        assert!(queues.iter().all(StreamQueue::is_empty));
    }

    #[test]
    fn test_untriggered_dropped() {
        let mut ev = Event::raw("Ex0Raw");
        ev.set_event_n(4);
        let mut queues = vec![queue(1, vec![ev])];
        let out = KeyedBuilder::trigger_n().build(&mut queues, false);
        assert!(out.is_empty());
        assert_eq!(queues[0].dropped, 1);
    }

    #[test]
    fn test_timestamp_overlap() {
        let mut queues = vec![
            queue(1, vec![timed(0, 10), timed(20, 30), timed(40, 50)]),
            queue(2, vec![timed(5, 15), timed(45, 46)]),
        ];
        let out = TimestampBuilder.build(&mut queues, false);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1][0].timestamp_begin(), 40);
        assert_eq!(queues[0].dropped, 1);
        assert_eq!(queues[1].dropped, 0);
    }

    #[test]
    fn test_timestamp_points() {
        let mut queues = vec![
            queue(1, vec![timed(7, 7), timed(9, 9)]),
            queue(2, vec![timed(7, 7), timed(8, 8)]),
        ];
        let out = TimestampBuilder.build(&mut queues, false);
        assert_eq!(out.len(), 1);
        assert_eq!(queues[1].dropped, 1);
        assert_eq!(queues[0].len(), 1);
    }

    #[test]
    fn test_bcid_waits_for_window() {
        let ids = [1, 2, 3, 4, 5];
        let mut queues = vec![queue(1, bcid_events(&ids)), queue(2, bcid_events(&ids))];
        let mut builder = BcidBuilder::new(None);
        assert!(builder.build(&mut queues, false).is_empty());
        assert_eq!(builder.build(&mut queues, true).len(), 5);
        assert!(queues.iter().all(|q| q.is_empty() && q.dropped == 0));
    }

    #[test]
    fn test_bcid_realigns_dropped_event() {
        let full = [5, 2, 6, 0, 1, 1, 5, 0, 3, 0, 1, 6, 6, 1];
        let mut lossy = full.to_vec();
        lossy.remove(3);
        let mut queues = vec![queue(1, bcid_events(&lossy)), queue(2, bcid_events(&full))];
        let out = BcidBuilder::new(None).build(&mut queues, true);
        assert_eq!(out.len(), 10);
        // reference event 3 pairs with event 4 of the complete stream
        assert_eq!(out[0][0].event_n(), 3);
        assert_eq!(out[0][1].event_n(), 4);
        assert_eq!(queues[0].dropped, 3);
        assert_eq!(queues[1].dropped, 4);
    }

    #[test]
    fn test_bcid_partial_consumption() {
        let mut conf = crate::config::Configuration::new();
        conf.set("BcidWindow", 6);
        let ids = [3, 1, 4, 1, 5, 0, 2, 6];
        let mut queues = vec![queue(1, bcid_events(&ids)), queue(2, bcid_events(&ids))];
        let out = BcidBuilder::new(Some(Arc::new(conf))).build(&mut queues, false);
        assert_eq!(out.len(), 8);
        assert!(queues.iter().all(StreamQueue::is_empty));
    }
}
