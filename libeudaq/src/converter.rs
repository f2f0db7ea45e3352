//! Conversion of raw events into [`StandardEvent`]s.
//!
//! Each detector registers one [`StdEventConverter`] under the hash of its raw event name.
//! The [`StdEventDispatcher`] walks an event tree, resolves a converter for every leaf and
//! threads a single [`StandardEvent`] through all of them.
//!
//! Contract of [`StdEventDispatcher::convert`]:
//! - fake events succeed immediately and leave the output untouched
//! - container events (packet flag or legacy detector events) hand their identity to the
//!   output if it has none yet, then convert every sub-event in order, stopping at the first
//!   failure; the planes of the failing sub-event are removed, earlier planes are kept
//! - leaves are converted by the registered converter; an unknown id is a soft failure
//!   logged at WARN
//! - on success the packet flag of the output is cleared
use std::sync::{Arc, Mutex};

use fxhash::FxHashMap;

use super::config::ConfigSpc;
use super::constants::FLAG_PACK;
use super::error::ConvertError;
use super::event::{Event, EventSp};
use super::registry::Registry;
use super::standard_event::StandardEvent;

/// Decoder from one detector's raw event into planes of a [`StandardEvent`].
///
/// Instances are built with the configuration in effect for the detector and live as long
/// as the dispatcher that built them.
pub trait StdEventConverter: Send + Sync {
    fn converting(&self, src: &Event, dst: &mut StandardEvent) -> Result<(), ConvertError>;
}

pub type ConverterRegistry = Registry<dyn StdEventConverter, ConfigSpc>;

pub struct StdEventDispatcher {
    registry: Arc<ConverterRegistry>,
    config: ConfigSpc,
    converters: Mutex<FxHashMap<u32, Arc<dyn StdEventConverter>>>,
}

impl StdEventDispatcher {
    pub fn new(registry: Arc<ConverterRegistry>, config: ConfigSpc) -> Self {
        Self {
            registry,
            config,
            converters: Mutex::new(FxHashMap::default()),
        }
    }

    /// The converter for a given id, built on first use. The lock is held while building so
    /// concurrent first uses construct a single instance.
    fn converter_for(&self, id: u32) -> Option<Arc<dyn StdEventConverter>> {
        let mut converters = self
            .converters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(conv) = converters.get(&id) {
            return Some(conv.clone());
        }
        let conv = self.registry.make_shared(id, self.config.clone())?;
        converters.insert(id, conv.clone());
        Some(conv)
    }

    /// Convert an event (tree) into `dst`.
    pub fn convert(&self, src: &Event, dst: &mut StandardEvent) -> Result<(), ConvertError> {
        if src.is_flag_fake() {
            return Ok(());
        }
        if !src.is_container() {
            dst.adopt_identity(src);
            return self.convert_leaf(src, dst);
        }

        dst.adopt_identity(src);
        let mut stack: Vec<std::slice::Iter<'_, EventSp>> = vec![src.sub_events().iter()];
        while let Some(level) = stack.last_mut() {
            let Some(sub) = level.next() else {
                stack.pop();
                continue;
            };
            if sub.is_flag_fake() {
                continue;
            }
            if sub.is_container() {
                dst.adopt_identity(sub);
                stack.push(sub.sub_events().iter());
            } else {
                self.convert_leaf(sub, dst)?;
            }
        }
        dst.clear_flag_bit(FLAG_PACK);
        Ok(())
    }

    /// Convert into a fresh [`StandardEvent`].
    pub fn to_standard(&self, src: &Event) -> Result<StandardEvent, ConvertError> {
        let mut dst = StandardEvent::new();
        self.convert(src, &mut dst)?;
        Ok(dst)
    }

    fn convert_leaf(&self, src: &Event, dst: &mut StandardEvent) -> Result<(), ConvertError> {
        let id = src.converter_id();
        let Some(conv) = self.converter_for(id) else {
            spdlog::warn!(
                "No StdEventConverter for {} (id {:#010x}), event {} skipped",
                src.description(),
                id,
                src.event_n()
            );
            return Err(ConvertError::NoConverter {
                id,
                description: src.description().to_string(),
            });
        };
        let n_planes = dst.num_planes();
        match conv.converting(src, dst) {
            Ok(()) => Ok(()),
            Err(e) => {
                dst.truncate_planes(n_planes);
                match &e {
                    ConvertError::Skipped(_) => spdlog::debug!("{}", e),
                    _ => spdlog::warn!("Event {} of {}: {}", src.event_n(), src.description(), e),
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard_event::StandardPlane;

    /// Adds one plane per block, failing on blocks holding 0xFF.
    struct PlanePerBlock;

    impl StdEventConverter for PlanePerBlock {
        fn converting(&self, src: &Event, dst: &mut StandardEvent) -> Result<(), ConvertError> {
            for idx in src.block_num_list() {
                let block = src.get_block(idx)?;
                dst.add_plane(StandardPlane::new(idx, "Test", "Test"))?;
                if block.first() == Some(&0xFF) {
                    return Err(ConvertError::Decode {
                        converter: "PlanePerBlock",
                        block: idx,
                        reason: String::from("poisoned block"),
                    });
                }
            }
            Ok(())
        }
    }

    fn dispatcher() -> StdEventDispatcher {
        let mut reg = ConverterRegistry::new("StdEventConverter");
        reg.register("TestRaw", |_| Box::new(PlanePerBlock)).unwrap();
        StdEventDispatcher::new(Arc::new(reg), None)
    }

    fn leaf(blocks: &[(u32, u8)]) -> Event {
        let mut ev = Event::raw("TestRaw");
        for (idx, first) in blocks {
            ev.add_block(*idx, vec![*first]).unwrap();
        }
        ev
    }

    fn packet(subs: Vec<Event>) -> Event {
        let mut ev = Event::base("syncEvent");
        ev.set_flag_packet().unwrap();
        ev.set_run_n(3);
        ev.set_event_n(8);
        for sub in subs {
            ev.add_sub_event(sub);
        }
        ev
    }

    #[test]
    fn test_fake_is_noop() {
        let disp = dispatcher();
        let mut src = packet(vec![leaf(&[(0, 1)])]);
        src.set_flag_fake();
        let mut dst = StandardEvent::new();
        dst.set_tag("Before", 1);
        let before = dst.clone();
        assert!(disp.convert(&src, &mut dst).is_ok());
        assert_eq!(dst, before);
    }

    #[test]
    fn test_packet_flattening() {
        let disp = dispatcher();
        let src = packet(vec![
            leaf(&[(0, 1), (1, 1)]),
            leaf(&[(2, 1)]),
            leaf(&[(3, 1), (4, 1), (5, 1)]),
        ]);
        let dst = disp.to_standard(&src).unwrap();
        let ids: Vec<u32> = dst.planes().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        assert!(!dst.is_flag_packet());
        assert_eq!(dst.run_n(), 3);
        assert_eq!(dst.event_n(), 8);
    }

    #[test]
    fn test_short_circuit_on_failure() {
        let disp = dispatcher();
        let src = packet(vec![
            leaf(&[(0, 1)]),
            leaf(&[(1, 1), (2, 0xFF)]),
            leaf(&[(3, 1)]),
        ]);
        let mut dst = StandardEvent::new();
        let err = disp.convert(&src, &mut dst).unwrap_err();
        assert!(matches!(err, ConvertError::Decode { block: 2, .. }));
        let ids: Vec<u32> = dst.planes().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_registry_miss_is_soft() {
        let disp = dispatcher();
        let src = packet(vec![leaf(&[(0, 1)]), Event::raw("Unknown")]);
        let mut dst = StandardEvent::new();
        let err = disp.convert(&src, &mut dst).unwrap_err();
        assert!(matches!(err, ConvertError::NoConverter { .. }));
        assert_eq!(dst.num_planes(), 1);
    }

    #[test]
    fn test_nested_containers_and_fake_subevents() {
        let disp = dispatcher();
        let mut fake = leaf(&[(9, 0xFF)]);
        fake.set_flag_fake();
        let inner = packet(vec![leaf(&[(1, 1)]), fake]);
        let mut outer = Event::detector();
        outer.add_sub_event(leaf(&[(0, 1)]));
        outer.add_sub_event(inner);
        outer.add_sub_event(leaf(&[(2, 1)]));
        let dst = disp.to_standard(&outer).unwrap();
        let ids: Vec<u32> = dst.planes().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_deterministic() {
        let disp = dispatcher();
        let src = packet(vec![leaf(&[(0, 1)]), leaf(&[(1, 1)])]);
        let a = disp.to_standard(&src).unwrap();
        let b = disp.to_standard(&src.clone()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        let mut reg = ConverterRegistry::new("StdEventConverter");
        reg.register("CountedRaw", |_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Box::new(PlanePerBlock)
        })
        .unwrap();
        let disp = StdEventDispatcher::new(Arc::new(reg), None);
        let mut counted = Event::raw("CountedRaw");
        counted.add_block(0, vec![1]).unwrap();
        let src = packet(vec![counted]);

        let results: Vec<StandardEvent> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| disp.to_standard(&src).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == results[0]));
        assert_eq!(results[0].num_planes(), 1);
    }
}
