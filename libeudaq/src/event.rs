//! The raw event model.
//!
//! An [`Event`] is what a producer sends and what the DataCollector merges: identity
//! counters, a timestamp range, a flag word, key/value tags, sparse binary blocks and an
//! ordered list of sub-events. A composite ("packet") event carries no blocks; its payload
//! is entirely in its sub-events, one per producer for the merged cycle.
//!
//! Events are built mutably and then shared read-only as [`EventSp`] handles between the
//! collector, writers and converters.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::constants::*;
use super::error::{EventError, RegistryError};
use super::hash::{cstr2hash, str2hash};
use super::registry::Registry;
use super::tags::{to_hex, TagStore, TagValue};

/// Shared, read-only handle to an event.
pub type EventSp = Arc<Event>;

pub const BASE_EVENT_ID: u32 = cstr2hash("BASE");
pub const RAW_EVENT_ID: u32 = cstr2hash("RawEvent");
pub const RAW_DATA_EVENT_ID: u32 = cstr2hash("RawDataEvent");
pub const DETECTOR_EVENT_ID: u32 = cstr2hash("DetectorEvent");

/// The wire level representations an event can take.
///
/// Converters are chosen from the kind: raw events dispatch on their extend word, legacy
/// raw data events on the hash of their sub type, everything else on its description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Base,
    Raw { extend_word: u32 },
    RawData { sub_type: String },
    /// Legacy composite. Always treated as a container of sub-events.
    Detector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    type_id: u32,
    kind: EventKind,
    version: u32,
    flag: u32,
    run_n: u32,
    event_n: u32,
    stream_n: u32,
    device_n: u32,
    trigger_n: u32,
    timestamp_begin: u64,
    timestamp_end: u64,
    description: String,
    tags: TagStore,
    blocks: BTreeMap<u32, Vec<u8>>,
    sub_events: Vec<EventSp>,
}

impl Event {
    /// Create an event of a given registered type id and kind.
    pub fn new(type_id: u32, kind: EventKind, description: &str) -> Self {
        Self {
            type_id,
            kind,
            version: EVENT_VERSION,
            flag: 0,
            run_n: 0,
            event_n: 0,
            stream_n: 0,
            device_n: 0,
            trigger_n: 0,
            timestamp_begin: 0,
            timestamp_end: 0,
            description: description.to_string(),
            tags: TagStore::new(),
            blocks: BTreeMap::new(),
            sub_events: Vec::new(),
        }
    }

    /// A plain event flagged as a packet, ready to take sub-events.
    pub fn packet(description: &str) -> Self {
        let mut ev = Self::base(description);
        ev.raise(FLAG_PACK);
        ev
    }

    /// A plain event, typically a synthetic composite built by the collector.
    pub fn base(description: &str) -> Self {
        Self::new(str2hash(description), EventKind::Base, description)
    }

    /// A raw producer event. Its converter is looked up by the hash of `description`.
    pub fn raw(description: &str) -> Self {
        Self::new(
            RAW_EVENT_ID,
            EventKind::Raw {
                extend_word: str2hash(description),
            },
            description,
        )
    }

    /// A legacy raw data event whose converter is selected by `sub_type`.
    pub fn raw_data(sub_type: &str) -> Self {
        Self::new(
            RAW_DATA_EVENT_ID,
            EventKind::RawData {
                sub_type: sub_type.to_string(),
            },
            "RawDataEvent",
        )
    }

    /// A legacy detector event, a container for per-producer sub-events.
    pub fn detector() -> Self {
        Self::new(DETECTOR_EVENT_ID, EventKind::Detector, "DetectorEvent")
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn extend_word(&self) -> Option<u32> {
        match &self.kind {
            EventKind::Raw { extend_word } => Some(*extend_word),
            _ => None,
        }
    }

    pub fn sub_type(&self) -> Option<&str> {
        match &self.kind {
            EventKind::RawData { sub_type } => Some(sub_type),
            _ => None,
        }
    }

    /// The key under which a StdEventConverter for this event is registered.
    pub fn converter_id(&self) -> u32 {
        match &self.kind {
            EventKind::Raw { extend_word } => *extend_word,
            EventKind::RawData { sub_type } => str2hash(sub_type),
            EventKind::Base | EventKind::Detector => str2hash(&self.description),
        }
    }

    /// True if the payload of this event is its sub-events.
    pub fn is_container(&self) -> bool {
        self.is_flag_packet() || self.kind == EventKind::Detector
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    // Flags

    pub fn flag(&self) -> u32 {
        self.flag
    }

    /// Replace the flag word. A packet flag is refused while the event holds blocks.
    pub fn set_flag(&mut self, flag: u32) -> Result<(), EventError> {
        self.check_packet(flag)?;
        self.flag = flag;
        Ok(())
    }

    pub fn set_flag_bit(&mut self, bit: u32) -> Result<(), EventError> {
        self.check_packet(bit)?;
        self.raise(bit);
        Ok(())
    }

    fn raise(&mut self, bit: u32) {
        self.flag |= bit;
    }

    fn check_packet(&self, flag: u32) -> Result<(), EventError> {
        if flag & FLAG_PACK != 0 && !self.blocks.is_empty() {
            return Err(EventError::PacketWithBlocks(self.blocks.len()));
        }
        Ok(())
    }

    pub fn clear_flag_bit(&mut self, bit: u32) {
        self.flag &= !bit;
    }

    pub fn is_flag_bit(&self, bit: u32) -> bool {
        self.flag & bit == bit
    }

    pub fn is_bore(&self) -> bool {
        self.is_flag_bit(FLAG_BORE)
    }

    pub fn is_eore(&self) -> bool {
        self.is_flag_bit(FLAG_EORE)
    }

    pub fn is_flag_fake(&self) -> bool {
        self.is_flag_bit(FLAG_FAKE)
    }

    pub fn is_flag_packet(&self) -> bool {
        self.is_flag_bit(FLAG_PACK)
    }

    pub fn is_flag_trigger(&self) -> bool {
        self.is_flag_bit(FLAG_TRIG)
    }

    pub fn is_flag_timestamp(&self) -> bool {
        self.is_flag_bit(FLAG_TIME)
    }

    pub fn is_flag_status(&self) -> bool {
        self.is_flag_bit(FLAG_STATUS)
    }

    pub fn set_bore(&mut self) {
        self.raise(FLAG_BORE);
    }

    pub fn set_eore(&mut self) {
        self.raise(FLAG_EORE);
    }

    pub fn set_flag_fake(&mut self) {
        self.raise(FLAG_FAKE);
    }

    /// Mark the event as a packet of sub-events. Fails if blocks were already added.
    pub fn set_flag_packet(&mut self) -> Result<(), EventError> {
        self.set_flag_bit(FLAG_PACK)
    }

    // Identity

    pub fn run_n(&self) -> u32 {
        self.run_n
    }

    pub fn set_run_n(&mut self, run_n: u32) {
        self.run_n = run_n;
    }

    pub fn event_n(&self) -> u32 {
        self.event_n
    }

    pub fn set_event_n(&mut self, event_n: u32) {
        self.event_n = event_n;
    }

    pub fn stream_n(&self) -> u32 {
        self.stream_n
    }

    pub fn set_stream_n(&mut self, stream_n: u32) {
        self.stream_n = stream_n;
    }

    pub fn device_n(&self) -> u32 {
        self.device_n
    }

    pub fn set_device_n(&mut self, device_n: u32) {
        self.device_n = device_n;
    }

    pub fn trigger_n(&self) -> u32 {
        self.trigger_n
    }

    /// Set the trigger number and mark the event as carrying one.
    pub fn set_trigger_n(&mut self, trigger_n: u32) {
        self.trigger_n = trigger_n;
        self.raise(FLAG_TRIG);
    }

    pub fn timestamp_begin(&self) -> u64 {
        self.timestamp_begin
    }

    pub fn timestamp_end(&self) -> u64 {
        self.timestamp_end
    }

    /// Set the timestamp range and mark the event as carrying one.
    pub fn set_timestamp(&mut self, begin: u64, end: u64) {
        self.timestamp_begin = begin;
        self.timestamp_end = end;
        self.raise(FLAG_TIME);
    }

    // Tags

    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagStore {
        &mut self.tags
    }

    pub fn set_tag<T: fmt::Display>(&mut self, key: &str, value: T) {
        self.tags.set(key, value);
    }

    pub fn tag<T: TagValue>(&self, key: &str, default: T) -> T {
        self.tags.get(key, default)
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.has(key)
    }

    // Blocks

    /// Attach a binary payload under `index`. Indices are unique within the event.
    pub fn add_block(&mut self, index: u32, bytes: Vec<u8>) -> Result<(), EventError> {
        if self.is_flag_packet() {
            return Err(EventError::BlockOnPacket(index));
        }
        if self.blocks.contains_key(&index) {
            return Err(EventError::DuplicateBlock(index));
        }
        self.blocks.insert(index, bytes);
        Ok(())
    }

    /// Get the payload stored under `index`. Missing indices are an error; use
    /// [`Event::block_num_list`] to find the populated ones.
    pub fn get_block(&self, index: u32) -> Result<&[u8], EventError> {
        self.blocks
            .get(&index)
            .map(Vec::as_slice)
            .ok_or(EventError::MissingBlock(index))
    }

    /// The populated block indices, in ascending order.
    pub fn block_num_list(&self) -> Vec<u32> {
        self.blocks.keys().copied().collect()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.blocks.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    // Sub-events

    pub fn add_sub_event<E: Into<EventSp>>(&mut self, event: E) {
        self.sub_events.push(event.into());
    }

    pub fn sub_event(&self, index: usize) -> Result<&EventSp, EventError> {
        self.sub_events
            .get(index)
            .ok_or(EventError::SubEventOutOfRange(index, self.sub_events.len()))
    }

    pub fn sub_events(&self) -> &[EventSp] {
        &self.sub_events
    }

    pub fn num_sub_events(&self) -> usize {
        self.sub_events.len()
    }

    /// Mutable access to sub-events that are not shared with anyone else.
    pub fn sub_event_mut(&mut self, index: usize) -> Option<&mut Event> {
        self.sub_events.get_mut(index).and_then(Arc::get_mut)
    }

    fn print(&self, f: &mut fmt::Formatter<'_>, offset: usize) -> fmt::Result {
        let pad = " ".repeat(offset);
        writeln!(f, "{pad}<Event>")?;
        writeln!(f, "{pad}  <Type> {} </Type>", self.type_id)?;
        writeln!(f, "{pad}  <Description> {} </Description>", self.description)?;
        writeln!(f, "{pad}  <Flag> {} </Flag>", to_hex(self.flag, 8))?;
        writeln!(f, "{pad}  <RunN> {} </RunN>", self.run_n)?;
        writeln!(f, "{pad}  <StreamN> {} </StreamN>", self.stream_n)?;
        writeln!(f, "{pad}  <EventN> {} </EventN>", self.event_n)?;
        if self.is_flag_trigger() {
            writeln!(f, "{pad}  <TriggerN> {} </TriggerN>", self.trigger_n)?;
        }
        writeln!(
            f,
            "{pad}  <Timestamp> {}  ->  {} </Timestamp>",
            to_hex(self.timestamp_begin, 16),
            to_hex(self.timestamp_end, 16)
        )?;
        writeln!(
            f,
            "{pad}  <Timestamp> {}  ->  {} </Timestamp>",
            self.timestamp_begin, self.timestamp_end
        )?;
        if !self.tags.is_empty() {
            writeln!(f, "{pad}  <Tags>")?;
            for (k, v) in self.tags.iter() {
                writeln!(f, "{pad}    <Tag> {k}={v} </Tag>")?;
            }
            writeln!(f, "{pad}  </Tags>")?;
        }
        if !self.blocks.is_empty() {
            writeln!(f, "{pad}  <Blocks>")?;
            for (k, v) in self.blocks.iter() {
                writeln!(f, "{pad}    <Block> {k}: {} bytes </Block>", v.len())?;
            }
            writeln!(f, "{pad}  </Blocks>")?;
        }
        if !self.sub_events.is_empty() {
            writeln!(f, "{pad}  <SubEvents>")?;
            writeln!(f, "{pad}    <Size> {} </Size>", self.sub_events.len())?;
            for sub in self.sub_events.iter() {
                sub.print(f, offset + 4)?;
            }
            writeln!(f, "{pad}  </SubEvents>")?;
        }
        writeln!(f, "{pad}</Event>")
    }
}

/// Diagnostic dump for humans. Not a stable format.
impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print(f, 0)
    }
}

/// Registry of event types, keyed by the hash of the type name.
///
/// Replaces per-translation-unit static registration: a producer registers its raw event
/// name once at startup, after which [`EventRegistry::make_unique`] can build it by name.
pub struct EventRegistry {
    inner: Registry<Event, ()>,
}

impl EventRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            inner: Registry::new("Event"),
        }
    }

    /// A registry holding the framework's own event types.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        let mut reg = Self::new();
        for name in ["BASE", "TRIGGER", "DUMMYDEV", "SYNC", "syncEvent"] {
            reg.register_base(name)?;
        }
        reg.inner
            .register("RawEvent", |_| Box::new(Event::raw("RawEvent")))?;
        reg.inner
            .register("RawDataEvent", |_| Box::new(Event::raw_data("")))?;
        reg.inner
            .register("DetectorEvent", |_| Box::new(Event::detector()))?;
        Ok(reg)
    }

    /// Register a plain event type constructed under `name`.
    pub fn register_base(&mut self, name: &str) -> Result<u32, RegistryError> {
        let owned = name.to_string();
        self.inner
            .register(name, move |_| Box::new(Event::base(&owned)))
    }

    /// Register a producer specific raw event type, e.g. "Ex0Raw".
    pub fn register_raw(&mut self, name: &str) -> Result<u32, RegistryError> {
        let owned = name.to_string();
        self.inner.register(name, move |_| Box::new(Event::raw(&owned)))
    }

    /// Build a new event of the named type. None if the type was never registered.
    pub fn make_unique(&self, type_name: &str) -> Option<Box<Event>> {
        self.inner.make_unique(str2hash(type_name), ())
    }

    pub fn make_shared(&self, type_name: &str) -> Option<EventSp> {
        self.inner.make_shared(str2hash(type_name), ())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.inner.contains(str2hash(type_name))
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let mut ev = Event::raw("Ex0Raw");
        assert!(!ev.is_flag_trigger());
        ev.set_trigger_n(17);
        assert!(ev.is_flag_trigger());
        assert_eq!(ev.trigger_n(), 17);
        ev.set_bore();
        ev.set_flag_fake();
        assert!(ev.is_bore() && ev.is_flag_fake());
        ev.clear_flag_bit(FLAG_FAKE);
        assert!(!ev.is_flag_fake());
        assert!(ev.is_bore());
    }

    #[test]
    fn test_blocks_are_sparse_and_ordered() {
        let mut ev = Event::raw("Ex0Raw");
        ev.add_block(7, vec![1, 2]).unwrap();
        ev.add_block(2, vec![3]).unwrap();
        assert_eq!(ev.block_num_list(), vec![2, 7]);
        assert_eq!(ev.num_blocks(), 2);
        assert_eq!(ev.get_block(7).unwrap(), &[1, 2]);
        assert_eq!(ev.get_block(3), Err(EventError::MissingBlock(3)));
        assert_eq!(ev.add_block(2, vec![]), Err(EventError::DuplicateBlock(2)));
    }

    #[test]
    fn test_packet_refuses_blocks() {
        let mut ev = Event::packet("syncEvent");
        assert!(ev.is_flag_packet());
        assert_eq!(ev.add_block(0, vec![0]), Err(EventError::BlockOnPacket(0)));
        ev.add_sub_event(Event::raw("Ex0Raw"));
        assert_eq!(ev.num_sub_events(), 1);
        assert!(ev.sub_event(1).is_err());
        assert_eq!(ev.sub_event(0).unwrap().description(), "Ex0Raw");
    }

    #[test]
    fn test_blocks_refuse_packet_flag() {
        let mut ev = Event::base("syncEvent");
        ev.add_block(0, vec![1]).unwrap();
        ev.add_block(4, vec![2]).unwrap();
        assert_eq!(ev.set_flag_packet(), Err(EventError::PacketWithBlocks(2)));
        assert_eq!(ev.set_flag(FLAG_PACK | FLAG_BORE), Err(EventError::PacketWithBlocks(2)));
        assert!(!ev.is_flag_packet() && !ev.is_bore());
        ev.set_flag(FLAG_BORE).unwrap();
        assert!(ev.is_bore());
        assert_eq!(ev.num_blocks(), 2);
    }

    #[test]
    fn test_converter_id_by_kind() {
        assert_eq!(Event::raw("Ex0Raw").converter_id(), cstr2hash("Ex0Raw"));
        assert_eq!(Event::raw_data("TLU").converter_id(), cstr2hash("TLU"));
        assert_eq!(Event::base("SYNC").converter_id(), cstr2hash("SYNC"));
        assert_eq!(Event::raw("Ex0Raw").extend_word(), Some(cstr2hash("Ex0Raw")));
        assert_eq!(Event::raw_data("TLU").sub_type(), Some("TLU"));
        assert!(Event::detector().is_container());
    }

    #[test]
    fn test_registry_make_unique() {
        let mut reg = EventRegistry::with_defaults().unwrap();
        assert!(reg.make_unique("Ex0Raw").is_none());
        reg.register_raw("Ex0Raw").unwrap();
        let ev = reg.make_unique("Ex0Raw").unwrap();
        assert_eq!(ev.description(), "Ex0Raw");
        assert_eq!(ev.extend_word(), Some(cstr2hash("Ex0Raw")));
        assert!(reg.register_raw("Ex0Raw").is_err());
        assert!(reg.make_shared("syncEvent").is_some());
    }

    #[test]
    fn test_print_nests_sub_events() {
        let mut ev = Event::base("syncEvent");
        ev.set_flag_packet().unwrap();
        let mut sub = Event::raw("Ex0Raw");
        sub.set_tag("Plane", 3);
        ev.add_sub_event(sub);
        let text = ev.to_string();
        assert!(text.contains("<SubEvents>"));
        assert!(text.contains("      <Description> Ex0Raw </Description>"));
        assert!(text.contains("<Tag> Plane=3 </Tag>"));
    }
}
