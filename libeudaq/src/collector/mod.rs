//! The DataCollector: per-producer buffering and merging into composite events.
//!
//! Each connected producer owns a FIFO [`StreamQueue`]. While running, events pushed
//! with [`DataCollector::receive`] are appended to their queue and the configured
//! [`EventBuilder`] is asked to turn the queue heads into composites. Nothing is built until
//! every connected producer has sent its BORE event. Composites are numbered densely,
//! optionally written to a file and handed to the consumer over an `mpsc` channel.
//!
//! A single lock guards all queues, so at most one thread mutates a queue at a time.
//! Stopping a run flushes the builder and counts whatever is left as dropped.
mod builders;

pub use builders::{BcidBuilder, KeyedBuilder, TimestampBuilder};

use std::collections::VecDeque;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use super::config::{ConfigSpc, Configuration};
use super::constants::*;
use super::error::{CollectorError, RegistryError};
use super::event::{Event, EventSp};
use super::hash::str2hash;
use super::io::{expand_file_pattern, FileBackends, FileWriter};
use super::registry::Registry;
use super::tags::TagStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Configured,
    Running,
    Stopping,
    Stopped,
}

/// The buffered event stream of one producer connection.
#[derive(Debug)]
pub struct StreamQueue {
    pub id: u32,
    pub name: String,
    pub events: VecDeque<EventSp>,
    pub has_bore: bool,
    pub ended: bool,
    pub received: u64,
    pub dropped: u64,
    state: ConnectionState,
}

impl StreamQueue {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            events: VecDeque::new(),
            has_bore: false,
            ended: false,
            received: 0,
            dropped: 0,
            state: ConnectionState::Connected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn front(&self) -> Option<&EventSp> {
        self.events.front()
    }

    pub fn pop_front(&mut self) -> Option<EventSp> {
        self.events.pop_front()
    }

    /// Discard the head of the queue as lost.
    pub fn drop_front(&mut self) {
        if self.events.pop_front().is_some() {
            self.dropped += 1;
        }
    }

    /// Remove the first `n` events; `used` of them went into composites, the rest are lost.
    pub fn consume(&mut self, n: usize, used: usize) {
        let n = n.min(self.events.len());
        self.events.drain(..n);
        self.dropped += n.saturating_sub(used) as u64;
    }

    /// Discard everything still buffered. Returns the number discarded.
    pub fn discard_all(&mut self) -> u64 {
        let n = self.events.len() as u64;
        self.events.clear();
        self.dropped += n;
        n
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn reset(&mut self) {
        self.events.clear();
        self.has_bore = false;
        self.ended = false;
        self.received = 0;
        self.dropped = 0;
    }
}

/// The sub-events of one composite, one per producer in connection order.
pub type Composite = Vec<EventSp>;

/// A correlation policy: decides which buffered events belong together.
pub trait EventBuilder: Send {
    fn name(&self) -> &'static str;

    /// Build every composite that can be built from the queue heads, consuming the events
    /// used and dropping (counting) those that can never match. With `flush` set no more
    /// events will arrive.
    fn build(&mut self, queues: &mut [StreamQueue], flush: bool) -> Vec<Composite>;

    /// Forget any per-run state.
    fn reset(&mut self) {}
}

pub type BuilderRegistry = Registry<dyn EventBuilder, ConfigSpc>;

/// A registry holding the built-in correlation policies.
pub fn builtin_builders() -> Result<BuilderRegistry, RegistryError> {
    let mut reg = BuilderRegistry::new("EventBuilder");
    reg.register("TriggerN", |_| Box::new(KeyedBuilder::trigger_n()))?;
    reg.register("EventN", |_| Box::new(KeyedBuilder::event_n()))?;
    reg.register("Timestamp", |_| Box::new(TimestampBuilder))?;
    reg.register("Bcid", |conf| Box::new(BcidBuilder::new(conf)))?;
    Ok(reg)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub id: u32,
    pub name: String,
    pub state: ConnectionState,
    pub received: u64,
    pub buffered: usize,
    pub dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorStatus {
    pub state: ConnectionState,
    pub run_n: u32,
    pub events_built: u64,
    pub events_dropped: u64,
    pub connections: Vec<ConnectionStatus>,
    /// `EVENT`, `RUN` and, when writing, `FILEBYTES`.
    pub tags: TagStore,
}

struct Inner {
    state: ConnectionState,
    queues: Vec<StreamQueue>,
    builder: Option<Box<dyn EventBuilder>>,
    file_type: String,
    file_pattern: Option<String>,
    writer: Option<Box<dyn FileWriter>>,
    /// Size of the current run's file, kept after the writer is closed.
    file_bytes: Option<u64>,
    output: Option<Sender<EventSp>>,
    run_n: u32,
    stream_n: u32,
    event_count: u32,
    events_built: u64,
    /// Drops of connections that have gone away.
    dropped_gone: u64,
}

impl Inner {
    fn all_bore(&self) -> bool {
        !self.queues.is_empty() && self.queues.iter().all(|q| q.has_bore)
    }

    fn events_dropped(&self) -> u64 {
        self.dropped_gone + self.queues.iter().map(|q| q.dropped).sum::<u64>()
    }
}

pub struct DataCollector {
    name: String,
    builders: Arc<BuilderRegistry>,
    backends: Option<Arc<FileBackends>>,
    inner: Mutex<Inner>,
}

impl DataCollector {
    pub fn new(name: &str, builders: Arc<BuilderRegistry>) -> Self {
        Self {
            name: name.to_string(),
            builders,
            backends: None,
            inner: Mutex::new(Inner {
                state: ConnectionState::Connected,
                queues: Vec::new(),
                builder: None,
                file_type: String::from(NATIVE_BACKEND),
                file_pattern: None,
                writer: None,
                file_bytes: None,
                output: None,
                run_n: 0,
                stream_n: str2hash(name),
                event_count: 0,
                events_built: 0,
                dropped_gone: 0,
            }),
        }
    }

    /// Enable writing composites to files created from these backends.
    pub fn with_file_backends(mut self, backends: Arc<FileBackends>) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_alive(inner: &Inner, command: &'static str) -> Result<(), CollectorError> {
        if inner.state == ConnectionState::Disconnected {
            return Err(CollectorError::InvalidTransition {
                from: inner.state,
                command,
            });
        }
        Ok(())
    }

    /// Register a producer connection. Its id is the hash of its name.
    pub fn connect(&self, name: &str) -> Result<u32, CollectorError> {
        let mut inner = self.lock();
        Self::check_alive(&inner, "connect")?;
        let id = str2hash(name);
        if inner.queues.iter().any(|q| q.id == id) {
            return Err(CollectorError::DuplicateConnection(name.to_string()));
        }
        let mut queue = StreamQueue::new(id, name);
        if matches!(
            inner.state,
            ConnectionState::Configured | ConnectionState::Running
        ) {
            queue.state = inner.state;
        }
        inner.queues.push(queue);
        spdlog::info!("{}: producer {} connected ({} total)", self.name, name, inner.queues.len());
        Ok(id)
    }

    /// Remove a producer. Its buffered events are counted as dropped and the remaining
    /// producers carry on.
    pub fn disconnect(&self, id: u32) -> Result<(), CollectorError> {
        let mut inner = self.lock();
        let pos = inner
            .queues
            .iter()
            .position(|q| q.id == id)
            .ok_or(CollectorError::UnknownConnection(id))?;
        let mut queue = inner.queues.remove(pos);
        let lost = queue.discard_all();
        inner.dropped_gone += queue.dropped;
        spdlog::info!(
            "{}: producer {} disconnected, {} buffered events dropped",
            self.name,
            queue.name,
            lost
        );
        if inner.state == ConnectionState::Running {
            self.build(&mut inner, false);
        }
        Ok(())
    }

    /// Handle a producer that failed (e.g. a hardware exception) as a disconnect.
    pub fn fail_connection(&self, id: u32, reason: &str) -> Result<(), CollectorError> {
        spdlog::error!("{}: connection {:#010x} failed: {}", self.name, id, reason);
        self.disconnect(id)
    }

    /// Apply a configuration section. Keys: `EventBuilder` (default `TriggerN`), `FileType`
    /// (default `native`), `FilePattern` (no file is written without it) and `StreamN`.
    pub fn configure(&self, config: Arc<Configuration>) -> Result<(), CollectorError> {
        let mut inner = self.lock();
        if matches!(
            inner.state,
            ConnectionState::Running | ConnectionState::Stopping | ConnectionState::Disconnected
        ) {
            return Err(CollectorError::InvalidTransition {
                from: inner.state,
                command: "configure",
            });
        }
        let builder_name = config.get("EventBuilder", String::from("TriggerN"));
        let builder = self
            .builders
            .make_unique(str2hash(&builder_name), Some(config.clone()))
            .ok_or(CollectorError::UnknownBuilder(builder_name.clone()))?;
        inner.builder = Some(builder);
        inner.file_type = config.get("FileType", String::from(NATIVE_BACKEND));
        inner.file_pattern = config.get_str("FilePattern").map(str::to_string);
        inner.stream_n = config.get("StreamN", str2hash(&self.name));
        inner.state = ConnectionState::Configured;
        for queue in inner.queues.iter_mut() {
            queue.state = ConnectionState::Configured;
        }
        spdlog::info!("{}: configured with {} builder", self.name, builder_name);
        Ok(())
    }

    /// Start a run. Returns the receiving end of the composite stream; it ends when the run
    /// is stopped.
    pub fn start_run(&self, run_n: u32) -> Result<Receiver<EventSp>, CollectorError> {
        let mut inner = self.lock();
        if !matches!(
            inner.state,
            ConnectionState::Configured | ConnectionState::Stopped
        ) {
            return Err(CollectorError::InvalidTransition {
                from: inner.state,
                command: "start_run",
            });
        }
        for queue in inner.queues.iter_mut() {
            queue.reset();
            queue.state = ConnectionState::Running;
        }
        if let Some(builder) = inner.builder.as_mut() {
            builder.reset();
        }
        inner.run_n = run_n;
        inner.event_count = 0;
        inner.events_built = 0;
        inner.dropped_gone = 0;

        let writer = match (&self.backends, inner.file_pattern.as_deref()) {
            (Some(backends), Some(pattern)) => {
                let path = expand_file_pattern(pattern, run_n);
                Some(backends.make_writer(&inner.file_type, Path::new(&path))?)
            }
            _ => None,
        };
        inner.file_bytes = writer.as_ref().map(|w| w.file_bytes());
        inner.writer = writer;
        let (tx, rx) = channel();
        inner.output = Some(tx);
        inner.state = ConnectionState::Running;
        spdlog::info!("{}: run {} started", self.name, run_n);
        Ok(rx)
    }

    /// Accept an event from a producer.
    pub fn receive(&self, id: u32, event: EventSp) -> Result<(), CollectorError> {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Running {
            return Err(CollectorError::InvalidTransition {
                from: inner.state,
                command: "receive",
            });
        }
        let queue = inner
            .queues
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or(CollectorError::UnknownConnection(id))?;
        if queue.ended {
            spdlog::warn!(
                "{}: event {} from {} after its EORE, dropped",
                self.name,
                event.event_n(),
                queue.name
            );
            queue.dropped += 1;
            return Ok(());
        }
        queue.received += 1;
        if event.is_bore() {
            queue.has_bore = true;
            spdlog::debug!("{}: BORE from {}", self.name, queue.name);
        }
        if event.is_eore() {
            queue.ended = true;
            spdlog::info!(
                "{}: run {}, EORE from {} at event {}",
                self.name,
                event.run_n(),
                queue.name,
                event.event_n()
            );
        }
        queue.events.push_back(event);
        self.build(&mut inner, false);
        Ok(())
    }

    fn build(&self, inner: &mut Inner, flush: bool) {
        if !inner.all_bore() {
            return;
        }
        let Some(builder) = inner.builder.as_mut() else {
            return;
        };
        let composites = builder.build(&mut inner.queues, flush);
        for subs in composites {
            self.write_event(inner, subs);
        }
    }

    /// Wrap a composite, number it and hand it on.
    fn write_event(&self, inner: &mut Inner, subs: Composite) {
        let mut ev = Event::packet(&self.name);
        ev.set_run_n(inner.run_n);
        ev.set_event_n(inner.event_count);
        ev.set_stream_n(inner.stream_n);
        if let Some(tg) = subs.iter().find(|s| s.is_flag_trigger()) {
            ev.set_trigger_n(tg.trigger_n());
        }
        let timed = subs.iter().filter(|s| s.is_flag_timestamp());
        let range = timed.fold(None, |acc: Option<(u64, u64)>, s| {
            Some(match acc {
                None => (s.timestamp_begin(), s.timestamp_end()),
                Some((b, e)) => (b.min(s.timestamp_begin()), e.max(s.timestamp_end())),
            })
        });
        if let Some((begin, end)) = range {
            ev.set_timestamp(begin, end);
        }
        if inner.event_count == 0 {
            ev.set_bore();
        }
        for sub in subs {
            ev.add_sub_event(sub);
        }
        inner.event_count += 1;
        inner.events_built += 1;
        let ev: EventSp = Arc::new(ev);

        if let Some(writer) = inner.writer.as_mut() {
            if let Err(e) = writer.write(&ev) {
                spdlog::error!("{}: failed to write event {}: {}", self.name, ev.event_n(), e);
            }
            inner.file_bytes = Some(writer.file_bytes());
        }
        let gone = inner
            .output
            .as_ref()
            .is_some_and(|output| output.send(ev).is_err());
        if gone {
            spdlog::warn!("{}: composite consumer went away", self.name);
            inner.output = None;
        }
    }

    /// Stop the run: flush the builder, drop whatever cannot be matched and close the
    /// composite stream.
    pub fn stop_run(&self) -> Result<CollectorStatus, CollectorError> {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Running {
            return Err(CollectorError::InvalidTransition {
                from: inner.state,
                command: "stop_run",
            });
        }
        inner.state = ConnectionState::Stopping;
        for queue in inner.queues.iter_mut() {
            queue.state = ConnectionState::Stopping;
        }
        self.build(&mut inner, true);
        let mut lost = 0;
        for queue in inner.queues.iter_mut() {
            lost += queue.discard_all();
            queue.state = ConnectionState::Stopped;
        }
        if let Some(mut writer) = inner.writer.take() {
            if let Err(e) = writer.flush() {
                spdlog::error!("{}: failed to flush output file: {}", self.name, e);
            }
            inner.file_bytes = Some(writer.file_bytes());
            spdlog::info!(
                "{}: wrote {} to {}",
                self.name,
                human_bytes::human_bytes(writer.file_bytes() as f64),
                writer.path().display()
            );
        }
        inner.output = None;
        inner.state = ConnectionState::Stopped;
        spdlog::info!(
            "{}: run {} stopped, {} events built, {} unmatched at stop, {} dropped in total",
            self.name,
            inner.run_n,
            inner.events_built,
            lost,
            inner.events_dropped()
        );
        Ok(Self::snapshot(&inner))
    }

    /// Release every buffer and connection. Producers have to connect again.
    pub fn reset(&self) -> Result<(), CollectorError> {
        let mut inner = self.lock();
        Self::check_alive(&inner, "reset")?;
        Self::release(&mut inner);
        inner.state = ConnectionState::Connected;
        spdlog::info!("{}: reset", self.name);
        Ok(())
    }

    /// Release everything and refuse further commands.
    pub fn terminate(&self) {
        let mut inner = self.lock();
        Self::release(&mut inner);
        inner.state = ConnectionState::Disconnected;
        spdlog::info!("{}: terminated", self.name);
    }

    fn release(inner: &mut Inner) {
        inner.queues.clear();
        inner.builder = None;
        inner.output = None;
        if let Some(mut writer) = inner.writer.take() {
            if let Err(e) = writer.flush() {
                spdlog::error!("Failed to flush {}: {}", writer.path().display(), e);
            }
        }
    }

    pub fn status(&self) -> CollectorStatus {
        Self::snapshot(&self.lock())
    }

    fn snapshot(inner: &Inner) -> CollectorStatus {
        let mut tags = TagStore::new();
        tags.set("EVENT", inner.event_count);
        tags.set("RUN", inner.run_n);
        if let Some(bytes) = inner.file_bytes {
            tags.set("FILEBYTES", bytes);
        }
        CollectorStatus {
            state: inner.state,
            run_n: inner.run_n,
            events_built: inner.events_built,
            events_dropped: inner.events_dropped(),
            connections: inner
                .queues
                .iter()
                .map(|q| ConnectionStatus {
                    id: q.id,
                    name: q.name.clone(),
                    state: q.state,
                    received: q.received,
                    buffered: q.len(),
                    dropped: q.dropped,
                })
                .collect(),
            tags,
        }
    }
}
