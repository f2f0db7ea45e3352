//! # libeudaq
//!
//! libeudaq is the data model and event building core of a test beam data acquisition,
//! written in Rust. Producers deliver raw events for their detector; a DataCollector buffers
//! the streams of all producers, correlates them by trigger number, timestamp, event number
//! or a wrapping bunch crossing id (BCID) and emits one composite event per trigger.
//! Composite events are written to file and converted into a detector independent
//! `StandardEvent` of pixel planes for monitoring and reconstruction.
//!
//! ## Building & Install
//!
//! To build the command line tools use `cargo install --path ./eudaq_cli` from the top
//! level repository. See the `eudaq_cli` README for the available subcommands.
//!
//! ## Library Layout
//!
//! - [`event`]: the event container: identity, flags, tags, binary blocks and sub-events,
//! plus the [`event::EventRegistry`] of named event types
//! - [`tags`]: the string key/value store with typed access
//! - [`registry`]: the generic name-hash keyed factory used for every pluggable family
//! - [`converter`] and [`converters`]: raw event to [`standard_event::StandardEvent`]
//! conversion, dispatched on the hash of the raw event's name
//! - [`correlator`]: run-length alignment of two wrapping identifier streams
//! - [`collector`]: the DataCollector and its event building policies
//! - [`io`]: file backends, with the `native` binary format
//! - [`resync`]: the offline BCID re-synchroniser
//! - [`config`]: sectioned key/value run configuration (INI or YAML)
//!
//! ## Configuration
//!
//! Run configurations are sectioned key/value files. Each module receives the view of its
//! own section, e.g. for a DataCollector:
//!
//! ```ini
//! [DataCollector.dc1]
//! EventBuilder = TriggerN
//! FileType = native
//! FilePattern = run$6R$X
//! ```
//!
//! The same file can be written as YAML, a mapping of section to keys:
//!
//! ```yml
//! Name: beam_test
//! DataCollector.dc1:
//!   EventBuilder: Bcid
//!   BcidTag: BCID
//!   BcidWindow: 256
//! ```
//!
//! The re-synchroniser has its own YAML configuration, a template of which is written by
//! `eudaq_cli new`:
//!
//! ```yml
//! input_path: run000001.raw
//! output_path: sync000001.raw
//! mode: Combined
//! search_range: 50
//! min_run: 4
//! bcid_modulus: 8
//! bcid_width: 3
//! converter_config: null
//! converter_section: null
//! ```
//!
//! ## Native File Format
//!
//! All integers little endian. A file starts with the magic `EUDQ` and a format version,
//! followed by length prefixed event records. See [`io::native`] for the record layout.
pub mod collector;
pub mod config;
pub mod constants;
pub mod converter;
pub mod converters;
pub mod correlator;
pub mod error;
pub mod event;
pub mod hash;
pub mod io;
pub mod registry;
pub mod resync;
pub mod selection;
pub mod standard_event;
pub mod tags;
pub mod worker_status;
