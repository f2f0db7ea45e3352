use std::path::PathBuf;
use thiserror::Error;

use super::collector::ConnectionState;
use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Event has no block with index {0}")]
    MissingBlock(u32),
    #[error("Event already holds a block with index {0}")]
    DuplicateBlock(u32),
    #[error("Cannot add block {0} to a packet event; packet payload lives in sub-events")]
    BlockOnPacket(u32),
    #[error("Cannot flag an event holding {0} blocks as a packet")]
    PacketWithBlocks(usize),
    #[error("Sub-event index {0} out of range for event with {1} sub-events")]
    SubEventOutOfRange(usize, usize),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{family} registry already holds id {id:#010x} ({existing}); refusing to register {name}")]
    Collision {
        family: &'static str,
        id: u32,
        existing: String,
        name: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaneError {
    #[error("Bad frame number {0} for plane with {1} frames")]
    BadFrame(u32, u32),
    #[error("Pixel index {0} out of range for frame with {1} pixels")]
    BadPixelIndex(usize, usize),
    #[error("StandardEvent already holds a plane with id {0}")]
    DuplicatePlane(u32),
    #[error("Dense plane of {0}x{1} pixels does not fit a frame")]
    TooManyPixels(u32, u32),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("No StdEventConverter registered for id {id:#010x} (description '{description}')")]
    NoConverter { id: u32, description: String },
    #[error("Converter {converter} could not decode block {block}: {reason}")]
    Decode {
        converter: &'static str,
        block: u32,
        reason: String,
    },
    #[error("Converter {0} deliberately skipped the event")]
    Skipped(&'static str),
    #[error("Conversion failed due to plane error: {0}")]
    Plane(#[from] PlaneError),
    #[error("Conversion failed due to event error: {0}")]
    Event(#[from] EventError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("Correlator identifier modulus must be non-zero")]
    ZeroModulus,
    #[error("Correlator minimum run length must be at least 1")]
    ZeroMinRun,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config section '{0}' is not a mapping of keys to values")]
    BadSection(String),
    #[error("Config value for '{0}' in section '{1}' is not a scalar")]
    BadValue(String, String),
}

#[derive(Debug, Error)]
pub enum FileIOError {
    #[error("File IO failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open file {0:?} because it does not exist")]
    BadFilePath(PathBuf),
    #[error("Bad file magic {0:?}; not a native event file")]
    BadMagic([u8; 4]),
    #[error("Unsupported native format version {0}")]
    UnsupportedVersion(u32),
    #[error("Malformed event record: {0}")]
    BadRecord(String),
    #[error("No file backend registered for type '{0}'")]
    UnknownBackend(String),
    #[error("File IO failed due to registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("File IO failed due to event error: {0}")]
    Event(#[from] EventError),
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("DataCollector has no connection with id {0:#010x}")]
    UnknownConnection(u32),
    #[error("DataCollector already has a connection named {0}")]
    DuplicateConnection(String),
    #[error("DataCollector cannot {command} while in state {from:?}")]
    InvalidTransition {
        from: ConnectionState,
        command: &'static str,
    },
    #[error("No event builder registered under the name '{0}'")]
    UnknownBuilder(String),
    #[error("DataCollector output channel was closed")]
    OutputClosed,
    #[error("DataCollector failed due to registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("DataCollector failed due to file IO error: {0}")]
    FileIO(#[from] FileIOError),
}

#[derive(Debug, Error)]
pub enum ResyncError {
    #[error("Re-synchroniser found no events in the input file")]
    NoEvents,
    #[error("Re-synchroniser failed due to file IO error: {0}")]
    FileIO(#[from] FileIOError),
    #[error("Re-synchroniser failed due to config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Re-synchroniser failed due to correlator error: {0}")]
    Correlator(#[from] CorrelatorError),
    #[error("Re-synchroniser failed due to registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Re-synchroniser failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}
