//! The "native" event file format.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! file   := magic "EUDQ" | version u32 | record*
//! record := length u32 | event
//! event  := type_id u32 | kind u8 | kind payload | version u32 | flag u32
//!           | run_n u32 | event_n u32 | stream_n u32 | device_n u32 | trigger_n u32
//!           | timestamp_begin u64 | timestamp_end u64 | description str
//!           | n_tags u32 | (key str | value str)* | n_blocks u32 | (index u32 | len u32 | bytes)*
//!           | n_sub u32 | event*
//! str    := len u32 | utf-8 bytes
//! ```
//!
//! Kind 0 is a base event, 1 a raw event followed by its extend word (u32), 2 a raw data
//! event followed by its sub type (str), 3 a detector event.
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{FileReader, FileWriter};
use crate::constants::*;
use crate::error::FileIOError;
use crate::event::{Event, EventKind, EventSp};

const KIND_BASE: u8 = 0;
const KIND_RAW: u8 = 1;
const KIND_RAW_DATA: u8 = 2;
const KIND_DETECTOR: u8 = 3;
/// Deepest sub-event nesting accepted when decoding.
pub const MAX_NESTING: usize = 16;

fn write_str<W: Write>(w: &mut W, s: &str) -> Result<(), FileIOError> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Read a u32 length and that many bytes. The length must fit the rest of the record.
fn read_bytes(r: &mut Cursor<&[u8]>) -> Result<Vec<u8>, FileIOError> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let remaining = r.get_ref().len().saturating_sub(r.position() as usize);
    if len > remaining {
        return Err(FileIOError::BadRecord(format!(
            "length {len} exceeds the {remaining} bytes left in the record"
        )));
    }
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_str(r: &mut Cursor<&[u8]>) -> Result<String, FileIOError> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes).map_err(|e| FileIOError::BadRecord(format!("invalid string: {e}")))
}

/// Serialize one event tree.
pub fn encode_event<W: Write>(w: &mut W, event: &Event) -> Result<(), FileIOError> {
    w.write_u32::<LittleEndian>(event.type_id())?;
    match event.kind() {
        EventKind::Base => w.write_u8(KIND_BASE)?,
        EventKind::Raw { extend_word } => {
            w.write_u8(KIND_RAW)?;
            w.write_u32::<LittleEndian>(*extend_word)?;
        }
        EventKind::RawData { sub_type } => {
            w.write_u8(KIND_RAW_DATA)?;
            write_str(w, sub_type)?;
        }
        EventKind::Detector => w.write_u8(KIND_DETECTOR)?,
    }
    w.write_u32::<LittleEndian>(event.version())?;
    w.write_u32::<LittleEndian>(event.flag())?;
    w.write_u32::<LittleEndian>(event.run_n())?;
    w.write_u32::<LittleEndian>(event.event_n())?;
    w.write_u32::<LittleEndian>(event.stream_n())?;
    w.write_u32::<LittleEndian>(event.device_n())?;
    w.write_u32::<LittleEndian>(event.trigger_n())?;
    w.write_u64::<LittleEndian>(event.timestamp_begin())?;
    w.write_u64::<LittleEndian>(event.timestamp_end())?;
    write_str(w, event.description())?;

    w.write_u32::<LittleEndian>(event.tags().len() as u32)?;
    for (key, value) in event.tags().iter() {
        write_str(w, key)?;
        write_str(w, value)?;
    }
    w.write_u32::<LittleEndian>(event.num_blocks() as u32)?;
    for (index, bytes) in event.blocks() {
        w.write_u32::<LittleEndian>(index)?;
        w.write_u32::<LittleEndian>(bytes.len() as u32)?;
        w.write_all(bytes)?;
    }
    w.write_u32::<LittleEndian>(event.num_sub_events() as u32)?;
    for sub in event.sub_events() {
        encode_event(w, sub)?;
    }
    Ok(())
}

/// Deserialize one event tree from an in-memory record.
pub fn decode_event(r: &mut Cursor<&[u8]>) -> Result<Event, FileIOError> {
    decode_nested(r, 0)
}

fn decode_nested(r: &mut Cursor<&[u8]>, depth: usize) -> Result<Event, FileIOError> {
    if depth > MAX_NESTING {
        return Err(FileIOError::BadRecord(format!(
            "sub-events nested deeper than {MAX_NESTING}"
        )));
    }
    let type_id = r.read_u32::<LittleEndian>()?;
    let kind = match r.read_u8()? {
        KIND_BASE => EventKind::Base,
        KIND_RAW => EventKind::Raw {
            extend_word: r.read_u32::<LittleEndian>()?,
        },
        KIND_RAW_DATA => EventKind::RawData {
            sub_type: read_str(r)?,
        },
        KIND_DETECTOR => EventKind::Detector,
        other => return Err(FileIOError::BadRecord(format!("unknown event kind {other}"))),
    };
    let version = r.read_u32::<LittleEndian>()?;
    let flag = r.read_u32::<LittleEndian>()?;
    let run_n = r.read_u32::<LittleEndian>()?;
    let event_n = r.read_u32::<LittleEndian>()?;
    let stream_n = r.read_u32::<LittleEndian>()?;
    let device_n = r.read_u32::<LittleEndian>()?;
    let trigger_n = r.read_u32::<LittleEndian>()?;
    let ts_begin = r.read_u64::<LittleEndian>()?;
    let ts_end = r.read_u64::<LittleEndian>()?;
    let description = read_str(r)?;

    let mut event = Event::new(type_id, kind, &description);
    event.set_version(version);
    event.set_run_n(run_n);
    event.set_event_n(event_n);
    event.set_stream_n(stream_n);
    event.set_device_n(device_n);
    event.set_trigger_n(trigger_n);
    event.set_timestamp(ts_begin, ts_end);

    let n_tags = r.read_u32::<LittleEndian>()?;
    for _ in 0..n_tags {
        let key = read_str(r)?;
        let value = read_str(r)?;
        event.set_tag(&key, value);
    }
    let n_blocks = r.read_u32::<LittleEndian>()?;
    for _ in 0..n_blocks {
        let index = r.read_u32::<LittleEndian>()?;
        let bytes = read_bytes(r)?;
        event.add_block(index, bytes)?;
    }
    let n_sub = r.read_u32::<LittleEndian>()?;
    for _ in 0..n_sub {
        event.add_sub_event(decode_nested(r, depth + 1)?);
    }
    // restore the exact flag word last; the setters above add TRIG/TIME bits
    event.set_flag(flag)?;
    Ok(event)
}

pub struct NativeWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    file_bytes: u64,
    scratch: Vec<u8>,
}

impl NativeWriter {
    /// The file is created on the first write.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            file_bytes: 0,
            scratch: Vec::new(),
        }
    }

    fn open(&mut self) -> Result<&mut BufWriter<File>, FileIOError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(FileIOError::BadFilePath(parent.to_path_buf()));
                }
            }
            let mut file = BufWriter::new(File::create(&self.path)?);
            file.write_all(&NATIVE_MAGIC)?;
            file.write_u32::<LittleEndian>(NATIVE_FORMAT_VERSION)?;
            self.file_bytes = (NATIVE_MAGIC.len() + 4) as u64;
            spdlog::info!("Opened native file {}", self.path.display());
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| FileIOError::BadFilePath(self.path.clone()))
    }
}

impl FileWriter for NativeWriter {
    fn write(&mut self, event: &Event) -> Result<(), FileIOError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        encode_event(&mut scratch, event)?;
        let file = self.open()?;
        file.write_u32::<LittleEndian>(scratch.len() as u32)?;
        file.write_all(&scratch)?;
        self.file_bytes += 4 + scratch.len() as u64;
        self.scratch = scratch;
        Ok(())
    }

    /// Creates the file if nothing was written yet, so an empty run still leaves a valid
    /// file behind.
    fn flush(&mut self) -> Result<(), FileIOError> {
        self.open()?.flush()?;
        Ok(())
    }

    fn file_bytes(&self) -> u64 {
        self.file_bytes
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NativeWriter {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush() {
                spdlog::error!("Failed to flush {}: {}", self.path.display(), e);
            }
        }
    }
}

pub struct NativeReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    file_size: u64,
    bytes_read: u64,
}

impl NativeReader {
    /// The file is opened and its header checked on the first read.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            file_size: 0,
            bytes_read: 0,
        }
    }

    fn open(&mut self) -> Result<&mut BufReader<File>, FileIOError> {
        if self.file.is_none() {
            if !self.path.exists() {
                return Err(FileIOError::BadFilePath(self.path.clone()));
            }
            let file = File::open(&self.path)?;
            self.file_size = file.metadata()?.len();
            let mut file = BufReader::new(file);
            let mut magic = [0u8; 4];
            file.read_exact(&mut magic)?;
            if magic != NATIVE_MAGIC {
                return Err(FileIOError::BadMagic(magic));
            }
            let version = file.read_u32::<LittleEndian>()?;
            if version != NATIVE_FORMAT_VERSION {
                return Err(FileIOError::UnsupportedVersion(version));
            }
            self.bytes_read = 8;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| FileIOError::BadFilePath(self.path.clone()))
    }
}

impl FileReader for NativeReader {
    fn read(&mut self) -> Result<Option<EventSp>, FileIOError> {
        self.open()?;
        let remaining = self.file_size.saturating_sub(self.bytes_read + 4);
        let file = self.open()?;
        let length = match file.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if length as u64 > remaining {
            return Err(FileIOError::BadRecord(format!(
                "truncated record of {length} bytes, {remaining} left in file"
            )));
        }
        let mut record = vec![0u8; length];
        file.read_exact(&mut record).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                FileIOError::BadRecord(format!("truncated record of {length} bytes"))
            }
            _ => FileIOError::IOError(e),
        })?;
        self.bytes_read += 4 + length as u64;

        let mut cursor = Cursor::new(record.as_slice());
        let event = decode_event(&mut cursor).map_err(|e| match e {
            FileIOError::IOError(io) if io.kind() == ErrorKind::UnexpectedEof => {
                FileIOError::BadRecord(String::from("record shorter than its event"))
            }
            other => other,
        })?;
        if cursor.position() as usize != length {
            return Err(FileIOError::BadRecord(format!(
                "{} trailing bytes after event",
                length - cursor.position() as usize
            )));
        }
        Ok(Some(Arc::new(event)))
    }

    fn progress(&self) -> f32 {
        if self.file_size == 0 {
            0.0
        } else {
            self.bytes_read as f32 / self.file_size as f32
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
