//! Event file backends.
//!
//! Readers and writers are looked up by backend name ("native", ...) in a [`FileBackends`]
//! registry. A file's extension selects its backend: `.raw` is the native format.
pub mod native;

use std::path::{Path, PathBuf};

use super::constants::*;
use super::error::{FileIOError, RegistryError};
use super::event::{Event, EventSp};
use super::hash::str2hash;
use super::registry::Registry;

pub trait FileWriter: Send {
    fn write(&mut self, event: &Event) -> Result<(), FileIOError>;
    fn flush(&mut self) -> Result<(), FileIOError>;
    /// Bytes written so far, header included.
    fn file_bytes(&self) -> u64;
    fn path(&self) -> &Path;
}

pub trait FileReader: Send {
    /// The next event, or None at the end of the file.
    fn read(&mut self) -> Result<Option<EventSp>, FileIOError>;
    /// Fraction of the file consumed so far.
    fn progress(&self) -> f32;
    fn path(&self) -> &Path;
}

pub struct FileBackends {
    writers: Registry<dyn FileWriter, PathBuf>,
    readers: Registry<dyn FileReader, PathBuf>,
}

impl FileBackends {
    pub fn new() -> Self {
        Self {
            writers: Registry::new("FileWriter"),
            readers: Registry::new("FileReader"),
        }
    }

    /// A registry with the native backend installed.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        let mut backends = Self::new();
        backends
            .writers
            .register(NATIVE_BACKEND, |path| Box::new(native::NativeWriter::new(path)))?;
        backends
            .readers
            .register(NATIVE_BACKEND, |path| Box::new(native::NativeReader::new(path)))?;
        Ok(backends)
    }

    pub fn register_writer<F>(&mut self, name: &str, ctor: F) -> Result<u32, RegistryError>
    where
        F: Fn(PathBuf) -> Box<dyn FileWriter> + Send + Sync + 'static,
    {
        self.writers.register(name, ctor)
    }

    pub fn register_reader<F>(&mut self, name: &str, ctor: F) -> Result<u32, RegistryError>
    where
        F: Fn(PathBuf) -> Box<dyn FileReader> + Send + Sync + 'static,
    {
        self.readers.register(name, ctor)
    }

    pub fn make_writer(&self, backend: &str, path: &Path) -> Result<Box<dyn FileWriter>, FileIOError> {
        self.writers
            .make_unique(str2hash(backend), path.to_path_buf())
            .ok_or_else(|| FileIOError::UnknownBackend(backend.to_string()))
    }

    pub fn make_reader(&self, backend: &str, path: &Path) -> Result<Box<dyn FileReader>, FileIOError> {
        self.readers
            .make_unique(str2hash(backend), path.to_path_buf())
            .ok_or_else(|| FileIOError::UnknownBackend(backend.to_string()))
    }

    /// Open a reader, choosing the backend from the file extension.
    pub fn open_reader(&self, path: &Path) -> Result<Box<dyn FileReader>, FileIOError> {
        self.make_reader(&backend_for_path(path), path)
    }

    /// Open a writer, choosing the backend from the file extension.
    pub fn open_writer(&self, path: &Path) -> Result<Box<dyn FileWriter>, FileIOError> {
        self.make_writer(&backend_for_path(path), path)
    }
}

impl Default for FileBackends {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend name for a path. `.raw` (or no extension) is native, anything else is named by
/// its extension.
pub fn backend_for_path(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        None => String::from(NATIVE_BACKEND),
        Some(ext) if ext == NATIVE_EXTENSION => String::from(NATIVE_BACKEND),
        Some(ext) => ext.to_string(),
    }
}

/// Expand a file name pattern: `$<n>R` is the run number zero padded to `n` digits (`$R`
/// unpadded), `$X` is the native extension including its dot. Other text is kept.
pub fn expand_file_pattern(pattern: &str, run_n: u32) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut width = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(*d);
            chars.next();
        }
        match chars.peek() {
            Some('R') => {
                chars.next();
                let width: usize = width.parse().unwrap_or(0);
                out.push_str(&format!("{run_n:0>width$}"));
            }
            Some('X') if width.is_empty() => {
                chars.next();
                out.push('.');
                out.push_str(NATIVE_EXTENSION);
            }
            _ => {
                out.push('$');
                out.push_str(&width);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern() {
        assert_eq!(expand_file_pattern("run$6R$X", 42), "run000042.raw");
        assert_eq!(expand_file_pattern("run$R_tp$X", 7), "run7_tp.raw");
        assert_eq!(expand_file_pattern("cost$5", 1), "cost$5");
        assert_eq!(expand_file_pattern("a$$X", 1), "a$.raw");
    }

    #[test]
    fn test_backend_for_path() {
        assert_eq!(backend_for_path(Path::new("run000001.raw")), "native");
        assert_eq!(backend_for_path(Path::new("run000001")), "native");
        assert_eq!(backend_for_path(Path::new("run000001.slcio")), "slcio");
    }

    #[test]
    fn test_unknown_backend() {
        let backends = FileBackends::with_defaults().unwrap();
        let err = backends
            .open_writer(Path::new("out.slcio"))
            .err()
            .unwrap();
        assert!(matches!(err, FileIOError::UnknownBackend(name) if name == "slcio"));
    }
}
