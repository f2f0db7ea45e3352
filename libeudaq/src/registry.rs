//! A generic, explicitly populated plugin registry.
//!
//! One registry instance exists per product family (event types, StdEventConverters,
//! file backends, event builders). Each maps a 32-bit id, normally the [`str2hash`] of a
//! type name, to a constructor closure. Registries are filled once during startup and then
//! shared read-only (`Arc<Registry<..>>`), so lookups need no locking.
//!
//! Unlike a static-initializer table, registering an id twice is refused: two names that
//! hash to the same value are reported at registration time instead of silently replacing
//! each other.
use std::sync::Arc;

use fxhash::FxHashMap;

use super::error::RegistryError;
use super::hash::str2hash;

/// Constructor thunk stored in a registry. `A` is the construction argument.
pub type Constructor<P, A> = Box<dyn Fn(A) -> Box<P> + Send + Sync>;

struct Entry<P: ?Sized, A> {
    name: String,
    ctor: Constructor<P, A>,
}

pub struct Registry<P: ?Sized, A = ()> {
    family: &'static str,
    entries: FxHashMap<u32, Entry<P, A>>,
}

impl<P: ?Sized + 'static, A: 'static> Registry<P, A> {
    /// Create an empty registry for a product family. The family name only shows up in logs
    /// and errors.
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            entries: FxHashMap::default(),
        }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    /// Register a constructor under the hash of `name`. Returns the id used.
    pub fn register<F>(&mut self, name: &str, ctor: F) -> Result<u32, RegistryError>
    where
        F: Fn(A) -> Box<P> + Send + Sync + 'static,
    {
        self.register_id(str2hash(name), name, ctor)
    }

    /// Register a constructor under an explicit id. `name` is kept for diagnostics.
    pub fn register_id<F>(&mut self, id: u32, name: &str, ctor: F) -> Result<u32, RegistryError>
    where
        F: Fn(A) -> Box<P> + Send + Sync + 'static,
    {
        if let Some(existing) = self.entries.get(&id) {
            spdlog::error!(
                "{} registry: id {:#010x} of {} collides with {}",
                self.family,
                id,
                name,
                existing.name
            );
            return Err(RegistryError::Collision {
                family: self.family,
                id,
                existing: existing.name.clone(),
                name: name.to_string(),
            });
        }
        spdlog::trace!("{} registry: registered {} as {:#010x}", self.family, name, id);
        self.entries.insert(
            id,
            Entry {
                name: name.to_string(),
                ctor: Box::new(ctor),
            },
        );
        Ok(id)
    }

    /// Build a new instance. A miss returns None, never panics.
    pub fn make_unique(&self, id: u32, args: A) -> Option<Box<P>> {
        self.entries.get(&id).map(|entry| (entry.ctor)(args))
    }

    /// Build a new shared instance. A miss returns None, never panics.
    pub fn make_shared(&self, id: u32, args: A) -> Option<Arc<P>> {
        self.make_unique(id, args).map(Arc::from)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// The name a given id was registered under.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(|entry| entry.name.as_str())
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.values().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
