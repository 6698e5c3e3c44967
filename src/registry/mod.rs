//! A process-wide registry mapping a dtable class name to the factory that
//! creates or opens it.
//!
//! Config values nest: a leaf scalar, a named map (a sub-table's own
//! settings), or an ordered list (an overlay's member sequence, youngest
//! first) — enough structure to describe any of this crate's dtable kinds
//! without pulling in a JSON crate nothing else here needs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;

use crate::dtable::array::ArrayDTable;
use crate::dtable::cache::CacheDTable;
use crate::dtable::overlay::OverlayDTable;
use crate::dtable::sorted_run::SortedRunDTable;
use crate::dtable::{DTable, DTableError, DTableIter, Entry, SliceCursor};
use crate::key::{Key, KeyType};
use crate::managed::{ManagedDtable, ManagedDtableConfig};

/// A leaf scalar, a named map of further configuration, or an ordered list
/// of configurations.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Scalar(String),
    Map(BTreeMap<String, ConfigValue>),
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            ConfigValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(l) => Some(l),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("empty class name")]
    EmptyName,

    #[error("no factory registered under {0:?}")]
    Unknown(String),

    #[error(transparent)]
    DTable(#[from] DTableError),
}

fn invalid(msg: impl Into<String>) -> RegistryError {
    RegistryError::DTable(DTableError::InvalidArgument(msg.into()))
}

fn config_map(config: &ConfigValue) -> Result<&BTreeMap<String, ConfigValue>, RegistryError> {
    config.as_map().ok_or_else(|| invalid("config must be a map"))
}

fn config_key_type(config: &ConfigValue) -> Result<KeyType, RegistryError> {
    let raw = config_map(config)?
        .get("key_type")
        .and_then(ConfigValue::as_scalar)
        .ok_or_else(|| invalid("config missing \"key_type\""))?;
    match raw {
        "uint32" => Ok(KeyType::UInt32),
        "double" => Ok(KeyType::Double),
        "string" => Ok(KeyType::String),
        "blob" => Ok(KeyType::Blob),
        other => Err(invalid(format!("unknown key_type {other:?}"))),
    }
}

/// A `{class, name, config}` reference to another registry entry, as used
/// by `cache`'s inner table and `overlay`'s member list.
struct SubSpec {
    class: String,
    name: String,
    config: ConfigValue,
}

fn sub_spec(config: &ConfigValue) -> Result<SubSpec, RegistryError> {
    let map = config_map(config)?;
    let class = map
        .get("class")
        .and_then(ConfigValue::as_scalar)
        .ok_or_else(|| invalid("sub-table spec missing \"class\""))?
        .to_string();
    let name = map
        .get("name")
        .and_then(ConfigValue::as_scalar)
        .ok_or_else(|| invalid("sub-table spec missing \"name\""))?
        .to_string();
    let config = map.get("config").cloned().unwrap_or_else(|| ConfigValue::Map(BTreeMap::new()));
    Ok(SubSpec { class, name, config })
}

/// A pluggable dtable constructor. `base_dir`/`name` locate the on-disk
/// instance (or, for `managed`, the directory it owns); `config` is the
/// class-specific parameter map (sub-table references, tuning knobs, …).
pub trait DTableFactory: Send + Sync {
    /// Creates a brand-new, empty on-disk instance named `name` under
    /// `base_dir`. Dtable kinds with no meaningful "empty" on-disk form of
    /// their own (`array`, `overlay`) return `DTableError::Unsupported`.
    fn create(&self, base_dir: &Path, name: &str, config: &ConfigValue, key_type: KeyType) -> Result<(), RegistryError>;

    /// Opens the instance named `name` under `base_dir`, recursively
    /// resolving any sub-tables the config names through the same registry.
    fn open(&self, base_dir: &Path, name: &str, config: &ConfigValue) -> Result<Box<dyn DTable>, RegistryError>;
}

struct SortedRunFactory;

impl DTableFactory for SortedRunFactory {
    fn create(&self, base_dir: &Path, name: &str, _config: &ConfigValue, key_type: KeyType) -> Result<(), RegistryError> {
        let path = base_dir.join(format!("{name}.sst"));
        SortedRunDTable::create(&path, key_type, Vec::<(Key, Entry)>::new(), Vec::<Key>::new())?;
        Ok(())
    }

    fn open(&self, base_dir: &Path, name: &str, _config: &ConfigValue) -> Result<Box<dyn DTable>, RegistryError> {
        let path = base_dir.join(format!("{name}.sst"));
        Ok(Box::new(SortedRunDTable::open(path)?))
    }
}

struct ArrayFactory;

impl DTableFactory for ArrayFactory {
    fn create(&self, _base_dir: &Path, _name: &str, _config: &ConfigValue, key_type: KeyType) -> Result<(), RegistryError> {
        if key_type != KeyType::UInt32 {
            return Err(invalid("array dtable only supports uint32 keys"));
        }
        Err(RegistryError::DTable(DTableError::Unsupported(
            "array dtable has no empty on-disk form; build it from real data via digest/combine, then open it".into(),
        )))
    }

    fn open(&self, base_dir: &Path, name: &str, _config: &ConfigValue) -> Result<Box<dyn DTable>, RegistryError> {
        let path = base_dir.join(format!("{name}.arr"));
        Ok(Box::new(ArrayDTable::open(path)?))
    }
}

struct ManagedFactory;

impl DTableFactory for ManagedFactory {
    fn create(&self, base_dir: &Path, name: &str, _config: &ConfigValue, _key_type: KeyType) -> Result<(), RegistryError> {
        std::fs::create_dir_all(base_dir.join(name)).map_err(DTableError::from)?;
        Ok(())
    }

    fn open(&self, base_dir: &Path, name: &str, config: &ConfigValue) -> Result<Box<dyn DTable>, RegistryError> {
        let key_type = config_key_type(config)?;
        let table = ManagedDtable::open(base_dir.join(name), key_type, ManagedDtableConfig::default())?;
        Ok(Box::new(table))
    }
}

struct CacheFactory;

impl DTableFactory for CacheFactory {
    fn create(&self, base_dir: &Path, _name: &str, config: &ConfigValue, key_type: KeyType) -> Result<(), RegistryError> {
        let inner = config_map(config)?.get("inner").ok_or_else(|| invalid("cache config missing \"inner\""))?;
        let spec = sub_spec(inner)?;
        global().create(&spec.class, base_dir, &spec.name, &spec.config, key_type)
    }

    fn open(&self, base_dir: &Path, _name: &str, config: &ConfigValue) -> Result<Box<dyn DTable>, RegistryError> {
        let map = config_map(config)?;
        let capacity: usize = map
            .get("capacity")
            .and_then(ConfigValue::as_scalar)
            .ok_or_else(|| invalid("cache config missing \"capacity\""))?
            .parse()
            .map_err(|_| invalid("cache \"capacity\" must be an integer"))?;
        let inner_cfg = map.get("inner").ok_or_else(|| invalid("cache config missing \"inner\""))?;
        let spec = sub_spec(inner_cfg)?;
        let inner = global().open(&spec.class, base_dir, &spec.name, &spec.config)?;
        Ok(Box::new(CacheDTable::new(inner, capacity)))
    }
}

struct OverlayFactory;

impl DTableFactory for OverlayFactory {
    fn create(&self, _base_dir: &Path, _name: &str, _config: &ConfigValue, _key_type: KeyType) -> Result<(), RegistryError> {
        Err(RegistryError::DTable(DTableError::Unsupported(
            "overlay dtable has no on-disk form of its own; create its member tables instead".into(),
        )))
    }

    fn open(&self, base_dir: &Path, _name: &str, config: &ConfigValue) -> Result<Box<dyn DTable>, RegistryError> {
        let members = config_map(config)?
            .get("members")
            .and_then(ConfigValue::as_list)
            .ok_or_else(|| invalid("overlay config missing \"members\""))?;
        if members.is_empty() {
            return Err(invalid("overlay config \"members\" must not be empty"));
        }
        let mut tables = Vec::with_capacity(members.len());
        for member in members {
            let spec = sub_spec(member)?;
            tables.push(global().open(&spec.class, base_dir, &spec.name, &spec.config)?);
        }
        Ok(Box::new(MaterializedOverlay::build(tables)?))
    }
}

/// An overlay's merged view, eagerly materialized into an owned snapshot —
/// [`OverlayDTable`] itself borrows its sub-tables, which can't outlive the
/// `open` call that resolved them from the registry.
struct MaterializedOverlay {
    key_type: KeyType,
    entries: Vec<(Key, Entry)>,
}

impl MaterializedOverlay {
    fn build(tables: Vec<Box<dyn DTable>>) -> Result<Self, DTableError> {
        let refs: Vec<&dyn DTable> = tables.iter().map(|t| t.as_ref()).collect();
        let overlay = OverlayDTable::new(refs)?;
        let key_type = overlay.key_type();
        let mut it = overlay.iter();
        let mut entries = Vec::new();
        let mut valid = it.first()?;
        while valid {
            let key = it.key().expect("valid overlay position has a key");
            let entry = it.entry()?.expect("valid overlay position has an entry");
            entries.push((key, entry));
            valid = it.next()?;
        }
        Ok(Self { key_type, entries })
    }
}

impl DTable for MaterializedOverlay {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        let target = key.to_sort_bytes();
        Ok(self
            .entries
            .binary_search_by(|(k, _)| k.to_sort_bytes().cmp(&target))
            .ok()
            .map(|idx| self.entries[idx].1.clone()))
    }

    fn iter(&self) -> Box<dyn DTableIter + '_> {
        Box::new(SliceCursor::new(&self.entries))
    }

    fn size(&self) -> u64 {
        self.entries.len() as u64
    }
}

/// Maps class names to factories. Replacing an existing name is allowed,
/// last registration wins, but it's logged at `warn` — silent shadowing of
/// a factory is exactly the kind of bug this should be noisy about.
#[derive(Default)]
pub struct Registry {
    factories: Mutex<BTreeMap<String, Arc<dyn DTableFactory>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { factories: Mutex::new(BTreeMap::new()) }
    }

    pub fn register(&self, class_name: impl Into<String>, factory: Arc<dyn DTableFactory>) -> Result<(), RegistryError> {
        let class_name = class_name.into();
        if class_name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let mut factories = self.factories.lock().expect("registry mutex poisoned");
        if factories.contains_key(&class_name) {
            tracing::warn!(class_name = %class_name, "registry: replacing existing dtable factory");
        }
        factories.insert(class_name, factory);
        Ok(())
    }

    pub fn get(&self, class_name: &str) -> Result<Arc<dyn DTableFactory>, RegistryError> {
        let factories = self.factories.lock().expect("registry mutex poisoned");
        factories
            .get(class_name)
            .cloned()
            .ok_or_else(|| RegistryError::Unknown(class_name.to_string()))
    }

    /// Creates a brand-new, empty on-disk instance via the factory
    /// registered under `class_name`.
    pub fn create(
        &self,
        class_name: &str,
        base_dir: &Path,
        name: &str,
        config: &ConfigValue,
        key_type: KeyType,
    ) -> Result<(), RegistryError> {
        self.get(class_name)?.create(base_dir, name, config, key_type)
    }

    /// Opens an existing on-disk instance via the factory registered under
    /// `class_name`.
    pub fn open(&self, class_name: &str, base_dir: &Path, name: &str, config: &ConfigValue) -> Result<Box<dyn DTable>, RegistryError> {
        self.get(class_name)?.open(base_dir, name, config)
    }
}

/// The process-wide registry instance, pre-populated with this crate's
/// built-in dtable kinds.
pub fn global() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = Registry::new();
        registry.register("sorted_run", Arc::new(SortedRunFactory)).expect("built-in class name is non-empty");
        registry.register("array", Arc::new(ArrayFactory)).expect("built-in class name is non-empty");
        registry.register("cache", Arc::new(CacheFactory)).expect("built-in class name is non-empty");
        registry.register("overlay", Arc::new(OverlayFactory)).expect("built-in class name is non-empty");
        registry.register("managed", Arc::new(ManagedFactory)).expect("built-in class name is non-empty");
        registry
    })
}
