//! Topic → decoder routing with hot-swappable plugin bindings.
//!
//! Bind/rebind/unbind serialise through one mutex and publish a fresh
//! immutable router snapshot; decode workers read the snapshot through a
//! single atomic load and never touch the mutex. Shared objects are cached
//! by path and stay loaded until the registry is dropped — a worker may
//! still be executing plugin code after its topic was unbound.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, info};

use tapline_abi::{AbiVersionFn, DecodeFn, ABI_VERSION_SYMBOL, DECODER_ABI_VERSION};
use tapline_common::error::{PluginError, Result};

/// Path recorded for decoders registered without a shared object.
pub const BUILTIN_PATH: &str = "builtin:tapline-core";

/// A resolved decoder: the plugin entry point plus its name tag.
#[derive(Clone)]
pub struct Decoder {
    pub(crate) func: DecodeFn,
    name: Arc<str>,
}

impl Decoder {
    /// The symbol (or builtin name) this decoder was bound as.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw entry point; pointer equality identifies the plugin function.
    pub fn raw_fn(&self) -> DecodeFn {
        self.func
    }
}

/// Observability view of one binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingInfo {
    pub path: String,
    pub symbol: String,
}

#[derive(Default)]
struct Router {
    table: HashMap<String, Decoder>,
}

impl Router {
    fn lookup(&self, topic: &str) -> Option<Decoder> {
        self.table.get(topic).cloned()
    }
}

struct LoadedPlugin {
    path: PathBuf,
    lib: Library,
}

#[derive(Default)]
struct RegistryInner {
    plugins: Vec<LoadedPlugin>,
    by_path: HashMap<PathBuf, usize>,
    bindings: HashMap<String, BindingInfo>,
}

/// The decoder registry. One per core.
pub struct DecoderRegistry {
    router: ArcSwap<Router>,
    inner: Mutex<RegistryInner>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            router: ArcSwap::from_pointee(Router::default()),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Bind a topic to a plugin decoder. Fails if the topic is already
    /// bound; use [`DecoderRegistry::rebind`] to overwrite.
    pub fn bind(&self, topic: &str, so_path: impl AsRef<Path>, symbol: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.bindings.contains_key(topic) {
            return Err(PluginError::AlreadyBound(topic.to_string()).into());
        }
        self.bind_locked(&mut inner, topic, so_path.as_ref(), symbol)
    }

    /// Bind a topic to a plugin decoder, overwriting any existing binding.
    pub fn rebind(&self, topic: &str, so_path: impl AsRef<Path>, symbol: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        self.bind_locked(&mut inner, topic, so_path.as_ref(), symbol)
    }

    fn bind_locked(
        &self,
        inner: &mut RegistryInner,
        topic: &str,
        so_path: &Path,
        symbol: &str,
    ) -> Result<()> {
        let plugin_idx = Self::ensure_plugin_loaded(inner, so_path)?;
        let func = Self::resolve_decode_symbol(&inner.plugins[plugin_idx].lib, symbol)?;

        self.publish(topic, Decoder {
            func,
            name: Arc::from(symbol),
        });
        inner.bindings.insert(
            topic.to_string(),
            BindingInfo {
                path: so_path.display().to_string(),
                symbol: symbol.to_string(),
            },
        );
        info!(topic, path = %so_path.display(), symbol, "decoder bound");
        Ok(())
    }

    /// Register an in-process decoder (the builtin passthrough, test
    /// decoders). Overwrites like [`DecoderRegistry::rebind`].
    pub fn bind_builtin(&self, topic: &str, name: &str, func: DecodeFn) -> Result<()> {
        let mut inner = self.inner.lock();
        self.publish(topic, Decoder {
            func,
            name: Arc::from(name),
        });
        inner.bindings.insert(
            topic.to_string(),
            BindingInfo {
                path: BUILTIN_PATH.to_string(),
                symbol: name.to_string(),
            },
        );
        debug!(topic, name, "builtin decoder bound");
        Ok(())
    }

    /// Remove a topic's binding. Returns whether one existed. The plugin's
    /// shared object stays loaded.
    pub fn unbind(&self, topic: &str) -> bool {
        let mut inner = self.inner.lock();
        let existed = inner.bindings.remove(topic).is_some();
        if existed {
            let current = self.router.load();
            let mut table = current.table.clone();
            table.remove(topic);
            self.router.store(Arc::new(Router { table }));
            info!(topic, "decoder unbound");
        }
        existed
    }

    /// The decoder currently routed for `topic`. Hot path: one atomic
    /// snapshot load, wait-free, no locks.
    pub fn decoder_for(&self, topic: &str) -> Option<Decoder> {
        self.router.load().lookup(topic)
    }

    /// The (path, symbol) pair behind a binding.
    pub fn binding_info(&self, topic: &str) -> Option<BindingInfo> {
        self.inner.lock().bindings.get(topic).cloned()
    }

    /// Number of bound topics.
    pub fn topic_count(&self) -> usize {
        self.inner.lock().bindings.len()
    }

    fn publish(&self, topic: &str, decoder: Decoder) {
        let current = self.router.load();
        let mut table = current.table.clone();
        table.insert(topic.to_string(), decoder);
        self.router.store(Arc::new(Router { table }));
    }

    /// Load a shared object, verifying its ABI version, or reuse the cached
    /// handle for the same path.
    fn ensure_plugin_loaded(inner: &mut RegistryInner, path: &Path) -> Result<usize> {
        if let Some(&idx) = inner.by_path.get(path) {
            return Ok(idx);
        }

        let lib = unsafe { Library::new(path) }.map_err(|source| PluginError::LoadFailed {
            path: path.display().to_string(),
            source,
        })?;

        let version = unsafe {
            let version_fn: libloading::Symbol<AbiVersionFn> = lib
                .get(ABI_VERSION_SYMBOL.as_bytes())
                .map_err(|source| PluginError::SymbolNotFound {
                    symbol: ABI_VERSION_SYMBOL.to_string(),
                    source,
                })?;
            version_fn()
        };
        if version != DECODER_ABI_VERSION {
            return Err(PluginError::AbiMismatch {
                found: version,
                expected: DECODER_ABI_VERSION,
            }
            .into());
        }

        let idx = inner.plugins.len();
        inner.plugins.push(LoadedPlugin {
            path: path.to_path_buf(),
            lib,
        });
        inner.by_path.insert(path.to_path_buf(), idx);
        debug!(path = %path.display(), "plugin loaded");
        Ok(idx)
    }

    fn resolve_decode_symbol(lib: &Library, symbol: &str) -> Result<DecodeFn> {
        let sym: libloading::Symbol<DecodeFn> =
            unsafe { lib.get(symbol.as_bytes()) }.map_err(|source| PluginError::SymbolNotFound {
                symbol: symbol.to_string(),
                source,
            })?;
        Ok(*sym)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::passthrough_decode;
    use tapline_abi::{DecodeOut, Envelope, DECODE_OK};
    use tapline_common::error::Error;

    unsafe extern "C" fn nop_decode(_env: *const Envelope, out: *mut DecodeOut) -> i32 {
        (*out).kind = DECODE_OK;
        (*out).len = 0;
        0
    }

    #[test]
    fn test_builtin_bind_and_lookup() {
        let registry = DecoderRegistry::new();
        registry
            .bind_builtin("t1", "passthrough", passthrough_decode)
            .unwrap();

        let decoder = registry.decoder_for("t1").expect("bound");
        assert_eq!(decoder.name(), "passthrough");
        assert!(registry.decoder_for("t2").is_none());

        let info = registry.binding_info("t1").expect("info");
        assert_eq!(info.path, BUILTIN_PATH);
        assert_eq!(info.symbol, "passthrough");
        assert_eq!(registry.topic_count(), 1);
    }

    #[test]
    fn test_unbind_round_trip() {
        let registry = DecoderRegistry::new();
        registry
            .bind_builtin("t1", "passthrough", passthrough_decode)
            .unwrap();
        assert!(registry.binding_info("t1").is_some());

        assert!(registry.unbind("t1"));
        assert!(registry.binding_info("t1").is_none());
        assert!(registry.decoder_for("t1").is_none());
        assert!(!registry.unbind("t1"));
    }

    #[test]
    fn test_rebind_replaces_decoder() {
        let registry = DecoderRegistry::new();
        registry
            .bind_builtin("t1", "passthrough", passthrough_decode)
            .unwrap();
        registry.bind_builtin("t1", "nop", nop_decode).unwrap();

        let decoder = registry.decoder_for("t1").expect("bound");
        assert_eq!(decoder.name(), "nop");
        assert_eq!(decoder.raw_fn() as usize, nop_decode as usize);
    }

    #[test]
    fn test_bind_refuses_bound_topic() {
        let registry = DecoderRegistry::new();
        registry
            .bind_builtin("t1", "passthrough", passthrough_decode)
            .unwrap();
        let err = registry.bind("t1", "/any/path.so", "decode").unwrap_err();
        assert!(matches!(
            err,
            Error::Plugin(PluginError::AlreadyBound(topic)) if topic == "t1"
        ));
    }

    #[test]
    fn test_bind_fails_on_missing_library() {
        let registry = DecoderRegistry::new();
        let err = registry
            .bind("t1", "/nonexistent/libdecoder.so", "decode")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Plugin(PluginError::LoadFailed { .. })
        ));
        assert!(registry.binding_info("t1").is_none());
    }

    #[test]
    fn test_snapshot_isolated_from_later_changes() {
        let registry = DecoderRegistry::new();
        registry
            .bind_builtin("t1", "passthrough", passthrough_decode)
            .unwrap();

        let held = registry.decoder_for("t1").expect("bound");
        registry.unbind("t1");

        // The previously fetched decoder stays callable and keeps its tag.
        assert_eq!(held.name(), "passthrough");
        assert!(registry.decoder_for("t1").is_none());
    }
}
