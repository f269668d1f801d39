//! Tag → factory table for protocol backends.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::backend::adapter::BackendAdapter;
use crate::backend::BackendKind;
use crate::config::{AddressSpec, ServerConfig};
use crate::console::ConsoleEngine;
use crate::lifecycle::{RunSlot, ServiceLifecycle};
use crate::protocol::{FtpEngine, HttpEngine, MqttEngine, SmbEngine, SmtpEngine};

/// Errors raised by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The type tag names no registered backend.
    #[error("unknown backend type '{0}'")]
    UnknownBackendType(String),

    /// A factory for this tag was already registered.
    #[error("backend type '{0}' is already registered")]
    AlreadyRegistered(BackendKind),
}

/// Shared inputs handed to every factory.
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub config: Arc<ServerConfig>,
    pub run_slot: RunSlot,
}

/// Builds one backend instance.
pub type BackendFactory = Box<dyn Fn(&BackendContext) -> Arc<dyn ServiceLifecycle> + Send + Sync>;

/// Registration entry for one backend type.
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub default_address: AddressSpec,
    factory: BackendFactory,
}

impl std::fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("kind", &self.kind)
            .field("default_address", &self.default_address)
            .finish_non_exhaustive()
    }
}

/// Maps type tags to backend factories.
///
/// Populated once at startup; lookups afterwards are read-only.
pub struct BackendRegistry {
    descriptors: HashMap<BackendKind, BackendDescriptor>,
    context: BackendContext,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            descriptors: HashMap::new(),
            context: BackendContext {
                config,
                run_slot: RunSlot::global(),
            },
        }
    }

    /// Create a registry with every built-in backend registered.
    pub fn builtin(config: Arc<ServerConfig>) -> Self {
        let mut registry = Self::new(config);
        for kind in BackendKind::ALL {
            registry.insert(kind, builtin_factory(kind));
        }
        registry
    }

    /// Register a factory for a tag. Each tag can be registered once.
    pub fn register<F>(&mut self, kind: BackendKind, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&BackendContext) -> Arc<dyn ServiceLifecycle> + Send + Sync + 'static,
    {
        if self.descriptors.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.insert(kind, Box::new(factory));
        Ok(())
    }

    fn insert(&mut self, kind: BackendKind, factory: BackendFactory) {
        self.descriptors.insert(
            kind,
            BackendDescriptor {
                kind,
                default_address: kind.default_address(),
                factory,
            },
        );
    }

    /// Look up the descriptor for a backend type.
    pub fn descriptor(&self, kind: BackendKind) -> Option<&BackendDescriptor> {
        self.descriptors.get(&kind)
    }

    /// Registered backend types.
    pub fn kinds(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.descriptors.keys().copied()
    }

    /// Instantiate the backend registered for `tag`.
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn ServiceLifecycle>, RegistryError> {
        let kind: BackendKind = tag.parse()?;
        let descriptor = self
            .descriptors
            .get(&kind)
            .ok_or_else(|| RegistryError::UnknownBackendType(tag.to_string()))?;

        tracing::debug!(backend = %kind, "Backend resolved");
        Ok((descriptor.factory)(&self.context))
    }
}

fn builtin_factory(kind: BackendKind) -> BackendFactory {
    match kind {
        BackendKind::Ftp => Box::new(|ctx: &BackendContext| -> Arc<dyn ServiceLifecycle> {
            Arc::new(BackendAdapter::new(FtpEngine::new(&ctx.config), ctx))
        }),
        BackendKind::Http => Box::new(|ctx: &BackendContext| -> Arc<dyn ServiceLifecycle> {
            Arc::new(BackendAdapter::new(HttpEngine::new(&ctx.config), ctx))
        }),
        BackendKind::Ssh => Box::new(|ctx: &BackendContext| -> Arc<dyn ServiceLifecycle> {
            Arc::new(BackendAdapter::new(ConsoleEngine::new(&ctx.config), ctx))
        }),
        BackendKind::Smtp => Box::new(|ctx: &BackendContext| -> Arc<dyn ServiceLifecycle> {
            Arc::new(BackendAdapter::new(SmtpEngine::new(&ctx.config), ctx))
        }),
        BackendKind::Smb => Box::new(|ctx: &BackendContext| -> Arc<dyn ServiceLifecycle> {
            Arc::new(BackendAdapter::new(SmbEngine::new(&ctx.config), ctx))
        }),
        BackendKind::Mqtt => Box::new(|ctx: &BackendContext| -> Arc<dyn ServiceLifecycle> {
            Arc::new(BackendAdapter::new(MqttEngine::new(&ctx.config), ctx))
        }),
    }
}
