//! Dependency container.
//!
//! Services are registered at startup and shared by reference with every
//! handler and every gRPC service that opts in through [`InjectContainer`].
//! The container itself is shared behind an `Arc` from the start, so a
//! service registered after a gRPC implementation received the container is
//! still visible to it.
//!
//! # Example
//!
//! ```rust
//! use kairos_core::di::Container;
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! let container = Container::new();
//! container.register(Arc::new(Database { url: "postgres://localhost/app".into() }));
//!
//! let db: Arc<Database> = container.resolve().unwrap();
//! assert_eq!(db.url, "postgres://localhost/app");
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Error raised when a dependency cannot be provided.
#[derive(Debug, Clone, Error)]
pub enum InjectionError {
    /// Nothing of the requested type was registered.
    #[error("{type_name} is not registered in the container")]
    NotRegistered {
        /// Fully qualified type name.
        type_name: &'static str,
    },

    /// The target refused or could not store the container.
    #[error("cannot inject container into {target}: {reason}")]
    Rejected {
        /// Name of the injection target.
        target: String,
        /// Why injection failed.
        reason: String,
    },
}

impl InjectionError {
    /// Creates a [`InjectionError::NotRegistered`] for `T`.
    #[must_use]
    pub fn not_registered<T: ?Sized>() -> Self {
        Self::NotRegistered {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Creates a [`InjectionError::Rejected`] for `target`.
    #[must_use]
    pub fn rejected(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Type-keyed registry of shared services.
#[derive(Default)]
pub struct Container {
    services: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Container {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service, replacing any previous one of the same type.
    pub fn register<T: Send + Sync + 'static>(&self, service: Arc<T>) {
        self.services.write().insert(TypeId::of::<T>(), service);
    }

    /// Resolves a service by type.
    #[must_use]
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }

    /// Resolves a service, failing if it is not registered.
    pub fn resolve_required<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, InjectionError> {
        self.resolve().ok_or_else(InjectionError::not_registered::<T>)
    }

    /// Returns `true` if a service of type `T` is registered.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.read().contains_key(&TypeId::of::<T>())
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("service_count", &self.len())
            .finish()
    }
}

/// Opt-in capability for receiving the shared container.
///
/// Implementors store the container before they start serving traffic.
/// Returning an error marks the registration as misconfigured; whether that
/// aborts the registration is up to the caller.
pub trait InjectContainer {
    /// Stores the shared container.
    fn set_container(&mut self, container: Arc<Container>) -> Result<(), InjectionError>;
}
