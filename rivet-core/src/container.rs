// Service instance factory and dependency container

use crate::logging::{debug, trace};
use crate::{Error, RequestContext, Result, TypeInfo};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A type-erased service or dependency instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&Container) -> Result<Instance> + Send + Sync>;

/// Produces service instances for the dispatcher and takes them back when a
/// request completes.
pub trait TypeFactory: Send + Sync {
    fn create(&self, type_info: &TypeInfo, ctx: &Arc<RequestContext>) -> Result<Instance>;

    /// Called exactly once for every instance handed out by `create`, on
    /// every exit path. Dropping the last reference disposes the instance.
    fn release(&self, instance: Instance) {
        drop(instance);
    }
}

/// The dependency container.
///
/// Singletons take precedence over transient factories, so a test harness
/// can pre-register a shared service instance that replaces the per-call one.
#[derive(Clone, Default)]
pub struct Container {
    singletons: Arc<RwLock<HashMap<TypeId, Instance>>>,
    factories: Arc<RwLock<HashMap<TypeId, Factory>>>,
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new container");
        Self::default()
    }

    /// Register a shared instance
    pub fn register<T: Any + Send + Sync>(&self, instance: T) {
        self.register_arc(Arc::new(instance));
    }

    pub fn register_arc<T: Any + Send + Sync>(&self, instance: Arc<T>) {
        let type_name = std::any::type_name::<T>();
        self.singletons.write().insert(TypeId::of::<T>(), instance);
        debug!(provider = type_name, "Singleton registered");
    }

    /// Register a factory producing a fresh instance per resolution
    pub fn register_factory<T, F>(&self, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> Result<T> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        let factory: Factory = Arc::new(move |c| Ok(Arc::new(factory(c)?) as Instance));
        self.factories.write().insert(TypeId::of::<T>(), factory);
        debug!(provider = type_name, "Transient factory registered");
    }

    /// Resolve a dependency by type
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let type_name = std::any::type_name::<T>();
        let instance = self.resolve_by_id(TypeId::of::<T>(), type_name)?;
        instance
            .downcast::<T>()
            .map_err(|_| Error::ProviderNotFound(format!("{} resolved to another type", type_name)))
    }

    fn resolve_by_id(&self, type_id: TypeId, type_name: &str) -> Result<Instance> {
        if let Some(instance) = self.singletons.read().get(&type_id) {
            trace!(provider = type_name, "Resolved singleton");
            return Ok(Arc::clone(instance));
        }

        // Clone the factory out so it can resolve its own dependencies
        let factory = self.factories.read().get(&type_id).cloned();
        match factory {
            Some(factory) => {
                trace!(provider = type_name, "Creating transient instance");
                factory(self)
            }
            None => Err(Error::ProviderNotFound(type_name.to_string())),
        }
    }

    /// Check if a provider is registered
    pub fn has<T: Any>(&self) -> bool {
        self.has_id(TypeId::of::<T>())
    }

    pub fn has_id(&self, type_id: TypeId) -> bool {
        self.singletons.read().contains_key(&type_id) || self.factories.read().contains_key(&type_id)
    }

    /// Clear all providers
    pub fn clear(&self) {
        let count = self.singletons.read().len() + self.factories.read().len();
        self.singletons.write().clear();
        self.factories.write().clear();
        debug!(provider_count = count, "Cleared container");
    }
}

impl TypeFactory for Container {
    fn create(&self, type_info: &TypeInfo, _ctx: &Arc<RequestContext>) -> Result<Instance> {
        self.resolve_by_id(type_info.id(), type_info.name())
    }

    fn release(&self, instance: Instance) {
        trace!(strong_count = Arc::strong_count(&instance), "Releasing instance");
        drop(instance);
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("singletons", &self.singletons.read().len())
            .field("factories", &self.factories.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Clock(u64);

    struct Repo {
        clock: Arc<Clock>,
    }

    static DROPPED: AtomicUsize = AtomicUsize::new(0);

    struct Disposable;

    impl Drop for Disposable {
        fn drop(&mut self) {
            DROPPED.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_singleton_resolution() {
        let container = Container::new();
        container.register(Clock(7));
        assert!(container.has::<Clock>());
        assert_eq!(container.resolve::<Clock>().unwrap().0, 7);
        assert!(matches!(
            container.resolve::<Repo>(),
            Err(Error::ProviderNotFound(_))
        ));
    }

    #[test]
    fn test_transient_factory_resolves_dependencies() {
        let container = Container::new();
        container.register(Clock(1));
        container.register_factory(|c| {
            Ok(Repo {
                clock: c.resolve::<Clock>()?,
            })
        });

        let a = container.resolve::<Repo>().unwrap();
        let b = container.resolve::<Repo>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a.clock, &b.clock));
    }

    #[test]
    fn test_singleton_wins_over_factory() {
        let container = Container::new();
        container.register_factory(|_| Ok(Clock(1)));
        container.register(Clock(2));
        let ctx = Arc::new(RequestContext::basic());
        let instance = container.create(&TypeInfo::of::<Clock>(), &ctx).unwrap();
        assert_eq!(instance.downcast_ref::<Clock>().unwrap().0, 2);
    }

    #[test]
    fn test_release_disposes_transients() {
        let container = Container::new();
        container.register_factory(|_| Ok(Disposable));
        let ctx = Arc::new(RequestContext::basic());

        let before = DROPPED.load(Ordering::SeqCst);
        let instance = container.create(&TypeInfo::of::<Disposable>(), &ctx).unwrap();
        container.release(instance);
        assert_eq!(DROPPED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_clear() {
        let container = Container::new();
        container.register(Clock(1));
        container.clear();
        assert!(!container.has::<Clock>());
    }
}
