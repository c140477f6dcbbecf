//! Type-id keyed tables: how to build a bean, and who handles it.

use std::collections::HashMap;
use std::sync::Arc;

use beanwire_codec::{Bean, BeanType};
use beanwire_transport::SessionId;

use crate::Dispatcher;

// ---------------------------------------------------------------------------
// BeanRegistry
// ---------------------------------------------------------------------------

/// Builds an empty bean ready to be decoded into.
pub type BeanFactory = Box<dyn Fn() -> Box<dyn Bean> + Send + Sync>;

struct BeanEntry {
    factory: BeanFactory,
    max_size: Option<usize>,
}

/// Maps type ids to bean factories.
#[derive(Default)]
pub struct BeanRegistry {
    entries: HashMap<u32, BeanEntry>,
}

impl BeanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `T::TYPE`, replacing any earlier registration.
    pub fn register<T: BeanType>(&mut self) {
        self.register_with(T::TYPE, || Box::new(T::default()));
    }

    /// Registers a custom factory. The frame size limit is taken from a
    /// bean the factory builds once, here.
    pub fn register_with<F>(&mut self, type_id: u32, factory: F)
    where
        F: Fn() -> Box<dyn Bean> + Send + Sync + 'static,
    {
        let max_size = factory().max_size();
        self.entries.insert(
            type_id,
            BeanEntry {
                factory: Box::new(factory),
                max_size,
            },
        );
    }

    /// A fresh bean for `type_id`, or `None` if the type is unknown.
    pub fn create(&self, type_id: u32) -> Option<Box<dyn Bean>> {
        self.entries.get(&type_id).map(|e| (e.factory)())
    }

    /// Largest payload accepted for `type_id`: the bean's own limit if it
    /// declares one, else `default`.
    pub fn max_size(&self, type_id: u32, default: usize) -> usize {
        self.entries
            .get(&type_id)
            .and_then(|e| e.max_size)
            .unwrap_or(default)
    }

    pub fn contains(&self, type_id: u32) -> bool {
        self.entries.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// A decoded frame delivered to a handler.
///
/// `B` is `dyn Bean` for handlers registered by type id, or the concrete
/// bean type for handlers registered with [`HandlerRegistry::on`].
#[derive(Debug)]
pub struct Incoming<B: ?Sized = dyn Bean> {
    pub session: SessionId,
    /// The frame's serial. Positive means the sender expects a reply:
    /// answer with `Dispatcher::reply(session, serial, ..)`.
    pub serial: i32,
    pub bean: Box<B>,
}

impl<B: ?Sized> Incoming<B> {
    /// `true` if the sender is waiting for a reply.
    pub fn expects_reply(&self) -> bool {
        self.serial > 0
    }
}

/// Callback for frames of one type.
pub type Handler = Arc<dyn Fn(&mut Dispatcher, Incoming) + Send + Sync>;

/// Maps type ids to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<u32, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler for `type_id`, replacing any earlier one.
    pub fn insert<F>(&mut self, type_id: u32, handler: F)
    where
        F: Fn(&mut Dispatcher, Incoming) + Send + Sync + 'static,
    {
        self.handlers.insert(type_id, Arc::new(handler));
    }

    /// Sets a handler that receives `T` itself instead of `dyn Bean`.
    pub fn on<T, F>(&mut self, handler: F)
    where
        T: BeanType,
        F: Fn(&mut Dispatcher, Incoming<T>) + Send + Sync + 'static,
    {
        self.insert(T::TYPE, move |dispatcher, incoming| {
            let Incoming { session, serial, bean } = incoming;
            match bean.downcast::<T>() {
                Ok(bean) => handler(dispatcher, Incoming { session, serial, bean }),
                Err(other) => tracing::debug!(
                    %session,
                    type_id = T::TYPE,
                    actual = ?other,
                    "handler skipped: bean is not the registered type"
                ),
            }
        });
    }

    /// The handler for `type_id`, cloned so it can be called while the
    /// dispatcher is borrowed mutably.
    pub fn get(&self, type_id: u32) -> Option<Handler> {
        self.handlers.get(&type_id).cloned()
    }

    pub fn contains(&self, type_id: u32) -> bool {
        self.handlers.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use beanwire_codec::{CodecError, Cursor, DynBean, RawBean};

    use super::*;

    #[derive(Debug, Default)]
    struct Limited;

    impl Bean for Limited {
        fn bean_type(&self) -> u32 {
            Self::TYPE
        }

        fn max_size(&self) -> Option<usize> {
            Some(8)
        }

        fn marshal(&self, out: &mut Cursor) {
            out.marshal_u8(0);
        }

        fn unmarshal(&mut self, input: &mut Cursor) -> Result<(), CodecError> {
            input.skip_bean()
        }
    }

    impl BeanType for Limited {
        const TYPE: u32 = 5;
    }

    #[test]
    fn test_register_creates_default_bean_of_type() {
        let mut registry = BeanRegistry::new();
        registry.register::<Limited>();

        let bean = registry.create(5).expect("registered");
        assert!(bean.is::<Limited>());
        assert!(registry.create(6).is_none());
    }

    #[test]
    fn test_max_size_prefers_bean_limit_over_default() {
        let mut registry = BeanRegistry::new();
        registry.register::<Limited>();
        registry.register_with(9, || Box::new(DynBean::new(9)));

        assert_eq!(registry.max_size(5, 65536), 8);
        assert_eq!(registry.max_size(9, 65536), 65536);
        assert_eq!(registry.max_size(404, 1000), 1000);
    }

    #[test]
    fn test_register_with_replaces_previous_factory() {
        let mut registry = BeanRegistry::new();
        registry.register_with(3, || Box::new(DynBean::new(3)));
        registry.register_with(3, || Box::new(RawBean::new(3, Vec::new())));

        assert_eq!(registry.len(), 1);
        assert!(registry.create(3).unwrap().is::<RawBean>());
    }

    #[test]
    fn test_incoming_expects_reply_only_for_positive_serial() {
        let make = |serial| Incoming::<Limited> {
            session: SessionId::new(1),
            serial,
            bean: Box::new(Limited),
        };
        assert!(make(4).expects_reply());
        assert!(!make(0).expects_reply());
        assert!(!make(-4).expects_reply());
    }
}
