//! Process-wide handler registry.
//!
//! The registry maps payload types to handler entries. It is populated once
//! during an explicit registration phase at process start and then frozen
//! into an immutable `Arc`, safe for unsynchronized concurrent reads from
//! any number of pipelines. Lookup is by exact payload `TypeId`; there is no
//! inheritance- or trait-based matching, so polymorphic payload hierarchies
//! must register each concrete type.

use crate::container::ServiceProvider;
use crate::failure::CapturedFault;
use crate::handler::{
    AsyncHandler, AsyncQueryHandler, Handler, Query, QueryHandler, SelfHandling, SelfHandlingAsync,
};
use crate::message::MessageKind;
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Why a type-erased invocation did not complete normally.
pub(crate) enum InvokeError {
    /// The handler's own operation raised; the original error is captured.
    Fault(CapturedFault),
    /// The handler is async-only and was reached by the synchronous path.
    RequiresAsync,
    /// The payload did not downcast to the registered payload type.
    PayloadTypeMismatch { expected: &'static str },
    /// The resolved instance did not downcast to the registered handler type.
    HandlerTypeMismatch { expected: &'static str },
}

/// `Ok(Some(..))` carries a query result; commands and events yield `None`.
pub(crate) type InvokeOutcome = Result<Option<Box<dyn Any + Send>>, InvokeError>;

/// Type-erased handler invocation, stored in a registry entry.
///
/// Adapters downcast the payload (and, for separately registered handlers,
/// the resolved instance) back to their concrete types and call the typed
/// handler trait.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    fn invoke(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome;

    async fn invoke_async(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome;
}

fn downcast_instance<'a, H: 'static>(
    instance: Option<&'a (dyn Any + Send + Sync)>,
) -> Result<&'a H, InvokeError> {
    instance
        .and_then(|instance| instance.downcast_ref::<H>())
        .ok_or(InvokeError::HandlerTypeMismatch {
            expected: type_name::<H>(),
        })
}

fn downcast_payload<'a, M: 'static>(
    payload: &'a mut (dyn Any + Send),
) -> Result<&'a mut M, InvokeError> {
    payload
        .downcast_mut::<M>()
        .ok_or(InvokeError::PayloadTypeMismatch {
            expected: type_name::<M>(),
        })
}

struct BlockingAdapter<M, H> {
    _marker: PhantomData<fn(M, H)>,
}

#[async_trait]
impl<M, H> ErasedHandler for BlockingAdapter<M, H>
where
    M: Send + 'static,
    H: Handler<M> + Send + Sync + 'static,
{
    fn invoke(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        let handler = downcast_instance::<H>(instance)?;
        let payload = downcast_payload::<M>(payload)?;
        handler
            .handle(payload, services)
            .map(|_| None)
            .map_err(|error| InvokeError::Fault(CapturedFault::capture(error)))
    }

    async fn invoke_async(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        // A blocking handler runs inline on the async path; no suspension.
        self.invoke(instance, payload, services)
    }
}

struct FutureAdapter<M, H> {
    _marker: PhantomData<fn(M, H)>,
}

#[async_trait]
impl<M, H> ErasedHandler for FutureAdapter<M, H>
where
    M: Send + 'static,
    H: AsyncHandler<M> + Send + Sync + 'static,
{
    fn invoke(
        &self,
        _instance: Option<&(dyn Any + Send + Sync)>,
        _payload: &mut (dyn Any + Send),
        _services: &ServiceProvider,
    ) -> InvokeOutcome {
        Err(InvokeError::RequiresAsync)
    }

    async fn invoke_async(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        let handler = downcast_instance::<H>(instance)?;
        let payload = downcast_payload::<M>(payload)?;
        handler
            .handle(payload, services)
            .await
            .map(|_| None)
            .map_err(|error| InvokeError::Fault(CapturedFault::capture(error)))
    }
}

struct QueryAdapter<Q, H> {
    _marker: PhantomData<fn(Q, H)>,
}

#[async_trait]
impl<Q, H> ErasedHandler for QueryAdapter<Q, H>
where
    Q: Query,
    H: QueryHandler<Q> + Send + Sync + 'static,
{
    fn invoke(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        let handler = downcast_instance::<H>(instance)?;
        let query = downcast_payload::<Q>(payload)?;
        let output = handler
            .handle(query, services)
            .map_err(|error| InvokeError::Fault(CapturedFault::capture(error)))?;
        let result: Box<dyn Any + Send> = Box::new(output);
        Ok(Some(result))
    }

    async fn invoke_async(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        self.invoke(instance, payload, services)
    }
}

struct FutureQueryAdapter<Q, H> {
    _marker: PhantomData<fn(Q, H)>,
}

#[async_trait]
impl<Q, H> ErasedHandler for FutureQueryAdapter<Q, H>
where
    Q: Query,
    H: AsyncQueryHandler<Q> + Send + Sync + 'static,
{
    fn invoke(
        &self,
        _instance: Option<&(dyn Any + Send + Sync)>,
        _payload: &mut (dyn Any + Send),
        _services: &ServiceProvider,
    ) -> InvokeOutcome {
        Err(InvokeError::RequiresAsync)
    }

    async fn invoke_async(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        let handler = downcast_instance::<H>(instance)?;
        let query = downcast_payload::<Q>(payload)?;
        let output = handler
            .handle(query, services)
            .await
            .map_err(|error| InvokeError::Fault(CapturedFault::capture(error)))?;
        let result: Box<dyn Any + Send> = Box::new(output);
        Ok(Some(result))
    }
}

struct SelfHandlingAdapter<P> {
    _marker: PhantomData<fn(P)>,
}

#[async_trait]
impl<P> ErasedHandler for SelfHandlingAdapter<P>
where
    P: SelfHandling,
{
    fn invoke(
        &self,
        _instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        let payload = downcast_payload::<P>(payload)?;
        payload
            .handle(services)
            .map(|_| None)
            .map_err(|error| InvokeError::Fault(CapturedFault::capture(error)))
    }

    async fn invoke_async(
        &self,
        instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        self.invoke(instance, payload, services)
    }
}

struct SelfHandlingFutureAdapter<P> {
    _marker: PhantomData<fn(P)>,
}

#[async_trait]
impl<P> ErasedHandler for SelfHandlingFutureAdapter<P>
where
    P: SelfHandlingAsync,
{
    fn invoke(
        &self,
        _instance: Option<&(dyn Any + Send + Sync)>,
        _payload: &mut (dyn Any + Send),
        _services: &ServiceProvider,
    ) -> InvokeOutcome {
        Err(InvokeError::RequiresAsync)
    }

    async fn invoke_async(
        &self,
        _instance: Option<&(dyn Any + Send + Sync)>,
        payload: &mut (dyn Any + Send),
        services: &ServiceProvider,
    ) -> InvokeOutcome {
        let payload = downcast_payload::<P>(payload)?;
        payload
            .handle(services)
            .await
            .map(|_| None)
            .map_err(|error| InvokeError::Fault(CapturedFault::capture(error)))
    }
}

/// How the executor obtains a live handler for an entry.
pub(crate) enum HandlerBinding {
    /// The payload is its own handler; no instance is resolved.
    SelfHandled,
    /// A separately registered handler type, resolved from the service
    /// provider or built by the fallback factory.
    Registered {
        handler_type_id: TypeId,
        factory: Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>,
    },
}

/// One registry entry: the resolved handler target for a payload type.
pub struct HandlerEntry {
    payload_type: &'static str,
    handler_type: &'static str,
    kind: MessageKind,
    binding: HandlerBinding,
    invoker: Arc<dyn ErasedHandler>,
}

impl HandlerEntry {
    /// Type name of the payload this entry handles.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Type name of the handler target. Equals the payload type for
    /// self-handled entries.
    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    /// Message kind this entry was registered for.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Whether the payload handles itself.
    pub fn is_self_handled(&self) -> bool {
        matches!(self.binding, HandlerBinding::SelfHandled)
    }

    pub(crate) fn binding(&self) -> &HandlerBinding {
        &self.binding
    }

    pub(crate) fn invoker(&self) -> &Arc<dyn ErasedHandler> {
        &self.invoker
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("payload_type", &self.payload_type)
            .field("handler_type", &self.handler_type)
            .field("kind", &self.kind)
            .field("self_handled", &self.is_self_handled())
            .finish()
    }
}

/// Immutable payload-type to handler mapping, built once at startup.
pub struct HandlerRegistry {
    entries: DashMap<TypeId, Arc<HandlerEntry>>,
}

impl HandlerRegistry {
    /// Start a registration phase.
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            entries: DashMap::new(),
        }
    }

    /// Look up the entry for a payload type, constrained to the message
    /// kind it was registered under. Exact `TypeId` match only.
    pub fn find(&self, payload_type: TypeId, kind: MessageKind) -> Option<Arc<HandlerEntry>> {
        self.entries
            .get(&payload_type)
            .filter(|entry| entry.kind() == kind)
            .map(|entry| entry.value().clone())
    }

    /// Whether any entry exists for a payload type, regardless of kind.
    pub fn contains(&self, payload_type: TypeId) -> bool {
        self.entries.contains_key(&payload_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// A group of related handler registrations, scanned during the
/// registration phase. This is the explicit counterpart of scanning
/// candidate assemblies at startup: the caller supplies the modules, the
/// builder collects what they register.
pub trait HandlerModule {
    fn register(&self, builder: HandlerRegistryBuilder) -> HandlerRegistryBuilder;
}

/// Collects handler registrations, then freezes them into an immutable
/// [`HandlerRegistry`].
///
/// Registering a second handler for the same payload type replaces the
/// first; lookup never has more than one candidate, so there is no
/// ambiguous multi-match resolution.
pub struct HandlerRegistryBuilder {
    entries: DashMap<TypeId, Arc<HandlerEntry>>,
}

impl HandlerRegistryBuilder {
    /// Register a synchronous command handler type.
    pub fn command<C, H>(self) -> Self
    where
        C: Send + 'static,
        H: Handler<C> + Default + Send + Sync + 'static,
    {
        self.registered::<C, H>(
            MessageKind::Command,
            Arc::new(BlockingAdapter::<C, H> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register an asynchronous command handler type. Entries registered
    /// this way can only be reached through `dispatch_async`.
    pub fn command_async<C, H>(self) -> Self
    where
        C: Send + 'static,
        H: AsyncHandler<C> + Default + Send + Sync + 'static,
    {
        self.registered::<C, H>(
            MessageKind::Command,
            Arc::new(FutureAdapter::<C, H> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register a synchronous query handler type.
    pub fn query<Q, H>(self) -> Self
    where
        Q: Query,
        H: QueryHandler<Q> + Default + Send + Sync + 'static,
    {
        self.registered::<Q, H>(
            MessageKind::Query,
            Arc::new(QueryAdapter::<Q, H> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register an asynchronous query handler type.
    pub fn query_async<Q, H>(self) -> Self
    where
        Q: Query,
        H: AsyncQueryHandler<Q> + Default + Send + Sync + 'static,
    {
        self.registered::<Q, H>(
            MessageKind::Query,
            Arc::new(FutureQueryAdapter::<Q, H> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register a synchronous event handler type.
    pub fn event<E, H>(self) -> Self
    where
        E: Send + 'static,
        H: Handler<E> + Default + Send + Sync + 'static,
    {
        self.registered::<E, H>(
            MessageKind::Event,
            Arc::new(BlockingAdapter::<E, H> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register an asynchronous event handler type.
    pub fn event_async<E, H>(self) -> Self
    where
        E: Send + 'static,
        H: AsyncHandler<E> + Default + Send + Sync + 'static,
    {
        self.registered::<E, H>(
            MessageKind::Event,
            Arc::new(FutureAdapter::<E, H> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register a command payload that handles itself.
    pub fn self_handled_command<C>(self) -> Self
    where
        C: SelfHandling,
    {
        self.self_handled::<C>(
            MessageKind::Command,
            Arc::new(SelfHandlingAdapter::<C> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register a command payload that handles itself asynchronously.
    pub fn self_handled_command_async<C>(self) -> Self
    where
        C: SelfHandlingAsync,
    {
        self.self_handled::<C>(
            MessageKind::Command,
            Arc::new(SelfHandlingFutureAdapter::<C> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register an event payload that handles itself.
    pub fn self_handled_event<E>(self) -> Self
    where
        E: SelfHandling,
    {
        self.self_handled::<E>(
            MessageKind::Event,
            Arc::new(SelfHandlingAdapter::<E> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register an event payload that handles itself asynchronously.
    pub fn self_handled_event_async<E>(self) -> Self
    where
        E: SelfHandlingAsync,
    {
        self.self_handled::<E>(
            MessageKind::Event,
            Arc::new(SelfHandlingFutureAdapter::<E> {
                _marker: PhantomData,
            }),
        )
    }

    /// Run each module's registrations through the builder.
    pub fn scan(mut self, modules: &[&dyn HandlerModule]) -> Self {
        for module in modules {
            self = module.register(self);
        }
        self
    }

    /// Freeze the collected registrations. The returned registry is
    /// immutable and safe for unsynchronized concurrent reads.
    pub fn build(self) -> Arc<HandlerRegistry> {
        Arc::new(HandlerRegistry {
            entries: self.entries,
        })
    }

    fn registered<P, H>(self, kind: MessageKind, invoker: Arc<dyn ErasedHandler>) -> Self
    where
        P: Send + 'static,
        H: Default + Send + Sync + 'static,
    {
        let entry = HandlerEntry {
            payload_type: type_name::<P>(),
            handler_type: type_name::<H>(),
            kind,
            binding: HandlerBinding::Registered {
                handler_type_id: TypeId::of::<H>(),
                factory: Arc::new(|| Arc::new(H::default()) as Arc<dyn Any + Send + Sync>),
            },
            invoker,
        };
        self.entries.insert(TypeId::of::<P>(), Arc::new(entry));
        self
    }

    fn self_handled<P>(self, kind: MessageKind, invoker: Arc<dyn ErasedHandler>) -> Self
    where
        P: Send + 'static,
    {
        let entry = HandlerEntry {
            payload_type: type_name::<P>(),
            handler_type: type_name::<P>(),
            kind,
            binding: HandlerBinding::SelfHandled,
            invoker,
        };
        self.entries.insert(TypeId::of::<P>(), Arc::new(entry));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ServiceProvider;
    use std::convert::Infallible;

    struct CreateOrder;

    #[derive(Default)]
    struct CreateOrderHandler;

    impl Handler<CreateOrder> for CreateOrderHandler {
        type Error = Infallible;

        fn handle(
            &self,
            _payload: &mut CreateOrder,
            _services: &ServiceProvider,
        ) -> Result<(), Infallible> {
            Ok(())
        }
    }

    struct Ping;

    impl SelfHandling for Ping {
        type Error = Infallible;

        fn handle(&mut self, _services: &ServiceProvider) -> Result<(), Infallible> {
            Ok(())
        }
    }

    #[test]
    fn find_matches_exact_type_and_kind() {
        let registry = HandlerRegistry::builder()
            .command::<CreateOrder, CreateOrderHandler>()
            .build();

        let entry = registry
            .find(TypeId::of::<CreateOrder>(), MessageKind::Command)
            .expect("registered entry");
        assert!(entry.payload_type().contains("CreateOrder"));
        assert!(entry.handler_type().contains("CreateOrderHandler"));
        assert!(!entry.is_self_handled());

        // Same payload type looked up under another kind is a miss.
        assert!(
            registry
                .find(TypeId::of::<CreateOrder>(), MessageKind::Event)
                .is_none()
        );
        assert!(
            registry
                .find(TypeId::of::<Ping>(), MessageKind::Command)
                .is_none()
        );
    }

    #[test]
    fn self_handled_entries_name_the_payload_as_handler() {
        let registry = HandlerRegistry::builder()
            .self_handled_command::<Ping>()
            .build();

        let entry = registry
            .find(TypeId::of::<Ping>(), MessageKind::Command)
            .expect("registered entry");
        assert!(entry.is_self_handled());
        assert_eq!(entry.payload_type(), entry.handler_type());
    }

    #[test]
    fn modules_register_through_the_builder() {
        struct OrdersModule;

        impl HandlerModule for OrdersModule {
            fn register(&self, builder: HandlerRegistryBuilder) -> HandlerRegistryBuilder {
                builder.command::<CreateOrder, CreateOrderHandler>()
            }
        }

        let registry = HandlerRegistry::builder()
            .scan(&[&OrdersModule])
            .self_handled_command::<Ping>()
            .build();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(TypeId::of::<CreateOrder>()));
        assert!(registry.contains(TypeId::of::<Ping>()));
    }
}
