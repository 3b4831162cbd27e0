//! Asynchronous dispatch, cancellation, and concurrency behavior.

use async_trait::async_trait;
use commutator_core::*;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use thiserror::Error;

#[derive(Debug)]
struct SendInvoice {
    amount_cents: u64,
    dispatched: bool,
}

#[derive(Clone, Default)]
struct SendInvoiceHandler {
    invocations: Arc<AtomicU32>,
    touched: Arc<AtomicBool>,
}

impl Provider for SendInvoiceHandler {}

#[async_trait]
impl AsyncHandler<SendInvoice> for SendInvoiceHandler {
    type Error = Infallible;

    async fn handle(
        &self,
        command: &mut SendInvoice,
        _services: &ServiceProvider,
    ) -> Result<(), Infallible> {
        tokio::task::yield_now().await;
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.touched.store(true, Ordering::SeqCst);
        command.dispatched = true;
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("payment gateway refused {0} cents")]
struct GatewayRefusal(u64);

#[derive(Default)]
struct RefusingGatewayHandler;

#[async_trait]
impl AsyncHandler<SendInvoice> for RefusingGatewayHandler {
    type Error = GatewayRefusal;

    async fn handle(
        &self,
        command: &mut SendInvoice,
        _services: &ServiceProvider,
    ) -> Result<(), GatewayRefusal> {
        Err(GatewayRefusal(command.amount_cents))
    }
}

struct OutstandingBalance;

impl Query for OutstandingBalance {
    type Output = u64;
}

#[derive(Default)]
struct OutstandingBalanceHandler;

#[async_trait]
impl AsyncQueryHandler<OutstandingBalance> for OutstandingBalanceHandler {
    type Error = Infallible;

    async fn handle(
        &self,
        _query: &OutstandingBalance,
        _services: &ServiceProvider,
    ) -> Result<u64, Infallible> {
        tokio::task::yield_now().await;
        Ok(1250)
    }
}

fn send_invoice(amount_cents: u64) -> SendInvoice {
    SendInvoice {
        amount_cents,
        dispatched: false,
    }
}

fn invoice_pipeline(services: ServiceProvider) -> MessagePipeline {
    let registry = HandlerRegistry::builder()
        .command_async::<SendInvoice, SendInvoiceHandler>()
        .build();
    MessagePipeline::for_commands(registry, services)
}

#[tokio::test]
async fn async_handler_completes_the_message() {
    let handler = SendInvoiceHandler::default();
    let services = ServiceProvider::new();
    services.register(handler.clone());
    let pipeline = invoice_pipeline(services);

    let cancel = CancellationToken::new();
    let invoice = pipeline
        .handle_command_async(send_invoice(900), &cancel)
        .await
        .unwrap();

    assert!(invoice.dispatched);
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_before_invocation_never_calls_the_handler() {
    let handler = SendInvoiceHandler::default();
    let services = ServiceProvider::new();
    services.register(handler.clone());
    let pipeline = invoice_pipeline(services);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut message = Message::command(send_invoice(900));
    let error = pipeline.dispatch_async(&mut message, &cancel).await.unwrap_err();

    assert!(error.is_cancellation());
    assert_eq!(message.status(), ProcessingStatus::Failed);
    assert_eq!(message.failure().unwrap().kind(), FailureKind::Cancelled);
    assert!(message.execution_duration().is_none());
    assert!(!handler.touched.load(Ordering::SeqCst));
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn async_failure_preserves_identity_across_the_await_boundary() {
    let registry = HandlerRegistry::builder()
        .command_async::<SendInvoice, RefusingGatewayHandler>()
        .build();
    let pipeline = MessagePipeline::for_commands(registry, ServiceProvider::new());

    let cancel = CancellationToken::new();
    let error = pipeline
        .handle_command_async(send_invoice(4200), &cancel)
        .await
        .unwrap_err();

    assert!(!error.is_cancellation());
    let failure = error.failure().expect("handler failure re-raised");
    assert_eq!(failure.downcast_ref::<GatewayRefusal>(), Some(&GatewayRefusal(4200)));
}

#[test]
fn async_only_handler_is_a_configuration_fault_on_the_sync_path() {
    let registry = HandlerRegistry::builder()
        .command_async::<SendInvoice, SendInvoiceHandler>()
        .build();
    let pipeline = MessagePipeline::for_commands(registry, ServiceProvider::new());

    let mut message = Message::command(send_invoice(100));
    let error = pipeline.dispatch(&mut message).unwrap_err();

    assert!(matches!(error, DispatchError::InvalidPipelineState(_)));
    assert!(message.failure().is_none());
}

#[tokio::test]
async fn async_queries_return_their_handler_result() {
    let registry = HandlerRegistry::builder()
        .query_async::<OutstandingBalance, OutstandingBalanceHandler>()
        .build();
    let pipeline = MessagePipeline::for_queries(registry, ServiceProvider::new());

    let cancel = CancellationToken::new();
    let balance = pipeline
        .execute_query_async(OutstandingBalance, &cancel)
        .await
        .unwrap();

    assert_eq!(balance, 1250);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_async_dispatches_keep_independent_outcomes() {
    let handler = SendInvoiceHandler::default();
    let services = ServiceProvider::new();
    services.register(handler.clone());
    let pipeline = Arc::new(invoice_pipeline(services));

    let mut tasks = Vec::new();
    for index in 0..100u64 {
        let pipeline = pipeline.clone();
        tasks.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let mut message = Message::command(send_invoice(index));
            pipeline.dispatch_async(&mut message, &cancel).await.unwrap();

            assert_eq!(message.status(), ProcessingStatus::Completed);
            assert!(message.failure().is_none());
            assert!(message.content_ref::<SendInvoice>().unwrap().dispatched);
            let mut keys: Vec<_> = message.item_keys().collect();
            keys.sort_unstable();
            assert_eq!(keys, vec![item_keys::HANDLER_INSTANCE]);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(handler.invocations.load(Ordering::SeqCst), 100);
}

#[tokio::test]
async fn blocking_handlers_run_inline_on_the_async_path() {
    #[derive(Clone, Default)]
    struct BlockingHandler {
        invocations: Arc<AtomicU32>,
    }

    impl Provider for BlockingHandler {}

    impl Handler<SendInvoice> for BlockingHandler {
        type Error = Infallible;

        fn handle(
            &self,
            command: &mut SendInvoice,
            _services: &ServiceProvider,
        ) -> Result<(), Infallible> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            command.dispatched = true;
            Ok(())
        }
    }

    let handler = BlockingHandler::default();
    let services = ServiceProvider::new();
    services.register(handler.clone());

    let registry = HandlerRegistry::builder()
        .command::<SendInvoice, BlockingHandler>()
        .build();
    let pipeline = MessagePipeline::for_commands(registry, services);

    let cancel = CancellationToken::new();
    let invoice = pipeline
        .handle_command_async(send_invoice(7), &cancel)
        .await
        .unwrap();

    assert!(invoice.dispatched);
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
}
