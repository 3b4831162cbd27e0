//! Synchronous dispatch behavior of the default pipeline chain.

use commutator_core::*;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

struct RegisterAccount {
    email: String,
    account_id: Option<u64>,
}

#[derive(Clone, Default)]
struct RegisterAccountHandler {
    invocations: Arc<AtomicU32>,
}

impl Provider for RegisterAccountHandler {}

impl Handler<RegisterAccount> for RegisterAccountHandler {
    type Error = Infallible;

    fn handle(
        &self,
        command: &mut RegisterAccount,
        _services: &ServiceProvider,
    ) -> Result<(), Infallible> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        command.account_id = Some(command.email.len() as u64);
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("account `{0}` is suspended")]
struct AccountSuspended(String);

#[derive(Default)]
struct SuspendedAccountHandler;

impl Handler<RegisterAccount> for SuspendedAccountHandler {
    type Error = AccountSuspended;

    fn handle(
        &self,
        command: &mut RegisterAccount,
        _services: &ServiceProvider,
    ) -> Result<(), AccountSuspended> {
        Err(AccountSuspended(command.email.clone()))
    }
}

struct AccountByEmail {
    email: String,
}

impl Query for AccountByEmail {
    type Output = u64;
}

#[derive(Default)]
struct AccountByEmailHandler;

impl QueryHandler<AccountByEmail> for AccountByEmailHandler {
    type Error = Infallible;

    fn handle(&self, query: &AccountByEmail, _services: &ServiceProvider) -> Result<u64, Infallible> {
        Ok(query.email.len() as u64)
    }
}

fn register_account(email: &str) -> RegisterAccount {
    RegisterAccount {
        email: email.to_string(),
        account_id: None,
    }
}

#[test]
fn unregistered_payload_is_rejected_and_never_executed() {
    let handler = RegisterAccountHandler::default();
    let services = ServiceProvider::new();
    services.register(handler.clone());

    // The registry knows nothing about RegisterAccount.
    let registry = HandlerRegistry::builder().build();
    let pipeline = MessagePipeline::for_commands(registry, services);

    let mut message = Message::command(register_account("alice@example.com"));
    let error = pipeline.dispatch(&mut message).unwrap_err();

    assert!(matches!(error, DispatchError::HandlerNotFound(_)));
    assert_eq!(message.status(), ProcessingStatus::Rejected);
    assert!(message.failure().is_none());
    assert!(message.execution_duration().is_none());
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn successful_dispatch_completes_without_failure() {
    let handler = RegisterAccountHandler::default();
    let services = ServiceProvider::new();
    services.register(handler.clone());

    let registry = HandlerRegistry::builder()
        .command::<RegisterAccount, RegisterAccountHandler>()
        .build();
    let pipeline = MessagePipeline::for_commands(registry, services);

    let mut message = Message::command(register_account("alice@example.com"));
    pipeline.dispatch(&mut message).unwrap();

    assert_eq!(message.status(), ProcessingStatus::Completed);
    assert!(message.failure().is_none());
    assert!(message.execution_duration().is_some());
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        message.content_ref::<RegisterAccount>().unwrap().account_id,
        Some("alice@example.com".len() as u64)
    );
}

#[test]
fn failing_handler_preserves_the_original_error_identity() {
    let registry = HandlerRegistry::builder()
        .command::<RegisterAccount, SuspendedAccountHandler>()
        .build();
    let pipeline = MessagePipeline::for_commands(registry, ServiceProvider::new());

    let mut message = Message::command(register_account("mallory@example.com"));
    let error = pipeline.dispatch(&mut message).unwrap_err();

    assert_eq!(message.status(), ProcessingStatus::Failed);
    let failure = message.failure().expect("failure recorded on the message");
    assert_eq!(failure.kind(), FailureKind::Handler);

    // The rethrown error is the handler's own error type, not a wrapper.
    let rethrown = error.failure().expect("driver re-raised the failure");
    assert_eq!(
        rethrown.downcast_ref::<AccountSuspended>(),
        Some(&AccountSuspended("mallory@example.com".to_string()))
    );

    // Re-raising again keeps the identity intact.
    let again = rethrown.reraise();
    assert!(again.failure().unwrap().is::<AccountSuspended>());
}

#[test]
fn rethrow_can_be_disabled_per_pipeline() {
    let registry = HandlerRegistry::builder()
        .command::<RegisterAccount, SuspendedAccountHandler>()
        .build();
    let pipeline = MessagePipeline::builder()
        .accept(MessageKind::Command)
        .rethrow_failures(false)
        .use_middleware(HandlerLocatorMiddleware::new(registry))
        .use_middleware(HandlerResolverMiddleware::new())
        .use_middleware(HandlerExecutorMiddleware::new())
        .build();

    let mut message = Message::command(register_account("mallory@example.com"));
    pipeline.dispatch(&mut message).unwrap();

    assert_eq!(message.status(), ProcessingStatus::Failed);
    assert!(message.failure().unwrap().is::<AccountSuspended>());
}

#[test]
fn rejected_messages_skip_the_executor_without_timing() {
    struct RejectEverything;

    #[async_trait::async_trait]
    impl Middleware for RejectEverything {
        fn id(&self) -> &str {
            "reject-everything"
        }

        fn handle(
            &self,
            message: &mut Message,
            _services: &ServiceProvider,
        ) -> Result<(), DispatchError> {
            message.set_status(ProcessingStatus::Rejected);
            Ok(())
        }
    }

    let handler = RegisterAccountHandler::default();
    let services = ServiceProvider::new();
    services.register(handler.clone());

    let registry = HandlerRegistry::builder()
        .command::<RegisterAccount, RegisterAccountHandler>()
        .build();
    let pipeline = MessagePipeline::builder()
        .accept(MessageKind::Command)
        .services(services)
        .use_middleware(HandlerLocatorMiddleware::new(registry))
        .use_middleware(RejectEverything)
        .use_middleware(HandlerResolverMiddleware::new())
        .use_middleware(HandlerExecutorMiddleware::new())
        .build();

    let mut message = Message::command(register_account("alice@example.com"));
    pipeline.dispatch(&mut message).unwrap();

    // Rejection is a normal terminal state, not a failure.
    assert_eq!(message.status(), ProcessingStatus::Rejected);
    assert!(message.failure().is_none());
    assert!(message.execution_duration().is_none());
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn queries_return_their_handler_result() {
    let registry = HandlerRegistry::builder()
        .query::<AccountByEmail, AccountByEmailHandler>()
        .build();
    let pipeline = MessagePipeline::for_queries(registry, ServiceProvider::new());

    let count = pipeline
        .execute_query(AccountByEmail {
            email: "bob@example.com".to_string(),
        })
        .unwrap();

    assert_eq!(count, "bob@example.com".len() as u64);
}

#[test]
fn concurrent_dispatches_share_no_message_state() {
    let handler = RegisterAccountHandler::default();
    let services = ServiceProvider::new();
    services.register(handler.clone());

    let registry = HandlerRegistry::builder()
        .command::<RegisterAccount, RegisterAccountHandler>()
        .build();
    let pipeline = MessagePipeline::for_commands(registry, services);

    std::thread::scope(|scope| {
        let mut workers = Vec::new();
        for index in 0..100u64 {
            let pipeline = &pipeline;
            workers.push(scope.spawn(move || {
                let email = format!("user-{index}@example.com");
                let mut message = Message::command(register_account(&email));
                pipeline.dispatch(&mut message).unwrap();

                assert_eq!(message.status(), ProcessingStatus::Completed);
                assert!(message.failure().is_none());
                assert_eq!(
                    message.content_ref::<RegisterAccount>().unwrap().account_id,
                    Some(email.len() as u64)
                );
                // Each envelope carries exactly its own middleware context.
                let mut keys: Vec<_> = message.item_keys().collect();
                keys.sort_unstable();
                assert_eq!(keys, vec![item_keys::HANDLER_INSTANCE]);
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
    });

    assert_eq!(handler.invocations.load(Ordering::SeqCst), 100);
}

#[test]
fn failure_report_summarizes_the_outcome() {
    let registry = HandlerRegistry::builder()
        .command::<RegisterAccount, SuspendedAccountHandler>()
        .build();
    let pipeline = MessagePipeline::builder()
        .accept(MessageKind::Command)
        .rethrow_failures(false)
        .use_middleware(HandlerLocatorMiddleware::new(registry))
        .use_middleware(HandlerResolverMiddleware::new())
        .use_middleware(HandlerExecutorMiddleware::new())
        .build();

    let mut message = Message::command(register_account("mallory@example.com"));
    pipeline.dispatch(&mut message).unwrap();

    let report = message.report();
    assert_eq!(report.status, ProcessingStatus::Failed);
    let failure = report.failure.clone().expect("failure summary present");
    assert_eq!(failure.kind, FailureKind::Handler);
    assert!(failure.message.contains("mallory@example.com"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["failure"]["kind"], "handler");
}
