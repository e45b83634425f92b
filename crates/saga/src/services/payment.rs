//! Payment service: creates payments at the provider, settles them from
//! provider notifications and sweeps payments the customer never finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use choreography::Publisher;
use common::OrderId;
use domain::{Order, PaymentRepository, PaymentStatus};
use log_store::LogStore;
use thiserror::Error;
use tokio::sync::watch;

use crate::error::{Result, SagaError};
use crate::events::{PaymentFailed, PaymentSucceeded};
use crate::services::order::PaymentRequester;

/// Default interval between expired-payment sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Default age after which a pending payment is re-checked.
pub const DEFAULT_PAYMENT_EXPIRY: Duration = Duration::from_secs(120);

/// Errors returned by a payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider has no transaction for the order.
    #[error("transaction not found for order {0}")]
    NotFound(OrderId),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// A transaction as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTransaction {
    pub transaction_status: String,
    pub fraud_status: Option<String>,
}

impl ProviderTransaction {
    pub fn new(transaction_status: impl Into<String>) -> Self {
        Self {
            transaction_status: transaction_status.into(),
            fraud_status: None,
        }
    }

    pub fn with_fraud_status(mut self, fraud_status: impl Into<String>) -> Self {
        self.fraud_status = Some(fraud_status.into());
        self
    }
}

/// External payment gateway.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Opens a transaction and returns the URL the customer pays at.
    async fn create_transaction(
        &self,
        order_id: OrderId,
        amount: i64,
    ) -> std::result::Result<String, ProviderError>;

    /// Looks up the current state of an order's transaction.
    async fn transaction_status(
        &self,
        order_id: OrderId,
    ) -> std::result::Result<ProviderTransaction, ProviderError>;
}

#[async_trait]
impl<T: PaymentProvider + ?Sized> PaymentProvider for Arc<T> {
    async fn create_transaction(
        &self,
        order_id: OrderId,
        amount: i64,
    ) -> std::result::Result<String, ProviderError> {
        (**self).create_transaction(order_id, amount).await
    }

    async fn transaction_status(
        &self,
        order_id: OrderId,
    ) -> std::result::Result<ProviderTransaction, ProviderError> {
        (**self).transaction_status(order_id).await
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    transactions: HashMap<OrderId, ProviderTransaction>,
    unavailable: bool,
}

/// In-memory payment provider for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl InMemoryPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures every call to fail as if the provider were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Sets the state the provider reports for an order's transaction.
    pub fn set_transaction(&self, order_id: OrderId, transaction: ProviderTransaction) {
        self.state().transactions.insert(order_id, transaction);
    }

    /// Forgets an order's transaction.
    pub fn remove_transaction(&self, order_id: OrderId) {
        self.state().transactions.remove(&order_id);
    }

    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }
}

#[async_trait]
impl PaymentProvider for InMemoryPaymentProvider {
    async fn create_transaction(
        &self,
        order_id: OrderId,
        _amount: i64,
    ) -> std::result::Result<String, ProviderError> {
        let mut state = self.state();
        if state.unavailable {
            return Err(ProviderError::Unavailable("connection refused".to_string()));
        }
        state
            .transactions
            .entry(order_id)
            .or_insert_with(|| ProviderTransaction::new("pending"));
        Ok(format!("https://payments.local/checkout/{order_id}"))
    }

    async fn transaction_status(
        &self,
        order_id: OrderId,
    ) -> std::result::Result<ProviderTransaction, ProviderError> {
        let state = self.state();
        if state.unavailable {
            return Err(ProviderError::Unavailable("connection refused".to_string()));
        }
        state
            .transactions
            .get(&order_id)
            .cloned()
            .ok_or(ProviderError::NotFound(order_id))
    }
}

/// What a provider transaction state means for the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Paid,
    Failed,
    /// Captured but held for fraud review.
    Challenge,
    Pending,
}

impl Settlement {
    /// Maps a provider transaction state. Returns `None` for states this
    /// service does not act on.
    pub fn from_transaction(transaction: &ProviderTransaction) -> Option<Self> {
        match transaction.transaction_status.as_str() {
            "capture" => match transaction.fraud_status.as_deref() {
                Some("challenge") => Some(Settlement::Challenge),
                Some("deny") => Some(Settlement::Failed),
                _ => Some(Settlement::Paid),
            },
            "settlement" => Some(Settlement::Paid),
            "pending" => Some(Settlement::Pending),
            "deny" | "cancel" | "expire" => Some(Settlement::Failed),
            _ => None,
        }
    }
}

/// A transaction-state notification pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub order_id: OrderId,
    pub transaction: ProviderTransaction,
}

/// Tally of one expired-payment sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub paid: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
}

pub struct PaymentService<R, V, L> {
    payments: R,
    provider: V,
    publisher: Publisher<L>,
    expiry: Duration,
}

impl<R, V, L> PaymentService<R, V, L>
where
    R: PaymentRepository,
    V: PaymentProvider,
    L: LogStore,
{
    pub fn new(payments: R, provider: V, publisher: Publisher<L>) -> Self {
        Self {
            payments,
            provider,
            publisher,
            expiry: DEFAULT_PAYMENT_EXPIRY,
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn payments(&self) -> &R {
        &self.payments
    }

    /// Opens a provider transaction and stores the payment as PENDING.
    ///
    /// An order that already has a payment gets its existing URL back.
    #[tracing::instrument(skip(self))]
    pub async fn create_pending_payment(&self, order_id: OrderId, amount: i64) -> Result<String> {
        if let Some(existing) = self.payments.get_by_order(order_id).await? {
            return Ok(existing.payment_url);
        }

        let payment_url = self.provider.create_transaction(order_id, amount).await?;
        let payment = self
            .payments
            .insert_pending(order_id, amount, &payment_url)
            .await?;
        tracing::info!("pending payment created");
        Ok(payment.payment_url)
    }

    /// Applies a provider notification and returns the payment's new status.
    ///
    /// A payment that already succeeded or failed is left untouched.
    #[tracing::instrument(skip(self, notification), fields(order_id = %notification.order_id))]
    pub async fn handle_notification(
        &self,
        notification: &PaymentNotification,
    ) -> Result<PaymentStatus> {
        let order_id = notification.order_id;
        let payment = self
            .payments
            .get_by_order(order_id)
            .await?
            .ok_or(SagaError::PaymentNotFound(order_id))?;
        if payment.status.is_final() {
            tracing::info!(status = %payment.status, "payment already settled");
            return Ok(payment.status);
        }

        let settlement = Settlement::from_transaction(&notification.transaction).ok_or_else(|| {
            SagaError::UnknownTransactionStatus(notification.transaction.transaction_status.clone())
        })?;
        self.settle(order_id, settlement).await
    }

    async fn settle(&self, order_id: OrderId, settlement: Settlement) -> Result<PaymentStatus> {
        let status = match settlement {
            Settlement::Paid => {
                self.publisher.publish(&PaymentSucceeded::new(order_id)).await?;
                PaymentStatus::Success
            }
            Settlement::Failed => {
                self.publisher.publish(&PaymentFailed::new(order_id)).await?;
                PaymentStatus::Failed
            }
            Settlement::Challenge => PaymentStatus::Challenge,
            Settlement::Pending => PaymentStatus::Pending,
        };

        // Published before the update: a crash in between republishes on the
        // next notification, which consumers tolerate.
        self.payments.update_status(order_id, status).await?;
        tracing::info!(%order_id, %status, "payment status updated");
        Ok(status)
    }

    /// Re-checks pending payments older than the expiry with the provider.
    ///
    /// A payment unknown to the provider is failed. Provider errors on one
    /// payment are logged and do not stop the sweep.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let age = chrono::Duration::milliseconds(self.expiry.as_millis() as i64);
        let expired = self.payments.pending_older_than(age).await?;
        let mut report = SweepReport::default();

        for payment in expired {
            let order_id = payment.order_id;
            let settlement = match self.provider.transaction_status(order_id).await {
                Ok(transaction) => match Settlement::from_transaction(&transaction) {
                    Some(Settlement::Paid) => Settlement::Paid,
                    Some(Settlement::Failed) => Settlement::Failed,
                    _ => {
                        report.still_pending += 1;
                        continue;
                    }
                },
                Err(ProviderError::NotFound(_)) => Settlement::Failed,
                Err(err) => {
                    tracing::warn!(%order_id, error = %err, "could not check expired payment");
                    report.errors += 1;
                    continue;
                }
            };

            match self.settle(order_id, settlement).await {
                Ok(PaymentStatus::Success) => report.paid += 1,
                Ok(_) => report.failed += 1,
                Err(err) => {
                    tracing::warn!(%order_id, error = %err, "could not settle expired payment");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` turns true.
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(interval_secs = interval.as_secs(), "payment sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            match self.sweep_expired().await {
                Ok(report) => tracing::info!(?report, "expired payments swept"),
                Err(err) => tracing::error!(error = %err, "payment sweep failed"),
            }
        }
        tracing::info!("payment sweeper stopped");
    }
}

#[async_trait]
impl<R, V, L> PaymentRequester for PaymentService<R, V, L>
where
    R: PaymentRepository,
    V: PaymentProvider,
    L: LogStore,
{
    async fn request_payment(&self, order: &Order) -> Result<String> {
        self.create_pending_payment(order.id, order.total_amount)
            .await
    }
}

#[cfg(test)]
mod tests {
    use choreography::StreamEvent;
    use domain::InMemoryPaymentRepository;
    use log_store::InMemoryLogStore;

    use super::*;

    type TestService =
        PaymentService<InMemoryPaymentRepository, InMemoryPaymentProvider, InMemoryLogStore>;

    fn setup() -> (TestService, InMemoryPaymentProvider, InMemoryLogStore) {
        let log = InMemoryLogStore::new();
        let provider = InMemoryPaymentProvider::new();
        let service = PaymentService::new(
            InMemoryPaymentRepository::new(),
            provider.clone(),
            Publisher::new(log.clone()),
        );
        (service, provider, log)
    }

    fn notification(order_id: u64, transaction: ProviderTransaction) -> PaymentNotification {
        PaymentNotification {
            order_id: OrderId::new(order_id),
            transaction,
        }
    }

    #[test]
    fn test_settlement_mapping() {
        let cases = [
            (ProviderTransaction::new("capture"), Some(Settlement::Paid)),
            (
                ProviderTransaction::new("capture").with_fraud_status("accept"),
                Some(Settlement::Paid),
            ),
            (
                ProviderTransaction::new("capture").with_fraud_status("challenge"),
                Some(Settlement::Challenge),
            ),
            (
                ProviderTransaction::new("capture").with_fraud_status("deny"),
                Some(Settlement::Failed),
            ),
            (ProviderTransaction::new("settlement"), Some(Settlement::Paid)),
            (ProviderTransaction::new("pending"), Some(Settlement::Pending)),
            (ProviderTransaction::new("deny"), Some(Settlement::Failed)),
            (ProviderTransaction::new("cancel"), Some(Settlement::Failed)),
            (ProviderTransaction::new("expire"), Some(Settlement::Failed)),
            (ProviderTransaction::new("refund"), None),
        ];
        for (transaction, expected) in cases {
            assert_eq!(
                Settlement::from_transaction(&transaction),
                expected,
                "{transaction:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_create_pending_payment_is_idempotent() {
        let (service, provider, _log) = setup();
        let first = service
            .create_pending_payment(OrderId::new(42), 100_000)
            .await
            .unwrap();
        let second = service
            .create_pending_payment(OrderId::new(42), 100_000)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.transaction_count(), 1);

        let payment = service
            .payments()
            .get_by_order(OrderId::new(42))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_provider_outage_stores_nothing() {
        let (service, provider, _log) = setup();
        provider.set_unavailable(true);
        let err = service
            .create_pending_payment(OrderId::new(42), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Provider(ProviderError::Unavailable(_))));
        assert!(
            service
                .payments()
                .get_by_order(OrderId::new(42))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_settlement_notification_publishes_success() {
        let (service, _provider, log) = setup();
        service
            .create_pending_payment(OrderId::new(42), 100)
            .await
            .unwrap();

        let status = service
            .handle_notification(&notification(42, ProviderTransaction::new("settlement")))
            .await
            .unwrap();
        assert_eq!(status, PaymentStatus::Success);
        let published = log.entries(PaymentSucceeded::STREAM).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].field("order_id"), Some("42"));

        // A late expiry notice does not flip a settled payment.
        let status = service
            .handle_notification(&notification(42, ProviderTransaction::new("expire")))
            .await
            .unwrap();
        assert_eq!(status, PaymentStatus::Success);
        assert!(log.entries(PaymentFailed::STREAM).await.is_empty());
    }

    #[tokio::test]
    async fn test_challenge_waits_without_publishing() {
        let (service, _provider, log) = setup();
        service
            .create_pending_payment(OrderId::new(42), 100)
            .await
            .unwrap();

        let status = service
            .handle_notification(&notification(
                42,
                ProviderTransaction::new("capture").with_fraud_status("challenge"),
            ))
            .await
            .unwrap();
        assert_eq!(status, PaymentStatus::Challenge);
        assert!(log.stream_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_notification_errors() {
        let (service, _provider, _log) = setup();
        let err = service
            .handle_notification(&notification(7, ProviderTransaction::new("settlement")))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::PaymentNotFound(_)));

        service
            .create_pending_payment(OrderId::new(7), 100)
            .await
            .unwrap();
        let err = service
            .handle_notification(&notification(7, ProviderTransaction::new("refund")))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::UnknownTransactionStatus(_)));
    }

    #[tokio::test]
    async fn test_sweep_settles_expired_payments() {
        let (service, provider, log) = setup();
        for order in 1..=5 {
            service
                .create_pending_payment(OrderId::new(order), 100)
                .await
                .unwrap();
            service
                .payments()
                .backdate(OrderId::new(order), chrono::Duration::minutes(5))
                .await;
        }
        provider.set_transaction(OrderId::new(1), ProviderTransaction::new("settlement"));
        provider.set_transaction(OrderId::new(2), ProviderTransaction::new("expire"));
        provider.remove_transaction(OrderId::new(3));
        // Order 4 stays pending at the provider.
        provider.set_transaction(OrderId::new(5), ProviderTransaction::new("capture"));

        let report = service.sweep_expired().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                paid: 2,
                failed: 2,
                still_pending: 1,
                errors: 0,
            }
        );
        assert_eq!(log.entries(PaymentSucceeded::STREAM).await.len(), 2);
        assert_eq!(log.entries(PaymentFailed::STREAM).await.len(), 2);

        for (order, expected) in [(3, PaymentStatus::Failed), (4, PaymentStatus::Pending)] {
            let payment = service
                .payments()
                .get_by_order(OrderId::new(order))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(payment.status, expected);
        }
    }

    #[tokio::test]
    async fn test_sweep_ignores_recent_payments_and_survives_outages() {
        let (service, provider, _log) = setup();
        service
            .create_pending_payment(OrderId::new(1), 100)
            .await
            .unwrap();
        assert_eq!(service.sweep_expired().await.unwrap(), SweepReport::default());

        service
            .payments()
            .backdate(OrderId::new(1), chrono::Duration::minutes(5))
            .await;
        provider.set_unavailable(true);
        let report = service.sweep_expired().await.unwrap();
        assert_eq!(report.errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let (service, _provider, _log) = setup();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::new(service).run_sweeper(Duration::from_secs(60), rx));

        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
