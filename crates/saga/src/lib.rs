//! Choreographed purchase saga.
//!
//! No coordinator drives the saga. Each service reacts to the events it
//! subscribes to and publishes its own:
//!
//! 1. The order service stores an order and publishes order-created.
//! 2. The product service reserves stock (stock-reserved) or rejects the
//!    order (stock-insufficient); the cart service holds the ordered items.
//! 3. The order service awaits payment and requests a payment URL.
//! 4. The payment service publishes payment-success or payment-failed.
//!    A failure releases the stock reservation and the cart hold.
//! 5. The delivery service opens a delivery for the paid order and announces
//!    its outcome through an outbox.

pub mod error;
pub mod events;
pub mod services;
pub mod subscription;

pub use error::{Result, SagaError};
pub use events::{
    DeliveryDelivered, DeliveryFailed, OrderCreated, PaymentFailed, PaymentSucceeded,
    StockInsufficient, StockReserved,
};
pub use services::{
    CartService, DeliveryOutboxRoute, DeliveryService, InMemoryPaymentProvider,
    OrderService, PaymentNotification, PaymentProvider, PaymentRequester, PaymentService,
    ProductService, ProviderError, ProviderTransaction, Settlement, SweepReport,
};
pub use subscription::{Reaction, Subscription};
