//! Saga participants, one per service.

pub mod cart;
pub mod delivery;
pub mod order;
pub mod payment;
pub mod product;

pub use cart::CartService;
pub use delivery::{DeliveryOutboxRoute, DeliveryService};
pub use order::{OrderService, PaymentRequester};
pub use payment::{
    InMemoryPaymentProvider, PaymentNotification, PaymentProvider, PaymentService,
    ProviderError, ProviderTransaction, Settlement, SweepReport,
};
pub use product::ProductService;
