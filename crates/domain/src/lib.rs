//! Domain layer of the commerce services.
//!
//! Each service owns one aggregate and its repository:
//! - [`order`]: order lifecycle driven by saga events
//! - [`product`]: stock levels and per-order reservations
//! - [`payment`]: payment records and provider transaction states
//! - [`delivery`]: deliveries and their transactional outbox
//! - [`cart`]: cart items held while an order is being paid
//!
//! Repositories come in two flavours: [`memory`] for tests and single-process
//! runs, and [`postgres`] backed by sqlx.

pub mod cart;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod order;
pub mod payment;
pub mod postgres;
pub mod product;

pub use cart::{CartItem, CartRepository};
pub use delivery::{Delivery, DeliveryRepository, DeliveryStatus};
pub use error::{DomainError, Result};
pub use memory::{
    InMemoryCartRepository, InMemoryDeliveryRepository, InMemoryOrderRepository,
    InMemoryPaymentRepository, InMemoryProductRepository,
};
pub use order::{NewOrder, Order, OrderItem, OrderRepository, OrderStatus, Transition};
pub use payment::{Payment, PaymentRepository, PaymentStatus};
pub use postgres::{
    PostgresDeliveryRepository, PostgresOrderRepository, PostgresPaymentRepository,
    PostgresProductRepository, run_migrations,
};
pub use product::{Product, ProductRepository, ReservationOutcome, StockDeltas, StockLine};
