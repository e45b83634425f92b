//! In-memory repositories for tests and single-process runs.
//!
//! Each repository holds its state behind one lock, so every operation is
//! atomic the way a single database transaction would be.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use choreography::{OutboxError, OutboxMessage, OutboxStore};
use common::{DeliveryId, OrderId, ProductId, UserId};
use tokio::sync::RwLock;

use crate::cart::{CartItem, CartRepository};
use crate::delivery::{self, Delivery, DeliveryRepository, DeliveryStatus};
use crate::error::{DomainError, Result};
use crate::order::{NewOrder, Order, OrderRepository, OrderStatus, Transition};
use crate::payment::{Payment, PaymentRepository, PaymentStatus};
use crate::product::{Product, ProductRepository, ReservationOutcome, StockDeltas, StockLine};

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OrderState {
    orders: BTreeMap<OrderId, Order>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<OrderState>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status of an order, if it exists.
    pub async fn status(&self, id: OrderId) -> Option<OrderStatus> {
        self.state.read().await.orders.get(&id).map(|o| o.status)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<Order> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = OrderId::new(state.next_id);
        let total_amount = order.total_amount();
        let stored = Order {
            id,
            user_id: order.user_id,
            total_amount,
            status: OrderStatus::Received,
            items: order.items,
            created_at: Utc::now(),
        };
        state.orders.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn advance(&self, id: OrderId, target: OrderStatus) -> Result<Transition> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("order", id))?;

        let transition = order.status.transition_to(target);
        if let Transition::Applied { .. } = transition {
            order.status = target;
        }
        Ok(transition)
    }
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Reservation {
    lines: Vec<StockLine>,
    released: bool,
}

#[derive(Default)]
struct ProductState {
    products: BTreeMap<ProductId, Product>,
    reservations: HashMap<OrderId, Reservation>,
    next_id: u64,
}

impl ProductState {
    /// Applies all deltas or none.
    fn apply(&mut self, deltas: &StockDeltas) -> Result<()> {
        for (product_id, delta) in deltas.iter() {
            let fits = self
                .products
                .get(&product_id)
                .is_some_and(|p| p.stock + delta >= 0);
            if !fits {
                return Err(DomainError::InsufficientStock {
                    product_id: product_id.get(),
                });
            }
        }
        for (product_id, delta) in deltas.iter() {
            if let Some(product) = self.products.get_mut(&product_id) {
                product.stock += delta;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProductRepository {
    state: Arc<RwLock<ProductState>>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stock of a product, if it exists.
    pub async fn stock(&self, id: ProductId) -> Option<i64> {
        self.state.read().await.products.get(&id).map(|p| p.stock)
    }

    /// Returns true if the order holds a live reservation.
    pub async fn has_reservation(&self, order_id: OrderId) -> bool {
        self.state
            .read()
            .await
            .reservations
            .get(&order_id)
            .is_some_and(|r| !r.released)
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn insert(&self, name: &str, price: i64, stock: i64) -> Result<Product> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let product = Product {
            id: ProductId::new(state.next_id),
            name: name.to_string(),
            price,
            stock,
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn apply_stock_deltas(&self, deltas: &StockDeltas) -> Result<()> {
        self.state.write().await.apply(deltas)
    }

    async fn reserve(&self, order_id: OrderId, lines: &[StockLine]) -> Result<ReservationOutcome> {
        let mut state = self.state.write().await;
        if state.reservations.contains_key(&order_id) {
            return Ok(ReservationOutcome::AlreadyReserved);
        }

        match state.apply(&StockDeltas::deduct(lines)) {
            Ok(()) => {}
            Err(DomainError::InsufficientStock { product_id }) => {
                return Ok(ReservationOutcome::Insufficient {
                    product_id: ProductId::new(product_id),
                });
            }
            Err(err) => return Err(err),
        }

        state.reservations.insert(
            order_id,
            Reservation {
                lines: lines.to_vec(),
                released: false,
            },
        );
        Ok(ReservationOutcome::Reserved)
    }

    async fn release(&self, order_id: OrderId) -> Result<bool> {
        let mut state = self.state.write().await;
        let lines = match state.reservations.get(&order_id) {
            Some(reservation) if !reservation.released => reservation.lines.clone(),
            _ => return Ok(false),
        };

        state.apply(&StockDeltas::restock(&lines))?;
        if let Some(reservation) = state.reservations.get_mut(&order_id) {
            reservation.released = true;
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemoryPaymentRepository {
    payments: Arc<RwLock<HashMap<OrderId, Payment>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a payment's creation time back by `age`.
    pub async fn backdate(&self, order_id: OrderId, age: Duration) {
        if let Some(payment) = self.payments.write().await.get_mut(&order_id) {
            payment.created_at -= age;
        }
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert_pending(
        &self,
        order_id: OrderId,
        amount: i64,
        payment_url: &str,
    ) -> Result<Payment> {
        let mut payments = self.payments.write().await;
        let now = Utc::now();
        let payment = payments.entry(order_id).or_insert_with(|| Payment {
            order_id,
            amount,
            payment_url: payment_url.to_string(),
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        });
        Ok(payment.clone())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.payments.read().await.get(&order_id).cloned())
    }

    async fn update_status(&self, order_id: OrderId, status: PaymentStatus) -> Result<()> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&order_id)
            .ok_or_else(|| DomainError::not_found("payment", order_id))?;
        payment.status = status;
        payment.updated_at = Utc::now();
        Ok(())
    }

    async fn pending_older_than(&self, age: Duration) -> Result<Vec<Payment>> {
        let cutoff = Utc::now() - age;
        let mut expired: Vec<Payment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < cutoff)
            .cloned()
            .collect();
        expired.sort_by_key(|p| p.created_at);
        Ok(expired)
    }
}

// ---------------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DeliveryState {
    deliveries: BTreeMap<DeliveryId, Delivery>,
    outbox: Vec<OutboxMessage>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryDeliveryRepository {
    state: Arc<RwLock<DeliveryState>>,
}

impl InMemoryDeliveryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every outbox row, published or not.
    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn create_for_order(&self, order_id: OrderId) -> Result<(Delivery, bool)> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.deliveries.values().find(|d| d.order_id == order_id) {
            return Ok((*existing, false));
        }

        state.next_id += 1;
        let delivery = Delivery {
            id: DeliveryId::new(state.next_id),
            order_id,
            status: DeliveryStatus::Received,
        };
        state.deliveries.insert(delivery.id, delivery);
        Ok((delivery, true))
    }

    async fn get(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        Ok(self.state.read().await.deliveries.get(&id).copied())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Delivery>> {
        Ok(self
            .state
            .read()
            .await
            .deliveries
            .values()
            .find(|d| d.order_id == order_id)
            .copied())
    }

    async fn update_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<Delivery> {
        let mut state = self.state.write().await;
        let delivery = {
            let delivery = state
                .deliveries
                .get_mut(&id)
                .ok_or_else(|| DomainError::not_found("delivery", id))?;
            delivery.status = status;
            *delivery
        };

        if status.is_announced() {
            let outbox_id = state.outbox.len() as i64 + 1;
            state
                .outbox
                .push(delivery::outbox_message(outbox_id, &delivery));
        }
        Ok(delivery)
    }
}

#[async_trait]
impl OutboxStore for InMemoryDeliveryRepository {
    async fn unpublished(&self) -> std::result::Result<Vec<OutboxMessage>, OutboxError> {
        Ok(self
            .state
            .read()
            .await
            .outbox
            .iter()
            .filter(|m| !m.published)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: i64) -> std::result::Result<(), OutboxError> {
        let mut state = self.state.write().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| DomainError::not_found("outbox message", id))?;
        message.published = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Carts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Hold {
    user_id: UserId,
    products: Vec<ProductId>,
}

/// How an order's payment outcome reached the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    /// Held lines were removed from the cart.
    Paid,
    /// Payment arrived before the order; its lines are removed once held.
    PaidBeforeHold,
    /// The order will not be paid; nothing is held for it.
    Released,
}

#[derive(Default)]
struct CartState {
    carts: HashMap<UserId, BTreeMap<ProductId, CartItem>>,
    holds: HashMap<OrderId, Hold>,
    settled: HashMap<OrderId, Settled>,
}

impl CartState {
    fn remove_lines(&mut self, user_id: UserId, products: &[ProductId]) -> usize {
        let Some(cart) = self.carts.get_mut(&user_id) else {
            return 0;
        };
        products
            .iter()
            .filter(|p| cart.remove(p).is_some())
            .count()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCartRepository {
    state: Arc<RwLock<CartState>>,
}

impl InMemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the order holds cart lines.
    pub async fn is_held(&self, order_id: OrderId) -> bool {
        self.state.read().await.holds.contains_key(&order_id)
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn put_item(&self, user_id: UserId, item: CartItem) -> Result<()> {
        self.state
            .write()
            .await
            .carts
            .entry(user_id)
            .or_default()
            .insert(item.product_id, item);
        Ok(())
    }

    async fn items(&self, user_id: UserId) -> Result<Vec<CartItem>> {
        Ok(self
            .state
            .read()
            .await
            .carts
            .get(&user_id)
            .map(|cart| cart.values().copied().collect())
            .unwrap_or_default())
    }

    async fn hold(
        &self,
        order_id: OrderId,
        user_id: UserId,
        products: &[ProductId],
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.holds.get(&order_id) {
            return Ok(existing.products.len());
        }
        match state.settled.get(&order_id).copied() {
            Some(Settled::PaidBeforeHold) => {
                state.settled.insert(order_id, Settled::Paid);
                return Ok(state.remove_lines(user_id, products));
            }
            Some(Settled::Paid | Settled::Released) => return Ok(0),
            None => {}
        }

        let held: Vec<ProductId> = match state.carts.get(&user_id) {
            Some(cart) => products
                .iter()
                .copied()
                .filter(|p| cart.contains_key(p))
                .collect(),
            None => Vec::new(),
        };
        let count = held.len();
        state.holds.insert(
            order_id,
            Hold {
                user_id,
                products: held,
            },
        );
        Ok(count)
    }

    async fn clear_held(&self, order_id: OrderId) -> Result<usize> {
        let mut state = self.state.write().await;
        let Some(hold) = state.holds.remove(&order_id) else {
            state.settled.entry(order_id).or_insert(Settled::PaidBeforeHold);
            return Ok(0);
        };
        state.settled.insert(order_id, Settled::Paid);
        Ok(state.remove_lines(hold.user_id, &hold.products))
    }

    async fn release_hold(&self, order_id: OrderId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.settled.entry(order_id).or_insert(Settled::Released);
        Ok(state.holds.remove(&order_id).is_some())
    }
}
