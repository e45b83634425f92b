//! Cart items and order holds.
//!
//! When an order is placed the cart service holds the ordered items. A
//! successful payment removes them from the cart; a failed payment or
//! rejected stock reservation releases the hold and leaves the cart as it
//! was. Either outcome may arrive before the order itself.

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: i64,
}

/// Storage of carts, owned by the cart service.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Adds an item, replacing any previous line for the same product.
    async fn put_item(&self, user_id: UserId, item: CartItem) -> Result<()>;

    async fn items(&self, user_id: UserId) -> Result<Vec<CartItem>>;

    /// Holds the user's cart lines for `products` on behalf of an order.
    ///
    /// Holding twice for the same order keeps the first hold. An order whose
    /// payment already settled holds nothing: a paid order's lines are
    /// removed from the cart instead. Returns the number of lines affected.
    async fn hold(&self, order_id: OrderId, user_id: UserId, products: &[ProductId])
    -> Result<usize>;

    /// Removes the held lines from the cart and drops the hold.
    ///
    /// Returns the number of lines removed. If the order holds nothing yet,
    /// the payment is remembered and applied by the later `hold`.
    async fn clear_held(&self, order_id: OrderId) -> Result<usize>;

    /// Drops the hold without touching the cart.
    ///
    /// Returns true if a hold existed. A later `hold` for the order is a
    /// no-op.
    async fn release_hold(&self, order_id: OrderId) -> Result<bool>;
}

#[async_trait]
impl<T: CartRepository + ?Sized> CartRepository for std::sync::Arc<T> {
    async fn put_item(&self, user_id: UserId, item: CartItem) -> Result<()> {
        (**self).put_item(user_id, item).await
    }

    async fn items(&self, user_id: UserId) -> Result<Vec<CartItem>> {
        (**self).items(user_id).await
    }

    async fn hold(
        &self,
        order_id: OrderId,
        user_id: UserId,
        products: &[ProductId],
    ) -> Result<usize> {
        (**self).hold(order_id, user_id, products).await
    }

    async fn clear_held(&self, order_id: OrderId) -> Result<usize> {
        (**self).clear_held(order_id).await
    }

    async fn release_hold(&self, order_id: OrderId) -> Result<bool> {
        (**self).release_hold(order_id).await
    }
}
