//! Events exchanged by the services, one type per stream.
//!
//! Every field travels as a string. Identifiers are decimal, amounts are
//! integer minor units, timestamps are RFC 3339 and order items are a JSON
//! array of `{product_id, quantity}` objects.

use chrono::{DateTime, SecondsFormat, Utc};
use choreography::{DecodeError, FieldReader, StreamEvent};
use common::{DeliveryId, OrderId, UserId, streams};
use domain::{Order, StockLine};
use log_store::Fields;

fn fields<const N: usize>(pairs: [(&str, String); N]) -> Fields {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// An order was placed. Published by the order service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_amount: i64,
    pub items: Vec<StockLine>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderCreated {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            items: order
                .items
                .iter()
                .map(|item| StockLine::new(item.product_id, item.quantity))
                .collect(),
            created_at: Some(order.created_at),
        }
    }
}

impl StreamEvent for OrderCreated {
    const STREAM: &'static str = streams::ORDERS_CREATED;

    fn to_fields(&self) -> Fields {
        let items = encode_items(&self.items);
        let mut fields = fields([
            ("order_id", self.order_id.to_string()),
            ("user_id", self.user_id.to_string()),
            ("total_amount", self.total_amount.to_string()),
            ("items", items),
        ]);
        if let Some(created_at) = self.created_at {
            fields.insert(
                "created_at".to_string(),
                created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            );
        }
        fields
    }

    fn from_fields(fields: &Fields) -> Result<Self, DecodeError> {
        let reader = FieldReader::new(fields);
        let items = serde_json::from_str(reader.str("items")?).map_err(|err| {
            DecodeError::InvalidField {
                field: "items",
                reason: err.to_string(),
            }
        })?;
        let created_at = reader
            .optional_str("created_at")
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|err| DecodeError::InvalidField {
                        field: "created_at",
                        reason: err.to_string(),
                    })
            })
            .transpose()?;

        Ok(Self {
            order_id: reader.parse("order_id")?,
            user_id: reader.parse("user_id")?,
            total_amount: reader.parse("total_amount")?,
            items,
            created_at,
        })
    }
}

/// Encodes order lines as a JSON array of `{product_id, quantity}` objects.
fn encode_items(items: &[StockLine]) -> String {
    let lines = items
        .iter()
        .map(|line| {
            let mut object = serde_json::Map::new();
            object.insert("product_id".to_string(), line.product_id.get().into());
            object.insert("quantity".to_string(), line.quantity.into());
            serde_json::Value::Object(object)
        })
        .collect();
    serde_json::Value::Array(lines).to_string()
}

/// Declares an event that carries only the order it concerns.
macro_rules! order_event {
    ($(#[$meta:meta])* $name:ident, $stream:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub order_id: OrderId,
        }

        impl $name {
            pub fn new(order_id: OrderId) -> Self {
                Self { order_id }
            }
        }

        impl StreamEvent for $name {
            const STREAM: &'static str = $stream;

            fn to_fields(&self) -> Fields {
                fields([("order_id", self.order_id.to_string())])
            }

            fn from_fields(fields: &Fields) -> Result<Self, DecodeError> {
                Ok(Self {
                    order_id: FieldReader::new(fields).parse("order_id")?,
                })
            }
        }
    };
}

order_event!(
    /// Stock for every item of the order was reserved.
    StockReserved,
    streams::STOCK_RESERVED
);

order_event!(
    /// The order could not be served from stock; nothing was reserved.
    StockInsufficient,
    streams::STOCK_INSUFFICIENT
);

order_event!(
    /// The order was paid.
    PaymentSucceeded,
    streams::PAYMENT_SUCCESS
);

order_event!(
    /// The order's payment was denied, cancelled or expired.
    PaymentFailed,
    streams::PAYMENT_FAILED
);

/// Declares an event about a delivery of an order.
macro_rules! delivery_event {
    ($(#[$meta:meta])* $name:ident, $stream:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub delivery_id: DeliveryId,
            pub order_id: OrderId,
        }

        impl StreamEvent for $name {
            const STREAM: &'static str = $stream;

            fn to_fields(&self) -> Fields {
                fields([
                    ("delivery_id", self.delivery_id.to_string()),
                    ("order_id", self.order_id.to_string()),
                ])
            }

            fn from_fields(fields: &Fields) -> Result<Self, DecodeError> {
                let reader = FieldReader::new(fields);
                Ok(Self {
                    delivery_id: reader.parse("delivery_id")?,
                    order_id: reader.parse("order_id")?,
                })
            }
        }
    };
}

delivery_event!(
    /// The order was handed to the customer.
    DeliveryDelivered,
    streams::DELIVERY_DELIVERED
);

delivery_event!(
    /// The delivery could not be completed.
    DeliveryFailed,
    streams::DELIVERY_FAILED
);
