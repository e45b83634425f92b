//! Stream names and consumer-group naming shared by every service.

/// Orders placed by the order service.
pub const ORDERS_CREATED: &str = "stream:orders:created";

/// Stock reserved for an order by the product service.
pub const STOCK_RESERVED: &str = "stream:stock:reserved";

/// Stock reservation rejected for an order by the product service.
pub const STOCK_INSUFFICIENT: &str = "stream:stock:insufficient";

/// Payment collected by the payment service.
pub const PAYMENT_SUCCESS: &str = "stream:payment:success";

/// Payment denied, cancelled or expired.
pub const PAYMENT_FAILED: &str = "stream:payment:failed";

/// Delivery handed to the customer.
pub const DELIVERY_DELIVERED: &str = "stream:delivery:delivered";

/// Delivery could not be completed.
pub const DELIVERY_FAILED: &str = "stream:delivery:failed";

/// Every stream participating in the purchase saga.
pub const ALL: [&str; 7] = [
    ORDERS_CREATED,
    STOCK_RESERVED,
    STOCK_INSUFFICIENT,
    PAYMENT_SUCCESS,
    PAYMENT_FAILED,
    DELIVERY_DELIVERED,
    DELIVERY_FAILED,
];

/// Returns the dead-letter sibling of a stream.
pub fn dlq_stream(stream: &str) -> String {
    format!("{stream}:dlq")
}

/// The six services of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceName {
    User,
    Product,
    Cart,
    Order,
    Payment,
    Delivery,
}

impl ServiceName {
    pub const ALL: [ServiceName; 6] = [
        ServiceName::User,
        ServiceName::Product,
        ServiceName::Cart,
        ServiceName::Order,
        ServiceName::Payment,
        ServiceName::Delivery,
    ];

    /// Returns the service name as used in group and consumer names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::User => "user",
            ServiceName::Product => "product",
            ServiceName::Cart => "cart",
            ServiceName::Order => "order",
            ServiceName::Payment => "payment",
            ServiceName::Delivery => "delivery",
        }
    }

    /// Consumer group shared by every worker of this service: `<service>-group`.
    pub fn group(&self) -> String {
        format!("{}-group", self.as_str())
    }

    /// The single fixed consumer identity of this service: `<service>-worker-1`.
    pub fn consumer(&self) -> String {
        format!("{}-worker-1", self.as_str())
    }

    /// Streams this service consumes.
    pub fn consumed_streams(&self) -> &'static [&'static str] {
        match self {
            ServiceName::User | ServiceName::Payment => &[],
            ServiceName::Product => &[ORDERS_CREATED, PAYMENT_FAILED],
            ServiceName::Cart => &[
                ORDERS_CREATED,
                STOCK_INSUFFICIENT,
                PAYMENT_SUCCESS,
                PAYMENT_FAILED,
            ],
            ServiceName::Order => &[
                STOCK_RESERVED,
                STOCK_INSUFFICIENT,
                PAYMENT_SUCCESS,
                PAYMENT_FAILED,
                DELIVERY_DELIVERED,
                DELIVERY_FAILED,
            ],
            ServiceName::Delivery => &[PAYMENT_SUCCESS],
        }
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ServiceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceName::ALL
            .into_iter()
            .find(|service| service.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown service: {s}"))
    }
}
