//! `rateforge-orders` — orders with frozen quoted prices.
//!
//! A line records the unit price *and the rate snapshot that produced it* at
//! the moment it is added. Later rate movements or profile edits never
//! reprice a placed order; repricing means opening a new order.

pub mod order;

pub use order::{
    AddQuotedLine, CloseOrder, OpenOrder, OrderClosed, OrderLine, OrderOpened, OrderPriced,
    PriceOrder, PricingOrder, PricingOrderCommand, PricingOrderEvent, PricingOrderId,
    PricingOrderStatus, QuotedLineAdded, RateSnapshot,
};
