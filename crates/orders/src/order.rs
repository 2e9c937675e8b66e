use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rateforge_catalog::{PriceSource, ProductId};
use rateforge_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, ValueObject};
use rateforge_events::Event;

/// Order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingOrderId(pub AggregateId);

impl PricingOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PricingOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingOrderStatus {
    Draft,
    Priced,
    Closed,
}

/// The rate context captured when a line was quoted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub source: PriceSource,
    pub rate: f64,
    pub quoted_at: DateTime<Utc>,
}

impl ValueObject for RateSnapshot {}

/// Order line: product, quantity, and the frozen unit price + rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: f64,
    pub rate_snapshot: RateSnapshot,
}

impl OrderLine {
    pub fn line_total(&self) -> f64 {
        self.quantity as f64 * self.unit_price
    }
}

/// Aggregate root: PricingOrder.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingOrder {
    id: PricingOrderId,
    tenant_id: Option<TenantId>,
    status: PricingOrderStatus,
    lines: Vec<OrderLine>,
    version: u64,
    created: bool,
}

impl PricingOrder {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: PricingOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            status: PricingOrderStatus::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PricingOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn status(&self) -> PricingOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, PricingOrderStatus::Draft)
    }

    pub fn total(&self) -> f64 {
        self.lines.iter().map(OrderLine::line_total).sum()
    }
}

impl AggregateRoot for PricingOrder {
    type Id = PricingOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenOrder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub tenant_id: TenantId,
    pub order_id: PricingOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddQuotedLine.
///
/// `unit_price` and `rate_snapshot` come from the quote pipeline; the
/// aggregate only freezes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddQuotedLine {
    pub tenant_id: TenantId,
    pub order_id: PricingOrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: f64,
    pub rate_snapshot: RateSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PriceOrder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceOrder {
    pub tenant_id: TenantId,
    pub order_id: PricingOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseOrder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseOrder {
    pub tenant_id: TenantId,
    pub order_id: PricingOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PricingOrderCommand {
    OpenOrder(OpenOrder),
    AddQuotedLine(AddQuotedLine),
    PriceOrder(PriceOrder),
    CloseOrder(CloseOrder),
}

/// Event: OrderOpened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOpened {
    pub tenant_id: TenantId,
    pub order_id: PricingOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotedLineAdded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotedLineAdded {
    pub tenant_id: TenantId,
    pub order_id: PricingOrderId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: f64,
    pub rate_snapshot: RateSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderPriced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPriced {
    pub tenant_id: TenantId,
    pub order_id: PricingOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderClosed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderClosed {
    pub tenant_id: TenantId,
    pub order_id: PricingOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PricingOrderEvent {
    OrderOpened(OrderOpened),
    QuotedLineAdded(QuotedLineAdded),
    OrderPriced(OrderPriced),
    OrderClosed(OrderClosed),
}

impl Event for PricingOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PricingOrderEvent::OrderOpened(_) => "orders.order.opened",
            PricingOrderEvent::QuotedLineAdded(_) => "orders.order.line_added",
            PricingOrderEvent::OrderPriced(_) => "orders.order.priced",
            PricingOrderEvent::OrderClosed(_) => "orders.order.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PricingOrderEvent::OrderOpened(e) => e.occurred_at,
            PricingOrderEvent::QuotedLineAdded(e) => e.occurred_at,
            PricingOrderEvent::OrderPriced(e) => e.occurred_at,
            PricingOrderEvent::OrderClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PricingOrder {
    type Command = PricingOrderCommand;
    type Event = PricingOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PricingOrderEvent::OrderOpened(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.status = PricingOrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            PricingOrderEvent::QuotedLineAdded(e) => {
                self.lines.push(OrderLine {
                    line_no: e.line_no,
                    product_id: e.product_id,
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                    rate_snapshot: e.rate_snapshot,
                });
            }
            PricingOrderEvent::OrderPriced(_) => {
                self.status = PricingOrderStatus::Priced;
            }
            PricingOrderEvent::OrderClosed(_) => {
                self.status = PricingOrderStatus::Closed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PricingOrderCommand::OpenOrder(cmd) => self.handle_open(cmd),
            PricingOrderCommand::AddQuotedLine(cmd) => self.handle_add_line(cmd),
            PricingOrderCommand::PriceOrder(cmd) => self.handle_price(cmd),
            PricingOrderCommand::CloseOrder(cmd) => self.handle_close(cmd),
        }
    }
}

impl PricingOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PricingOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenOrder) -> Result<Vec<PricingOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already opened"));
        }

        Ok(vec![PricingOrderEvent::OrderOpened(OrderOpened {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddQuotedLine) -> Result<Vec<PricingOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::invariant("only draft orders accept lines"));
        }

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if !cmd.unit_price.is_finite() || cmd.unit_price < 0.0 {
            return Err(DomainError::validation(
                "unit price must be finite and non-negative",
            ));
        }
        if !cmd.rate_snapshot.rate.is_finite() {
            return Err(DomainError::validation("rate snapshot must be finite"));
        }

        let line_no = self.lines.len() as u32 + 1;

        Ok(vec![PricingOrderEvent::QuotedLineAdded(QuotedLineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            rate_snapshot: cmd.rate_snapshot,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_price(&self, cmd: &PriceOrder) -> Result<Vec<PricingOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != PricingOrderStatus::Draft {
            return Err(DomainError::conflict("order is already priced or closed"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::invariant("cannot price an empty order"));
        }

        Ok(vec![PricingOrderEvent::OrderPriced(OrderPriced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseOrder) -> Result<Vec<PricingOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status == PricingOrderStatus::Closed {
            return Err(DomainError::conflict("order is already closed"));
        }
        if self.status != PricingOrderStatus::Priced {
            return Err(DomainError::invariant("only priced orders can be closed"));
        }

        Ok(vec![PricingOrderEvent::OrderClosed(OrderClosed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rateforge_core::AggregateId;
    use rateforge_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_order_id() -> PricingOrderId {
        PricingOrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn snapshot(rate: f64) -> RateSnapshot {
        RateSnapshot {
            source: PriceSource::None,
            rate,
            quoted_at: test_time(),
        }
    }

    fn opened_order() -> (PricingOrder, TenantId, PricingOrderId) {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let mut order = PricingOrder::empty(order_id);
        execute(
            &mut order,
            &PricingOrderCommand::OpenOrder(OpenOrder {
                tenant_id,
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        (order, tenant_id, order_id)
    }

    fn add_line(
        order: &mut PricingOrder,
        tenant_id: TenantId,
        order_id: PricingOrderId,
        quantity: i64,
        unit_price: f64,
    ) {
        execute(
            order,
            &PricingOrderCommand::AddQuotedLine(AddQuotedLine {
                tenant_id,
                order_id,
                product_id: ProductId::new(AggregateId::new()),
                quantity,
                unit_price,
                rate_snapshot: snapshot(unit_price),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    #[test]
    fn lines_are_numbered_sequentially() {
        let (mut order, tenant_id, order_id) = opened_order();
        add_line(&mut order, tenant_id, order_id, 1, 100.0);
        add_line(&mut order, tenant_id, order_id, 2, 250.0);

        let numbers: Vec<u32> = order.lines().iter().map(|l| l.line_no).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn total_sums_quantity_times_unit_price() {
        let (mut order, tenant_id, order_id) = opened_order();
        add_line(&mut order, tenant_id, order_id, 2, 100.0);
        add_line(&mut order, tenant_id, order_id, 3, 50.0);
        assert!((order.total() - 350.0).abs() < 1e-9);
    }

    #[test]
    fn line_freezes_its_rate_snapshot() {
        let (mut order, tenant_id, order_id) = opened_order();
        add_line(&mut order, tenant_id, order_id, 1, 4_760.0);
        assert_eq!(order.lines()[0].rate_snapshot.rate, 4_760.0);
    }

    #[test]
    fn invalid_lines_are_rejected() {
        let (order, tenant_id, order_id) = opened_order();
        let bad = [
            (0, 10.0, 1.0),
            (-1, 10.0, 1.0),
            (1, -10.0, 1.0),
            (1, f64::NAN, 1.0),
            (1, 10.0, f64::INFINITY),
        ];
        for (quantity, unit_price, rate) in bad {
            let cmd = PricingOrderCommand::AddQuotedLine(AddQuotedLine {
                tenant_id,
                order_id,
                product_id: ProductId::new(AggregateId::new()),
                quantity,
                unit_price,
                rate_snapshot: snapshot(rate),
                occurred_at: test_time(),
            });
            assert!(
                matches!(order.handle(&cmd), Err(DomainError::Validation(_))),
                "quantity={quantity} unit_price={unit_price} rate={rate}"
            );
        }
    }

    #[test]
    fn pricing_an_empty_order_is_rejected() {
        let (order, tenant_id, order_id) = opened_order();
        let cmd = PricingOrderCommand::PriceOrder(PriceOrder {
            tenant_id,
            order_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            order.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn priced_orders_reject_new_lines() {
        let (mut order, tenant_id, order_id) = opened_order();
        add_line(&mut order, tenant_id, order_id, 1, 100.0);
        execute(
            &mut order,
            &PricingOrderCommand::PriceOrder(PriceOrder {
                tenant_id,
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.status(), PricingOrderStatus::Priced);

        let cmd = PricingOrderCommand::AddQuotedLine(AddQuotedLine {
            tenant_id,
            order_id,
            product_id: ProductId::new(AggregateId::new()),
            quantity: 1,
            unit_price: 10.0,
            rate_snapshot: snapshot(10.0),
            occurred_at: test_time(),
        });
        assert!(matches!(
            order.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn close_requires_a_priced_order() {
        let (mut order, tenant_id, order_id) = opened_order();
        let close = PricingOrderCommand::CloseOrder(CloseOrder {
            tenant_id,
            order_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            order.handle(&close),
            Err(DomainError::InvariantViolation(_))
        ));

        add_line(&mut order, tenant_id, order_id, 1, 100.0);
        execute(
            &mut order,
            &PricingOrderCommand::PriceOrder(PriceOrder {
                tenant_id,
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(&mut order, &close).unwrap();
        assert_eq!(order.status(), PricingOrderStatus::Closed);

        // Closed is terminal.
        assert!(matches!(order.handle(&close), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn open_twice_is_a_conflict() {
        let (order, tenant_id, order_id) = opened_order();
        let cmd = PricingOrderCommand::OpenOrder(OpenOrder {
            tenant_id,
            order_id,
            occurred_at: test_time(),
        });
        assert!(matches!(order.handle(&cmd), Err(DomainError::Conflict(_))));
    }
}
