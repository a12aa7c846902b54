//! Read-only order history, grouped into display buckets.

use crate::types::{Money, OrderId, ReservationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tripdesk_core::environment::Clock;

/// Payment state of an order as the server reports it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Reserved, not paid yet
    Unpaid,
    /// Paid
    Paid,
    /// Canceled by the traveller or the operator
    Canceled,
}

/// A completed booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id
    pub id: OrderId,
    /// Reservation the order was created from
    pub reservation_id: ReservationId,
    /// Payment state
    pub status: OrderStatus,
    /// Operating company
    pub company: String,
    /// "Lisbon → Porto"
    pub route: String,
    /// Departure of the (first) leg
    pub departs_at: DateTime<Utc>,
    /// Set once canceled
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
    /// Amount charged or due
    pub total: Money,
    /// Checkout URL for unpaid orders
    #[serde(default)]
    pub payment_url: Option<String>,
}

/// Display bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HistoryBucket {
    /// Awaiting payment
    Pending,
    /// Paid, not departed yet
    Current,
    /// Paid and departed
    Past,
    /// Canceled
    Canceled,
}

/// Bucket for one order at `now`
#[must_use]
pub fn classify(order: &Order, now: DateTime<Utc>) -> HistoryBucket {
    if order.status == OrderStatus::Canceled || order.canceled_at.is_some() {
        return HistoryBucket::Canceled;
    }
    match order.status {
        OrderStatus::Unpaid => HistoryBucket::Pending,
        _ if order.departs_at > now => HistoryBucket::Current,
        _ => HistoryBucket::Past,
    }
}

/// Orders split into buckets.
///
/// Pending and current orders are soonest first; past and canceled orders
/// most recent first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderHistory {
    /// Awaiting payment
    pub pending: Vec<Order>,
    /// Upcoming
    pub current: Vec<Order>,
    /// Travelled
    pub past: Vec<Order>,
    /// Canceled
    pub canceled: Vec<Order>,
}

impl OrderHistory {
    /// Orders in `bucket`
    #[must_use]
    pub fn bucket(&self, bucket: HistoryBucket) -> &[Order] {
        match bucket {
            HistoryBucket::Pending => &self.pending,
            HistoryBucket::Current => &self.current,
            HistoryBucket::Past => &self.past,
            HistoryBucket::Canceled => &self.canceled,
        }
    }

    /// Total number of orders
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len() + self.current.len() + self.past.len() + self.canceled.len()
    }

    /// `true` when there are no orders at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Group `orders` by bucket as of `clock.now()`
#[must_use]
pub fn group_orders(orders: Vec<Order>, clock: &dyn Clock) -> OrderHistory {
    let now = clock.now();
    let mut history = OrderHistory::default();

    for order in orders {
        match classify(&order, now) {
            HistoryBucket::Pending => history.pending.push(order),
            HistoryBucket::Current => history.current.push(order),
            HistoryBucket::Past => history.past.push(order),
            HistoryBucket::Canceled => history.canceled.push(order),
        }
    }

    history.pending.sort_by_key(|o| o.departs_at);
    history.current.sort_by_key(|o| o.departs_at);
    history.past.sort_by(|a, b| b.departs_at.cmp(&a.departs_at));
    history.canceled.sort_by(|a, b| b.departs_at.cmp(&a.departs_at));
    history
}
