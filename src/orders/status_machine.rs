use crate::orders::{OrderError, OrderStatus};

/// Service for managing order status transitions
///
/// IN_PROGRESS → PROCESSED → COMPLETED. Orders enter IN_PROGRESS only at
/// creation, and there is no way back.
pub struct StatusMachine;

impl StatusMachine {
    /// The only status an order may hold before moving to `to`
    ///
    /// `None` for `InProgress`, which is reached by creation alone.
    pub fn required_source(to: OrderStatus) -> Option<OrderStatus> {
        match to {
            OrderStatus::InProgress => None,
            OrderStatus::Processed => Some(OrderStatus::InProgress),
            OrderStatus::Completed => Some(OrderStatus::Processed),
        }
    }

    /// Check if a status transition is valid
    pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
        Self::required_source(to) == Some(from)
    }

    /// Attempt to transition from one status to another
    pub fn transition(from: OrderStatus, to: OrderStatus) -> Result<OrderStatus, OrderError> {
        if Self::is_valid_transition(from, to) {
            Ok(to)
        } else {
            Err(OrderError::InvalidTransition { from, to })
        }
    }
}
