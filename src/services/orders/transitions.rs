use crate::{
    entities::{
        order::OrderStatus,
        order_item::{self, ItemCancellationStatus, ItemReturnStatus},
    },
    errors::ServiceError,
};
use std::fmt::Debug;

/// Order status transition table. Anything not listed is rejected.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    matches!(
        (from, to),
        (PaymentPending, Paid)
            | (PaymentPending, Cancelled)
            | (Placed | Paid, Processing)
            | (Placed | Paid | Processing, Delivered)
            | (Placed | Paid | Processing, Cancelled)
            | (Delivered, ReturnRequested)
            // every item returned individually
            | (Delivered, ReturnCompleted)
            | (ReturnRequested, ReturnApproved | ReturnRejected)
            | (ReturnApproved, ReturnCompleted)
    )
}

pub fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Statuses from which the customer may cancel inside the self-service window.
pub fn is_self_cancellable(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Placed
            | OrderStatus::Processing
            | OrderStatus::Paid
            | OrderStatus::PaymentPending
    )
}

/// No further transition is possible.
pub fn is_terminal(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Cancelled | OrderStatus::ReturnCompleted | OrderStatus::ReturnRejected
    )
}

/// Item cancellation table. An item with any return activity can no longer be cancelled.
///
/// `Cancelled` is the customer's own exit inside the self-service window, or the result of
/// cancelling the whole order; it may override an earlier rejection.
pub fn can_transition_cancellation(
    from: Option<ItemCancellationStatus>,
    to: ItemCancellationStatus,
    return_status: Option<ItemReturnStatus>,
) -> bool {
    use ItemCancellationStatus::*;

    if return_status.is_some() {
        return false;
    }
    matches!(
        (from, to),
        (None, Pending)
            | (None | Some(Pending) | Some(Rejected), Cancelled)
            | (Some(Pending), Approved | Rejected)
    )
}

/// Item return table. Only items never cancelled, or whose cancellation was rejected, can be
/// returned.
pub fn can_transition_return(
    from: Option<ItemReturnStatus>,
    to: ItemReturnStatus,
    cancellation_status: Option<ItemCancellationStatus>,
) -> bool {
    use ItemReturnStatus::*;

    if !matches!(
        cancellation_status,
        None | Some(ItemCancellationStatus::Rejected)
    ) {
        return false;
    }
    matches!(
        (from, to),
        (None, Pending)
            // whole-order return approval
            | (None, Approved)
            | (Some(Pending), Approved | Rejected)
    )
}

pub fn ensure_cancellation_transition(
    item: &order_item::Model,
    to: ItemCancellationStatus,
) -> Result<(), ServiceError> {
    if can_transition_cancellation(item.cancellation_status, to, item.return_status) {
        return Ok(());
    }
    Err(item_conflict(item, "cancellation", item.cancellation_status, to))
}

pub fn ensure_return_transition(
    item: &order_item::Model,
    to: ItemReturnStatus,
) -> Result<(), ServiceError> {
    if can_transition_return(item.return_status, to, item.cancellation_status) {
        return Ok(());
    }
    Err(item_conflict(item, "return", item.return_status, to))
}

fn item_conflict<S: Debug>(
    item: &order_item::Model,
    kind: &str,
    from: Option<S>,
    to: S,
) -> ServiceError {
    let from = from.map_or_else(|| "none".to_string(), |s| format!("{:?}", s).to_lowercase());
    ServiceError::Conflict(format!(
        "Item {} {} cannot move from {} to {} (cancellation {:?}, return {:?})",
        item.id,
        kind,
        from,
        format!("{:?}", to).to_lowercase(),
        item.cancellation_status,
        item.return_status
    ))
}
