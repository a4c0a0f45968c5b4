//! Order placement and settlement against a venue connector.

use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};

use super::order::{OrderParams, OrderState};
use crate::error::VenueError;
use crate::metrics;
use crate::venue::{OrderAck, VenueConnector};

/// Default timeout for order operations.
pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(3);

/// Default poll interval for order status.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Place an order under a caller-side timeout.
///
/// A placement that times out or fails in transit may still have reached the
/// venue, so the order is looked up by client order id before the failure is
/// reported. Callers only ever retry with a fresh order after that re-check.
#[instrument(skip(connector, params), fields(venue = %connector.venue(), symbol = %params.symbol, side = ?params.side))]
pub async fn submit_with_timeout(
    connector: &dyn VenueConnector,
    params: &OrderParams,
    limit: Duration,
) -> Result<OrderAck, VenueError> {
    params.validate().map_err(|reason| VenueError::Precision {
        venue: connector.venue().to_string(),
        reason,
    })?;

    debug!(
        price = %params.price,
        amount = %params.amount,
        tif = ?params.tif,
        client_order_id = %params.client_order_id,
        "Submitting order"
    );

    let _timer = metrics::timer_order_submit();
    metrics::inc_orders_submitted();

    let failure = match timeout(limit, connector.create_order(params)).await {
        Ok(Ok(ack)) => {
            info!(order_id = %ack.order_id, amount = %params.amount, price = %params.price, "Order placed");
            return Ok(ack);
        }
        Ok(Err(e)) if !e.is_transient() => {
            metrics::inc_orders_failed();
            return Err(e);
        }
        Ok(Err(e)) => {
            warn!(client_order_id = %params.client_order_id, error = %e, "Order placement failed in transit, re-checking");
            e
        }
        Err(_) => {
            warn!(client_order_id = %params.client_order_id, "Order placement timed out, re-checking");
            VenueError::Timeout {
                venue: connector.venue().to_string(),
                operation: "create_order".to_string(),
            }
        }
    };

    recover_placement(connector, params, failure).await
}

async fn recover_placement(
    connector: &dyn VenueConnector,
    params: &OrderParams,
    failure: VenueError,
) -> Result<OrderAck, VenueError> {
    match connector
        .find_order_by_client_id(&params.symbol, &params.client_order_id)
        .await
    {
        Ok(Some(state)) => {
            info!(order_id = %state.order_id, "Order found after failed placement");
            Ok(OrderAck {
                order_id: state.order_id,
                client_order_id: params.client_order_id.clone(),
                symbol: params.symbol.clone(),
            })
        }
        Ok(None) => {
            metrics::inc_orders_failed();
            Err(failure)
        }
        Err(e) => {
            metrics::inc_orders_failed();
            warn!(error = %e, "Status re-check after failed placement failed");
            Err(failure)
        }
    }
}

/// Poll for order status until terminal or timeout.
///
/// Returns the last observed state; it is non-terminal when polling timed out.
#[instrument(skip(connector), fields(venue = %connector.venue()))]
pub async fn wait_for_terminal_order(
    connector: &dyn VenueConnector,
    symbol: &str,
    order_id: &str,
    limit: Duration,
    poll_interval: Duration,
) -> Result<OrderState, VenueError> {
    let start = Instant::now();
    let mut last: Option<OrderState> = None;

    loop {
        match connector.fetch_order_status(symbol, order_id).await {
            Ok(state) => {
                if state.is_terminal() || state.is_filled() {
                    if state.is_filled() {
                        metrics::inc_orders_filled();
                    }
                    return Ok(state);
                }
                last = Some(state);
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Error getting order status");
            }
            Err(e) => return Err(e),
        }

        if start.elapsed() >= limit {
            warn!("Order status polling timed out");
            return match last {
                Some(state) => Ok(state),
                None => Err(VenueError::Timeout {
                    venue: connector.venue().to_string(),
                    operation: "fetch_order_status".to_string(),
                }),
            };
        }

        sleep(poll_interval).await;
    }
}

/// Cancel an order and read back its final state.
///
/// Cancelling an order that already reached a terminal state is not an error.
#[instrument(skip(connector), fields(venue = %connector.venue()))]
pub async fn cancel_and_recheck(
    connector: &dyn VenueConnector,
    symbol: &str,
    order_id: &str,
) -> Result<OrderState, VenueError> {
    if let Err(e) = connector.cancel_order(symbol, order_id).await {
        debug!(error = %e, "Cancel failed, reading status");
    }
    connector.fetch_order_status(symbol, order_id).await
}

/// Wait for an order to settle; a timed out order is cancelled and re-checked.
pub async fn settle_order(
    connector: &dyn VenueConnector,
    symbol: &str,
    order_id: &str,
    limit: Duration,
    poll_interval: Duration,
) -> Result<OrderState, VenueError> {
    let state = wait_for_terminal_order(connector, symbol, order_id, limit, poll_interval).await?;
    if state.is_terminal() {
        return Ok(state);
    }
    cancel_and_recheck(connector, symbol, order_id).await
}
