//! Authoritative per-fabric stock ledger.
//!
//! `stock_meter` is only ever mutated here. Reservation is a single
//! conditional UPDATE (decrement-if-sufficient) so concurrent orders can
//! never drive stock negative; losing the race surfaces as
//! `InsufficientStock` and the caller may retry against the new state.

use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::fabric::{self, Entity as FabricEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Clone)]
pub struct FabricStockService {
    event_sender: EventSender,
}

impl FabricStockService {
    pub fn new(event_sender: EventSender) -> Self {
        Self { event_sender }
    }

    /// Atomically reserves `meters` from a fabric's stock.
    ///
    /// Runs on the caller's connection/transaction so the decrement commits
    /// or rolls back together with the sub-order status it backs.
    #[instrument(skip(self, conn), fields(fabric_id = %fabric_id, meters = %meters))]
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        fabric_id: Uuid,
        meters: Decimal,
    ) -> Result<(), ServiceError> {
        if meters <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Reservation must be for a positive amount of meters".to_string(),
            ));
        }

        let result = FabricEntity::update_many()
            .col_expr(
                fabric::Column::StockMeter,
                Expr::col(fabric::Column::StockMeter).sub(meters),
            )
            .filter(fabric::Column::Id.eq(fabric_id))
            .filter(fabric::Column::StockMeter.gte(meters))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // Either the fabric is gone or stock is short; disambiguate for
            // the caller.
            let exists = FabricEntity::find_by_id(fabric_id).one(conn).await?;
            return match exists {
                None => Err(ServiceError::NotFound(format!(
                    "Fabric {} not found",
                    fabric_id
                ))),
                Some(f) => Err(ServiceError::InsufficientStock(format!(
                    "Fabric {} has {} meters available, {} requested",
                    fabric_id, f.stock_meter, meters
                ))),
            };
        }

        info!("reserved fabric stock");
        self.event_sender
            .send_logged(Event::FabricStockReserved { fabric_id, meters })
            .await;
        Ok(())
    }

    /// Returns previously reserved meters to stock, used when a confirmed
    /// sub-order is cancelled.
    #[instrument(skip(self, conn), fields(fabric_id = %fabric_id, meters = %meters))]
    pub async fn restore<C: ConnectionTrait>(
        &self,
        conn: &C,
        fabric_id: Uuid,
        meters: Decimal,
    ) -> Result<(), ServiceError> {
        if meters <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Restoration must be for a positive amount of meters".to_string(),
            ));
        }

        let result = FabricEntity::update_many()
            .col_expr(
                fabric::Column::StockMeter,
                Expr::col(fabric::Column::StockMeter).add(meters),
            )
            .filter(fabric::Column::Id.eq(fabric_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Fabric {} not found",
                fabric_id
            )));
        }

        info!("restored fabric stock");
        self.event_sender
            .send_logged(Event::FabricStockRestored { fabric_id, meters })
            .await;
        Ok(())
    }
}
