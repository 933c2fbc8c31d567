//! Status vocabularies and typed value objects shared by entities and the
//! orchestration services.
//!
//! Statuses persist as strings but every decision point parses them into
//! these enums; the transition tables live here so they can be unit tested
//! without a database.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Fulfillment lifecycle of an [`crate::entities::order`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PaymentPending,
    Paid,
    FabricOrdering,
    FabricOrdered,
    InProduction,
    QualityCheck,
    ReadyForShipping,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Legal transitions of the order state machine. Same-status transitions
    /// are treated as no-ops by the caller, everything not listed here is an
    /// illegal transition.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, PaymentPending)
                | (Pending, Paid)
                | (Pending, Cancelled)
                | (PaymentPending, Paid)
                | (PaymentPending, Pending)
                | (PaymentPending, Cancelled)
                | (Paid, FabricOrdering)
                | (Paid, Cancelled)
                | (FabricOrdering, FabricOrdered)
                | (FabricOrdering, Cancelled)
                | (FabricOrdered, InProduction)
                | (InProduction, QualityCheck)
                | (QualityCheck, ReadyForShipping)
                | (QualityCheck, InProduction)
                | (ReadyForShipping, Shipped)
                | (Shipped, Delivered)
                | (Delivered, Completed)
                | (Cancelled, Refunded)
        )
    }

    /// Cancellation is only permitted before production work begins.
    pub fn can_be_cancelled(self) -> bool {
        use OrderStatus::*;
        matches!(self, Pending | PaymentPending | Paid | FabricOrdering)
    }

    pub fn is_terminal(self) -> bool {
        use OrderStatus::*;
        matches!(self, Completed | Cancelled | Refunded)
    }
}

/// Payment lifecycle, orthogonal to but coupled with [`OrderStatus`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Challenge,
    Failed,
    Refunded,
    PartiallyRefunded,
}

/// Per-part fabric procurement sub-order lifecycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FabricOrderStatus {
    Pending,
    Ordered,
    Cutting,
    Shipped,
    DeliveredToTailor,
    QualityCheck,
    Approved,
    Rejected,
    Cancelled,
}

impl FabricOrderStatus {
    pub fn can_transition_to(self, next: FabricOrderStatus) -> bool {
        use FabricOrderStatus::*;
        matches!(
            (self, next),
            (Pending, Ordered)
                | (Pending, Cancelled)
                | (Ordered, Cutting)
                | (Ordered, Shipped)
                | (Ordered, Cancelled)
                | (Cutting, Shipped)
                | (Shipped, DeliveredToTailor)
                | (DeliveredToTailor, QualityCheck)
                | (QualityCheck, Approved)
                | (QualityCheck, Rejected)
        )
    }

    /// The seller has confirmed the sub-order (stock was decremented).
    pub fn is_ordered_or_later(self) -> bool {
        use FabricOrderStatus::*;
        matches!(
            self,
            Ordered | Cutting | Shipped | DeliveredToTailor | QualityCheck | Approved | Rejected
        )
    }

    /// The fabric has physically reached the tailor. A rejected fabric still
    /// counts: rejection is a quality verdict issued after delivery, and it
    /// must not hold the rest of the order hostage.
    pub fn is_delivered_or_later(self) -> bool {
        use FabricOrderStatus::*;
        matches!(self, DeliveredToTailor | QualityCheck | Approved | Rejected)
    }
}

/// Lifecycle of a tailor's work item for one order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AssignmentStatus::Completed | AssignmentStatus::Cancelled)
    }

    /// `completed -> in_progress` is the rework path after a failed quality
    /// check.
    pub fn can_transition_to(self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        matches!(
            (self, next),
            (Assigned, Accepted)
                | (Assigned, Cancelled)
                | (Accepted, InProgress)
                | (Accepted, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
                | (Completed, InProgress)
        )
    }
}

/// Design lifecycle: `draft -> completed -> ordered`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DesignStatus {
    Draft,
    Completed,
    Ordered,
}

/// Role of the authenticated principal performing an operation. The
/// authentication layer itself is an external collaborator; operations
/// receive the operator explicitly instead of reading ambient request state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    Customer,
    Seller,
    Tailor,
    Admin,
}

/// Explicit operation context: who is acting and in what capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: Uuid,
    pub role: OperatorRole,
}

impl Operator {
    pub fn is_admin(&self) -> bool {
        self.role == OperatorRole::Admin
    }

    /// True when the operator is `owner_id`, or an admin acting on their
    /// behalf.
    pub fn can_act_for(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.id == owner_id
    }
}

/// Part name -> chosen fabric id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct FabricAssignments(pub BTreeMap<String, Uuid>);

/// Part name -> measurement value (centimeters).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct MeasurementSet(pub BTreeMap<String, Decimal>);

/// Computed fabric requirement for a single garment part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct FabricRequirement {
    pub fabric_id: Uuid,
    /// Meters required at the template's default measurements.
    pub base_requirement: Decimal,
    /// Clamped `custom / default` measurement ratio.
    pub adjustment_factor: Decimal,
    /// `base_requirement * adjustment_factor`, rounded to 3 decimal places.
    pub adjusted_requirement: Decimal,
}

/// Part name -> computed requirement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct FabricRequirements(pub BTreeMap<String, FabricRequirement>);

/// One entry of a tailor assignment's append-only work log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct WorkStep {
    pub description: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct WorkSteps(pub Vec<WorkStep>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::PaymentPending,
            OrderStatus::FabricOrdering,
            OrderStatus::ReadyForShipping,
            OrderStatus::Refunded,
        ] {
            let parsed: OrderStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(OrderStatus::PaymentPending.to_string(), "payment_pending");
        assert!("not_a_status".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn cancellation_window_matches_lifecycle() {
        assert!(OrderStatus::Pending.can_be_cancelled());
        assert!(OrderStatus::FabricOrdering.can_be_cancelled());
        assert!(!OrderStatus::FabricOrdered.can_be_cancelled());
        assert!(!OrderStatus::Shipped.can_be_cancelled());
        assert!(!OrderStatus::Completed.can_be_cancelled());
    }

    #[test]
    fn production_path_is_connected() {
        use OrderStatus::*;
        let path = [
            Pending,
            PaymentPending,
            Paid,
            FabricOrdering,
            FabricOrdered,
            InProduction,
            QualityCheck,
            ReadyForShipping,
            Shipped,
            Delivered,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
    }

    #[test]
    fn fabric_order_gating_predicates() {
        assert!(FabricOrderStatus::Ordered.is_ordered_or_later());
        assert!(!FabricOrderStatus::Pending.is_ordered_or_later());
        assert!(FabricOrderStatus::QualityCheck.is_delivered_or_later());
        assert!(FabricOrderStatus::Rejected.is_delivered_or_later());
        assert!(!FabricOrderStatus::Shipped.is_delivered_or_later());
        assert!(!FabricOrderStatus::Cancelled.is_ordered_or_later());
    }
}
