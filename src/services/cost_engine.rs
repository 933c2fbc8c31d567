//! Deterministic computation of fabric requirements and price breakdown from
//! a design's fabric choices and measurements.
//!
//! Pure functions over pre-resolved inputs; no I/O. Re-running on the same
//! inputs yields identical output, which is what makes quotes auditable and
//! safely recomputable on edit.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{FabricAssignments, FabricRequirement, FabricRequirements, MeasurementSet};

/// Measurement ratios outside this band are clamped; a missing measurement on
/// either side means "no adjustment".
const MIN_ADJUSTMENT: Decimal = dec!(0.8);
const MAX_ADJUSTMENT: Decimal = dec!(1.5);

/// Template fields the engine needs, detached from the entity so the engine
/// stays I/O-free.
#[derive(Debug, Clone)]
pub struct TemplateInputs {
    /// Part name -> base meters at default measurements.
    pub fabric_requirements: BTreeMap<String, Decimal>,
    /// Part name -> default measurement (cm).
    pub default_measurements: BTreeMap<String, Decimal>,
    pub tailor_fee: Decimal,
    pub service_fee: Decimal,
}

/// Full price breakdown for a design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostQuote {
    pub requirements: FabricRequirements,
    pub fabric_cost: Decimal,
    pub tailoring_cost: Decimal,
    pub service_fee: Decimal,
    pub total_cost: Decimal,
}

/// Computes per-part fabric requirements and the cost breakdown.
///
/// `fabric_prices` maps every assigned fabric id to its current selling
/// price. An assignment referencing a fabric absent from the map fails the
/// whole computation: a quote that silently drops a part would under-state
/// the price.
///
/// Parts appear in the result iff they are present in both the assignments
/// and the template's requirement table.
pub fn compute_quote(
    assignments: &FabricAssignments,
    measurements: &MeasurementSet,
    template: &TemplateInputs,
    fabric_prices: &BTreeMap<Uuid, Decimal>,
) -> Result<CostQuote, ServiceError> {
    let mut requirements = BTreeMap::new();
    let mut fabric_cost = Decimal::ZERO;

    for (part, fabric_id) in &assignments.0 {
        let Some(base_requirement) = template.fabric_requirements.get(part) else {
            // Assignment for a part this template does not use fabric for.
            continue;
        };

        let price = fabric_prices.get(fabric_id).ok_or_else(|| {
            ServiceError::NotFound(format!(
                "Fabric {} assigned to part '{}' does not exist",
                fabric_id, part
            ))
        })?;

        let factor = adjustment_factor(
            measurements.0.get(part),
            template.default_measurements.get(part),
        );
        let adjusted = (base_requirement * factor)
            .round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero);

        fabric_cost += adjusted * price;
        requirements.insert(
            part.clone(),
            FabricRequirement {
                fabric_id: *fabric_id,
                base_requirement: *base_requirement,
                adjustment_factor: factor,
                adjusted_requirement: adjusted,
            },
        );
    }

    let tailoring_cost = template.tailor_fee;
    let total_cost = fabric_cost + tailoring_cost + template.service_fee;

    Ok(CostQuote {
        requirements: FabricRequirements(requirements),
        fabric_cost,
        tailoring_cost,
        service_fee: template.service_fee,
        total_cost,
    })
}

/// Clamped `custom / default` ratio; 1.0 when either measurement is absent
/// or the default is zero.
fn adjustment_factor(custom: Option<&Decimal>, default: Option<&Decimal>) -> Decimal {
    match (custom, default) {
        (Some(custom), Some(default)) if !default.is_zero() => (custom / default)
            .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
            .clamp(MIN_ADJUSTMENT, MAX_ADJUSTMENT),
        _ => Decimal::ONE,
    }
}
