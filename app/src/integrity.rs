//! Checks run before ingredient lines are written.

use infra::ids::Id;

use crate::catalog::models::{Composite, IngredientSource, Product};
use crate::error::CatalogError;
use crate::graph::{CostGraph, Walk};

/// An ingredient line as submitted, before it has been checked. Exactly one
/// of `product` and `preparation` must be given.
#[derive(Debug, Clone, PartialEq)]
pub struct LineInput {
    pub product: Option<Id<Product>>,
    pub preparation: Option<Id<Composite>>,
    pub quantity: f64,
}

impl LineInput {
    pub fn product(product: Id<Product>, quantity: f64) -> Self {
        LineInput {
            product: Some(product),
            preparation: None,
            quantity,
        }
    }

    pub fn preparation(preparation: Id<Composite>, quantity: f64) -> Self {
        LineInput {
            product: None,
            preparation: Some(preparation),
            quantity,
        }
    }

    pub fn source(&self) -> Result<IngredientSource, CatalogError> {
        match (self.product, self.preparation) {
            (Some(product), None) => Ok(IngredientSource::Product(product)),
            (None, Some(preparation)) => Ok(IngredientSource::Preparation(preparation)),
            (Some(_), Some(_)) => Err(CatalogError::violation(
                "an ingredient line uses either a product or a preparation, not both",
            )),
            (None, None) => Err(CatalogError::violation(
                "an ingredient line needs a product or a preparation",
            )),
        }
    }

    pub fn checked_quantity(&self) -> Result<f64, CatalogError> {
        if self.quantity.is_finite() && self.quantity > 0.0 {
            Ok(self.quantity)
        } else {
            Err(CatalogError::violation(format!(
                "quantity must be a positive number, got {}",
                self.quantity
            )))
        }
    }
}

/// Fails if making `composite` use `source` would let `composite` reach
/// itself through its ingredients.
pub fn validate_no_cycle<G: CostGraph>(
    graph: &G,
    composite: Id<Composite>,
    source: Id<Composite>,
) -> Result<(), CatalogError> {
    let name = |id: &Id<Composite>| {
        graph
            .composite(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    };

    if source == composite {
        return Err(CatalogError::CycleDetected {
            composite: name(&composite),
            via: name(&source),
        });
    }

    let mut walk = Walk::new(graph);
    walk.walk(source, |visited, _| {
        if visited.meta.id == composite {
            Err(CatalogError::CycleDetected {
                composite: name(&composite),
                via: name(&source),
            })
        } else {
            Ok(())
        }
    })
}
