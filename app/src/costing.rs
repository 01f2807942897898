//! Cost propagation from base products up through preparations to dishes.
//!
//! Every figure is derived on demand from the graph it is given; a
//! `Costing` only memoizes within its own lifetime, so build a fresh one per
//! request.

use std::collections::HashMap;

use log::*;
use rust_decimal::prelude::*;

use infra::documents::HasMeta;
use infra::ids::Id;

use crate::catalog::models::{Composite, CompositeKind, IngredientLine, IngredientSource, Product};
use crate::error::CatalogError;
use crate::graph::{CostGraph, Walk};

/// Figures are summed as `Decimal` and handed out as `f64`.
fn to_decimal(value: f64, what: &str) -> Result<Decimal, CatalogError> {
    Decimal::from_f64(value).ok_or_else(|| out_of_range(what))
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn out_of_range(what: &str) -> CatalogError {
    CatalogError::violation(format!("{} is out of range", what))
}

fn decimal_unit_price(product: &Product) -> Result<Decimal, CatalogError> {
    match (product.package.price, product.package.weight) {
        (Some(price), Some(weight)) if weight > 0.0 => {
            let price = to_decimal(price, "package price")?;
            let weight = to_decimal(weight, "package weight")?;
            if weight.is_zero() {
                return Ok(Decimal::ZERO);
            }
            price
                .checked_div(weight)
                .ok_or_else(|| out_of_range("unit price"))
        }
        _ => Ok(Decimal::ZERO),
    }
}

/// Price per package unit. Zero until both price and a positive weight are known.
pub fn unit_price(product: &Product) -> Result<f64, CatalogError> {
    decimal_unit_price(product).map(to_f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeCost {
    /// Sum of all line costs.
    pub total: f64,
    /// For a dish, the total; for a preparation, the cost per unit of yield.
    pub cost: f64,
}

#[derive(Debug, Clone, Copy)]
struct Resolved {
    total: Decimal,
    cost: Decimal,
}

impl Resolved {
    fn of(composite: &Composite, total: Decimal) -> Result<Self, CatalogError> {
        let cost = match &composite.kind {
            CompositeKind::Dish { .. } => total,
            CompositeKind::Preparation { yields, .. } if yields.quantity > 0.0 => {
                let quantity = to_decimal(yields.quantity, "yield")?;
                if quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    total
                        .checked_div(quantity)
                        .ok_or_else(|| out_of_range("cost per unit"))?
                }
            }
            CompositeKind::Preparation { .. } => Decimal::ZERO,
        };
        Ok(Resolved { total, cost })
    }
}

impl From<Resolved> for CompositeCost {
    fn from(resolved: Resolved) -> Self {
        CompositeCost {
            total: to_f64(resolved.total),
            cost: to_f64(resolved.cost),
        }
    }
}

pub struct Costing<'g, G> {
    graph: &'g G,
    walk: Walk<'g, G>,
    resolved: HashMap<Id<Composite>, Resolved>,
}

impl<'g, G: CostGraph> Costing<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Costing {
            graph,
            walk: Walk::new(graph),
            resolved: HashMap::new(),
        }
    }

    /// What one ingredient line adds to its parent.
    pub fn line_cost(&mut self, line: &IngredientLine) -> Result<f64, CatalogError> {
        if let IngredientSource::Preparation(source) = line.source {
            self.resolve(source)?;
        }
        priced_line(self.graph, &self.resolved, line).map(to_f64)
    }

    /// Cost of one unit of `source`: a product's unit price, or a
    /// preparation's cost per unit of yield.
    pub fn source_cost(&mut self, source: IngredientSource) -> Result<f64, CatalogError> {
        match source {
            IngredientSource::Product(id) => product_unit_price(self.graph, &id).map(to_f64),
            IngredientSource::Preparation(id) => self.composite_cost(id),
        }
    }

    /// Dish total, or preparation cost per unit of yield.
    pub fn composite_cost(&mut self, id: Id<Composite>) -> Result<f64, CatalogError> {
        Ok(self.costs(id)?.cost)
    }

    pub fn costs(&mut self, id: Id<Composite>) -> Result<CompositeCost, CatalogError> {
        self.resolved_costs(id).map(CompositeCost::from)
    }

    /// Cost with the dish's markup applied. Preparations are not sold, so zero.
    pub fn selling_price(&mut self, id: Id<Composite>) -> Result<f64, CatalogError> {
        let composite = self
            .graph
            .composite(&id)
            .ok_or_else(|| CatalogError::not_found(&id))?;
        match &composite.kind {
            CompositeKind::Preparation { .. } => Ok(0.0),
            CompositeKind::Dish { markup, .. } => {
                let markup = *markup;
                let cost = self.resolved_costs(id)?.cost;
                markup
                    .apply(cost)
                    .map(to_f64)
                    .ok_or_else(|| out_of_range("selling price"))
            }
        }
    }

    fn resolved_costs(&mut self, id: Id<Composite>) -> Result<Resolved, CatalogError> {
        self.resolve(id)?;
        self.resolved
            .get(&id)
            .copied()
            .ok_or_else(|| CatalogError::not_found(&id))
    }

    fn resolve(&mut self, root: Id<Composite>) -> Result<(), CatalogError> {
        if self.resolved.contains_key(&root) {
            return Ok(());
        }

        let Costing {
            graph,
            walk,
            resolved,
        } = self;
        let graph = *graph;
        walk.walk(root, |composite, lines| {
            let mut total = Decimal::ZERO;
            for line in lines {
                total = total
                    .checked_add(priced_line(graph, resolved, line)?)
                    .ok_or_else(|| out_of_range("ingredient total"))?;
            }
            let costs = Resolved::of(composite, total)?;
            trace!("{}: {:?}", composite.name, costs);
            resolved.insert(composite.meta().id, costs);
            Ok(())
        })
    }
}

fn product_unit_price<G: CostGraph>(graph: &G, id: &Id<Product>) -> Result<Decimal, CatalogError> {
    graph
        .product(id)
        .ok_or_else(|| CatalogError::not_found(id))
        .and_then(decimal_unit_price)
}

/// Line cost once every preparation it may use has been resolved.
fn priced_line<G: CostGraph>(
    graph: &G,
    resolved: &HashMap<Id<Composite>, Resolved>,
    line: &IngredientLine,
) -> Result<Decimal, CatalogError> {
    let per_unit = match &line.source {
        IngredientSource::Product(id) => product_unit_price(graph, id)?,
        IngredientSource::Preparation(id) => {
            resolved
                .get(id)
                .ok_or_else(|| CatalogError::not_found(id))?
                .cost
        }
    };
    per_unit
        .checked_mul(to_decimal(line.quantity, "quantity")?)
        .ok_or_else(|| out_of_range("line cost"))
}
