use std::collections::HashMap;

use anyhow::{Context, Result};
use log::*;

use infra::documents::HasMeta;
use infra::ids::Id;
use infra::persistence::Storage;

use super::models::{Composite, IngredientLine, IngredientSource, Product};
use crate::graph::CostGraph;

/// Products, composites and lines as read in one go from the store. Costs
/// are computed against a snapshot and never written back.
#[derive(Debug, Default, Clone)]
pub struct CatalogSnapshot {
    products: HashMap<Id<Product>, Product>,
    composites: HashMap<Id<Composite>, Composite>,
    lines: HashMap<Id<Composite>, Vec<IngredientLine>>,
}

impl CatalogSnapshot {
    pub fn load<S: Storage>(docs: &S) -> Result<Self> {
        let mut snapshot = CatalogSnapshot::default();
        for product in docs.load_all::<Product>().context("load products")? {
            snapshot.insert_product(product);
        }
        for composite in docs.load_all::<Composite>().context("load composites")? {
            snapshot.insert_composite(composite);
        }
        for line in docs.load_all::<IngredientLine>().context("load lines")? {
            snapshot.insert_line(line);
        }
        debug!(
            "Snapshot of {} products, {} composites",
            snapshot.products.len(),
            snapshot.composites.len()
        );
        Ok(snapshot)
    }

    pub fn insert_product(&mut self, product: Product) {
        self.products.insert(product.meta().id, product);
    }

    pub fn insert_composite(&mut self, composite: Composite) {
        self.composites.insert(composite.meta().id, composite);
    }

    pub fn insert_line(&mut self, line: IngredientLine) {
        self.lines.entry(line.parent).or_default().push(line);
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn composites(&self) -> impl Iterator<Item = &Composite> {
        self.composites.values()
    }

    /// Every line, in any composite, that draws on `source`.
    pub fn uses_of(&self, source: IngredientSource) -> usize {
        self.lines
            .values()
            .flatten()
            .filter(|line| line.source == source)
            .count()
    }
}

impl CostGraph for CatalogSnapshot {
    fn product(&self, id: &Id<Product>) -> Option<&Product> {
        self.products.get(id)
    }

    fn composite(&self, id: &Id<Composite>) -> Option<&Composite> {
        self.composites.get(id)
    }

    fn lines(&self, id: &Id<Composite>) -> &[IngredientLine] {
        self.lines.get(id).map(Vec::as_slice).unwrap_or_default()
    }
}
