use anyhow::{Context, Result};
use log::*;

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Id, IdGen};
use infra::persistence::Storage;

use super::models::{
    Composite, CompositeKind, DishCategory, IngredientLine, IngredientSource, Markup, MarkupKind,
    PreparationCategory, Yield,
};
use super::snapshot::CatalogSnapshot;
use super::{ensure_unique, existing, finite, group_named, required, Catalog};
use crate::error::CatalogError;
use crate::graph::CostGraph;
use crate::integrity::{validate_no_cycle, LineInput};
use crate::services::{Commandable, Request};

#[derive(Debug, Clone, PartialEq)]
pub struct DishDetails {
    pub name: String,
    pub category: String,
    pub markup: Markup,
    pub lines: Vec<LineInput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparationDetails {
    pub name: String,
    pub category: Option<String>,
    pub yields: Yield,
    pub lines: Vec<LineInput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateDish(pub DishDetails);

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDish {
    pub id: Id<Composite>,
    pub details: DishDetails,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePreparation(pub PreparationDetails);

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePreparation {
    pub id: Id<Composite>,
    pub details: PreparationDetails,
}

/// Swaps the whole ingredient list of a composite for `lines`, or nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceIngredientLines {
    pub composite: Id<Composite>,
    pub lines: Vec<LineInput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteComposite(pub Id<Composite>);

impl Request for CreateDish {
    type Resp = Id<Composite>;
}

impl Request for UpdateDish {
    type Resp = ();
}

impl Request for CreatePreparation {
    type Resp = Id<Composite>;
}

impl Request for UpdatePreparation {
    type Resp = ();
}

impl Request for ReplaceIngredientLines {
    type Resp = ();
}

impl Request for DeleteComposite {
    type Resp = ();
}

impl DishDetails {
    pub fn new(name: &str, category: &str, markup: Markup) -> Self {
        DishDetails {
            name: name.to_string(),
            category: category.to_string(),
            markup,
            lines: Vec::new(),
        }
    }

    pub fn with_lines(mut self, lines: Vec<LineInput>) -> Self {
        self.lines = lines;
        self
    }

    fn kind<S: Storage>(&self, docs: &S, idgen: &IdGen) -> Result<CompositeKind> {
        if let Some(value) = self.markup.value {
            finite(value, "markup")?;
        }
        if self.markup.kind == MarkupKind::Unknown {
            warn!("Dish {:?} has an unrecognised markup; it sells at cost", self.name);
        }
        Ok(CompositeKind::Dish {
            category: group_named::<DishCategory, _>(docs, idgen, &self.category)?,
            markup: self.markup,
        })
    }
}

impl PreparationDetails {
    pub fn new(name: &str, yields: Yield) -> Self {
        PreparationDetails {
            name: name.to_string(),
            category: None,
            yields,
            lines: Vec::new(),
        }
    }

    pub fn in_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_lines(mut self, lines: Vec<LineInput>) -> Self {
        self.lines = lines;
        self
    }

    fn kind<S: Storage>(&self, docs: &S, idgen: &IdGen) -> Result<CompositeKind> {
        finite(self.yields.quantity, "yield")?;
        let category = match self.category.as_ref().map(|c| c.trim()) {
            Some(name) if !name.is_empty() => {
                Some(group_named::<PreparationCategory, _>(docs, idgen, name)?)
            }
            _ => None,
        };
        Ok(CompositeKind::Preparation {
            category,
            yields: self.yields.clone(),
        })
    }
}

/// Saves a new composite and its lines as one step.
fn create<S: Storage>(
    docs: &S,
    idgen: &IdGen,
    name: &str,
    kind: CompositeKind,
    lines: &[LineInput],
) -> Result<Id<Composite>> {
    let name = required(name, "composite")?;
    ensure_unique::<Composite, _>(docs, &name, None)?;

    let mut composite = Composite {
        meta: DocMeta::new_with_id(idgen.generate()),
        name,
        kind,
    };
    docs.save(&mut composite).context("save composite")?;
    let id = composite.meta().id;
    replace_lines(docs, idgen, id, lines)?;
    info!("Created {:?}: {}", composite.name, id);
    Ok(id)
}

/// Overwrites name, kind and lines of an existing composite. A dish stays a
/// dish and a preparation stays a preparation.
fn update<S: Storage>(
    docs: &S,
    idgen: &IdGen,
    id: Id<Composite>,
    name: &str,
    kind: CompositeKind,
    lines: &[LineInput],
) -> Result<()> {
    let mut composite = existing::<Composite, _>(docs, &id)?;
    let name = required(name, "composite")?;
    ensure_unique(docs, &name, Some(id))?;
    if composite.is_preparation() != matches_preparation(&kind) {
        return Err(CatalogError::violation(format!(
            "{:?} cannot change between dish and preparation",
            composite.name
        ))
        .into());
    }

    composite.name = name;
    composite.kind = kind;
    docs.save(&mut composite).context("save composite")?;
    replace_lines(docs, idgen, id, lines)?;
    debug!("Updated {:?}: {}", composite.name, id);
    Ok(())
}

fn matches_preparation(kind: &CompositeKind) -> bool {
    match kind {
        CompositeKind::Preparation { .. } => true,
        CompositeKind::Dish { .. } => false,
    }
}

/// Checks every input line against the current catalog, then deletes the
/// composite's lines and writes the new ones. Must run inside a transaction:
/// a failure after the deletes relies on the rollback.
pub(crate) fn replace_lines<S: Storage>(
    docs: &S,
    idgen: &IdGen,
    composite: Id<Composite>,
    inputs: &[LineInput],
) -> Result<()> {
    let snapshot = CatalogSnapshot::load(docs)?;
    let parent = snapshot
        .composite(&composite)
        .ok_or_else(|| CatalogError::not_found(&composite))?;

    let mut lines = Vec::with_capacity(inputs.len());
    for input in inputs {
        let source = input.source()?;
        let quantity = input.checked_quantity()?;
        match source {
            IngredientSource::Product(id) => {
                snapshot
                    .product(&id)
                    .ok_or_else(|| CatalogError::not_found(&id))?;
            }
            IngredientSource::Preparation(id) => {
                let used = snapshot
                    .composite(&id)
                    .ok_or_else(|| CatalogError::not_found(&id))?;
                if !used.is_preparation() {
                    return Err(CatalogError::violation(format!(
                        "{:?} is a dish and cannot be used as an ingredient",
                        used.name
                    ))
                    .into());
                }
                validate_no_cycle(&snapshot, composite, id)?;
            }
        }
        lines.push(IngredientLine::new(idgen.generate(), composite, source, quantity));
    }

    let old = docs.find_by::<IngredientLine>(&["parent"], &composite.to_string())?;
    for line in old.iter() {
        docs.delete(line).context("delete ingredient line")?;
    }
    for line in lines.iter_mut() {
        docs.save(line).context("save ingredient line")?;
    }
    debug!(
        "Replaced {} lines of {:?} with {}",
        old.len(),
        parent.name,
        lines.len()
    );
    Ok(())
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<CreateDish> for Catalog<M>
{
    fn execute(&self, req: CreateDish) -> Result<Id<Composite>> {
        let CreateDish(details) = req;
        let idgen = &self.idgen;
        self.in_transaction(|docs| {
            let kind = details.kind(docs, idgen)?;
            create(docs, idgen, &details.name, kind, &details.lines)
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<UpdateDish> for Catalog<M>
{
    fn execute(&self, req: UpdateDish) -> Result<()> {
        let UpdateDish { id, details } = req;
        let idgen = &self.idgen;
        self.in_transaction(|docs| {
            let kind = details.kind(docs, idgen)?;
            update(docs, idgen, id, &details.name, kind, &details.lines)
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<CreatePreparation> for Catalog<M>
{
    fn execute(&self, req: CreatePreparation) -> Result<Id<Composite>> {
        let CreatePreparation(details) = req;
        let idgen = &self.idgen;
        self.in_transaction(|docs| {
            let kind = details.kind(docs, idgen)?;
            create(docs, idgen, &details.name, kind, &details.lines)
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<UpdatePreparation> for Catalog<M>
{
    fn execute(&self, req: UpdatePreparation) -> Result<()> {
        let UpdatePreparation { id, details } = req;
        let idgen = &self.idgen;
        self.in_transaction(|docs| {
            let kind = details.kind(docs, idgen)?;
            update(docs, idgen, id, &details.name, kind, &details.lines)
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<ReplaceIngredientLines> for Catalog<M>
{
    fn execute(&self, req: ReplaceIngredientLines) -> Result<()> {
        let ReplaceIngredientLines { composite, lines } = req;
        let idgen = &self.idgen;
        self.in_transaction(|docs| replace_lines(docs, idgen, composite, &lines))
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<DeleteComposite> for Catalog<M>
{
    fn execute(&self, req: DeleteComposite) -> Result<()> {
        let DeleteComposite(id) = req;
        self.in_transaction(|docs| {
            let composite = existing::<Composite, _>(docs, &id)?;
            if composite.is_preparation() {
                let uses = docs
                    .find_by::<IngredientLine>(&["source", "preparation"], &id.to_string())?
                    .len();
                if uses > 0 {
                    warn!(
                        "Refusing to delete {:?}, used by {} lines",
                        composite.name, uses
                    );
                    return Err(CatalogError::ReferentialConflict {
                        name: composite.name,
                        uses,
                    }
                    .into());
                }
            }

            for line in docs.find_by::<IngredientLine>(&["parent"], &id.to_string())? {
                docs.delete(&line).context("delete ingredient line")?;
            }
            docs.delete(&composite).context("delete composite")?;
            info!("Deleted {:?}: {}", composite.name, id);
            Ok(())
        })
    }
}
