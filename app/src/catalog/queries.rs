use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use log::*;

use infra::documents::HasMeta;
use infra::ids::Id;
use infra::persistence::Storage;

use super::models::{
    Category, Composite, CompositeKind, DishCategory, Group, IngredientLine, IngredientSource,
    PreparationCategory, Product, Supplier, Yield,
};
use super::ordering::{preferred_order, CategoryOrder, OrderScope};
use super::snapshot::CatalogSnapshot;
use super::Catalog;
use crate::costing::{unit_price, Costing};
use crate::error::CatalogError;
use crate::graph::CostGraph;
use crate::integrity::validate_no_cycle;
use crate::services::{Queryable, Request};

/// Products, optionally only those in the named `category` and those whose
/// name or supplier contains `search`, ignoring case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListProducts {
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShowComposite(pub Id<Composite>);

#[derive(Debug, Clone, PartialEq)]
pub struct PriceDish(pub Id<Composite>);

/// Would letting `composite` use `source` close a loop?
#[derive(Debug, Clone, PartialEq)]
pub struct CheckCycle {
    pub composite: Id<Composite>,
    pub source: Id<Composite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShowOverview;

#[derive(Debug, Clone)]
pub struct ProductListing {
    pub product: Product,
    pub category: String,
    pub supplier: String,
    pub unit_price: f64,
}

#[derive(Debug, Clone)]
pub struct CompositeSheet {
    pub composite: Composite,
    pub category: Option<String>,
    pub lines: Vec<LineSheet>,
    pub total_ingredient_cost: f64,
    /// Dish cost price, or preparation cost per unit of yield.
    pub cost: f64,
    pub selling_price: f64,
}

#[derive(Debug, Clone)]
pub struct LineSheet {
    pub line: IngredientLine,
    pub source_name: String,
    pub unit: String,
    pub unit_cost: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DishPrice {
    pub cost_price: f64,
    pub selling_price: f64,
}

#[derive(Debug, Clone)]
pub struct Overview {
    pub dishes: Vec<Section<DishSummary>>,
    pub preparations: Vec<Section<PreparationSummary>>,
    pub products: Vec<Section<ProductListing>>,
}

/// One category's worth of an overview. `category` is `None` for things
/// filed under no category.
#[derive(Debug, Clone)]
pub struct Section<T> {
    pub category: Option<String>,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DishSummary {
    pub id: Id<Composite>,
    pub name: String,
    pub cost_price: f64,
    pub selling_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparationSummary {
    pub id: Id<Composite>,
    pub name: String,
    pub yields: Yield,
    pub cost_per_unit: f64,
}

impl Request for ListProducts {
    type Resp = Vec<ProductListing>;
}

impl Request for ShowComposite {
    type Resp = CompositeSheet;
}

impl Request for PriceDish {
    type Resp = DishPrice;
}

impl Request for CheckCycle {
    type Resp = ();
}

impl Request for ShowOverview {
    type Resp = Overview;
}

/// Group names by id, for one kind of group.
struct Names<G> {
    names: HashMap<Id<G>, String>,
}

impl<G: Group> Names<G> {
    fn load<S: Storage>(docs: &S) -> Result<Self> {
        let names = docs
            .load_all::<G>()?
            .into_iter()
            .map(|g| (g.meta().id, g.name().to_string()))
            .collect();
        Ok(Names { names })
    }

    fn all(&self) -> impl Iterator<Item = String> + '_ {
        self.names.values().cloned()
    }

    fn of(&self, id: &Id<G>) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

fn product_listings<S: Storage>(
    docs: &S,
    snapshot: &CatalogSnapshot,
) -> Result<Vec<ProductListing>> {
    let categories = Names::<Category>::load(docs)?;
    let suppliers = Names::<Supplier>::load(docs)?;
    let mut listings = snapshot
        .products()
        .map(|product| {
            Ok(ProductListing {
                category: categories.of(&product.category),
                supplier: suppliers.of(&product.supplier),
                unit_price: unit_price(product)?,
                product: product.clone(),
            })
        })
        .collect::<Result<Vec<_>, CatalogError>>()?;
    listings.sort_by(|a, b| a.product.name.cmp(&b.product.name));
    Ok(listings)
}

impl ListProducts {
    fn matches(&self, listing: &ProductListing) -> bool {
        let in_category = self
            .category
            .as_ref()
            .map_or(true, |category| &listing.category == category);
        let found = self.search.as_ref().map_or(true, |search| {
            let search = search.to_lowercase();
            listing.product.name.to_lowercase().contains(&search)
                || listing.supplier.to_lowercase().contains(&search)
        });
        in_category && found
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ListProducts> for Catalog<M>
{
    fn query(&self, req: ListProducts) -> Result<Vec<ProductListing>> {
        self.in_transaction(|docs| {
            let snapshot = CatalogSnapshot::load(docs)?;
            let listings = product_listings(docs, &snapshot)?
                .into_iter()
                .filter(|listing| req.matches(listing))
                .collect::<Vec<_>>();
            debug!("{:?} found {} products", req, listings.len());
            Ok(listings)
        })
    }
}

fn composite_sheet<S: Storage>(
    docs: &S,
    snapshot: &CatalogSnapshot,
    id: Id<Composite>,
) -> Result<CompositeSheet> {
    let composite = snapshot
        .composite(&id)
        .ok_or_else(|| CatalogError::not_found(&id))?;
    let category = match &composite.kind {
        CompositeKind::Dish { category, .. } => {
            Some(Names::<DishCategory>::load(docs)?.of(category))
        }
        CompositeKind::Preparation {
            category: Some(category),
            ..
        } => Some(Names::<PreparationCategory>::load(docs)?.of(category)),
        CompositeKind::Preparation { category: None, .. } => None,
    };

    let mut costing = Costing::new(snapshot);
    let mut lines = Vec::new();
    for line in snapshot.lines(&id) {
        let (source_name, unit) = match &line.source {
            IngredientSource::Product(p) => snapshot
                .product(p)
                .map(|p| (p.name.clone(), p.package.unit.clone())),
            IngredientSource::Preparation(p) => snapshot.composite(p).map(|p| {
                let unit = match &p.kind {
                    CompositeKind::Preparation { yields, .. } => yields.unit.clone(),
                    CompositeKind::Dish { .. } => String::new(),
                };
                (p.name.clone(), unit)
            }),
        }
        .unwrap_or_default();
        lines.push(LineSheet {
            unit_cost: costing.source_cost(line.source)?,
            cost: costing.line_cost(line)?,
            line: line.clone(),
            source_name,
            unit,
        });
    }

    let costs = costing.costs(id)?;
    Ok(CompositeSheet {
        composite: composite.clone(),
        category,
        lines,
        total_ingredient_cost: costs.total,
        cost: costs.cost,
        selling_price: costing.selling_price(id)?,
    })
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ShowComposite> for Catalog<M>
{
    fn query(&self, req: ShowComposite) -> Result<CompositeSheet> {
        let ShowComposite(id) = req;
        self.in_transaction(|docs| {
            let snapshot = CatalogSnapshot::load(docs)?;
            composite_sheet(docs, &snapshot, id)
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<PriceDish> for Catalog<M>
{
    fn query(&self, req: PriceDish) -> Result<DishPrice> {
        let PriceDish(id) = req;
        self.in_transaction(|docs| {
            let snapshot = CatalogSnapshot::load(docs)?;
            let dish = snapshot
                .composite(&id)
                .ok_or_else(|| CatalogError::not_found(&id))?;
            let mut costing = Costing::new(&snapshot);
            let price = DishPrice {
                cost_price: costing.composite_cost(id)?,
                selling_price: costing.selling_price(id)?,
            };
            debug!("Price of {:?}: {:?}", dish.name, price);
            Ok(price)
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<CheckCycle> for Catalog<M>
{
    fn query(&self, req: CheckCycle) -> Result<()> {
        let CheckCycle { composite, source } = req;
        self.in_transaction(|docs| {
            let snapshot = CatalogSnapshot::load(docs)?;
            snapshot
                .composite(&composite)
                .ok_or_else(|| CatalogError::not_found(&composite))?;
            validate_no_cycle(&snapshot, composite, source)?;
            Ok(())
        })
    }
}

/// Buckets `items` by category name and lays the buckets out in preference
/// order, uncategorised last. Every `known` category gets a section, empty or
/// not. Items keep their relative order.
fn sections<T>(
    items: Vec<(Option<String>, T)>,
    known: impl IntoIterator<Item = String>,
    preference: &[String],
) -> Vec<Section<T>> {
    let mut buckets = known
        .into_iter()
        .map(|name| (Some(name), Vec::new()))
        .collect::<BTreeMap<Option<String>, Vec<T>>>();
    for (category, item) in items {
        buckets.entry(category).or_default().push(item);
    }
    let uncategorised = buckets.remove(&None);

    let names = buckets.keys().flatten().cloned().collect::<Vec<_>>();
    let mut sections = preferred_order(names, preference)
        .into_iter()
        .map(|name| Section {
            items: buckets.remove(&Some(name.clone())).unwrap_or_default(),
            category: Some(name),
        })
        .collect::<Vec<_>>();
    if let Some(items) = uncategorised {
        sections.push(Section {
            category: None,
            items,
        });
    }
    sections
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ShowOverview> for Catalog<M>
{
    fn query(&self, _: ShowOverview) -> Result<Overview> {
        self.in_transaction(|docs| {
            let snapshot = CatalogSnapshot::load(docs)?;
            let order = CategoryOrder::load(docs)?;
            let dish_categories = Names::<DishCategory>::load(docs)?;
            let preparation_categories = Names::<PreparationCategory>::load(docs)?;
            let product_categories = Names::<Category>::load(docs)?;

            let mut composites = snapshot.composites().collect::<Vec<_>>();
            composites.sort_by(|a, b| a.name.cmp(&b.name));

            let mut costing = Costing::new(&snapshot);
            let mut dishes = Vec::new();
            let mut preparations = Vec::new();
            for composite in composites {
                let id = composite.meta().id;
                match &composite.kind {
                    CompositeKind::Dish { category, .. } => dishes.push((
                        Some(dish_categories.of(category)),
                        DishSummary {
                            id,
                            name: composite.name.clone(),
                            cost_price: costing.composite_cost(id)?,
                            selling_price: costing.selling_price(id)?,
                        },
                    )),
                    CompositeKind::Preparation { category, yields } => preparations.push((
                        category.as_ref().map(|c| preparation_categories.of(c)),
                        PreparationSummary {
                            id,
                            name: composite.name.clone(),
                            yields: yields.clone(),
                            cost_per_unit: costing.composite_cost(id)?,
                        },
                    )),
                }
            }

            let products = product_listings(docs, &snapshot)?
                .into_iter()
                .map(|listing| (Some(listing.category.clone()), listing))
                .collect::<Vec<_>>();

            Ok(Overview {
                dishes: sections(
                    dishes,
                    dish_categories.all(),
                    order.preference(OrderScope::Dishes),
                ),
                preparations: sections(
                    preparations,
                    preparation_categories.all(),
                    order.preference(OrderScope::Preparations),
                ),
                products: sections(
                    products,
                    product_categories.all(),
                    order.preference(OrderScope::Products),
                ),
            })
        })
    }
}
