use rust_decimal::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

/// Package unit assumed when none is given: a count of pieces.
pub const DEFAULT_PACKAGE_UNIT: &str = "Stuks";

/// A purchasable base item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Product {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<Product>,
    pub name: String,
    pub category: Id<Category>,
    pub supplier: Id<Supplier>,
    pub package: Package,
    #[serde(default)]
    pub article_number: Option<String>,
}

/// How a product is bought. A missing price or weight means the unit price is
/// not known yet.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Package {
    pub weight: Option<f64>,
    pub unit: String,
    pub price: Option<f64>,
}

/// A dish or a preparation: anything costed from its ingredient lines.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Composite {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<Composite>,
    pub name: String,
    #[serde(flatten)]
    pub kind: CompositeKind,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompositeKind {
    Dish {
        category: Id<DishCategory>,
        markup: Markup,
    },
    Preparation {
        category: Option<Id<PreparationCategory>>,
        #[serde(rename = "yield")]
        yields: Yield,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarkupKind {
    Percentage,
    Multiplier,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Markup {
    pub kind: MarkupKind,
    pub value: Option<f64>,
}

/// What one batch of a preparation produces, e.g. 1.5 L of sauce.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Yield {
    pub quantity: f64,
    pub unit: String,
}

/// `quantity` of one source used in the `parent` composite.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IngredientLine {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<IngredientLine>,
    pub parent: Id<Composite>,
    pub source: IngredientSource,
    pub quantity: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IngredientSource {
    Product(Id<Product>),
    Preparation(Id<Composite>),
}

/// A name-only grouping; each implementation is its own namespace.
pub trait Group: Entity + HasMeta + Serialize + DeserializeOwned {
    const LABEL: &'static str;
    fn new(id: Id<Self>, name: &str) -> Self;
    fn name(&self) -> &str;
}

macro_rules! named_group {
    ($name:ident, $prefix:expr, $label:expr) => {
        #[derive(Deserialize, Serialize, Debug, Clone)]
        pub struct $name {
            #[serde(flatten)]
            pub(crate) meta: DocMeta<$name>,
            pub name: String,
        }

        impl Entity for $name {
            const PREFIX: &'static str = $prefix;
        }

        impl HasMeta for $name {
            fn meta(&self) -> &DocMeta<Self> {
                &self.meta
            }
            fn meta_mut(&mut self) -> &mut DocMeta<Self> {
                &mut self.meta
            }
        }

        impl Group for $name {
            const LABEL: &'static str = $label;

            fn new(id: Id<Self>, name: &str) -> Self {
                $name {
                    meta: DocMeta::new_with_id(id),
                    name: name.to_string(),
                }
            }

            fn name(&self) -> &str {
                &self.name
            }
        }
    };
}

named_group!(Category, "product_category", "product category");
named_group!(DishCategory, "dish_category", "dish category");
named_group!(PreparationCategory, "preparation_category", "preparation category");
named_group!(Supplier, "supplier", "supplier");

impl Product {
    pub fn new(
        id: Id<Product>,
        name: &str,
        category: Id<Category>,
        supplier: Id<Supplier>,
        package: Package,
    ) -> Self {
        Product {
            meta: DocMeta::new_with_id(id),
            name: name.to_string(),
            category,
            supplier,
            package,
            article_number: None,
        }
    }
}

impl Package {
    pub fn priced(price: f64, weight: f64, unit: &str) -> Self {
        Package {
            weight: Some(weight),
            unit: unit.to_string(),
            price: Some(price),
        }
    }
}

impl Default for Package {
    fn default() -> Self {
        Package {
            weight: None,
            unit: DEFAULT_PACKAGE_UNIT.to_string(),
            price: None,
        }
    }
}

impl Composite {
    pub fn dish(id: Id<Composite>, name: &str, category: Id<DishCategory>, markup: Markup) -> Self {
        Composite {
            meta: DocMeta::new_with_id(id),
            name: name.to_string(),
            kind: CompositeKind::Dish { category, markup },
        }
    }

    pub fn preparation(
        id: Id<Composite>,
        name: &str,
        category: Option<Id<PreparationCategory>>,
        yields: Yield,
    ) -> Self {
        Composite {
            meta: DocMeta::new_with_id(id),
            name: name.to_string(),
            kind: CompositeKind::Preparation { category, yields },
        }
    }

    pub fn is_preparation(&self) -> bool {
        match self.kind {
            CompositeKind::Preparation { .. } => true,
            CompositeKind::Dish { .. } => false,
        }
    }
}

impl Markup {
    pub fn percentage(value: f64) -> Self {
        Markup {
            kind: MarkupKind::Percentage,
            value: Some(value),
        }
    }

    pub fn multiplier(value: f64) -> Self {
        Markup {
            kind: MarkupKind::Multiplier,
            value: Some(value),
        }
    }

    /// Selling price for `cost`, or `None` when it does not fit in a `Decimal`.
    /// An unknown kind or a missing value means no markup.
    pub fn apply(&self, cost: Decimal) -> Option<Decimal> {
        match (self.kind, self.value) {
            (MarkupKind::Percentage, Some(value)) => {
                let share = Decimal::from_f64(value)?.checked_div(Decimal::ONE_HUNDRED)?;
                cost.checked_mul(Decimal::ONE.checked_add(share)?)
            }
            (MarkupKind::Multiplier, Some(value)) => cost.checked_mul(Decimal::from_f64(value)?),
            _ => Some(cost),
        }
    }
}

impl Default for Markup {
    fn default() -> Self {
        Markup {
            kind: MarkupKind::Percentage,
            value: Some(0.0),
        }
    }
}

impl Yield {
    pub fn of(quantity: f64, unit: &str) -> Self {
        Yield {
            quantity,
            unit: unit.to_string(),
        }
    }
}

impl IngredientLine {
    pub fn new(
        id: Id<IngredientLine>,
        parent: Id<Composite>,
        source: IngredientSource,
        quantity: f64,
    ) -> Self {
        IngredientLine {
            meta: DocMeta::new_with_id(id),
            parent,
            source,
            quantity,
        }
    }
}

impl Entity for Product {
    const PREFIX: &'static str = "product";
}

impl HasMeta for Product {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Entity for Composite {
    const PREFIX: &'static str = "composite";
}

impl HasMeta for Composite {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Entity for IngredientLine {
    const PREFIX: &'static str = "ingredient";
}

impl HasMeta for IngredientLine {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}
