//! The composition graph: composites point at the preparations their lines
//! use. Walks are iterative with an explicit stack, so nesting depth never
//! touches the call stack, and they colour composites as they go so that a
//! cycle is reported rather than followed.

use std::collections::HashMap;

use infra::ids::Id;

use crate::catalog::models::{Composite, IngredientLine, IngredientSource, Product};
use crate::error::CatalogError;

/// Read access to the records costing needs.
pub trait CostGraph {
    fn product(&self, id: &Id<Product>) -> Option<&Product>;
    fn composite(&self, id: &Id<Composite>) -> Option<&Composite>;
    fn lines(&self, id: &Id<Composite>) -> &[IngredientLine];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    InProgress,
    Resolved,
}

#[derive(Debug)]
enum Step {
    Enter {
        id: Id<Composite>,
        from: Option<Id<Composite>>,
    },
    Exit(Id<Composite>),
}

/// A depth-first walk that remembers which composites it has already
/// finished; reuse one `Walk` to visit each composite at most once.
pub struct Walk<'g, G> {
    graph: &'g G,
    colours: HashMap<Id<Composite>, Colour>,
}

impl<'g, G: CostGraph> Walk<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Walk {
            graph,
            colours: HashMap::new(),
        }
    }

    pub fn is_resolved(&self, id: &Id<Composite>) -> bool {
        self.colours.get(id) == Some(&Colour::Resolved)
    }

    /// Calls `visit` on `root` and every preparation it uses, directly or
    /// not, each one after all of the preparations it uses itself.
    /// Composites finished by an earlier call are skipped. A failed walk
    /// forgets the path it was on, so only finished composites carry over.
    pub fn walk<F>(&mut self, root: Id<Composite>, visit: F) -> Result<(), CatalogError>
    where
        F: FnMut(&'g Composite, &'g [IngredientLine]) -> Result<(), CatalogError>,
    {
        let res = self.walk_from(root, visit);
        if res.is_err() {
            self.colours.retain(|_, colour| *colour == Colour::Resolved);
        }
        res
    }

    fn walk_from<F>(&mut self, root: Id<Composite>, mut visit: F) -> Result<(), CatalogError>
    where
        F: FnMut(&'g Composite, &'g [IngredientLine]) -> Result<(), CatalogError>,
    {
        let graph = self.graph;
        let mut stack = vec![Step::Enter {
            id: root,
            from: None,
        }];

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter { id, from } => match self.colours.get(&id).copied() {
                    Some(Colour::Resolved) => {}
                    Some(Colour::InProgress) => {
                        return Err(self.cycle(id, from.unwrap_or(id)));
                    }
                    None => {
                        graph
                            .composite(&id)
                            .ok_or_else(|| CatalogError::not_found(&id))?;
                        self.colours.insert(id, Colour::InProgress);
                        stack.push(Step::Exit(id));
                        for line in graph.lines(&id).iter().rev() {
                            if let IngredientSource::Preparation(source) = line.source {
                                if !self.is_resolved(&source) {
                                    stack.push(Step::Enter {
                                        id: source,
                                        from: Some(id),
                                    });
                                }
                            }
                        }
                    }
                },
                Step::Exit(id) => {
                    let composite = graph
                        .composite(&id)
                        .ok_or_else(|| CatalogError::not_found(&id))?;
                    visit(composite, graph.lines(&id))?;
                    self.colours.insert(id, Colour::Resolved);
                }
            }
        }
        Ok(())
    }

    fn cycle(&self, composite: Id<Composite>, via: Id<Composite>) -> CatalogError {
        let name = |id: Id<Composite>| {
            self.graph
                .composite(&id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        CatalogError::CycleDetected {
            composite: name(via),
            via: name(composite),
        }
    }
}
