// src/resolver.rs

//! Dependency ordering
//!
//! Computes the order in which a package and its transitive dependencies
//! must be installed: every dependency comes before the packages that need
//! it and the requested package comes last.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use std::collections::HashSet;
use tracing::debug;

/// Depth-first resolver over a catalog
pub struct Resolver<'a> {
    catalog: &'a Catalog,
}

struct Walk {
    visited: HashSet<String>,
    stack: Vec<String>,
    order: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Installation order for `name`, ending with `name`
    ///
    /// Names missing from the catalog are leaves; reporting them is up to
    /// the caller. A cycle yields `CyclicDependency` with the cycle path.
    pub fn resolve(&self, name: &str) -> Result<Vec<String>> {
        let mut walk = Walk {
            visited: HashSet::new(),
            stack: Vec::new(),
            order: Vec::new(),
        };
        self.visit(name, &mut walk)?;
        debug!("Resolved {}: {}", name, walk.order.join(" -> "));
        Ok(walk.order)
    }

    fn visit(&self, name: &str, walk: &mut Walk) -> Result<()> {
        walk.visited.insert(name.to_string());
        walk.stack.push(name.to_string());

        if let Some(metadata) = self.catalog.get(name) {
            for dep in &metadata.dependencies {
                if let Some(start) = walk.stack.iter().position(|n| n == dep) {
                    let mut cycle = walk.stack[start..].to_vec();
                    cycle.push(dep.clone());
                    return Err(Error::CyclicDependency(cycle));
                }
                if !walk.visited.contains(dep) {
                    self.visit(dep, walk)?;
                }
            }
        }

        walk.stack.pop();
        walk.order.push(name.to_string());
        Ok(())
    }

    /// Dependencies of `name` (transitively) that the catalog does not know
    pub fn missing(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .resolve(name)?
            .into_iter()
            .filter(|n| n != name && !self.catalog.contains(n))
            .collect())
    }
}
