//! Builder for wrapping a model in a middleware chain

use std::collections::HashSet;
use std::sync::Arc;

use super::WrappedModel;
use crate::middleware::{Link, Middleware};
use crate::state::{MiddlewareId, StateHooks, Stateful};
use crate::traits::LanguageModel;
use crate::{MimirError, Result};

/// Main entry point for building middleware chains.
pub struct Mimir;

impl Mimir {
    /// Start a chain around `model`.
    pub fn wrap(model: Arc<dyn LanguageModel>) -> MimirBuilder {
        MimirBuilder::new(model)
    }
}

/// Builder collecting chain links in order.
pub struct MimirBuilder {
    model: Arc<dyn LanguageModel>,
    links: Vec<Link>,
}

impl MimirBuilder {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            links: Vec::new(),
        }
    }

    /// Append a plain middleware. Plain links do not take part in snapshots.
    pub fn layer(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.links.push(Link::Plain(middleware));
        self
    }

    /// Append a middleware that occupies a snapshot slot but has no state.
    pub fn stateless_slot(
        mut self,
        id: impl Into<MiddlewareId>,
        middleware: Arc<dyn Middleware>,
    ) -> Self {
        self.links.push(Link::Stateful(Stateful::new(id, middleware)));
        self
    }

    /// Append a stateful middleware under `id`.
    pub fn stateful<M>(mut self, id: impl Into<MiddlewareId>, middleware: Arc<M>) -> Self
    where
        M: Middleware + StateHooks + 'static,
    {
        self.links
            .push(Link::Stateful(Stateful::with_hooks(id, middleware)));
        self
    }

    /// Append a pre-built link.
    pub fn link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Build the chain.
    ///
    /// Fails if two stateful links share an id, since restoration could not
    /// tell their entries apart.
    pub fn build(self) -> Result<WrappedModel> {
        let mut seen = HashSet::new();
        for link in &self.links {
            if let Link::Stateful(s) = link {
                if !seen.insert(s.id().as_str()) {
                    return Err(MimirError::Configuration(format!(
                        "duplicate stateful middleware id '{}'",
                        s.id()
                    )));
                }
            }
        }
        Ok(WrappedModel::new(self.model, self.links))
    }
}
