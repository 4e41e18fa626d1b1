// Named render passes
//
// Samples with more than one target (the post effect renders into
// "render_target" and then into "overlay") look passes up by name while
// recording. Passes do not depend on the surface extent, so the registry
// outlives swapchain rebuilds and is released by whoever built it.

use std::collections::HashMap;

use anyhow::{Context, Result};

pub struct RenderPassRegistry<P> {
    passes: HashMap<String, P>,
    /// Registration order, so teardown is reverse-of-creation
    order: Vec<String>,
}

impl<P> Default for RenderPassRegistry<P> {
    fn default() -> Self {
        Self {
            passes: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<P> RenderPassRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass under `name`. Names are unique.
    pub fn register(&mut self, name: &str, pass: P) -> Result<()> {
        if self.passes.contains_key(name) {
            anyhow::bail!("Render pass '{}' is already registered", name);
        }
        self.passes.insert(name.to_string(), pass);
        self.order.push(name.to_string());
        log::debug!("Registered render pass '{}'", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&P> {
        self.passes
            .get(name)
            .with_context(|| format!("Render pass '{}' is not registered", name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Hand every pass to `destroy`, newest first, and empty the registry
    pub fn destroy_all(&mut self, mut destroy: impl FnMut(P)) {
        while let Some(name) = self.order.pop() {
            if let Some(pass) = self.passes.remove(&name) {
                destroy(pass);
            }
        }
    }
}
