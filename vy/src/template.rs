//! Memoized template rendering

use handlebars::Handlebars;
use tracing::debug;

use crate::context::RunContext;
use crate::error::EngineError;

/// Compiles each template once and renders it against the run context
///
/// The Handlebars registry doubles as the memo store: a template is
/// registered under its stable key on first use and looked up by key
/// afterwards. Keys come from [`RequestDefinition`]'s key derivation,
/// so the same definition field always hits the same compiled template.
///
/// [`RequestDefinition`]: crate::definition::RequestDefinition
pub struct TemplateCache {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
}

impl TemplateCache {
    pub fn new() -> Self {
        let mut hbs = Handlebars::new();
        // rendered output goes on the wire verbatim, never into HTML
        hbs.register_escape_fn(handlebars::no_escape);
        Self { hbs }
    }

    /// Render `source` against `ctx`, compiling it under `key` on first use
    ///
    /// Unresolvable references render as empty text, so templates that
    /// read `last_response` work before the first response exists.
    /// Syntax errors in `source` fail the compile and are fatal.
    pub fn render(
        &mut self,
        key: &str,
        source: &str,
        ctx: &RunContext,
    ) -> Result<String, EngineError> {
        if !self.hbs.has_template(key) {
            debug!(key, "compiling template");
            self.hbs.register_template_string(key, source)?;
        }
        Ok(self.hbs.render(key, ctx)?)
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}
