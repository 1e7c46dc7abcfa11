//! The iteration controller
//!
//! Drives advance -> bind -> exchange -> normalize/evaluate -> dispatch
//! until a stop condition matches, a list runs dry, or the iteration
//! bound is hit. Every fault is fatal; nothing is retried.

use std::time::Duration;

use reqwest::Url;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::definition::RequestDefinition;
use crate::error::EngineError;
use crate::feed::ListFeed;
use crate::response::ResponseSummary;
use crate::stop::StopConditions;
use crate::template::TemplateCache;
use crate::transport::{BoundRequest, NetTransport, Transport};

/// Engine knobs beyond the definition itself
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling on iterations for every run
    pub max_iterations: usize,
    /// Per-exchange deadline, covering the WebSocket dial too
    pub timeout: Duration,
    /// Outbound HTTP proxy URL
    pub proxy: Option<String>,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            timeout: Duration::from_secs(30),
            proxy: None,
            insecure: false,
        }
    }
}

/// Outcome of a run that ended on a stop-condition match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Exchanges performed, final one included
    pub iterations: usize,
}

/// One loaded definition plus everything needed to run it
pub struct Engine {
    definition: RequestDefinition,
    config: EngineConfig,
    templates: TemplateCache,
    stop: StopConditions,
    feed: ListFeed,
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("definition", &self.definition)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine for `definition`
    ///
    /// Stop conditions compile here and the HTTP client is constructed
    /// here, so malformed filters and a bad proxy URL fail before any
    /// request is sent.
    pub fn new(definition: RequestDefinition, config: EngineConfig) -> Result<Self, EngineError> {
        let stop = StopConditions::compile(&definition.stop_when)?;
        let feed = ListFeed::new(&definition.lists);
        let transport = Box::new(NetTransport::new(&config)?);
        Ok(Self {
            definition,
            config,
            templates: TemplateCache::new(),
            stop,
            feed,
            transport,
        })
    }

    /// Replace the production transport, mainly for tests
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Drive the loop until a stop condition matches or the run faults
    ///
    /// `on_response` sees every raw response body, the matching one
    /// included. It returns nothing on purpose: sink failures are the
    /// caller's business and never change the continuation decision.
    /// Any persistent connection is closed before this returns.
    pub async fn run<F>(
        &mut self,
        ctx: &mut RunContext,
        mut on_response: F,
    ) -> Result<RunReport, EngineError>
    where
        F: FnMut(&[u8]),
    {
        let result = self.run_inner(ctx, &mut on_response).await;
        self.transport.shutdown().await;
        result
    }

    async fn run_inner<F>(
        &mut self,
        ctx: &mut RunContext,
        on_response: &mut F,
    ) -> Result<RunReport, EngineError>
    where
        F: FnMut(&[u8]),
    {
        for iteration in 0..self.config.max_iterations {
            ctx.advance(iteration, &self.feed)?;
            let bound = self.bind(ctx)?;
            debug!(iteration, url = %bound.url, "exchange");

            if iteration == 0 && !bound.setup_body.is_empty() {
                self.transport.setup(&bound).await?;
            }

            let raw = self.transport.exchange(&bound).await?;
            let summary = ResponseSummary::from_raw(&raw);
            let stop = !self.stop.should_continue(&summary)?;
            ctx.last_response = summary;

            on_response(&raw.body);

            if stop {
                let iterations = iteration + 1;
                info!(iterations, "stop condition satisfied");
                return Ok(RunReport { iterations });
            }
        }
        Err(EngineError::IterationLimit(self.config.max_iterations))
    }

    /// Render iteration 0 without sending anything
    pub fn preview(&mut self, ctx: &mut RunContext) -> Result<BoundRequest, EngineError> {
        ctx.advance(0, &self.feed)?;
        self.bind(ctx)
    }

    /// Render every field of the definition against the current context
    fn bind(&mut self, ctx: &RunContext) -> Result<BoundRequest, EngineError> {
        let url_text = self
            .templates
            .render(&self.definition.url_key(), &self.definition.url, ctx)?;
        let url: Url = url_text.parse().map_err(|e| EngineError::InvalidUrl {
            url: url_text.clone(),
            reason: format!("{e}"),
        })?;

        let mut headers = Vec::with_capacity(self.definition.headers.len());
        for (index, (name_template, value_template)) in self.definition.headers.iter().enumerate()
        {
            let name = self.templates.render(
                &self.definition.header_name_key(index),
                name_template,
                ctx,
            )?;
            let value = self.templates.render(
                &self.definition.header_value_key(index),
                value_template,
                ctx,
            )?;
            headers.push((name, value));
        }

        let body = self
            .templates
            .render(&self.definition.body_key(), &self.definition.body, ctx)?;
        let setup_body = if self.definition.setup_body.is_empty() {
            String::new()
        } else {
            self.templates.render(
                &self.definition.setup_body_key(),
                &self.definition.setup_body,
                ctx,
            )?
        };

        let method = if self.definition.method.is_empty() {
            "GET".to_string()
        } else {
            self.definition.method.clone()
        };

        let bound = BoundRequest {
            method,
            url,
            headers,
            body,
            setup_body,
        };
        // unsupported schemes fail here, before anything is sent
        bound.scheme()?;
        Ok(bound)
    }
}
