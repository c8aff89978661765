//! Agent registry — descriptors plus execute handlers, in registration order.
//!
//! Provides:
//! - The [`Agent`] execute contract consumed from concrete agents
//! - Startup-time uniqueness check on [`AgentKind`]
//! - Ordered iteration (the router's tie-break relies on it)
//! - [`FnAgent`], a closure adapter for lightweight agents and test doubles

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::errors::AgentError;
use super::types::{AgentDescriptor, AgentKind, AgentResult};

// ─── Agent Contract ─────────────────────────────────────────────────────────

/// A specialized handler that turns natural-language input into content.
///
/// Return [`AgentError::transient`] for failures worth retrying (rate limits,
/// dropped connections) and [`AgentError::permanent`] for everything else.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(
        &self,
        input: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<AgentResult, AgentError>;
}

type AgentFuture = Pin<Box<dyn Future<Output = Result<AgentResult, AgentError>> + Send>>;

/// Adapts a closure into an [`Agent`].
///
/// The closure receives owned copies of the input and context so the returned
/// future can be `'static`.
pub struct FnAgent<F> {
    f: F,
}

impl<F> FnAgent<F>
where
    F: Fn(String, Option<serde_json::Value>) -> AgentFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Agent for FnAgent<F>
where
    F: Fn(String, Option<serde_json::Value>) -> AgentFuture + Send + Sync,
{
    async fn execute(
        &self,
        input: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<AgentResult, AgentError> {
        (self.f)(input.to_string(), context.cloned()).await
    }
}

/// Build an `Arc<dyn Agent>` from an async closure.
pub fn agent_fn<F, Fut>(f: F) -> Arc<dyn Agent>
where
    F: Fn(String, Option<serde_json::Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AgentResult, AgentError>> + Send + 'static,
{
    Arc::new(FnAgent::new(move |input, ctx| -> AgentFuture {
        Box::pin(f(input, ctx))
    }))
}

// ─── AgentRegistry ──────────────────────────────────────────────────────────

/// A registered agent: its static descriptor and its handler.
#[derive(Clone)]
pub struct RegisteredAgent {
    pub descriptor: AgentDescriptor,
    pub handler: Arc<dyn Agent>,
}

impl std::fmt::Debug for RegisteredAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAgent")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Append-only registry, populated at startup and read by the router.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<RegisteredAgent>,
    /// `kind → index into agents`.
    index: HashMap<AgentKind, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Fails if its kind is already taken.
    pub fn register(
        &mut self,
        descriptor: AgentDescriptor,
        handler: Arc<dyn Agent>,
    ) -> Result<(), AgentError> {
        if self.index.contains_key(&descriptor.kind) {
            return Err(AgentError::DuplicateAgent {
                kind: descriptor.kind,
            });
        }

        tracing::debug!(agent = %descriptor.kind, "registry: agent registered");
        self.index.insert(descriptor.kind.clone(), self.agents.len());
        self.agents.push(RegisteredAgent {
            descriptor,
            handler,
        });
        Ok(())
    }

    pub fn get(&self, kind: &AgentKind) -> Option<&RegisteredAgent> {
        self.index.get(kind).map(|&i| &self.agents[i])
    }

    pub fn contains(&self, kind: &AgentKind) -> bool {
        self.index.contains_key(kind)
    }

    /// Agents in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredAgent> {
        self.agents.iter()
    }

    /// Registered kinds in registration order.
    pub fn kinds(&self) -> Vec<AgentKind> {
        self.agents.iter().map(|a| a.descriptor.kind.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
