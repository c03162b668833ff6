//! Static tool directory.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::{Arguments, Error, Result, ToolDescriptor, ToolFailure, ToolRef};

/// Underlying tool function.
pub type ToolFn = Arc<dyn Fn(&Arguments) -> std::result::Result<Value, ToolFailure> + Send + Sync>;

pub(crate) struct Entry {
    pub(crate) descriptor: Arc<ToolDescriptor>,
    pub(crate) handler: ToolFn,
}

/// Filters for [`Catalog::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub category: Option<String>,
    pub server: Option<String>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Read-only directory of servers and their tools.
///
/// Entries keep registration order; lookups go through a two-level
/// `server -> name -> entry` table built once by [`CatalogBuilder`].
pub struct Catalog {
    entries: Vec<Entry>,
    index: HashMap<String, HashMap<String, usize>>,
    servers: Vec<String>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// A catalog with no tools.
    pub fn empty() -> Self {
        CatalogBuilder::default().build()
    }

    /// Server names in the order they were first registered.
    pub fn list_servers(&self) -> Vec<String> {
        self.servers.clone()
    }

    /// Every tool of `server`, in registration order.
    pub fn list_tools(&self, server: &str) -> Vec<ToolDescriptor> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.server == server)
            .map(|e| (*e.descriptor).clone())
            .collect()
    }

    /// Case-insensitive substring search over tool names and descriptions.
    pub fn search(&self, query: &SearchQuery) -> Vec<ToolDescriptor> {
        let needle = query.query.to_lowercase();
        self.entries
            .iter()
            .map(|e| &e.descriptor)
            .filter(|d| query.server.as_deref().is_none_or(|s| d.server == s))
            .filter(|d| {
                query
                    .category
                    .as_deref()
                    .is_none_or(|c| d.category.as_deref() == Some(c))
            })
            .filter(|d| {
                needle.is_empty()
                    || d.name.to_lowercase().contains(&needle)
                    || d.description.to_lowercase().contains(&needle)
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|d| (**d).clone())
            .collect()
    }

    pub fn get(&self, server: &str, name: &str) -> Option<&ToolDescriptor> {
        self.entry(server, name).map(|e| e.descriptor.as_ref())
    }

    pub fn contains(&self, server: &str, name: &str) -> bool {
        self.entry(server, name).is_some()
    }

    /// All descriptors, in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|e| e.descriptor.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry(&self, server: &str, name: &str) -> Option<&Entry> {
        self.index
            .get(server)
            .and_then(|tools| tools.get(name))
            .map(|&i| &self.entries[i])
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("servers", &self.servers)
            .field("tools", &self.entries.len())
            .finish()
    }
}

/// Collects tool registrations and produces an immutable [`Catalog`].
#[derive(Default)]
pub struct CatalogBuilder {
    entries: Vec<Entry>,
    index: HashMap<String, HashMap<String, usize>>,
    servers: Vec<String>,
}

impl CatalogBuilder {
    /// Register a tool. Fails if `(server, name)` is already taken.
    pub fn register<F>(&mut self, descriptor: ToolDescriptor, handler: F) -> Result<&mut Self>
    where
        F: Fn(&Arguments) -> std::result::Result<Value, ToolFailure> + Send + Sync + 'static,
    {
        let tools = self.index.entry(descriptor.server.clone()).or_default();
        if tools.contains_key(&descriptor.name) {
            return Err(Error::DuplicateTool(descriptor.tool_ref()));
        }
        tools.insert(descriptor.name.clone(), self.entries.len());

        if !self.servers.contains(&descriptor.server) {
            self.servers.push(descriptor.server.clone());
        }

        tracing::trace!(tool = %descriptor.tool_ref(), "registered tool");
        self.entries.push(Entry {
            descriptor: Arc::new(descriptor),
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, descriptor: ToolDescriptor, handler: F) -> Result<Self>
    where
        F: Fn(&Arguments) -> std::result::Result<Value, ToolFailure> + Send + Sync + 'static,
    {
        self.register(descriptor, handler)?;
        Ok(self)
    }

    pub fn build(self) -> Catalog {
        Catalog {
            entries: self.entries,
            index: self.index,
            servers: self.servers,
        }
    }
}

impl ToolRef {
    /// Resolve this reference against `catalog`.
    pub fn resolve<'a>(&self, catalog: &'a Catalog) -> Result<&'a ToolDescriptor> {
        catalog
            .get(&self.server, &self.name)
            .ok_or_else(|| Error::ToolNotFound(self.clone()))
    }
}
