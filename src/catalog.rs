//! Types & endpoint-schema catalog: the declarative description of every
//! endpoint a [`crate::Client`] knows how to call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::validate::SchemaValidator;

/// Which HTTP verb (or pseudo-operation) a [`MethodDescriptor`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Download,
    Url,
    Sse,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Post => "post",
            Operation::Put => "put",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
            Operation::Download => "download",
            Operation::Url => "url",
            Operation::Sse => "sse",
        }
    }
}

/// Per-operation schema bundle for a path template (§3).
///
/// `events` only applies to [`Operation::Sse`]: a mapping of event name to
/// the schema validating that event's payload.
#[derive(Clone, Default)]
pub struct MethodDescriptor {
    pub path_schema: Option<Arc<dyn SchemaValidator>>,
    pub search_schema: Option<Arc<dyn SchemaValidator>>,
    pub request_schema: Option<Arc<dyn SchemaValidator>>,
    pub response_schema: Option<Arc<dyn SchemaValidator>>,
    pub events: HashMap<String, Arc<dyn SchemaValidator>>,
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("path_schema", &self.path_schema.is_some())
            .field("search_schema", &self.search_schema.is_some())
            .field("request_schema", &self.request_schema.is_some())
            .field("response_schema", &self.response_schema.is_some())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MethodDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.path_schema = Some(schema);
        self
    }

    pub fn with_search_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.search_schema = Some(schema);
        self
    }

    pub fn with_request_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.request_schema = Some(schema);
        self
    }

    pub fn with_response_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_event(mut self, name: impl Into<String>, schema: Arc<dyn SchemaValidator>) -> Self {
        self.events.insert(name.into(), schema);
        self
    }
}

/// An ordered mapping `path-template -> (operation -> descriptor)`.
///
/// Insertion order is preserved via a parallel `Vec<String>` next to the
/// lookup map, avoiding an `indexmap` dependency the rest of the stack
/// doesn't otherwise need.
#[derive(Default)]
pub struct EndpointCatalog {
    order: Vec<String>,
    entries: HashMap<String, HashMap<Operation, MethodDescriptor>>,
}

impl std::fmt::Debug for EndpointCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointCatalog").field("endpoints", &self.order).finish()
    }
}

impl EndpointCatalog {
    pub fn builder() -> EndpointCatalogBuilder {
        EndpointCatalogBuilder::new()
    }

    pub fn get(&self, template: &str, operation: Operation) -> Option<&MethodDescriptor> {
        self.entries.get(template)?.get(&operation)
    }

    /// Iterate `(template, operation, descriptor)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Operation, &MethodDescriptor)> {
        self.order.iter().flat_map(move |template| {
            self.entries
                .get(template)
                .into_iter()
                .flat_map(move |ops| ops.iter().map(move |(op, desc)| (template.as_str(), *op, desc)))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|ops| ops.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fluent construction of an [`EndpointCatalog`], matching the teacher's
/// `ExecCtxBuilder` idiom.
#[derive(Default)]
pub struct EndpointCatalogBuilder {
    catalog: EndpointCatalog,
}

impl EndpointCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(mut self, template: impl Into<String>, operation: Operation, descriptor: MethodDescriptor) -> Self {
        let template = template.into();
        if !self.catalog.entries.contains_key(&template) {
            self.catalog.order.push(template.clone());
        }
        self.catalog.entries.entry(template).or_default().insert(operation, descriptor);
        self
    }

    pub fn build(self) -> EndpointCatalog {
        self.catalog
    }
}
