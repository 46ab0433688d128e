//! Resource registration and path lookup.

use crate::error::DispatchError;
use bitflags::bitflags;
use bytes::Bytes;
use coaps_wire::{Code, ContentFormat, Method};
use std::fmt;

bitflags! {
    /// Set of methods a resource accepts
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Methods: u8 {
        /// GET
        const GET = 1 << 0;
        /// POST
        const POST = 1 << 1;
        /// PUT
        const PUT = 1 << 2;
        /// DELETE
        const DELETE = 1 << 3;
    }
}

impl Methods {
    /// Whether `method` is in the set
    pub fn allows(self, method: Method) -> bool {
        self.contains(Self::from(method))
    }
}

impl From<Method> for Methods {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Methods::GET,
            Method::Post => Methods::POST,
            Method::Put => Methods::PUT,
            Method::Delete => Methods::DELETE,
        }
    }
}

/// What a handler produces for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    /// Response status
    pub code: Code,
    /// Payload format, if any
    pub content_format: Option<ContentFormat>,
    /// Response payload
    pub payload: Bytes,
}

impl HandlerResponse {
    /// 2.05 Content with a payload
    pub fn content(format: ContentFormat, payload: Bytes) -> Self {
        Self {
            code: Code::CONTENT,
            content_format: Some(format),
            payload,
        }
    }

    /// A bare status with no payload
    pub fn status(code: Code) -> Self {
        Self {
            code,
            content_format: None,
            payload: Bytes::new(),
        }
    }
}

/// Domain logic behind one resource
pub trait ResourceHandler {
    /// Map a request method and payload to a response
    fn handle(&self, method: Method, payload: &[u8]) -> HandlerResponse;
}

impl<F> ResourceHandler for F
where
    F: Fn(Method, &[u8]) -> HandlerResponse,
{
    fn handle(&self, method: Method, payload: &[u8]) -> HandlerResponse {
        self(method, payload)
    }
}

/// A path-addressed handler
pub struct Resource {
    path: Vec<String>,
    methods: Methods,
    handler: Box<dyn ResourceHandler>,
    content_format: Option<ContentFormat>,
    resource_type: Option<String>,
    title: Option<String>,
}

impl Resource {
    /// Create a resource from a closure
    pub fn new<F>(path: &str, methods: Methods, handler: F) -> Self
    where
        F: Fn(Method, &[u8]) -> HandlerResponse + 'static,
    {
        Self::with_handler(path, methods, Box::new(handler))
    }

    /// Create a resource from any boxed handler
    pub fn with_handler(path: &str, methods: Methods, handler: Box<dyn ResourceHandler>) -> Self {
        Self {
            path: split_path(path),
            methods,
            handler,
            content_format: None,
            resource_type: None,
            title: None,
        }
    }

    /// Advertise a content format in link-format listings
    pub fn content_format(mut self, format: ContentFormat) -> Self {
        self.content_format = Some(format);
        self
    }

    /// Advertise a resource type (`rt=`)
    pub fn resource_type(mut self, rt: &str) -> Self {
        self.resource_type = Some(rt.to_string());
        self
    }

    /// Advertise a human readable title
    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Path segments
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Allowed methods
    pub fn methods(&self) -> Methods {
        self.methods
    }

    /// Run the handler
    pub fn handle(&self, method: Method, payload: &[u8]) -> HandlerResponse {
        self.handler.handle(method, payload)
    }

    /// CoRE link-format entry, e.g. `</time>;ct=0;rt="clock"`
    pub fn link(&self) -> String {
        let mut link = format!("</{}>", self.path.join("/"));
        if let Some(format) = self.content_format {
            link.push_str(&format!(";ct={}", format.0));
        }
        if let Some(ref rt) = self.resource_type {
            link.push_str(&format!(";rt=\"{}\"", rt));
        }
        if let Some(ref title) = self.title {
            link.push_str(&format!(";title=\"{}\"", title));
        }
        link
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// Static table of resources, fixed after start-up
#[derive(Debug, Default)]
pub struct ResourceTable {
    resources: Vec<Resource>,
}

impl ResourceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; paths must be unique
    pub fn register(&mut self, resource: Resource) -> Result<(), DispatchError> {
        let joined = resource.path.join("/");
        if resource.methods.is_empty() {
            return Err(DispatchError::NoMethods(joined));
        }
        if self.lookup(&resource.path).is_some() {
            return Err(DispatchError::DuplicateResource(joined));
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Exact segment match
    pub fn lookup(&self, path: &[String]) -> Option<&Resource> {
        self.resources.iter().find(|r| r.path == path)
    }

    /// Link-format listing of every resource in registration order
    pub fn link_format(&self) -> String {
        self.resources
            .iter()
            .map(Resource::link)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterate over resources
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}
