//! mockd - Configurable HTTP Mock Server Core
//!
//! Operators register mock definitions (request-matching rules plus a
//! response template); for every inbound request the resolver picks the
//! first matching definition and synthesizes a response from it.
//!
//! # Features
//!
//! - **Request Matching**: Match by path (with `:param` segments), method,
//!   query params and conditions over query, headers, body or params
//! - **Dynamic Templates**: Handlebars templates with request context and
//!   fresh generators (`{{uuid}}`, `{{timestamp}}`, `{{now}}`)
//! - **Latency Simulation**: Per-mock delay that does not block other requests
//! - **Request Log**: Every resolution is appended to a persisted log
//! - **Document Store**: A single JSON document with serialized writes
//!
//! # Example Definition
//!
//! ```yaml
//! - path: /users/:id
//!   method: GET
//!   conditions:
//!     - source: query
//!       field: debug
//!       operator: exists
//!   response:
//!     status: 200
//!     latency: 50
//!     body:
//!       id: "{{request.params.id}}"
//!       requestId: "{{uuid}}"
//! ```

pub mod admin;
pub mod backup;
pub mod condition;
pub mod config;
pub mod error;
pub mod matcher;
pub mod model;
pub mod resolver;
pub mod store;
pub mod template;
pub mod validation;

pub use admin::{AdminError, MockAdmin};
pub use config::MockServerConfig;
pub use error::{StoreError, TemplateError};
pub use model::{Condition, LogEntry, MockDefinition, MockRequest};
pub use resolver::{MockResolver, MockResponse, Resolution};
pub use store::{DocumentStore, JsonStore};
pub use template::{TemplateEngine, TemplateValue};
