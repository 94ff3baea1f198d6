//! Centrix Admin: configuration-driven model administration over HTTP.
//!
//! Each entity is described once by a [`ModelHandler`]: its fields, how they
//! are listed, filtered, searched, validated, and which relations expand or
//! sync on save. A single generic controller ([`crud`]) serves every
//! registered handler through [`routes::admin_router`].

pub mod auth;
pub mod cast;
pub mod crud;
pub mod db;
pub mod error;
pub mod events;
pub mod field;
pub mod files;
pub mod handler;
pub mod metrics;
pub mod params;
pub mod payload;
pub mod persist;
pub mod policy;
pub mod query;
pub mod registry;
pub mod routes;
pub mod rules;
pub mod sql;
pub mod state;
pub mod transform;

pub use auth::TokenVerifier;
pub use error::{AdminError, ValidationErrors};
pub use events::{AuditEntry, AuditEvent, AuditSink, ChannelAuditSink, TracingAuditSink};
pub use field::{Expand, FieldConfig, FieldKind, RelationConfig, RelationKind, View};
pub use files::FileStore;
pub use handler::{
    Action, ActionContext, ActionTarget, Condition, ModelHandler, SaveContext, SaveHook, SaveMode,
};
pub use params::{ListParams, Pagination};
pub use persist::Attributes;
pub use policy::{Ability, AllowAll, Policy, Principal, RolePolicy};
pub use registry::ModelHandlerRegistry;
pub use routes::admin_router;
pub use rules::Rule;
pub use sql::{BindValue, Record};
pub use state::AdminState;
