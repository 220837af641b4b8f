pub mod adapter;
pub mod authorization;
pub mod context;
pub mod listener;
pub mod path;
pub mod supervisor;

pub use adapter::{Adapter, Endpoint, adapt};
pub use authorization::{AuthorizationRequirement, AuthorizationSession, SUPERUSER_ROLES};
pub use context::{AuthorizationContext, AuthorizationOptions, ExecutionContext};
pub use listener::{ControllerRecord, HttpListener, LifecycleState, ListenerError};
pub use path::{join_url, with_prefix};
pub use supervisor::Supervisor;
