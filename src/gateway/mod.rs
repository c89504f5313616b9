//! Gateway server implementation

pub mod filter;
pub mod guard;
pub mod proxy;
pub mod responder;
mod router;
mod server;

pub use filter::{AuthDecision, AuthFilter, RejectReason, auth_filter_middleware};
pub use guard::{RouteGuard, guard_middleware};
pub use proxy::{Proxy, RouteTable};
pub use responder::{AuthRejection, unauthorized};
pub use router::{AppState, create_router};
pub use server::Gateway;
