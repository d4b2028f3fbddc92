mod demo;
mod middleware;

pub use demo::{DemoSource, build_router};
pub use middleware::{RequestContext, apply_state_status, log_responses, set_request_context};
