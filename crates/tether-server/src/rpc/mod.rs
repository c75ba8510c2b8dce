//! JSON-RPC dispatch: router, handler errors, default handlers, tool seam.

pub mod errors;
pub mod handlers;
pub mod router;
pub mod tools;

pub use errors::HandlerError;
pub use router::{DispatchContext, MethodHandler, ServerDispatchRouter};
pub use tools::ToolInvoker;
