pub mod emitter;
pub mod error;
pub mod http;
pub mod jsonrpc;
pub mod logging;
pub mod router;
pub mod session;
pub mod streaming;

pub use error::{ApiJson, ErrorResponse, GatewayError};
pub use http::{build_router, start_server, ServerConfig, ServerHandle, ServerState};
pub use jsonrpc::{RpcError, RpcRequest, RpcResponse};
pub use logging::{init_tracing, LogConfig};
pub use session::{Dispatch, DispatchContext, Session, SessionStore, SessionStoreConfig};
pub use streaming::create_sse_stream;
