mod dispatch;
mod lifecycle;
mod manager;
mod session;

pub use dispatch::{Dispatch, DispatchContext, ServerInfo};
pub use lifecycle::PendingInvocation;
pub use manager::{start_reaper, SessionStore, SessionStoreConfig};
pub use session::{Session, SessionId};
