pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod router;
pub mod server;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use logging::AccessLog;
pub use router::{Target, TargetKind, TargetResolver};
pub use server::{build_router, AppState};
