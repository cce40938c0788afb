pub mod client_id;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod hypermedia;
pub mod middleware;
pub mod negotiation;
pub mod rate_limiter;
pub mod renderers;
pub mod response;
pub mod router;
pub mod server;
pub mod tenso;

pub use config::{ApiConfig, Config};
pub use error::{Result, TensoError};
pub use gate::{Anonymous, Authenticator};
pub use response::Representation;
pub use router::{Handler, Reply, RequestContext};
pub use server::create_app;
pub use tenso::{Tenso, TensoBuilder};
