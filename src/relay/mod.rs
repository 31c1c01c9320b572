pub mod oauth;
pub mod tunnel;

pub use oauth::TokenCache;
pub use tunnel::{TunnelHandle, TunnelSupervisor, tunnel_key};
