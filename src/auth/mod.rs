pub mod claims;
pub mod context;
pub mod middleware;

pub use claims::{ActorRole, Claims};
pub use context::AuthContext;
pub use middleware::RequireAuth;
