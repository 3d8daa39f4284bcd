//! Authentication module
//!
//! Validates the bearer tokens presented by real-time connections and REST
//! calls. Tokens are issued by the external identity service.

pub mod jwt;

pub use jwt::{Claims, JwtConfig, JwtError, JwtService};
