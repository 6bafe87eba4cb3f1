pub mod config;
pub mod error;
pub mod identity;
pub mod jwks;
pub mod jwt;
pub mod keycloak;
pub mod openid;

// Re-export primary public types for convenience.
pub use config::SecurityConfig;
pub use error::SecurityError;
pub use identity::{
    AuthenticatedUser, DefaultIdentityBuilder, DefaultRoleExtractor, IdentityBuilder,
    IdentityBuilderWith,
};
pub use jwks::JwksCache;
pub use jwt::{JwtClaimsValidator, JwtValidator};

// Re-export the base RoleExtractor trait at crate root for convenience.
pub use openid::RoleExtractor;

pub mod prelude {
    //! Re-exports of the most commonly used security types.
    pub use crate::{AuthenticatedUser, JwtValidator, SecurityConfig};
}
