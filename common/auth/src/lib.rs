pub mod claims;
pub mod codec;
pub mod config;
pub mod error;
pub mod extractors;
pub mod guards;

pub use claims::{Claims, TokenKind, TokenSubject};
pub use codec::TokenCodec;
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult};
pub use extractors::{authenticate, require_auth, AuthContext};
pub use guards::{ensure_permission, require_permission, PermissionStore, RequiredPermission};
