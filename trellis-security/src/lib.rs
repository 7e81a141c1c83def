//! Security module: principals, sessions, API keys, tokens, and the
//! authorization engine.
//!
//! Authentication establishes a [`Principal`] with a set of *authn
//! scopes* (from its roles, possibly narrowed by an API key). The
//! authorization engine — an [`AccessPolicy`] — then decides, per node,
//! which scopes apply and how listings must be filtered.

pub mod apikeys;
pub mod device;
pub mod error;
pub mod external;
pub mod policy;
pub mod principal;
pub mod provider;
pub mod scopes;
pub mod store;
pub mod tags;
pub mod tokens;

pub use apikeys::{generate_secret, hash_secret, ApiKeyParams};
pub use device::{format_user_code, generate_device_code, normalize_user_code, DeviceCodeGrant};
pub use error::{PolicyError, SecurityError};
pub use external::ExternalPolicyDecisionPoint;
pub use policy::{AccessPolicy, OpenAccessPolicy, PolicyFilters, TagBasedPolicy};
pub use principal::{ApiKey, Identity, Principal, PrincipalType, Role, Session};
pub use provider::{AuthProvider, ToyPasswordProvider};
pub use store::{AuthnStore, RevokeOutcome};
pub use tags::{TagDef, TagTable};
pub use tokens::{AccessClaims, RefreshClaims, TokenConfig};
