//! The fixed scope vocabulary.

use std::collections::HashSet;

pub const READ_METADATA: &str = "read:metadata";
pub const READ_DATA: &str = "read:data";
pub const WRITE_METADATA: &str = "write:metadata";
pub const WRITE_DATA: &str = "write:data";
pub const CREATE_NODE: &str = "create:node";
pub const DELETE_NODE: &str = "delete:node";
pub const DELETE_REVISION: &str = "delete:revision";
pub const REGISTER: &str = "register";
pub const METRICS: &str = "metrics";
pub const CREATE_APIKEYS: &str = "create:apikeys";
pub const REVOKE_APIKEYS: &str = "revoke:apikeys";
pub const ADMIN_APIKEYS: &str = "admin:apikeys";
pub const READ_PRINCIPALS: &str = "read:principals";
pub const WRITE_PRINCIPALS: &str = "write:principals";

/// The API-key metascope meaning "all current principal scopes at time
/// of use".
pub const INHERIT: &str = "inherit";

pub const ALL_SCOPES: &[&str] = &[
    READ_METADATA,
    READ_DATA,
    WRITE_METADATA,
    WRITE_DATA,
    CREATE_NODE,
    DELETE_NODE,
    DELETE_REVISION,
    REGISTER,
    METRICS,
    CREATE_APIKEYS,
    REVOKE_APIKEYS,
    ADMIN_APIKEYS,
    READ_PRINCIPALS,
    WRITE_PRINCIPALS,
];

/// Scopes conferred by the `public` tag.
pub const PUBLIC_SCOPES: &[&str] = &[READ_METADATA, READ_DATA];

/// Scopes of the default `user` role.
pub const USER_SCOPES: &[&str] = &[
    READ_METADATA,
    READ_DATA,
    WRITE_METADATA,
    WRITE_DATA,
    CREATE_NODE,
    DELETE_NODE,
    DELETE_REVISION,
    REGISTER,
    METRICS,
    CREATE_APIKEYS,
    REVOKE_APIKEYS,
];

pub fn all_scopes() -> HashSet<String> {
    ALL_SCOPES.iter().map(|s| s.to_string()).collect()
}

pub fn public_scopes() -> HashSet<String> {
    PUBLIC_SCOPES.iter().map(|s| s.to_string()).collect()
}

pub fn user_scopes() -> HashSet<String> {
    USER_SCOPES.iter().map(|s| s.to_string()).collect()
}

pub fn is_known_scope(scope: &str) -> bool {
    scope == INHERIT || ALL_SCOPES.contains(&scope)
}
