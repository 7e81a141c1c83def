//! External policy decision point: delegate authorization decisions to
//! a remote HTTPS endpoint.
//!
//! Three endpoints are consulted — create/modify, allowed-tags, and
//! allowed-scopes — each POSTed a JSON input and expected to answer
//! `{"result": ...}`. Timeouts and malformed responses map to the most
//! restrictive outcome (`NO_ACCESS` / no scopes), never to an error the
//! caller might interpret as permission.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use trellis_model::AccessBlob;
use trellis_query::Query;

use crate::error::PolicyError;
use crate::policy::{AccessPolicy, PolicyFilters};
use crate::principal::Principal;

#[derive(Debug, Deserialize)]
struct ResultHolder<T> {
    result: T,
}

/// Access policy that defers decisions to a remote provider.
pub struct ExternalPolicyDecisionPoint {
    client: reqwest::Client,
    create_node_url: String,
    modify_node_url: String,
    allowed_tags_url: String,
    scopes_url: String,
    /// When set, a node with no access blob short-circuits create and
    /// modify checks with this decision, skipping the remote round trip.
    empty_access_blob_public: Option<bool>,
}

impl ExternalPolicyDecisionPoint {
    pub fn new(
        authorization_provider: &str,
        create_node_endpoint: &str,
        allowed_tags_endpoint: &str,
        scopes_endpoint: &str,
        modify_node_endpoint: Option<&str>,
        empty_access_blob_public: Option<bool>,
    ) -> Result<Self, PolicyError> {
        let base = authorization_provider.trim_end_matches('/');
        let join = |endpoint: &str| format!("{base}/{}", endpoint.trim_start_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| PolicyError::Unresolvable(err.to_string()))?;
        Ok(Self {
            client,
            create_node_url: join(create_node_endpoint),
            modify_node_url: join(modify_node_endpoint.unwrap_or(create_node_endpoint)),
            allowed_tags_url: join(allowed_tags_endpoint),
            scopes_url: join(scopes_endpoint),
            empty_access_blob_public,
        })
    }

    fn build_input(
        principal: Option<&Principal>,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        access_blob: Option<&AccessBlob>,
    ) -> serde_json::Value {
        serde_json::json!({
            "principal": principal.map(|p| serde_json::json!({
                "uuid": p.uuid,
                "type": p.principal_type,
                "identities": p.identities,
            })),
            "access_tags": authn_access_tags,
            "scopes": authn_scopes.iter().collect::<Vec<_>>(),
            "access_blob": access_blob,
        })
    }

    /// POST the input and parse `{"result": T}`. `None` on transport
    /// failure or a response of the wrong shape.
    async fn decision<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        input: &serde_json::Value,
    ) -> Option<T> {
        debug!(%url, "requesting external authorization decision");
        let response = match self.client.post(url).json(input).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(%url, error = %err, "external policy request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(%url, status = %response.status(), "external policy rejected request");
            return None;
        }
        match response.json::<ResultHolder<T>>().await {
            Ok(holder) => Some(holder.result),
            Err(err) => {
                warn!(%url, error = %err, "external policy returned an invalid response");
                None
            }
        }
    }
}

#[async_trait]
impl AccessPolicy for ExternalPolicyDecisionPoint {
    async fn init_node(
        &self,
        principal: &Principal,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        access_blob: Option<&AccessBlob>,
    ) -> Result<(bool, Option<AccessBlob>), PolicyError> {
        if access_blob.is_none() {
            if let Some(decision) = self.empty_access_blob_public {
                return Ok((decision, None));
            }
        }
        let input = Self::build_input(Some(principal), authn_access_tags, authn_scopes, access_blob);
        match self.decision::<bool>(&self.create_node_url, &input).await {
            Some(true) => Ok((false, access_blob.cloned())),
            _ => Err(PolicyError::Denied(
                "permission denied: not able to add the node".to_string(),
            )),
        }
    }

    async fn modify_node(
        &self,
        current: Option<&AccessBlob>,
        principal: &Principal,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        access_blob: &AccessBlob,
    ) -> Result<(bool, AccessBlob), PolicyError> {
        if current == Some(access_blob) {
            return Ok((false, access_blob.clone()));
        }
        let input = Self::build_input(
            Some(principal),
            authn_access_tags,
            authn_scopes,
            Some(access_blob),
        );
        match self.decision::<bool>(&self.modify_node_url, &input).await {
            Some(true) => Ok((false, access_blob.clone())),
            _ => Err(PolicyError::Denied(
                "permission denied: not able to modify the node".to_string(),
            )),
        }
    }

    async fn allowed_scopes(
        &self,
        node_access_blob: Option<&AccessBlob>,
        principal: Option<&Principal>,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
    ) -> Result<HashSet<String>, PolicyError> {
        let input =
            Self::build_input(principal, authn_access_tags, authn_scopes, node_access_blob);
        Ok(self
            .decision::<HashSet<String>>(&self.scopes_url, &input)
            .await
            .unwrap_or_default())
    }

    async fn filters(
        &self,
        principal: Option<&Principal>,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        _scopes: &HashSet<String>,
    ) -> Result<PolicyFilters, PolicyError> {
        let input = Self::build_input(principal, authn_access_tags, authn_scopes, None);
        match self
            .decision::<Vec<String>>(&self.allowed_tags_url, &input)
            .await
        {
            Some(tags) => Ok(PolicyFilters::Queries(vec![Query::AccessBlobFilter {
                user_id: None,
                tags,
            }])),
            None => Ok(PolicyFilters::NoAccess),
        }
    }
}
