use crate::{
    data::*,
    route::Route,
};
use anyhow::{anyhow, Result};
use ocmt_core::{
    capability::{ListSnapshotsRequest, RevocationRequest},
    data::{CapabilityId, ContainerId},
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

/// An HTTP client for the relay, authenticating as one container via its
/// gateway token. WebSocket subscription is transport-specific and left to
/// the caller; everything else the relay exposes is reachable from here.
pub struct RelayClient {
    api_base: Url,
    container_id: ContainerId,
    gateway_token: String,
    client: reqwest::Client,
}

impl RelayClient {
    pub fn new(api_base: Url, container_id: ContainerId, gateway_token: String) -> Self {
        RelayClient {
            api_base,
            container_id,
            gateway_token,
            client: reqwest::Client::new(),
        }
    }

    fn route_url(&self, route: Route) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.set_path(&route.to_string());
        url.set_query(None);
        Ok(url)
    }

    fn request(&self, method: Method, route: Route) -> Result<RequestBuilder> {
        Ok(self
            .client
            .request(method, self.route_url(route)?)
            .bearer_auth(&self.gateway_token)
            .header(headers::CONTAINER_ID, self.container_id.to_string()))
    }

    async fn expect_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error = response
            .json::<ErrorResponse>()
            .await
            .unwrap_or_else(|_| ErrorResponse {
                error: status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
                details: None,
            });
        debug!("Relay rejected request: {} {}", status, error.error);
        Err(anyhow!("Relay error ({}): {}", status, error.error))
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, route: Route, body: &B) -> Result<T> {
        let response = self.request(Method::POST, route)?.json(body).send().await?;
        Self::expect_json(response).await
    }

    /// Send an opaque payload over the bare channel
    pub async fn send(&self, to: &ContainerId, payload: &str) -> Result<SendResponse> {
        self.post_json(
            Route::Send,
            &SendBody {
                to_container_id: to.clone(),
                payload: payload.to_string(),
            },
        )
        .await
    }

    /// Forward a capability-bearing envelope
    pub async fn forward(&self, body: &ForwardBody) -> Result<SendResponse> {
        self.post_json(Route::Forward, body).await
    }

    /// Fetch the pending queue, optionally acknowledging ids in passing
    pub async fn pending(&self, query: &PendingQuery) -> Result<PendingMessagesResponse> {
        let mut url = self.route_url(Route::PendingMessages)?;
        let mut pairs = Vec::new();
        if let Some(limit) = query.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(ack) = &query.ack {
            pairs.push(("ack", ack.clone()));
        }
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.gateway_token)
            .header(headers::CONTAINER_ID, self.container_id.to_string())
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// Acknowledge up to [MAX_ACK_BATCH] delivered messages
    pub async fn ack(&self, message_ids: Vec<String>) -> Result<AckResponse> {
        self.post_json(Route::AckMessages, &AckBody { message_ids }).await
    }

    /// Submit a signed revocation envelope
    pub async fn revoke(&self, request: &RevocationRequest) -> Result<RevokeResponse> {
        self.post_json(Route::Revoke, request).await
    }

    pub async fn revocation_status(
        &self,
        capability_id: &CapabilityId,
    ) -> Result<RevocationStatusResponse> {
        let response = self
            .request(Method::GET, Route::RevocationStatus(Some(capability_id.clone())))?
            .send()
            .await?;
        Self::expect_json(response).await
    }

    pub async fn check_revocations(
        &self,
        capability_ids: Vec<CapabilityId>,
    ) -> Result<CheckRevocationsResponse> {
        self.post_json(Route::CheckRevocations, &CheckRevocationsBody { capability_ids })
            .await
    }

    /// Pin an encrypted snapshot at the relay
    pub async fn store_snapshot(&self, upload: &SnapshotUpload) -> Result<SnapshotStoredResponse> {
        self.post_json(Route::Snapshots, upload).await
    }

    pub async fn get_snapshot(
        &self,
        capability_id: &CapabilityId,
    ) -> Result<Option<ocmt_core::data::CachedSnapshot>> {
        let response = self
            .request(Method::GET, Route::Snapshot(Some(capability_id.clone())))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::expect_json(response).await?))
    }

    pub async fn delete_snapshot(&self, capability_id: &CapabilityId) -> Result<DeletedResponse> {
        let response = self
            .request(Method::DELETE, Route::Snapshot(Some(capability_id.clone())))?
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// List snapshots held for the recipient key that signed `request`
    pub async fn list_snapshots(
        &self,
        request: &ListSnapshotsRequest,
    ) -> Result<ListSnapshotsResponse> {
        self.post_json(Route::ListSnapshots, request).await
    }

    /// Register this container's keys with the relay
    pub async fn register(&self, body: &RegisterBody) -> Result<RegistrationView> {
        self.post_json(Route::Register, body).await
    }

    /// Patch the mutable parts of this container's registration
    pub async fn update_registration(
        &self,
        body: &UpdateRegistrationBody,
    ) -> Result<RegistrationView> {
        let response = self
            .request(Method::PATCH, Route::UpdateRegistration)?
            .json(body)
            .send()
            .await?;
        Self::expect_json(response).await
    }

    pub async fn registration(&self) -> Result<Option<ocmt_core::data::RegistryRecord>> {
        let response = self.request(Method::GET, Route::Registration)?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::expect_json(response).await?))
    }

    pub async fn unregister(&self) -> Result<DeletedResponse> {
        let response = self
            .request(Method::DELETE, Route::Registration)?
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// Discover a container by the 32-hex-character hash of its signing key
    pub async fn lookup_by_hash(&self, pub_key_hash: &str) -> Result<Option<RegistrationView>> {
        let response = self
            .request(Method::GET, Route::LookupByHash(Some(pub_key_hash.to_string())))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::expect_json(response).await?))
    }

    /// Discover a container by its full signing key
    pub async fn lookup(&self, public_key: &str) -> Result<Option<RegistrationView>> {
        let response = self
            .request(Method::POST, Route::Lookup)?
            .json(&LookupBody {
                public_key: public_key.to_string(),
            })
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::expect_json(response).await?))
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.route_url(Route::Health)?).send().await?;
        Self::expect_json(response).await
    }
}
