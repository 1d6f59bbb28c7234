use anyhow::{anyhow, Result};
use ocmt_api::data::{headers, ContainerStatusResponse};
use ocmt_core::data::{ContainerId, ContainerStatus};
use std::time::Duration;
use url::Url;

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const WAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the agent server's container status and wake RPC. The relay
/// only ever asks two questions: "is this container asleep?" and "wake it".
#[derive(Clone)]
pub struct AgentServerClient {
    api_base: Url,
    token: String,
    client: reqwest::Client,
}

impl AgentServerClient {
    pub fn new(api_base: Url, token: String) -> Result<Self> {
        Ok(AgentServerClient {
            api_base,
            token,
            client: reqwest::Client::new(),
        })
    }

    fn container_url(&self, container_id: &ContainerId, tail: &str) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.set_path(&format!("/api/containers/{}/{}", container_id, tail));
        Ok(url)
    }

    /// Current lifecycle status of a container; failures surface as
    /// [ContainerStatus::Unknown] at the call site's discretion
    pub async fn status(&self, container_id: &ContainerId) -> Result<ContainerStatus> {
        let response = self
            .client
            .get(self.container_url(container_id, "status")?)
            .header(headers::AUTH_TOKEN, &self.token)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Agent server answered {} for container status",
                response.status()
            ));
        }

        let body: ContainerStatusResponse = response.json().await?;
        Ok(body.status)
    }

    /// Ask the agent server to wake a hibernated or stopped container. The
    /// woken container reconnects on its own and drains its queue over the
    /// WebSocket flush-on-connect path.
    pub async fn wake(&self, container_id: &ContainerId) -> Result<()> {
        let response = self
            .client
            .post(self.container_url(container_id, "wake")?)
            .header(headers::AUTH_TOKEN, &self.token)
            .timeout(WAKE_TIMEOUT)
            .send()
            .await?;

        match response.status().is_success() {
            true => Ok(()),
            false => Err(anyhow!(
                "Agent server refused wake with {}",
                response.status()
            )),
        }
    }
}
