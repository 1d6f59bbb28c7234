use anyhow::{anyhow, Result};
use ocmt_api::data::{headers, CallbackDelivery};
use std::time::Duration;
use url::Url;

/// Validate a container callback URL against the outbound-request policy:
/// `https` only (plain `http` is allowed solely for exactly `localhost`),
/// and no private, loopback or internal-looking hosts.
///
/// TODO: pin the resolved address for the lifetime of the request and
/// re-check it on every redirect hop; host checks alone do not stop DNS
/// rebinding.
pub fn validate_callback_url(callback_url: &str) -> Result<Url> {
    let url = Url::parse(callback_url)?;

    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("Callback URL has no host"))?
        .to_ascii_lowercase();

    match url.scheme() {
        "https" => (),
        "http" if host == "localhost" => (),
        scheme => return Err(anyhow!("Callback scheme '{}' is not allowed", scheme)),
    }

    if host == "127.0.0.1"
        || host == "0.0.0.0"
        || host.starts_with("192.168.")
        || host.starts_with("10.")
        || host.starts_with("172.16.")
        || host.ends_with(".internal")
        || host.ends_with(".local")
    {
        return Err(anyhow!("Callback host '{}' is not allowed", host));
    }

    Ok(url)
}

/// Delivers messages to container callback URLs: one POST per attempt, a
/// bounded number of retries with exponential backoff on network errors and
/// 5xx, and no retry at all on 4xx.
#[derive(Clone)]
pub struct CallbackForwarder {
    client: reqwest::Client,
    max_retries: u32,
    backoff_base: Duration,
}

impl CallbackForwarder {
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self> {
        Ok(CallbackForwarder {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            max_retries,
            backoff_base: Duration::from_millis(100),
        })
    }

    /// POST the delivery to `callback_url`. `Ok` means the endpoint took the
    /// message (2xx); any terminal failure is an `Err` and leaves the message
    /// queued.
    pub async fn forward(&self, callback_url: &str, delivery: &CallbackDelivery) -> Result<()> {
        let url = validate_callback_url(callback_url)?;

        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(url.clone())
                .header(headers::MESSAGE_ID, delivery.message_id.as_str())
                .header(headers::FROM, delivery.from.to_string())
                .json(delivery)
                .send()
                .await;

            let retryable = match result {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        "Callback delivery of {} to {} succeeded",
                        delivery.message_id, url
                    );
                    return Ok(());
                }
                Ok(response) if response.status().is_server_error() => {
                    warn!(
                        "Callback endpoint {} answered {} for {}",
                        url,
                        response.status(),
                        delivery.message_id
                    );
                    true
                }
                Ok(response) => {
                    return Err(anyhow!(
                        "Callback endpoint rejected message with {}",
                        response.status()
                    ));
                }
                Err(error) => {
                    warn!("Callback request to {} failed: {}", url, error);
                    true
                }
            };

            if !retryable || attempt >= self.max_retries {
                return Err(anyhow!(
                    "Callback delivery failed after {} attempt(s)",
                    attempt + 1
                ));
            }

            // 100ms, 200ms, 400ms, ...
            tokio::time::sleep(self.backoff_base * 2u32.pow(attempt)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_public_hosts_pass() {
        assert!(validate_callback_url("https://callbacks.example.com/inbox").is_ok());
    }

    #[test]
    fn plain_http_is_localhost_only() {
        assert!(validate_callback_url("http://localhost:3000/inbox").is_ok());
        assert!(validate_callback_url("http://example.com/inbox").is_err());
        assert!(validate_callback_url("http://127.0.0.1/inbox").is_err());
    }

    #[test]
    fn private_and_internal_hosts_are_rejected() {
        for url in [
            "https://127.0.0.1/x",
            "https://0.0.0.0/x",
            "https://192.168.1.5/x",
            "https://10.0.0.9/x",
            "https://172.16.3.3/x",
            "https://service.internal/x",
            "https://printer.local/x",
        ] {
            assert!(validate_callback_url(url).is_err(), "{url} should fail");
        }
    }

    #[test]
    fn garbage_urls_are_rejected() {
        assert!(validate_callback_url("not a url").is_err());
        assert!(validate_callback_url("ftp://example.com/x").is_err());
    }

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use ocmt_core::data::ContainerId;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use std::time::Instant;

    fn delivery() -> CallbackDelivery {
        CallbackDelivery {
            kind: "message".into(),
            message_id: "m1".into(),
            from: ContainerId::from("a"),
            payload: "eA==".into(),
            timestamp: 1,
        }
    }

    /// Serve `statuses` in order from a local endpoint, returning its URL and
    /// the hit counter
    async fn callback_endpoint(statuses: &'static [StatusCode]) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/inbox",
            post(move || {
                let counter = counter.clone();
                async move {
                    let hit = counter.fetch_add(1, Ordering::SeqCst) as usize;
                    statuses[hit.min(statuses.len() - 1)]
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://localhost:{port}/inbox"), hits)
    }

    #[tokio::test]
    async fn a_503_then_200_takes_exactly_two_posts_with_backoff() {
        let (url, hits) =
            callback_endpoint(&[StatusCode::SERVICE_UNAVAILABLE, StatusCode::OK]).await;
        let forwarder = CallbackForwarder::new(Duration::from_secs(2), 2).unwrap();

        let started = Instant::now();
        forwarder.forward(&url, &delivery()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn a_4xx_is_terminal_with_no_retry() {
        let (url, hits) = callback_endpoint(&[StatusCode::GONE]).await;
        let forwarder = CallbackForwarder::new(Duration::from_secs(2), 2).unwrap();

        assert!(forwarder.forward(&url, &delivery()).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_exhausted_against_a_persistent_5xx() {
        let (url, hits) = callback_endpoint(&[StatusCode::SERVICE_UNAVAILABLE]).await;
        let forwarder = CallbackForwarder::new(Duration::from_secs(2), 2).unwrap();

        assert!(forwarder.forward(&url, &delivery()).await.is_err());
        // The first attempt plus two retries
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
