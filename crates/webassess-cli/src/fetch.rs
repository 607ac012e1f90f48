use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use webassess_core::{AssessError, FetchConfig, Result};

/// HTTP client for target retrieval, separate from the runtime client so the
/// fetch timeout never applies to model calls.
pub fn build_fetch_client(config: &FetchConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| AssessError::FetchFailed(format!("failed to build HTTP client: {}", e)))
}

/// Only absolute http(s) URLs are assessed.
pub fn parse_target(target: &str) -> Result<Url> {
    let url = Url::parse(target.trim())
        .map_err(|e| AssessError::FetchFailed(format!("invalid target '{}': {}", target, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(AssessError::FetchFailed(format!(
            "unsupported scheme '{}' in target '{}'",
            scheme, target
        ))),
    }
}

/// One GET of `target`; the body is returned as text.
pub async fn fetch_target(
    client: &Client,
    target: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let url = parse_target(target)?;
    info!("Fetching {}", url);

    let request = async {
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AssessError::FetchFailed(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssessError::FetchFailed(format!(
                "{} returned status {}",
                url,
                status.as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AssessError::FetchFailed(format!("failed to read body of {}: {}", url, e)))
    };

    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AssessError::Cancelled),
        body = request => body?,
    };

    debug!("Fetched {} bytes from {}", body.len(), url);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_targets_are_accepted() {
        assert_eq!(
            parse_target("https://example.com/login").unwrap().host_str(),
            Some("example.com")
        );
        assert!(parse_target(" http://10.0.0.1:8080/ ").is_ok());
    }

    #[test]
    fn other_targets_are_rejected() {
        for target in ["example.com", "ftp://example.com/file", "file:///etc/passwd", ""] {
            assert!(
                matches!(parse_target(target), Err(AssessError::FetchFailed(_))),
                "accepted {:?}",
                target
            );
        }
    }

    #[tokio::test]
    async fn cancelled_fetch_returns_cancelled() {
        let client = build_fetch_client(&FetchConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = fetch_target(&client, "http://127.0.0.1:9/", &cancel).await;
        assert_eq!(result, Err(AssessError::Cancelled));
    }
}
