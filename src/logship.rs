use reqwest::Client;
use serde_json::json;
use url::Url;

/// Forwards a settled job's processor log, line by line and tagged with
/// the content hash, to an optional external log-shipping endpoint.
/// A missing endpoint means "skip" rather than an error, and a failed
/// POST is logged and swallowed rather than failing the job.
#[derive(Clone)]
pub struct LogShipper {
    client: Client,
    endpoint: Option<Url>,
}

impl LogShipper {
    pub fn new(endpoint: Option<Url>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }

    /// Ships every non-empty line of `log_text`, tagged with `content_hash`.
    /// Failures are logged and swallowed — shipping logs is best-effort and
    /// must never turn into a per-job failure.
    pub async fn ship(&self, content_hash: &str, log_text: &str) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        for line in log_text.lines().filter(|line| !line.is_empty()) {
            let body = json!({
                "content_hash": content_hash,
                "line": line,
            });
            if let Err(err) = self.client.post(endpoint.clone()).json(&body).send().await {
                tracing::warn!(
                    component = "uploader",
                    content_hash,
                    error = %err,
                    "failed to ship processor log line"
                );
            }
        }
    }
}
