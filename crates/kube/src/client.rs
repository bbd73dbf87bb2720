//! Connection settings and the authenticated HTTP client for the API server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use herald_core::config::{env_flag, env_opt};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

const TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const CA_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Per-request timeout for everything except watches.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum KubeError {
    #[error("API server address unknown: set HERALD_API_SERVER or run in-cluster")]
    NoApiServer,

    #[error("invalid API server URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("building HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Where the API server lives and how to authenticate to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeConfig {
    pub api_server: String,
    pub token_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub insecure_skip_tls_verify: bool,
}

impl KubeConfig {
    /// In-cluster settings, with `HERALD_*` overrides for out-of-cluster use.
    pub fn from_env() -> Result<Self, KubeError> {
        let api_server = match env_opt("HERALD_API_SERVER") {
            Some(server) => server,
            None => {
                let host = env_opt("KUBERNETES_SERVICE_HOST").ok_or(KubeError::NoApiServer)?;
                let port = env_opt("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".to_string());
                if host.contains(':') {
                    format!("https://[{host}]:{port}")
                } else {
                    format!("https://{host}:{port}")
                }
            }
        };

        Ok(Self {
            api_server,
            token_file: env_opt("HERALD_TOKEN_FILE")
                .map(PathBuf::from)
                .or_else(|| existing(TOKEN_FILE)),
            ca_file: env_opt("HERALD_CA_FILE")
                .map(PathBuf::from)
                .or_else(|| existing(CA_FILE)),
            insecure_skip_tls_verify: env_flag("HERALD_INSECURE_SKIP_TLS_VERIFY"),
        })
    }
}

fn existing(path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    path.exists().then(|| path.to_path_buf())
}

fn read(path: &Path) -> Result<Vec<u8>, KubeError> {
    std::fs::read(path).map_err(|source| KubeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Non-success response from the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiStatus {
    pub status: u16,
    pub message: String,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    message: String,
}

/// Shared client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct KubeClient {
    base: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl KubeClient {
    pub fn new(config: &KubeConfig) -> Result<Self, KubeError> {
        let base = Url::parse(&config.api_server).map_err(|source| KubeError::Url {
            url: config.api_server.clone(),
            source,
        })?;

        let token = match &config.token_file {
            Some(path) => {
                let raw = read(path)?;
                Some(String::from_utf8_lossy(&raw).trim().to_string())
            }
            None => None,
        };

        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(ca) = &config.ca_file {
            let pem = read(ca)?;
            for cert in reqwest::Certificate::from_pem_bundle(&pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }
        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        info!(
            api_server = %base,
            authenticated = token.is_some(),
            "API server client configured"
        );

        Ok(Self {
            base,
            token,
            http: builder.build()?,
        })
    }

    /// Absolute URL for an API path such as `/api/v1/events`.
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}{path}"));
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    /// Authenticated request with the default timeout.
    pub fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.streaming(method, url).timeout(REQUEST_TIMEOUT)
    }

    /// Authenticated request without a timeout, for long-lived watches.
    pub fn streaming(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Read an error response, preferring the `message` of a `Status` body.
pub async fn api_status(response: reqwest::Response) -> ApiStatus {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<StatusBody>(&body)
        .ok()
        .map(|s| s.message)
        .filter(|m| !m.is_empty())
        .unwrap_or(body);
    ApiStatus { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_server: &str) -> KubeClient {
        KubeClient::new(&KubeConfig {
            api_server: api_server.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn url_joins_base_path() {
        let c = client("https://10.0.0.1:6443");
        assert_eq!(
            c.url("/api/v1/events", &[]).as_str(),
            "https://10.0.0.1:6443/api/v1/events"
        );

        let proxied = client("http://localhost:8001/k8s/");
        let url = proxied.url("/api/v1/events", &[("watch", "1"), ("resourceVersion", "42")]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8001/k8s/api/v1/events?watch=1&resourceVersion=42"
        );
    }

    #[test]
    fn invalid_server_url_is_rejected() {
        let err = KubeClient::new(&KubeConfig {
            api_server: "not a url".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, KubeError::Url { .. }));
    }

    #[test]
    fn token_is_read_and_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "abc123\n").unwrap();

        let c = KubeClient::new(&KubeConfig {
            api_server: "https://example.com".to_string(),
            token_file: Some(token),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(c.token.as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_token_file_is_io_error() {
        let err = KubeClient::new(&KubeConfig {
            api_server: "https://example.com".to_string(),
            token_file: Some(PathBuf::from("/nonexistent/herald/token")),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, KubeError::Io { .. }));
    }
}
