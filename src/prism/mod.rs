pub mod types;

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PrismConfig;

use self::types::{
    ClusterRecord, EntityList, HostRecord, VmListRequest, VmRecord, VmStatsSummary,
};

pub const VM_LIST_PATH: &str = "/api/nutanix/v3/vms/list";
pub const CLUSTER_LIST_PATH: &str = "/PrismGateway/services/rest/v2.0/clusters";
pub const HOST_LIST_PATH: &str = "/PrismGateway/services/rest/v2.0/hosts";

/// Longest response body excerpt carried in a status error.
const ERROR_BODY_LIMIT: usize = 512;

/// Returns the stats summary path for one VM.
pub fn vm_stats_path(uuid: &str) -> String {
    format!("/api/nutanix/v3/vms/{uuid}/stats_summary")
}

/// Errors returned by a single Prism API call.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("requesting {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("decoding response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} still returned entities after {max_pages} pages")]
    PageLimit { path: String, max_pages: usize },
}

impl ApiError {
    /// Short label for request metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { source, .. } if source.is_timeout() => "timeout",
            Self::Transport { .. } => "transport",
            Self::Status { .. } => "status",
            Self::Decode { .. } => "decode",
            Self::PageLimit { .. } => "page_limit",
        }
    }
}

/// Callback type for recording request metrics.
/// Receives (endpoint_name, status, duration).
pub type MetricsCallback = Box<dyn Fn(&str, &str, Duration) + Send + Sync>;

/// Prism API operations used by a scrape cycle.
pub trait PrismApi: Send + Sync {
    /// Label identifying this Prism endpoint in exported series.
    fn name(&self) -> &str;

    /// Fetch one page of the VM inventory.
    fn list_vms_page(
        &self,
        offset: usize,
        length: usize,
    ) -> impl Future<Output = Result<Vec<VmRecord>, ApiError>> + Send;

    /// Fetch the runtime stats summary of one VM.
    fn vm_stats(&self, uuid: &str)
        -> impl Future<Output = Result<VmStatsSummary, ApiError>> + Send;

    /// Fetch the cluster list (single page).
    fn list_clusters(&self) -> impl Future<Output = Result<Vec<ClusterRecord>, ApiError>> + Send;

    /// Fetch the host list (single page).
    fn list_hosts(&self) -> impl Future<Output = Result<Vec<HostRecord>, ApiError>> + Send;
}

/// Drives an offset-paged list endpoint until a page comes back empty.
///
/// The offset advances by `page_size` after every non-empty page, so N
/// entities take `ceil(N / page_size) + 1` requests. At most `max_pages`
/// requests are issued; a server still returning entities at that point
/// yields [`ApiError::PageLimit`].
pub async fn fetch_all_pages<T, F, Fut>(
    path: &str,
    page_size: usize,
    max_pages: usize,
    mut fetch_page: F,
) -> Result<Vec<T>, ApiError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, ApiError>>,
{
    let mut all = Vec::new();
    let mut offset = 0;

    for page in 0..max_pages {
        let entities = fetch_page(offset).await?;

        if entities.is_empty() {
            debug!(path, pages = page + 1, total = all.len(), "pagination complete");
            return Ok(all);
        }

        all.extend(entities);
        offset += page_size;
    }

    Err(ApiError::PageLimit {
        path: path.to_string(),
        max_pages,
    })
}

/// HTTP client for one Prism endpoint.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    name: String,
    username: String,
    password: String,
    metrics: Option<MetricsCallback>,
}

impl Client {
    /// Create a client for `base_url` (already normalized, no trailing slash).
    pub fn new(cfg: &PrismConfig, base_url: &str) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            cfg.timeout
        };

        if cfg.insecure_skip_verify {
            warn!(endpoint = base_url, "TLS certificate verification disabled");
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(cfg.insecure_skip_verify)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            name: endpoint_label(base_url),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            metrics: None,
        })
    }

    /// Set a metrics callback for recording request stats.
    pub fn with_metrics(mut self, cb: MetricsCallback) -> Self {
        self.metrics = Some(cb);
        self
    }

    fn record_request(&self, endpoint: &str, status: &str, duration: Duration) {
        if let Some(ref cb) = self.metrics {
            cb(endpoint, status, duration);
        }
    }

    /// Sends a prepared request and decodes the JSON body.
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<T, ApiError> {
        let start = Instant::now();
        let endpoint = endpoint_from_path(path);

        let result = self.execute(request, path).await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        self.record_request(endpoint, status, start.elapsed());

        result
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<T, ApiError> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: truncate(body, ERROR_BODY_LIMIT),
            });
        }

        let bytes = response.bytes().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })?;

        serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl PrismApi for Client {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_vms_page(&self, offset: usize, length: usize) -> Result<Vec<VmRecord>, ApiError> {
        debug!(prism = %self.name, offset, length, "fetching VM page");

        let request = self
            .http
            .post(self.url(VM_LIST_PATH))
            .json(&VmListRequest::page(offset, length));

        let list: EntityList<VmRecord> = self.send_json(request, VM_LIST_PATH).await?;
        Ok(list.entities)
    }

    async fn vm_stats(&self, uuid: &str) -> Result<VmStatsSummary, ApiError> {
        let path = vm_stats_path(uuid);
        let request = self.http.get(self.url(&path));
        self.send_json(request, &path).await
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>, ApiError> {
        debug!(prism = %self.name, "fetching clusters");

        let request = self.http.get(self.url(CLUSTER_LIST_PATH));
        let list: EntityList<ClusterRecord> = self.send_json(request, CLUSTER_LIST_PATH).await?;
        Ok(list.entities)
    }

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, ApiError> {
        debug!(prism = %self.name, "fetching hosts");

        let request = self.http.get(self.url(HOST_LIST_PATH));
        let list: EntityList<HostRecord> = self.send_json(request, HOST_LIST_PATH).await?;
        Ok(list.entities)
    }
}

/// Extract a short endpoint name from an API path.
fn endpoint_from_path(path: &str) -> &'static str {
    match path {
        VM_LIST_PATH => "vms_list",
        CLUSTER_LIST_PATH => "clusters",
        HOST_LIST_PATH => "hosts",
        p if p.starts_with("/api/nutanix/v3/vms/") && p.ends_with("/stats_summary") => "vm_stats",
        _ => "other",
    }
}

/// The `prism` label value for a base URL: host[:port] without scheme.
fn endpoint_label(base_url: &str) -> String {
    base_url
        .split_once("://")
        .map_or(base_url, |(_, rest)| rest)
        .to_string()
}

fn truncate(mut s: String, limit: usize) -> String {
    if s.len() > limit {
        let mut cut = limit;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entities(range: std::ops::Range<usize>) -> Vec<usize> {
        range.collect()
    }

    #[test]
    fn test_endpoint_from_path() {
        assert_eq!(endpoint_from_path(VM_LIST_PATH), "vms_list");
        assert_eq!(endpoint_from_path(CLUSTER_LIST_PATH), "clusters");
        assert_eq!(endpoint_from_path(HOST_LIST_PATH), "hosts");
        assert_eq!(endpoint_from_path(&vm_stats_path("abc")), "vm_stats");
        assert_eq!(endpoint_from_path("/some/other/path"), "other");
    }

    #[test]
    fn test_endpoint_label() {
        assert_eq!(endpoint_label("https://10.0.0.1:9440"), "10.0.0.1:9440");
        assert_eq!(endpoint_label("prism:9440"), "prism:9440");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("abcdef".to_string(), 3), "abc");
        assert_eq!(truncate("ab".to_string(), 3), "ab");
        // 'é' is two bytes; cutting at 2 would split it.
        assert_eq!(truncate("aéb".to_string(), 2), "a");
    }

    #[tokio::test]
    async fn test_pagination_call_count_and_order() {
        let total = 1234;
        let page_size = 500;
        let calls = AtomicUsize::new(0);
        let all = entities(0..total);

        let result = fetch_all_pages("/vms", page_size, 100, |offset| {
            calls.fetch_add(1, Ordering::SeqCst);
            let page: Vec<usize> = all.iter().copied().skip(offset).take(page_size).collect();
            async move { Ok(page) }
        })
        .await
        .expect("pagination should succeed");

        // ceil(1234 / 500) + 1 trailing empty page.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result, all);
    }

    #[tokio::test]
    async fn test_pagination_exact_multiple() {
        let calls = AtomicUsize::new(0);
        let all = entities(0..10);

        let result = fetch_all_pages("/vms", 5, 100, |offset| {
            calls.fetch_add(1, Ordering::SeqCst);
            let page: Vec<usize> = all.iter().copied().skip(offset).take(5).collect();
            async move { Ok(page) }
        })
        .await
        .expect("pagination should succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.len(), 10);
    }

    #[tokio::test]
    async fn test_pagination_empty_inventory() {
        let calls = AtomicUsize::new(0);

        let result: Vec<usize> = fetch_all_pages("/vms", 5, 100, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Vec::new()) }
        })
        .await
        .expect("pagination should succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_offsets_advance_by_page_size() {
        let offsets = parking_lot::Mutex::new(Vec::new());

        // Server returns short pages; offset still advances by page size.
        let _ = fetch_all_pages("/vms", 10, 100, |offset| {
            offsets.lock().push(offset);
            let page = if offset < 30 { vec![offset] } else { Vec::new() };
            async move { Ok(page) }
        })
        .await
        .expect("pagination should succeed");

        assert_eq!(*offsets.lock(), vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn test_pagination_page_limit() {
        let calls = AtomicUsize::new(0);

        let result: Result<Vec<usize>, ApiError> = fetch_all_pages("/vms", 2, 5, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![1, 2]) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let err = result.expect_err("should hit page limit");
        assert!(matches!(err, ApiError::PageLimit { max_pages: 5, .. }));
        assert_eq!(err.kind(), "page_limit");
    }

    #[tokio::test]
    async fn test_pagination_propagates_page_error() {
        let result: Result<Vec<usize>, ApiError> = fetch_all_pages("/vms", 2, 5, |offset| async move {
            if offset == 0 {
                Ok(vec![1, 2])
            } else {
                Err(ApiError::Status {
                    path: "/vms".to_string(),
                    status: 500,
                    body: String::new(),
                })
            }
        })
        .await;

        let err = result.expect_err("should fail");
        assert!(matches!(err, ApiError::Status { status: 500, .. }));
    }

    #[test]
    fn test_status_error_message() {
        let err = ApiError::Status {
            path: HOST_LIST_PATH.to_string(),
            status: 401,
            body: "unauthorized".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("unauthorized"));
        assert_eq!(err.kind(), "status");
    }

    #[test]
    fn test_client_new_uses_host_as_name() {
        let cfg = PrismConfig {
            username: "admin".to_string(),
            ..Default::default()
        };
        let client = Client::new(&cfg, "https://10.0.0.1:9440").expect("client should build");
        assert_eq!(client.name(), "10.0.0.1:9440");
        assert_eq!(client.url(HOST_LIST_PATH), format!("https://10.0.0.1:9440{HOST_LIST_PATH}"));
    }
}
