//! Best-effort network metadata: public IP, ISP, location, link type.
//!
//! Nothing here can fail a test run. Lookup errors are logged and the
//! dashboard shows placeholders instead.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MetadataConfig;

/// Shown for any field we could not determine.
pub const PLACEHOLDER: &str = "—";
/// Connection type when the link cannot be inspected.
pub const UNKNOWN_CONNECTION: &str = "Unknown";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata lookup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metadata lookup returned status {0}")]
    Status(u16),

    #[error("metadata lookup disabled")]
    Disabled,
}

/// Raw lookup result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip: String,
    pub isp: String,
    pub city: String,
    pub country: String,
}

/// Subset of the ipapi.co response we read.
#[derive(Debug, Default, Deserialize)]
struct IpApiResponse {
    ip: Option<String>,
    org: Option<String>,
    city: Option<String>,
    country_name: Option<String>,
}

impl From<IpApiResponse> for NetworkInfo {
    fn from(r: IpApiResponse) -> Self {
        let or_placeholder = |v: Option<String>| {
            v.filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| PLACEHOLDER.to_string())
        };
        Self {
            ip: or_placeholder(r.ip),
            isp: or_placeholder(r.org),
            city: or_placeholder(r.city),
            country: or_placeholder(r.country_name),
        }
    }
}

#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch(&self) -> Result<NetworkInfo, MetadataError>;
}

pub type SharedMetadata = Arc<dyn MetadataProvider>;

/// Looks the client up on ipapi.co (or a compatible endpoint).
pub struct IpApiProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("speedboard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(cfg: &MetadataConfig) -> Result<Self, MetadataError> {
        Self::new(cfg.endpoint.clone(), Duration::from_secs(cfg.timeout_secs))
    }
}

#[async_trait::async_trait]
impl MetadataProvider for IpApiProvider {
    async fn fetch(&self) -> Result<NetworkInfo, MetadataError> {
        let resp = self.client.get(&self.endpoint).send().await?;
        if !resp.status().is_success() {
            return Err(MetadataError::Status(resp.status().as_u16()));
        }
        let body: IpApiResponse = resp.json().await?;
        Ok(body.into())
    }
}

/// Fixed answer, or a failure when constructed with `None`.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider(pub Option<NetworkInfo>);

#[async_trait::async_trait]
impl MetadataProvider for StaticProvider {
    async fn fetch(&self) -> Result<NetworkInfo, MetadataError> {
        self.0.clone().ok_or(MetadataError::Disabled)
    }
}

/// Local link details, when the platform exposes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionCapability {
    /// `wifi` or `ethernet`.
    pub kind: String,
    pub interface: String,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<f64>,
}

/// Inspect the host's network interfaces once.
pub fn detect_connection() -> Option<ConnectionCapability> {
    detect_connection_in(Path::new("/sys/class/net"))
}

/// Pick the first interface that is up (loopback and virtual bridges
/// excluded) under a sysfs-style `root`.
pub fn detect_connection_in(root: &Path) -> Option<ConnectionCapability> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != "lo" && !n.starts_with("docker") && !n.starts_with("veth") && !n.starts_with("br-"))
        .collect();
    names.sort();

    for name in names {
        let dir = root.join(&name);
        let operstate = std::fs::read_to_string(dir.join("operstate")).unwrap_or_default();
        if operstate.trim() != "up" {
            continue;
        }
        let wireless = dir.join("wireless").exists() || dir.join("phy80211").exists();
        let downlink_mbps = std::fs::read_to_string(dir.join("speed"))
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| *v > 0.0);

        tracing::debug!(interface = %name, wireless, ?downlink_mbps, "connection detected");
        return Some(ConnectionCapability {
            kind: if wireless { "wifi" } else { "ethernet" }.to_string(),
            interface: name,
            downlink_mbps,
            rtt_ms: None,
        });
    }
    None
}

/// What the connection info card shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkView {
    pub ip: String,
    pub isp: String,
    pub location: String,
    pub connection: String,
}

impl NetworkView {
    pub fn placeholder() -> Self {
        Self {
            ip: PLACEHOLDER.to_string(),
            isp: PLACEHOLDER.to_string(),
            location: PLACEHOLDER.to_string(),
            connection: UNKNOWN_CONNECTION.to_string(),
        }
    }

    pub fn from_parts(info: Option<&NetworkInfo>, capability: Option<&ConnectionCapability>) -> Self {
        let connection = capability
            .map(|c| c.kind.clone())
            .unwrap_or_else(|| UNKNOWN_CONNECTION.to_string());
        match info {
            Some(info) => Self {
                ip: info.ip.clone(),
                isp: info.isp.clone(),
                location: location(info),
                connection,
            },
            None => Self {
                connection,
                ..Self::placeholder()
            },
        }
    }

    /// `None` for placeholder fields, as saved with a result.
    pub fn known_ip(&self) -> Option<String> {
        known(&self.ip)
    }

    pub fn known_isp(&self) -> Option<String> {
        known(&self.isp)
    }
}

fn known(v: &str) -> Option<String> {
    (v != PLACEHOLDER).then(|| v.to_string())
}

fn location(info: &NetworkInfo) -> String {
    match (info.city.as_str(), info.country.as_str()) {
        (PLACEHOLDER, PLACEHOLDER) => PLACEHOLDER.to_string(),
        (city, PLACEHOLDER) => city.to_string(),
        (PLACEHOLDER, country) => country.to_string(),
        (city, country) => format!("{city}, {country}"),
    }
}

/// Run the lookup and fold failures into placeholders.
pub async fn resolve_view(
    provider: &dyn MetadataProvider,
    capability: Option<&ConnectionCapability>,
) -> NetworkView {
    match provider.fetch().await {
        Ok(info) => NetworkView::from_parts(Some(&info), capability),
        Err(e) => {
            tracing::warn!(error = %e, "failed to fetch network info");
            NetworkView::from_parts(None, capability)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/json/")
    }

    #[tokio::test]
    async fn test_ipapi_fields_are_mapped() {
        let url = serve(Router::new().route(
            "/json/",
            get(|| async {
                Json(json!({
                    "ip": "203.0.113.7",
                    "org": "Example Networks",
                    "city": "Lisbon",
                    "country_name": "Portugal",
                    "asn": "AS64500"
                }))
            }),
        ))
        .await;

        let provider = IpApiProvider::new(url, Duration::from_secs(2)).unwrap();
        let info = provider.fetch().await.unwrap();
        assert_eq!(info.ip, "203.0.113.7");
        assert_eq!(info.isp, "Example Networks");

        let view = NetworkView::from_parts(Some(&info), None);
        assert_eq!(view.location, "Lisbon, Portugal");
        assert_eq!(view.connection, UNKNOWN_CONNECTION);
    }

    #[tokio::test]
    async fn test_missing_fields_become_placeholders() {
        let url = serve(Router::new().route("/json/", get(|| async { Json(json!({ "ip": "198.51.100.1" })) }))).await;
        let provider = IpApiProvider::new(url, Duration::from_secs(2)).unwrap();
        let view = resolve_view(&provider, None).await;
        assert_eq!(view.ip, "198.51.100.1");
        assert_eq!(view.isp, PLACEHOLDER);
        assert_eq!(view.location, PLACEHOLDER);
        assert_eq!(view.known_isp(), None);
    }

    #[tokio::test]
    async fn test_failed_lookup_yields_placeholder_view() {
        let url = serve(Router::new()).await; // every path 404s
        let provider = IpApiProvider::new(url, Duration::from_secs(2)).unwrap();
        assert!(matches!(provider.fetch().await, Err(MetadataError::Status(404))));

        let view = resolve_view(&provider, None).await;
        assert_eq!(view, NetworkView::placeholder());
    }

    #[tokio::test]
    async fn test_capability_survives_lookup_failure() {
        let cap = ConnectionCapability {
            kind: "wifi".to_string(),
            interface: "wlan0".to_string(),
            downlink_mbps: None,
            rtt_ms: None,
        };
        let view = resolve_view(&StaticProvider(None), Some(&cap)).await;
        assert_eq!(view.ip, PLACEHOLDER);
        assert_eq!(view.connection, "wifi");
    }

    #[test]
    fn test_detect_connection_from_sysfs_layout() {
        let root = tempfile::tempdir().unwrap();
        let mk = |name: &str, state: &str| {
            let dir = root.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("operstate"), format!("{state}\n")).unwrap();
            dir
        };
        mk("lo", "unknown");
        mk("eth0", "down");
        let wlan = mk("wlan0", "up");
        std::fs::create_dir(wlan.join("wireless")).unwrap();

        let cap = detect_connection_in(root.path()).unwrap();
        assert_eq!(cap.kind, "wifi");
        assert_eq!(cap.interface, "wlan0");
        assert_eq!(cap.downlink_mbps, None);
    }

    #[test]
    fn test_detect_connection_reads_link_speed() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("enp3s0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("operstate"), "up\n").unwrap();
        std::fs::write(dir.join("speed"), "1000\n").unwrap();

        let cap = detect_connection_in(root.path()).unwrap();
        assert_eq!(cap.kind, "ethernet");
        assert_eq!(cap.downlink_mbps, Some(1000.0));
    }

    #[test]
    fn test_detect_connection_missing_root() {
        assert_eq!(detect_connection_in(Path::new("/definitely/not/here")), None);
    }
}
