use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::COOKIE;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, Credentials, Endpoints, RefreshSettings};
use crate::error::{Error, Result};
use crate::property::{Device, Snapshot};

/// Name of the session cookie handed out by the login endpoint.
pub const AUTH_COOKIE: &str = "hhfoffoezyzzoeibwv";

/// Anything able to produce a fresh snapshot. The coordinator only talks
/// to this trait.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Snapshot>;
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    data: Vec<Device>,
}

#[derive(Debug, Deserialize)]
struct LiveSocket {
    #[serde(default)]
    websocket_uri: Option<String>,
}

pub struct HydroLinkApi {
    http: reqwest::Client,
    credentials: Credentials,
    endpoints: Endpoints,
    refresh: RefreshSettings,
    session: RwLock<Option<String>>,
}

impl HydroLinkApi {
    pub fn new(
        credentials: Credentials,
        endpoints: Endpoints,
        refresh: RefreshSettings,
        request_timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            credentials,
            endpoints,
            refresh,
            session: RwLock::new(None),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.account.clone(),
            config.endpoints.clone(),
            config.websocket.clone(),
            config.polling.request_timeout(),
        )
    }

    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn clear_session(&self) {
        *self.session.write().await = None;
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.api_base.trim_end_matches('/'), path)
    }

    /// `{api_base}/devices/{id}/{leaf}` with the id escaped as one segment.
    fn device_url(&self, device_id: &str, leaf: &str) -> Result<String> {
        let mut url = Url::parse(&self.api_url("/devices"))
            .map_err(|e| Error::Config(format!("endpoints.api_base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("endpoints.api_base cannot hold a path".into()))?
            .push(device_id)
            .push(leaf);
        Ok(url.into())
    }

    fn socket_url(&self, uri: &str) -> String {
        if uri.starts_with("ws://") || uri.starts_with("wss://") {
            uri.to_string()
        } else {
            format!("{}{}", self.endpoints.ws_base.trim_end_matches('/'), uri)
        }
    }

    /// Logs in and stores the session cookie.
    pub async fn login(&self) -> Result<()> {
        let resp = self
            .http
            .post(self.api_url("/auth/login"))
            .json(&serde_json::json!({
                "email": self.credentials.email,
                "password": self.credentials.password,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::InvalidAuth);
        }
        if !status.is_success() {
            return Err(Error::CannotConnect(format!("login returned {status}")));
        }

        let cookie = resp
            .cookies()
            .find(|c| c.name() == AUTH_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(Error::InvalidAuth)?;
        *self.session.write().await = Some(cookie);

        info!(email = %self.credentials.email, "HydroLink login successful");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let cookie = self.session.read().await.clone().ok_or(Error::InvalidAuth)?;
        let resp = self
            .http
            .get(url)
            .header(COOKIE, format!("{AUTH_COOKIE}={cookie}"))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::InvalidAuth);
        }
        if !status.is_success() {
            return Err(Error::CannotConnect(format!("{url} returned {status}")));
        }
        Ok(resp.json::<T>().await?)
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let list: DeviceList = self
            .get_json(&self.api_url("/devices?all=false&per_page=200"))
            .await?;
        Ok(list.data)
    }

    /// Socket address for a device's live feed, if the cloud offers one.
    pub async fn live_socket_uri(&self, device_id: &str) -> Result<Option<String>> {
        let live: LiveSocket = self
            .get_json(&self.device_url(device_id, "live")?)
            .await?;
        Ok(live
            .websocket_uri
            .filter(|uri| !uri.is_empty())
            .map(|uri| self.socket_url(&uri)))
    }

    /// Opens the live socket and hangs up once `message_limit` messages
    /// have arrived, which makes the cloud pull fresh values from the unit.
    /// Returns the number of messages seen.
    pub async fn trigger_refresh(&self, url: &str) -> Result<usize> {
        let timeout = self.refresh.timeout();
        match tokio::time::timeout(timeout, drain_socket(url, self.refresh.message_limit)).await {
            Ok(result) => result,
            Err(_) => Err(Error::CannotConnect(format!(
                "live refresh did not finish within {timeout:?}"
            ))),
        }
    }

    async fn poll_devices(&self) -> Result<Snapshot> {
        let devices = self.list_devices().await?;
        for device in &devices {
            let Some(url) = self.live_socket_uri(&device.id).await? else {
                warn!(device_id = %device.id, "no live socket offered, skipping refresh");
                continue;
            };
            match self.trigger_refresh(&url).await {
                Ok(messages) => debug!(device_id = %device.id, messages, "live refresh done"),
                Err(e) => warn!(device_id = %device.id, error = %e, "live refresh failed"),
            }
        }

        let devices = self.list_devices().await?;
        debug!(devices = devices.len(), "fetched HydroLink snapshot");
        Ok(Snapshot::new(devices))
    }

    /// Logs in when needed, refreshes every device and returns the new
    /// listing. An expired session is renewed once.
    pub async fn get_data(&self) -> Result<Snapshot> {
        let had_session = self.has_session().await;
        if !had_session {
            self.login().await?;
        }

        match self.poll_devices().await {
            Err(Error::InvalidAuth) if had_session => {
                warn!("HydroLink session rejected, logging in again");
                self.clear_session().await;
                self.login().await?;
                self.poll_devices().await
            }
            other => other,
        }
    }
}

async fn drain_socket(url: &str, limit: usize) -> Result<usize> {
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| Error::CannotConnect(format!("websocket {url}: {e}")))?;
    debug!(url, "HydroLink WebSocket opened");

    let mut received = 0;
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(_) | Message::Binary(_)) => {
                received += 1;
                if received >= limit {
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "closing HydroLink WebSocket");
                    }
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "HydroLink WebSocket closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                return Err(Error::CannotConnect(format!("websocket {url}: {e}")));
            }
        }
    }
    Ok(received)
}

#[async_trait]
impl SnapshotSource for HydroLinkApi {
    async fn fetch_snapshot(&self) -> Result<Snapshot> {
        self.get_data().await
    }
}
