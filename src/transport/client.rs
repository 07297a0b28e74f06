//! Request pipeline: endpoint resolution, envelope, cookies, classification.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::timing::RequestTimer;
use crate::common::{ClientConfig, ClientError, SessionState, SessionStore};
use crate::protocol::{Operation, ProtocolRegistry, RequestEnvelope, ResponseOutcome};

const DISCOVERY_LABEL: &str = "discovery";

/// Handle to one logical connection. Cheap to clone; clones share session
/// and registry.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    session: SessionStore,
    registry: Arc<RwLock<Option<Arc<ProtocolRegistry>>>>,
    // Serializes discovery; the last successful call wins.
    discovery: Arc<Mutex<()>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let state = SessionState::new(
            config.device.mobile_id.clone(),
            config.device.app_type.clone(),
            config.device.os_type.clone(),
        );
        Self::with_session(config, SessionStore::new(state))
    }

    pub fn with_session(config: ClientConfig, session: SessionStore) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.http.request_timeout())
            .user_agent(config.http.user_agent.clone())
            .build()
            .map_err(|e| ClientError::InvalidRequest(format!("http client: {e}")))?;

        Ok(Self {
            http,
            config: Arc::new(config),
            session,
            registry: Arc::new(RwLock::new(None)),
            discovery: Arc::new(Mutex::new(())),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    //-- Registry

    /// Current registry, if discovery has completed.
    pub fn registry(&self) -> Option<Arc<ProtocolRegistry>> {
        match self.registry.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                tracing::error!("Registry lock poisoned during read, recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    /// Swap in a registry wholesale.
    pub fn install_registry(&self, registry: ProtocolRegistry) -> Arc<ProtocolRegistry> {
        let registry = Arc::new(registry);
        let mut slot = match self.registry.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Registry lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        };
        *slot = Some(registry.clone());
        registry
    }

    /// Endpoint URL for an operation. Never touches the network.
    pub fn resolve(&self, operation: Operation) -> Result<String, ClientError> {
        let registry = self.registry().ok_or(ClientError::NotDiscovered)?;
        registry.resolve(operation).map(str::to_string)
    }

    /// `resolve` for a protocol id or operation name given as text.
    pub fn resolve_id(&self, id: &str) -> Result<String, ClientError> {
        let registry = self.registry().ok_or(ClientError::NotDiscovered)?;
        registry.resolve_id(id).map(str::to_string)
    }

    /// Refresh the registry using the configured check URL and the session's
    /// login id.
    pub async fn discover(&self) -> Result<Arc<ProtocolRegistry>, ClientError> {
        let login_id = self.session.snapshot().login_id;
        self.discover_as(&self.config.server.protocol_check_url, &login_id)
            .await
    }

    /// Fetch the protocol list for `login_id` and replace the registry.
    /// A failure leaves any previous registry in place.
    pub async fn discover_as(
        &self,
        check_url: &str,
        login_id: &str,
    ) -> Result<Arc<ProtocolRegistry>, ClientError> {
        let _serialized = self.discovery.lock().await;

        let session = self.session.snapshot();
        session
            .ensure_ready()
            .map_err(|e| ClientError::Discovery(Box::new(e)))?;

        if check_url.trim().is_empty() {
            return Err(ClientError::Discovery(Box::new(ClientError::InvalidRequest(
                "protocol check url is not configured".to_string(),
            ))));
        }

        let request = self.http.get(check_url).query(&[
            ("mobileId", session.mobile_id.as_str()),
            ("loginId", login_id),
            ("appType", session.app_type.as_str()),
            ("appVer", ""),
            ("osType", session.os_type.as_str()),
            ("osVer", ""),
            ("model", ""),
        ]);
        let request = self.with_cookies(request, &session);

        let result = self
            .exchange(request, DISCOVERY_LABEL, None)
            .await
            .map_err(|e| ClientError::Discovery(Box::new(e)))?;
        let registry = ProtocolRegistry::from_discovery(result)
            .map_err(|e| ClientError::Discovery(Box::new(e)))?;

        tracing::info!(endpoints = registry.len(), "protocol registry refreshed");
        Ok(self.install_registry(registry))
    }

    //-- Operations

    /// Send one operation and return its `result` payload.
    pub async fn send<P>(&self, operation: Operation, payload: &P) -> Result<Value, ClientError>
    where
        P: Serialize + ?Sized,
    {
        let url = self.resolve(operation)?;

        let session = self.session.snapshot();
        session.ensure_ready()?;

        let envelope = RequestEnvelope::new(&session, operation.pid(), payload);
        let tid = envelope.tid().to_string();
        let label = operation.to_string();

        tracing::debug!(operation = %label, tid = %tid, url = %url, "sending request");

        let request = self.with_cookies(self.http.post(&url).json(&envelope), &session);
        self.exchange(request, &label, Some(&tid)).await
    }

    /// `send` with the result payload decoded into `T`.
    pub async fn send_as<T, P>(&self, operation: Operation, payload: &P) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let value = self.send(operation, payload).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(format!("{operation}: {e}")))
    }

    /// Cookie-carrying GET of an absolute URL (profile images, direct links).
    pub async fn direct_download(&self, url: &str) -> Result<Bytes, ClientError> {
        let session = self.session.snapshot();
        session.ensure_ready()?;
        let request = self.with_cookies(self.http.get(url), &session);
        let label = "direct-download";

        let mut timer = RequestTimer::start();
        let response = self.dispatch(request, label, None, &timer).await?;
        timer.mark_headers();

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_failure(label, None, &e, self.config.http.request_timeout()));
        timer.finish().log(label, None, Some(status.as_u16()), status.as_u16() == 200);

        if status.as_u16() != 200 {
            return Err(ClientError::Transport {
                operation: label.to_string(),
                tid: None,
                status: Some(status.as_u16()),
                message: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        body
    }

    /// Drop credentials and cookies locally.
    pub fn logout(&self) {
        self.session.clear_login();
        tracing::info!("session cleared");
    }

    //-- Pipeline internals

    pub(crate) fn with_cookies(&self, request: RequestBuilder, session: &SessionState) -> RequestBuilder {
        match session.cookie_header() {
            Some(cookies) => request.header(COOKIE, cookies),
            None => request,
        }
    }

    /// Overwrite stored cookies when the response sets any.
    pub(crate) fn absorb_cookies(&self, headers: &HeaderMap) {
        let cookies: Vec<String> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        self.session.replace_cookies(cookies);
    }

    /// Send the request and absorb cookies; transport failures are logged.
    pub(crate) async fn dispatch(
        &self,
        request: RequestBuilder,
        label: &str,
        tid: Option<&str>,
        timer: &RequestTimer,
    ) -> Result<reqwest::Response, ClientError> {
        match request.send().await {
            Ok(response) => {
                self.absorb_cookies(response.headers());
                Ok(response)
            }
            Err(e) => {
                timer.finish().log(label, tid, None, false);
                Err(transport_failure(
                    label,
                    tid,
                    &e,
                    self.config.http.request_timeout(),
                ))
            }
        }
    }

    /// Full exchange for JSON endpoints: dispatch, read, classify, log.
    pub(crate) async fn exchange(
        &self,
        request: RequestBuilder,
        label: &str,
        tid: Option<&str>,
    ) -> Result<Value, ClientError> {
        let mut timer = RequestTimer::start();
        let response = self.dispatch(request, label, tid, &timer).await?;
        timer.mark_headers();
        self.classify(response, label, tid, &timer).await
    }

    pub(crate) async fn classify(
        &self,
        response: reqwest::Response,
        label: &str,
        tid: Option<&str>,
        timer: &RequestTimer,
    ) -> Result<Value, ClientError> {
        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                timer.finish().log(label, tid, Some(status.as_u16()), false);
                return Err(transport_failure(
                    label,
                    tid,
                    &e,
                    self.config.http.request_timeout(),
                ));
            }
        };

        let outcome = ResponseOutcome::classify(
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            &body,
        );
        timer
            .finish()
            .log(label, tid, Some(status.as_u16()), outcome.is_success());

        if let ResponseOutcome::ApplicationError { code, message } = &outcome {
            tracing::warn!(operation = label, tid = tid.unwrap_or("-"), code = %code, message = %message, "server rejected request");
        }

        outcome.into_result(label, tid)
    }
}

pub(crate) fn transport_failure(
    label: &str,
    tid: Option<&str>,
    err: &reqwest::Error,
    timeout: Duration,
) -> ClientError {
    let message = if err.is_timeout() {
        format!("timed out after {}s", timeout.as_secs())
    } else {
        err.to_string()
    };

    ClientError::Transport {
        operation: label.to_string(),
        tid: tid.map(str::to_string),
        status: err.status().map(|s| s.as_u16()),
        message,
    }
}
