use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use msglink::{Client, ClientConfig, Operation};

use super::MOBILE_ID;

pub const SESSION_COOKIE: &str = "JSESSIONID=mock-session";
pub const LOGIN_TOKEN: &str = "login-token";

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub route: String,
    pub cookie: Option<String>,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Default)]
struct MockState {
    base_url: Arc<Mutex<String>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    uploads: Arc<Mutex<Vec<UploadedFile>>>,
    overrides: Arc<Mutex<HashMap<String, (u16, Value)>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    discovery_failure: Arc<Mutex<Option<(u16, Value)>>>,
    org_archive: Arc<Mutex<Option<Vec<u8>>>>,
    attachment: Arc<Mutex<Vec<u8>>>,
}

impl MockState {
    fn record(&self, route: impl Into<String>, headers: &HeaderMap, body: Value) {
        let cookie = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(Recorded {
            route: route.into(),
            cookie,
            body,
        });
    }

    fn override_for(&self, key: &str) -> Option<(u16, Value)> {
        self.overrides.lock().unwrap().get(key).cloned()
    }

    async fn delay_for(&self, key: &str) {
        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// In-process server speaking the messenger protocol.
pub struct MockServer {
    pub base_url: String,
    state: MockState,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/check", get(discovery))
            .route("/op/:pid", post(operation))
            .route("/upload", post(upload))
            .route("/download", post(download))
            .route("/org/:name", get(org_archive))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{addr}");
        *state.base_url.lock().unwrap() = base_url.clone();

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });

        Self { base_url, state }
    }

    pub fn check_url(&self) -> String {
        format!("{}/check", self.base_url)
    }

    pub fn org_url(&self) -> String {
        format!("{}/org/Org.zip", self.base_url)
    }

    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.server.protocol_check_url = self.check_url();
        config.device.mobile_id = MOBILE_ID.to_string();
        config.device.app_version = "1.0.0".to_string();
        config
    }

    pub fn client(&self) -> Client {
        Client::new(self.config()).expect("client")
    }

    pub async fn discovered_client(&self) -> Client {
        let client = self.client();
        client.discover().await.expect("discovery");
        client
    }

    //-- Behaviour

    /// Fixed reply for every call of `op`.
    pub fn respond(&self, op: Operation, status: u16, body: Value) {
        self.state
            .overrides
            .lock()
            .unwrap()
            .insert(op.pid().to_string(), (status, body));
    }

    pub fn delay(&self, op: Operation, delay: Duration) {
        self.state
            .delays
            .lock()
            .unwrap()
            .insert(op.pid().to_string(), delay);
    }

    pub fn fail_discovery(&self, status: u16, body: Value) {
        *self.state.discovery_failure.lock().unwrap() = Some((status, body));
    }

    pub fn restore_discovery(&self) {
        *self.state.discovery_failure.lock().unwrap() = None;
    }

    pub fn serve_org_archive(&self, bytes: Vec<u8>) {
        *self.state.org_archive.lock().unwrap() = Some(bytes);
    }

    pub fn serve_attachment(&self, bytes: &[u8]) {
        *self.state.attachment.lock().unwrap() = bytes.to_vec();
    }

    //-- Inspection

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, op: Operation) -> Vec<Recorded> {
        let route = route_for(op);
        self.requests()
            .into_iter()
            .filter(|r| r.route == route)
            .collect()
    }

    pub fn routes(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.route).collect()
    }

    pub fn uploads(&self) -> Vec<UploadedFile> {
        self.state.uploads.lock().unwrap().clone()
    }
}

pub fn route_for(op: Operation) -> String {
    match op {
        Operation::AttachFileUpload => "upload".to_string(),
        Operation::AttachFileDownload => "download".to_string(),
        other => other.pid().to_string(),
    }
}

pub fn login_result() -> Value {
    json!({
        "empSeq": 1001,
        "compSeq": "10",
        "bizSeq": "20",
        "deptSeq": "30",
        "groupSeq": "demo",
        "token": LOGIN_TOKEN,
        "compDomain": "gw.example.com",
        "alertList": [
            {"eventType": "MAIL", "eventSubType": "M001", "alertYN": "Y"},
            {"eventType": "EA", "eventSubType": "E002", "alertYN": "N"}
        ],
        "companyList": [
            {"compSeq": "10", "bizSeq": "20", "deptSeq": "30", "emailAddr": "kim", "emailDomain": "example.com"},
            {"compSeq": "11", "bizSeq": "21", "deptSeq": "31", "emailAddr": "kim2", "emailDomain": "other.com"}
        ]
    })
}

fn success(result: Value) -> Value {
    json!({"resultCode": "0", "resultMessage": "success", "result": result})
}

fn reply(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

//===========
// Handlers
//===========
async fn discovery(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.record("check", &headers, json!(query));

    if let Some((status, body)) = state.discovery_failure.lock().unwrap().clone() {
        return reply(status, body);
    }

    let base = state.base_url.lock().unwrap().clone();
    let list: Vec<Value> = Operation::ALL
        .iter()
        .map(|op| {
            let url = match op {
                Operation::AttachFileUpload => format!("{base}/upload"),
                Operation::AttachFileDownload => format!("{base}/download"),
                other => format!("{base}/op/{}", other.pid()),
            };
            json!({"protocolId": op.pid(), "protocolUrl": url})
        })
        .collect();

    let mut response = reply(200, success(json!({"protocolList": list})));
    response.headers_mut().insert(
        header::SET_COOKIE,
        format!("{SESSION_COOKIE}; Path=/; HttpOnly")
            .parse()
            .expect("cookie header"),
    );
    response
}

async fn operation(
    State(state): State<MockState>,
    Path(pid): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.record(pid.clone(), &headers, envelope.clone());
    state.delay_for(&pid).await;

    if let Some((status, body)) = state.override_for(&pid) {
        return reply(status, body);
    }

    match pid.as_str() {
        "P076" => reply(200, success(login_result())),
        _ => reply(
            200,
            success(json!({
                "pid": pid,
                "tid": envelope["header"]["tid"].clone(),
            })),
        ),
    }
}

async fn upload(
    State(state): State<MockState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let mut fields = serde_json::Map::new();

    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.expect("field bytes").to_vec();

        if file_name.is_some() {
            state.uploads.lock().unwrap().push(UploadedFile {
                field: name,
                file_name,
                bytes,
            });
        } else {
            fields.insert(name, Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        }
    }
    state.record("upload", &headers, Value::Object(fields));

    if let Some((status, body)) = state.override_for("P063") {
        return reply(status, body);
    }
    reply(200, success(json!({"fileId": "F-UPLOADED"})))
}

async fn download(State(state): State<MockState>, headers: HeaderMap, body: String) -> Response {
    let form: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    state.record("download", &headers, json!(form));

    if let Some((status, body)) = state.override_for("P084") {
        return reply(status, body);
    }

    let bytes = state.attachment.lock().unwrap().clone();
    (StatusCode::OK, bytes).into_response()
}

async fn org_archive(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.record(format!("org/{name}"), &headers, Value::Null);

    match state.org_archive.lock().unwrap().clone() {
        Some(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/zip")],
            bytes,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
