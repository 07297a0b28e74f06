//! Shared per-connection session state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use super::ClientError;
use crate::protocol::envelope::{lenient_string, list_or_map_values};

/// Company membership as reported by the login response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub comp_seq: String,
    #[serde(deserialize_with = "lenient_string")]
    pub biz_seq: String,
    #[serde(deserialize_with = "lenient_string")]
    pub dept_seq: String,
    #[serde(deserialize_with = "lenient_string")]
    pub email_addr: String,
    #[serde(deserialize_with = "lenient_string")]
    pub email_domain: String,
}

/// Company context attached to most operation payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyInfo {
    pub comp_seq: String,
    pub biz_seq: String,
    pub dept_seq: String,
    pub email_addr: String,
    pub email_domain: String,
}

/// Login result retained for the lifetime of the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub emp_seq: String,
    #[serde(deserialize_with = "lenient_string")]
    pub comp_seq: String,
    #[serde(deserialize_with = "lenient_string")]
    pub biz_seq: String,
    #[serde(deserialize_with = "lenient_string")]
    pub dept_seq: String,
    #[serde(deserialize_with = "lenient_string")]
    pub group_seq: String,
    #[serde(deserialize_with = "lenient_string")]
    pub token: String,
    #[serde(deserialize_with = "lenient_string")]
    pub comp_domain: String,
    #[serde(deserialize_with = "lenient_string")]
    pub native_lang_code: String,
    #[serde(deserialize_with = "list_or_map_values")]
    pub company_list: Vec<CompanyEntry>,
    /// `"<eventType>_<eventSubType>"` to `alertYN`.
    #[serde(skip)]
    pub alert_settings: HashMap<String, String>,
    /// Fields this client does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LoginInfo {
    /// Company entry matching the login's comp/biz/dept sequence.
    pub fn company_info(&self) -> Option<CompanyInfo> {
        self.company_list
            .iter()
            .find(|c| {
                c.comp_seq == self.comp_seq
                    && c.biz_seq == self.biz_seq
                    && c.dept_seq == self.dept_seq
            })
            .map(|c| CompanyInfo {
                comp_seq: c.comp_seq.clone(),
                biz_seq: c.biz_seq.clone(),
                dept_seq: c.dept_seq.clone(),
                email_addr: c.email_addr.clone(),
                email_domain: c.email_domain.clone(),
            })
    }
}

/// Mutable connection state read by every request.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub mobile_id: String,
    pub login_id: String,
    pub auth_token: String,
    /// Raw `Set-Cookie` values from the most recent response that carried any.
    pub session_cookies: Vec<String>,
    pub app_type: String,
    pub os_type: String,
    pub login_info: Option<LoginInfo>,
}

impl SessionState {
    pub fn new(
        mobile_id: impl Into<String>,
        app_type: impl Into<String>,
        os_type: impl Into<String>,
    ) -> Self {
        Self {
            mobile_id: mobile_id.into(),
            app_type: app_type.into(),
            os_type: os_type.into(),
            ..Default::default()
        }
    }

    /// Requests may not leave without a device identity.
    pub fn ensure_ready(&self) -> Result<(), ClientError> {
        if self.mobile_id.trim().is_empty() {
            return Err(ClientError::MissingMobileId);
        }
        Ok(())
    }

    /// `Cookie` header value built from stored `Set-Cookie` strings.
    /// Attributes after the first `;` are dropped.
    pub fn cookie_header(&self) -> Option<String> {
        let pairs: Vec<&str> = self
            .session_cookies
            .iter()
            .filter_map(|c| c.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

/// Cloneable handle over the shared session.
///
/// Reads hand out snapshots so no request holds the lock across an await.
/// Writes are last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    state: Arc<RwLock<SessionState>>,
}

impl SessionStore {
    pub fn new(state: SessionState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Session lock poisoned during read, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Session lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.read().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.write())
    }

    pub fn mobile_id(&self) -> String {
        self.read().mobile_id.clone()
    }

    pub fn token(&self) -> String {
        self.read().auth_token.clone()
    }

    pub fn cookie_header(&self) -> Option<String> {
        self.read().cookie_header()
    }

    /// Replace the stored cookies wholesale. Empty input is ignored.
    pub fn replace_cookies(&self, cookies: Vec<String>) {
        if cookies.is_empty() {
            return;
        }
        tracing::debug!(count = cookies.len(), "session cookies replaced");
        self.write().session_cookies = cookies;
    }

    pub fn login_info(&self) -> Option<LoginInfo> {
        self.read().login_info.clone()
    }

    /// Drop everything a login established. Device identity stays.
    pub fn clear_login(&self) {
        let mut state = self.write();
        state.login_id.clear();
        state.auth_token.clear();
        state.session_cookies.clear();
        state.login_info = None;
    }
}
