//! Sign-in chain: discovery, login, main count, menu list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::Client;
use crate::common::{ClientError, CompanyInfo, LoginInfo};
use crate::protocol::Operation;

/// What the caller supplies to sign in.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub login_id: String,
    pub password: String,
    /// Replaces the configured mobile id for this session when set.
    pub cloud_id: Option<String>,
}

impl Credentials {
    pub fn new(login_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login_id: login_id.into(),
            password: password.into(),
            cloud_id: None,
        }
    }

    pub fn with_cloud_id(mut self, cloud_id: impl Into<String>) -> Self {
        self.cloud_id = Some(cloud_id.into());
        self
    }
}

/// Results of the two follow-up calls made after login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSummary {
    pub main_count: Value,
    pub menu_list: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody<'a> {
    app_type: &'a str,
    app_ver: &'a str,
    device_id: &'a str,
    ip_address: &'a str,
    login_id: &'a str,
    mobile_id: &'a str,
    os_type: &'a str,
    passwd: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AlertSetting {
    #[serde(deserialize_with = "crate::protocol::envelope::lenient_string")]
    event_type: String,
    #[serde(deserialize_with = "crate::protocol::envelope::lenient_string")]
    event_sub_type: String,
    #[serde(rename = "alertYN", deserialize_with = "crate::protocol::envelope::lenient_string")]
    alert_yn: String,
}

impl Client {
    /// Run the full sign-in sequence. Steps are strictly ordered and the
    /// first failure is returned unchanged.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginSummary, ClientError> {
        if let Some(cloud_id) = credentials.cloud_id.as_deref().filter(|id| !id.is_empty()) {
            self.session()
                .update(|state| state.mobile_id = cloud_id.to_string());
        }

        let check_url = self.config().server.protocol_check_url.clone();
        self.discover_as(&check_url, &credentials.login_id).await?;

        self.authenticate(credentials).await?;

        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let main_count = self.main_count("", &today, "Y").await?;
        let menu_list = self.menu_list().await?;

        tracing::info!(login_id = %credentials.login_id, "login sequence complete");
        Ok(LoginSummary {
            main_count,
            menu_list,
        })
    }

    /// Login operation alone. Stores login id, token and login info on success.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<LoginInfo, ClientError> {
        let session = self.session().snapshot();
        let device = &self.config().device;

        let body = LoginBody {
            app_type: &session.app_type,
            app_ver: &device.app_version,
            device_id: &device.device_id,
            ip_address: &device.ip_address,
            login_id: &credentials.login_id,
            mobile_id: &session.mobile_id,
            os_type: &session.os_type,
            passwd: &credentials.password,
        };

        let result = self.send(Operation::Login, &body).await?;
        let info = parse_login_info(result)?;

        self.session().update(|state| {
            state.login_id = credentials.login_id.clone();
            state.auth_token = info.token.clone();
            state.login_info = Some(info.clone());
        });
        tracing::info!(login_id = %credentials.login_id, emp_seq = %info.emp_seq, "logged in");

        Ok(info)
    }

    /// Counters shown after sign-in.
    pub async fn main_count(
        &self,
        org_chart_dt: &str,
        start_date: &str,
        alert_new_yn: &str,
    ) -> Result<Value, ClientError> {
        let company_info = self.company_info()?;
        self.send(
            Operation::MainCount,
            &json!({
                "orgChartDt": org_chart_dt,
                "startDate": start_date,
                "alertNewYn": alert_new_yn,
                "companyInfo": company_info,
            }),
        )
        .await
    }

    /// Linked menu list for the signed-in company.
    pub async fn menu_list(&self) -> Result<Value, ClientError> {
        let company_info = self.company_info()?;
        self.send(
            Operation::MsgLinkList,
            &json!({ "companyInfo": company_info }),
        )
        .await
    }

    /// Company context of the current login.
    pub fn company_info(&self) -> Result<CompanyInfo, ClientError> {
        let info = self
            .session()
            .login_info()
            .ok_or_else(|| ClientError::InvalidRequest("not logged in".to_string()))?;

        info.company_info().ok_or_else(|| {
            ClientError::InvalidRequest(format!(
                "no company entry matches comp {} biz {} dept {}",
                info.comp_seq, info.biz_seq, info.dept_seq
            ))
        })
    }
}

fn parse_login_info(result: Value) -> Result<LoginInfo, ClientError> {
    let mut info: LoginInfo = serde_json::from_value(result)
        .map_err(|e| ClientError::InvalidResponse(format!("login result: {e}")))?;

    if let Some(alerts) = info.extra.remove("alertList") {
        info.alert_settings = alert_settings(alerts);
    }
    info.comp_domain = normalize_domain(&info.comp_domain);

    Ok(info)
}

fn alert_settings(alerts: Value) -> HashMap<String, String> {
    let entries: Vec<AlertSetting> = match alerts {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .map(|a| (format!("{}_{}", a.event_type, a.event_sub_type), a.alert_yn))
        .collect()
}

fn normalize_domain(domain: &str) -> String {
    if domain.is_empty() || domain.contains("http://") || domain.contains("https://") {
        domain.to_string()
    } else {
        format!("http://{domain}")
    }
}
