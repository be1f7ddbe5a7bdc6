//! Twilio REST call-control client.
//!
//! Fetches call status and replaces the instructions of a live call via
//! `/2010-04-01/Accounts/{sid}/Calls/{call}.json`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use helpline_core::config::Config;

use crate::{CALL_NOT_IN_PROGRESS, Telephony, TelephonyError, VoiceScript};

const TWILIO_BASE_URL: &str = "https://api.twilio.com";

pub struct TwilioClient {
    pub base_url: String,
    credentials: Option<(String, String)>,
    client: reqwest::Client,
}

impl TwilioClient {
    pub fn new(base_url: Option<&str>, account_sid: &str, auth_token: &str) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(TWILIO_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            credentials: Some((account_sid.to_string(), auth_token.to_string())),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config. Missing credentials yield a client whose every
    /// request fails with [`TelephonyError::NotConfigured`].
    pub fn from_config(config: &Config) -> Self {
        let telephony = config.telephony.clone().unwrap_or_default();
        let credentials = telephony
            .resolve_account_sid()
            .zip(telephony.resolve_auth_token());
        Self {
            base_url: config.telephony_base_url().trim_end_matches('/').to_string(),
            credentials,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn call_url(&self, account_sid: &str, call_id: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, account_sid, call_id
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, TelephonyError> {
        let response = request
            .send()
            .await
            .map_err(|e| TelephonyError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TelephonyError::Transport(e.to_string()))?;
        trace!(status, body = %body, "Twilio response");
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(classify_error(status, &body))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallResource {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: Option<String>,
}

fn classify_error(status: u16, body: &str) -> TelephonyError {
    let parsed: ApiError = serde_json::from_str(body).unwrap_or_default();
    if parsed.code == Some(CALL_NOT_IN_PROGRESS) {
        return TelephonyError::NotInProgress;
    }
    TelephonyError::Http {
        status,
        code: parsed.code,
        message: parsed.message.unwrap_or_else(|| body.to_string()),
    }
}

#[async_trait]
impl Telephony for TwilioClient {
    async fn call_status(&self, call_id: &str) -> Result<String, TelephonyError> {
        let (sid, token) = self
            .credentials
            .as_ref()
            .ok_or(TelephonyError::NotConfigured)?;
        let body = self
            .send(
                self.client
                    .get(self.call_url(sid, call_id))
                    .basic_auth(sid, Some(token)),
            )
            .await?;
        let call: CallResource =
            serde_json::from_str(&body).map_err(|e| TelephonyError::Decode(e.to_string()))?;
        debug!(call_id, status = %call.status, "Fetched call status");
        Ok(call.status)
    }

    async fn update_call(&self, call_id: &str, script: &VoiceScript) -> Result<(), TelephonyError> {
        let (sid, token) = self
            .credentials
            .as_ref()
            .ok_or(TelephonyError::NotConfigured)?;
        let twiml = script.to_xml();
        self.send(
            self.client
                .post(self.call_url(sid, call_id))
                .basic_auth(sid, Some(token))
                .form(&[("Twiml", twiml.as_str())]),
        )
        .await?;
        debug!(call_id, "Updated live call");
        Ok(())
    }
}
