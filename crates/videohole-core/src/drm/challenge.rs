//! License challenge protocol
//!
//! A challenge is answered either by a license server over HTTP or by a
//! [`LicenseDelegate`]. Whatever the source, a missing or empty response
//! fails the transaction with [`Error::ChallengeFailure`]; nothing is
//! retried; the engine issues a fresh challenge if it wants another try.

use super::{ChallengeMessage, IdleScheduler, KeySessionId};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::types::DrmVariant;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

const PLAYREADY_SOAP_ACTION: &str =
    "\"http://schemas.microsoft.com/DRM/2007/03/protocols/AcquireLicense\"";

/// Resolves a challenge in-process or across a concurrency boundary
pub trait LicenseDelegate: Send + Sync {
    fn request_license(&self, challenge: &[u8]) -> Result<Bytes>;
}

impl<F> LicenseDelegate for F
where
    F: Fn(&[u8]) -> Result<Bytes> + Send + Sync,
{
    fn request_license(&self, challenge: &[u8]) -> Result<Bytes> {
        self(challenge)
    }
}

/// Where challenges of a session are answered
#[derive(Clone)]
pub enum ChallengeSource {
    LicenseServer(Url),
    Delegate(Arc<dyn LicenseDelegate>),
}

impl std::fmt::Debug for ChallengeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeSource::LicenseServer(url) => f.debug_tuple("LicenseServer").field(&url.as_str()).finish(),
            ChallengeSource::Delegate(_) => f.write_str("Delegate"),
        }
    }
}

/// How a resolved response reaches the engine
#[derive(Debug, Clone)]
pub enum KeyInstallMode {
    /// Install from inside the challenge callback
    Immediate,
    /// Install later from the idle queue
    Deferred(IdleScheduler),
}

/// Synchronous license server transaction
pub trait LicenseTransport: Send + Sync {
    fn transact(&self, url: &Url, variant: DrmVariant, challenge: &[u8]) -> Result<Bytes>;
}

/// HTTP POST transport for license servers.
///
/// Runs on engine callback threads, so it uses the blocking client. The
/// client is built on first use.
pub struct HttpLicenseTransport {
    headers: HashMap<String, String>,
    timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpLicenseTransport {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            headers: config.license_headers.clone(),
            timeout: config.license_timeout(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    /// Content headers a license server expects for `variant`
    fn content_headers(variant: DrmVariant) -> &'static [(&'static str, &'static str)] {
        match variant {
            DrmVariant::PlayReady => &[
                ("content-type", "text/xml; charset=utf-8"),
                ("soapaction", PLAYREADY_SOAP_ACTION),
            ],
            DrmVariant::Widevine => &[("content-type", "application/octet-stream")],
            DrmVariant::None => &[],
        }
    }
}

impl LicenseTransport for HttpLicenseTransport {
    #[instrument(skip_all, fields(url = %url, %variant, len = challenge.len()))]
    fn transact(&self, url: &Url, variant: DrmVariant, challenge: &[u8]) -> Result<Bytes> {
        let mut request = self.client()?.post(url.clone()).body(challenge.to_vec());
        for (name, value) in Self::content_headers(variant) {
            request = request.header(*name, *value);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::challenge(format!("license server returned {status}")));
        }
        debug!(
            content_type = ?response.headers().get(CONTENT_TYPE),
            "License server answered"
        );
        let body = response.bytes()?;
        if body.is_empty() {
            return Err(Error::challenge("license server returned an empty body"));
        }
        Ok(body)
    }
}

impl std::fmt::Debug for HttpLicenseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLicenseTransport")
            .field("headers", &self.headers.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One in-flight challenge/response exchange
#[derive(Debug)]
pub struct ChallengeTransaction {
    key_session: KeySessionId,
    message_type: i32,
    challenge: Bytes,
    response: Option<Bytes>,
}

impl ChallengeTransaction {
    pub fn new(message: ChallengeMessage) -> Self {
        Self {
            key_session: message.key_session,
            message_type: message.message_type,
            challenge: message.payload,
            response: None,
        }
    }

    pub fn key_session(&self) -> KeySessionId {
        self.key_session
    }

    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    pub fn challenge(&self) -> &[u8] {
        &self.challenge
    }

    pub fn response_len(&self) -> usize {
        self.response.as_ref().map_or(0, Bytes::len)
    }

    /// Obtain the response from `source`
    #[instrument(skip_all, fields(key_session = ?self.key_session, len = self.challenge.len()))]
    pub fn resolve(
        &mut self,
        source: Option<&ChallengeSource>,
        variant: DrmVariant,
        transport: &dyn LicenseTransport,
    ) -> Result<()> {
        let response = match source {
            Some(ChallengeSource::LicenseServer(url)) => transport.transact(url, variant, &self.challenge),
            Some(ChallengeSource::Delegate(delegate)) => delegate.request_license(&self.challenge),
            None => return Err(Error::challenge("no license server or delegate configured")),
        }
        .map_err(|e| match e {
            Error::ChallengeFailure(_) => e,
            other => Error::challenge(other.to_string()),
        })?;

        if response.is_empty() {
            return Err(Error::challenge("empty license response"));
        }
        info!(response_len = response.len(), "License response received");
        self.response = Some(response);
        Ok(())
    }

    /// Hand the response over for installation
    pub fn into_response(self) -> Result<Bytes> {
        self.response
            .ok_or_else(|| Error::challenge("transaction has no response"))
    }
}
