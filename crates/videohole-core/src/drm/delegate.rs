//! Cross-boundary license delegation
//!
//! The credential issuer lives on the async side of the process while
//! challenges arrive on engine callback threads. Each challenge becomes a
//! [`LicenseRequest`] carrying a one-shot reply channel and a correlation
//! token; the callback thread blocks until the issuer answers or goes away.
//! Timeouts are the issuer's business.

use super::challenge::LicenseDelegate;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Issues licenses for challenges
#[async_trait]
pub trait LicenseIssuer: Send + Sync {
    async fn issue(&self, token: Uuid, challenge: Bytes) -> Result<Bytes>;
}

/// A challenge waiting for the issuer
#[derive(Debug)]
pub struct LicenseRequest {
    pub token: Uuid,
    pub challenge: Bytes,
    reply: oneshot::Sender<Result<Bytes>>,
}

impl LicenseRequest {
    /// Send the reply. Returns false if the waiting side is gone.
    pub fn respond(self, response: Result<Bytes>) -> bool {
        let token = self.token;
        if self.reply.send(response).is_err() {
            debug!(%token, "License requester is gone");
            return false;
        }
        true
    }
}

/// Factory for the delegate/request pair
pub struct LicenseRendezvous;

impl LicenseRendezvous {
    pub fn channel() -> (RendezvousDelegate, LicenseRequests) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RendezvousDelegate { tx }, LicenseRequests { rx })
    }
}

/// Blocking delegate used on engine callback threads.
///
/// Must not be called from inside the async runtime.
#[derive(Debug, Clone)]
pub struct RendezvousDelegate {
    tx: mpsc::UnboundedSender<LicenseRequest>,
}

impl LicenseDelegate for RendezvousDelegate {
    #[instrument(skip_all, fields(len = challenge.len()))]
    fn request_license(&self, challenge: &[u8]) -> Result<Bytes> {
        let token = Uuid::new_v4();
        let (reply, waiter) = oneshot::channel();
        let request = LicenseRequest {
            token,
            challenge: Bytes::copy_from_slice(challenge),
            reply,
        };
        self.tx
            .send(request)
            .map_err(|_| Error::challenge("license issuer is gone"))?;
        debug!(%token, "License request posted");

        match waiter.blocking_recv() {
            Ok(response) => response,
            Err(_) => Err(Error::challenge(format!("license issuer dropped request {token}"))),
        }
    }
}

/// Receiving side, owned by the issuer
#[derive(Debug)]
pub struct LicenseRequests {
    rx: mpsc::UnboundedReceiver<LicenseRequest>,
}

impl LicenseRequests {
    pub async fn next(&mut self) -> Option<LicenseRequest> {
        self.rx.recv().await
    }

    /// Answer requests with `issuer` until every delegate is dropped
    pub async fn serve<I: LicenseIssuer>(mut self, issuer: I) {
        while let Some(request) = self.next().await {
            let result = issuer.issue(request.token, request.challenge.clone()).await;
            if let Err(e) = &result {
                warn!(token = %request.token, error = %e, "License issuer failed");
            }
            request.respond(result);
        }
        debug!("License request channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoIssuer;

    #[async_trait]
    impl LicenseIssuer for EchoIssuer {
        async fn issue(&self, _token: Uuid, challenge: Bytes) -> Result<Bytes> {
            let mut license = b"license:".to_vec();
            license.extend_from_slice(&challenge);
            Ok(Bytes::from(license))
        }
    }

    #[tokio::test]
    async fn test_blocking_delegate_round_trip() {
        let (delegate, requests) = LicenseRendezvous::channel();
        let server = tokio::spawn(requests.serve(EchoIssuer));

        let response = tokio::task::spawn_blocking(move || delegate.request_license(b"abc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&response[..], b"license:abc");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_request_fails() {
        let (delegate, mut requests) = LicenseRendezvous::channel();
        let caller = tokio::task::spawn_blocking(move || delegate.request_license(b"abc"));

        let request = requests.next().await.unwrap();
        assert_eq!(&request.challenge[..], b"abc");
        drop(request);

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ChallengeFailure(_)));
    }

    #[test]
    fn test_issuer_gone() {
        let (delegate, requests) = LicenseRendezvous::channel();
        drop(requests);
        assert!(matches!(
            delegate.request_license(b"abc"),
            Err(Error::ChallengeFailure(_))
        ));
    }
}
