//! HTTP transport.
//!
//! Talks to the `/sharings` API of a remote instance with `reqwest`. Error
//! answers are turned back into [`SyncError`] from their status code.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use sharing_perms::AccessToken;

use crate::error::{Result, SyncError};
use crate::messages::{
    AnswerRequest, AnswerResponse, BulkDocsRequest, DelegatedAdd, MembersUpdate, RefreshRequest,
    RevsDiffRequest, RevsDiffResponse, SharingRequest, UploadKey,
};
use crate::transport::{RemoteTarget, Transport};

/// Transport over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::TransportError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn url(target: &RemoteTarget, path: &str) -> String {
        format!("{}{}", target.instance.trim_end_matches('/'), path)
    }

    async fn send(&self, target: &RemoteTarget, request: RequestBuilder) -> Result<Response> {
        let request = match &target.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout(format!("{}: {}", target.instance, e))
            } else {
                SyncError::TransportError(format!("{}: {}", target.instance, e))
            }
        })?;
        let status = response.status();
        trace!(instance = %target.instance, status = status.as_u16(), "response");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(instance = %target.instance, status = status.as_u16(), "request refused");
        Err(SyncError::from_status(status.as_u16(), body))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| SyncError::InvalidMessage(format!("failed to parse response: {}", e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_sharing_request(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &SharingRequest,
    ) -> Result<()> {
        let url = Self::url(target, &format!("/sharings/{}", sharing_id));
        self.send(target, self.client.put(url).json(request)).await?;
        Ok(())
    }

    async fn answer(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &AnswerRequest,
    ) -> Result<AnswerResponse> {
        let url = Self::url(target, &format!("/sharings/{}/answer", sharing_id));
        let response = self.send(target, self.client.post(url).json(request)).await?;
        Self::json(response).await
    }

    async fn refresh_token(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        refresh_token: &str,
    ) -> Result<AccessToken> {
        let url = Self::url(target, &format!("/sharings/{}/access_token", sharing_id));
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let response = self.send(target, self.client.post(url).json(&body)).await?;
        Self::json(response).await
    }

    async fn revs_diff(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &RevsDiffRequest,
    ) -> Result<RevsDiffResponse> {
        let url = Self::url(target, &format!("/sharings/{}/_revs_diff", sharing_id));
        let response = self.send(target, self.client.post(url).json(request)).await?;
        Self::json(response).await
    }

    async fn bulk_docs(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &BulkDocsRequest,
    ) -> Result<()> {
        let url = Self::url(target, &format!("/sharings/{}/_bulk_docs", sharing_id));
        self.send(target, self.client.post(url).json(request)).await?;
        Ok(())
    }

    async fn get_document(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        doctype: &str,
        id: &str,
    ) -> Result<Value> {
        let url = Self::url(target, &format!("/sharings/{}/{}/{}", sharing_id, doctype, id));
        let response = self.send(target, self.client.get(url)).await?;
        Self::json(response).await
    }

    async fn upload_metadata(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        id: &str,
        doc: &Value,
    ) -> Result<Option<UploadKey>> {
        let url = Self::url(
            target,
            &format!("/sharings/{}/io.cozy.files/{}/metadata", sharing_id, id),
        );
        let response = self.send(target, self.client.put(url).json(doc)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(Self::json(response).await?))
    }

    async fn upload_content(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        key: &str,
        content: Bytes,
    ) -> Result<()> {
        let url = Self::url(target, &format!("/sharings/{}/io.cozy.files/{}", sharing_id, key));
        let request = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        self.send(target, request).await?;
        Ok(())
    }

    async fn end_initial(&self, target: &RemoteTarget, sharing_id: &str) -> Result<()> {
        let url = Self::url(target, &format!("/sharings/{}/initial", sharing_id));
        self.send(target, self.client.delete(url)).await?;
        Ok(())
    }

    async fn revoke(&self, target: &RemoteTarget, sharing_id: &str) -> Result<()> {
        let url = Self::url(target, &format!("/sharings/{}", sharing_id));
        self.send(target, self.client.delete(url)).await?;
        Ok(())
    }

    async fn update_members(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        update: &MembersUpdate,
    ) -> Result<()> {
        let url = Self::url(target, &format!("/sharings/{}/recipients", sharing_id));
        self.send(target, self.client.put(url).json(update)).await?;
        Ok(())
    }

    async fn delegated_add(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &DelegatedAdd,
    ) -> Result<MembersUpdate> {
        let url = Self::url(target, &format!("/sharings/{}/recipients/delegated", sharing_id));
        let response = self.send(target, self.client.post(url).json(request)).await?;
        Self::json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MissingRevs;
    use serde_json::json;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5)).unwrap()
    }

    fn target(server: &MockServer) -> RemoteTarget {
        RemoteTarget::new(server.uri(), Some("tok".into()))
    }

    #[tokio::test]
    async fn test_revs_diff_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sharings/s1/_revs_diff"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "io.cozy.files/abc": { "missing": ["2-b"] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = RevsDiffRequest::new();
        request.insert("io.cozy.files/abc".into(), vec!["2-b".into()]);
        let response = transport()
            .revs_diff(&target(&server), "s1", &request)
            .await
            .unwrap();
        assert_eq!(
            response["io.cozy.files/abc"],
            MissingRevs {
                missing: vec!["2-b".into()],
                possible_ancestors: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sharings/s1/_bulk_docs"))
            .respond_with(ResponseTemplate::new(403).set_body_string("revoked"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/sharings/s1/initial"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sharings/s1/io.cozy.files/d1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let transport = transport();
        let target = target(&server);
        let err = transport
            .bulk_docs(&target, "s1", &BulkDocsRequest::new())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert!(err.to_string().contains("revoked"));

        let err = transport.end_initial(&target, "s1").await.unwrap_err();
        assert!(matches!(err, SyncError::Internal(_)));

        let err = transport
            .get_document(&target, "s1", "io.cozy.files", "d1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_upload_metadata_and_content() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/sharings/s1/io.cozy.files/f1/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "key": "k1" })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/sharings/s1/io.cozy.files/f2/metadata"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/sharings/s1/io.cozy.files/k1"))
            .and(body_bytes(b"hello".to_vec()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport();
        let target = target(&server);
        let key = transport
            .upload_metadata(&target, "s1", "f1", &json!({"_id": "f1"}))
            .await
            .unwrap();
        assert_eq!(key, Some(UploadKey { key: "k1".into() }));
        let none = transport
            .upload_metadata(&target, "s1", "f2", &json!({"_id": "f2"}))
            .await
            .unwrap();
        assert_eq!(none, None);
        transport
            .upload_content(&target, "s1", "k1", Bytes::from_static(b"hello"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_token_is_anonymous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sharings/s1/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new_access",
                "refresh_token": "refresh"
            })))
            .mount(&server)
            .await;

        let token = transport()
            .refresh_token(&target(&server).anonymous(), "s1", "refresh")
            .await
            .unwrap();
        assert_eq!(token.access_token, "new_access");

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_instance() {
        let target = RemoteTarget::new("http://127.0.0.1:9", None);
        let err = transport().end_initial(&target, "s1").await.unwrap_err();
        assert!(matches!(err, SyncError::TransportError(_) | SyncError::Timeout(_)));
    }
}
