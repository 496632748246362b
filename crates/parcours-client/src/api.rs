//! Request/response seam to the backend.
//!
//! The services are generic over [`ConversationApi`] and [`ProofApi`] so the
//! HTTP client can be swapped for an in-memory fake.

use std::future::Future;

use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::json;

use parcours_shared::{Conversation, Message, Proof, ProofDraft, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;

pub trait ConversationApi {
    /// All conversation summaries of the signed-in user.
    fn list_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<Conversation>, ClientError>> + Send;

    /// Full message history with one counterpart.
    fn fetch_history(
        &self,
        counterpart: &UserId,
    ) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send;

    /// Persist a text message and return the server's record of it.
    fn send_message(
        &self,
        counterpart: &UserId,
        content: &str,
    ) -> impl Future<Output = Result<Message, ClientError>> + Send;

    /// Mark every message received from `counterpart` as read.
    fn mark_read(&self, counterpart: &UserId)
        -> impl Future<Output = Result<(), ClientError>> + Send;
}

pub trait ProofApi {
    fn create_proof(
        &self,
        organization_id: &str,
        draft: &ProofDraft,
    ) -> impl Future<Output = Result<Proof, ClientError>> + Send;

    fn list_proofs(&self) -> impl Future<Output = Result<Vec<Proof>, ClientError>> + Send;

    /// Cheap reachability check used by the connectivity check.
    fn health(&self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// [`ConversationApi`] and [`ProofApi`] over the backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let base_url = Url::parse(&config.api_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", config.api_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(config.api_url.clone()));
        }

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Build a request to the base URL extended with `segments`. Each
    /// segment is percent-encoded, so ids containing `/` or spaces stay one
    /// segment.
    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL always has path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// Turn a non-2xx response into [`ClientError::Status`].
async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let resp = check_status(resp).await?;
    let text = resp.text().await?;
    Ok(serde_json::from_str(&text)?)
}

impl ConversationApi for HttpApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let resp = self
            .request(Method::GET, &["messages", "conversations"])
            .send()
            .await?;
        read_json(resp).await
    }

    async fn fetch_history(&self, counterpart: &UserId) -> Result<Vec<Message>, ClientError> {
        let resp = self
            .request(Method::GET, &["messages", counterpart.as_str()])
            .send()
            .await?;
        read_json(resp).await
    }

    async fn send_message(&self, counterpart: &UserId, content: &str) -> Result<Message, ClientError> {
        let resp = self
            .request(Method::POST, &["messages"])
            .json(&json!({
                "receiverId": counterpart,
                "content": content,
            }))
            .send()
            .await?;
        read_json(resp).await
    }

    async fn mark_read(&self, counterpart: &UserId) -> Result<(), ClientError> {
        let resp = self
            .request(Method::PUT, &["messages", counterpart.as_str(), "read"])
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

impl ProofApi for HttpApi {
    async fn create_proof(&self, organization_id: &str, draft: &ProofDraft) -> Result<Proof, ClientError> {
        let resp = self
            .request(Method::POST, &["proofs"])
            .json(&json!({
                "organizationId": organization_id,
                "title": draft.title,
                "category": draft.category,
                "description": draft.description,
                "attachmentUrl": draft.attachment_url,
            }))
            .send()
            .await?;
        read_json(resp).await
    }

    async fn list_proofs(&self) -> Result<Vec<Proof>, ClientError> {
        let resp = self.request(Method::GET, &["proofs"]).send().await?;
        read_json(resp).await
    }

    async fn health(&self) -> Result<(), ClientError> {
        let resp = self.request(Method::GET, &["health"]).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcours_shared::ProofStatus;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> HttpApi {
        let config = ClientConfig {
            api_url: server.uri(),
            token: Some("jeton".into()),
            ..ClientConfig::default()
        };
        HttpApi::new(&config).unwrap()
    }

    #[tokio::test]
    async fn lists_conversations_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/conversations"))
            .and(header("authorization", "Bearer jeton"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "userId": "coach-1",
                "name": "Claire Martin",
                "email": "claire@example.fr",
                "role": "COACH",
                "lastMessage": {
                    "content": "À demain",
                    "createdAt": "2024-05-02T08:30:00Z",
                    "isFromMe": false
                },
                "unreadCount": 2
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let conversations = api_for(&server).list_conversations().await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].user_id, UserId::from("coach-1"));
        assert_eq!(conversations[0].unread_count, 2);
    }

    #[tokio::test]
    async fn send_posts_receiver_and_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(body_partial_json(json!({
                "receiverId": "coach-1",
                "content": "Bonjour"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "m7",
                "senderId": "me",
                "receiverId": "coach-1",
                "content": "Bonjour",
                "type": "TEXT",
                "createdAt": "2024-05-02T09:00:00Z",
                "isFromMe": true,
                "isRead": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let message = api_for(&server)
            .send_message(&UserId::from("coach-1"), "Bonjour")
            .await
            .unwrap();
        assert_eq!(message.id.0, "m7");
        assert!(message.is_from_me);
    }

    #[tokio::test]
    async fn mark_read_uses_put() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/messages/coach-1/read"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server)
            .mark_read(&UserId::from("coach-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_proof_carries_organization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/proofs"))
            .and(body_partial_json(json!({
                "organizationId": "org-9",
                "title": "Dictée sans faute",
                "category": "ECRIT"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "p-100",
                "title": "Dictée sans faute",
                "category": "ECRIT",
                "description": "",
                "status": "PENDING",
                "createdAt": "2024-05-02T09:00:00Z"
            })))
            .mount(&server)
            .await;

        let proof = api_for(&server)
            .create_proof("org-9", &ProofDraft::new("Dictée sans faute", "ECRIT"))
            .await
            .unwrap();
        assert_eq!(proof.id.as_str(), "p-100");
        assert_eq!(proof.status, ProofStatus::Pending);
    }

    #[tokio::test]
    async fn server_errors_become_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proofs"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = api_for(&server).list_proofs().await.unwrap_err();
        match &err {
            ClientError::Status { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        let config = ClientConfig {
            api_url: "http://127.0.0.1:9".into(),
            ..ClientConfig::default()
        };
        let err = HttpApi::new(&config).unwrap().health().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn counterpart_ids_stay_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/messages/coach%201%2Fx/read"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages/coach%201%2Fx"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server);
        let odd = UserId::from("coach 1/x");
        api.mark_read(&odd).await.unwrap();
        assert!(api.fetch_history(&odd).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn base_path_and_trailing_slash_are_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = ClientConfig {
            api_url: format!("{}/api/", server.uri()),
            ..ClientConfig::default()
        };
        HttpApi::new(&config).unwrap().health().await.unwrap();
    }

    #[test]
    fn unusable_base_url_is_rejected() {
        for api_url in ["not a url", "mailto:coach@example.fr"] {
            let config = ClientConfig {
                api_url: api_url.into(),
                ..ClientConfig::default()
            };
            assert!(matches!(
                HttpApi::new(&config),
                Err(ClientError::InvalidUrl(_))
            ));
        }
    }
}
