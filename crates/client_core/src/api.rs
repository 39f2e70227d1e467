use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use shared::{
    domain::{BoardId, NotificationId, UserId, UserSummary},
    error::{ApiError, ErrorCode},
    protocol::{
        ConversationSummary, DirectMessagePage, DirectMessagePayload, GroupMessagePayload,
        LoginRequest, LoginResponse, NotificationPage, NotificationQuery,
        SendDirectMessageRequest,
    },
};

/// REST endpoints the realtime layer consumes. `token` is the bearer credential.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse>;
    async fn current_user(&self, token: &str) -> Result<UserSummary>;
    async fn list_direct_messages(
        &self,
        token: &str,
        peer: UserId,
        page: u32,
        limit: u32,
    ) -> Result<DirectMessagePage>;
    async fn send_direct_message(
        &self,
        token: &str,
        receiver_id: UserId,
        text: &str,
    ) -> Result<DirectMessagePayload>;
    async fn list_conversations(&self, token: &str) -> Result<Vec<ConversationSummary>>;
    async fn list_friends(&self, token: &str) -> Result<Vec<UserSummary>>;
    async fn list_group_messages(
        &self,
        token: &str,
        board_id: BoardId,
    ) -> Result<Vec<GroupMessagePayload>>;
    async fn list_notifications(
        &self,
        token: &str,
        query: NotificationQuery,
    ) -> Result<NotificationPage>;
    async fn mark_notification_read(&self, token: &str, id: NotificationId) -> Result<()>;
    async fn mark_all_notifications_read(&self, token: &str) -> Result<()>;
}

#[derive(Serialize)]
struct PageQuery {
    page: u32,
    limit: u32,
}

pub struct HttpChatApi {
    http: Client,
    server_url: String,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    async fn execute(request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let api_error = match response.json::<ApiError>().await {
            Ok(api_error) => api_error,
            Err(_) => ApiError::new(error_code_for(status), status.to_string()),
        };
        Err(anyhow!(api_error).context(format!("{what}: server returned {status}")))
    }
}

fn error_code_for(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::Validation,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
        _ => ErrorCode::Internal,
    }
}

/// True when `err` carries a server-side authentication rejection.
pub fn is_auth_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>()
        .is_some_and(ApiError::is_auth_failure)
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let request = self.http.post(self.url("/auth/login")).json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        });
        Ok(Self::execute(request, "login").await?.json().await?)
    }

    async fn current_user(&self, token: &str) -> Result<UserSummary> {
        let request = self.http.get(self.url("/auth/me")).bearer_auth(token);
        Ok(Self::execute(request, "identity check").await?.json().await?)
    }

    async fn list_direct_messages(
        &self,
        token: &str,
        peer: UserId,
        page: u32,
        limit: u32,
    ) -> Result<DirectMessagePage> {
        let request = self
            .http
            .get(self.url(&format!("/messages/{}", peer.0)))
            .bearer_auth(token)
            .query(&PageQuery {
                page,
                limit: limit.clamp(1, 100),
            });
        Ok(Self::execute(request, "list direct messages")
            .await?
            .json()
            .await?)
    }

    async fn send_direct_message(
        &self,
        token: &str,
        receiver_id: UserId,
        text: &str,
    ) -> Result<DirectMessagePayload> {
        let request = self
            .http
            .post(self.url("/messages"))
            .bearer_auth(token)
            .json(&SendDirectMessageRequest {
                receiver_id,
                text: text.to_string(),
            });
        Ok(Self::execute(request, "send direct message")
            .await?
            .json()
            .await?)
    }

    async fn list_conversations(&self, token: &str) -> Result<Vec<ConversationSummary>> {
        let request = self
            .http
            .get(self.url("/messages/conversations"))
            .bearer_auth(token);
        Ok(Self::execute(request, "list conversations")
            .await?
            .json()
            .await?)
    }

    async fn list_friends(&self, token: &str) -> Result<Vec<UserSummary>> {
        let request = self.http.get(self.url("/friends")).bearer_auth(token);
        Ok(Self::execute(request, "list friends").await?.json().await?)
    }

    async fn list_group_messages(
        &self,
        token: &str,
        board_id: BoardId,
    ) -> Result<Vec<GroupMessagePayload>> {
        let request = self
            .http
            .get(self.url(&format!("/boards/{}/messages", board_id.0)))
            .bearer_auth(token);
        Ok(Self::execute(request, "list group messages")
            .await?
            .json()
            .await?)
    }

    async fn list_notifications(
        &self,
        token: &str,
        query: NotificationQuery,
    ) -> Result<NotificationPage> {
        let request = self
            .http
            .get(self.url("/notifications"))
            .bearer_auth(token)
            .query(&query);
        Ok(Self::execute(request, "list notifications")
            .await?
            .json()
            .await?)
    }

    async fn mark_notification_read(&self, token: &str, id: NotificationId) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!("/notifications/{}/read", id.0)))
            .bearer_auth(token);
        Self::execute(request, "mark notification read").await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, token: &str) -> Result<()> {
        let request = self
            .http
            .patch(self.url("/notifications/read-all"))
            .bearer_auth(token);
        Self::execute(request, "mark all notifications read").await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
