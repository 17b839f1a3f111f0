//! REST client for the durable surface

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use parley_common::{ConversationView, MessageView, UserId, UserInfo};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

pub struct RestClient {
    http: Client,
    config: ClientConfig,
    token: Option<String>,
}

impl RestClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            config,
            token: None,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.authorize(self.http.request(method, self.config.url(path)))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Turn a non-success response into `ClientError::Status`
    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(text);
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = Self::check(req.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn send_empty(&self, req: RequestBuilder) -> Result<()> {
        Self::check(req.send().await?).await?;
        Ok(())
    }

    // --- accounts ---

    pub async fn signup(&mut self, name: &str, email: &str, password: &str) -> Result<AuthResponse> {
        let req = self
            .request(Method::POST, "/user/signup")
            .json(&json!({"name": name, "email": email, "password": password}));
        let auth: AuthResponse = self.send_json(req).await?;
        debug!("Signed up as {}", auth.user.id);
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<AuthResponse> {
        let req = self
            .request(Method::POST, "/user/login")
            .json(&json!({"email": email, "password": password}));
        let auth: AuthResponse = self.send_json(req).await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    pub async fn logout(&mut self) -> Result<()> {
        let req = self.request(Method::POST, "/user/logout");
        self.send_empty(req).await?;
        self.token = None;
        Ok(())
    }

    pub async fn me(&self) -> Result<UserInfo> {
        self.send_json(self.request(Method::GET, "/user/me")).await
    }

    pub async fn list_users(&self) -> Result<Vec<UserInfo>> {
        self.send_json(self.request(Method::GET, "/user/all")).await
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserInfo>> {
        let url = Url::parse_with_params(&self.config.url("/user/search"), &[("query", query)])
            .map_err(|e| ClientError::Url(e.to_string()))?;
        self.send_json(self.authorize(self.http.get(url))).await
    }

    // --- conversations ---

    pub async fn access_direct(&self, other: &str) -> Result<ConversationView> {
        let req = self
            .request(Method::POST, "/chat")
            .json(&json!({"userId": other}));
        self.send_json(req).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationView>> {
        self.send_json(self.request(Method::GET, "/chat")).await
    }

    pub async fn create_group(&self, name: &str, users: &[UserId]) -> Result<ConversationView> {
        let req = self
            .request(Method::POST, "/chat/group")
            .json(&json!({"name": name, "users": users}));
        self.send_json(req).await
    }

    pub async fn rename_group(&self, chat_id: &str, name: &str) -> Result<ConversationView> {
        let req = self
            .request(Method::PUT, "/chat/rename")
            .json(&json!({"chatId": chat_id, "chatName": name}));
        self.send_json(req).await
    }

    pub async fn add_member(&self, chat_id: &str, user_id: &str) -> Result<ConversationView> {
        let req = self
            .request(Method::PUT, "/chat/groupadd")
            .json(&json!({"chatId": chat_id, "userId": user_id}));
        self.send_json(req).await
    }

    pub async fn remove_member(&self, chat_id: &str, user_id: &str) -> Result<ConversationView> {
        let req = self
            .request(Method::PUT, "/chat/groupremove")
            .json(&json!({"chatId": chat_id, "userId": user_id}));
        self.send_json(req).await
    }

    pub async fn get_conversation(&self, chat_id: &str) -> Result<ConversationView> {
        self.send_json(self.request(Method::GET, &format!("/chat/{}", chat_id)))
            .await
    }

    pub async fn update_conversation(
        &self,
        chat_id: &str,
        name: Option<&str>,
    ) -> Result<ConversationView> {
        let req = self
            .request(Method::PUT, &format!("/chat/{}", chat_id))
            .json(&json!({ "name": name }));
        self.send_json(req).await
    }

    pub async fn delete_conversation(&self, chat_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &format!("/chat/{}", chat_id)))
            .await
    }

    // --- messages ---

    /// Durable send; the returned message is what `sendLive` should carry.
    pub async fn send_message(&self, chat_id: &str, content: &str) -> Result<MessageView> {
        let req = self
            .request(Method::POST, "/message")
            .json(&json!({"chatId": chat_id, "content": content}));
        self.send_json(req).await
    }

    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageView>> {
        self.send_json(self.request(Method::GET, &format!("/message/{}", chat_id)))
            .await
    }
}
