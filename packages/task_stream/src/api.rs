//! Thread-scoped HTTP endpoints.
//!
//! Answering and canceling interactions, starting tasks, and listing running
//! tasks are plain request/response calls. They never go over a task channel.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use task_protocol::{
    AnswerRequest, BackgroundOp, InteractionId, OperationResponse, RunningTask,
    SubmitMessageRequest, SubmitMessageResponse, ThreadId,
};
use tracing::debug;
use url::Url;

use crate::endpoints::Endpoints;
use crate::error::StreamError;

#[async_trait]
pub trait TaskApi: Send + Sync + 'static {
    async fn submit_message(
        &self,
        thread_id: &ThreadId,
        content: &str,
    ) -> Result<SubmitMessageResponse, StreamError>;

    async fn start_operation(
        &self,
        thread_id: &ThreadId,
        op: BackgroundOp,
    ) -> Result<OperationResponse, StreamError>;

    async fn answer_interaction(
        &self,
        interaction_id: InteractionId,
        payload: serde_json::Value,
    ) -> Result<(), StreamError>;

    async fn cancel_interaction(&self, interaction_id: InteractionId) -> Result<(), StreamError>;

    async fn list_running_tasks(&self, thread_id: &ThreadId)
    -> Result<Vec<RunningTask>, StreamError>;
}

/// [`TaskApi`] over reqwest.
#[derive(Clone, Debug)]
pub struct HttpTaskApi {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpTaskApi {
    pub fn new(endpoints: Endpoints) -> Self {
        Self::with_client(reqwest::Client::new(), endpoints)
    }

    pub fn with_client(client: reqwest::Client, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, StreamError>
    where
        B: serde::Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!(%url, "POST");
        let resp = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(StreamError::from_reqwest)?;
        let resp = check_status(&url, resp).await?;
        resp.json().await.map_err(StreamError::from_reqwest)
    }

    /// POST whose response body is only an acknowledgement.
    async fn post_ack<B>(&self, url: Url, body: Option<&B>) -> Result<(), StreamError>
    where
        B: serde::Serialize + Sync,
    {
        debug!(%url, "POST");
        let mut req = self.client.post(url.clone());
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(StreamError::from_reqwest)?;
        check_status(&url, resp).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into [`StreamError::Api`], keeping the body.
async fn check_status(url: &Url, resp: reqwest::Response) -> Result<reqwest::Response, StreamError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StreamError::Api {
        endpoint: url.path().to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn submit_message(
        &self,
        thread_id: &ThreadId,
        content: &str,
    ) -> Result<SubmitMessageResponse, StreamError> {
        let body = SubmitMessageRequest {
            content: content.to_string(),
        };
        self.post_json(self.endpoints.submit_message_url(thread_id), &body)
            .await
    }

    async fn start_operation(
        &self,
        thread_id: &ThreadId,
        op: BackgroundOp,
    ) -> Result<OperationResponse, StreamError> {
        self.post_json(
            self.endpoints.operation_url(thread_id, op),
            &serde_json::json!({}),
        )
        .await
    }

    async fn answer_interaction(
        &self,
        interaction_id: InteractionId,
        payload: serde_json::Value,
    ) -> Result<(), StreamError> {
        let body = AnswerRequest { payload };
        self.post_ack(self.endpoints.answer_url(interaction_id), Some(&body))
            .await
    }

    async fn cancel_interaction(&self, interaction_id: InteractionId) -> Result<(), StreamError> {
        self.post_ack::<()>(self.endpoints.cancel_url(interaction_id), None)
            .await
    }

    async fn list_running_tasks(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<RunningTask>, StreamError> {
        let url = self.endpoints.running_tasks_url(thread_id);
        debug!(%url, "GET");
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(StreamError::from_reqwest)?;
        let resp = check_status(&url, resp).await?;
        resp.json().await.map_err(StreamError::from_reqwest)
    }
}
