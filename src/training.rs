//! Remote training-job submission for the weekly cycle.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const SUBMIT_ROUTE: &str = "/api/2.1/jobs/runs/submit";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Client creation error: {0}")]
    ClientCreation(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Job submission rejected: HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid submission response: {0}")]
    Decode(String),
}

/// Fixed parameters of the weekly training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub run_name: String,
    pub cluster_id: String,
    pub notebook_path: String,
    /// Curated snapshot the notebook trains on.
    pub input_path: String,
    pub model_name: String,
    pub tracking_uri: String,
    /// Where the notebook writes its predictions.
    pub output_path: String,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    run_name: &'a str,
    existing_cluster_id: &'a str,
    notebook_task: NotebookTask<'a>,
}

#[derive(Debug, Serialize)]
struct NotebookTask<'a> {
    notebook_path: &'a str,
    base_parameters: BaseParameters<'a>,
}

#[derive(Debug, Serialize)]
struct BaseParameters<'a> {
    input_path: &'a str,
    model_name: &'a str,
    tracking_uri: &'a str,
    output_path: &'a str,
}

impl<'a> From<&'a TrainingJob> for SubmitRequest<'a> {
    fn from(job: &'a TrainingJob) -> Self {
        SubmitRequest {
            run_name: &job.run_name,
            existing_cluster_id: &job.cluster_id,
            notebook_task: NotebookTask {
                notebook_path: &job.notebook_path,
                base_parameters: BaseParameters {
                    input_path: &job.input_path,
                    model_name: &job.model_name,
                    tracking_uri: &job.tracking_uri,
                    output_path: &job.output_path,
                },
            },
        }
    }
}

/// Identifier the job service assigned to a submitted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedRun {
    pub run_id: i64,
}

#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, job: &TrainingJob, token: &SecretString)
        -> Result<SubmittedRun, SubmitError>;
}

/// HTTP client for the jobs API of the training workspace.
#[derive(Debug, Clone)]
pub struct TrainingJobClient {
    client: Client,
    host: String,
}

impl TrainingJobClient {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self, SubmitError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubmitError::ClientCreation(e.to_string()))?;
        Ok(TrainingJobClient {
            client,
            host: host.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn submit_url(&self) -> String {
        format!("{}{}", self.host, SUBMIT_ROUTE)
    }
}

#[async_trait]
impl JobSubmitter for TrainingJobClient {
    async fn submit(
        &self,
        job: &TrainingJob,
        token: &SecretString,
    ) -> Result<SubmittedRun, SubmitError> {
        let response = self
            .client
            .post(self.submit_url())
            .bearer_auth(token.expose_secret())
            .json(&SubmitRequest::from(job))
            .send()
            .await
            .map_err(|e| SubmitError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubmitError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let run: SubmittedRun = response
            .json()
            .await
            .map_err(|e| SubmitError::Decode(e.without_url().to_string()))?;
        info!(
            run_id = run.run_id,
            run_name = %job.run_name,
            model = %job.model_name,
            "training run submitted"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job() -> TrainingJob {
        TrainingJob {
            run_name: "energy_forecast_weekly".into(),
            cluster_id: "mlops-cluster".into(),
            notebook_path: "/Workspace/Shared/energy_forecast".into(),
            input_path: "processed/curated.parquet".into(),
            model_name: "nyis_forecast".into(),
            tracking_uri: "http://mlflow:5000".into(),
            output_path: "predictions/".into(),
        }
    }

    #[tokio::test]
    async fn test_submit_posts_notebook_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/2.1/jobs/runs/submit"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(serde_json::json!({
                "run_name": "energy_forecast_weekly",
                "existing_cluster_id": "mlops-cluster",
                "notebook_task": {
                    "notebook_path": "/Workspace/Shared/energy_forecast",
                    "base_parameters": {
                        "input_path": "processed/curated.parquet",
                        "model_name": "nyis_forecast",
                        "tracking_uri": "http://mlflow:5000",
                        "output_path": "predictions/"
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"run_id": 42})))
            .expect(1)
            .mount(&server)
            .await;

        let client = TrainingJobClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let run = client
            .submit(&job(), &SecretString::from("tok".to_string()))
            .await
            .unwrap();
        assert_eq!(run.run_id, 42);
    }

    #[tokio::test]
    async fn test_rejected_submission() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let client = TrainingJobClient::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
        let err = client
            .submit(&job(), &SecretString::from("bad".to_string()))
            .await
            .unwrap_err();
        match err {
            SubmitError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "invalid token");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_error_omits_url() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client =
            TrainingJobClient::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(5))
                .unwrap();
        let err = client
            .submit(&job(), &SecretString::from("tok".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Network(_)));
        assert!(!err.to_string().contains("runs/submit"));
    }
}
