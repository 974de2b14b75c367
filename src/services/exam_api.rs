use crate::dto::proctoring_dto::{ClipUploadMeta, ProctoringStatus, ProctoringViolationRequest};
use crate::dto::session_dto::{
    AssessmentPaper, AutosaveRequest, ErrorBody, ReportCheatingRequest, SavedAnswersResponse,
    SubmissionReceipt, SubmitWorkRequest,
};
use crate::error::{Error, Result};
use crate::models::answer::AnswerValue;
use crate::models::evidence_clip::EvidenceClip;
use crate::models::exam_session::ExamSession;
use crate::models::violation::{IncidentOrigin, ViolationEvent};
use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;
use validator::Validate;

/// The backend calls the session core depends on.
#[async_trait]
pub trait ExamBackend: Send + Sync {
    async fn fetch_assessment(&self, assessment_id: Uuid) -> Result<AssessmentPaper>;

    /// Creates (or resumes) the server-side session. The returned deadline is authoritative.
    async fn start_session(&self, assessment_id: Uuid) -> Result<ExamSession>;

    async fn report_violation(&self, session_id: Uuid, event: &ViolationEvent) -> Result<()>;

    async fn autosave_answers(&self, session_id: Uuid, answers: &[Option<AnswerValue>]) -> Result<()>;

    async fn fetch_saved_answers(&self, session_id: Uuid) -> Result<SavedAnswersResponse>;

    async fn submit_work(&self, assessment_id: Uuid, answers: &[AnswerValue]) -> Result<SubmissionReceipt>;

    async fn upload_evidence_clip(&self, clip: &EvidenceClip) -> Result<()>;

    /// Whether proctoring has closed the session server-side.
    async fn fetch_proctoring_status(&self, session_id: Uuid) -> Result<ProctoringStatus>;

    /// Releases the server's per-session proctoring state.
    async fn end_proctoring(&self, session_id: Uuid) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpExamBackend {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpExamBackend {
    pub fn new(base_url: &str, token: Option<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        // Url::join drops the last path segment unless it ends with '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)?;
        info!("Exam backend configured at {}", base_url);

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        Self::new(
            &config.api_base_url,
            config.api_token.clone(),
            std::time::Duration::from_secs(config.http_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn post_json<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.endpoint(path)?;
        debug!("POST {}", url);
        let resp = self.authorize(self.client.post(url)).json(body).send().await?;
        check_status(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);
        let resp = self.authorize(self.client.get(url)).send().await?;
        Ok(check_status(resp).await?.json::<T>().await?)
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| match b.error {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_else(|_| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            }
        });
    Err(Error::Backend {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ExamBackend for HttpExamBackend {
    async fn fetch_assessment(&self, assessment_id: Uuid) -> Result<AssessmentPaper> {
        self.get_json(&format!("assessments/{}/", assessment_id)).await
    }

    async fn start_session(&self, assessment_id: Uuid) -> Result<ExamSession> {
        let resp = self
            .post_json(
                &format!("assessments/{}/start-session/", assessment_id),
                &serde_json::json!({}),
            )
            .await?;
        Ok(resp.json::<ExamSession>().await?)
    }

    async fn report_violation(&self, session_id: Uuid, event: &ViolationEvent) -> Result<()> {
        match event.incident_type.origin() {
            IncidentOrigin::Client => {
                let body = ReportCheatingRequest {
                    incident_type: event.incident_type,
                    details: event.details.clone(),
                };
                body.validate()?;
                self.post_json(
                    &format!("assessments/sessions/{}/report-cheating/", session_id),
                    &body,
                )
                .await?;
            }
            IncidentOrigin::Proctoring => {
                let body = ProctoringViolationRequest {
                    violation_type: event.incident_type,
                    severity: event.severity,
                    details: event.details.clone(),
                };
                body.validate()?;
                self.post_json(&format!("proctoring/session/{}/violations/", session_id), &body)
                    .await?;
            }
        }
        Ok(())
    }

    async fn autosave_answers(&self, session_id: Uuid, answers: &[Option<AnswerValue>]) -> Result<()> {
        let body = AutosaveRequest {
            answers: answers.to_vec(),
        };
        self.post_json(&format!("assessments/sessions/{}/autosave/", session_id), &body)
            .await?;
        Ok(())
    }

    async fn fetch_saved_answers(&self, session_id: Uuid) -> Result<SavedAnswersResponse> {
        self.get_json(&format!("assessments/sessions/{}/saved-answers/", session_id))
            .await
    }

    async fn submit_work(&self, assessment_id: Uuid, answers: &[AnswerValue]) -> Result<SubmissionReceipt> {
        let body = SubmitWorkRequest {
            assessment: assessment_id,
            answers: answers.to_vec(),
        };
        let resp = self.post_json("assessments/submissions/", &body).await?;
        Ok(resp.json::<SubmissionReceipt>().await?)
    }

    async fn upload_evidence_clip(&self, clip: &EvidenceClip) -> Result<()> {
        let meta = ClipUploadMeta {
            session_id: clip.session_id,
            trigger_reason: clip.trigger_reason.as_str().to_string(),
            duration: clip.duration_seconds,
            severity: clip.trigger_severity,
            trigger_description: clip.trigger_description.clone(),
        };
        meta.validate()?;

        let video = multipart::Part::bytes(clip.blob.to_vec())
            .file_name(format!("clip_{}.webm", Uuid::new_v4()))
            .mime_str("video/webm")?;
        let form = multipart::Form::new()
            .text("session_id", meta.session_id.to_string())
            .text("trigger_reason", meta.trigger_reason)
            .text("duration", meta.duration.to_string())
            .text("severity", meta.severity.to_string())
            .text("trigger_description", meta.trigger_description)
            .part("video", video);

        let url = self.endpoint("proctoring/video-clip/")?;
        let resp = self.authorize(self.client.post(url)).multipart(form).send().await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn fetch_proctoring_status(&self, session_id: Uuid) -> Result<ProctoringStatus> {
        self.get_json(&format!("proctoring/session/{}/status/", session_id)).await
    }

    async fn end_proctoring(&self, session_id: Uuid) -> Result<()> {
        self.post_json(&format!("proctoring/session/{}/end/", session_id), &serde_json::json!({}))
            .await?;
        Ok(())
    }
}
