//! Upload-to-result request pipeline
//!
//! One request runs strictly in order:
//!
//! 1. **Intake**: take the first file field from the multipart body and
//!    stage it to disk.
//! 2. **Invocation**: run the engine on the staged path and wait for it.
//! 3. **Translation**: exit 0 with JSON on stdout is the result; anything
//!    else becomes an [`AnalyzeError`].
//!
//! The pipeline holds no per-request state, so one instance serves all
//! concurrent requests.

use axum::extract::Multipart;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::engine::{AnalysisEngine, EngineOutput};
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::staging::{StagedFile, StagingArea, StagingError};

/// Intake, invocation and translation for `POST /analyze/`
pub struct AnalysisPipeline {
    staging: StagingArea,
    engine: Arc<dyn AnalysisEngine>,
}

impl AnalysisPipeline {
    pub fn new(staging: StagingArea, engine: Arc<dyn AnalysisEngine>) -> Self {
        Self { staging, engine }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn engine(&self) -> &Arc<dyn AnalysisEngine> {
        &self.engine
    }

    /// Run the full pipeline for one request
    pub async fn analyze(&self, multipart: &mut Multipart) -> AnalyzeResult<Value> {
        let staged = self.intake(multipart).await?;
        self.analyze_staged(staged).await
    }

    /// Invocation and translation for an already staged file
    ///
    /// The retention policy is applied after the engine finishes,
    /// whatever the outcome.
    pub async fn analyze_staged(&self, staged: StagedFile) -> AnalyzeResult<Value> {
        let outcome = self.engine.run(&staged.path).await;
        let original_name = staged.original_name.clone();
        self.staging.release(staged).await;

        let output = outcome.map_err(|e| {
            error!(file = %original_name, error = %e, "AI engine invocation failed");
            AnalyzeError::from(e)
        })?;

        let result = translate_output(output);
        match &result {
            Ok(_) => info!(file = %original_name, "Analysis completed"),
            Err(AnalyzeError::EngineFailed { exit_code, stderr }) => warn!(
                file = %original_name,
                exit_code = ?exit_code,
                stderr = %stderr.trim_end(),
                "AI engine process failed"
            ),
            Err(e) => warn!(file = %original_name, error = %e, "AI engine output rejected"),
        }
        result
    }

    /// Stage the first file field of the body
    ///
    /// Fields without a file name (plain form values) are skipped. A body
    /// that ends without any file field is [`AnalyzeError::MissingFile`];
    /// nothing is written in that case.
    async fn intake(&self, multipart: &mut Multipart) -> AnalyzeResult<StagedFile> {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| AnalyzeError::from(StagingError::Upload(e)))?
        {
            let file_name = match field.file_name() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    debug!(field = ?field.name(), "Skipping non-file multipart field");
                    continue;
                }
            };

            return self
                .staging
                .stage(&file_name, &mut field)
                .await
                .map_err(|e| {
                    if let StagingError::Write { .. } = e {
                        error!(file = %file_name, error = %e, "Failed to stage upload");
                    } else {
                        warn!(file = %file_name, error = %e, "Upload aborted");
                    }
                    AnalyzeError::from(e)
                });
        }

        debug!("Request carried no file field");
        Err(AnalyzeError::MissingFile)
    }
}

/// Turn a finished engine process into the response value
///
/// stdout is only examined after a zero exit; stderr is only surfaced
/// after a non-zero one.
pub fn translate_output(output: EngineOutput) -> AnalyzeResult<Value> {
    if !output.is_success() {
        return Err(AnalyzeError::EngineFailed {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }

    Ok(serde_json::from_str(&output.stdout)?)
}
