//! The execution orchestrator: the single request path.
//!
//! One call runs the whole pipeline — validate, resolve session state,
//! acquire a sandbox, stage inputs, dispatch to the REPL or one-shot
//! executor, collect outputs, persist state, destroy the sandbox — with
//! the failure policy of each step made explicit. Sandboxes are destroyed
//! on every exit path: release always destroys, and the sandbox's own
//! drop guard covers cancellation.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crucible_core::request::{ExecutionRequest, FileSource};
use crucible_core::result::ExecutionOutcome;
use crucible_sandbox::manager::{Sandbox, SandboxManager};
use crucible_sandbox::oneshot::OneShotExecutor;
use crucible_sandbox::pool::SandboxPool;
use crucible_sandbox::repl::ReplExecutor;
use crucible_state::error::StateError;
use crucible_state::store::StateStore;

use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::files::BlobStore;

/// An output file as reported to the client: a blob reference instead of
/// inline bytes.
#[derive(Debug, Clone)]
pub struct OutputFileRef {
    /// File name relative to the scratch root.
    pub name: String,
    /// Blob reference, absent when the file was withheld or the store
    /// was unavailable.
    pub reference: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// True when the file exceeded the per-file cap.
    pub truncated: bool,
}

/// Everything the HTTP layer needs to answer one execution.
#[derive(Debug)]
pub struct ExecutionReport {
    /// The execution outcome (streams, exit code).
    pub outcome: ExecutionOutcome,
    /// The session the execution ran under, echoed or freshly minted.
    pub session_id: String,
    /// References to produced files.
    pub output_files: Vec<OutputFileRef>,
    /// Warnings accumulated along the way.
    pub warnings: Vec<String>,
}

/// The single entry point for execution requests.
pub struct Orchestrator {
    config: Arc<Config>,
    pool: SandboxPool,
    manager: Arc<SandboxManager>,
    store: Arc<StateStore>,
    blobs: Arc<BlobStore>,
    repl: ReplExecutor,
    one_shot: OneShotExecutor,
}

impl Orchestrator {
    /// Wire the orchestrator from its collaborators. All singletons are
    /// constructed at startup and passed down; there is no global lookup.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        pool: SandboxPool,
        manager: Arc<SandboxManager>,
        store: Arc<StateStore>,
        blobs: Arc<BlobStore>,
    ) -> Self {
        let repl = ReplExecutor::new(config.output_caps());
        let one_shot = OneShotExecutor::new(config.output_caps(), config.compile_time_limit);
        Self {
            config,
            pool,
            manager,
            store,
            blobs,
            repl,
            one_shot,
        }
    }

    /// Run one execution request end to end.
    ///
    /// # Errors
    ///
    /// `BadRequest` for validation failures (fail-fast, no side effects),
    /// `ServiceBusy` when no sandbox arrives in time, `Timeout` for
    /// wall-clock overruns (no state is saved), `SandboxFailure` when a
    /// fresh sandbox also failed after the internal retry, and `Internal`
    /// for everything else.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport> {
        let request_id = Uuid::new_v4();

        // Step 1: validate before touching any resource.
        request
            .validate(&self.config.bounds())
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut warnings = Vec::new();

        info!(
            %request_id,
            %session_id,
            language = %request.language,
            code_bytes = request.code.len(),
            "Executing request"
        );

        // Step 2: resolve session state. Storage trouble degrades to a
        // fresh session rather than failing the request.
        let snapshot = if request.language.is_interactive() {
            match self.store.load_snapshot(&session_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(%request_id, %session_id, error = %e, "Session state unavailable");
                    warnings.push("previous session state unavailable; starting fresh".to_string());
                    None
                }
            }
        } else {
            None
        };

        // Steps 3-6, with one internal retry on a sandbox that proves
        // unhealthy underneath us.
        let mut sandbox = self.pool.acquire(request.language).await?;
        let mut retried = false;
        let outcome = loop {
            let (used, result) = self
                .run_in_sandbox(sandbox, &request, snapshot.as_deref())
                .await;
            // Step 8 folded in: the sandbox is destroyed on every path.
            self.pool.release(used).await;

            match result {
                Ok(outcome) => break outcome,
                Err(ApiError::SandboxFailure(msg)) if !retried => {
                    warn!(%request_id, error = %msg, "Sandbox failed, retrying with a fresh one");
                    retried = true;
                    sandbox = self.pool.acquire(request.language).await?;
                }
                Err(e) => return Err(e),
            }
        };

        if outcome.timed_out {
            // 408; deliberately no state save for a killed execution.
            return Err(ApiError::Timeout);
        }

        warnings.extend(outcome.warnings.clone());

        // Step 7: persist state before answering, so the next execution
        // in this session observes it. Failures degrade to warnings.
        if let Some(state) = &outcome.state {
            match self
                .store
                .save_snapshot(&session_id, Bytes::copy_from_slice(state))
                .await
            {
                Ok(()) => debug!(%request_id, %session_id, bytes = state.len(), "Session state saved"),
                Err(e @ StateError::TooLarge { .. }) => {
                    warn!(%request_id, %session_id, error = %e, "Snapshot rejected");
                    warnings.push(format!("session state not saved: {e}"));
                }
                Err(e) => {
                    warn!(%request_id, %session_id, error = %e, "Snapshot save failed");
                    warnings.push("session state not saved: storage unavailable".to_string());
                }
            }
        }

        if request.language.is_interactive() {
            if let Err(e) = self
                .store
                .record_execution(&session_id, request.language.tag())
                .await
            {
                debug!(%request_id, error = %e, "Session metadata update failed");
            }
        }

        let output_files = self
            .store_outputs(&session_id, &outcome, &mut warnings)
            .await;

        info!(
            %request_id,
            %session_id,
            exit_code = outcome.exit_code,
            files = output_files.len(),
            "Execution complete"
        );

        Ok(ExecutionReport {
            outcome,
            session_id,
            output_files,
            warnings,
        })
    }

    /// Steps 4-6: stage inputs, dispatch, hand the sandbox back either way.
    async fn run_in_sandbox(
        &self,
        mut sandbox: Sandbox,
        request: &ExecutionRequest,
        snapshot: Option<&[u8]>,
    ) -> (Sandbox, Result<ExecutionOutcome>) {
        if let Err(e) = self.stage_inputs(&sandbox, request).await {
            return (sandbox, Err(e));
        }

        let result = if request.language.is_interactive() {
            self.repl
                .execute(
                    &mut sandbox,
                    &request.code,
                    snapshot,
                    request.capture_state,
                    request.time_limit,
                )
                .await
        } else {
            self.one_shot.execute(&self.manager, &sandbox, request).await
        };

        (sandbox, result.map_err(ApiError::from))
    }

    /// Write the request's input files into the sandbox scratch.
    async fn stage_inputs(&self, sandbox: &Sandbox, request: &ExecutionRequest) -> Result<()> {
        for file in &request.input_files {
            let bytes = match &file.source {
                FileSource::Inline(bytes) => Bytes::copy_from_slice(bytes),
                FileSource::Reference(reference) => {
                    self.blobs.get(reference).await.map_err(|e| match e {
                        StateError::NotFound => ApiError::BadRequest(format!(
                            "input file reference {reference:?} not found"
                        )),
                        other => ApiError::Internal(other.to_string()),
                    })?
                }
            };
            tokio::fs::write(sandbox.scratch_dir().join(&file.name), &bytes)
                .await
                .map_err(|e| ApiError::Internal(format!("staging {:?}: {e}", file.name)))?;
        }
        Ok(())
    }

    /// Push produced files into the blob store, collecting references.
    async fn store_outputs(
        &self,
        session_id: &str,
        outcome: &ExecutionOutcome,
        warnings: &mut Vec<String>,
    ) -> Vec<OutputFileRef> {
        let mut refs = Vec::with_capacity(outcome.files.len());
        for file in &outcome.files {
            if file.truncated {
                refs.push(OutputFileRef {
                    name: file.name.clone(),
                    reference: None,
                    size: 0,
                    truncated: true,
                });
                continue;
            }

            match self
                .blobs
                .put(session_id, Bytes::copy_from_slice(&file.content))
                .await
            {
                Ok(blob) => refs.push(OutputFileRef {
                    name: file.name.clone(),
                    reference: Some(blob.reference),
                    size: blob.size,
                    truncated: false,
                }),
                Err(e) => {
                    warn!(%session_id, name = %file.name, error = %e, "Output blob store failed");
                    warnings.push(format!("output file {:?} could not be stored", file.name));
                    refs.push(OutputFileRef {
                        name: file.name.clone(),
                        reference: None,
                        size: file.content.len() as u64,
                        truncated: false,
                    });
                }
            }
        }
        refs
    }
}
