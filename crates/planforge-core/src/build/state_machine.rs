//! Build-file state machine
//!
//! Drives one batch for one path to a terminal outcome: pick the current
//! state source, assemble prompts, run the stream, branch on the result.
//! Transport failures retry up to three times with quadratic backoff;
//! failed replacements get one model-corrected retry with no backoff.
//! Cancellation exits silently at every suspension point.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::result::{assemble_plan_result, PlanResultParams};
use super::{BatchOutcome, BuildPipeline};
use crate::ai::prompts;
use crate::ai::stream::{read_replacements, StreamOutcome};
use crate::ai::types::{ChatMessage, ChatRequest, ResponseFormat};
use crate::constants;
use crate::error::BuildError;
use crate::plan::active::{ActiveBuild, ActivePlan};
use crate::plan::events::{BuildInfo, StreamMessage};
use crate::storage::types::{CurrentPlanState, PlanBuild, PlanFileResult};

impl BuildPipeline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn build_file(
        &self,
        plan: &Arc<ActivePlan>,
        org_id: &str,
        user_id: &str,
        path: &str,
        batch: &[Arc<ActiveBuild>],
        build: &PlanBuild,
        current_plan: &CurrentPlanState,
    ) -> BatchOutcome {
        let context = plan.update(|state| state.contexts_by_path.get(path).cloned());

        // Current-state selection: pending body this turn, else attached
        // context, else the file does not exist yet.
        let current_state = match current_plan.files.get(path) {
            Some(body) if !body.is_empty() => {
                debug!("File {} found in current plan, using pending state", path);
                body.clone()
            }
            _ => context.as_ref().map(|c| c.body.clone()).unwrap_or_default(),
        };

        if current_state.is_empty() {
            info!(
                "File {} not in model context or current plan, creating new file",
                path
            );
            plan.send(StreamMessage::BuildInfo(BuildInfo {
                path: path.to_string(),
                num_tokens: 0,
                finished: true,
            }));
            let result = PlanFileResult {
                org_id: org_id.to_string(),
                plan_id: plan.plan_id.clone(),
                plan_build_id: build.id.clone(),
                convo_message_ids: build.convo_message_ids.clone(),
                path: path.to_string(),
                content: batch[0].file_content.clone(),
                replacements: Vec::new(),
                context_sha: String::new(),
                context_body: String::new(),
                any_failed: false,
            };
            return self.commit_file(plan, org_id, user_id, path, batch, build, result).await;
        }

        let merged_reply: String = batch
            .iter()
            .map(|b| format!("\n\n{}", b.reply_content))
            .collect();

        let mut retry: u32 = 0;
        let mut replacement_retry: u32 = 0;
        let mut last_result: Option<PlanFileResult> = None;

        loop {
            debug!(
                "Building file {}, retry: {}, replacement retry: {}",
                path, retry, replacement_retry
            );

            let mut messages = vec![
                ChatMessage::system(prompts::build_sys_prompt(path, &current_state)),
                ChatMessage::user(plan.prompt.clone()),
                ChatMessage::assistant(merged_reply.clone()),
                ChatMessage::user(prompts::replace_prompt(path)),
            ];

            if replacement_retry > 0 {
                let Some(prev) = &last_result else {
                    let err = BuildError::CorrectionPrompt(anyhow::anyhow!(
                        "replacement retry without a prior result"
                    ));
                    return self.build_file_error(plan, path, batch, build, err).await;
                };
                let serialized = match serde_json::to_string(&prev.replacements) {
                    Ok(serialized) => serialized,
                    Err(e) => {
                        return self
                            .build_file_error(
                                plan,
                                path,
                                batch,
                                build,
                                BuildError::SerializeReplacements(e),
                            )
                            .await;
                    }
                };
                let correction =
                    match prompts::correct_replacement_prompt(&prev.replacements, &current_state) {
                        Ok(correction) => correction,
                        Err(e) => {
                            return self
                                .build_file_error(
                                    plan,
                                    path,
                                    batch,
                                    build,
                                    BuildError::CorrectionPrompt(e),
                                )
                                .await;
                        }
                    };
                messages.push(ChatMessage::assistant(serialized));
                messages.push(ChatMessage::user(correction));
            }

            let request = ChatRequest {
                model: self.config().model.clone(),
                messages,
                functions: vec![prompts::replace_fn()],
                temperature: self.config().temperature,
                top_p: self.config().top_p,
                response_format: ResponseFormat::json_object(),
            };

            debug!("Calling builder model for file {}", path);

            let outcome = read_replacements(
                self.model(),
                request,
                path,
                self.config().chunk_timeout,
                plan.cancel_token(),
                plan.event_sender(),
            )
            .await;

            match outcome {
                StreamOutcome::Canceled => {
                    debug!("File {}: build canceled", path);
                    plan.update(|state| {
                        state.is_building_by_path.insert(path.to_string(), false);
                    });
                    return BatchOutcome::Stopped;
                }
                StreamOutcome::Parsed(streamed) => {
                    let (result, all_succeeded) = assemble_plan_result(PlanResultParams {
                        org_id,
                        plan_id: &plan.plan_id,
                        plan_build_id: &build.id,
                        convo_message_ids: &build.convo_message_ids,
                        path,
                        current_state: &current_state,
                        context: context.as_ref(),
                        replacements: streamed,
                    });

                    if !all_succeeded {
                        warn!(
                            "File {}: {} replacement(s) failed to apply",
                            path,
                            result.replacements.iter().filter(|r| r.failed).count()
                        );
                        if replacement_retry < constants::build::MAX_REPLACEMENT_RETRIES {
                            retry += 1;
                            replacement_retry += 1;
                            last_result = Some(result);
                            continue;
                        }
                        // Retries spent: commit the partial result as-is.
                    }

                    plan.send(StreamMessage::BuildInfo(BuildInfo {
                        path: path.to_string(),
                        num_tokens: 0,
                        finished: true,
                    }));
                    return self
                        .commit_file(plan, org_id, user_id, path, batch, build, result)
                        .await;
                }
                StreamOutcome::Failed(failure) => {
                    warn!("File {}: {}", path, failure);

                    if retry >= constants::build::MAX_RETRIES {
                        let err = BuildError::Stream {
                            path: path.to_string(),
                            retries: retry,
                            failure,
                        };
                        return self.build_file_error(plan, path, batch, build, err).await;
                    }

                    if failure.should_sleep() {
                        let backoff = quadratic_backoff(retry);
                        debug!("Retrying file {} after {:?}", path, backoff);
                        tokio::select! {
                            _ = plan.cancel_token().cancelled() => {
                                plan.update(|state| {
                                    state.is_building_by_path.insert(path.to_string(), false);
                                });
                                return BatchOutcome::Stopped;
                            }
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                    retry += 1;
                }
            }
        }
    }

    /// Terminal failure for this path: mark the batch, report, record, clear
    /// the gate.
    pub(crate) async fn build_file_error(
        &self,
        plan: &Arc<ActivePlan>,
        path: &str,
        batch: &[Arc<ActiveBuild>],
        build: &PlanBuild,
        err: BuildError,
    ) -> BatchOutcome {
        error!("Error for file {}: {}", path, err);

        let msg = err.to_string();
        for active_build in batch {
            active_build.mark_error(&msg);
        }

        plan.send_done(err.into());

        let mut errored = build.clone();
        errored.error = Some(msg);
        if let Err(e) = self.store().set_build_error(&errored).await {
            error!("Error setting build error: {e:#}");
        }

        plan.update(|state| {
            state.is_building_by_path.insert(path.to_string(), false);
        });
        BatchOutcome::Stopped
    }
}

/// Backoff before transport retry `n`: 1s, 4s, 9s
fn quadratic_backoff(retry: u32) -> Duration {
    let n = (retry + 1) as u64;
    Duration::from_secs(n * n)
}
