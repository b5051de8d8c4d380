// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Guarded execution of generated analysis code.

pub mod contract;
pub mod normalize;

pub use contract::SUMMARY_BINDING;

use crate::guard::CodeSafetyValidator;
use crate::sandbox::{run_script, RunFailure, SandboxLimits, SandboxRun};
use crate::store::{LargeObjectStore, ObjectKey, ReadOnlyConnection};
use crate::tabular::Table;
use crate::telemetry::{log_degraded, log_harness_event};
use chrono::Utc;
use quarry_contracts::{
    ExecutionLimits, ExecutionOutcome, ExternalizationPolicy, ExternalizedResult, RuntimeContext,
    TabularPayload,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub struct ExecutionHarness {
    validator: CodeSafetyValidator,
    connection: Option<Arc<dyn ReadOnlyConnection>>,
    store: Arc<dyn LargeObjectStore>,
    limits: ExecutionLimits,
    policy: ExternalizationPolicy,
}

impl ExecutionHarness {
    pub fn new(validator: CodeSafetyValidator, store: Arc<dyn LargeObjectStore>) -> Self {
        Self {
            validator,
            connection: None,
            store,
            limits: ExecutionLimits::default(),
            policy: ExternalizationPolicy::default(),
        }
    }

    pub fn with_connection(mut self, connection: Arc<dyn ReadOnlyConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_policy(mut self, policy: ExternalizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn policy(&self) -> &ExternalizationPolicy {
        &self.policy
    }

    /// Validates, runs and packages `code`. Every failure comes back as an error outcome.
    #[instrument(skip(self, code, ctx), fields(session = %ctx.session_id, agent = %ctx.agent_label))]
    pub async fn execute(&self, code: &str, ctx: &RuntimeContext) -> ExecutionOutcome {
        let verdict = self.validator.validate(code);
        if !verdict.valid {
            warn!(issues = verdict.issues.len(), "Refusing to execute unvalidated code");
            log_harness_event("validation_refused", json!({ "issues": verdict.issues }));
            return ExecutionOutcome::validation_failed(verdict.issues);
        }

        let run = match self.run(code).await {
            Ok(run) => run,
            Err(message) => {
                error!(error = %message, "Script worker did not complete");
                return ExecutionOutcome::runtime_failure(message.clone(), message, String::new());
            }
        };
        info!(gas_used = run.gas_used, "Script run finished");

        let SandboxRun { output, outcome, .. } = run;
        let (result, summary) = match outcome {
            Ok(bindings) => bindings,
            Err(RunFailure {
                message, traceback, ..
            }) => {
                warn!(error = %message, "Generated code raised");
                log_harness_event("runtime_failure", json!({ "message": message }));
                return ExecutionOutcome::runtime_failure(message, traceback, output);
            }
        };

        let (table, summary) = match contract::enforce(
            (self.validator.result_binding(), result),
            (SUMMARY_BINDING, summary),
        ) {
            Ok(bindings) => bindings,
            Err(violations) => {
                log_harness_event(
                    "contract_violation",
                    json!({
                        "violations": violations
                            .iter()
                            .map(|v| json!({ "binding": v.binding, "actual_type": v.actual_type }))
                            .collect::<Vec<_>>()
                    }),
                );
                return ExecutionOutcome::contract_violated(violations, output);
            }
        };

        let record_count = table.height();
        let summary = normalize::enrich_summary(summary, &ctx.agent_label, Utc::now());
        let (inline, externalized) = self.deliver(&table, ctx).await;
        log_harness_event(
            "execution_succeeded",
            json!({
                "record_count": record_count,
                "externalized": externalized.as_ref().map(|e| e.location.clone()),
            }),
        );
        ExecutionOutcome::success(inline, summary, record_count, externalized, output)
    }

    async fn run(&self, code: &str) -> Result<SandboxRun, String> {
        let source = code.to_string();
        let connection = self.connection.clone();
        let limits = SandboxLimits {
            gas_limit: self.limits.gas_limit,
            max_output_bytes: self.limits.max_output_bytes,
            max_collection_len: self.limits.max_collection_len,
        };
        let result_binding = self.validator.result_binding().to_string();
        let date_format = self.limits.date_format.clone();
        tokio::task::spawn_blocking(move || {
            run_script(
                &source,
                limits,
                connection,
                (result_binding.as_str(), SUMMARY_BINDING),
                &date_format,
            )
        })
        .await
        .map_err(|err| format!("Execution worker failed: {err}"))
    }

    /// Inline rows up to the policy limit; beyond it the store gets the frame.
    async fn deliver(
        &self,
        table: &Table,
        ctx: &RuntimeContext,
    ) -> (Option<TabularPayload>, Option<ExternalizedResult>) {
        let inline = || Some(normalize::inline_payload(table, &self.limits.date_format));
        if !self.policy.should_externalize(table.height()) {
            return (inline(), None);
        }
        let frame = match table.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log_degraded("externalize_result", &err);
                return (inline(), None);
            }
        };
        match self.store.put(&ObjectKey::from_context(ctx), frame).await {
            Ok(reference) => {
                info!(
                    location = %reference.location,
                    records = reference.record_count,
                    "Result externalized"
                );
                (None, Some(reference))
            }
            Err(err) => {
                log_degraded("externalize_result", &err);
                (inline(), None)
            }
        }
    }
}
