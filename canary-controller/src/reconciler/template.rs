//! Worker templates
//!
//! Builds the [`WorkerUnit`] for a hook or the validation run of one
//! test job run.

use std::collections::BTreeMap;

use canary_core::domain::release::Release;
use canary_core::domain::test_job::{Hook, HookAction, HookEnvVar, Stage, TestJob};
use canary_core::domain::worker::{
    EnvVar, MANAGED_BY_LABEL, MANAGED_BY_VALUE, NAMESPACE_LABEL, OWNER_NAME_LABEL,
    OWNER_UID_LABEL, RUN_KEY_LABEL, RestartPolicy, STAGE_LABEL, WorkerUnit,
};
use serde_json::Value;
use thiserror::Error;

use crate::reconciler::naming::{self, HookStage};
use crate::service::helm::{self, TestRequest};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unsupported hook.type {0:?}")]
    UnsupportedHook(&'static str),
}

/// Everything a template needs about the run being executed
pub struct RunContext<'a> {
    pub job: &'a TestJob,
    pub release: &'a Release,
    pub run_key: &'a str,
    pub image: &'a str,
    /// JSON view of the job with its in-flight status, for field references
    pub job_view: Value,
    /// JSON view of the referenced release
    pub release_view: Value,
}

impl<'a> RunContext<'a> {
    pub fn new(job: &'a TestJob, release: &'a Release, run_key: &'a str, image: &'a str) -> Self {
        Self {
            job,
            release,
            run_key,
            image,
            job_view: serde_json::to_value(job).unwrap_or_default(),
            release_view: serde_json::to_value(release).unwrap_or_default(),
        }
    }
}

pub fn hook_unit(
    ctx: &RunContext<'_>,
    stage: HookStage,
    index: usize,
    hook: &Hook,
) -> Result<WorkerUnit, TemplateError> {
    let command = match &hook.action {
        HookAction::Script { script } => {
            vec!["/bin/sh".to_string(), "-c".to_string(), script.clone()]
        }
        HookAction::Kubernetes { .. } => {
            return Err(TemplateError::UnsupportedHook(hook.action.type_name()));
        }
    };

    let name = naming::hook_worker_name(&ctx.job.metadata.name, ctx.run_key, stage, index);
    let job_stage = match stage {
        HookStage::Pre => Stage::PreTest,
        HookStage::Post => Stage::PostTest,
    };

    let mut env = standard_env(ctx, job_stage);
    env.extend(resolve_env(ctx, &hook.env));

    Ok(base_unit(ctx, name, stage.tag(), command, env))
}

pub fn test_unit(ctx: &RunContext<'_>) -> WorkerUnit {
    let test = &ctx.job.spec.test;
    let request = TestRequest {
        release_name: &ctx.release.metadata.name,
        namespace: ctx.release.deployment_namespace(),
        timeout: test.timeout,
        logs: test.logs,
        filter: &test.filter,
    };

    let mut command = vec!["helm".to_string()];
    command.extend(helm::test_args(&request));

    let name = naming::test_worker_name(&ctx.job.metadata.name, ctx.run_key);
    let mut unit = base_unit(ctx, name, "test", command, standard_env(ctx, Stage::Test));
    unit.active_deadline = Some(test.timeout);
    unit
}

fn base_unit(
    ctx: &RunContext<'_>,
    name: String,
    stage_tag: &str,
    command: Vec<String>,
    env: Vec<EnvVar>,
) -> WorkerUnit {
    let meta = &ctx.job.metadata;

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(OWNER_UID_LABEL.to_string(), meta.uid.to_string());
    labels.insert(OWNER_NAME_LABEL.to_string(), meta.name.clone());
    labels.insert(NAMESPACE_LABEL.to_string(), meta.namespace.clone());
    labels.insert(RUN_KEY_LABEL.to_string(), ctx.run_key.to_string());
    labels.insert(STAGE_LABEL.to_string(), stage_tag.to_string());

    WorkerUnit {
        name,
        namespace: meta.namespace.clone(),
        owner: ctx.job.owner_reference(),
        labels,
        image: ctx.image.to_string(),
        command,
        env,
        restart_policy: RestartPolicy::Never,
        active_deadline: None,
    }
}

fn standard_env(ctx: &RunContext<'_>, stage: Stage) -> Vec<EnvVar> {
    vec![
        EnvVar::new("CANARY_JOB_NAME", &ctx.job.metadata.name),
        EnvVar::new("CANARY_JOB_NAMESPACE", &ctx.job.metadata.namespace),
        EnvVar::new("CANARY_RUN_KEY", ctx.run_key),
        EnvVar::new("CANARY_STAGE", stage.to_string()),
        EnvVar::new("CANARY_RELEASE_NAME", &ctx.release.metadata.name),
        EnvVar::new("CANARY_RELEASE_NAMESPACE", ctx.release.deployment_namespace()),
    ]
}

/// Resolves literal values and field references of a hook's env list
pub fn resolve_env(ctx: &RunContext<'_>, vars: &[HookEnvVar]) -> Vec<EnvVar> {
    vars.iter()
        .map(|var| {
            let value = match &var.value_from {
                Some(source) => match &source.release_ref {
                    Some(release_ref) => field_value(&ctx.release_view, &release_ref.field_path),
                    None => field_value(&ctx.job_view, &source.field_path),
                },
                None => var.value.clone(),
            };
            EnvVar::new(&var.name, value)
        })
        .collect()
}

/// Renders the value at a dotted path
///
/// Strings are returned verbatim, other scalars in their JSON form and
/// objects or arrays as compact JSON. Missing paths yield "".
pub fn field_value(root: &Value, path: &str) -> String {
    let found = path
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(root, |value, segment| match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        });

    match found {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
