//! Test job validation
//!
//! Only structural checks happen here. Schedule expressions and timezones
//! are evaluated by the controller, which reports problems in the status.

use std::collections::HashSet;

use canary_core::domain::meta::ObjectMeta;
use canary_core::domain::test_job::{Hook, HookAction, KIND, TestJob, TestJobStatus};

use crate::repository::object_repository::Table;
use crate::service::object::StoredKind;

impl StoredKind for TestJob {
    type Status = TestJobStatus;

    const KIND: &'static str = KIND;
    const TABLE: Table = Table::TestJobs;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_test_job(self)
    }
}

fn validate_test_job(job: &TestJob) -> Result<(), String> {
    if job.spec.release_ref.name.trim().is_empty() {
        return Err("releaseRef.name cannot be empty".to_string());
    }

    if job.spec.test.timeout.is_zero() {
        return Err("test.timeout must be greater than zero".to_string());
    }

    validate_hooks("hooks.preTest", &job.spec.hooks.pre_test)?;
    validate_hooks("hooks.postTest", &job.spec.hooks.post_test)?;

    Ok(())
}

fn validate_hooks(field: &str, hooks: &[Hook]) -> Result<(), String> {
    let mut seen = HashSet::new();

    for (i, hook) in hooks.iter().enumerate() {
        if hook.name.trim().is_empty() {
            return Err(format!("{}[{}].name cannot be empty", field, i));
        }

        if !seen.insert(hook.name.as_str()) {
            return Err(format!("{}: duplicate hook name '{}'", field, hook.name));
        }

        if let HookAction::Script { script } = &hook.action {
            if script.trim().is_empty() {
                return Err(format!("{}[{}].script cannot be empty", field, i));
            }
        }

        if let Some(var) = hook.env.iter().find(|v| v.name.trim().is_empty()) {
            return Err(format!(
                "{}[{}].env has an entry without a name (value '{}')",
                field, i, var.value
            ));
        }
    }

    Ok(())
}
