//! Typed job parameters and their controllers.
//!
//! Every recognized parameter name owns a chain of controllers; the first
//! parses the raw input, then each controller in declaration order gets
//! to validate or clamp the value. Unrecognized names pass through as
//! plain additional parameters, with repeated inputs collected into
//! arrays.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;

use crate::errors::UwsError;
use crate::job::{JobPolicy, UwsJob};
use crate::phase::ExecutionPhase;

pub const PARAM_RUN_ID: &str = "runid";
pub const PARAM_EXECUTION_DURATION: &str = "executionduration";
pub const PARAM_DESTRUCTION_TIME: &str = "destruction";
pub const PARAM_PHASE: &str = "phase";
pub const PARAM_QUOTE: &str = "quote";

/// A stored parameter value, wire-shaped: scalars stay text, repeated
/// inputs become arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    Array(Vec<String>),
}

impl ParamValue {
    pub fn text(value: impl Into<String>) -> Self {
        ParamValue::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(text) => Some(text),
            ParamValue::Array(_) => None,
        }
    }
}

/// A reference to one user-provided upload attached to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// The parameter that carried the upload.
    pub param_name: String,
    /// Table name the upload is addressed by inside the query.
    pub file_name: String,
    /// Where the bytes live (a URI the file manager understands).
    pub location: String,
    pub mime: Option<String>,
    pub length: Option<u64>,
}

/// The parameter map of one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UwsParameters {
    values: IndexMap<String, ParamValue>,
    uploads: Vec<UploadFile>,
}

impl UwsParameters {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(&name.to_ascii_lowercase())
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_text)
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_ascii_lowercase(), value);
    }

    /// Set, upgrading a repeated name to an array value.
    pub fn merge(&mut self, name: &str, value: ParamValue) {
        let key = name.to_ascii_lowercase();
        match (self.values.get_mut(&key), value) {
            (None, value) => {
                self.values.insert(key, value);
            }
            (Some(ParamValue::Array(items)), ParamValue::Text(text)) => items.push(text),
            (Some(ParamValue::Array(items)), ParamValue::Array(more)) => items.extend(more),
            (Some(existing @ ParamValue::Text(_)), incoming) => {
                let ParamValue::Text(first) = existing.clone() else {
                    unreachable!("matched above");
                };
                let mut items = vec![first];
                match incoming {
                    ParamValue::Text(text) => items.push(text),
                    ParamValue::Array(more) => items.extend(more),
                }
                *existing = ParamValue::Array(items);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn uploads(&self) -> &[UploadFile] {
        &self.uploads
    }

    pub fn add_upload(&mut self, upload: UploadFile) {
        self.uploads.push(upload);
    }

    pub fn set_uploads(&mut self, uploads: Vec<UploadFile>) {
        self.uploads = uploads;
    }
}

/// Job state a controller may consult while validating a value.
pub struct CheckContext<'a> {
    pub phase: ExecutionPhase,
    pub created_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub policy: &'a JobPolicy,
}

/// Validation logic for one recognized parameter name.
pub trait ParameterController: Send + Sync {
    /// Lowercase parameter name this controller owns.
    fn name(&self) -> &'static str;

    /// Value applied when the input does not mention the parameter.
    fn default_value(&self, _policy: &JobPolicy) -> Option<ParamValue> {
        None
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError>;

    fn check(&self, value: ParamValue, _ctx: &CheckContext<'_>) -> Result<ParamValue, UwsError> {
        Ok(value)
    }
}

/// What applying one input to a job amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedParam {
    /// Stored on the job (field or additional parameter).
    Stored,
    /// `PHASE=RUN`: the caller must admit the job for execution.
    Run,
    /// `PHASE=ABORT`: the caller must cancel the job.
    Abort,
}

#[derive(Default)]
pub struct ParameterRegistry {
    chains: IndexMap<String, Vec<Arc<dyn ParameterController>>>,
}

impl ParameterRegistry {
    /// Registry with the reserved controllers installed.
    pub fn with_reserved() -> Self {
        let mut registry = ParameterRegistry::default();
        registry.register(Arc::new(RunIdController));
        registry.register(Arc::new(ExecutionDurationController));
        registry.register(Arc::new(DestructionTimeController));
        registry.register(Arc::new(PhaseController));
        registry.register(Arc::new(QuoteController));
        registry
    }

    /// Append a controller to its name's chain. Order of registration is
    /// order of evaluation.
    pub fn register(&mut self, controller: Arc<dyn ParameterController>) {
        self.chains
            .entry(controller.name().to_ascii_lowercase())
            .or_default()
            .push(controller);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.chains.contains_key(&name.to_ascii_lowercase())
    }

    /// Run `raw` through the chain for `name`. Unrecognized names come
    /// back as plain text values.
    pub fn process(
        &self,
        name: &str,
        raw: &str,
        ctx: &CheckContext<'_>,
    ) -> Result<ParamValue, UwsError> {
        let key = name.to_ascii_lowercase();
        let Some(chain) = self.chains.get(&key) else {
            return Ok(ParamValue::text(raw));
        };
        let mut value = chain[0].parse(raw)?;
        for controller in chain {
            value = controller.check(value, ctx)?;
        }
        Ok(value)
    }

    /// Defaults of every registered controller that provides one.
    pub fn defaults(&self, policy: &JobPolicy) -> Vec<(String, ParamValue)> {
        self.chains
            .iter()
            .filter_map(|(name, chain)| {
                chain
                    .iter()
                    .find_map(|c| c.default_value(policy))
                    .map(|value| (name.clone(), value))
            })
            .collect()
    }

    /// Validate one input and store it on the job. Enforces the phase
    /// rules: a terminal job only accepts a new destruction time, and any
    /// other update (except the `PHASE` verb itself) requires the job to
    /// be pending or held.
    pub fn apply(
        &self,
        job: &mut UwsJob,
        name: &str,
        raw: &str,
        policy: &JobPolicy,
        now: DateTime<Utc>,
        creating: bool,
    ) -> Result<AppliedParam, UwsError> {
        let key = name.to_ascii_lowercase();

        if !creating {
            if job.is_terminal() && key != PARAM_DESTRUCTION_TIME {
                return Err(UwsError::PhaseInvalid {
                    from: job.phase(),
                    to: job.phase(),
                });
            }
            if !matches!(job.phase(), ExecutionPhase::Pending | ExecutionPhase::Held)
                && key != PARAM_DESTRUCTION_TIME
                && key != PARAM_PHASE
            {
                return Err(UwsError::PhaseInvalid {
                    from: job.phase(),
                    to: job.phase(),
                });
            }
        }

        let ctx = CheckContext {
            phase: job.phase(),
            created_at: job.created_at,
            now,
            policy,
        };
        let value = self.process(&key, raw, &ctx)?;

        match key.as_str() {
            PARAM_PHASE => {
                let text = value.as_text().unwrap_or_default().to_ascii_uppercase();
                if text == "RUN" {
                    Ok(AppliedParam::Run)
                } else {
                    Ok(AppliedParam::Abort)
                }
            }
            PARAM_RUN_ID => {
                job.run_id = value.as_text().map(str::to_string);
                Ok(AppliedParam::Stored)
            }
            PARAM_EXECUTION_DURATION => {
                job.execution_duration = value
                    .as_text()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or_default();
                Ok(AppliedParam::Stored)
            }
            PARAM_DESTRUCTION_TIME => {
                let text = value.as_text().unwrap_or_default();
                job.destruction_time = DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
                Ok(AppliedParam::Stored)
            }
            _ => {
                job.params.merge(&key, value);
                Ok(AppliedParam::Stored)
            }
        }
    }
}

// ---- reserved controllers -------------------------------------------

/// `RUN_ID`: free-form client tag, capped to a sane length.
struct RunIdController;

impl ParameterController for RunIdController {
    fn name(&self) -> &'static str {
        PARAM_RUN_ID
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        if raw.len() > 256 {
            return Err(UwsError::param_rejected(
                PARAM_RUN_ID,
                "run id longer than 256 characters",
            ));
        }
        Ok(ParamValue::text(raw))
    }
}

/// `EXECUTION_DURATION`: non-negative seconds, clamped to the service
/// maximum.
struct ExecutionDurationController;

impl ParameterController for ExecutionDurationController {
    fn name(&self) -> &'static str {
        PARAM_EXECUTION_DURATION
    }

    fn default_value(&self, policy: &JobPolicy) -> Option<ParamValue> {
        Some(ParamValue::text(
            policy.default_execution_duration.to_string(),
        ))
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        let seconds: u64 = raw.trim().parse().map_err(|_| {
            UwsError::param_rejected(
                PARAM_EXECUTION_DURATION,
                format!("\"{raw}\" is not a non-negative number of seconds"),
            )
        })?;
        Ok(ParamValue::text(seconds.to_string()))
    }

    fn check(&self, value: ParamValue, ctx: &CheckContext<'_>) -> Result<ParamValue, UwsError> {
        let seconds: u64 = value
            .as_text()
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();
        let max = ctx.policy.max_execution_duration;
        let clamped = if max > 0 && (seconds == 0 || seconds > max) {
            max
        } else {
            seconds
        };
        Ok(ParamValue::text(clamped.to_string()))
    }
}

/// `DESTRUCTION_TIME`: ISO-8601 instant, clamped to the service's
/// maximum retention window.
struct DestructionTimeController;

impl ParameterController for DestructionTimeController {
    fn name(&self) -> &'static str {
        PARAM_DESTRUCTION_TIME
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        let instant = DateTime::parse_from_rfc3339(raw.trim()).map_err(|_| {
            UwsError::param_rejected(
                PARAM_DESTRUCTION_TIME,
                format!("\"{raw}\" is not an ISO-8601 instant"),
            )
        })?;
        Ok(ParamValue::text(
            instant
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
    }

    fn check(&self, value: ParamValue, ctx: &CheckContext<'_>) -> Result<ParamValue, UwsError> {
        let max = ctx.policy.max_destruction_interval;
        if max == 0 {
            return Ok(value);
        }
        let requested = value
            .as_text()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        let Some(requested) = requested else {
            return Ok(value);
        };
        let latest = ctx.created_at + chrono::Duration::seconds(max as i64);
        let clamped = requested.min(latest);
        Ok(ParamValue::text(
            clamped.to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
    }
}

/// `PHASE`: only the `RUN` and `ABORT` verbs are accepted as input.
struct PhaseController;

impl ParameterController for PhaseController {
    fn name(&self) -> &'static str {
        PARAM_PHASE
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        let verb = raw.trim().to_ascii_uppercase();
        if verb == "RUN" || verb == "ABORT" {
            Ok(ParamValue::Text(verb))
        } else {
            Err(UwsError::param_rejected(
                PARAM_PHASE,
                format!("\"{raw}\" is neither RUN nor ABORT"),
            ))
        }
    }
}

/// `QUOTE` is computed by the service and never writable.
struct QuoteController;

impl ParameterController for QuoteController {
    fn name(&self) -> &'static str {
        PARAM_QUOTE
    }

    fn parse(&self, _raw: &str) -> Result<ParamValue, UwsError> {
        Err(UwsError::param_rejected(PARAM_QUOTE, "read-only parameter"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::SubsecRound;
    use pretty_assertions::assert_eq;

    use super::*;

    fn context<'a>(policy: &'a JobPolicy, now: DateTime<Utc>) -> CheckContext<'a> {
        CheckContext {
            phase: ExecutionPhase::Pending,
            created_at: now,
            now,
            policy,
        }
    }

    #[test]
    fn test_unknown_names_pass_through() {
        let registry = ParameterRegistry::with_reserved();
        let policy = JobPolicy::default();
        let now = Utc::now();
        let value = registry
            .process("LANG", "ADQL", &context(&policy, now))
            .unwrap();
        assert_eq!(value, ParamValue::text("ADQL"));
    }

    #[test]
    fn test_execution_duration_is_clamped() {
        let registry = ParameterRegistry::with_reserved();
        let policy = JobPolicy {
            max_execution_duration: 600,
            ..JobPolicy::default()
        };
        let now = Utc::now();

        let value = registry
            .process(PARAM_EXECUTION_DURATION, "60", &context(&policy, now))
            .unwrap();
        assert_eq!(value, ParamValue::text("60"));

        let value = registry
            .process(PARAM_EXECUTION_DURATION, "7200", &context(&policy, now))
            .unwrap();
        assert_eq!(value, ParamValue::text("600"));

        // Zero means "unlimited", which a capped service clamps too.
        let value = registry
            .process(PARAM_EXECUTION_DURATION, "0", &context(&policy, now))
            .unwrap();
        assert_eq!(value, ParamValue::text("600"));

        let err = registry
            .process(PARAM_EXECUTION_DURATION, "soon", &context(&policy, now))
            .unwrap_err();
        assert!(matches!(err, UwsError::ParamRejected { .. }));
    }

    #[test]
    fn test_destruction_time_is_clamped_to_retention() {
        let registry = ParameterRegistry::with_reserved();
        let policy = JobPolicy {
            max_destruction_interval: 3600,
            ..JobPolicy::default()
        };
        let now = Utc::now();

        let far = (now + chrono::Duration::days(30)).to_rfc3339();
        let value = registry
            .process(PARAM_DESTRUCTION_TIME, &far, &context(&policy, now))
            .unwrap();
        let kept = DateTime::parse_from_rfc3339(value.as_text().unwrap()).unwrap();
        assert_eq!(kept.with_timezone(&Utc), now.trunc_subsecs(0) + chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_phase_verb_is_restricted() {
        let registry = ParameterRegistry::with_reserved();
        let policy = JobPolicy::default();
        let now = Utc::now();

        assert!(registry.process(PARAM_PHASE, "run", &context(&policy, now)).is_ok());
        assert!(registry.process(PARAM_PHASE, "ABORT", &context(&policy, now)).is_ok());
        assert!(matches!(
            registry.process(PARAM_PHASE, "COMPLETED", &context(&policy, now)),
            Err(UwsError::ParamRejected { .. })
        ));
    }

    #[test]
    fn test_quote_is_read_only() {
        let registry = ParameterRegistry::with_reserved();
        let policy = JobPolicy::default();
        let now = Utc::now();
        assert!(matches!(
            registry.process(PARAM_QUOTE, "42", &context(&policy, now)),
            Err(UwsError::ParamRejected { .. })
        ));
    }

    #[test]
    fn test_repeated_inputs_become_arrays() {
        let mut params = UwsParameters::default();
        params.merge("upload", ParamValue::text("a,uri-a"));
        params.merge("UPLOAD", ParamValue::text("b,uri-b"));
        assert_eq!(
            params.get("upload"),
            Some(&ParamValue::Array(vec![
                "a,uri-a".to_string(),
                "b,uri-b".to_string(),
            ]))
        );
    }

    #[test]
    fn test_apply_rejects_updates_on_terminal_jobs() {
        let registry = ParameterRegistry::with_reserved();
        let policy = JobPolicy::default();
        let now = Utc::now();
        let mut job = UwsJob::new("j", None, now);
        job.set_phase(ExecutionPhase::Executing).unwrap();
        job.set_phase(ExecutionPhase::Completed).unwrap();

        assert!(matches!(
            registry.apply(&mut job, "LANG", "ADQL", &policy, now, false),
            Err(UwsError::PhaseInvalid { .. })
        ));
        // The destruction time stays writable on a finished job.
        let when = (now + chrono::Duration::hours(2)).to_rfc3339();
        registry
            .apply(&mut job, PARAM_DESTRUCTION_TIME, &when, &policy, now, false)
            .unwrap();
        assert!(job.destruction_time.is_some());
    }

    #[test]
    fn test_apply_routes_phase_verbs() {
        let registry = ParameterRegistry::with_reserved();
        let policy = JobPolicy::default();
        let now = Utc::now();
        let mut job = UwsJob::new("j", None, now);

        let applied = registry
            .apply(&mut job, "PHASE", "RUN", &policy, now, false)
            .unwrap();
        assert_eq!(applied, AppliedParam::Run);
        let applied = registry
            .apply(&mut job, "PHASE", "abort", &policy, now, false)
            .unwrap();
        assert_eq!(applied, AppliedParam::Abort);
    }
}
