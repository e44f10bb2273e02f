//! The query-service job parameters, registered on top of the runtime's
//! reserved set: `QUERY`, `LANG`, `FORMAT`/`RESPONSEFORMAT`, `MAXREC`
//! and `UPLOAD`.

use std::sync::Arc;

use skyql_uws::errors::UwsError;
use skyql_uws::job::JobPolicy;
use skyql_uws::params::{CheckContext, ParamValue, ParameterController, ParameterRegistry};

use crate::backend::ResultSerializer;
use crate::upload::parse_upload_param;

pub const PARAM_QUERY: &str = "query";
pub const PARAM_LANG: &str = "lang";
pub const PARAM_FORMAT: &str = "format";
pub const PARAM_RESPONSE_FORMAT: &str = "responseformat";
pub const PARAM_MAXREC: &str = "maxrec";
pub const PARAM_UPLOAD: &str = "upload";

/// Registry for a query job list: the runtime's reserved controllers
/// plus the service's own.
pub fn query_registry(
    serializers: &[Arc<dyn ResultSerializer>],
    output_cap: Option<u64>,
) -> ParameterRegistry {
    let formats: Vec<(String, String)> = serializers
        .iter()
        .map(|s| (s.mime_type().to_string(), s.shorthand().to_string()))
        .collect();
    let default_format = serializers
        .first()
        .map(|s| s.shorthand().to_string())
        .unwrap_or_else(|| "votable".to_string());

    let mut registry = ParameterRegistry::with_reserved();
    registry.register(Arc::new(QueryController));
    registry.register(Arc::new(LangController));
    registry.register(Arc::new(FormatController {
        name: PARAM_FORMAT,
        formats: formats.clone(),
        default: default_format.clone(),
    }));
    registry.register(Arc::new(FormatController {
        name: PARAM_RESPONSE_FORMAT,
        formats,
        default: default_format,
    }));
    registry.register(Arc::new(MaxRecController { cap: output_cap }));
    registry.register(Arc::new(UploadController));
    registry
}

/// `QUERY`: the statement to run; must not be blank.
struct QueryController;

impl ParameterController for QueryController {
    fn name(&self) -> &'static str {
        PARAM_QUERY
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        if raw.trim().is_empty() {
            return Err(UwsError::param_rejected(PARAM_QUERY, "empty query"));
        }
        Ok(ParamValue::text(raw))
    }
}

/// `LANG`: this service only speaks ADQL (any 2.x minor).
struct LangController;

impl ParameterController for LangController {
    fn name(&self) -> &'static str {
        PARAM_LANG
    }

    fn default_value(&self, _policy: &JobPolicy) -> Option<ParamValue> {
        Some(ParamValue::text("ADQL"))
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        let lang = raw.trim().to_ascii_uppercase();
        if lang == "ADQL" || lang.starts_with("ADQL-2.") {
            Ok(ParamValue::Text(lang))
        } else {
            Err(UwsError::param_rejected(
                PARAM_LANG,
                format!("unsupported language \"{raw}\""),
            ))
        }
    }
}

/// `FORMAT`/`RESPONSEFORMAT`: a mime type or alias of a registered
/// serializer.
struct FormatController {
    name: &'static str,
    /// `(mime, shorthand)` of every registered serializer.
    formats: Vec<(String, String)>,
    default: String,
}

impl ParameterController for FormatController {
    fn name(&self) -> &'static str {
        self.name
    }

    fn default_value(&self, _policy: &JobPolicy) -> Option<ParamValue> {
        Some(ParamValue::text(self.default.clone()))
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        let wanted = raw.trim();
        let known = self.formats.iter().any(|(mime, shorthand)| {
            mime.eq_ignore_ascii_case(wanted) || shorthand.eq_ignore_ascii_case(wanted)
        });
        if known {
            Ok(ParamValue::text(wanted))
        } else {
            Err(UwsError::param_rejected(
                self.name,
                format!("no serializer for \"{raw}\""),
            ))
        }
    }
}

/// `MAXREC`: requested output cap, clamped to the service's own.
struct MaxRecController {
    cap: Option<u64>,
}

impl ParameterController for MaxRecController {
    fn name(&self) -> &'static str {
        PARAM_MAXREC
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        let requested: u64 = raw.trim().parse().map_err(|_| {
            UwsError::param_rejected(
                PARAM_MAXREC,
                format!("\"{raw}\" is not a non-negative integer"),
            )
        })?;
        Ok(ParamValue::text(requested.to_string()))
    }

    fn check(&self, value: ParamValue, _ctx: &CheckContext<'_>) -> Result<ParamValue, UwsError> {
        let requested: u64 = value
            .as_text()
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();
        let clamped = match self.cap {
            Some(cap) => requested.min(cap),
            None => requested,
        };
        Ok(ParamValue::text(clamped.to_string()))
    }
}

/// `UPLOAD`: `table,uri` pairs; validated here, materialized at run
/// time.
struct UploadController;

impl ParameterController for UploadController {
    fn name(&self) -> &'static str {
        PARAM_UPLOAD
    }

    fn parse(&self, raw: &str) -> Result<ParamValue, UwsError> {
        parse_upload_param(&ParamValue::text(raw))
            .map_err(|err| UwsError::param_rejected(PARAM_UPLOAD, err.to_string()))?;
        Ok(ParamValue::text(raw))
    }
}
