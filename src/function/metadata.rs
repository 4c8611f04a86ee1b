//! Function and binding metadata.
//!
//! [`FunctionMetadata`] is the resolved, validated description of one function:
//! its name, the script that implements it, the language runtime that runs it
//! and the bindings that connect it to triggers and outputs. Worker runtimes
//! report functions as [`RawFunctionMetadata`] (bindings still as JSON text)
//! which the control plane validates before converting.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Reserved binding name that maps to the function's return value.
pub const RETURN_BINDING_NAME: &str = "$return";

/// Data-flow direction of a binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingDirection {
    /// Input (the default when `direction` is omitted).
    #[default]
    In,
    /// Output.
    Out,
    /// Both directions.
    InOut,
}

impl BindingDirection {
    /// Parse a direction string case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "in" => Some(BindingDirection::In),
            "out" => Some(BindingDirection::Out),
            "inout" => Some(BindingDirection::InOut),
            _ => None,
        }
    }
}

/// One binding of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingMetadata {
    /// Binding name. Unique within its function.
    pub name: String,
    /// Binding type, e.g. `httpTrigger` or `queue`.
    #[serde(rename = "type")]
    pub binding_type: String,
    /// Direction of data flow.
    #[serde(default)]
    pub direction: BindingDirection,
    /// The full declaration as it was written.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

impl BindingMetadata {
    /// Create a new binding.
    pub fn new(
        name: impl Into<String>,
        binding_type: impl Into<String>,
        direction: BindingDirection,
    ) -> Self {
        Self {
            name: name.into(),
            binding_type: binding_type.into(),
            direction,
            raw: Map::new(),
        }
    }

    /// Parse a binding from its JSON declaration.
    ///
    /// Only structure is checked here. Name rules, uniqueness and trigger
    /// cardinality are checked by [`crate::function::validation`].
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or_else(|| {
            ValidationError::Format("Binding declarations must be JSON objects.".to_string())
        })?;

        let binding_type = object
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ValidationError::Format(
                    "Binding is missing the required 'type' property.".to_string(),
                )
            })?;

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let direction = match object.get("direction").and_then(Value::as_str) {
            None => BindingDirection::In,
            Some(raw) => BindingDirection::parse(raw).ok_or_else(|| {
                ValidationError::Format(format!("Invalid binding direction '{}'.", raw))
            })?,
        };

        Ok(Self {
            name: name.to_string(),
            binding_type: binding_type.to_string(),
            direction,
            raw: object.clone(),
        })
    }

    /// Whether the binding type ends in `Trigger` (case-insensitive).
    pub fn is_trigger(&self) -> bool {
        self.binding_type.to_ascii_lowercase().ends_with("trigger")
    }

    /// Whether this is the `$return` binding.
    pub fn is_return(&self) -> bool {
        self.name == RETURN_BINDING_NAME
    }
}

/// Retry strategy of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetryStrategy {
    /// Wait a fixed interval between attempts.
    FixedDelay,
    /// Wait between a minimum and maximum interval, growing per attempt.
    ExponentialBackoff,
}

/// Retry options declared in `function.json` or reported by a worker.
///
/// Intervals use the `[d.]hh:mm:ss[.fff]` notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOptions {
    /// Which strategy to use.
    pub strategy: RetryStrategy,
    /// Attempts after the first; `-1` means unbounded.
    #[serde(default)]
    pub max_retry_count: Option<i32>,
    /// Delay for [`RetryStrategy::FixedDelay`].
    #[serde(default, with = "timespan", skip_serializing_if = "Option::is_none")]
    pub delay_interval: Option<Duration>,
    /// Lower bound for [`RetryStrategy::ExponentialBackoff`].
    #[serde(default, with = "timespan", skip_serializing_if = "Option::is_none")]
    pub minimum_interval: Option<Duration>,
    /// Upper bound for [`RetryStrategy::ExponentialBackoff`].
    #[serde(default, with = "timespan", skip_serializing_if = "Option::is_none")]
    pub maximum_interval: Option<Duration>,
}

impl RetryOptions {
    /// Fixed-delay retry.
    pub fn fixed_delay(max_retry_count: i32, delay: Duration) -> Self {
        Self {
            strategy: RetryStrategy::FixedDelay,
            max_retry_count: Some(max_retry_count),
            delay_interval: Some(delay),
            minimum_interval: None,
            maximum_interval: None,
        }
    }

    /// Exponential-backoff retry.
    pub fn exponential_backoff(max_retry_count: i32, minimum: Duration, maximum: Duration) -> Self {
        Self {
            strategy: RetryStrategy::ExponentialBackoff,
            max_retry_count: Some(max_retry_count),
            delay_interval: None,
            minimum_interval: Some(minimum),
            maximum_interval: Some(maximum),
        }
    }
}

/// Where a function's metadata came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionSource {
    /// Scanned from a `function.json` under the script root.
    #[default]
    Host,
    /// Reported by a language worker.
    Worker,
    /// Contributed by an external function provider.
    Provider,
}

/// Resolved metadata for one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMetadata {
    /// Function name. An empty name denotes an anonymous function.
    pub name: String,
    /// Directory the function was declared in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Absolute path of the primary script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<PathBuf>,
    /// Entry point inside the script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Language identifier, e.g. `node`, `python`, `CSharp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Validated bindings.
    #[serde(default)]
    pub bindings: Vec<BindingMetadata>,
    /// Validated retry options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOptions>,
    /// Function has no script of its own.
    #[serde(default)]
    pub is_codeless: bool,
    /// Which source produced the metadata.
    #[serde(default)]
    pub source: FunctionSource,
}

impl FunctionMetadata {
    /// Create new metadata with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directory: None,
            script_file: None,
            entry_point: None,
            language: None,
            bindings: Vec::new(),
            retry: None,
            is_codeless: false,
            source: FunctionSource::Host,
        }
    }

    /// Set the function directory.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Set the primary script file.
    pub fn with_script_file(mut self, script_file: impl Into<PathBuf>) -> Self {
        self.script_file = Some(script_file.into());
        self
    }

    /// Set the entry point.
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    /// Set the language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Add a binding.
    pub fn with_binding(mut self, binding: BindingMetadata) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Set retry options.
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Mark as codeless.
    pub fn codeless(mut self, is_codeless: bool) -> Self {
        self.is_codeless = is_codeless;
        self
    }

    /// Set the source.
    pub fn with_source(mut self, source: FunctionSource) -> Self {
        self.source = source;
        self
    }

    /// The trigger binding, if exactly one is declared.
    pub fn trigger(&self) -> Option<&BindingMetadata> {
        let mut triggers = self.bindings.iter().filter(|b| b.is_trigger());
        match (triggers.next(), triggers.next()) {
            (Some(trigger), None) => Some(trigger),
            _ => None,
        }
    }

    /// Whether the function has no name.
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }
}

/// Function metadata as reported by a language worker, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFunctionMetadata {
    /// Function name.
    pub name: String,
    /// Worker asks the host to index this function from disk instead.
    #[serde(default)]
    pub use_default_metadata_indexing: bool,
    /// Binding declarations as JSON text.
    #[serde(default)]
    pub bindings: Vec<String>,
    /// Function directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Primary script file.
    #[serde(default)]
    pub script_file: Option<PathBuf>,
    /// Entry point.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Language, defaults to the worker's language.
    #[serde(default)]
    pub language: Option<String>,
    /// Retry options.
    #[serde(default)]
    pub retry: Option<RetryOptions>,
}

impl RawFunctionMetadata {
    /// Create a worker-indexed function declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Create a declaration that defers to host indexing.
    pub fn use_default(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            use_default_metadata_indexing: true,
            ..Self::default()
        }
    }

    /// Add a binding declaration.
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.bindings.push(binding.into());
        self
    }

    /// Set the script file.
    pub fn with_script_file(mut self, script_file: impl Into<PathBuf>) -> Self {
        self.script_file = Some(script_file.into());
        self
    }

    /// Set the entry point.
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    /// Set retry options.
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Serde adapter for `Option<Duration>` in `[d.]hh:mm:ss[.fff]` form.
pub mod timespan {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Parse a `[d.]hh:mm:ss[.fff]` string.
    pub fn parse(value: &str) -> Option<Duration> {
        let value = value.trim();
        let mut parts = value.split(':');
        let (head, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let (days, hours) = match head.split_once('.') {
            Some((d, h)) => (d.parse::<u64>().ok()?, h.parse::<u64>().ok()?),
            None => (0, head.parse::<u64>().ok()?),
        };
        let minutes = minutes.parse::<u64>().ok()?;
        let (whole, fraction) = match seconds.split_once('.') {
            Some((s, f)) => (s, f),
            None => (seconds, ""),
        };
        let whole = whole.parse::<u64>().ok()?;
        if hours > 23 || minutes > 59 || whole > 59 {
            return None;
        }

        let nanos = if fraction.is_empty() {
            0
        } else {
            if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            format!("{:0<9}", fraction).parse::<u32>().ok()?
        };

        let secs = ((days * 24 + hours) * 60 + minutes) * 60 + whole;
        Some(Duration::new(secs, nanos))
    }

    /// Format a duration as `[d.]hh:mm:ss[.fff]`.
    pub fn format(value: Duration) -> String {
        let total = value.as_secs();
        let (days, rem) = (total / 86_400, total % 86_400);
        let (hours, rem) = (rem / 3_600, rem % 3_600);
        let (minutes, seconds) = (rem / 60, rem % 60);
        let mut out = if days > 0 {
            format!("{}.{:02}:{:02}:{:02}", days, hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        };
        let millis = value.subsec_millis();
        if millis > 0 {
            out.push_str(&format!(".{:03}", millis));
        }
        out
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_str(&format(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid time interval '{}'", raw))),
        }
    }
}
