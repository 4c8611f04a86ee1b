//! Binding, function-name and retry validation.
//!
//! Checks run in a fixed order so a declaration with several problems always
//! reports the same one: emptiness, structure of every binding, duplicate
//! names, binding names and `$return` direction, then trigger cardinality.

use crate::error::{ValidationError, NO_BINDINGS_MESSAGE};
use crate::function::metadata::{
    BindingDirection, BindingMetadata, RetryOptions, RetryStrategy, RETURN_BINDING_NAME,
};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

static BINDING_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{0,127}$").expect("binding name pattern"));

static FUNCTION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_\-]{0,127}$").expect("function name pattern")
});

/// Reserved function name.
const RESERVED_FUNCTION_NAME: &str = "host";

/// Validate binding declarations given as JSON text.
pub fn validate_bindings(
    raw_bindings: &[String],
    function_name: &str,
) -> Result<Vec<BindingMetadata>, ValidationError> {
    if raw_bindings.is_empty() {
        return Err(ValidationError::Format(NO_BINDINGS_MESSAGE.to_string()));
    }

    let values = raw_bindings
        .iter()
        .map(|raw| {
            serde_json::from_str::<Value>(raw).map_err(|e| {
                ValidationError::Format(format!(
                    "Invalid binding declaration for function '{}': {}",
                    function_name, e
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    validate_binding_values(&values)
}

/// Validate binding declarations given as parsed JSON values.
pub fn validate_binding_values(values: &[Value]) -> Result<Vec<BindingMetadata>, ValidationError> {
    if values.is_empty() {
        return Err(ValidationError::Format(NO_BINDINGS_MESSAGE.to_string()));
    }

    let mut bindings = Vec::with_capacity(values.len());
    let mut names = HashSet::with_capacity(values.len());
    for value in values {
        let binding = BindingMetadata::from_json(value)?;
        if !names.insert(binding.name.clone()) {
            return Err(ValidationError::DuplicateName { name: binding.name });
        }
        bindings.push(binding);
    }

    for binding in &bindings {
        validate_binding_name(&binding.name)?;
        if binding.is_return() && binding.direction != BindingDirection::Out {
            return Err(ValidationError::ReturnDirection);
        }
    }

    match bindings.iter().filter(|b| b.is_trigger()).count() {
        0 => Err(ValidationError::MissingTrigger),
        1 => Ok(bindings),
        _ => Err(ValidationError::MultipleTriggers),
    }
}

/// Validate a single binding name. `$return` is always allowed.
pub fn validate_binding_name(name: &str) -> Result<(), ValidationError> {
    if name == RETURN_BINDING_NAME || BINDING_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidBindingName {
            name: name.to_string(),
        })
    }
}

/// Validate a function name.
pub fn validate_function_name(name: &str) -> Result<(), ValidationError> {
    if FUNCTION_NAME.is_match(name) && !name.eq_ignore_ascii_case(RESERVED_FUNCTION_NAME) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFunctionName {
            name: name.to_string(),
        })
    }
}

/// Validate retry options, if any.
pub fn validate_retry_options(retry: Option<&RetryOptions>) -> Result<(), ValidationError> {
    let Some(retry) = retry else {
        return Ok(());
    };

    match retry.max_retry_count {
        None => {
            return Err(ValidationError::InvalidRetry(
                "'maxRetryCount' must be specified.".to_string(),
            ))
        }
        Some(count) if count < -1 => {
            return Err(ValidationError::InvalidRetry(
                "'maxRetryCount' must be greater than or equal to -1.".to_string(),
            ))
        }
        Some(_) => {}
    }

    match retry.strategy {
        RetryStrategy::FixedDelay => {
            if retry.delay_interval.is_none() {
                return Err(ValidationError::InvalidRetry(
                    "'delayInterval' must be specified for the fixedDelay strategy.".to_string(),
                ));
            }
        }
        RetryStrategy::ExponentialBackoff => match (retry.minimum_interval, retry.maximum_interval) {
            (Some(min), Some(max)) if min > max => {
                return Err(ValidationError::InvalidRetry(
                    "'minimumInterval' must not be greater than 'maximumInterval'.".to_string(),
                ))
            }
            (Some(_), Some(_)) => {}
            _ => {
                return Err(ValidationError::InvalidRetry(
                    "'minimumInterval' and 'maximumInterval' must be specified for the exponentialBackoff strategy."
                        .to_string(),
                ))
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn raw(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const TRIGGER: &str = r#"{"type":"httpTrigger","name":"req","direction":"in"}"#;

    #[test]
    fn test_valid_bindings() {
        let bindings = assert_ok!(validate_bindings(
            &raw(&[TRIGGER, r#"{"type":"http","name":"$return","direction":"out"}"#]),
            "fn"
        ));
        assert_eq!(bindings.len(), 2);
        assert!(bindings[0].is_trigger());
        assert!(bindings[1].is_return());
    }

    #[test]
    fn test_empty_bindings() {
        let err = validate_bindings(&[], "fn").unwrap_err();
        assert_eq!(err.to_string(), NO_BINDINGS_MESSAGE);
    }

    #[test]
    fn test_malformed_binding_json() {
        let err = validate_bindings(&raw(&["{not json"]), "fn").unwrap_err();
        assert_eq!(err.as_label(), "format");
    }

    #[test]
    fn test_duplicate_names_reported_before_trigger() {
        let err = validate_bindings(
            &raw(&[
                r#"{"type":"queue","name":"dupe","direction":"in"}"#,
                r#"{"type":"blob","name":"dupe","direction":"out"}"#,
            ]),
            "fn",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Multiple bindings with name 'dupe' discovered. Binding names must be unique."
        );
    }

    #[test]
    fn test_invalid_binding_names() {
        for name in ["", "1abc", "has space", "under_score", "x$"] {
            let declaration = format!(r#"{{"type":"queueTrigger","name":"{}"}}"#, name);
            let err = validate_bindings(&[declaration], "fn").unwrap_err();
            assert_eq!(
                err,
                ValidationError::InvalidBindingName { name: name.to_string() },
                "name {:?}",
                name
            );
        }
    }

    #[test]
    fn test_binding_names_reject_separators() {
        for name in ["_binding", "binding-test"] {
            assert_eq!(
                validate_binding_name(name),
                Err(ValidationError::InvalidBindingName { name: name.to_string() })
            );
        }
        assert_ok!(validate_binding_name("binding1"));
        assert_ok!(validate_binding_name(RETURN_BINDING_NAME));
    }

    #[test]
    fn test_return_must_be_out() {
        let err = validate_bindings(
            &raw(&[TRIGGER, r#"{"type":"http","name":"$return","direction":"in"}"#]),
            "fn",
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::ReturnDirection);

        let err = validate_bindings(&raw(&[TRIGGER, r#"{"type":"http","name":"$return"}"#]), "fn")
            .unwrap_err();
        assert_eq!(err, ValidationError::ReturnDirection);
    }

    #[test]
    fn test_trigger_cardinality() {
        let err = validate_bindings(&raw(&[r#"{"type":"queue","name":"q"}"#]), "fn").unwrap_err();
        assert_eq!(err, ValidationError::MissingTrigger);

        let err = validate_bindings(
            &raw(&[TRIGGER, r#"{"type":"TimerTrigger","name":"timer"}"#]),
            "fn",
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::MultipleTriggers);
    }

    #[test]
    fn test_trigger_suffix_case_insensitive() {
        assert_ok!(validate_bindings(&raw(&[r#"{"type":"QUEUETRIGGER","name":"msg"}"#]), "fn"));
    }

    #[test]
    fn test_function_names() {
        assert_ok!(validate_function_name("HttpTrigger-CSharp_1"));
        assert_err!(validate_function_name("host"));
        assert_err!(validate_function_name("HOST"));
        assert_err!(validate_function_name("1func"));
        assert_err!(validate_function_name("bad name"));
        assert_err!(validate_function_name(""));
        assert_ok!(validate_function_name("hosted"));
        assert_err!(validate_function_name(&"a".repeat(129)));
        assert_ok!(validate_function_name(&"a".repeat(128)));
    }

    #[test]
    fn test_function_names_reject_leading_separators_and_dots() {
        for name in ["-function", "_function", "function.test", "function0.1"] {
            assert_eq!(
                validate_function_name(name),
                Err(ValidationError::InvalidFunctionName { name: name.to_string() }),
                "name {:?}",
                name
            );
        }
        assert_ok!(validate_function_name("function-test_1"));
    }

    #[test]
    fn test_retry_options() {
        assert_ok!(validate_retry_options(None));
        assert_ok!(validate_retry_options(Some(&RetryOptions::fixed_delay(
            3,
            Duration::from_secs(5)
        ))));
        assert_ok!(validate_retry_options(Some(&RetryOptions::fixed_delay(
            -1,
            Duration::from_secs(5)
        ))));
        assert_err!(validate_retry_options(Some(&RetryOptions::fixed_delay(
            -2,
            Duration::from_secs(5)
        ))));

        let backwards =
            RetryOptions::exponential_backoff(2, Duration::from_secs(10), Duration::from_secs(1));
        assert_err!(validate_retry_options(Some(&backwards)));

        let mut missing = RetryOptions::fixed_delay(1, Duration::from_secs(1));
        missing.delay_interval = None;
        assert_err!(validate_retry_options(Some(&missing)));
    }
}
