// src/core/interpolator.rs

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;
use thiserror::Error;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("placeholder pattern is valid");
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("Unknown placeholder '{{{key}}}' in command template '{template}'.")]
    UnknownPlaceholder { key: String, template: String },
    #[error("Value for '{{{key}}}' cannot be quoted for the shell (it contains a NUL byte).")]
    Unquotable { key: String },
}

/// Values substituted into a command template.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: HashMap<&'static str, String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// Joins a list into one space-separated value (quoted as a whole).
    pub fn with_list(self, key: &'static str, items: &[String]) -> Self {
        self.with(key, items.join(" "))
    }
}

/// Replaces every `{key}` in `template` with the shell-quoted value of `key`.
///
/// Quoting happens per value, so user input can never break out of its
/// argument position. Unknown placeholders are an error rather than being left
/// in the command line.
pub fn render(template: &str, vars: &Vars) -> Result<String, InterpolationError> {
    let mut failure: Option<InterpolationError> = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match vars.values.get(key) {
            Some(value) => match shlex::try_quote(value) {
                Ok(quoted) => quoted.into_owned(),
                Err(_) => {
                    failure.get_or_insert(InterpolationError::Unquotable {
                        key: key.to_string(),
                    });
                    String::new()
                }
            },
            None => {
                failure.get_or_insert(InterpolationError::UnknownPlaceholder {
                    key: key.to_string(),
                    template: template.to_string(),
                });
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

/// Renders each template of a multi-stage command list.
pub fn render_all(templates: &[String], vars: &Vars) -> Result<Vec<String>, InterpolationError> {
    templates.iter().map(|t| render(t, vars)).collect()
}
