// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Color content filters.
//!
//! Two expression dialects are in use across DDS vendors:
//! - [`FilterSyntax::Equality`]: `color = %0`, parameter is the raw color
//!   (HDDS, CoreDX, OpenDDS).
//! - [`FilterSyntax::Match`]: `color MATCH %0`, parameter is a quoted string
//!   literal (Connext).
//!
//! [`ContentFilterBuilder`] produces the expression for a backend's dialect.
//! [`ColorPredicate`] evaluates either dialect with the HDDS filter engine;
//! `MATCH` is rewritten to `LIKE` first.

use std::collections::HashMap;
use std::fmt;

use hdds::dds::{ContentFilter, FieldValue, FilterEvaluator};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::options::ShapeOptions;
use crate::sample::ShapeSample;

/// Name of the key field the filters apply to.
pub const COLOR_FIELD: &str = "color";

const MATCH_KEYWORD: &str = "MATCH";

/// Filter expression dialect understood by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterSyntax {
    #[default]
    Equality,
    Match,
}

impl FilterSyntax {
    fn expression(self) -> &'static str {
        match self {
            FilterSyntax::Equality => "color = %0",
            FilterSyntax::Match => "color MATCH %0",
        }
    }

    fn parameter(self, color: &str) -> String {
        match self {
            FilterSyntax::Equality => color.to_string(),
            FilterSyntax::Match => quote_literal(color),
        }
    }
}

/// Everything a transport needs to create a content-filtered topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFilterSpec {
    /// Name of the filtered view (the base topic name).
    pub name: String,
    pub related_topic: String,
    pub expression: String,
    pub parameters: Vec<String>,
    /// Unquoted color, for log lines.
    pub color: String,
}

/// Builds the color filter of a subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentFilterBuilder {
    syntax: FilterSyntax,
}

impl ContentFilterBuilder {
    pub fn new(syntax: FilterSyntax) -> Self {
        Self { syntax }
    }

    /// `None` for publishers and for subscribers without a color.
    pub fn build(&self, options: &ShapeOptions) -> Option<ContentFilterSpec> {
        let color = options.filter_color()?;
        let spec = ContentFilterSpec {
            name: options.topic_name.clone(),
            related_topic: options.topic_name.clone(),
            expression: self.syntax.expression().to_string(),
            parameters: vec![self.syntax.parameter(color)],
            color: color.to_string(),
        };
        debug!(
            "content filter on '{}': {} {:?}",
            spec.related_topic, spec.expression, spec.parameters
        );
        Some(spec)
    }
}

/// Quote a string literal for a filter parameter, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Inverse of [`quote_literal`]; unquoted input is returned as is.
pub fn unquote_literal(value: &str) -> String {
    match value
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        Some(inner) => inner.replace("''", "'"),
        None => value.to_string(),
    }
}

/// Field map of a sample, as seen by filter expressions.
pub fn sample_fields(sample: &ShapeSample) -> HashMap<String, FieldValue> {
    HashMap::from([
        (
            COLOR_FIELD.to_string(),
            FieldValue::from_string(sample.color.clone()),
        ),
        ("x".to_string(), FieldValue::from_i32(sample.x)),
        ("y".to_string(), FieldValue::from_i32(sample.y)),
        ("shapesize".to_string(), FieldValue::from_i32(sample.shapesize)),
    ])
}

/// Compiled filter expression over [`ShapeSample`] fields.
#[derive(Clone)]
pub struct ColorPredicate {
    expression: String,
    parameters: Vec<String>,
    evaluator: FilterEvaluator,
}

impl fmt::Debug for ColorPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorPredicate")
            .field("expression", &self.expression)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl ColorPredicate {
    /// Compile an HDDS filter expression, or a single
    /// `<field> MATCH <operand>` condition.
    ///
    /// Unknown fields and missing parameters are reported here, not on the
    /// first sample.
    pub fn compile(expression: &str, parameters: &[String]) -> Result<Self, TransportError> {
        let (expression, parameters) = match translate_match(expression, parameters)? {
            Some(translated) => translated,
            None => (expression.to_string(), parameters.to_vec()),
        };

        let filter = ContentFilter::with_parameters(&expression, parameters.clone())
            .map_err(|e| TransportError::Filter(e.to_string()))?;
        let evaluator = filter.evaluator();
        evaluator
            .matches(&sample_fields(&ShapeSample::key_only("")))
            .map_err(|e| TransportError::Filter(format!("{}: {}", expression, e)))?;

        Ok(Self {
            expression,
            parameters,
            evaluator,
        })
    }

    pub fn from_spec(spec: &ContentFilterSpec) -> Result<Self, TransportError> {
        Self::compile(&spec.expression, &spec.parameters)
    }

    /// Expression handed to the HDDS engine, after `MATCH` rewriting.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluation errors count as a mismatch.
    pub fn matches(&self, sample: &ShapeSample) -> bool {
        match self.evaluator.matches(&sample_fields(sample)) {
            Ok(matched) => matched,
            Err(e) => {
                trace!("filter '{}' rejected {:?}: {}", self.expression, sample, e);
                false
            }
        }
    }
}

/// Rewrite `<field> MATCH <operand>` into `LIKE` alternatives.
///
/// The operand is `%N` or a quoted literal holding comma-separated patterns
/// with `*` and `?` wildcards. Returns `None` when the expression has no
/// `MATCH`.
fn translate_match(
    expression: &str,
    parameters: &[String],
) -> Result<Option<(String, Vec<String>)>, TransportError> {
    let upper = expression.to_ascii_uppercase();
    let Some(start) = upper
        .match_indices(MATCH_KEYWORD)
        .map(|(i, _)| i)
        .find(|&i| is_keyword_at(expression, i, i + MATCH_KEYWORD.len()))
    else {
        return Ok(None);
    };

    let field = expression[..start].trim();
    let operand = expression[start + MATCH_KEYWORD.len()..].trim();
    if field.is_empty() || !field.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(TransportError::Filter(format!(
            "MATCH needs a single '<field> MATCH <operand>' condition, got '{}'",
            expression
        )));
    }

    let raw = match operand.strip_prefix('%') {
        Some(index) => {
            let index: usize = index.parse().map_err(|_| {
                TransportError::Filter(format!("bad parameter reference '{}'", operand))
            })?;
            parameters.get(index).ok_or_else(|| {
                TransportError::Filter(format!("parameter %{} out of range", index))
            })?
        }
        None if operand.len() >= 2 && operand.starts_with('\'') && operand.ends_with('\'') => {
            operand
        }
        None => {
            return Err(TransportError::Filter(format!(
                "MATCH operand must be a parameter or a quoted literal, got '{}'",
                operand
            )));
        }
    };

    let patterns: Vec<String> = unquote_literal(raw).split(',').map(glob_to_like).collect();
    let clauses: Vec<String> = (0..patterns.len())
        .map(|i| format!("{} LIKE %{}", field, i))
        .collect();
    Ok(Some((clauses.join(" OR "), patterns)))
}

fn is_keyword_at(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    matches!(before, Some(c) if c.is_whitespace()) && matches!(after, Some(c) if c.is_whitespace())
}

fn glob_to_like(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| match c {
            '*' => '%',
            '?' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionsBuilder, Role};

    fn subscriber(color: Option<&str>) -> ShapeOptions {
        let mut builder = OptionsBuilder::new().topic("Square").role(Role::Subscribe);
        if let Some(color) = color {
            builder = builder.color(color);
        }
        builder.build().expect("valid")
    }

    fn shape(color: &str) -> ShapeSample {
        ShapeSample::new(color, 10, 20, 30)
    }

    #[test]
    fn test_no_filter_without_color() {
        let builder = ContentFilterBuilder::new(FilterSyntax::Equality);
        assert_eq!(builder.build(&subscriber(None)), None);
    }

    #[test]
    fn test_no_filter_for_publisher() {
        let options = OptionsBuilder::new()
            .topic("Square")
            .role(Role::Publish)
            .color("RED")
            .build()
            .expect("valid");
        assert_eq!(ContentFilterBuilder::default().build(&options), None);
    }

    #[test]
    fn test_equality_dialect() {
        let spec = ContentFilterBuilder::new(FilterSyntax::Equality)
            .build(&subscriber(Some("RED")))
            .expect("filter built");
        assert_eq!(spec.related_topic, "Square");
        assert_eq!(spec.expression, "color = %0");
        assert_eq!(spec.parameters, vec!["RED".to_string()]);
    }

    #[test]
    fn test_match_dialect_quotes_parameter() {
        let spec = ContentFilterBuilder::new(FilterSyntax::Match)
            .build(&subscriber(Some("O'RANGE")))
            .expect("filter built");
        assert_eq!(spec.expression, "color MATCH %0");
        assert_eq!(spec.parameters, vec!["'O''RANGE'".to_string()]);
        assert_eq!(spec.color, "O'RANGE");
    }

    #[test]
    fn test_predicate_round_trip_per_dialect() {
        for syntax in [FilterSyntax::Equality, FilterSyntax::Match] {
            let spec = ContentFilterBuilder::new(syntax)
                .build(&subscriber(Some("RED")))
                .expect("filter built");
            let predicate = ColorPredicate::from_spec(&spec).expect("compiles");
            assert!(predicate.matches(&shape("RED")), "{:?}", syntax);
            assert!(!predicate.matches(&shape("BLUE")), "{:?}", syntax);
        }
    }

    #[test]
    fn test_equality_without_spaces() {
        let predicate =
            ColorPredicate::compile("color=%0", &["GREEN".to_string()]).expect("compiles");
        assert!(predicate.matches(&shape("GREEN")));
        assert!(!predicate.matches(&shape("RED")));
    }

    #[test]
    fn test_quoted_value_keeps_inner_spaces() {
        assert_eq!(unquote_literal("' DARK RED '"), " DARK RED ");
        assert_eq!(unquote_literal(" RED "), " RED ");

        let predicate = ColorPredicate::compile("color MATCH %0", &["' DARK RED '".to_string()])
            .expect("compiles");
        assert!(predicate.matches(&shape(" DARK RED ")));
        assert!(!predicate.matches(&shape("DARK RED")));
    }

    #[test]
    fn test_match_wildcards_and_alternatives() {
        let predicate =
            ColorPredicate::compile("color MATCH %0", &["'RED,GR*,?URPLE'".to_string()])
                .expect("compiles");
        assert_eq!(
            predicate.expression(),
            "color LIKE %0 OR color LIKE %1 OR color LIKE %2"
        );
        assert!(predicate.matches(&shape("RED")));
        assert!(predicate.matches(&shape("GREEN")));
        assert!(predicate.matches(&shape("PURPLE")));
        assert!(!predicate.matches(&shape("BLUE")));
    }

    #[test]
    fn test_other_fields_are_visible() {
        let predicate = ColorPredicate::compile("color = %0 AND x > %1", &[
            "RED".to_string(),
            "5".to_string(),
        ])
        .expect("compiles");
        assert!(predicate.matches(&ShapeSample::new("RED", 6, 0, 20)));
        assert!(!predicate.matches(&ShapeSample::new("RED", 5, 0, 20)));
    }

    #[test]
    fn test_compile_errors() {
        assert!(ColorPredicate::compile("color = %1", &["RED".to_string()]).is_err());
        assert!(ColorPredicate::compile("size = %0", &["RED".to_string()]).is_err());
        assert!(ColorPredicate::compile("color MATCH RED", &[]).is_err());
        assert!(ColorPredicate::compile("color MATCH %3", &[]).is_err());
        assert!(ColorPredicate::compile("", &[]).is_err());
    }

    #[test]
    fn test_literal_operand() {
        let predicate = ColorPredicate::compile("color = 'CYAN'", &[]).expect("compiles");
        assert!(predicate.matches(&shape("CYAN")));
        assert!(!predicate.matches(&shape("cyan")));
    }
}
