/*
Copyright 2024 The Kubernetes Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Translation of HTTPRoute matches into the load balancer routing condition language.
//!
//! Supported predicates:
//!
//! - path `Exact` and `PathPrefix`
//! - header `Exact`
//! - header `RegularExpression` of the form `^literal`, `^literal.*` or `literal$`

use std::sync::LazyLock;

use gateway_api::apis::standard::httproutes::HTTPRouteRulesMatches;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PATH_TYPE_EXACT: &str = "Exact";
pub const PATH_TYPE_PREFIX: &str = "PathPrefix";
pub const MATCH_TYPE_REGEX: &str = "RegularExpression";
pub const HEADER_TYPE_EXACT: &str = "Exact";

// A run of literal characters where the only escape allowed is `\.`.
static STARTS_WITH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\^((?:[^\\.*+?()\[\]{}|^$]|\\\.)+)(?:\.\*)?$").expect("valid regex")
});
static ENDS_WITH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:[^\\.*+?()\[\]{}|^$]|\\\.)+)\$$").expect("valid regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingRuleError {
    #[error("unsupported match: {0}")]
    UnsupportedMatch(String),
    #[error("invalid match: {0}")]
    InvalidMatch(String),
}

pub type Result<T, E = RoutingRuleError> = std::result::Result<T, E>;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathMatch {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatch {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    pub name: String,
    pub value: String,
}

/// Wire form of a single HTTPRoute match.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<HeaderMatch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl RouteMatch {
    pub fn from_api(m: &HTTPRouteRulesMatches) -> Result<Self> {
        serde_json::to_value(m)
            .and_then(serde_json::from_value)
            .map_err(|e| RoutingRuleError::InvalidMatch(e.to_string()))
    }

    /// The implicit match of a rule that declares none.
    pub fn default_prefix() -> Self {
        RouteMatch {
            path: Some(PathMatch {
                type_: Some(PATH_TYPE_PREFIX.to_string()),
                value: Some("/".to_string()),
            }),
            ..Default::default()
        }
    }

    pub fn header_count(&self) -> usize {
        self.headers.as_ref().map_or(0, Vec::len)
    }
}

fn quoted(value: &str) -> Result<String> {
    if value.contains('\'') {
        return Err(RoutingRuleError::UnsupportedMatch(format!(
            "value {value:?} contains a single quote"
        )));
    }
    Ok(format!("'{value}'"))
}

fn path_condition(path: &PathMatch) -> Result<String> {
    let value = path.value.as_deref().ok_or_else(|| {
        RoutingRuleError::InvalidMatch("path match value cannot be nil".to_string())
    })?;
    match path.type_.as_deref().unwrap_or(PATH_TYPE_PREFIX) {
        PATH_TYPE_EXACT => Ok(format!("http.request.url.path eq {}", quoted(value)?)),
        PATH_TYPE_PREFIX => Ok(format!("http.request.url.path sw {}", quoted(value)?)),
        other => Err(RoutingRuleError::UnsupportedMatch(format!(
            "path match type {other} is not supported"
        ))),
    }
}

fn header_condition(header: &HeaderMatch) -> Result<String> {
    let selector = format!("http.request.headers[{}]", quoted(&header.name)?);
    match header.type_.as_deref().unwrap_or(HEADER_TYPE_EXACT) {
        HEADER_TYPE_EXACT => Ok(format!("{selector} eq {}", quoted(&header.value)?)),
        MATCH_TYPE_REGEX => {
            let (operator, literal) = rewrite_header_regex(&header.value)?;
            Ok(format!("{selector} {operator} {}", quoted(&literal)?))
        }
        other => Err(RoutingRuleError::UnsupportedMatch(format!(
            "header match type {other} is not supported"
        ))),
    }
}

/// Rewrites the small subset of regular expressions the load balancer can express as
/// `sw`/`ew` string operators.
fn rewrite_header_regex(pattern: &str) -> Result<(&'static str, String)> {
    if let Some(captures) = STARTS_WITH.captures(pattern) {
        return Ok(("sw", captures[1].replace(r"\.", ".")));
    }
    if let Some(captures) = ENDS_WITH.captures(pattern) {
        return Ok(("ew", captures[1].replace(r"\.", ".")));
    }
    Err(RoutingRuleError::UnsupportedMatch(format!(
        "header regular expression {pattern:?} can not be expressed as a prefix or suffix match"
    )))
}

/// Translates one match into a condition. Predicates are joined with `and`; a match without
/// predicates yields an empty string.
pub fn condition_for_match(m: &RouteMatch) -> Result<String> {
    if m.query_params.as_ref().is_some_and(|q| !q.is_empty()) {
        return Err(RoutingRuleError::UnsupportedMatch(
            "query parameter matches are not supported".to_string(),
        ));
    }
    if m.method.is_some() {
        return Err(RoutingRuleError::UnsupportedMatch(
            "method matches are not supported".to_string(),
        ));
    }

    let mut predicates = vec![];
    if let Some(path) = &m.path {
        predicates.push(path_condition(path)?);
    }
    for header in m.headers.iter().flatten() {
        predicates.push(header_condition(header)?);
    }
    Ok(predicates.join(" and "))
}

pub fn map_http_route_match_to_condition(m: &HTTPRouteRulesMatches) -> Result<String> {
    condition_for_match(&RouteMatch::from_api(m)?)
}

/// Combines matches into `any(...)`. Conditions with more than one predicate are parenthesized
/// and matches without predicates are left out.
pub fn map_http_route_matches_to_condition(matches: &[HTTPRouteRulesMatches]) -> Result<String> {
    let mut conditions = vec![];
    for m in matches {
        let condition = map_http_route_match_to_condition(m)?;
        if condition.is_empty() {
            continue;
        }
        if condition.contains(" and ") {
            conditions.push(format!("({condition})"));
        } else {
            conditions.push(condition);
        }
    }
    if conditions.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("any({})", conditions.join(", ")))
}
