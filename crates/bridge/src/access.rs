//! Identity-aware access filtering.
//!
//! Requirements are evaluated the same way at list-time (visibility) and
//! call-time (execution), so what a caller can see is exactly what a caller
//! can invoke.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::config::{ClaimRequirement, MatchType};

/// The decoded, verified contents of a caller's token.
#[derive(Debug, Clone, Default)]
pub struct ClaimSet {
    claims: Map<String, Value>,
}

impl ClaimSet {
    pub const fn new(claims: Map<String, Value>) -> ClaimSet {
        ClaimSet { claims }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// The whitespace-split `scope` claim.
    pub fn scopes(&self) -> HashSet<&str> {
        self.claims
            .get("scope")
            .and_then(Value::as_str)
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

fn scalar_token(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalise a claim value into a set of comparable tokens: strings split on
/// whitespace, arrays taken element-wise, anything else stringified whole.
fn claim_tokens(value: &Value) -> HashSet<String> {
    match value {
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Array(items) => items.iter().map(scalar_token).collect(),
        other => HashSet::from([scalar_token(other)]),
    }
}

/// Evaluate one requirement against a claim set.
pub fn requirement_satisfied(claims: &ClaimSet, req: &ClaimRequirement) -> bool {
    let Some(value) = claims.get(&req.claim_name) else {
        return false;
    };
    let tokens = claim_tokens(value);
    let matched = req
        .claim_values
        .iter()
        .filter(|v| tokens.contains(v.as_str()))
        .count();
    match req.match_type {
        MatchType::All => matched == req.claim_values.len(),
        MatchType::Any => matched > 0,
    }
}

/// All requirements must hold; an empty list is public.
pub fn requirements_satisfied(claims: &ClaimSet, requirements: &[ClaimRequirement]) -> bool {
    requirements.iter().all(|r| requirement_satisfied(claims, r))
}

/// Every required scope must appear in the token's `scope` set.
pub fn scopes_satisfied(claims: &ClaimSet, required: &[String]) -> bool {
    if required.is_empty() {
        return true;
    }
    let scopes = claims.scopes();
    required.iter().all(|s| scopes.contains(s.as_str()))
}
