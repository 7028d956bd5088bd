//! Variable identifiers and the `${key:name@scope:scope_key#sys_code%user_name}`
//! string syntax.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VariablesError;

pub const VARIABLES_SCOPE_GLOBAL: &str = "global";
pub const VARIABLES_SCOPE_APP: &str = "app";
pub const VARIABLES_SCOPE_USER: &str = "user";
pub const VARIABLES_SCOPE_AGENT: &str = "agent";
pub const VARIABLES_SCOPE_FLOW: &str = "flow";
pub const VARIABLES_SCOPE_DATASOURCE: &str = "datasource";
/// Scope private to one flow; an absent scope key means "the enclosing DAG".
pub const VARIABLES_SCOPE_FLOW_PRIVATE: &str = "flow_priv";

const ESCAPED: [char; 5] = ['\\', ':', '@', '#', '%'];

/// The components of a variable string. Only `key` is mandatory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedVariable {
  pub key: String,
  pub name: Option<String>,
  pub scope: Option<String>,
  pub scope_key: Option<String>,
  pub sys_code: Option<String>,
  pub user_name: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
  Key,
  Name,
  Scope,
  ScopeKey,
  SysCode,
  UserName,
}

/// True if `s` has the `${...}` shape of a variable reference.
pub fn is_variable_string(s: &str) -> bool {
  s.starts_with("${") && s.ends_with('}') && s.len() > 3 && parse_variable(s, true).is_ok()
}

/// Parse a `${...}` variable string into its components.
///
/// With `enable_escape`, a backslash makes the following delimiter literal.
/// Empty segments are `None`.
pub fn parse_variable(s: &str, enable_escape: bool) -> Result<ParsedVariable, VariablesError> {
  let invalid = |message: &str| VariablesError::InvalidIdentifier {
    input: s.to_string(),
    message: message.to_string(),
  };

  let body = s
    .strip_prefix("${")
    .and_then(|rest| rest.strip_suffix('}'))
    .ok_or_else(|| invalid("must look like ${...}"))?;

  let mut segments: Vec<(Segment, String)> = vec![(Segment::Key, String::new())];
  let mut chars = body.chars();
  while let Some(c) = chars.next() {
    if enable_escape && c == '\\' {
      match chars.next() {
        Some(next) if ESCAPED.contains(&next) => {
          if let Some((_, buf)) = segments.last_mut() {
            buf.push(next);
          }
          continue;
        }
        _ => return Err(invalid("backslash must escape one of \\ : @ # %")),
      }
    }

    let Some((current, buf)) = segments.last_mut() else {
      return Err(invalid("empty variable"));
    };
    let next = match (c, *current) {
      (':', Segment::Key) => Some(Segment::Name),
      (':', Segment::Scope) => Some(Segment::ScopeKey),
      ('@', Segment::Key | Segment::Name) => Some(Segment::Scope),
      ('#', seg) if seg < Segment::SysCode => Some(Segment::SysCode),
      ('%', seg) if seg < Segment::UserName => Some(Segment::UserName),
      (':' | '@' | '#' | '%', _) => return Err(invalid(&format!("unexpected '{c}'"))),
      _ => {
        buf.push(c);
        None
      }
    };
    if let Some(segment) = next {
      segments.push((segment, String::new()));
    }
  }

  let mut parsed = ParsedVariable::default();
  for (segment, value) in segments {
    let value = (!value.is_empty()).then_some(value);
    match segment {
      Segment::Key => parsed.key = value.unwrap_or_default(),
      Segment::Name => parsed.name = value,
      Segment::Scope => parsed.scope = value,
      Segment::ScopeKey => parsed.scope_key = value,
      Segment::SysCode => parsed.sys_code = value,
      Segment::UserName => parsed.user_name = value,
    }
  }
  if parsed.key.is_empty() {
    return Err(invalid("key is required"));
  }
  if parsed.scope_key.is_some() && parsed.scope.is_none() {
    return Err(invalid("scope key requires a scope"));
  }
  Ok(parsed)
}

fn escape(s: &str, enable_escape: bool) -> String {
  if !enable_escape {
    return s.to_string();
  }
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    if ESCAPED.contains(&c) {
      out.push('\\');
    }
    out.push(c);
  }
  out
}

/// Inverse of [`parse_variable`]. A scope key without a scope is still
/// written, so the result fails to parse instead of losing it.
pub fn build_variable_string(parsed: &ParsedVariable, enable_escape: bool) -> String {
  let mut out = String::from("${");
  out.push_str(&escape(&parsed.key, enable_escape));
  if let Some(name) = &parsed.name {
    out.push(':');
    out.push_str(&escape(name, enable_escape));
  }
  if parsed.scope.is_some() || parsed.scope_key.is_some() {
    out.push('@');
    if let Some(scope) = &parsed.scope {
      out.push_str(&escape(scope, enable_escape));
    }
    if let Some(scope_key) = &parsed.scope_key {
      out.push(':');
      out.push_str(&escape(scope_key, enable_escape));
    }
  }
  if let Some(sys_code) = &parsed.sys_code {
    out.push('#');
    out.push_str(&escape(sys_code, enable_escape));
  }
  if let Some(user_name) = &parsed.user_name {
    out.push('%');
    out.push_str(&escape(user_name, enable_escape));
  }
  out.push('}');
  out
}

/// Fully qualified identity of a stored variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariablesIdentifier {
  pub key: String,
  pub name: String,
  pub scope: String,
  pub scope_key: Option<String>,
  pub sys_code: Option<String>,
  pub user_name: Option<String>,
}

impl VariablesIdentifier {
  pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      name: name.into(),
      scope: VARIABLES_SCOPE_GLOBAL.to_string(),
      scope_key: None,
      sys_code: None,
      user_name: None,
    }
  }

  pub fn with_scope(mut self, scope: impl Into<String>, scope_key: Option<String>) -> Self {
    self.scope = scope.into();
    self.scope_key = scope_key;
    self
  }

  pub fn with_sys_code(mut self, sys_code: Option<String>) -> Self {
    self.sys_code = sys_code;
    self
  }

  pub fn with_user_name(mut self, user_name: Option<String>) -> Self {
    self.user_name = user_name;
    self
  }

  /// Parse a full variable string. The name is required and the scope
  /// defaults to `global`.
  pub fn from_str_identifier(s: &str) -> Result<Self, VariablesError> {
    let parsed = parse_variable(s, true)?;
    let name = parsed.name.ok_or_else(|| VariablesError::InvalidIdentifier {
      input: s.to_string(),
      message: "name is required".to_string(),
    })?;
    Ok(Self {
      key: parsed.key,
      name,
      scope: parsed.scope.unwrap_or_else(|| VARIABLES_SCOPE_GLOBAL.to_string()),
      scope_key: parsed.scope_key,
      sys_code: parsed.sys_code,
      user_name: parsed.user_name,
    })
  }

  pub fn is_flow_private(&self) -> bool {
    self.scope == VARIABLES_SCOPE_FLOW_PRIVATE
  }

  pub fn str_identifier(&self) -> String {
    build_variable_string(&self.to_parsed(), true)
  }

  pub fn to_parsed(&self) -> ParsedVariable {
    ParsedVariable {
      key: self.key.clone(),
      name: Some(self.name.clone()),
      scope: Some(self.scope.clone()),
      scope_key: self.scope_key.clone(),
      sys_code: self.sys_code.clone(),
      user_name: self.user_name.clone(),
    }
  }
}

impl fmt::Display for VariablesIdentifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.str_identifier())
  }
}
