//! Pattern compilation: command globs and domain patterns to regexes.

use regex::Regex;

use shield_types::ShieldError;

use crate::schema::Rule;

/// A rule paired with its pre-compiled matchers.
///
/// The matcher for an absent pattern is `None`, and matching against `None`
/// is always false.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    command: Option<Regex>,
    domain: Option<Regex>,
}

impl CompiledRule {
    /// Compile the rule's patterns. Fails with `ShieldError::Pattern` naming
    /// the rule when either pattern does not produce a valid regex.
    pub fn compile(rule: Rule) -> Result<Self, ShieldError> {
        let command = match rule.pattern.as_deref() {
            Some(p) if !p.is_empty() => Some(glob_to_regex(p).map_err(|e| ShieldError::Pattern {
                rule_id: rule.id.clone(),
                message: e.to_string(),
            })?),
            _ => None,
        };
        let domain = match rule.domain.as_deref() {
            Some(d) if !d.is_empty() => Some(domain_to_regex(d).map_err(|e| {
                ShieldError::Pattern {
                    rule_id: rule.id.clone(),
                    message: e.to_string(),
                }
            })?),
            _ => None,
        };
        Ok(Self { rule, command, domain })
    }

    /// Whether the command matches this rule's glob pattern.
    pub fn matches_command(&self, command: &str) -> bool {
        match &self.command {
            Some(re) => re.is_match(command),
            None => false,
        }
    }

    /// Whether the domain matches this rule's domain pattern.
    pub fn matches_domain(&self, domain: &str) -> bool {
        match &self.domain {
            Some(re) => re.is_match(&domain.to_lowercase()),
            None => false,
        }
    }
}

/// Convert a command glob to a regex: `*` matches lazily across anything,
/// every other regex metacharacter is escaped, and the match is unanchored.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?i)");
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*?"),
            '.' | '+' | '?' | '^' | '$' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    Regex::new(&out)
}

/// Convert a domain pattern to an anchored, case-insensitive regex.
///
/// Three forms: exact (`example.com`), wildcard subdomain (`*.example.com`,
/// which also matches the apex), and contains (`*xmr*`, each `*` greedy,
/// each `.` literal).
fn domain_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = pattern.to_lowercase();
    let mut out = String::with_capacity(pattern.len() + 16);
    out.push_str("(?i)^");

    if let Some(suffix) = pattern.strip_prefix("*.") {
        out.push_str("([a-z0-9-]+\\.)*");
        escape_domain(suffix, &mut out);
    } else if pattern.contains('*') {
        for c in pattern.chars() {
            match c {
                '*' => out.push_str(".*"),
                '.' => out.push_str("\\."),
                _ => out.push(c),
            }
        }
    } else {
        escape_domain(&pattern, &mut out);
    }

    out.push('$');
    Regex::new(&out)
}

/// Escape regex metacharacters in a literal domain fragment.
fn escape_domain(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '.' | '+' | '?' | '^' | '$' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
}
