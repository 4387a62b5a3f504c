//! Rule expression parsing.
//!
//! # Grammar
//! ```text
//! rule   := clause (';' clause)*
//! clause := Function ':' arg (',' arg)*
//! ```
//! Function names are case-insensitive. Clauses combine with AND; the
//! arguments of one clause combine with OR (`Host:a.com,b.com`), except for
//! `Headers`/`HeadersRegexp`, whose arguments are `name,value` pairs that
//! must all match.
//!
//! `PathStrip`, `PathPrefixStrip`, `AddPrefix` and `ReplacePath` record
//! path rewrites that are applied after the route is selected.

use std::collections::HashSet;
use std::fmt;

use axum::http::{HeaderName, Method};
use regex::Regex;

use crate::routing::matcher::{canonical_host, Condition, RuleMatcher};

/// The closed set of rule functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFunction {
    Host,
    HostRegexp,
    Path,
    PathPrefix,
    PathPrefixStrip,
    PathStrip,
    Headers,
    HeadersRegexp,
    Method,
    AddPrefix,
    ReplacePath,
}

const ALL_FUNCTIONS: [RuleFunction; 11] = [
    RuleFunction::Host,
    RuleFunction::HostRegexp,
    RuleFunction::Path,
    RuleFunction::PathPrefix,
    RuleFunction::PathPrefixStrip,
    RuleFunction::PathStrip,
    RuleFunction::Headers,
    RuleFunction::HeadersRegexp,
    RuleFunction::Method,
    RuleFunction::AddPrefix,
    RuleFunction::ReplacePath,
];

impl RuleFunction {
    pub fn name(self) -> &'static str {
        match self {
            RuleFunction::Host => "Host",
            RuleFunction::HostRegexp => "HostRegexp",
            RuleFunction::Path => "Path",
            RuleFunction::PathPrefix => "PathPrefix",
            RuleFunction::PathPrefixStrip => "PathPrefixStrip",
            RuleFunction::PathStrip => "PathStrip",
            RuleFunction::Headers => "Headers",
            RuleFunction::HeadersRegexp => "HeadersRegexp",
            RuleFunction::Method => "Method",
            RuleFunction::AddPrefix => "AddPrefix",
            RuleFunction::ReplacePath => "ReplacePath",
        }
    }

    /// Case-insensitive lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_FUNCTIONS
            .into_iter()
            .find(|function| function.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for RuleFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised while parsing a rule.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleError {
    #[error("empty rule")]
    Empty,

    #[error("unknown rule function {0:?}")]
    UnknownFunction(String),

    #[error("{0} requires at least one argument")]
    MissingArguments(RuleFunction),

    #[error("{function}: {reason}")]
    InvalidArguments {
        function: RuleFunction,
        reason: String,
    },

    #[error("{function}: invalid regular expression: {source}")]
    InvalidRegex {
        function: RuleFunction,
        #[source]
        source: regex::Error,
    },
}

/// One `Function:args` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub function: RuleFunction,
    pub args: Vec<String>,
}

/// Path rewrites recorded by a rule, applied in order: replace, strip, add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRewrite {
    /// Prefixes to strip, longest first.
    pub strip_prefixes: Vec<String>,
    pub add_prefix: Option<String>,
    pub replace_path: Option<String>,
}

impl PathRewrite {
    pub fn is_empty(&self) -> bool {
        self.strip_prefixes.is_empty() && self.add_prefix.is_none() && self.replace_path.is_none()
    }
}

/// A parsed and compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub expression: String,
    pub clauses: Vec<Clause>,
    pub matcher: RuleMatcher,
    pub rewrite: PathRewrite,
}

impl Rule {
    /// Priority used when a router does not set one: longer rules win.
    pub fn default_priority(&self) -> i64 {
        self.expression.len() as i64
    }
}

/// Split an expression into clauses without interpreting arguments.
pub fn parse_clauses(expression: &str) -> Result<Vec<Clause>, RuleError> {
    let mut clauses = Vec::new();

    for raw in expression.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        let (name, args) = raw.split_once(':').unwrap_or((raw, ""));
        let function = RuleFunction::from_name(name.trim())
            .ok_or_else(|| RuleError::UnknownFunction(name.trim().to_string()))?;
        let args: Vec<String> = args
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        if args.is_empty() {
            return Err(RuleError::MissingArguments(function));
        }
        clauses.push(Clause { function, args });
    }

    if clauses.is_empty() {
        return Err(RuleError::Empty);
    }
    Ok(clauses)
}

/// Parse and compile a rule expression.
pub fn parse(expression: &str) -> Result<Rule, RuleError> {
    let clauses = parse_clauses(expression)?;
    let mut conditions = Vec::new();
    let mut rewrite = PathRewrite::default();

    for clause in &clauses {
        let function = clause.function;
        match function {
            RuleFunction::Host => conditions.push(Condition::Host(
                clause.args.iter().map(|h| canonical_host(h)).collect(),
            )),
            RuleFunction::HostRegexp => {
                let regexes = clause
                    .args
                    .iter()
                    .map(|template| host_template_regex(template))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| RuleError::InvalidRegex { function, source })?;
                conditions.push(Condition::HostRegexp(regexes));
            }
            RuleFunction::Path => conditions.push(Condition::Path(clause.args.clone())),
            RuleFunction::PathPrefix => conditions.push(Condition::PathPrefix(clause.args.clone())),
            RuleFunction::PathStrip => {
                conditions.push(Condition::Path(clause.args.clone()));
                rewrite.strip_prefixes.extend(clause.args.iter().cloned());
            }
            RuleFunction::PathPrefixStrip => {
                conditions.push(Condition::PathPrefix(clause.args.clone()));
                rewrite.strip_prefixes.extend(clause.args.iter().cloned());
            }
            RuleFunction::Headers | RuleFunction::HeadersRegexp => {
                if clause.args.len() % 2 != 0 {
                    return Err(RuleError::InvalidArguments {
                        function,
                        reason: "expects name,value pairs".to_string(),
                    });
                }
                for pair in clause.args.chunks(2) {
                    let name = HeaderName::try_from(pair[0].as_str()).map_err(|e| {
                        RuleError::InvalidArguments {
                            function,
                            reason: e.to_string(),
                        }
                    })?;
                    if function == RuleFunction::Headers {
                        conditions.push(Condition::Header {
                            name,
                            value: pair[1].clone(),
                        });
                    } else {
                        let regex = Regex::new(&pair[1])
                            .map_err(|source| RuleError::InvalidRegex { function, source })?;
                        conditions.push(Condition::HeaderRegexp { name, regex });
                    }
                }
            }
            RuleFunction::Method => {
                let methods = clause
                    .args
                    .iter()
                    .map(|m| {
                        Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|e| {
                            RuleError::InvalidArguments {
                                function,
                                reason: e.to_string(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                conditions.push(Condition::Method(methods));
            }
            RuleFunction::AddPrefix => rewrite.add_prefix = Some(single_arg(clause)?),
            RuleFunction::ReplacePath => rewrite.replace_path = Some(single_arg(clause)?),
        }
    }

    // Longest first so "/api/v1" strips before "/api"; stable for equal lengths.
    rewrite.strip_prefixes.sort_by(|a, b| b.len().cmp(&a.len()));
    dedup_in_order(&mut rewrite.strip_prefixes);

    Ok(Rule {
        expression: expression.to_string(),
        clauses,
        matcher: RuleMatcher::new(conditions),
        rewrite,
    })
}

/// Host names referenced by `Host` clauses, canonicalized.
pub fn parse_domains(expression: &str) -> Result<Vec<String>, RuleError> {
    let mut domains: Vec<String> = parse_clauses(expression)?
        .into_iter()
        .filter(|clause| clause.function == RuleFunction::Host)
        .flat_map(|clause| clause.args)
        .map(|host| canonical_host(&host))
        .collect();
    dedup_in_order(&mut domains);
    Ok(domains)
}

/// Drop repeated values, keeping the first occurrence of each.
fn dedup_in_order(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain(|value| seen.insert(value.clone()));
}

fn single_arg(clause: &Clause) -> Result<String, RuleError> {
    match clause.args.as_slice() {
        [path] => Ok(path.clone()),
        _ => Err(RuleError::InvalidArguments {
            function: clause.function,
            reason: "expects exactly one path".to_string(),
        }),
    }
}

/// Compile `{name}` / `{name:pattern}` host templates into an anchored,
/// case-insensitive regex. Literal text is escaped.
fn host_template_regex(template: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("(?i)^");
    let mut rest = template.trim_end_matches('.');

    while let Some(open) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..open]));

        let mut depth = 0usize;
        let mut close = None;
        for (i, c) in rest[open..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = close else {
            // Unbalanced braces are left to the regex compiler to report.
            pattern.push_str(&rest[open..]);
            rest = "";
            break;
        };

        let variable = &rest[open + 1..close];
        let group = match variable.split_once(':') {
            Some((_, re)) => format!("(?:{re})"),
            None => "[^.]+".to_string(),
        };
        pattern.push_str(&group);
        rest = &rest[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    Regex::new(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clauses_case_insensitively() {
        let clauses = parse_clauses("host:example.com ; PATHPREFIX:/api,/v2").unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].function, RuleFunction::Host);
        assert_eq!(clauses[1].function, RuleFunction::PathPrefix);
        assert_eq!(clauses[1].args, vec!["/api", "/v2"]);
    }

    #[test]
    fn rejects_invalid_expressions() {
        assert!(matches!(parse(""), Err(RuleError::Empty)));
        assert!(matches!(parse(" ; "), Err(RuleError::Empty)));
        assert!(matches!(parse("Hots:example.com"), Err(RuleError::UnknownFunction(f)) if f == "Hots"));
        assert!(matches!(
            parse("Host:"),
            Err(RuleError::MissingArguments(RuleFunction::Host))
        ));
        assert!(matches!(
            parse("PathPrefix"),
            Err(RuleError::MissingArguments(RuleFunction::PathPrefix))
        ));
        assert!(matches!(
            parse("Headers:X-Only-Name"),
            Err(RuleError::InvalidArguments { .. })
        ));
        assert!(matches!(
            parse("HeadersRegexp:X-Version,(unclosed"),
            Err(RuleError::InvalidRegex { .. })
        ));
        assert!(matches!(
            parse("AddPrefix:/a,/b"),
            Err(RuleError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn records_strip_prefixes_longest_first() {
        let rule = parse("PathPrefixStrip:/api,/api/v1;PathStrip:/a").unwrap();
        assert_eq!(rule.rewrite.strip_prefixes, vec!["/api/v1", "/api", "/a"]);
        assert!(rule.rewrite.add_prefix.is_none());
    }

    #[test]
    fn repeated_strip_prefixes_are_recorded_once() {
        let rule = parse("PathPrefixStrip:/api,/b,/api;PathStrip:/b").unwrap();
        assert_eq!(rule.rewrite.strip_prefixes, vec!["/api", "/b"]);
    }

    #[test]
    fn records_add_and_replace() {
        let rule = parse("Host:a.com;AddPrefix:/v2;ReplacePath:/health").unwrap();
        assert_eq!(rule.rewrite.add_prefix.as_deref(), Some("/v2"));
        assert_eq!(rule.rewrite.replace_path.as_deref(), Some("/health"));
    }

    #[test]
    fn default_priority_is_rule_length() {
        let short = parse("PathPrefix:/foo").unwrap();
        let long = parse("PathPrefix:/foobar").unwrap();
        assert!(long.default_priority() > short.default_priority());
        assert_eq!(short.default_priority(), "PathPrefix:/foo".len() as i64);
    }

    #[test]
    fn extracts_domains() {
        let domains = parse_domains("Host:Example.COM.,www.example.com;PathPrefix:/api").unwrap();
        assert_eq!(domains, vec!["example.com", "www.example.com"]);
        assert!(parse_domains("").is_err());

        let repeated = parse_domains("Host:a.com,b.com,A.com;Host:b.com").unwrap();
        assert_eq!(repeated, vec!["a.com", "b.com"]);
    }

    #[test]
    fn host_templates_compile_to_anchored_regexes() {
        let re = host_template_regex("{subdomain:[a-z]+}.example.com").unwrap();
        assert!(re.is_match("api.example.com"));
        assert!(re.is_match("API.EXAMPLE.COM"));
        assert!(!re.is_match("api.example.com.evil.org"));
        assert!(!re.is_match("a1.example.com"));

        let any = host_template_regex("{name}.local").unwrap();
        assert!(any.is_match("printer.local"));
        assert!(!any.is_match("a.b.local"));

        let nested = host_template_regex("{id:[0-9]{3}}.svc").unwrap();
        assert!(nested.is_match("123.svc"));
        assert!(!nested.is_match("12.svc"));
    }
}
