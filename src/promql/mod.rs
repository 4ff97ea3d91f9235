//! PromQL expression parsing.
//!
//! Implements the subset of PromQL needed to inspect queries before they
//! are forwarded to the query backend: vector selectors with label
//! matchers, range suffixes, offsets, function calls, aggregations with
//! grouping, and binary expressions. The guardrails walk the parsed
//! expression to veto unsafe selectors.

mod guardrails;

pub use guardrails::Guardrails;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromqlError {
    #[error("failed to parse query: {0}")]
    Parse(String),
    #[error("query violates guardrail: {0}")]
    Unsafe(&'static str),
    #[error("unknown guardrail: {0:?}")]
    UnknownGuardrail(String),
}

/// PromQL expression AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `metric_name{label="value"}`
    Selector(VectorSelector),
    /// `expr[5m]`
    Range { expr: Box<Expr>, range: String },
    /// `rate(expr, ...)`
    Call { func: String, args: Vec<Expr> },
    /// `sum by (label) (expr)`
    Aggregate {
        op: String,
        grouping: Option<Grouping>,
        args: Vec<Expr>,
    },
    /// `expr1 + expr2`
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Paren(Box<Expr>),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    /// Absent for bare-brace selectors like `{__name__="up"}`.
    pub name: Option<String>,
    pub matchers: Vec<LabelMatcher>,
    pub offset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    /// `true` for `by`, `false` for `without`.
    pub by: bool,
    pub labels: Vec<String>,
}

impl Expr {
    /// All vector selectors appearing anywhere in the expression.
    pub fn selectors(&self) -> Vec<&VectorSelector> {
        let mut out = Vec::new();
        self.collect_selectors(&mut out);
        out
    }

    fn collect_selectors<'a>(&'a self, out: &mut Vec<&'a VectorSelector>) {
        match self {
            Expr::Selector(selector) => out.push(selector),
            Expr::Range { expr, .. } | Expr::Paren(expr) => expr.collect_selectors(out),
            Expr::Call { args, .. } | Expr::Aggregate { args, .. } => {
                for arg in args {
                    arg.collect_selectors(out);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_selectors(out);
                right.collect_selectors(out);
            }
            Expr::Number(_) | Expr::String(_) => {}
        }
    }
}

const AGGREGATORS: &[&str] = &[
    "sum",
    "min",
    "max",
    "avg",
    "group",
    "stddev",
    "stdvar",
    "count",
    "count_values",
    "bottomk",
    "topk",
    "quantile",
];

/// Parse a PromQL expression.
pub fn parse(input: &str) -> Result<Expr, PromqlError> {
    let mut parser = Parser::new(input);
    let expr = parser.parse_expr()?;
    parser.skip_whitespace();
    if let Some(c) = parser.peek() {
        return Err(parser.unexpected(c));
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    position: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            position: 0,
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, PromqlError> {
        let mut expr = self.parse_primary()?;

        // No operator precedence: the guardrails only need the operand
        // structure, not evaluation order.
        while let Some(op) = self.parse_binary_op() {
            let right = self.parse_primary()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, PromqlError> {
        self.skip_whitespace();

        match self.peek() {
            Some('(') => {
                self.position += 1;
                let inner = self.parse_expr()?;
                self.expect(')')?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Some('{') => {
                let matchers = self.parse_label_matchers()?;
                self.parse_selector_suffix(None, matchers)
            }
            Some('"') | Some('\'') => Ok(Expr::String(self.parse_string()?)),
            Some(c) if c.is_ascii_digit() || c == '.' || c == '-' => self.parse_number(),
            Some(c) if is_ident_start(c) => {
                let name = self.parse_identifier();
                self.parse_ident_led(name)
            }
            Some(c) => Err(self.unexpected(c)),
            None => Err(PromqlError::Parse("unexpected end of query".to_string())),
        }
    }

    /// An identifier opens an aggregation, a function call, or a selector.
    fn parse_ident_led(&mut self, name: String) -> Result<Expr, PromqlError> {
        if AGGREGATORS.contains(&name.as_str()) {
            let mut grouping = self.parse_grouping()?;

            self.skip_whitespace();
            if self.peek() == Some('(') {
                let args = self.parse_call_args()?;
                if grouping.is_none() {
                    grouping = self.parse_grouping()?;
                }
                return Ok(Expr::Aggregate {
                    op: name,
                    grouping,
                    args,
                });
            }

            if grouping.is_some() {
                return Err(PromqlError::Parse(format!(
                    "expected '(' after grouping for {name}"
                )));
            }
            // fall through: an aggregator name used as a metric name
        }

        self.skip_whitespace();
        if self.peek() == Some('(') {
            let args = self.parse_call_args()?;
            return Ok(Expr::Call { func: name, args });
        }

        let matchers = if self.peek() == Some('{') {
            self.parse_label_matchers()?
        } else {
            Vec::new()
        };

        self.parse_selector_suffix(Some(name), matchers)
    }

    /// Range (`[5m]`) and `offset` suffixes following a selector body.
    fn parse_selector_suffix(
        &mut self,
        name: Option<String>,
        matchers: Vec<LabelMatcher>,
    ) -> Result<Expr, PromqlError> {
        self.skip_whitespace();

        let range = if self.peek() == Some('[') {
            self.position += 1;
            let range = self.parse_duration_token()?;
            self.expect(']')?;
            Some(range)
        } else {
            None
        };

        let offset = if self.try_keyword("offset") {
            self.skip_whitespace();
            Some(self.parse_duration_token()?)
        } else {
            None
        };

        let selector = Expr::Selector(VectorSelector {
            name,
            matchers,
            offset,
        });

        match range {
            Some(range) => Ok(Expr::Range {
                expr: Box::new(selector),
                range,
            }),
            None => Ok(selector),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, PromqlError> {
        self.expect('(')?;
        let mut args = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(')') => {
                    self.position += 1;
                    break;
                }
                None => return Err(PromqlError::Parse("unclosed '(' in query".to_string())),
                _ => {
                    args.push(self.parse_expr()?);
                    self.skip_whitespace();
                    if self.peek() == Some(',') {
                        self.position += 1;
                    }
                }
            }
        }

        Ok(args)
    }

    fn parse_grouping(&mut self) -> Result<Option<Grouping>, PromqlError> {
        let by = if self.try_keyword("by") {
            true
        } else if self.try_keyword("without") {
            false
        } else {
            return Ok(None);
        };

        self.expect('(')?;
        let mut labels = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(')') => {
                    self.position += 1;
                    break;
                }
                Some(c) if is_ident_start(c) => {
                    labels.push(self.parse_identifier());
                    self.skip_whitespace();
                    if self.peek() == Some(',') {
                        self.position += 1;
                    }
                }
                Some(c) => return Err(self.unexpected(c)),
                None => return Err(PromqlError::Parse("unclosed grouping".to_string())),
            }
        }

        Ok(Some(Grouping { by, labels }))
    }

    fn parse_label_matchers(&mut self) -> Result<Vec<LabelMatcher>, PromqlError> {
        self.expect('{')?;
        let mut matchers = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.position += 1;
                    break;
                }
                Some(c) if is_ident_start(c) => {
                    let name = self.parse_identifier();
                    self.skip_whitespace();

                    let op = if self.try_consume("=~") {
                        MatchOp::Regex
                    } else if self.try_consume("!~") {
                        MatchOp::NotRegex
                    } else if self.try_consume("!=") {
                        MatchOp::NotEqual
                    } else if self.try_consume("=") {
                        MatchOp::Equal
                    } else {
                        return Err(PromqlError::Parse(format!(
                            "expected matcher operator after label {name:?}"
                        )));
                    };

                    self.skip_whitespace();
                    let value = self.parse_string()?;
                    matchers.push(LabelMatcher { name, op, value });

                    self.skip_whitespace();
                    if self.peek() == Some(',') {
                        self.position += 1;
                    }
                }
                Some(c) => return Err(self.unexpected(c)),
                None => {
                    return Err(PromqlError::Parse("unclosed '{' in query".to_string()));
                }
            }
        }

        Ok(matchers)
    }

    fn parse_string(&mut self) -> Result<String, PromqlError> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(PromqlError::Parse("expected string literal".to_string())),
        };
        self.position += 1;

        let mut value = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.position += 1;
                    return Ok(value);
                }
                Some('\\') => {
                    self.position += 1;
                    match self.peek() {
                        Some(escaped) => {
                            value.push(escaped);
                            self.position += 1;
                        }
                        None => {
                            return Err(PromqlError::Parse(
                                "unterminated string literal".to_string(),
                            ))
                        }
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.position += 1;
                }
                None => {
                    return Err(PromqlError::Parse(
                        "unterminated string literal".to_string(),
                    ))
                }
            }
        }
    }

    fn parse_number(&mut self) -> Result<Expr, PromqlError> {
        let start = self.position;

        if self.peek() == Some('-') {
            self.position += 1;
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                self.position += 1;
            } else {
                break;
            }
        }

        let literal: String = self.chars[start..self.position].iter().collect();
        literal
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| PromqlError::Parse(format!("invalid number literal: {literal:?}")))
    }

    /// Duration token like `5m` or `1h30m`, validated later by the backend.
    fn parse_duration_token(&mut self) -> Result<String, PromqlError> {
        let start = self.position;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() {
                self.position += 1;
            } else {
                break;
            }
        }

        if self.position == start {
            return Err(PromqlError::Parse("expected duration".to_string()));
        }
        Ok(self.chars[start..self.position].iter().collect())
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.position;
        while let Some(c) = self.peek() {
            if is_ident_char(c) {
                self.position += 1;
            } else {
                break;
            }
        }
        self.chars[start..self.position].iter().collect()
    }

    fn parse_binary_op(&mut self) -> Option<String> {
        let saved = self.position;
        self.skip_whitespace();

        for op in ["==", "!=", "<=", ">="] {
            if self.try_consume(op) {
                return Some(op.to_string());
            }
        }
        for op in ["+", "-", "*", "/", "%", "^", "<", ">"] {
            if self.try_consume(op) {
                return Some(op.to_string());
            }
        }
        for op in ["and", "or", "unless"] {
            if self.try_keyword(op) {
                return Some(op.to_string());
            }
        }

        self.position = saved;
        None
    }

    /// Consume `keyword` if it appears next as a whole identifier.
    fn try_keyword(&mut self, keyword: &str) -> bool {
        let saved = self.position;
        self.skip_whitespace();

        if !is_ident_start(self.peek().unwrap_or(' ')) {
            self.position = saved;
            return false;
        }

        let ident = self.parse_identifier();
        if ident == keyword {
            true
        } else {
            self.position = saved;
            false
        }
    }

    fn try_consume(&mut self, token: &str) -> bool {
        let end = self.position + token.chars().count();
        if end > self.chars.len() {
            return false;
        }
        let ahead: String = self.chars[self.position..end].iter().collect();
        if ahead == token {
            self.position = end;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), PromqlError> {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.position += 1;
            Ok(())
        } else {
            Err(PromqlError::Parse(format!(
                "expected {expected:?} at position {}",
                self.position
            )))
        }
    }

    fn unexpected(&self, c: char) -> PromqlError {
        PromqlError::Parse(format!(
            "unexpected character {c:?} at position {}",
            self.position
        ))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.position += 1;
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_metric() {
        let expr = parse("http_requests_total").expect("parses");
        let selectors = expr.selectors();
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].name.as_deref(), Some("http_requests_total"));
        assert!(selectors[0].matchers.is_empty());
    }

    #[test]
    fn parses_selector_with_matchers() {
        let expr = parse(r#"http_requests_total{job="api", code!="500", path=~"/v1/.*"}"#)
            .expect("parses");
        let selectors = expr.selectors();
        assert_eq!(selectors[0].matchers.len(), 3);
        assert_eq!(selectors[0].matchers[0].op, MatchOp::Equal);
        assert_eq!(selectors[0].matchers[1].op, MatchOp::NotEqual);
        assert_eq!(selectors[0].matchers[2].op, MatchOp::Regex);
        assert_eq!(selectors[0].matchers[2].value, "/v1/.*");
    }

    #[test]
    fn parses_name_only_braces() {
        let expr = parse(r#"{__name__="up"}"#).expect("parses");
        let selectors = expr.selectors();
        assert_eq!(selectors[0].name, None);
        assert_eq!(selectors[0].matchers[0].name, "__name__");
    }

    #[test]
    fn parses_rate_over_range() {
        let expr = parse(r#"rate(http_requests_total{job="api"}[5m])"#).expect("parses");
        match &expr {
            Expr::Call { func, args } => {
                assert_eq!(func, "rate");
                assert!(matches!(args[0], Expr::Range { .. }));
            }
            other => panic!("expected call, got {other:?}"),
        }
        assert_eq!(expr.selectors().len(), 1);
    }

    #[test]
    fn parses_aggregation_with_grouping() {
        for query in [
            r#"sum by (job) (rate(http_requests_total{job="api"}[5m]))"#,
            r#"sum(rate(http_requests_total{job="api"}[5m])) by (job)"#,
        ] {
            let expr = parse(query).expect("parses");
            match &expr {
                Expr::Aggregate { op, grouping, .. } => {
                    assert_eq!(op, "sum");
                    let grouping = grouping.as_ref().expect("grouping present");
                    assert!(grouping.by);
                    assert_eq!(grouping.labels, vec!["job".to_string()]);
                }
                other => panic!("expected aggregation, got {other:?}"),
            }
        }
    }

    #[test]
    fn parses_binary_expressions() {
        let expr = parse(r#"a{x="1"} / b{x="1"} * 100"#).expect("parses");
        assert_eq!(expr.selectors().len(), 2);
    }

    #[test]
    fn parses_offset() {
        let expr = parse(r#"http_requests_total{job="api"} offset 5m"#).expect("parses");
        assert_eq!(expr.selectors()[0].offset.as_deref(), Some("5m"));
    }

    #[test]
    fn parses_histogram_quantile() {
        let expr = parse(r#"histogram_quantile(0.99, rate(latency_bucket{job="api"}[5m]))"#)
            .expect("parses");
        assert_eq!(expr.selectors().len(), 1);
    }

    #[test]
    fn rejects_malformed_queries() {
        for query in [
            "",
            "up{",
            r#"up{job="api"#,
            "rate(up[5m]",
            "sum by (job",
            "up}",
            r#"up{job=}"#,
        ] {
            assert!(
                matches!(parse(query), Err(PromqlError::Parse(_))),
                "expected parse failure for {query:?}"
            );
        }
    }
}
