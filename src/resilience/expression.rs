//! Circuit breaker trip expressions.
//!
//! # Grammar
//! ```text
//! expr       := and ('||' and)*
//! and        := unary ('&&' unary)*
//! unary      := '!' unary | '(' expr ')' | comparison
//! comparison := metric op number
//! metric     := NetworkErrorRatio() | ResponseCodeRatio(a, b, c, d)
//!             | LatencyAtQuantileMS(q)
//! op         := '>' | '>=' | '<' | '<=' | '==' | '!='
//! ```

use std::fmt;

use crate::resilience::rolling::WindowStats;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("expected {expected}, found {found}")]
    Unexpected { expected: &'static str, found: String },

    #[error("unknown metric {0}")]
    UnknownMetric(String),

    #[error("{metric} takes {expected} argument(s), got {got}")]
    Arity {
        metric: &'static str,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
    Op(CompareOp),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "{name}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::Op(op) => write!(f, "{op:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Metric {
    NetworkErrorRatio,
    ResponseCodeRatio(u16, u16, u16, u16),
    LatencyAtQuantileMs(f64),
}

impl Metric {
    fn value(&self, stats: &WindowStats) -> f64 {
        match *self {
            Metric::NetworkErrorRatio => stats.network_error_ratio(),
            Metric::ResponseCodeRatio(a, b, c, d) => stats.response_code_ratio(a, b, c, d),
            Metric::LatencyAtQuantileMs(q) => stats.latency_at_quantile_ms(q),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Or(Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Compare(Metric, CompareOp, f64),
}

impl Node {
    fn eval(&self, stats: &WindowStats) -> bool {
        match self {
            Node::Or(l, r) => l.eval(stats) || r.eval(stats),
            Node::And(l, r) => l.eval(stats) && r.eval(stats),
            Node::Not(inner) => !inner.eval(stats),
            Node::Compare(metric, op, value) => op.apply(metric.value(stats), *value),
        }
    }
}

/// A compiled trip condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError::Unexpected {
                expected: "end of expression",
                found: token.to_string(),
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn evaluate(&self, stats: &WindowStats) -> bool {
        self.root.eval(stats)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let (token, width) = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            '&' if next == Some('&') => (Token::And, 2),
            '|' if next == Some('|') => (Token::Or, 2),
            '!' if next == Some('=') => (Token::Op(CompareOp::Ne), 2),
            '!' => (Token::Not, 1),
            '=' if next == Some('=') => (Token::Op(CompareOp::Eq), 2),
            '>' if next == Some('=') => (Token::Op(CompareOp::Ge), 2),
            '>' => (Token::Op(CompareOp::Gt), 1),
            '<' if next == Some('=') => (Token::Op(CompareOp::Le), 2),
            '<' => (Token::Op(CompareOp::Lt), 1),
            c if c.is_ascii_digit() || c == '.' => {
                let end = scan(&chars, i, |c| c.is_ascii_digit() || c == '.');
                let text: String = chars[i..end].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| ExpressionError::UnexpectedChar(c, i))?;
                (Token::Number(value), end - i)
            }
            c if c.is_ascii_alphabetic() => {
                let end = scan(&chars, i, |c| c.is_ascii_alphanumeric() || c == '_');
                (Token::Ident(chars[i..end].iter().collect()), end - i)
            }
            other => return Err(ExpressionError::UnexpectedChar(other, i)),
        };
        tokens.push(token);
        i += width;
    }
    Ok(tokens)
}

fn scan(chars: &[char], start: usize, accept: impl Fn(char) -> bool) -> usize {
    chars[start..]
        .iter()
        .position(|c| !accept(*c))
        .map_or(chars.len(), |offset| start + offset)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, label: &'static str) -> Result<(), ExpressionError> {
        match self.bump() {
            Some(token) if token == expected => Ok(()),
            other => Err(unexpected(label, other)),
        }
    }

    fn or(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            node = Node::Or(Box::new(node), Box::new(self.and()?));
        }
        Ok(node)
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            node = Node::And(Box::new(node), Box::new(self.unary()?));
        }
        Ok(node)
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let node = self.or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(node)
            }
            _ => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let metric = self.metric()?;
        let op = match self.bump() {
            Some(Token::Op(op)) => op,
            other => return Err(unexpected("comparison operator", other)),
        };
        let value = self.number()?;
        Ok(Node::Compare(metric, op, value))
    }

    fn metric(&mut self) -> Result<Metric, ExpressionError> {
        let name = match self.bump() {
            Some(Token::Ident(name)) => name,
            other => return Err(unexpected("metric", other)),
        };
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.number()?);
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                args.push(self.number()?);
            }
        }
        self.expect(Token::RParen, "')'")?;

        let arity = |metric: &'static str, expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ExpressionError::Arity {
                    metric,
                    expected,
                    got: args.len(),
                })
            }
        };
        match name.as_str() {
            "NetworkErrorRatio" => {
                arity("NetworkErrorRatio", 0)?;
                Ok(Metric::NetworkErrorRatio)
            }
            "ResponseCodeRatio" => {
                arity("ResponseCodeRatio", 4)?;
                let code = |i: usize| args[i].clamp(0.0, f64::from(u16::MAX)) as u16;
                Ok(Metric::ResponseCodeRatio(code(0), code(1), code(2), code(3)))
            }
            "LatencyAtQuantileMS" => {
                arity("LatencyAtQuantileMS", 1)?;
                Ok(Metric::LatencyAtQuantileMs(args[0]))
            }
            _ => Err(ExpressionError::UnknownMetric(name)),
        }
    }

    fn number(&mut self) -> Result<f64, ExpressionError> {
        match self.bump() {
            Some(Token::Number(value)) => Ok(value),
            other => Err(unexpected("number", other)),
        }
    }
}

fn unexpected(expected: &'static str, found: Option<Token>) -> ExpressionError {
    ExpressionError::Unexpected {
        expected,
        found: found.map_or_else(|| "end of expression".to_string(), |t| t.to_string()),
    }
}
