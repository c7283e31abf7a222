//! Condition expressions — a fixed tokenizer/parser/evaluator.
//!
//! Conditional and loop-end handlers evaluate expressions such as
//! `{{fetch.status}} == 200 && inputs.mode != 'dry'` against the snapshot.
//! The grammar supports literals, snapshot paths (bare or `{{…}}`-wrapped),
//! the comparisons `== != > >= < <=`, `contains` / `startsWith` /
//! `endsWith`, boolean `&&`/`and`, `||`/`or`, `!`/`not`, and parentheses.
//! Nothing here ever executes host code.

use serde_json::Value;
use thiserror::Error;

use crate::resolver::resolve_path;
use crate::traits::ContextSnapshot;

/// Parse or evaluation failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unterminated '{{{{' placeholder")]
    UnterminatedPlaceholder,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("expression ended unexpectedly")]
    UnexpectedEnd,
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Binary operators, in the order the parser binds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Word(String),
    Placeholder(String),
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Bang,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Bang);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '{' if chars.get(i + 1) == Some(&'{') => {
                let mut j = i + 2;
                while j + 1 < chars.len() && !(chars[j] == '}' && chars[j + 1] == '}') {
                    j += 1;
                }
                if j + 1 >= chars.len() {
                    return Err(ExprError::UnterminatedPlaceholder);
                }
                let path: String = chars[i + 2..j].iter().collect();
                tokens.push(Token::Placeholder(path.trim().to_string()));
                i = j + 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut j = i + 1;
                let mut s = String::new();
                loop {
                    match chars.get(j) {
                        None => return Err(ExprError::UnterminatedString),
                        Some(&ch) if ch == quote => break,
                        Some(&ch) => {
                            s.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, i)) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(n));
                i = j;
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut j = i + 1;
                while j < chars.len()
                    && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '.')
                {
                    j += 1;
                }
                let word: String = chars[i..j].iter().collect();
                tokens.push(Token::Word(word));
                i = j;
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Parser (recursive descent: or → and → comparison → unary → primary)
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        loop {
            match self.peek() {
                Some(Token::Or) => {
                    self.pos += 1;
                }
                Some(Token::Word(w)) if w == "or" => {
                    self.pos += 1;
                }
                _ => break,
            }
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_comparison()?;
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                }
                Some(Token::Word(w)) if w == "and" => {
                    self.pos += 1;
                }
                _ => break,
            }
            let right = self.parse_comparison()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Word(w)) if w == "contains" => BinaryOp::Contains,
            Some(Token::Word(w)) if w == "startsWith" => BinaryOp::StartsWith,
            Some(Token::Word(w)) if w == "endsWith" => BinaryOp::EndsWith,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_unary()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Word(w)) if w == "not" => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            None => Err(ExprError::UnexpectedEnd),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(t) => Err(ExprError::UnexpectedToken(format!("{t:?}"))),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Placeholder(path)) => Ok(Expr::Path(path)),
            Some(Token::Word(w)) => match w.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => Ok(Expr::Path(w)),
            },
            Some(t) => Err(ExprError::UnexpectedToken(format!("{t:?}"))),
        }
    }
}

/// Parse an expression string into its AST.
///
/// # Errors
/// Any lexical or syntactic problem; evaluation itself cannot fail.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::UnexpectedToken(format!(
            "{:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a parsed expression against a snapshot. Missing paths evaluate
/// to `null`.
pub fn evaluate(expr: &Expr, snapshot: &ContextSnapshot) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Path(path) => resolve_path(snapshot, path).unwrap_or(Value::Null),
        Expr::Not(inner) => Value::Bool(!truthy(&evaluate(inner, snapshot))),
        Expr::Binary(BinaryOp::And, left, right) => {
            Value::Bool(truthy(&evaluate(left, snapshot)) && truthy(&evaluate(right, snapshot)))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            Value::Bool(truthy(&evaluate(left, snapshot)) || truthy(&evaluate(right, snapshot)))
        }
        Expr::Binary(op, left, right) => {
            let l = evaluate(left, snapshot);
            let r = evaluate(right, snapshot);
            Value::Bool(apply(*op, &l, &r))
        }
    }
}

fn apply(op: BinaryOp, l: &Value, r: &Value) -> bool {
    match op {
        // And/Or short-circuit in `evaluate` and never reach here.
        BinaryOp::And | BinaryOp::Or => unreachable!("handled in evaluate"),
        BinaryOp::Eq => loose_eq(l, r),
        BinaryOp::Ne => !loose_eq(l, r),
        BinaryOp::Gt => ordering(l, r).map(|o| o.is_gt()).unwrap_or(false),
        BinaryOp::Ge => ordering(l, r).map(|o| o.is_ge()).unwrap_or(false),
        BinaryOp::Lt => ordering(l, r).map(|o| o.is_lt()).unwrap_or(false),
        BinaryOp::Le => ordering(l, r).map(|o| o.is_le()).unwrap_or(false),
        BinaryOp::Contains => contains(l, r),
        BinaryOp::StartsWith => match (l.as_str(), r.as_str()) {
            (Some(a), Some(b)) => a.starts_with(b),
            _ => false,
        },
        BinaryOp::EndsWith => match (l.as_str(), r.as_str()) {
            (Some(a), Some(b)) => a.ends_with(b),
            _ => false,
        },
    }
}

/// JSON truthiness: null, false, 0, "" and empty collections are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn ordering(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => l.as_f64().zip(r.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
    }
}

fn contains(l: &Value, r: &Value) -> bool {
    match l {
        Value::String(s) => r.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, r)),
        Value::Object(map) => r.as_str().map(|key| map.contains_key(key)).unwrap_or(false),
        _ => false,
    }
}

/// Parse and evaluate `input`, coercing the result to a boolean.
///
/// # Errors
/// Propagates parse failures; see [`parse`].
pub fn evaluate_condition(input: &str, snapshot: &ContextSnapshot) -> Result<bool, ExprError> {
    let expr = parse(input)?;
    Ok(truthy(&evaluate(&expr, snapshot)))
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> ContextSnapshot {
        let mut snap = ContextSnapshot::default();
        snap.inputs = json!({ "x": 5, "mode": "live", "tags": ["a", "b"] })
            .as_object()
            .unwrap()
            .clone();
        snap.node_outputs.insert(
            "fetch".into(),
            json!({ "status": 200, "body": "hello world" })
                .as_object()
                .unwrap()
                .clone(),
        );
        snap
    }

    fn eval(input: &str) -> bool {
        evaluate_condition(input, &snapshot()).expect("expression should parse")
    }

    #[test]
    fn comparisons() {
        assert!(eval("{{fetch.status}} == 200"));
        assert!(eval("inputs.x >= 5"));
        assert!(eval("inputs.x < 6"));
        assert!(!eval("inputs.x != 5"));
        assert!(eval("'apple' < 'banana'"));
    }

    #[test]
    fn boolean_connectives_and_not() {
        assert!(eval("inputs.x == 5 && inputs.mode == 'live'"));
        assert!(eval("inputs.x == 9 || inputs.mode == 'live'"));
        assert!(eval("not (inputs.x == 9)"));
        assert!(eval("!false"));
        assert!(eval("inputs.x == 5 and inputs.mode == 'live'"));
        assert!(eval("inputs.x == 9 or true"));
    }

    #[test]
    fn string_and_collection_operators() {
        assert!(eval("{{fetch.body}} contains 'world'"));
        assert!(eval("inputs.tags contains 'a'"));
        assert!(!eval("inputs.tags contains 'z'"));
        assert!(eval("{{fetch.body}} startsWith 'hello'"));
        assert!(eval("{{fetch.body}} endsWith 'world'"));
    }

    #[test]
    fn missing_paths_are_null() {
        assert!(eval("{{ghost.value}} == null"));
        assert!(!eval("{{ghost.value}}"));
    }

    #[test]
    fn bare_truthiness() {
        assert!(eval("inputs.mode"));
        assert!(!eval("''"));
        assert!(!eval("0"));
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(parse("inputs.x ==").is_err());
        assert!(parse("(inputs.x == 1").is_err());
        assert!(parse("'unterminated").is_err());
        assert!(parse("inputs.x @ 1").is_err());
    }
}
