//! Scalar filter expressions over collection fields.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr    := and_expr ( ("or" | "||") and_expr )*
//! and_expr:= primary ( ("and" | "&&") primary )*
//! primary := "(" expr ")"
//!          | field ("==" | "!=" | "<" | "<=" | ">" | ">=") literal
//!          | field "in" "[" literal ("," literal)* "]"
//! ```
//!
//! Fields resolve against the schema at parse time, so an unknown field,
//! a vector field, or a literal of the wrong type fails before any row is
//! touched. Numeric comparisons against NaN never match, `!=` included.

use crate::schema::{CollectionSchema, FieldType, Value};
use crate::segment::RowCursor;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("unknown field `{0}` in filter expression")]
    UnknownField(String),
    #[error("field `{0}` is a vector and cannot be filtered")]
    VectorField(String),
    #[error("filter type error: {0}")]
    Type(String),
    #[error("filter parse error: {0}")]
    Parse(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
enum Literal {
    Str(String),
    Number(f64),
}

#[derive(Clone, Debug)]
enum Expr {
    Cmp {
        field: usize,
        op: CmpOp,
        literal: Literal,
    },
    In {
        field: usize,
        set: Vec<Literal>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A parsed, schema-checked filter expression.
#[derive(Clone, Debug)]
pub struct Filter {
    expr: Expr,
}

impl Filter {
    pub fn parse(input: &str, schema: &CollectionSchema) -> Result<Self, FilterError> {
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            schema,
        };
        let expr = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(FilterError::Parse(format!(
                "unexpected trailing input at token {}",
                parser.pos
            )));
        }
        Ok(Self { expr })
    }

    pub fn matches(&self, row: &RowCursor<'_>) -> bool {
        eval(&self.expr, row)
    }
}

fn eval(expr: &Expr, row: &RowCursor<'_>) -> bool {
    match expr {
        Expr::And(a, b) => eval(a, row) && eval(b, row),
        Expr::Or(a, b) => eval(a, row) || eval(b, row),
        Expr::Cmp { field, op, literal } => match (row.value(*field), literal) {
            (Value::Double(d), Literal::Number(n)) => {
                if d.is_nan() || n.is_nan() {
                    return false;
                }
                match op {
                    CmpOp::Eq => d == *n,
                    CmpOp::Ne => d != *n,
                    CmpOp::Lt => d < *n,
                    CmpOp::Le => d <= *n,
                    CmpOp::Gt => d > *n,
                    CmpOp::Ge => d >= *n,
                }
            }
            (Value::Str(s), Literal::Str(lit)) => match op {
                CmpOp::Eq => s == *lit,
                CmpOp::Ne => s != *lit,
                CmpOp::Lt => s.as_str() < lit.as_str(),
                CmpOp::Le => s.as_str() <= lit.as_str(),
                CmpOp::Gt => s.as_str() > lit.as_str(),
                CmpOp::Ge => s.as_str() >= lit.as_str(),
            },
            _ => false,
        },
        Expr::In { field, set } => match row.value(*field) {
            Value::Str(s) => set.iter().any(|lit| matches!(lit, Literal::Str(v) if *v == s)),
            Value::Double(d) => {
                !d.is_nan()
                    && set
                        .iter()
                        .any(|lit| matches!(lit, Literal::Number(n) if *n == d))
            }
            _ => false,
        },
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Op(CmpOp),
    And,
    Or,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>, FilterError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err(FilterError::Parse("single `=`, expected `==`".into()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err(FilterError::Parse("single `!`, expected `!=`".into()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(FilterError::Parse("single `&`, expected `&&`".into()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(FilterError::Parse("single `|`, expected `||`".into()));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(FilterError::Parse("unterminated string literal".into()))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number: f64 = text
                    .parse()
                    .map_err(|_| FilterError::Parse(format!("bad number literal `{text}`")))?;
                tokens.push(Token::Number(number));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            _ => {
                return Err(FilterError::Parse(format!("unexpected character `{c}`")));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    schema: &'a CollectionSchema,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or_expr(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.and_expr()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.primary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.primary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, FilterError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(FilterError::Parse("expected `)`".into())),
                }
            }
            Some(Token::Ident(name)) => {
                let (field, field_type) = self.resolve_field(&name)?;
                match self.next() {
                    Some(Token::Op(op)) => {
                        let literal = self.literal(&name, &field_type)?;
                        Ok(Expr::Cmp { field, op, literal })
                    }
                    Some(Token::In) => {
                        if !matches!(self.next(), Some(Token::LBracket)) {
                            return Err(FilterError::Parse("expected `[` after `in`".into()));
                        }
                        let mut set = Vec::new();
                        loop {
                            set.push(self.literal(&name, &field_type)?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RBracket) => break,
                                _ => {
                                    return Err(FilterError::Parse(
                                        "expected `,` or `]` in list".into(),
                                    ))
                                }
                            }
                        }
                        Ok(Expr::In { field, set })
                    }
                    _ => Err(FilterError::Parse(format!(
                        "expected comparison or `in` after field `{name}`"
                    ))),
                }
            }
            other => Err(FilterError::Parse(format!(
                "expected field or `(`, got {other:?}"
            ))),
        }
    }

    fn resolve_field(&self, name: &str) -> Result<(usize, FieldType), FilterError> {
        let (idx, field) = self
            .schema
            .field(name)
            .ok_or_else(|| FilterError::UnknownField(name.to_string()))?;
        if field.field_type.is_vector() {
            return Err(FilterError::VectorField(name.to_string()));
        }
        Ok((idx, field.field_type.clone()))
    }

    fn literal(&mut self, field: &str, field_type: &FieldType) -> Result<Literal, FilterError> {
        match (self.next(), field_type) {
            (Some(Token::Str(s)), FieldType::VarChar { .. }) => Ok(Literal::Str(s)),
            (Some(Token::Number(n)), FieldType::Double) => Ok(Literal::Number(n)),
            (Some(Token::Str(_)), FieldType::Double) => Err(FilterError::Type(format!(
                "field `{field}` is a double, got a string literal"
            ))),
            (Some(Token::Number(_)), FieldType::VarChar { .. }) => Err(FilterError::Type(
                format!("field `{field}` is a varchar, got a number literal"),
            )),
            _ => Err(FilterError::Parse(format!(
                "expected literal for field `{field}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, FieldType};
    use crate::segment::{persist::ConsistencyLevel, SegmentStore};

    fn demo_schema() -> CollectionSchema {
        CollectionSchema::new(
            vec![
                FieldSchema::new("pk", FieldType::VarChar { max_length: 100 }).primary(),
                FieldSchema::new("random", FieldType::Double),
                FieldSchema::new("embeddings", FieldType::FloatVector { dim: 2 }),
            ],
            "demo",
        )
        .unwrap()
    }

    fn store_with(rows: &[(&str, f64)]) -> SegmentStore {
        let store = SegmentStore::create(
            "demo",
            demo_schema(),
            ConsistencyLevel::Strong,
            1024,
            None,
        )
        .unwrap();
        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|(pk, random)| {
                vec![
                    Value::Str(pk.to_string()),
                    Value::Double(*random),
                    Value::Vector(vec![0.0, 0.0]),
                ]
            })
            .collect();
        store.insert(rows).unwrap();
        store
    }

    fn matching_pks(store: &SegmentStore, expr: &str) -> Vec<String> {
        let filter = Filter::parse(expr, store.schema()).unwrap();
        let snap = store.snapshot(store.current_seq());
        snap.rows()
            .filter(|row| filter.matches(row))
            .map(|row| row.pk().to_string())
            .collect()
    }

    #[test]
    fn double_comparison() {
        let store = store_with(&[("a", 0.25), ("b", 0.75), ("c", 0.5)]);
        assert_eq!(matching_pks(&store, "random > 0.5"), vec!["b"]);
        assert_eq!(matching_pks(&store, "random >= 0.5"), vec!["b", "c"]);
        assert_eq!(matching_pks(&store, "random != 0.5"), vec!["a", "b"]);
    }

    #[test]
    fn pk_in_list() {
        let store = store_with(&[("0", 0.1), ("1", 0.2), ("2", 0.3)]);
        assert_eq!(
            matching_pks(&store, "pk in [\"0\", \"2\"]"),
            vec!["0", "2"]
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let store = store_with(&[("a", 0.1), ("b", 0.6), ("c", 0.9)]);
        // Parsed as (random < 0.2) or ((random > 0.5) and (random < 0.8)).
        assert_eq!(
            matching_pks(&store, "random < 0.2 or random > 0.5 and random < 0.8"),
            vec!["a", "b"]
        );
        // Parens override.
        assert_eq!(
            matching_pks(&store, "(random < 0.2 or random > 0.5) and random < 0.8"),
            vec!["a", "b"]
        );
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        let store = store_with(&[("apple", 0.0), ("banana", 0.0)]);
        assert_eq!(matching_pks(&store, "pk < \"b\""), vec!["apple"]);
    }

    #[test]
    fn nan_never_matches() {
        let store = store_with(&[("a", f64::NAN), ("b", 1.0)]);
        assert_eq!(matching_pks(&store, "random > 0.0"), vec!["b"]);
        assert_eq!(matching_pks(&store, "random != 0.0"), vec!["b"]);
        assert_eq!(matching_pks(&store, "random in [1.0]"), vec!["b"]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let schema = demo_schema();
        assert!(matches!(
            Filter::parse("missing > 1.0", &schema),
            Err(FilterError::UnknownField(name)) if name == "missing"
        ));
    }

    #[test]
    fn vector_field_is_rejected() {
        let schema = demo_schema();
        assert!(matches!(
            Filter::parse("embeddings > 1.0", &schema),
            Err(FilterError::VectorField(_))
        ));
    }

    #[test]
    fn literal_type_must_match_field() {
        let schema = demo_schema();
        assert!(matches!(
            Filter::parse("random > \"0.5\"", &schema),
            Err(FilterError::Type(_))
        ));
        assert!(matches!(
            Filter::parse("pk == 3", &schema),
            Err(FilterError::Type(_))
        ));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let schema = demo_schema();
        assert!(matches!(
            Filter::parse("random > 0.5 random", &schema),
            Err(FilterError::Parse(_))
        ));
        assert!(matches!(
            Filter::parse("", &schema),
            Err(FilterError::Parse(_))
        ));
    }
}
