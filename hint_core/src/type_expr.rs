//! Small parser for Python annotation expressions.
//!
//! Predicted annotations arrive as strings in several spellings
//! (`Optional[int]`, `Union[a, b]`, `"Foo"`, `Literal['x']`). They are
//! parsed into a [`TypeExpr`] so they can be normalized to one spelling
//! and so the names they reference can be resolved to imports.

use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Error returned when an annotation cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot parse annotation `{input}`: {reason}")]
pub struct TypeExprError {
    input: String,
    reason: String,
}

/// A parsed annotation expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// A possibly dotted name: `int`, `np.ndarray`.
    Name(String),
    /// A subscripted generic: `Dict[str, int]`.
    Subscript(String, Vec<TypeExpr>),
    /// `A | B | C`.
    Union(Vec<TypeExpr>),
    /// A bracketed list, as in the parameters of `Callable[[int], str]`.
    List(Vec<TypeExpr>),
    /// A string or number literal, kept verbatim.
    Literal(String),
    /// `...`
    Ellipsis,
}

impl TypeExpr {
    /// Parses an annotation expression.
    pub fn parse(input: &str) -> Result<Self, TypeExprError> {
        let error = |reason: String| TypeExprError {
            input: input.to_string(),
            reason,
        };
        let tokens = tokenize(input).map_err(error)?;
        if tokens.is_empty() {
            return Err(error("empty annotation".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_union().map_err(error)?;
        if parser.pos != parser.tokens.len() {
            return Err(error(format!("unexpected {:?}", parser.tokens[parser.pos])));
        }
        Ok(expr)
    }

    /// Rewrites the expression to the spelling used for annotations:
    /// `Optional`/`Union` become `|` unions, `Literal[...]` collapses to the
    /// type of its values and quoted forward references are unquoted.
    pub fn normalized(&self) -> TypeExpr {
        match self {
            TypeExpr::Name(name) => TypeExpr::Name(name.clone()),
            TypeExpr::Literal(raw) => match forward_reference(raw) {
                Some(inner) => inner.normalized(),
                None => self.clone(),
            },
            TypeExpr::Subscript(head, args) => match unqualified(head) {
                "Optional" if args.len() == 1 => {
                    union_of(vec![args[0].normalized(), TypeExpr::Name("None".into())])
                }
                "Union" => union_of(args.iter().map(TypeExpr::normalized).collect()),
                "Literal" => union_of(args.iter().map(literal_base_type).collect()),
                _ => TypeExpr::Subscript(
                    head.clone(),
                    args.iter().map(TypeExpr::normalized).collect(),
                ),
            },
            TypeExpr::Union(items) => union_of(items.iter().map(TypeExpr::normalized).collect()),
            TypeExpr::List(items) => TypeExpr::List(items.iter().map(TypeExpr::normalized).collect()),
            TypeExpr::Ellipsis => TypeExpr::Ellipsis,
        }
    }

    /// Top-level names the expression needs in scope, e.g. `np` for
    /// `np.ndarray` or `List` and `Foo` for `List[Foo]`.
    pub fn referenced_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut BTreeSet<String>) {
        match self {
            TypeExpr::Name(name) => {
                let head = head_segment(name);
                if !matches!(head, "None" | "True" | "False") {
                    names.insert(head.to_string());
                }
            }
            TypeExpr::Subscript(head, args) => {
                names.insert(head_segment(head).to_string());
                if unqualified(head) != "Literal" {
                    args.iter().for_each(|arg| arg.collect_names(names));
                }
            }
            TypeExpr::Union(items) | TypeExpr::List(items) => {
                items.iter().for_each(|item| item.collect_names(names));
            }
            TypeExpr::Literal(raw) => {
                if let Some(inner) = forward_reference(raw) {
                    inner.collect_names(names);
                }
            }
            TypeExpr::Ellipsis => {}
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Name(name) => f.write_str(name),
            TypeExpr::Subscript(head, args) => {
                write!(f, "{}[", head)?;
                write_joined(f, args, ", ")?;
                f.write_str("]")
            }
            TypeExpr::Union(items) => write_joined(f, items, " | "),
            TypeExpr::List(items) => {
                f.write_str("[")?;
                write_joined(f, items, ", ")?;
                f.write_str("]")
            }
            TypeExpr::Literal(raw) => f.write_str(raw),
            TypeExpr::Ellipsis => f.write_str("..."),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[TypeExpr], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Strips a `typing.` or `typing_extensions.` qualifier.
fn unqualified(name: &str) -> &str {
    name.strip_prefix("typing.")
        .or_else(|| name.strip_prefix("typing_extensions."))
        .unwrap_or(name)
}

fn head_segment(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

fn is_string_literal(raw: &str) -> bool {
    raw.ends_with('"') || raw.ends_with('\'')
}

/// Parses the contents of a plain quoted string as an annotation.
fn forward_reference(raw: &str) -> Option<TypeExpr> {
    let quote = raw.chars().next()?;
    if !matches!(quote, '"' | '\'') || raw.len() < 2 || !raw.ends_with(quote) {
        return None;
    }
    TypeExpr::parse(&raw[1..raw.len() - 1]).ok()
}

/// Flattens nested unions and drops duplicates, keeping first occurrences.
fn union_of(items: Vec<TypeExpr>) -> TypeExpr {
    let mut flat: Vec<TypeExpr> = Vec::new();
    for item in items {
        let members = match item {
            TypeExpr::Union(inner) => inner,
            other => vec![other],
        };
        for member in members {
            if !flat.contains(&member) {
                flat.push(member);
            }
        }
    }
    if flat.len() == 1 {
        flat.remove(0)
    } else {
        TypeExpr::Union(flat)
    }
}

/// The type of a value written inside `Literal[...]`.
fn literal_base_type(value: &TypeExpr) -> TypeExpr {
    match value {
        TypeExpr::Literal(raw) if is_string_literal(raw) => {
            let prefix = raw.split(['"', '\'']).next().unwrap_or("");
            if prefix.contains(['b', 'B']) {
                TypeExpr::Name("bytes".into())
            } else {
                TypeExpr::Name("str".into())
            }
        }
        TypeExpr::Literal(raw) if raw.contains('.') => TypeExpr::Name("float".into()),
        TypeExpr::Literal(_) => TypeExpr::Name("int".into()),
        TypeExpr::Name(name) => match name.as_str() {
            "True" | "False" => TypeExpr::Name("bool".into()),
            "None" => TypeExpr::Name("None".into()),
            dotted => match dotted.rsplit_once('.') {
                // Enum members: Color.RED is a Color.
                Some((owner, _)) => TypeExpr::Name(owner.to_string()),
                None => TypeExpr::Name(dotted.to_string()),
            },
        },
        other => other.normalized(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    Dot,
    Comma,
    Pipe,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Ellipsis,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '[' | ']' | '(' | ')' | ',' | '|' => {
                tokens.push(match c {
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    _ => Token::Pipe,
                });
                i += 1;
            }
            '.' if chars[i..].starts_with(&['.', '.', '.']) => {
                tokens.push(Token::Ellipsis);
                i += 3;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '"' | '\'' => {
                let end = scan_string(&chars, i)?;
                tokens.push(Token::Str(chars[i..end].iter().collect()));
                i = end;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Num(chars[start..i].iter().collect()));
            }
            c if c == '_' || c.is_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i] == '_' || chars[i].is_alphanumeric()) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                // String prefixes such as b'' or r"".
                let is_prefix = word.len() <= 2
                    && word.chars().all(|ch| "bBrRuUfF".contains(ch))
                    && matches!(chars.get(i), Some('"') | Some('\''));
                if is_prefix {
                    let end = scan_string(&chars, i)?;
                    tokens.push(Token::Str(chars[start..end].iter().collect()));
                    i = end;
                } else {
                    tokens.push(Token::Ident(word));
                }
            }
            other => return Err(format!("unexpected character `{}`", other)),
        }
    }
    Ok(tokens)
}

/// Returns the index just past the string literal starting at `start`.
fn scan_string(chars: &[char], start: usize) -> Result<usize, String> {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err("unterminated string".to_string())
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_union(&mut self) -> Result<TypeExpr, String> {
        let mut items = vec![self.parse_primary()?];
        while self.eat(&Token::Pipe) {
            items.push(self.parse_primary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            TypeExpr::Union(items)
        })
    }

    fn parse_primary(&mut self) -> Result<TypeExpr, String> {
        match self.next() {
            Some(Token::Ident(first)) => {
                let mut name = first;
                while self.eat(&Token::Dot) {
                    match self.next() {
                        Some(Token::Ident(part)) => {
                            name.push('.');
                            name.push_str(&part);
                        }
                        other => return Err(format!("expected name after `.`, found {:?}", other)),
                    }
                }
                if self.eat(&Token::LBracket) {
                    let args = self.parse_args(&Token::RBracket)?;
                    Ok(TypeExpr::Subscript(name, args))
                } else {
                    Ok(TypeExpr::Name(name))
                }
            }
            Some(Token::Str(raw)) | Some(Token::Num(raw)) => Ok(TypeExpr::Literal(raw)),
            Some(Token::Ellipsis) => Ok(TypeExpr::Ellipsis),
            Some(Token::LBracket) => Ok(TypeExpr::List(self.parse_args(&Token::RBracket)?)),
            Some(Token::LParen) => {
                let mut items = self.parse_args(&Token::RParen)?;
                if items.len() == 1 {
                    Ok(items.remove(0))
                } else {
                    Err("tuple expressions are not annotations".to_string())
                }
            }
            Some(other) => Err(format!("unexpected {:?}", other)),
            None => Err("unexpected end of annotation".to_string()),
        }
    }

    fn parse_args(&mut self, close: &Token) -> Result<Vec<TypeExpr>, String> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_union()?);
            if self.eat(&Token::Comma) {
                if self.eat(close) {
                    break;
                }
                continue;
            }
            if self.eat(close) {
                break;
            }
            return Err(format!("expected {:?}, found {:?}", close, self.peek()));
        }
        Ok(args)
    }
}
