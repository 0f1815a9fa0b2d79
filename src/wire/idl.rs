//! Textual IDL values as printed and accepted by the `dfx` command line.
//!
//! Only the subset needed to talk to the Perun canister and the ledger is
//! supported: `null`, `bool`, naturals and integers (with optional `_`
//! separators and type annotations), `text`, `blob`, `principal`, `opt`,
//! `vec`, `record`, `variant` and argument tuples.

use core::fmt::{self, Display, Write as _};

/// Deepest nesting of values accepted by [IdlValue::parse].
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdlError {
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEnd(&'static str),
    #[error("unexpected {found:?} at {pos}, expected {expected}")]
    Unexpected {
        pos: usize,
        found: char,
        expected: &'static str,
    },
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("invalid escape sequence at {0}")]
    InvalidEscape(usize),
    #[error("trailing input at {0}")]
    TrailingInput(usize),
    #[error("values nested deeper than {MAX_DEPTH} at {0}")]
    TooDeep(usize),
}

/// A dynamically typed IDL value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdlValue {
    Null,
    Bool(bool),
    /// Unbounded natural (`nat`).
    Nat(u128),
    Nat64(u64),
    Int(i128),
    Text(String),
    Blob(Vec<u8>),
    Principal(String),
    Opt(Option<Box<IdlValue>>),
    Vec(Vec<IdlValue>),
    Record(Vec<(String, IdlValue)>),
    Variant(String, Box<IdlValue>),
    /// Argument or result list: `(a, b)`.
    Tuple(Vec<IdlValue>),
}

impl IdlValue {
    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, IdlValue)>,
        K: Into<String>,
    {
        IdlValue::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn variant(tag: impl Into<String>, value: IdlValue) -> Self {
        IdlValue::Variant(tag.into(), Box::new(value))
    }

    pub fn opt(value: Option<IdlValue>) -> Self {
        IdlValue::Opt(value.map(Box::new))
    }

    /// Field `name` of a record.
    pub fn field(&self, name: &str) -> Option<&IdlValue> {
        match self {
            IdlValue::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_nat(&self) -> Option<u128> {
        match self {
            IdlValue::Nat(n) => Some(*n),
            IdlValue::Nat64(n) => Some(*n as u128),
            IdlValue::Int(n) => u128::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_nat().and_then(|n| u64::try_from(n).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            IdlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            IdlValue::Text(s) | IdlValue::Principal(s) => Some(s),
            _ => None,
        }
    }

    /// Bytes of a blob. `vec { n; ... }` of small naturals is accepted too,
    /// as that is how `vec nat8` values are printed.
    pub fn as_blob(&self) -> Option<Vec<u8>> {
        match self {
            IdlValue::Blob(b) => Some(b.clone()),
            IdlValue::Vec(items) => items
                .iter()
                .map(|i| i.as_nat().and_then(|n| u8::try_from(n).ok()))
                .collect(),
            _ => None,
        }
    }

    pub fn as_vec(&self) -> Option<&[IdlValue]> {
        match self {
            IdlValue::Vec(items) => Some(items),
            _ => None,
        }
    }

    /// Inner value of an `opt`. A bare `null` counts as an empty option.
    pub fn as_opt(&self) -> Option<Option<&IdlValue>> {
        match self {
            IdlValue::Opt(v) => Some(v.as_deref()),
            IdlValue::Null => Some(None),
            _ => None,
        }
    }

    pub fn as_variant(&self) -> Option<(&str, &IdlValue)> {
        match self {
            IdlValue::Variant(tag, v) => Some((tag, v)),
            _ => None,
        }
    }

    /// Unwraps a single-element tuple, which is how replies are printed.
    pub fn into_single(self) -> IdlValue {
        match self {
            IdlValue::Tuple(mut items) if items.len() == 1 => items.remove(0),
            other => other,
        }
    }

    /// Visits this value and all nested values, depth first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a IdlValue)) {
        let mut stack = vec![self];
        while let Some(v) = stack.pop() {
            f(v);
            match v {
                IdlValue::Opt(Some(inner)) | IdlValue::Variant(_, inner) => stack.push(&**inner),
                IdlValue::Vec(items) | IdlValue::Tuple(items) => stack.extend(items.iter().rev()),
                IdlValue::Record(fields) => stack.extend(fields.iter().rev().map(|(_, v)| v)),
                _ => {}
            }
        }
    }

    pub fn parse(input: &str) -> Result<IdlValue, IdlError> {
        let mut p = Parser::new(input);
        let v = p.value()?;
        p.skip_ws();
        if p.pos < p.src.len() {
            return Err(IdlError::TrailingInput(p.pos));
        }
        Ok(v)
    }
}

impl Display for IdlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdlValue::Null => f.write_str("null"),
            IdlValue::Bool(b) => write!(f, "{b}"),
            IdlValue::Nat(n) => write!(f, "{n} : nat"),
            IdlValue::Nat64(n) => write!(f, "{n} : nat64"),
            IdlValue::Int(n) => write!(f, "{n} : int"),
            IdlValue::Text(s) => write_text(f, s),
            IdlValue::Blob(bytes) => {
                f.write_str("blob \"")?;
                for b in bytes {
                    write!(f, "\\{b:02x}")?;
                }
                f.write_char('"')
            }
            IdlValue::Principal(p) => {
                f.write_str("principal ")?;
                write_text(f, p)
            }
            IdlValue::Opt(None) => f.write_str("null"),
            IdlValue::Opt(Some(v)) => write!(f, "opt {v}"),
            IdlValue::Vec(items) => {
                f.write_str("vec {")?;
                for i in items {
                    write!(f, " {i};")?;
                }
                f.write_str(" }")
            }
            IdlValue::Record(fields) => {
                f.write_str("record {")?;
                for (k, v) in fields {
                    write!(f, " {k} = {v};")?;
                }
                f.write_str(" }")
            }
            IdlValue::Variant(tag, v) if **v == IdlValue::Null => {
                write!(f, "variant {{ {tag} }}")
            }
            IdlValue::Variant(tag, v) => write!(f, "variant {{ {tag} = {v} }}"),
            IdlValue::Tuple(items) => {
                f.write_char('(')?;
                for (n, i) in items.iter().enumerate() {
                    if n > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{i}")?;
                }
                f.write_char(')')
            }
        }
    }
}

fn write_text(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            // Line comments, as emitted by some dfx versions.
            if trimmed.starts_with("//") {
                let end = trimmed.find('\n').unwrap_or(trimmed.len());
                self.pos += end;
            } else {
                return;
            }
        }
    }

    fn expect(&mut self, want: char, expected: &'static str) -> Result<(), IdlError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(found) => Err(IdlError::Unexpected {
                pos: self.pos - found.len_utf8(),
                found,
                expected,
            }),
            None => Err(IdlError::UnexpectedEnd(expected)),
        }
    }

    fn unexpected(&self, expected: &'static str) -> IdlError {
        match self.peek() {
            Some(found) => IdlError::Unexpected {
                pos: self.pos,
                found,
                expected,
            },
            None => IdlError::UnexpectedEnd(expected),
        }
    }

    fn ident(&mut self) -> &'a str {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    /// Every nested value passes through here, so this bounds the recursion.
    fn value(&mut self) -> Result<IdlValue, IdlError> {
        if self.depth >= MAX_DEPTH {
            return Err(IdlError::TooDeep(self.pos));
        }
        self.depth += 1;
        let v = self.term();
        self.depth -= 1;
        v
    }

    fn term(&mut self) -> Result<IdlValue, IdlError> {
        self.skip_ws();
        let v = match self.peek() {
            None => return Err(IdlError::UnexpectedEnd("value")),
            Some('(') => self.tuple()?,
            Some('"') => IdlValue::Text(self.text()?),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.number()?,
            Some(c) if c.is_alphabetic() => self.keyword()?,
            Some(_) => return Err(self.unexpected("value")),
        };
        self.annotation(v)
    }

    fn keyword(&mut self) -> Result<IdlValue, IdlError> {
        let start = self.pos;
        match self.ident() {
            "null" => Ok(IdlValue::Null),
            "true" => Ok(IdlValue::Bool(true)),
            "false" => Ok(IdlValue::Bool(false)),
            "opt" => Ok(IdlValue::opt(Some(self.value()?))),
            "blob" => {
                self.skip_ws();
                Ok(IdlValue::Blob(self.blob()?))
            }
            "principal" => {
                self.skip_ws();
                Ok(IdlValue::Principal(self.text()?))
            }
            "vec" => Ok(IdlValue::Vec(self.block(|p| p.value())?)),
            "record" => {
                let mut idx = 0usize;
                let fields = self.block(|p| {
                    let field = p.field(idx)?;
                    idx += 1;
                    Ok(field)
                })?;
                Ok(IdlValue::Record(fields))
            }
            "variant" => {
                let mut fields = self.block(|p| p.field(0))?;
                if fields.len() != 1 {
                    return Err(IdlError::Unexpected {
                        pos: start,
                        found: 'v',
                        expected: "variant with exactly one case",
                    });
                }
                let (tag, v) = fields.remove(0);
                Ok(IdlValue::variant(tag, v))
            }
            _ => {
                self.pos = start;
                Err(self.unexpected("keyword"))
            }
        }
    }

    /// `{ item; item; ... }` with an optional trailing separator.
    fn block<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, IdlError>,
    ) -> Result<Vec<T>, IdlError> {
        self.expect('{', "'{'")?;
        let mut items = vec![];
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(items);
            }
            items.push(item(self)?);
            self.skip_ws();
            match self.peek() {
                Some(';') => {
                    self.bump();
                }
                Some('}') => {}
                _ => return Err(self.unexpected("';' or '}'")),
            }
        }
    }

    /// `label = value`, or just `label` inside a variant, or just `value`
    /// for tuple-like records (labelled by position).
    fn field(&mut self, idx: usize) -> Result<(String, IdlValue), IdlError> {
        self.skip_ws();
        let start = self.pos;
        let (label, quoted) = match self.peek() {
            Some('"') => (Some(self.text()?), true),
            Some(c) if c.is_alphanumeric() || c == '_' => (Some(self.ident().to_string()), false),
            _ => (None, false),
        };
        self.skip_ws();
        match (label, self.peek()) {
            (Some(label), Some('=')) => {
                self.bump();
                Ok((label, self.value()?))
            }
            // A bare case name, as in `variant { Name }`.
            (Some(label), Some(';') | Some('}'))
                if !quoted
                    && !label.chars().all(|c| c.is_ascii_digit() || c == '_')
                    && !matches!(label.as_str(), "null" | "true" | "false") =>
            {
                Ok((label, IdlValue::Null))
            }
            _ => {
                self.pos = start;
                Ok((idx.to_string(), self.value()?))
            }
        }
    }

    fn tuple(&mut self) -> Result<IdlValue, IdlError> {
        self.expect('(', "'('")?;
        let mut items = vec![];
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.bump();
                return Ok(IdlValue::Tuple(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(')') => {}
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
    }

    fn number(&mut self) -> Result<IdlValue, IdlError> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || c == '_' || (i == 0 && (c == '-' || c == '+'))))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += len;
        let literal = &rest[..len];
        let digits: String = literal.chars().filter(|c| *c != '_').collect();
        let invalid = || IdlError::InvalidNumber(literal.to_string());
        if digits.starts_with('-') {
            digits.parse().map(IdlValue::Int).map_err(|_| invalid())
        } else {
            digits
                .trim_start_matches('+')
                .parse()
                .map(IdlValue::Nat)
                .map_err(|_| invalid())
        }
    }

    /// Applies a `: type` annotation. Only the width of naturals is kept.
    fn annotation(&mut self, v: IdlValue) -> Result<IdlValue, IdlError> {
        self.skip_ws();
        if self.peek() != Some(':') {
            return Ok(v);
        }
        self.bump();
        let ty_start = self.pos;
        self.skip_type()?;
        let ty = self.src[ty_start..self.pos].trim();
        Ok(match (v, ty) {
            (IdlValue::Nat(n), "nat64") => IdlValue::Nat64(
                u64::try_from(n).map_err(|_| IdlError::InvalidNumber(n.to_string()))?,
            ),
            (IdlValue::Nat(n), t) if t.starts_with("int") => IdlValue::Int(
                i128::try_from(n).map_err(|_| IdlError::InvalidNumber(n.to_string()))?,
            ),
            (v, _) => v,
        })
    }

    fn skip_type(&mut self) -> Result<(), IdlError> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None if depth == 0 => return Ok(()),
                None => return Err(IdlError::UnexpectedEnd("'}'")),
                Some('{') => depth += 1,
                Some('}') if depth > 0 => depth -= 1,
                Some(';' | '}' | ')' | ',') if depth == 0 => return Ok(()),
                _ => {}
            }
            self.bump();
        }
    }

    fn text(&mut self) -> Result<String, IdlError> {
        let bytes = self.quoted()?;
        String::from_utf8(bytes).map_err(|_| IdlError::InvalidEscape(self.pos))
    }

    fn blob(&mut self) -> Result<Vec<u8>, IdlError> {
        self.quoted()
    }

    /// Contents of a quoted literal with escapes resolved.
    fn quoted(&mut self) -> Result<Vec<u8>, IdlError> {
        self.expect('"', "'\"'")?;
        let mut out = vec![];
        loop {
            let at = self.pos;
            match self.bump() {
                None => return Err(IdlError::UnexpectedEnd("'\"'")),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push(b'\n'),
                    Some('t') => out.push(b'\t'),
                    Some('r') => out.push(b'\r'),
                    Some(c @ ('"' | '\'' | '\\')) => out.push(c as u8),
                    Some('u') => {
                        self.expect('{', "'{'")?;
                        let end = self
                            .rest()
                            .find('}')
                            .ok_or(IdlError::InvalidEscape(at))?;
                        let code = u32::from_str_radix(&self.rest()[..end], 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or(IdlError::InvalidEscape(at))?;
                        self.pos += end + 1;
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(code.encode_utf8(&mut buf).as_bytes());
                    }
                    Some(hi) => {
                        let lo = self.bump().ok_or(IdlError::InvalidEscape(at))?;
                        let digits = [hi, lo].iter().collect::<String>();
                        let byte = u8::from_str_radix(&digits, 16)
                            .map_err(|_| IdlError::InvalidEscape(at))?;
                        out.push(byte);
                    }
                    None => return Err(IdlError::InvalidEscape(at)),
                },
                Some(c) => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }
}
