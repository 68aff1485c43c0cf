//! USDA (ASCII) file parser.
//!
//! The text is tokenized first, then a recursive-descent pass builds a
//! [`Layer`]. Everything Remix layers use is understood:
//!
//! - layer metadata (`subLayers`, `defaultPrim`, `customLayerData`, ...)
//! - `def` / `over` / `class` prims with metadata and list ops
//! - typed attributes, `.connect` and `.timeSamples`
//! - relationships
//! - references and payloads (`@asset@</Prim>`)
//!
//! `variantSet` blocks are kept as raw source text.

use thiserror::Error;

use super::types::*;
use super::value::{DictEntry, Value};

/// Errors that can occur during USDA parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unexpected end of file")]
    UnexpectedEof,

    #[error("Invalid number format: {0}")]
    InvalidNumber(String),

    #[error("Unclosed block starting at line {0}")]
    UnclosedBlock(usize),

    #[error("Missing #usda header")]
    MissingHeader,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Asset(String),
    Path(String),
    Number(String),
    Punct(char),
}

#[derive(Clone, Debug)]
struct Lexeme {
    token: Token,
    line: usize,
    start: usize,
    end: usize,
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek(0)?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.src[self.pos..].starts_with(pat)
    }

    fn tokenize(mut self) -> ParseResult<Vec<Lexeme>> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let Some(b) = self.peek(0) else {
                break;
            };
            let start = self.pos;
            let line = self.line;
            let token = match b {
                b'"' | b'\'' => Token::Str(self.read_string(b)?),
                b'@' => Token::Asset(self.read_asset()?),
                b'<' => Token::Path(self.read_delimited(b'<', b'>')?),
                b'(' | b')' | b'[' | b']' | b'{' | b'}' | b'=' | b',' | b';' | b':' => {
                    self.bump();
                    Token::Punct(b as char)
                }
                b'-' | b'+' | b'.' | b'0'..=b'9' => self.read_number()?,
                b if b.is_ascii_alphabetic() || b == b'_' => Token::Ident(self.read_ident()),
                _ => {
                    let c = self.src[self.pos..].chars().next().unwrap_or('?');
                    return Err(self.error(format!("unexpected character '{}'", c)));
                }
            };
            out.push(Lexeme {
                token,
                line,
                start,
                end: self.pos,
            });
        }
        Ok(out)
    }

    fn skip_trivia(&mut self) {
        while let Some(b) = self.peek(0) {
            if b.is_ascii_whitespace() {
                self.bump();
            } else if b == b'#' {
                while let Some(b) = self.peek(0) {
                    if b == b'\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote: u8) -> ParseResult<String> {
        let start_line = self.line;
        let triple = if quote == b'"' { "\"\"\"" } else { "'''" };
        if self.starts_with(triple) {
            self.pos += 3;
            let body_start = self.pos;
            while !self.starts_with(triple) {
                if self.bump().is_none() {
                    return Err(ParseError::UnclosedBlock(start_line));
                }
            }
            let body = self.src[body_start..self.pos].to_string();
            self.pos += 3;
            return Ok(body);
        }

        self.bump();
        let mut out = String::new();
        loop {
            let rest = &self.src[self.pos..];
            let Some(c) = rest.chars().next() else {
                return Err(ParseError::UnclosedBlock(start_line));
            };
            if c as u32 == quote as u32 {
                self.pos += 1;
                break;
            }
            if c == '\n' {
                return Err(self.error("newline in string literal"));
            }
            if c == '\\' {
                self.pos += 1;
                let escaped = self.src[self.pos..].chars().next().ok_or(ParseError::UnexpectedEof)?;
                self.pos += escaped.len_utf8();
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                continue;
            }
            self.pos += c.len_utf8();
            out.push(c);
        }
        Ok(out)
    }

    fn read_asset(&mut self) -> ParseResult<String> {
        if self.starts_with("@@@") {
            let start_line = self.line;
            self.pos += 3;
            let body_start = self.pos;
            while !self.starts_with("@@@") {
                if self.bump().is_none() {
                    return Err(ParseError::UnclosedBlock(start_line));
                }
            }
            let body = self.src[body_start..self.pos].to_string();
            self.pos += 3;
            return Ok(body);
        }
        self.read_delimited(b'@', b'@')
    }

    fn read_delimited(&mut self, open: u8, close: u8) -> ParseResult<String> {
        debug_assert_eq!(self.peek(0), Some(open));
        self.bump();
        let start = self.pos;
        loop {
            match self.peek(0) {
                Some(b) if b == close => break,
                Some(b'\n') | None => {
                    return Err(self.error(format!("unterminated '{}'", open as char)))
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        let body = self.src[start..self.pos].to_string();
        self.bump();
        Ok(body)
    }

    fn read_number(&mut self) -> ParseResult<Token> {
        let start = self.pos;
        if matches!(self.peek(0), Some(b'-') | Some(b'+')) {
            self.pos += 1;
            // -inf / +inf
            if self.peek(0).is_some_and(|b| b.is_ascii_alphabetic()) {
                let word = self.read_ident();
                return match word.as_str() {
                    "inf" | "nan" => Ok(Token::Number(self.src[start..self.pos].to_string())),
                    _ => Err(ParseError::InvalidNumber(self.src[start..self.pos].to_string())),
                };
            }
        }
        let mut seen_digit = false;
        while let Some(b) = self.peek(0) {
            match b {
                b'0'..=b'9' => seen_digit = true,
                b'.' => {}
                b'e' | b'E' => {
                    if matches!(self.peek(1), Some(b'-') | Some(b'+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        if !seen_digit {
            return Err(ParseError::InvalidNumber(text.to_string()));
        }
        Ok(Token::Number(text.to_string()))
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek(0) {
            let namespaced = b == b':'
                && self
                    .peek(1)
                    .is_some_and(|n| n.is_ascii_alphabetic() || n == b'_');
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || namespaced {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }
}

/// Parse a number token into an integer or real value.
fn number_value(text: &str) -> ParseResult<Value> {
    let lower = text.to_ascii_lowercase();
    let is_real = lower.contains(['.', 'e']) || lower.contains("inf") || lower.contains("nan");
    if !is_real {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Int(i));
        }
    }
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| ParseError::InvalidNumber(text.to_string()))
}

/// USDA file parser.
pub struct UsdaParser<'a> {
    source: &'a str,
    tokens: Vec<Lexeme>,
    pos: usize,
}

impl<'a> UsdaParser<'a> {
    /// Create a new parser from file contents.
    pub fn new(source: &'a str) -> ParseResult<Self> {
        let trimmed = source.trim_start_matches('\u{feff}').trim_start();
        if !trimmed.starts_with("#usda") {
            return Err(ParseError::MissingHeader);
        }
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            source,
            tokens,
            pos: 0,
        })
    }

    /// Parse the whole document.
    pub fn parse(&mut self) -> ParseResult<Layer> {
        let mut layer = Layer::default();
        if self.is_punct('(') {
            let (doc, metadata) = self.parse_metadata_block()?;
            layer.doc = doc;
            layer.metadata = metadata;
        }
        while !self.at_end() {
            if self.is_punct(';') {
                self.pos += 1;
                continue;
            }
            layer.prims.push(self.parse_prim()?);
        }
        Ok(layer)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|l| &l.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|l| l.line)
            .unwrap_or(1)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Parse {
            line: self.line(),
            message: message.into(),
        }
    }

    fn next(&mut self) -> ParseResult<Token> {
        let token = self.peek().cloned().ok_or(ParseError::UnexpectedEof)?;
        self.pos += 1;
        Ok(token)
    }

    fn is_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn expect_punct(&mut self, c: char) -> ParseResult<()> {
        match self.next()? {
            Token::Punct(p) if p == c => Ok(()),
            other => Err(self.error(format!("expected '{}', found {:?}", c, other))),
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.next()? {
            Token::Ident(word) => Ok(word),
            other => Err(self.error(format!("expected identifier, found {:?}", other))),
        }
    }

    fn skip_separators(&mut self) {
        while self.is_punct(';') || self.is_punct(',') {
            self.pos += 1;
        }
    }

    /// `( "doc" key = value ... )`
    fn parse_metadata_block(&mut self) -> ParseResult<(Option<String>, Vec<MetadataEntry>)> {
        let open_line = self.line();
        self.expect_punct('(')?;
        let mut doc = None;
        let mut entries = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None => return Err(ParseError::UnclosedBlock(open_line)),
                Some(Token::Punct(')')) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Str(_)) => {
                    if let Token::Str(s) = self.next()? {
                        doc = Some(s);
                    }
                }
                Some(Token::Ident(_)) => entries.push(self.parse_metadata_entry()?),
                Some(other) => {
                    return Err(self.error(format!("unexpected {:?} in metadata", other)))
                }
            }
        }
        Ok((doc, entries))
    }

    fn parse_metadata_entry(&mut self) -> ParseResult<MetadataEntry> {
        let mut list_op = ListOp::Explicit;
        let mut key = self.expect_ident()?;
        if let Some(op) = ListOp::from_keyword(&key) {
            if matches!(self.peek(), Some(Token::Ident(_))) {
                list_op = op;
                key = self.expect_ident()?;
            }
        }
        let value = if self.is_punct('=') {
            self.pos += 1;
            self.parse_value_inner(true)?
        } else {
            Value::None
        };
        Ok(MetadataEntry {
            list_op,
            key,
            value,
        })
    }

    /// Parse any value expression.
    fn parse_value(&mut self) -> ParseResult<Value> {
        self.parse_value_inner(false)
    }

    /// Parse a value; `allow_offsets` skips layer offsets after references
    /// (`@a.usda@ (offset = 10)`), which only occur in metadata.
    fn parse_value_inner(&mut self, allow_offsets: bool) -> ParseResult<Value> {
        let value = match self.next()? {
            Token::Number(text) => number_value(&text)?,
            Token::Str(s) => Value::String(s),
            Token::Asset(asset) => match self.peek().cloned() {
                Some(Token::Path(prim)) => {
                    self.pos += 1;
                    Value::Reference {
                        asset: Some(asset),
                        prim: Some(prim),
                    }
                }
                _ => Value::Asset(asset),
            },
            Token::Path(p) => Value::Path(p),
            Token::Ident(word) => match word.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "None" => Value::None,
                "inf" | "nan" => number_value(&word)?,
                _ => Value::Token(word),
            },
            Token::Punct('(') => Value::Tuple(self.parse_list(')', allow_offsets)?),
            Token::Punct('[') => Value::Array(self.parse_list(']', allow_offsets)?),
            Token::Punct('{') => Value::Dictionary(self.parse_dictionary_body()?),
            other => return Err(self.error(format!("unexpected {:?} in value", other))),
        };
        let is_reference = matches!(
            value,
            Value::Reference { .. } | Value::Asset(_) | Value::Path(_)
        );
        if allow_offsets && is_reference && self.looks_like_reference_arguments() {
            self.skip_balanced('(', ')')?;
        }
        Ok(value)
    }

    fn looks_like_reference_arguments(&self) -> bool {
        self.is_punct('(')
            && matches!(
                (self.peek_at(1), self.peek_at(2)),
                (Some(Token::Ident(_)), Some(Token::Punct('=')))
            )
    }

    fn skip_balanced(&mut self, open: char, close: char) -> ParseResult<()> {
        let open_line = self.line();
        let mut depth = 0usize;
        loop {
            match self.next() {
                Ok(Token::Punct(c)) if c == open => depth += 1,
                Ok(Token::Punct(c)) if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(ParseError::UnexpectedEof) => return Err(ParseError::UnclosedBlock(open_line)),
                Err(e) => return Err(e),
            }
        }
    }

    fn parse_list(&mut self, close: char, allow_offsets: bool) -> ParseResult<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            if self.is_punct(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.parse_value_inner(allow_offsets)?);
            if self.is_punct(',') {
                self.pos += 1;
            } else if !self.is_punct(close) {
                return Err(self.error(format!("expected ',' or '{}' in list", close)));
            }
        }
    }

    /// Body of `{ type key = value ... }` after the opening brace.
    fn parse_dictionary_body(&mut self) -> ParseResult<Vec<DictEntry>> {
        let open_line = self.line();
        let mut entries = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None => return Err(ParseError::UnclosedBlock(open_line)),
                Some(Token::Punct('}')) => {
                    self.pos += 1;
                    return Ok(entries);
                }
                _ => {}
            }
            let type_name = self.parse_type_name()?;
            let key = match self.next()? {
                Token::Ident(k) | Token::Str(k) => k,
                other => {
                    return Err(self.error(format!("expected dictionary key, found {:?}", other)))
                }
            };
            self.expect_punct('=')?;
            let value = self.parse_value()?;
            entries.push(DictEntry {
                type_name,
                key,
                value,
            });
        }
    }

    /// `float3` or `float3[]`
    fn parse_type_name(&mut self) -> ParseResult<String> {
        let mut type_name = self.expect_ident()?;
        if self.is_punct('[') && self.peek_at(1) == Some(&Token::Punct(']')) {
            self.pos += 2;
            type_name.push_str("[]");
        }
        Ok(type_name)
    }

    fn parse_prim(&mut self) -> ParseResult<PrimSpec> {
        let keyword = self.expect_ident()?;
        let specifier = Specifier::from_keyword(&keyword)
            .ok_or_else(|| self.error(format!("expected def/over/class, found '{}'", keyword)))?;

        let type_name = match self.peek() {
            Some(Token::Ident(_)) => Some(self.expect_ident()?),
            _ => None,
        };
        let name = match self.next()? {
            Token::Str(name) => name,
            other => return Err(self.error(format!("expected prim name, found {:?}", other))),
        };

        let mut prim = PrimSpec::new(specifier, type_name.as_deref(), name);
        if self.is_punct('(') {
            let (doc, metadata) = self.parse_metadata_block()?;
            prim.doc = doc;
            prim.metadata = metadata;
        }

        let open_line = self.line();
        self.expect_punct('{')?;
        loop {
            self.skip_separators();
            match self.peek() {
                None => return Err(ParseError::UnclosedBlock(open_line)),
                Some(Token::Punct('}')) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Ident(word)) if Specifier::from_keyword(word).is_some() => {
                    let child = self.parse_prim()?;
                    prim.children.push(child);
                }
                Some(Token::Ident(word)) if word == "variantSet" => {
                    let raw = self.capture_raw_block()?;
                    prim.raw_blocks.push(raw);
                }
                Some(Token::Ident(_)) => self.parse_property(&mut prim)?,
                Some(other) => {
                    return Err(self.error(format!("unexpected {:?} in prim body", other)))
                }
            }
        }
        Ok(prim)
    }

    /// Consume `variantSet "name" = { ... }` and return its source text.
    fn capture_raw_block(&mut self) -> ParseResult<String> {
        let start = self.tokens[self.pos].start;
        while !self.is_punct('{') {
            self.next()?;
        }
        self.skip_balanced('{', '}')?;
        let end = self.tokens[self.pos - 1].end;
        let lines: Vec<&str> = self.source[start..end].lines().map(str::trim).collect();
        Ok(lines.join("\n"))
    }

    fn parse_property(&mut self, prim: &mut PrimSpec) -> ParseResult<()> {
        let mut custom = false;
        let mut variability = Variability::Varying;
        let mut list_op = ListOp::Explicit;
        loop {
            match self.peek() {
                Some(Token::Ident(w)) if w == "custom" => custom = true,
                Some(Token::Ident(w)) if w == "uniform" => variability = Variability::Uniform,
                Some(Token::Ident(w)) if w == "varying" || w == "config" => {}
                Some(Token::Ident(w))
                    if ListOp::from_keyword(w).is_some()
                        && matches!(self.peek_at(1), Some(Token::Ident(_))) =>
                {
                    list_op = ListOp::from_keyword(w).unwrap_or_default();
                }
                _ => break,
            }
            self.pos += 1;
        }

        if self.is_ident("rel") {
            self.pos += 1;
            return self.parse_relationship(prim, custom, list_op);
        }

        let type_name = self.parse_type_name()?;
        let full_name = self.expect_ident()?;
        let (name, suffix) = match full_name.rsplit_once('.') {
            Some((n, s)) if s == "connect" || s == "timeSamples" => (n.to_string(), Some(s)),
            _ => (full_name.clone(), None),
        };

        if prim.attribute(&name).is_none() {
            prim.properties.push(Property::Attribute(Attribute {
                name: name.clone(),
                type_name: type_name.clone(),
                custom,
                variability,
                ..Default::default()
            }));
        }

        let mut value = None;
        let mut connections = None;
        let mut samples = None;
        if self.is_punct('=') {
            self.pos += 1;
            match suffix {
                Some("connect") => connections = Some(self.parse_connection_targets()?),
                Some("timeSamples") => samples = Some(self.parse_time_samples()?),
                _ => value = Some(self.parse_value()?.into_typed(&type_name)),
            }
        }
        let metadata = if self.is_punct('(') {
            Some(self.parse_metadata_block()?)
        } else {
            None
        };

        let attr = prim
            .attribute_mut(&name)
            .ok_or_else(|| ParseError::Parse {
                line: 0,
                message: format!("attribute '{}' vanished", name),
            })?;
        attr.custom |= custom;
        if variability == Variability::Uniform {
            attr.variability = Variability::Uniform;
        }
        if value.is_some() {
            attr.default = value;
        }
        if let Some(targets) = connections {
            attr.connections = targets;
        }
        if samples.is_some() {
            attr.time_samples = samples;
        }
        if let Some((doc, entries)) = metadata {
            if let Some(doc) = doc {
                attr.metadata.push(MetadataEntry::new("doc", Value::String(doc)));
            }
            attr.metadata.extend(entries);
        }
        Ok(())
    }

    fn parse_connection_targets(&mut self) -> ParseResult<Vec<String>> {
        match self.parse_value()? {
            Value::Path(p) => Ok(vec![p]),
            Value::None => Ok(Vec::new()),
            Value::Array(items) => items
                .into_iter()
                .map(|v| match v {
                    Value::Path(p) => Ok(p),
                    other => Err(self.error(format!("expected path, found {:?}", other))),
                })
                .collect(),
            other => Err(self.error(format!("expected connection path, found {:?}", other))),
        }
    }

    fn parse_time_samples(&mut self) -> ParseResult<Vec<(f64, Value)>> {
        let open_line = self.line();
        self.expect_punct('{')?;
        let mut samples = Vec::new();
        loop {
            self.skip_separators();
            match self.next() {
                Ok(Token::Punct('}')) => return Ok(samples),
                Ok(Token::Number(text)) => {
                    let time = number_value(&text)?
                        .as_f64()
                        .ok_or_else(|| ParseError::InvalidNumber(text.clone()))?;
                    self.expect_punct(':')?;
                    let value = self.parse_value()?;
                    samples.push((time, value));
                }
                Ok(other) => {
                    return Err(self.error(format!("expected time sample, found {:?}", other)))
                }
                Err(ParseError::UnexpectedEof) => return Err(ParseError::UnclosedBlock(open_line)),
                Err(e) => return Err(e),
            }
        }
    }

    fn parse_relationship(
        &mut self,
        prim: &mut PrimSpec,
        custom: bool,
        list_op: ListOp,
    ) -> ParseResult<()> {
        let full_name = self.expect_ident()?;
        let name = full_name
            .strip_suffix(".default")
            .unwrap_or(&full_name)
            .to_string();
        let mut targets = Vec::new();
        if self.is_punct('=') {
            self.pos += 1;
            targets = self.parse_connection_targets()?;
        }
        let mut metadata = Vec::new();
        if self.is_punct('(') {
            let (doc, entries) = self.parse_metadata_block()?;
            if let Some(doc) = doc {
                metadata.push(MetadataEntry::new("doc", Value::String(doc)));
            }
            metadata.extend(entries);
        }
        prim.set_relationship(Relationship {
            name,
            custom,
            list_op,
            targets,
            metadata,
        });
        Ok(())
    }
}

/// Parse USDA text into a [`Layer`].
pub fn parse_usda(content: &str) -> ParseResult<Layer> {
    let mut parser = UsdaParser::new(content)?;
    parser.parse()
}
