//! Parser for the dict-literal attribute blobs embedded in anomaly records.
//!
//! Detectors print node attributes as `{'cluster': 'A', 'ports': [80, 443]}`.
//! Only a flat subset is accepted: quoted or bare-identifier keys, scalar
//! values, and lists of scalars. Anything else (nested maps, calls, bare words
//! as values) is a parse error and the caller falls back to the unknown
//! cluster.

/// A parsed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<LiteralValue>),
}

impl LiteralValue {
    /// Render a scalar as grouping-key text. Lists, booleans and nulls have no key form.
    pub fn as_key_text(&self) -> Option<String> {
        match self {
            LiteralValue::Str(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            LiteralValue::Int(i) => Some(i.to_string()),
            LiteralValue::Float(f) => Some(f.to_string()),
            LiteralValue::Bool(_) | LiteralValue::Null | LiteralValue::List(_) => None,
        }
    }
}

/// Attributes in source order. Repeated keys keep the last value on lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    entries: Vec<(String, LiteralValue)>,
}

impl AttributeMap {
    pub fn get(&self, key: &str) -> Option<&LiteralValue> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("attribute blob parse error at byte {position}: {reason}")]
pub struct LiteralError {
    pub position: usize,
    pub reason: String,
}

/// Parse a `{...}` attribute blob.
pub fn parse_attributes(blob: &str) -> Result<AttributeMap, LiteralError> {
    let mut parser = Parser { src: blob, pos: 0 };
    parser.skip_ws();
    let map = parser.map()?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        return Err(parser.error("trailing characters after closing brace"));
    }
    Ok(map)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), LiteralError> {
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{want}', found '{c}'"))),
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    fn error(&self, reason: impl Into<String>) -> LiteralError {
        LiteralError {
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn map(&mut self) -> Result<AttributeMap, LiteralError> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(AttributeMap { entries });
            }

            let key = self.key()?;
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.value(true)?;
            entries.push((key, value));

            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(AttributeMap { entries }),
                Some(c) => return Err(self.error(format!("expected ',' or '}}', found '{c}'"))),
                None => return Err(self.error("unterminated attribute map")),
            }
        }
    }

    fn key(&mut self) -> Result<String, LiteralError> {
        match self.peek() {
            Some('\'') | Some('"') => self.quoted(),
            Some(c) if c.is_alphabetic() || c == '_' => Ok(self.word().to_string()),
            Some(c) => Err(self.error(format!("invalid key start '{c}'"))),
            None => Err(self.error("expected key, found end of input")),
        }
    }

    fn value(&mut self, allow_list: bool) -> Result<LiteralValue, LiteralError> {
        match self.peek() {
            Some('\'') | Some('"') => self.quoted().map(LiteralValue::Str),
            Some('[') if allow_list => self.list(),
            Some('[') => Err(self.error("nested lists are not supported")),
            Some('{') => Err(self.error("nested maps are not supported")),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                match self.word() {
                    "true" | "True" => Ok(LiteralValue::Bool(true)),
                    "false" | "False" => Ok(LiteralValue::Bool(false)),
                    "null" | "None" => Ok(LiteralValue::Null),
                    other => Err(LiteralError {
                        position: start,
                        reason: format!("unsupported bare value '{other}'"),
                    }),
                }
            }
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("expected value, found end of input")),
        }
    }

    fn list(&mut self) -> Result<LiteralValue, LiteralError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(LiteralValue::List(items));
            }
            items.push(self.value(false)?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(LiteralValue::List(items)),
                Some(c) => return Err(self.error(format!("expected ',' or ']', found '{c}'"))),
                None => return Err(self.error("unterminated list")),
            }
        }
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '-') {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn quoted(&mut self) -> Result<String, LiteralError> {
        let start = self.pos;
        let quote = self.bump().ok_or_else(|| self.error("expected quote"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => break,
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(LiteralError {
            position: start,
            reason: "unterminated string".to_string(),
        })
    }

    fn number(&mut self) -> Result<LiteralValue, LiteralError> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_')
        ) {
            self.bump();
        }
        let text: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(LiteralValue::Int(i));
        }
        text.parse::<f64>()
            .map(LiteralValue::Float)
            .map_err(|_| LiteralError {
                position: start,
                reason: format!("invalid number '{text}'"),
            })
    }
}
