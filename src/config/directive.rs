//! Parser for `revproxy` directive lines.
//!
//! A directive is written as a single line: the element name followed by
//! `name="value"` attributes (or a bare `name` flag). Attribute order is kept
//! as written so that duplicates can be rejected by the rule compiler.
use std::fmt;

use crate::core::error::ConfigError;

/// Element name recognized by the proxy.
pub const REVPROXY_ELEMENT: &str = "revproxy";

/// One `name="value"` pair as written in the directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A parsed directive: element name plus attributes in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub element: String,
    pub attributes: Vec<Attribute>,
}

impl Directive {
    /// Build a `revproxy` directive from attribute pairs.
    pub fn revproxy<I, N, V>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            element: REVPROXY_ELEMENT.to_string(),
            attributes: attributes
                .into_iter()
                .map(|(name, value)| Attribute::new(name, value))
                .collect(),
        }
    }

    /// Parse a directive line such as
    /// `revproxy regexp="/foo/(.*)" server="up" uri="$1" nopipeline`.
    pub fn parse(line: &str) -> Result<Self, ConfigError> {
        let mut cursor = Cursor::new(line);

        let element = cursor
            .word()
            .ok_or_else(|| ConfigError::MalformedDirective("empty directive".to_string()))?;
        if element != REVPROXY_ELEMENT {
            return Err(ConfigError::UnrecognizedElement(element.to_string()));
        }

        let mut attributes = Vec::new();
        while let Some(name) = cursor.word() {
            if name.is_empty() {
                return Err(ConfigError::MalformedDirective(format!(
                    "attribute without a name at offset {}",
                    cursor.offset()
                )));
            }
            if !cursor.eat('=') {
                // Bare flag, e.g. `nopipeline`.
                attributes.push(Attribute::new(name, name));
                continue;
            }
            let value = cursor.quoted().map_err(ConfigError::MalformedDirective)?;
            attributes.push(Attribute::new(name, value));
        }

        Ok(Self {
            element: element.to_string(),
            attributes,
        })
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.element)?;
        for attr in &self.attributes {
            write!(f, " {}=\"{}\"", attr.name, attr.value.replace('"', "\\\""))?;
        }
        Ok(())
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Next bare word, stopping at whitespace or `=`. `None` at end of input.
    fn word(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let rest = self.rest();
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(rest.len());
        self.pos += end;
        Some(&rest[..end])
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.rest().starts_with(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        if !self.eat('"') {
            return Err(format!("expected '\"' at offset {}", self.pos));
        }
        let start = self.pos;
        let mut value = String::new();
        let mut chars = self.rest().char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += idx + 1;
                    if let Some(next) = self.rest().chars().next() {
                        if !next.is_whitespace() {
                            return Err(format!(
                                "unexpected '{next}' after closing quote at offset {}",
                                self.pos
                            ));
                        }
                    }
                    return Ok(value);
                }
                '\\' if matches!(chars.peek(), Some((_, '"'))) => {
                    value.push('"');
                    chars.next();
                }
                _ => value.push(c),
            }
        }
        Err(format!("unterminated quoted value starting at offset {start}"))
    }
}
