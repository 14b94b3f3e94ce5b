//! Text layer reader.
//!
//! Covers the part of the USDA grammar that carries geometry, transforms
//! and layer composition: prim specs with metadata, typed attributes with
//! defaults and `timeSamples`, relationships (skipped) and variant sets
//! (skipped).

use thiserror::Error;
use viewer_constants::loading::DEFAULT_TIME_CODES_PER_SECOND;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UsdaError {
    #[error("layer does not start with `#usda`")]
    NotUsda,
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Asset(String),
    Path(String),
    Punct(char),
}

/// Split a layer into tokens tagged with their line number.
pub fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, UsdaError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    let syntax = |line: usize, message: String| UsdaError::Syntax { line, message };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' | '\'' => {
                let start_line = line;
                let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                i += if triple { 3 } else { 1 };
                let mut value = String::new();
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(syntax(start_line, "unterminated string".into()));
                    };
                    if ch == c
                        && (!triple
                            || (chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c)))
                    {
                        i += if triple { 3 } else { 1 };
                        break;
                    }
                    if ch == '\n' {
                        if !triple {
                            return Err(syntax(start_line, "unterminated string".into()));
                        }
                        line += 1;
                    }
                    if ch == '\\' {
                        let escaped = chars.get(i + 1).copied().unwrap_or('\\');
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        i += 2;
                        continue;
                    }
                    value.push(ch);
                    i += 1;
                }
                tokens.push((Token::Str(value), start_line));
            }
            '@' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '@' || ch == '\n')
                    .map(|offset| i + 1 + offset)
                    .filter(|&end| chars[end] == '@')
                    .ok_or_else(|| syntax(line, "unterminated asset path".into()))?;
                tokens.push((Token::Asset(chars[i + 1..end].iter().collect()), line));
                i = end + 1;
            }
            '<' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '>' || ch == '\n')
                    .map(|offset| i + 1 + offset)
                    .filter(|&end| chars[end] == '>')
                    .ok_or_else(|| syntax(line, "unterminated path".into()))?;
                tokens.push((Token::Path(chars[i + 1..end].iter().collect()), line));
                i = end + 1;
            }
            '(' | ')' | '[' | ']' | '{' | '}' | '=' | ',' | ':' | ';' => {
                tokens.push((Token::Punct(c), line));
                i += 1;
            }
            c if starts_number(c, chars.get(i + 1).copied()) => {
                let start = i;
                i += 1;
                while let Some(&ch) = chars.get(i) {
                    let exponent_sign =
                        (ch == '-' || ch == '+') && matches!(chars[i - 1], 'e' | 'E');
                    if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| syntax(line, format!("invalid number `{}`", literal)))?;
                tokens.push((Token::Number(value), line));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while let Some(&ch) = chars.get(i) {
                    if ch.is_alphanumeric() || matches!(ch, '_' | ':' | '.') {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(chars[start..i].iter().collect()), line));
            }
            other => return Err(syntax(line, format!("unexpected character `{}`", other))),
        }
    }

    Ok(tokens)
}

fn starts_number(c: char, next: Option<char>) -> bool {
    c.is_ascii_digit()
        || ((c == '-' || c == '+' || c == '.')
            && next.is_some_and(|n| n.is_ascii_digit() || (c != '.' && n == '.')))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    Asset(String),
    Path(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Number(v) => Some(v),
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Strings and bare tokens.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Ident(s) | Value::Asset(s) | Value::Path(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Every number in this value, depth first.
    pub fn numbers(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.collect_numbers(&mut out);
        out
    }

    fn collect_numbers(&self, out: &mut Vec<f64>) {
        match self {
            Value::Tuple(items) | Value::List(items) => {
                for item in items {
                    item.collect_numbers(out);
                }
            }
            other => out.extend(other.as_f64()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specifier {
    Def,
    Over,
    Class,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub type_name: String,
    pub default: Option<Value>,
    /// Sorted by time code.
    pub samples: Vec<(f64, Value)>,
}

impl Attribute {
    fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            default: None,
            samples: Vec::new(),
        }
    }

    /// Fill in whatever this opinion leaves unauthored from `weaker`.
    pub fn merge(&mut self, weaker: Attribute) {
        if self.default.is_none() {
            self.default = weaker.default;
        }
        if self.samples.is_empty() {
            self.samples = weaker.samples;
        }
        if self.type_name.is_empty() {
            self.type_name = weaker.type_name;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prim {
    pub specifier: Specifier,
    pub type_name: Option<String>,
    pub name: String,
    pub metadata: Vec<(String, Value)>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Prim>,
}

impl Prim {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn attribute_mut(&mut self, name: &str, type_name: &str) -> &mut Attribute {
        let index = match self.attributes.iter().position(|a| a.name == name) {
            Some(index) => index,
            None => {
                self.attributes.push(Attribute::new(name, type_name));
                self.attributes.len() - 1
            }
        };
        &mut self.attributes[index]
    }
}

/// Layer-level metadata that affects composition and playback.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMetadata {
    pub time_codes_per_second: f64,
    pub start_time_code: Option<f64>,
    pub end_time_code: Option<f64>,
    pub up_axis: Option<String>,
    pub sub_layers: Vec<String>,
    pub default_prim: Option<String>,
}

impl Default for LayerMetadata {
    fn default() -> Self {
        Self {
            time_codes_per_second: DEFAULT_TIME_CODES_PER_SECOND,
            start_time_code: None,
            end_time_code: None,
            up_axis: None,
            sub_layers: Vec::new(),
            default_prim: None,
        }
    }
}

impl LayerMetadata {
    fn from_entries(entries: &[(String, Value)]) -> Self {
        let mut metadata = Self::default();
        let mut frames_per_second = None;
        for (key, value) in entries {
            match key.as_str() {
                "timeCodesPerSecond" => {
                    if let Some(v) = value.as_f64().filter(|v| *v > 0.0) {
                        metadata.time_codes_per_second = v;
                    }
                }
                "framesPerSecond" => frames_per_second = value.as_f64().filter(|v| *v > 0.0),
                "startTimeCode" => metadata.start_time_code = value.as_f64(),
                "endTimeCode" => metadata.end_time_code = value.as_f64(),
                "upAxis" => metadata.up_axis = value.as_str().map(str::to_string),
                "defaultPrim" => metadata.default_prim = value.as_str().map(str::to_string),
                "subLayers" => {
                    metadata.sub_layers = value
                        .as_list()
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                }
                _ => {}
            }
        }
        if !entries.iter().any(|(k, _)| k == "timeCodesPerSecond") {
            if let Some(fps) = frames_per_second {
                metadata.time_codes_per_second = fps;
            }
        }
        metadata
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layer {
    pub metadata: LayerMetadata,
    pub prims: Vec<Prim>,
}

/// Parse a complete text layer.
pub fn parse_layer(text: &str) -> Result<Layer, UsdaError> {
    if !text.trim_start_matches('\u{feff}').trim_start().starts_with("#usda") {
        return Err(UsdaError::NotUsda);
    }

    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };

    let mut layer = Layer::default();
    if parser.peek_punct('(') {
        let entries = parser.metadata()?;
        layer.metadata = LayerMetadata::from_entries(&entries);
    }

    while parser.peek().is_some() {
        if parser.eat_punct(';') {
            continue;
        }
        layer.prims.push(parser.prim()?);
    }
    Ok(layer)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

const LIST_OPS: [&str; 5] = ["prepend", "append", "add", "delete", "reorder"];
const QUALIFIERS: [&str; 3] = ["custom", "uniform", "varying"];

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(token, _)| token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |(_, line)| *line)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, UsdaError> {
        Err(UsdaError::Syntax {
            line: self.line(),
            message: message.into(),
        })
    }

    fn next(&mut self) -> Result<Token, UsdaError> {
        match self.tokens.get(self.pos) {
            Some((token, _)) => {
                self.pos += 1;
                Ok(token.clone())
            }
            None => self.error("unexpected end of layer"),
        }
    }

    fn peek_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn peek_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == word)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek_punct(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), UsdaError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            self.error(format!("expected `{}`, found {:?}", c, self.peek()))
        }
    }

    fn ident(&mut self) -> Result<String, UsdaError> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => self.error(format!("expected identifier, found {:?}", other)),
        }
    }

    /// `( key = value ... )` blocks on layers, prims and attributes.
    fn metadata(&mut self) -> Result<Vec<(String, Value)>, UsdaError> {
        self.expect_punct('(')?;
        let mut entries = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Punct(')')) => {
                    self.pos += 1;
                    return Ok(entries);
                }
                Some(Token::Punct(',' | ';')) => self.pos += 1,
                Some(Token::Str(_)) => {
                    if let Token::Str(doc) = self.next()? {
                        entries.push(("doc".to_string(), Value::Str(doc)));
                    }
                }
                Some(Token::Ident(_)) => {
                    let mut key = self.ident()?;
                    if LIST_OPS.contains(&key.as_str()) && matches!(self.peek(), Some(Token::Ident(_)))
                    {
                        key = self.ident()?;
                    }
                    self.expect_punct('=')?;
                    let value = self.value()?;
                    entries.push((key, value));
                }
                Some(other) => return self.error(format!("unexpected {:?} in metadata", other)),
                None => return self.error("unterminated metadata"),
            }
        }
    }

    fn value(&mut self) -> Result<Value, UsdaError> {
        Ok(match self.next()? {
            Token::Number(v) => Value::Number(v),
            Token::Str(s) => Value::Str(s),
            Token::Asset(s) => Value::Asset(s),
            Token::Path(s) => Value::Path(s),
            Token::Ident(s) => match s.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "None" => Value::None,
                _ => Value::Ident(s),
            },
            Token::Punct('(') => Value::Tuple(self.sequence(')')?),
            Token::Punct('[') => Value::List(self.sequence(']')?),
            Token::Punct('{') => Value::Map(self.map()?),
            other => return self.error(format!("unexpected {:?} in value", other)),
        })
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Value>, UsdaError> {
        let mut items = Vec::new();
        loop {
            if self.eat_punct(close) {
                return Ok(items);
            }
            items.push(self.value()?);
            if !self.eat_punct(',') && !self.peek_punct(close) {
                return self.error(format!("expected `,` or `{}`", close));
            }
        }
    }

    /// Dictionaries and time sample blocks.
    fn map(&mut self) -> Result<Vec<(Value, Value)>, UsdaError> {
        let mut entries = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Punct('}')) => {
                    self.pos += 1;
                    return Ok(entries);
                }
                Some(Token::Punct(',' | ';')) => self.pos += 1,
                Some(Token::Number(_) | Token::Str(_)) => {
                    let key = self.value()?;
                    self.expect_punct(':')?;
                    entries.push((key, self.value()?));
                }
                Some(Token::Ident(_)) => {
                    let _type_name = self.type_name()?;
                    let key = match self.next()? {
                        Token::Ident(s) | Token::Str(s) => Value::Str(s),
                        other => return self.error(format!("unexpected {:?} as key", other)),
                    };
                    self.expect_punct('=')?;
                    entries.push((key, self.value()?));
                }
                Some(other) => return self.error(format!("unexpected {:?} in dictionary", other)),
                None => return self.error("unterminated dictionary"),
            }
        }
    }

    /// A type name with an optional `[]` array suffix.
    fn type_name(&mut self) -> Result<String, UsdaError> {
        let mut name = self.ident()?;
        if self.peek_punct('[') && self.peek_at(1) == Some(&Token::Punct(']')) {
            self.pos += 2;
            name.push_str("[]");
        }
        Ok(name)
    }

    fn prim(&mut self) -> Result<Prim, UsdaError> {
        let specifier = match self.ident()?.as_str() {
            "def" => Specifier::Def,
            "over" => Specifier::Over,
            "class" => Specifier::Class,
            other => return self.error(format!("expected prim specifier, found `{}`", other)),
        };
        let type_name = if matches!(self.peek(), Some(Token::Ident(_))) {
            Some(self.ident()?)
        } else {
            None
        };
        let name = match self.next()? {
            Token::Str(name) => name,
            other => return self.error(format!("expected prim name, found {:?}", other)),
        };

        let mut prim = Prim {
            specifier,
            type_name,
            name,
            metadata: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        };
        if self.peek_punct('(') {
            prim.metadata = self.metadata()?;
        }

        self.expect_punct('{')?;
        loop {
            match self.peek() {
                Some(Token::Punct('}')) => {
                    self.pos += 1;
                    return Ok(prim);
                }
                Some(Token::Punct(';')) => self.pos += 1,
                Some(Token::Ident(word)) if matches!(word.as_str(), "def" | "over" | "class") => {
                    let child = self.prim()?;
                    prim.children.push(child);
                }
                Some(Token::Ident(word)) if word == "variantSet" => self.skip_variant_set()?,
                Some(Token::Ident(_)) => self.property(&mut prim)?,
                Some(other) => return self.error(format!("unexpected {:?} in prim body", other)),
                None => return self.error(format!("unterminated prim `{}`", prim.name)),
            }
        }
    }

    fn skip_variant_set(&mut self) -> Result<(), UsdaError> {
        self.ident()?;
        self.next()?;
        self.expect_punct('=')?;
        self.expect_punct('{')?;
        let mut depth = 1;
        while depth > 0 {
            match self.next()? {
                Token::Punct('{') => depth += 1,
                Token::Punct('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// Attribute or relationship declaration.
    fn property(&mut self, prim: &mut Prim) -> Result<(), UsdaError> {
        while let Some(Token::Ident(word)) = self.peek() {
            if QUALIFIERS.contains(&word.as_str()) || LIST_OPS.contains(&word.as_str()) {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.peek_ident("rel") {
            self.pos += 1;
            self.ident()?;
            if self.eat_punct('=') {
                self.value()?;
            }
            if self.peek_punct('(') {
                self.metadata()?;
            }
            return Ok(());
        }

        let type_name = self.type_name()?;
        let full_name = self.ident()?;

        if let Some(name) = full_name.strip_suffix(".timeSamples") {
            self.expect_punct('=')?;
            let samples = match self.value()? {
                Value::Map(entries) => {
                    let mut samples: Vec<(f64, Value)> = entries
                        .into_iter()
                        .filter_map(|(time, value)| Some((time.as_f64()?, value)))
                        .collect();
                    samples.sort_by(|a, b| a.0.total_cmp(&b.0));
                    samples
                }
                _ => return self.error("expected time samples dictionary"),
            };
            prim.attribute_mut(name, &type_name).samples = samples;
            return Ok(());
        }

        if full_name.ends_with(".connect") || full_name.ends_with(".spline") {
            if self.eat_punct('=') {
                self.value()?;
            }
            return Ok(());
        }

        let default = if self.eat_punct('=') {
            Some(self.value()?)
        } else {
            None
        };
        if self.peek_punct('(') {
            self.metadata()?;
        }

        let attribute = prim.attribute_mut(&full_name, &type_name);
        attribute.type_name = type_name;
        if default.is_some() {
            attribute.default = default;
        }
        Ok(())
    }
}
