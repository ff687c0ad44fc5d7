//! PostgreSQL 文本字面量编解码。
//!
//! # 教案式说明
//! - **意图 (Why)**：以文本协议传参的驱动需要把复合行与数组渲染成 `(a,b)`、`{"(a,b)","(c,d)"}`
//!   形式，并能从同样的文本中恢复出结构；对象列表的“保序、可重启”编码即落在这里；
//! - **契约 (What)**：
//!   - [`encode`]：`Null` → `None`（SQL NULL），其余值渲染为字面量文本；
//!   - [`Parser::next_node`]：每次调用从上次停下的字节继续解析下一个顶层节点，结束时返回 `None`；
//!   - [`decode`]：按 [`FieldKind`] 把节点还原为 [`Value`]，嵌套在引号内的复合值/数组会递归解析；
//! - **风险 (Trade-offs)**：只实现过程调用用到的子集（不含数组维度修饰、范围类型）。

use chrono::{NaiveDate, NaiveDateTime};

use crate::{
    error::MarshalError,
    schema::FieldKind,
    value::{ScalarKind, Value},
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// 把值渲染为文本协议参数。
pub fn encode(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(render(other)),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => (if *flag { "t" } else { "f" }).to_owned(),
        Value::SmallInt(number) => number.to_string(),
        Value::Int(number) => number.to_string(),
        Value::BigInt(number) => number.to_string(),
        Value::Real(number) => number.to_string(),
        Value::Double(number) => number.to_string(),
        Value::Char(ch) => ch.to_string(),
        Value::Text(text) | Value::Enum(text) => text.clone(),
        Value::Date(date) => date.format(DATE_FORMAT).to_string(),
        Value::Timestamp(timestamp) => timestamp.format(TIMESTAMP_FORMAT).to_string(),
        Value::Composite(fields) => {
            let mut out = String::from("(");
            for (index, field) in fields.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                // 复合值中的 NULL 写作空位。
                if !field.is_null() {
                    push_element(&mut out, &render(field), false);
                }
            }
            out.push(')');
            out
        }
        Value::Array(elements) => {
            let mut out = String::from("{");
            for (index, element) in elements.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                if element.is_null() {
                    out.push_str("NULL");
                } else {
                    push_element(&mut out, &render(element), true);
                }
            }
            out.push('}');
            out
        }
    }
}

fn push_element(out: &mut String, text: &str, in_array: bool) {
    let needs_quotes = text.is_empty()
        || (in_array && text.eq_ignore_ascii_case("NULL"))
        || text
            .chars()
            .any(|ch| matches!(ch, ',' | '(' | ')' | '{' | '}' | '"' | '\\') || ch.is_whitespace());
    if !needs_quotes {
        out.push_str(text);
        return;
    }
    out.push('"');
    for ch in text.chars() {
        if matches!(ch, '"' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

/// 解析出的字面量节点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Null,
    Text(String),
    Row(Vec<Node>),
    Array(Vec<Node>),
}

/// 可重启的字面量解析游标。
#[derive(Clone, Debug)]
pub struct Parser<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    /// 已消费的字节数。
    pub fn position(&self) -> usize {
        self.position
    }

    /// 解析下一个顶层节点；顶层节点之间以逗号或空白分隔。
    pub fn next_node(&mut self) -> Result<Option<Node>, MarshalError> {
        self.skip_separators();
        if self.position >= self.input.len() {
            return Ok(None);
        }
        let node = match self.peek() {
            Some('(') => self.row()?,
            Some('{') => self.array()?,
            Some('"') => Node::Text(self.quoted()?),
            _ => Node::Text(self.bare(&[','])),
        };
        Ok(Some(node))
    }

    fn skip_separators(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == ',' || ch.is_whitespace() {
                self.position += ch.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += ch.len_utf8();
        Some(ch)
    }

    fn expect(&mut self, expected: char) -> Result<(), MarshalError> {
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => Err(self.error(format!("expected `{expected}`, found `{ch}`"))),
            None => Err(self.error(format!("expected `{expected}`, found end of input"))),
        }
    }

    fn error(&self, reason: String) -> MarshalError {
        MarshalError::Literal {
            reason: format!("{reason} at byte {}", self.position),
        }
    }

    fn row(&mut self) -> Result<Node, MarshalError> {
        self.expect('(')?;
        let mut fields = Vec::new();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(Node::Row(fields));
        }
        loop {
            let field = match self.peek() {
                Some(',') | Some(')') => Node::Null,
                Some('"') => Node::Text(self.quoted()?),
                Some(_) => Node::Text(self.bare(&[',', ')'])),
                None => return Err(self.error("unterminated row".to_owned())),
            };
            fields.push(field);
            match self.bump() {
                Some(',') => continue,
                Some(')') => return Ok(Node::Row(fields)),
                _ => return Err(self.error("unterminated row".to_owned())),
            }
        }
    }

    fn array(&mut self) -> Result<Node, MarshalError> {
        self.expect('{')?;
        let mut elements = Vec::new();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Node::Array(elements));
        }
        loop {
            let element = match self.peek() {
                Some('"') => Node::Text(self.quoted()?),
                Some('{') => self.array()?,
                Some(_) => {
                    let token = self.bare(&[',', '}']);
                    let token = token.trim();
                    if token.eq_ignore_ascii_case("NULL") {
                        Node::Null
                    } else {
                        Node::Text(token.to_owned())
                    }
                }
                None => return Err(self.error("unterminated array".to_owned())),
            };
            elements.push(element);
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Node::Array(elements)),
                _ => return Err(self.error("unterminated array".to_owned())),
            }
        }
    }

    fn quoted(&mut self) -> Result<String, MarshalError> {
        self.expect('"')?;
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(ch) => text.push(ch),
                    None => return Err(self.error("dangling escape".to_owned())),
                },
                // 行字面量中 `""` 表示一个双引号。
                Some('"') if self.peek() == Some('"') => {
                    self.bump();
                    text.push('"');
                }
                Some('"') => return Ok(text),
                Some(ch) => text.push(ch),
                None => return Err(self.error("unterminated quoted string".to_owned())),
            }
        }
    }

    fn bare(&mut self, terminators: &[char]) -> String {
        let start = self.position;
        while let Some(ch) = self.peek() {
            if terminators.contains(&ch) {
                break;
            }
            self.position += ch.len_utf8();
        }
        self.input[start..self.position].to_owned()
    }
}

/// 解析整段文本并按字段种类还原。
pub fn decode_text(text: &str, kind: &FieldKind) -> Result<Value, MarshalError> {
    match kind {
        // 标量与枚举不做结构解析，整段文本即值。
        FieldKind::Scalar(_) | FieldKind::Enum { .. } => decode(Node::Text(text.to_owned()), kind),
        _ => {
            let mut parser = Parser::new(text);
            match parser.next_node()? {
                Some(node @ (Node::Row(_) | Node::Array(_))) => decode(node, kind),
                Some(_) => Err(MarshalError::Literal {
                    reason: format!("`{text}` is not a structured literal for a {kind:?} field"),
                }),
                None => Ok(Value::Null),
            }
        }
    }
}

/// 按字段种类把节点还原为值。
pub fn decode(node: Node, kind: &FieldKind) -> Result<Value, MarshalError> {
    match (node, kind) {
        (Node::Null, _) => Ok(Value::Null),
        (Node::Text(text), FieldKind::Scalar(scalar)) => scalar_from_text(&text, *scalar),
        (Node::Text(text), FieldKind::Enum { .. }) => Ok(Value::Enum(text)),
        // 嵌套在引号中的复合值或数组。
        (Node::Text(text), _) => decode_text(&text, kind),
        (Node::Row(fields), FieldKind::Nested(schema)) => {
            let kinds = schema.fields().iter().map(|field| field.kind());
            let mut values = Vec::with_capacity(fields.len());
            for (field, kind) in fields.into_iter().zip(kinds) {
                values.push(decode(field, kind)?);
            }
            Ok(Value::Composite(values))
        }
        (Node::Row(fields), FieldKind::Map { key, value }) => {
            let mut fields = fields.into_iter();
            let key = decode_scalar_node(fields.next(), *key)?;
            let value = decode_scalar_node(fields.next(), *value)?;
            Ok(Value::Composite(vec![key, value]))
        }
        (Node::Array(elements), FieldKind::List(inner)) => elements
            .into_iter()
            .map(|element| decode(element, inner))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (Node::Array(entries), FieldKind::Map { .. }) => entries
            .into_iter()
            .map(|entry| decode(entry, kind))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (node, kind) => Err(MarshalError::Literal {
            reason: format!("{node:?} does not fit a {kind:?} field"),
        }),
    }
}

fn decode_scalar_node(node: Option<Node>, kind: ScalarKind) -> Result<Value, MarshalError> {
    match node {
        Some(Node::Text(text)) => scalar_from_text(&text, kind),
        _ => Ok(Value::Null),
    }
}

fn scalar_from_text(text: &str, kind: ScalarKind) -> Result<Value, MarshalError> {
    let invalid = || MarshalError::Literal {
        reason: format!("`{text}` is not a valid {}", kind.name()),
    };
    let value = match kind {
        ScalarKind::Bool => match text {
            "t" | "true" | "TRUE" => Value::Bool(true),
            "f" | "false" | "FALSE" => Value::Bool(false),
            _ => return Err(invalid()),
        },
        ScalarKind::SmallInt => Value::SmallInt(text.parse().map_err(|_| invalid())?),
        ScalarKind::Int => Value::Int(text.parse().map_err(|_| invalid())?),
        ScalarKind::BigInt => Value::BigInt(text.parse().map_err(|_| invalid())?),
        ScalarKind::Real => Value::Real(text.parse().map_err(|_| invalid())?),
        ScalarKind::Double => Value::Double(text.parse().map_err(|_| invalid())?),
        ScalarKind::Char => Value::Char(text.chars().next().ok_or_else(invalid)?),
        ScalarKind::Text => Value::Text(text.to_owned()),
        ScalarKind::Date => Value::Date(
            NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|_| invalid())?,
        ),
        ScalarKind::Timestamp => Value::Timestamp(
            NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map_err(|_| invalid())?,
        ),
    };
    Ok(value)
}
