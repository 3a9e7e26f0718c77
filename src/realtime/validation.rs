//! 入站消息校验 / Inbound validation gate
//!
//! 每种实时消息类型注册唯一的 schema，校验在任何有状态处理器之前运行。
//! Every real-time message kind has exactly one registered schema; validation runs
//! before any stateful handler and has no side effects.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;

lazy_static! {
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z0-9_.:-]+$").expect("identifier pattern is valid");
}

/// 房间/用户标识最大长度 / Max length of room and user identifiers
pub const MAX_IDENTIFIER_LEN: usize = 128;
/// 聊天内容最大长度（字符）/ Max chat content length in chars
pub const MAX_CONTENT_LEN: usize = 4000;

/// 字段类型 / Field type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_u64() || value.is_i64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }
}

/// 校验规则 / Validation rule
#[derive(Debug, Clone)]
pub enum ValidationRule {
    Type(FieldType),
    NonEmpty,
    StringLength { min: Option<usize>, max: Option<usize> },
    NumberRange { min: Option<f64>, max: Option<f64> },
    OneOf(Vec<String>),
    Pattern(Regex),
}

impl ValidationRule {
    /// 校验单条规则，失败返回原因 / Check one rule, returning the failure reason
    fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            ValidationRule::Type(expected) => {
                if expected.matches(value) {
                    Ok(())
                } else {
                    Err(format!("expected {}", expected.name()))
                }
            }
            ValidationRule::NonEmpty => match value {
                Value::String(s) if s.trim().is_empty() => Err("must not be empty".to_string()),
                Value::Array(a) if a.is_empty() => Err("must not be empty".to_string()),
                _ => Ok(()),
            },
            ValidationRule::StringLength { min, max } => {
                let Some(s) = value.as_str() else { return Ok(()) };
                let len = s.chars().count();
                if let Some(min_len) = min {
                    if len < *min_len {
                        return Err(format!("must be at least {} characters", min_len));
                    }
                }
                if let Some(max_len) = max {
                    if len > *max_len {
                        return Err(format!("must be at most {} characters", max_len));
                    }
                }
                Ok(())
            }
            ValidationRule::NumberRange { min, max } => {
                let Some(n) = value.as_f64() else { return Ok(()) };
                if let Some(min_val) = min {
                    if n < *min_val {
                        return Err(format!("must be greater than or equal to {}", min_val));
                    }
                }
                if let Some(max_val) = max {
                    if n > *max_val {
                        return Err(format!("must be less than or equal to {}", max_val));
                    }
                }
                Ok(())
            }
            ValidationRule::OneOf(allowed) => {
                let Some(s) = value.as_str() else { return Ok(()) };
                if allowed.iter().any(|a| a == s) {
                    Ok(())
                } else {
                    Err(format!("must be one of: {}", allowed.join(", ")))
                }
            }
            ValidationRule::Pattern(regex) => {
                let Some(s) = value.as_str() else { return Ok(()) };
                if regex.is_match(s) {
                    Ok(())
                } else {
                    Err("has an invalid format".to_string())
                }
            }
        }
    }
}

/// 字段校验配置 / Field validation
#[derive(Debug, Clone)]
pub struct FieldValidation {
    /// 点分路径，相对 body / Dotted path relative to the body
    pub path: String,
    pub rules: Vec<ValidationRule>,
    pub required: bool,
}

impl FieldValidation {
    pub fn required(path: &str, rules: Vec<ValidationRule>) -> Self {
        Self { path: path.to_string(), rules, required: true }
    }

    pub fn optional(path: &str, rules: Vec<ValidationRule>) -> Self {
        Self { path: path.to_string(), rules, required: false }
    }
}

/// 跨字段检查 / Cross-field check over the whole body
pub type SchemaCheck = fn(&Value) -> Option<FieldIssue>;

/// 消息 schema / Message schema
#[derive(Debug, Clone)]
pub struct Schema {
    pub kind: String,
    pub fields: Vec<FieldValidation>,
    pub checks: Vec<SchemaCheck>,
}

impl Schema {
    pub fn new(kind: &str) -> Self {
        Self { kind: kind.to_string(), fields: Vec::new(), checks: Vec::new() }
    }

    pub fn field(mut self, field: FieldValidation) -> Self {
        self.fields.push(field);
        self
    }

    pub fn check(mut self, check: SchemaCheck) -> Self {
        self.checks.push(check);
        self
    }
}

/// 单个字段问题 / A single field issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub path: String,
    pub reason: String,
}

impl FieldIssue {
    pub fn new(path: &str, reason: impl Into<String>) -> Self {
        Self { path: path.to_string(), reason: reason.into() }
    }
}

/// 校验错误：列出所有失败字段 / Validation error listing every failing field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.details())]
pub struct ValidationError {
    issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<FieldIssue>) -> Self {
        Self { issues }
    }

    pub fn single(path: &str, reason: impl Into<String>) -> Self {
        Self { issues: vec![FieldIssue::new(path, reason)] }
    }

    pub fn unknown_kind() -> Self {
        Self::single("kind", "unknown message kind")
    }

    pub fn issues(&self) -> &[FieldIssue] {
        &self.issues
    }

    /// 是否包含指定路径 / Whether the error names the given path
    pub fn names(&self, path: &str) -> bool {
        self.issues.iter().any(|i| i.path == path)
    }

    /// `<path>: <reason>, <path>: <reason>`
    pub fn details(&self) -> String {
        self.issues
            .iter()
            .map(|i| format!("{}: {}", i.path, i.reason))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// 已通过校验的消息 / A payload that passed its schema
#[derive(Debug, Clone)]
pub struct ValidatedPayload {
    kind: String,
    body: Value,
}

impl ValidatedPayload {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// 转为强类型 body / Deserialize the body into a typed struct
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, ValidationError> {
        serde_json::from_value(self.body).map_err(|e| ValidationError::single("body", e.to_string()))
    }
}

/// Schema 注册表 / Schema registry
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 schema，同类型仅保留一个 / Register a schema; one per kind, later wins
    pub fn register(&mut self, schema: Schema) -> Option<Schema> {
        self.schemas.insert(schema.kind.clone(), schema)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }

    /// 内置消息类型 / Built-in message kinds
    pub fn builtin(max_page_size: usize) -> Self {
        let mut registry = Self::new();
        registry.register(
            Schema::new("connect")
                .field(FieldValidation::required("uid", identifier_rules()))
                .field(FieldValidation::required(
                    "token",
                    vec![ValidationRule::Type(FieldType::String), ValidationRule::NonEmpty],
                )),
        );
        registry.register(Schema::new("ping"));
        registry.register(
            Schema::new("chat.join").field(FieldValidation::required("roomId", identifier_rules())),
        );
        registry.register(
            Schema::new("chat.leave").field(FieldValidation::required("roomId", identifier_rules())),
        );
        registry.register(
            Schema::new("chat.post")
                .field(FieldValidation::required("roomId", identifier_rules()))
                .field(FieldValidation::required(
                    "content",
                    vec![
                        ValidationRule::Type(FieldType::String),
                        ValidationRule::NonEmpty,
                        ValidationRule::StringLength { min: None, max: Some(MAX_CONTENT_LEN) },
                    ],
                )),
        );
        registry.register(
            Schema::new("chat.typing")
                .field(FieldValidation::required("roomId", identifier_rules()))
                .field(FieldValidation::required(
                    "isTyping",
                    vec![ValidationRule::Type(FieldType::Boolean)],
                )),
        );
        registry.register(
            Schema::new("sync")
                .field(FieldValidation::required(
                    "collection",
                    vec![
                        ValidationRule::Type(FieldType::String),
                        ValidationRule::OneOf(vec!["notifications".to_string(), "chat".to_string()]),
                    ],
                ))
                .field(FieldValidation::optional("roomId", identifier_rules()))
                .field(FieldValidation::optional(
                    "cursor",
                    vec![ValidationRule::Type(FieldType::String), ValidationRule::NonEmpty],
                ))
                .field(FieldValidation::optional(
                    "limit",
                    vec![
                        ValidationRule::Type(FieldType::Integer),
                        ValidationRule::NumberRange { min: Some(1.0), max: Some(max_page_size as f64) },
                    ],
                ))
                .field(FieldValidation::optional(
                    "order",
                    vec![
                        ValidationRule::Type(FieldType::String),
                        ValidationRule::OneOf(vec!["asc".to_string(), "desc".to_string()]),
                    ],
                ))
                .check(chat_sync_needs_room),
        );
        registry.register(Schema::new("notification.read").field(FieldValidation::optional(
            "seq",
            vec![
                ValidationRule::Type(FieldType::Integer),
                ValidationRule::NumberRange { min: Some(1.0), max: None },
            ],
        )));
        registry
    }

    /// 按 schema 校验 body / Validate a body against the schema registered for `kind`
    pub fn validate(&self, kind: &str, raw: &Value) -> Result<ValidatedPayload, ValidationError> {
        let schema = self.schemas.get(kind).ok_or_else(ValidationError::unknown_kind)?;
        let Some(body) = raw.as_object() else {
            return Err(ValidationError::single("body", "expected object"));
        };

        let mut issues = Vec::new();
        for field in &schema.fields {
            let value = lookup(body, &field.path).filter(|v| !v.is_null());
            match value {
                None if field.required => issues.push(FieldIssue::new(&field.path, "is required")),
                None => {}
                Some(value) => {
                    // 每个字段只报告第一条失败规则 / First failing rule per field
                    if let Some(reason) = field.rules.iter().find_map(|r| r.check(value).err()) {
                        issues.push(FieldIssue::new(&field.path, reason));
                    }
                }
            }
        }
        if issues.is_empty() {
            issues.extend(schema.checks.iter().filter_map(|check| check(raw)));
        }

        if issues.is_empty() {
            Ok(ValidatedPayload { kind: kind.to_string(), body: raw.clone() })
        } else {
            Err(ValidationError::new(issues))
        }
    }

    /// 校验原始文本帧 `{kind, body}` / Validate a raw text frame `{kind, body}`
    pub fn validate_frame(&self, text: &str) -> Result<ValidatedPayload, ValidationError> {
        let frame: Value =
            serde_json::from_str(text).map_err(|_| ValidationError::single("frame", "invalid json"))?;
        let Some(frame) = frame.as_object() else {
            return Err(ValidationError::single("frame", "expected object"));
        };
        let kind = match frame.get("kind") {
            Some(Value::String(kind)) => kind.as_str(),
            Some(_) => return Err(ValidationError::single("kind", "expected string")),
            None => return Err(ValidationError::single("kind", "is required")),
        };
        let body = frame.get("body").cloned().unwrap_or_else(|| Value::Object(Map::new()));
        self.validate(kind, &body)
    }
}

fn identifier_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::Type(FieldType::String),
        ValidationRule::NonEmpty,
        ValidationRule::StringLength { min: None, max: Some(MAX_IDENTIFIER_LEN) },
        ValidationRule::Pattern(IDENTIFIER.clone()),
    ]
}

fn chat_sync_needs_room(body: &Value) -> Option<FieldIssue> {
    let is_chat = body.get("collection").and_then(Value::as_str) == Some("chat");
    let has_room = body.get("roomId").map(|v| !v.is_null()).unwrap_or(false);
    (is_chat && !has_room).then(|| FieldIssue::new("roomId", "is required when collection is chat"))
}

fn lookup<'a>(body: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = body.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
