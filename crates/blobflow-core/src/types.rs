//! Row data model: column types, tuple descriptors, values and rows.
//!
//! Text input/output follows PostgreSQL conventions so that files produced
//! here can be loaded with `COPY` and vice versa.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{PipelineError, Result};

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    Json,
    Xml,
    Bytea,
    Date,
    Timestamp,
}

impl ColumnType {
    /// Canonical PostgreSQL name.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Int16 => "int2",
            ColumnType::Int32 => "int4",
            ColumnType::Int64 => "int8",
            ColumnType::Float32 => "float4",
            ColumnType::Float64 => "float8",
            ColumnType::Text => "text",
            ColumnType::Json => "json",
            ColumnType::Xml => "xml",
            ColumnType::Bytea => "bytea",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Input function: parse the text representation of a value.
    pub fn parse_text(&self, text: &str) -> Result<Value> {
        let invalid = |detail: String| {
            PipelineError::Data(format!(
                "invalid input syntax for type {}: \"{}\" ({})",
                self.name(),
                text,
                detail
            ))
        };

        let value = match self {
            ColumnType::Bool => Value::Bool(parse_bool(text).ok_or_else(|| invalid("expected boolean".into()))?),
            ColumnType::Int16 => Value::Int16(text.trim().parse().map_err(|e| invalid(format!("{}", e)))?),
            ColumnType::Int32 => Value::Int32(text.trim().parse().map_err(|e| invalid(format!("{}", e)))?),
            ColumnType::Int64 => Value::Int64(text.trim().parse().map_err(|e| invalid(format!("{}", e)))?),
            ColumnType::Float32 => Value::Float32(text.trim().parse().map_err(|e| invalid(format!("{}", e)))?),
            ColumnType::Float64 => Value::Float64(text.trim().parse().map_err(|e| invalid(format!("{}", e)))?),
            ColumnType::Text => Value::Text(text.to_string()),
            ColumnType::Xml => Value::Xml(text.to_string()),
            ColumnType::Json => Value::Json(serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?),
            ColumnType::Bytea => match text.strip_prefix("\\x") {
                Some(hex_digits) => Value::Bytes(hex::decode(hex_digits).map_err(|e| invalid(e.to_string()))?),
                None => Value::Bytes(text.as_bytes().to_vec()),
            },
            ColumnType::Date => Value::Date(
                NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|e| invalid(e.to_string()))?,
            ),
            ColumnType::Timestamp => Value::Timestamp(parse_timestamp(text.trim()).map_err(|e| invalid(e.to_string()))?),
        };
        Ok(value)
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColumnType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let column_type = match normalized.as_str() {
            "bool" | "boolean" => ColumnType::Bool,
            "int2" | "smallint" => ColumnType::Int16,
            "int4" | "int" | "integer" => ColumnType::Int32,
            "int8" | "bigint" => ColumnType::Int64,
            "float4" | "real" => ColumnType::Float32,
            "float8" | "double" | "double precision" => ColumnType::Float64,
            "text" | "varchar" | "character varying" | "string" => ColumnType::Text,
            "json" | "jsonb" => ColumnType::Json,
            "xml" => ColumnType::Xml,
            "bytea" => ColumnType::Bytea,
            "date" => ColumnType::Date,
            "timestamp" | "timestamp without time zone" => ColumnType::Timestamp,
            other => {
                return Err(PipelineError::Config(format!(
                    "unsupported column type: {}",
                    other
                )))
            }
        };
        Ok(column_type)
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered column list shared by an encoder or decoder for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDescriptor {
    columns: Vec<Column>,
}

impl TupleDescriptor {
    pub fn new(columns: Vec<Column>) -> Arc<Self> {
        Arc::new(Self { columns })
    }

    /// Parse a column list such as `"id:int8, name:text, payload:jsonb"`.
    /// A column without a type is `text`.
    pub fn parse(list: &str) -> Result<Arc<Self>> {
        let mut columns = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, type_name) = match entry.split_once(':') {
                Some((name, type_name)) => (name.trim(), type_name.trim()),
                None => (entry, "text"),
            };
            if name.is_empty() {
                return Err(PipelineError::Config(format!(
                    "column without a name in \"{}\"",
                    list
                )));
            }
            columns.push(Column::new(name, type_name.parse()?));
        }
        if columns.is_empty() {
            return Err(PipelineError::Config("no columns specified".to_string()));
        }
        Ok(Self::new(columns))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// Check that `row` fits this descriptor: same arity, and every non-null
    /// value has its column's type.
    pub fn check_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(PipelineError::Data(format!(
                "row has {} values, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row.values()) {
            if let Some(value) = value {
                if value.column_type() != column.column_type {
                    return Err(PipelineError::Data(format!(
                        "column \"{}\" is of type {} but value is of type {}",
                        column.name,
                        column.column_type,
                        value.column_type()
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Values and rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Json(serde_json::Value),
    Xml(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Bool(_) => ColumnType::Bool,
            Value::Int16(_) => ColumnType::Int16,
            Value::Int32(_) => ColumnType::Int32,
            Value::Int64(_) => ColumnType::Int64,
            Value::Float32(_) => ColumnType::Float32,
            Value::Float64(_) => ColumnType::Float64,
            Value::Text(_) => ColumnType::Text,
            Value::Json(_) => ColumnType::Json,
            Value::Xml(_) => ColumnType::Xml,
            Value::Bytes(_) => ColumnType::Bytea,
            Value::Date(_) => ColumnType::Date,
            Value::Timestamp(_) => ColumnType::Timestamp,
        }
    }

    /// Output function: the text representation read back by
    /// [`ColumnType::parse_text`].
    pub fn to_text(&self) -> String {
        match self {
            Value::Bool(b) => if *b { "t" } else { "f" }.to_string(),
            Value::Int16(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::Float32(v) => format_float(*v as f64, v.to_string()),
            Value::Float64(v) => format_float(*v, v.to_string()),
            Value::Text(s) | Value::Xml(s) => s.clone(),
            Value::Json(j) => j.to_string(),
            Value::Bytes(b) => format!("\\x{}", hex::encode(b)),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        }
    }
}

fn format_float(v: f64, finite: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        finite
    }
}

/// One tuple; `None` marks a SQL NULL.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Option<Value>>,
}

impl Row {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<Value>> {
        self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(None))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Option<Value>>> for Row {
    fn from(values: Vec<Option<Value>>) -> Self {
        Self::new(values)
    }
}
