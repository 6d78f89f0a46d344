//! Conversion between decoded rows and Arrow record batches.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::Datelike;

use crate::error::{PipelineError, Result};
use crate::types::{Column, ColumnType, Row, TupleDescriptor, Value};

/// Field metadata key recording the column type where Arrow alone is
/// ambiguous (json and xml are both `Utf8`).
pub const COLUMN_TYPE_METADATA_KEY: &str = "blobflow.column_type";

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Bool => DataType::Boolean,
        ColumnType::Int16 => DataType::Int16,
        ColumnType::Int32 => DataType::Int32,
        ColumnType::Int64 => DataType::Int64,
        ColumnType::Float32 => DataType::Float32,
        ColumnType::Float64 => DataType::Float64,
        ColumnType::Text | ColumnType::Json | ColumnType::Xml => DataType::Utf8,
        ColumnType::Bytea => DataType::Binary,
        ColumnType::Date => DataType::Date32,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

impl TupleDescriptor {
    pub fn to_arrow_schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns()
            .iter()
            .map(|column| {
                Field::new(&column.name, arrow_type(column.column_type), true).with_metadata(
                    HashMap::from([(
                        COLUMN_TYPE_METADATA_KEY.to_string(),
                        column.column_type.name().to_string(),
                    )]),
                )
            })
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Build a descriptor from an Arrow schema. Field metadata written by
    /// [`TupleDescriptor::to_arrow_schema`] takes precedence over the data
    /// type.
    pub fn from_arrow_schema(schema: &Schema) -> Result<Arc<Self>> {
        let mut columns = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let column_type = match field.metadata().get(COLUMN_TYPE_METADATA_KEY) {
                Some(name) => name.parse()?,
                None => match field.data_type() {
                    DataType::Boolean => ColumnType::Bool,
                    DataType::Int16 => ColumnType::Int16,
                    DataType::Int32 => ColumnType::Int32,
                    DataType::Int64 => ColumnType::Int64,
                    DataType::Float32 => ColumnType::Float32,
                    DataType::Float64 => ColumnType::Float64,
                    DataType::Utf8 | DataType::LargeUtf8 => ColumnType::Text,
                    DataType::Binary | DataType::LargeBinary => ColumnType::Bytea,
                    DataType::Date32 => ColumnType::Date,
                    DataType::Timestamp(TimeUnit::Microsecond, None) => ColumnType::Timestamp,
                    other => {
                        return Err(PipelineError::Config(format!(
                            "unsupported Arrow type {} for column '{}'",
                            other,
                            field.name()
                        )))
                    }
                },
            };
            columns.push(Column::new(field.name(), column_type));
        }
        Ok(Self::new(columns))
    }
}

/// Collect one column out of `rows`, mapping each non-null value with `f`.
/// `f` only sees values of the column's own type, which `check_row`
/// guarantees.
fn collect_column<T>(rows: &[Row], index: usize, f: impl Fn(&Value) -> Option<T>) -> Vec<Option<T>> {
    rows.iter().map(|row| row.get(index).and_then(&f)).collect()
}

/// Convert rows to an Arrow batch with the schema of `descriptor`.
pub fn rows_to_record_batch(descriptor: &TupleDescriptor, rows: &[Row]) -> Result<RecordBatch> {
    for row in rows {
        descriptor.check_row(row)?;
    }

    let schema = descriptor.to_arrow_schema();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(descriptor.column_count());

    for (i, column) in descriptor.columns().iter().enumerate() {
        let array: ArrayRef = match column.column_type {
            ColumnType::Bool => Arc::new(BooleanArray::from(collect_column(rows, i, |v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            }))),
            ColumnType::Int16 => Arc::new(Int16Array::from(collect_column(rows, i, |v| match v {
                Value::Int16(n) => Some(*n),
                _ => None,
            }))),
            ColumnType::Int32 => Arc::new(Int32Array::from(collect_column(rows, i, |v| match v {
                Value::Int32(n) => Some(*n),
                _ => None,
            }))),
            ColumnType::Int64 => Arc::new(Int64Array::from(collect_column(rows, i, |v| match v {
                Value::Int64(n) => Some(*n),
                _ => None,
            }))),
            ColumnType::Float32 => Arc::new(Float32Array::from(collect_column(rows, i, |v| match v {
                Value::Float32(n) => Some(*n),
                _ => None,
            }))),
            ColumnType::Float64 => Arc::new(Float64Array::from(collect_column(rows, i, |v| match v {
                Value::Float64(n) => Some(*n),
                _ => None,
            }))),
            ColumnType::Text | ColumnType::Json | ColumnType::Xml => {
                Arc::new(StringArray::from(collect_column(rows, i, |v| Some(v.to_text()))))
            }
            ColumnType::Bytea => {
                let values = collect_column(rows, i, |v| match v {
                    Value::Bytes(b) => Some(b.clone()),
                    _ => None,
                });
                Arc::new(BinaryArray::from_iter(values))
            }
            ColumnType::Date => Arc::new(Date32Array::from(collect_column(rows, i, |v| match v {
                Value::Date(d) => Some(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
                _ => None,
            }))),
            ColumnType::Timestamp => Arc::new(TimestampMicrosecondArray::from(collect_column(
                rows,
                i,
                |v| match v {
                    Value::Timestamp(ts) => Some(ts.and_utc().timestamp_micros()),
                    _ => None,
                },
            ))),
        };
        columns.push(array);
    }

    RecordBatch::try_new(schema, columns).map_err(|e| PipelineError::Data(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use chrono::NaiveDate;

    #[test]
    fn schema_round_trip_keeps_json_and_xml() {
        let descriptor = TupleDescriptor::parse("id:int8,doc:json,feed:xml,raw:bytea,day:date").unwrap();
        let schema = descriptor.to_arrow_schema();
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(3).data_type(), &DataType::Binary);
        assert_eq!(TupleDescriptor::from_arrow_schema(&schema).unwrap(), descriptor);
    }

    #[test]
    fn plain_arrow_schema_maps_by_type() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, true),
        ]);
        let descriptor = TupleDescriptor::from_arrow_schema(&schema).unwrap();
        assert_eq!(descriptor.column(0).column_type, ColumnType::Int32);
        assert_eq!(descriptor.column(1).column_type, ColumnType::Text);

        let unsupported = Schema::new(vec![Field::new("c", DataType::UInt8, true)]);
        assert!(TupleDescriptor::from_arrow_schema(&unsupported).is_err());
    }

    #[test]
    fn rows_become_columns() {
        let descriptor = TupleDescriptor::parse("id:int4,name:text,day:date").unwrap();
        let rows = vec![
            Row::new(vec![
                Some(Value::Int32(1)),
                Some(Value::Text("a".into())),
                Some(Value::Date(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap())),
            ]),
            Row::new(vec![Some(Value::Int32(2)), None, None]),
        ];
        let batch = rows_to_record_batch(&descriptor, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let ids = batch.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(ids.value(1), 2);
        let names = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "a");
        assert!(names.is_null(1));
        let days = batch.column(2).as_any().downcast_ref::<Date32Array>().unwrap();
        assert_eq!(days.value(0), 1);
    }

    #[test]
    fn mismatched_row_is_rejected() {
        let descriptor = TupleDescriptor::parse("id:int4").unwrap();
        let rows = vec![Row::new(vec![Some(Value::Text("x".into()))])];
        assert!(matches!(
            rows_to_record_batch(&descriptor, &rows),
            Err(PipelineError::Data(_))
        ));
    }
}
