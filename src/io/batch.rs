use std::sync::Arc;

use arrow::array::{
    ArrayRef, Date32Builder, Float64Builder, Int32Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::bar::to_epoch_days;
use crate::error::{Error, Result};
use crate::feature::{ColumnKind, FeatureColumn, FeatureRow, FeatureValue};

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn for_column(column: FeatureColumn) -> Self {
        Self::new(column.name(), data_type_of(column.kind())).nullable(column.nullable())
    }
}

pub fn data_type_of(kind: ColumnKind) -> DataType {
    match kind {
        ColumnKind::Utf8 => DataType::Utf8,
        ColumnKind::Date => DataType::Date32,
        ColumnKind::Float64 => DataType::Float64,
        ColumnKind::Int64 => DataType::Int64,
        ColumnKind::Int32 => DataType::Int32,
    }
}

pub fn schema_for(columns: &[FeatureColumn]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|col| {
            let spec = ColumnSpec::for_column(*col);
            Field::new(&spec.name, spec.data_type, spec.nullable)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Accumulates feature rows into Arrow record batches.
pub struct RowBuffer {
    schema: SchemaRef,
    columns: Vec<FeatureColumn>,
    builders: Vec<ColumnBuilder>,
    row_count: usize,
    batch_size: usize,
}

impl RowBuffer {
    pub fn new(columns: &[FeatureColumn], batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".to_string()));
        }
        if columns.is_empty() {
            return Err(Error::Config("row buffer schema is empty".to_string()));
        }
        let builders = columns
            .iter()
            .map(|col| ColumnBuilder::new(col.kind(), batch_size))
            .collect();
        Ok(Self {
            schema: schema_for(columns),
            columns: columns.to_vec(),
            builders,
            row_count: 0,
            batch_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn should_flush(&self) -> bool {
        self.row_count >= self.batch_size
    }

    pub fn push_row(&mut self, row: &FeatureRow) -> Result<()> {
        for (column, builder) in self.columns.iter().zip(self.builders.iter_mut()) {
            builder.append(row.value(*column)).map_err(|value| Error::InvalidValue {
                column: column.name().to_string(),
                row: self.row_count,
                value,
            })?;
        }
        self.row_count = self.row_count.saturating_add(1);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<RecordBatch> {
        if self.row_count == 0 {
            return Err(Error::Config(
                "attempted to flush an empty RowBuffer".to_string(),
            ));
        }
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;
        self.row_count = 0;
        Ok(batch)
    }
}

enum ColumnBuilder {
    Utf8(StringBuilder),
    Date(Date32Builder),
    F64(Float64Builder),
    I64(Int64Builder),
    I32(Int32Builder),
}

impl ColumnBuilder {
    fn new(kind: ColumnKind, batch_size: usize) -> Self {
        match kind {
            ColumnKind::Utf8 => Self::Utf8(StringBuilder::with_capacity(batch_size, batch_size * 8)),
            ColumnKind::Date => Self::Date(Date32Builder::with_capacity(batch_size)),
            ColumnKind::Float64 => Self::F64(Float64Builder::with_capacity(batch_size)),
            ColumnKind::Int64 => Self::I64(Int64Builder::with_capacity(batch_size)),
            ColumnKind::Int32 => Self::I32(Int32Builder::with_capacity(batch_size)),
        }
    }

    /// Appends one cell; a value of the wrong kind is returned as text.
    fn append(&mut self, value: FeatureValue<'_>) -> std::result::Result<(), String> {
        match (self, value) {
            (ColumnBuilder::Utf8(b), FeatureValue::Null) => b.append_null(),
            (ColumnBuilder::Utf8(b), FeatureValue::Text(v)) => b.append_value(v),
            (ColumnBuilder::Date(b), FeatureValue::Null) => b.append_null(),
            (ColumnBuilder::Date(b), FeatureValue::Date(v)) => b.append_value(to_epoch_days(v)),
            (ColumnBuilder::F64(b), FeatureValue::Null) => b.append_null(),
            (ColumnBuilder::F64(b), FeatureValue::Float(v)) => b.append_value(v),
            (ColumnBuilder::I64(b), FeatureValue::Null) => b.append_null(),
            (ColumnBuilder::I64(b), FeatureValue::Int(v)) => b.append_value(v),
            (ColumnBuilder::I32(b), FeatureValue::Null) => b.append_null(),
            (ColumnBuilder::I32(b), FeatureValue::Int(v)) => {
                let v = i32::try_from(v).map_err(|_| v.to_string())?;
                b.append_value(v)
            }
            (_, other) => return Err(format!("{other:?}")),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Utf8(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Date(builder) => Arc::new(builder.finish()),
            ColumnBuilder::F64(builder) => Arc::new(builder.finish()),
            ColumnBuilder::I64(builder) => Arc::new(builder.finish()),
            ColumnBuilder::I32(builder) => Arc::new(builder.finish()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::{parse_date, Bar};
    use crate::derive::MarketTrend;
    use crate::feature::Features;
    use arrow::array::{Array, Int32Array, StringArray};

    fn row() -> FeatureRow {
        FeatureRow {
            bar: Bar::new("AAA", parse_date("2020-01-02").unwrap()).with_volume(Some(10)),
            features: Features {
                vol_trend_flag: Some(1),
                market_trend: Some(MarketTrend::Bearish),
                ..Features::default()
            },
        }
    }

    #[test]
    fn buffer_builds_nullable_batches() {
        let columns = [
            FeatureColumn::Symbol,
            FeatureColumn::Date,
            FeatureColumn::Volume,
            FeatureColumn::VolTrendFlag,
            FeatureColumn::MarketTrend,
            FeatureColumn::AdjCloseReturn,
        ];
        let mut buffer = RowBuffer::new(&columns, 2).unwrap();
        buffer.push_row(&row()).unwrap();
        assert!(!buffer.should_flush());
        buffer.push_row(&row()).unwrap();
        assert!(buffer.should_flush());

        let batch = buffer.flush().unwrap();
        assert!(buffer.is_empty());
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Date32);
        let flags = batch.column(3).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(flags.value(0), 1);
        let trend = batch.column(4).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(trend.value(1), "Bearish");
        assert_eq!(batch.column(5).null_count(), 2);
    }

    #[test]
    fn empty_flush_is_an_error() {
        let mut buffer = RowBuffer::new(&[FeatureColumn::Symbol], 4).unwrap();
        assert!(buffer.flush().is_err());
        assert!(RowBuffer::new(&[FeatureColumn::Symbol], 0).is_err());
    }
}
