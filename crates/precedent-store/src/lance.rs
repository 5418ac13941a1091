//! Embedded LanceDB index for case passages.
//!
//! One table, `case_passages`, holds the passage metadata columns plus a
//! `FixedSizeList<Float32, D>` vector column. Searches use cosine distance and
//! report similarity as `1 - distance`.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, FixedSizeListBuilder, Float32Array, Float32Builder, LargeStringArray,
    RecordBatchIterator, StringArray, StringBuilder, UInt32Array, UInt32Builder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase};
use precedent_core::PassageMetadata;
use tracing::{debug, info};

use crate::{IndexStats, MetadataFilter, StoreError, VectorIndex, VectorMatch, VectorRecord};

const PASSAGES_TABLE: &str = "case_passages";
const DISTANCE_COLUMN: &str = "_distance";

pub struct LanceIndex {
    db: lancedb::Connection,
    dim: usize,
}

impl LanceIndex {
    /// Connect to a LanceDB database at `path`, creating the directory if needed.
    pub async fn open(path: &Path, dim: usize) -> Result<Self, StoreError> {
        let uri = path
            .to_str()
            .ok_or_else(|| StoreError::Other("non-UTF8 database path".into()))?;
        let db = lancedb::connect(uri).execute().await?;
        Ok(Self { db, dim })
    }

    pub async fn table_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.db.table_names().execute().await?)
    }

    async fn passages(&self) -> Result<Option<lancedb::Table>, StoreError> {
        let names = self.table_names().await?;
        if !names.iter().any(|n| n == PASSAGES_TABLE) {
            return Ok(None);
        }
        Ok(Some(self.db.open_table(PASSAGES_TABLE).execute().await?))
    }

    fn schema(&self) -> Result<SchemaRef, StoreError> {
        let dim = i32::try_from(self.dim)
            .map_err(|_| StoreError::Other(format!("dimension {} too large", self.dim)))?;
        Ok(Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("case_name", DataType::Utf8, false),
            Field::new("court", DataType::Utf8, false),
            Field::new("date", DataType::Utf8, false),
            Field::new("citation", DataType::Utf8, false),
            Field::new("topic", DataType::Utf8, true),
            Field::new("chunk_id", DataType::UInt32, false),
            Field::new("total_chunks", DataType::UInt32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
                false,
            ),
        ])))
    }

    fn to_batch(&self, records: &[VectorRecord]) -> Result<RecordBatch, StoreError> {
        let schema = self.schema()?;
        let mut id = StringBuilder::new();
        let mut case_name = StringBuilder::new();
        let mut court = StringBuilder::new();
        let mut date = StringBuilder::new();
        let mut citation = StringBuilder::new();
        let mut topic = StringBuilder::new();
        let mut chunk_id = UInt32Builder::new();
        let mut total_chunks = UInt32Builder::new();
        let mut text = StringBuilder::new();
        let mut vector = FixedSizeListBuilder::new(Float32Builder::new(), self.dim as i32)
            .with_field(Arc::new(Field::new("item", DataType::Float32, true)));

        for r in records {
            if r.values.len() != self.dim {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dim,
                    actual: r.values.len(),
                });
            }
            let m = &r.metadata;
            id.append_value(&r.id);
            case_name.append_value(&m.case_name);
            court.append_value(&m.court);
            date.append_value(&m.date);
            citation.append_value(&m.citation);
            topic.append_option(m.topic.as_deref());
            chunk_id.append_value(m.chunk_index);
            total_chunks.append_value(m.total_chunks);
            text.append_value(&m.text);
            vector.values().append_slice(&r.values);
            vector.append(true);
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(id.finish()),
            Arc::new(case_name.finish()),
            Arc::new(court.finish()),
            Arc::new(date.finish()),
            Arc::new(citation.finish()),
            Arc::new(topic.finish()),
            Arc::new(chunk_id.finish()),
            Arc::new(total_chunks.finish()),
            Arc::new(text.finish()),
            Arc::new(vector.finish()),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let batch = self.to_batch(records)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.passages().await? {
            Some(table) => {
                let mut merge = table.merge_insert(&["id"]);
                merge
                    .when_matched_update_all(None)
                    .when_not_matched_insert_all();
                merge.execute(Box::new(reader)).await?;
                debug!(rows = records.len(), "merged passages");
            }
            None => {
                self.db
                    .create_table(PASSAGES_TABLE, Box::new(reader))
                    .execute()
                    .await?;
                info!(table = PASSAGES_TABLE, rows = records.len(), "created LanceDB table");
            }
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        if vector.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let Some(table) = self.passages().await? else {
            return Ok(vec![]);
        };

        let mut search = table
            .vector_search(vector)?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            search = search.only_if(f.to_sql()?);
        }
        let batches: Vec<RecordBatch> = search.execute().await?.try_collect().await?;

        let mut matches = Vec::new();
        for batch in &batches {
            matches.extend(matches_from_batch(batch)?);
        }
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(matches)
    }

    async fn describe_stats(&self) -> Result<IndexStats, StoreError> {
        let total_vectors = match self.passages().await? {
            Some(table) => table.count_rows(None).await? as u64,
            None => 0,
        };
        Ok(IndexStats {
            total_vectors,
            dimension: self.dim,
            fullness: 0.0,
        })
    }
}

fn matches_from_batch(batch: &RecordBatch) -> Result<Vec<VectorMatch>, StoreError> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .ok_or_else(|| StoreError::Other(format!("missing '{name}' column")))
    };
    let ids = column("id")?;
    let case_names = column("case_name")?;
    let courts = column("court")?;
    let dates = column("date")?;
    let citations = column("citation")?;
    let topics = column("topic")?;
    let texts = column("text")?;
    let chunk_ids = u32_column(column("chunk_id")?)?;
    let totals = u32_column(column("total_chunks")?)?;
    let distances = column(DISTANCE_COLUMN)?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| StoreError::Other("distance column is not Float32".into()))?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let distance = f64::from(distances.value(row));
        out.push(VectorMatch {
            id: get_string(ids.as_ref(), row).unwrap_or_default(),
            score: (1.0 - distance).clamp(0.0, 1.0),
            metadata: PassageMetadata {
                case_name: get_string(case_names.as_ref(), row).unwrap_or_default(),
                court: get_string(courts.as_ref(), row).unwrap_or_default(),
                date: get_string(dates.as_ref(), row).unwrap_or_default(),
                citation: get_string(citations.as_ref(), row).unwrap_or_default(),
                topic: get_string(topics.as_ref(), row),
                chunk_index: chunk_ids.value(row),
                total_chunks: totals.value(row),
                text: get_string(texts.as_ref(), row).unwrap_or_default(),
            },
        });
    }
    Ok(out)
}

fn u32_column(col: &ArrayRef) -> Result<&UInt32Array, StoreError> {
    col.as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| StoreError::Other("expected UInt32 column".into()))
}

fn get_string(col: &dyn Array, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    col.as_any()
        .downcast_ref::<StringArray>()
        .map(|arr| arr.value(row).to_string())
        .or_else(|| {
            col.as_any()
                .downcast_ref::<LargeStringArray>()
                .map(|arr| arr.value(row).to_string())
        })
}
