/// Data layer: core types, object retrieval, decoding, and filtering.
///
/// Architecture:
/// ```text
///  container / key  (.csv / .tsv / .parquet)
///        │
///        ▼
///   ┌──────────────┐
///   │ ObjectSource  │  fetch raw bytes (filesystem or in-memory)
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  decode bytes → Dataset, normalise timestamps
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ Dataset   │  Schema + Vec<Row>
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  apply AND-combined predicates → new Dataset
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod source;
