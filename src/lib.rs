pub mod config;
pub mod engine;
pub mod filter;
pub mod query;
pub mod schema;
pub mod segment;
pub mod vector;

pub use config::Config;
pub use engine::{
    CollectionHandle, ConsistencyLevel, Engine, EngineError, IndexParams, IndexType,
};
pub use query::{QueryRow, SearchHit, SearchParams};
pub use schema::{CollectionSchema, FieldSchema, FieldType, SchemaError, Value};
pub use vector::Metric;
