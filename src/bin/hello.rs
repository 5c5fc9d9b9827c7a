//! End-to-end demo: create a collection, insert rows, index, search,
//! filter, paginate, delete, drop. Run with `RUST_LOG=vexdb=info` for the
//! engine's view of each step.

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_subscriber::EnvFilter;
use vexdb::{
    Config, ConsistencyLevel, Engine, FieldSchema, FieldType, IndexParams, Metric,
    CollectionSchema, SearchParams, Value,
};

const DIM: usize = 8;
const ROWS: usize = 3000;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let engine = Engine::open(config.clone())?;

    let schema = CollectionSchema::new(
        vec![
            FieldSchema::new("pk", FieldType::VarChar { max_length: 100 }).primary(),
            FieldSchema::new("random", FieldType::Double),
            FieldSchema::new("embeddings", FieldType::FloatVector { dim: DIM }),
        ],
        "hello_vexdb is the simplest demo to introduce the APIs",
    )?;
    let collection = engine.create_collection("hello_vexdb", schema, ConsistencyLevel::Strong)?;
    println!("created collection `{}`", collection.name());

    let mut rng = StdRng::seed_from_u64(19530);
    let vectors: Vec<Vec<f32>> = (0..ROWS)
        .map(|_| (0..DIM).map(|_| rng.gen::<f32>()).collect())
        .collect();
    let probe = vectors[ROWS - 1].clone();
    let rows: Vec<Vec<Value>> = vectors
        .into_iter()
        .enumerate()
        .map(|(i, vector)| {
            vec![
                Value::Str(i.to_string()),
                Value::Double(rng.gen()),
                Value::Vector(vector),
            ]
        })
        .collect();
    collection.insert(rows)?;
    collection.flush()?;
    println!("inserted and flushed, num_entities = {}", collection.num_entities()?);

    collection.create_index(
        "embeddings",
        Metric::L2,
        IndexParams {
            nlist: config.default_nlist,
        },
    )?;
    collection.load()?;

    let params = SearchParams {
        nprobe: 10.max(config.default_nprobe),
    };
    let hits = collection.search("embeddings", &[probe], params, 3, None, &["random"])?;
    println!("self-search top hits:");
    for hit in &hits[0] {
        println!("  pk={} distance={:.6} fields={:?}", hit.pk, hit.distance, hit.fields);
    }

    let page = collection.query("random > 0.5", &["random"], 0, Some(4))?;
    println!("query `random > 0.5` first page:");
    for row in &page {
        println!("  pk={} fields={:?}", row.pk, row.fields);
    }

    let filtered = collection.search(
        "embeddings",
        &[vec![0.5; DIM]],
        params,
        3,
        Some("random > 0.5"),
        &["random"],
    )?;
    println!("hybrid search returned {} hits", filtered[0].len());

    let deleted = collection.delete("pk in [\"0\", \"1\"]")?;
    println!("deleted {} rows", deleted);
    let after = collection.query("pk in [\"0\", \"1\"]", &[], 0, None)?;
    println!("query for deleted pks returned {} rows", after.len());

    engine.drop_collection("hello_vexdb")?;
    println!("dropped collection");
    Ok(())
}
