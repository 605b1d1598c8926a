//! Index mapping expected by the ingest records.
//!
//! Provisioning is done out of band; `pingest schema` prints this mapping so
//! it can be applied with the index's own tooling.

use serde_json::{json, Value};

/// Name of the k-NN vector field.
pub const VECTOR_FIELD: &str = "vector_embedding";

/// OpenSearch mapping for records with `dims`-dimensional embeddings.
///
/// `metadata.entities` is a keyword so it can be used as an exact-match
/// prefilter alongside vector similarity.
pub fn index_mapping(dims: usize) -> Value {
    json!({
        "settings": {
            "index": { "knn": true }
        },
        "mappings": {
            "properties": {
                VECTOR_FIELD: {
                    "type": "knn_vector",
                    "dimension": dims,
                    "method": {
                        "name": "hnsw",
                        "engine": "faiss",
                        "space_type": "l2",
                        "parameters": { "ef_construction": 512, "m": 16 }
                    }
                },
                "file_text": { "type": "text" },
                "file_path": { "type": "text" },
                "page_number": { "type": "keyword" },
                "metadata": {
                    "properties": {
                        "filename": { "type": "text" },
                        "entities": { "type": "keyword" }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_carries_dimension_and_field_types() {
        let mapping = index_mapping(1536);
        let props = &mapping["mappings"]["properties"];
        assert_eq!(props["vector_embedding"]["type"], "knn_vector");
        assert_eq!(props["vector_embedding"]["dimension"], 1536);
        assert_eq!(props["vector_embedding"]["method"]["name"], "hnsw");
        assert_eq!(props["page_number"]["type"], "keyword");
        assert_eq!(props["file_text"]["type"], "text");
        assert_eq!(props["metadata"]["properties"]["entities"]["type"], "keyword");
        assert_eq!(mapping["settings"]["index"]["knn"], true);
    }
}
