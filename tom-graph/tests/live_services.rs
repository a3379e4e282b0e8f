//! Against real services. Run with `--features live-tests` and a configured
//! `TOM_LLM_API_KEY` plus a local embedding server.

#![cfg(feature = "live-tests")]

use tom_core::{Config, ModelTier};
use tom_graph::{Embedder, EmbeddingClient, Extractor, OpenAiCompatibleClient};

#[tokio::test]
async fn test_embedding_live() {
    let settings = tom_core::GraphSettings::default();
    let client = EmbeddingClient::new(&settings).expect("embedding client");
    let inputs = vec!["asthma".to_string(), "condition: asthma".to_string()];

    let embeddings = client.embed_batch(&inputs).await.expect("embedding request");
    assert_eq!(embeddings.len(), inputs.len());
    let dim = embeddings[0].len();
    assert!(dim > 0);
    assert!(embeddings.iter().all(|vec| vec.len() == dim));
}

#[tokio::test]
async fn test_extraction_live() {
    tom_core::load_dotenv();
    let config = Config::load().expect("Failed to load config for live tests");
    let settings = config.graph_settings();
    let llm = OpenAiCompatibleClient::from_settings(
        &settings,
        config.llm_api_key().map(str::to_string),
    )
    .expect("llm client");
    let extractor = Extractor::new(std::sync::Arc::new(llm));

    let text = "Albuterol relieves wheezing caused by asthma.";
    let entities = extractor
        .extract_entities(text, ModelTier::Fast)
        .await
        .expect("entity extraction");
    assert!(entities.iter().any(|e| e.eid.contains("asthma")));

    let relations = extractor
        .extract_relations(text, &entities, ModelTier::Fast)
        .await
        .expect("relation extraction");
    let eids: Vec<_> = entities.iter().map(|e| e.eid.as_str()).collect();
    assert!(relations
        .iter()
        .all(|r| eids.contains(&r.source_eid.as_str()) && eids.contains(&r.dest_eid.as_str())));
}
