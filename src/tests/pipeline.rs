//! End-to-end behaviour of the query pipeline with the concept embedder.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::catalog::{self, CategoryRecord};
use crate::config::Config;
use crate::display;
use crate::errors::SearchError;
use crate::semantic::cache::CachedEmbedder;
use crate::semantic::filter::filter;
use crate::semantic::index::CorpusIndex;
use crate::semantic::search::search;
use crate::semantic::{FastEmbedProvider, QueryOptions, SearchHit, SearchService, ServiceOptions};

use super::fakes::{write_catalog, ConceptProvider, SAMPLE_CATALOG};

fn sample_service() -> (SearchService, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_catalog(&tmp, SAMPLE_CATALOG);
    let service = SearchService::with_provider(
        ServiceOptions::for_catalog(path),
        Box::new(ConceptProvider::new()),
    );
    (service, tmp)
}

fn sample_index() -> CorpusIndex {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_catalog(&tmp, SAMPLE_CATALOG);
    let records = catalog::load(&path).unwrap().into_records();
    let embedder = CachedEmbedder::new(Box::new(ConceptProvider::new()));
    CorpusIndex::build(records, &embedder).unwrap()
}

const QUERIES: [&str; 6] = [
    "wheelchair",
    "help opening jars in the kitchen",
    "zipper",
    "shower seat",
    "something unrelated entirely",
    "Mobility > Walking > Rollators",
];

#[test]
fn test_ranked_hits_bounded_and_sorted() {
    let index = sample_index();

    for query in QUERIES {
        let vector = ConceptProvider::vector(query);
        for top_k in [0, 1, 3, 5, 10] {
            let hits = search(&vector, &index, top_k).unwrap();
            assert_eq!(hits.len(), top_k.min(index.len()));
            assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
            assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
        }
    }
}

#[test]
fn test_top_k_over_small_corpus() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_catalog(
        &tmp,
        "Full Path\nA > One\nB > Two\nC > Three\n",
    );
    let records = catalog::load(&path).unwrap().into_records();
    let embedder = CachedEmbedder::new(Box::new(ConceptProvider::new()));
    let index = CorpusIndex::build(records, &embedder).unwrap();

    let hits = search(&ConceptProvider::vector("one"), &index, 5).unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn test_embedding_cache_is_idempotent() {
    let provider = ConceptProvider::new();
    let calls = provider.call_counter();
    let embedder = CachedEmbedder::new(Box::new(provider));

    let first = embedder.embed("help opening jars").unwrap();
    let second = embedder.embed("help opening jars").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_threshold_monotonic() {
    let (service, _tmp) = sample_service();

    for query in QUERIES {
        let mut previous = usize::MAX;
        for step in 0..=20 {
            let threshold = step as f32 / 20.0;
            let hits = service
                .run_query_with(query, QueryOptions { top_k: Some(5), threshold: Some(threshold) })
                .unwrap();
            assert!(hits.len() <= previous, "{query} at {threshold}");
            assert!(hits.iter().all(|h| h.score > threshold));
            previous = hits.len();
        }
    }
}

#[test]
fn test_filter_after_search_keeps_rank_order() {
    let index = sample_index();
    let ranked = search(&ConceptProvider::vector("wheelchair in the kitchen"), &index, 5).unwrap();
    let kept = filter(ranked.clone(), 0.2);

    let ranked_paths: Vec<_> = ranked
        .iter()
        .filter(|h| h.score > 0.2)
        .map(|h| h.record.full_path.clone())
        .collect();
    let kept_paths: Vec<_> = kept.iter().map(|h| h.record.full_path.clone()).collect();
    assert_eq!(kept_paths, ranked_paths);
}

#[test]
fn test_exact_path_ranks_first() {
    let (service, _tmp) = sample_service();

    let hits = service.run_query("Bathing > Shower > Shower Chairs").unwrap();
    assert_eq!(hits[0].record.full_path, "Bathing > Shower > Shower Chairs");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert!(hits.iter().skip(1).all(|h| h.score <= hits[0].score));
}

const MOBILITY_AND_KITCHEN: &str = "Full Path\n\
    Mobility > Walking > Rollators\n\
    Domestic > Kitchen > Jar Openers\n";

/// Every hit, unfiltered, so weak matches stay visible.
const UNFILTERED: QueryOptions = QueryOptions {
    top_k: Some(5),
    threshold: Some(0.0),
};

fn score_of(hits: &[SearchHit], full_path: &str) -> Option<f32> {
    hits.iter()
        .find(|h| h.record.full_path == full_path)
        .map(|h| h.score)
}

#[test]
fn test_wheelchair_query_prefers_mobility() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_catalog(&tmp, MOBILITY_AND_KITCHEN);
    let service = SearchService::with_provider(
        ServiceOptions::for_catalog(&path),
        Box::new(ConceptProvider::new()),
    );

    let hits = service.run_query("wheelchair").unwrap();
    assert!(hits[0].record.full_path.starts_with("Mobility"));

    // a 0.0 threshold still drops zero scores, so rank the raw index too
    let records = catalog::load(&path).unwrap().into_records();
    let embedder = CachedEmbedder::new(Box::new(ConceptProvider::new()));
    let index = CorpusIndex::build(records, &embedder).unwrap();
    let ranked = search(&ConceptProvider::vector("wheelchair"), &index, 5).unwrap();

    assert!(ranked[0].record.full_path.starts_with("Mobility"));
    let mobility = score_of(&ranked, "Mobility > Walking > Rollators").unwrap();
    let kitchen = score_of(&ranked, "Domestic > Kitchen > Jar Openers").unwrap();
    assert!(mobility > kitchen);
}

#[test]
fn test_wheelchair_in_kitchen_still_prefers_mobility() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_catalog(&tmp, MOBILITY_AND_KITCHEN);
    let service = SearchService::with_provider(
        ServiceOptions::for_catalog(path),
        Box::new(ConceptProvider::new()),
    );

    // both entries score above zero, so both survive the filter
    let hits = service.run_query_with("wheelchair wheelchair kitchen", UNFILTERED).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].record.full_path.starts_with("Mobility"));

    let mobility = score_of(&hits, "Mobility > Walking > Rollators").unwrap();
    let kitchen = score_of(&hits, "Domestic > Kitchen > Jar Openers").unwrap();
    assert!(kitchen > 0.0);
    assert!(mobility > kitchen);
}

#[test]
fn test_high_threshold_yields_no_confident_match() {
    let (service, _tmp) = sample_service();

    let hits = service
        .run_query_with("kitchen help", QueryOptions { top_k: None, threshold: Some(0.99) })
        .unwrap();
    assert!(hits.is_empty());
    assert!(display::render_hits(&hits, 0.99).starts_with("No confident match"));

    // the same query does match at the default threshold
    let hits = service.run_query("kitchen help").unwrap();
    assert_eq!(hits[0].record.leaf_label, "Jar Openers");
}

#[test]
fn test_missing_catalog_from_config() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::load_with(tmp.path()).unwrap();
    config.catalog_path = tmp.path().join("Categorized_Product_List.csv");

    // the catalog is read before the model, so nothing is downloaded here
    let service = SearchService::from_config(&config);
    let err = service.run_query("wheelchair").unwrap_err();

    assert!(matches!(err, SearchError::DataLoad { .. }));
    assert!(err.to_string().contains("Categorized_Product_List.csv"));
    assert!(display::user_message(&err).contains("Categorized_Product_List.csv"));
    assert!(!service.is_initialized());
    assert!(service.model_name().is_none());
}

#[test]
fn test_catalog_matches_source_order() {
    let (service, _tmp) = sample_service();

    let records = service.catalog().unwrap();
    let expected = CategoryRecord {
        full_path: "Domestic > Kitchen > Jar Openers".to_string(),
        leaf_label: "Jar Openers".to_string(),
        group_label: "Domestic".to_string(),
    };
    assert_eq!(records.len(), 5);
    assert_eq!(records[2], expected);
}

#[test]
#[ignore = "requires model download"]
fn test_real_model_wheelchair_scenario() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_catalog(&tmp, MOBILITY_AND_KITCHEN);
    let provider = FastEmbedProvider::new("all-MiniLM-L6-v2", tmp.path().to_path_buf(), None).unwrap();
    let service = SearchService::with_provider(ServiceOptions::for_catalog(path), Box::new(provider));

    let hits = service.run_query_with("wheelchair", UNFILTERED).unwrap();

    assert!(hits[0].record.full_path.starts_with("Mobility"));
    let mobility = score_of(&hits, "Mobility > Walking > Rollators").unwrap();
    let kitchen = score_of(&hits, "Domestic > Kitchen > Jar Openers").unwrap();
    assert!(mobility > kitchen);
}
