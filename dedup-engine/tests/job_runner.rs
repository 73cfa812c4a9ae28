//! End-to-end job runner scenarios against the in-memory repository.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use catalog_store::{
    CatalogRepository, DedupStatus, JobMode, JobPhase, JobStatus, MatchMethod, MemoryRepository,
    RawListing,
};
use dedup_engine::{
    CancelFlag, DedupConfig, DedupProgress, EngineError, JobRunner, ProgressSink, ThresholdOracle,
};
use embedding_service::DisabledVectorizer;

fn raw(source_id: i64, external_id: &str, name: &str, price: f64) -> RawListing {
    RawListing {
        id: 0,
        source_id,
        external_id: external_id.to_string(),
        external_url: None,
        name: name.to_string(),
        name_normalized: String::new(),
        brand_raw: Some("Apple".into()),
        category_raw: Some("Điện thoại".into()),
        price: (price > 0.0).then_some(price),
        original_price: None,
        discount_percent: None,
        image_url: Some("https://img.example/p.jpg".into()),
        images: Vec::new(),
        description: Some("Hàng chính hãng, nguyên seal".into()),
        rating: Some(4.6),
        review_count: Some(50),
        sold_count: None,
        available: true,
        specs: BTreeMap::new(),
        shop_id: None,
        dedup_status: DedupStatus::Pending,
        last_dedup_at: None,
    }
}

async fn seed_repo() -> Arc<MemoryRepository> {
    let repo = Arc::new(MemoryRepository::new());
    repo.add_source("tiki").await;
    repo.add_source("shopee").await;
    repo.add_source("lazada").await;
    repo.add_source("cellphones").await;
    repo.add_brand("Apple").await;
    repo.add_brand("Samsung").await;
    repo.add_brand("Sony").await;
    repo.add_category("Điện thoại").await;
    repo.add_category("Tai nghe").await;
    repo.add_category("Máy giặt").await;
    repo.add_category("Phụ kiện").await;
    repo
}

fn runner(repo: Arc<MemoryRepository>, cfg: DedupConfig) -> JobRunner {
    JobRunner::new(
        repo,
        Arc::new(DisabledVectorizer),
        Arc::new(ThresholdOracle::new()),
        cfg,
    )
}

#[derive(Default)]
struct Collecting(Mutex<Vec<DedupProgress>>);

impl ProgressSink for Collecting {
    fn emit(&self, progress: &DedupProgress) {
        self.0.lock().unwrap().push(progress.clone());
    }
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_store_completes_with_full_reduction() {
    let repo = seed_repo().await;
    let job = runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.phase, JobPhase::Done);
    assert_eq!(job.total_raw, 0);
    assert_eq!(job.canonical_created, 0);
    assert_eq!(job.reduction_rate, Some(1.0));
    assert!(repo.all_canonicals().await.unwrap().is_empty());
}

#[tokio::test]
async fn single_listing_becomes_one_single_source_canonical() {
    let repo = seed_repo().await;
    repo.add_raw(raw(1, "t-1", "iPhone 15 Pro Max 256GB Titanium Xanh Chính Hãng VN/A", 34_990_000.0))
        .await;

    let job = runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    assert_eq!(job.canonical_created, 1);
    assert_eq!(job.mappings_created, 1);
    let canonicals = repo.all_canonicals().await.unwrap();
    assert_eq!(canonicals.len(), 1);
    assert_eq!(canonicals[0].source_count, 1);
    let mappings = repo.mappings_for_canonical(canonicals[0].id).await.unwrap();
    assert_eq!(mappings.len(), 1);
}

#[tokio::test]
async fn identical_rows_differing_only_in_external_id_collapse() {
    let repo = seed_repo().await;
    let name = "iPhone 15 Pro Max 256GB Xanh Chính Hãng VN/A";
    for ext in ["sp-1", "sp-2", "sp-3"] {
        repo.add_raw(raw(2, ext, name, 34_990_000.0)).await;
    }

    let job = runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    assert_eq!(job.canonical_created, 1);
    let canonicals = repo.all_canonicals().await.unwrap();
    assert_eq!(canonicals.len(), 1);
    // The duplicate cluster keeps one mapping, pointed at the representative.
    let mappings = repo.mappings_for_canonical(canonicals[0].id).await.unwrap();
    assert_eq!(mappings.len(), 1);
    // Every raw row is processed regardless.
    assert_eq!(
        repo.count_raw_listings(Some(DedupStatus::Pending)).await.unwrap(),
        0
    );
}

// ---------------------------------------------------------------------------
// Scenario 1: iPhone cross-source fusion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn iphone_cross_source_fusion() {
    let repo = seed_repo().await;
    let mut tiki = raw(
        1,
        "t-1",
        "iPhone 15 Pro Max 256GB Titanium Xanh Chính Hãng VN/A",
        34_990_000.0,
    );
    tiki.review_count = Some(120);
    let mut shopee = raw(
        2,
        "s-1",
        "Điện Thoại iPhone 15 ProMax 256G Xanh — Chính Hãng Apple",
        35_500_000.0,
    );
    shopee.brand_raw = None;
    shopee.review_count = Some(80);
    let mut lazada = raw(
        3,
        "l-1",
        "Apple iPhone 15 Pro Max (256GB) — Blue Titanium",
        34_800_000.0,
    );
    lazada.review_count = Some(40);
    for listing in [tiki, shopee, lazada] {
        repo.add_raw(listing).await;
    }

    let job = runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    assert_eq!(job.canonical_created, 1);
    let canonicals = repo.all_canonicals().await.unwrap();
    assert_eq!(canonicals.len(), 1);
    let canonical = &canonicals[0];

    assert_eq!(canonical.source_count, 3);
    assert_eq!(canonical.min_price, Some(34_800_000.0));
    assert_eq!(canonical.max_price, Some(35_500_000.0));
    assert!(canonical.quality_score.unwrap() >= 60.0);
    assert_eq!(canonical.slug, "apple-15promax-256gb");

    let mappings = repo.mappings_for_canonical(canonical.id).await.unwrap();
    assert_eq!(mappings.len(), 3);
    for mapping in &mappings {
        assert!(
            matches!(
                mapping.matching_method,
                MatchMethod::CodeExtract | MatchMethod::ExactMatch
            ),
            "unexpected method {:?}",
            mapping.matching_method
        );
    }

    // Symmetric cross-source matrix with one count per source pair.
    let matrix = &job.cross_source_matrix;
    assert_eq!(matrix["tiki"]["shopee"], 1);
    assert_eq!(matrix["shopee"]["tiki"], 1);
    assert_eq!(matrix["shopee"]["lazada"], 1);
    assert_eq!(matrix["tiki"]["lazada"], 1);
    assert_eq!(repo.matching_pairs().await.len(), 3);
}

// ---------------------------------------------------------------------------
// Scenario 2: accessory rejection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accessories_never_merge_with_devices() {
    let repo = seed_repo().await;
    repo.add_raw(raw(1, "t-1", "Apple iPhone 16 Pro 128GB Chính Hãng VN/A", 30_990_000.0))
        .await;
    let mut case = raw(2, "s-1", "Ốp Lưng Sạc Từ Tính cho iPhone 16 Pro", 630_000.0);
    case.category_raw = Some("Phụ kiện".into());
    repo.add_raw(case).await;

    let job = runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    assert_eq!(job.canonical_created, 2);
    let canonicals = repo.all_canonicals().await.unwrap();
    assert_eq!(canonicals.len(), 2);
    for canonical in &canonicals {
        let mappings = repo.mappings_for_canonical(canonical.id).await.unwrap();
        assert_eq!(mappings.len(), 1, "no cross-mapping may exist");
    }
    assert!(repo.matching_pairs().await.is_empty());
}

// ---------------------------------------------------------------------------
// Scenario 3: variant split
// ---------------------------------------------------------------------------

fn variant_listing(source: i64, ext: &str, storage: &str, color: &str, price: f64, reviews: i64) -> RawListing {
    let mut listing = raw(
        source,
        ext,
        &format!("Điện Thoại Apple iPhone 15 Pro Max {storage} Chính Hãng VN/A Máy Đẹp Màu {color}"),
        price,
    );
    listing.review_count = Some(reviews);
    listing
}

#[tokio::test]
async fn variant_split_keeps_one_canonical_with_variant_rows() {
    let repo = seed_repo().await;
    repo.add_raw(variant_listing(1, "t-1", "128GB", "Xanh", 32_990_000.0, 10)).await;
    repo.add_raw(variant_listing(2, "s-1", "256GB", "Xanh", 34_990_000.0, 90)).await;
    repo.add_raw(variant_listing(3, "l-1", "256GB", "Đen", 34_990_000.0, 15)).await;
    repo.add_raw(variant_listing(4, "c-1", "512GB", "Xanh", 40_990_000.0, 5)).await;

    runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    let canonicals = repo.all_canonicals().await.unwrap();
    assert_eq!(canonicals.len(), 1);
    let canonical = &canonicals[0];
    assert_eq!(canonical.min_price, Some(32_990_000.0));
    assert_eq!(canonical.max_price, Some(40_990_000.0));

    let mappings = repo.mappings_for_canonical(canonical.id).await.unwrap();
    assert_eq!(mappings.len(), 4);

    let variants = repo.variants_for_canonical(canonical.id).await.unwrap();
    let keys: BTreeSet<String> = variants.iter().map(|v| v.variant_key.clone()).collect();
    let expected: BTreeSet<String> = [
        "128gb|base|blue",
        "256gb|base|blue",
        "256gb|base|black",
        "512gb|base|blue",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();
    assert_eq!(keys, expected);
}

// ---------------------------------------------------------------------------
// Scenario 4: intra-source duplicate collapse
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shopee_duplicates_collapse_to_the_representative() {
    let repo = seed_repo().await;
    let mut a = raw(
        2,
        "s-1",
        "Điện Thoại iPhone 15 Pro Max 256GB Xanh Chính Hãng VN/A",
        34_990_000.0,
    );
    a.shop_id = Some("shop-1".into());
    a.rating = Some(4.2);
    let mut b = raw(
        2,
        "s-2",
        "Điện Thoại iPhone 15 Pro Max 256GB Xanh Chính Hãng VN/A Mới",
        34_990_000.0,
    );
    b.shop_id = Some("shop-2".into());
    b.rating = Some(4.8);
    repo.add_raw(a).await;
    let rep_id = repo.add_raw(b).await;

    let job = runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    assert_eq!(job.canonical_created, 1);
    let canonicals = repo.all_canonicals().await.unwrap();
    let mappings = repo.mappings_for_canonical(canonicals[0].id).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].raw_id, rep_id, "mapping must target the better-rated row");
    assert_eq!(
        repo.count_raw_listings(Some(DedupStatus::Pending)).await.unwrap(),
        0
    );
}

// ---------------------------------------------------------------------------
// Scenario 5: adaptive thresholds by category
// ---------------------------------------------------------------------------

fn headphone_pair(category: &str) -> (RawListing, RawListing) {
    let mut a = raw(
        1,
        "t-1",
        "Tai nghe Bluetooth Sony WH 1000XM4 Chính Hãng",
        8_490_000.0,
    );
    a.brand_raw = Some("Sony".into());
    a.category_raw = Some(category.to_string());
    a.rating = None;
    a.review_count = None;
    let mut b = raw(
        2,
        "s-1",
        "Tai nghe Bluetooth Sony WH 1000XM5 Chính Hãng Mới",
        7_290_000.0,
    );
    b.brand_raw = Some("Sony".into());
    b.category_raw = Some(category.to_string());
    b.rating = None;
    b.review_count = None;
    (a, b)
}

#[tokio::test]
async fn borderline_pair_clusters_under_audio_but_not_appliance() {
    let cfg = DedupConfig {
        min_match_score: 0.70,
        ..DedupConfig::default()
    };

    // Category "tai nghe": threshold 0.72, the ~0.73 pair clusters.
    let audio_repo = seed_repo().await;
    let (a, b) = headphone_pair("Tai nghe");
    audio_repo.add_raw(a).await;
    audio_repo.add_raw(b).await;
    let job = runner(audio_repo.clone(), cfg.clone()).deduplicate().await.unwrap();
    assert_eq!(job.canonical_created, 1, "audio threshold should admit the pair");

    // Category "máy giặt": threshold 0.82, the same pair stays apart.
    let appliance_repo = seed_repo().await;
    let (a, b) = headphone_pair("Máy giặt");
    appliance_repo.add_raw(a).await;
    appliance_repo.add_raw(b).await;
    let job = runner(appliance_repo.clone(), cfg).deduplicate().await.unwrap();
    assert_eq!(job.canonical_created, 2, "appliance threshold should split the pair");
}

// ---------------------------------------------------------------------------
// Cross-source linking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cross_source_linking_attaches_unmapped_other_source_listings() {
    let repo = seed_repo().await;
    repo.add_raw(raw(1, "t-1", "iPhone 15 Pro Max 256GB Xanh Chính Hãng", 34_990_000.0))
        .await;
    runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    // A processed-but-unmapped Shopee observation from an earlier epoch.
    let mut orphan = raw(2, "s-9", "Điện Thoại iPhone 15 ProMax Xanh Chính Hãng", 34_500_000.0);
    orphan.dedup_status = DedupStatus::Processed;
    let orphan_id = repo.add_raw(orphan).await;

    let job = runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    let mapping = repo.mapping_for_raw(orphan_id).await.unwrap().unwrap();
    assert_eq!(mapping.matching_method, MatchMethod::CrossSource);

    let canonicals = repo.all_canonicals().await.unwrap();
    assert_eq!(canonicals.len(), 1);
    assert_eq!(canonicals[0].source_count, 2, "reconcile must count the new source");
    assert_eq!(job.cross_source_matrix["tiki"]["shopee"], 1);
}

// ---------------------------------------------------------------------------
// Idempotence and incremental no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn incremental_rerun_on_processed_store_is_a_no_op() {
    let repo = seed_repo().await;
    let mut tiki = raw(1, "t-1", "iPhone 15 Pro Max 256GB Titanium Xanh Chính Hãng VN/A", 34_990_000.0);
    tiki.review_count = Some(120);
    let mut shopee = raw(2, "s-1", "Điện Thoại iPhone 15 ProMax 256G Xanh — Chính Hãng Apple", 35_500_000.0);
    shopee.review_count = Some(80);
    let mut lazada = raw(3, "l-1", "Apple iPhone 15 Pro Max (256GB) — Blue Titanium", 34_800_000.0);
    lazada.review_count = Some(40);
    for listing in [tiki, shopee, lazada] {
        repo.add_raw(listing).await;
    }

    runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();
    let canonicals_before = repo.all_canonicals().await.unwrap();
    let history_before = repo
        .history_for_canonical(canonicals_before[0].id)
        .await
        .unwrap()
        .len();
    let pairs_before = repo.matching_pairs().await.len();

    let rerun = runner(repo.clone(), DedupConfig::default())
        .deduplicate()
        .await
        .unwrap();

    assert_eq!(rerun.total_raw, 0);
    assert_eq!(rerun.canonical_created, 0);
    assert_eq!(rerun.mappings_created, 0);
    let canonicals_after = repo.all_canonicals().await.unwrap();
    assert_eq!(canonicals_before.len(), canonicals_after.len());
    assert_eq!(
        repo.history_for_canonical(canonicals_after[0].id)
            .await
            .unwrap()
            .len(),
        history_before
    );
    assert_eq!(repo.matching_pairs().await.len(), pairs_before);
}

#[tokio::test]
async fn fresh_reruns_rebuild_the_same_catalog() {
    let repo = seed_repo().await;
    repo.add_raw(variant_listing(1, "t-1", "128GB", "Xanh", 32_990_000.0, 10)).await;
    repo.add_raw(variant_listing(2, "s-1", "256GB", "Xanh", 34_990_000.0, 90)).await;
    repo.add_raw(variant_listing(3, "l-1", "256GB", "Đen", 34_990_000.0, 15)).await;

    let cfg = DedupConfig {
        mode: JobMode::Fresh,
        ..DedupConfig::default()
    };

    let snapshot = |canonicals: Vec<catalog_store::Canonical>,
                    mappings: Vec<(String, i64)>,
                    variants: Vec<(String, String)>| {
        (
            canonicals.into_iter().map(|c| c.slug).collect::<BTreeSet<_>>(),
            mappings.into_iter().collect::<BTreeSet<_>>(),
            variants.into_iter().collect::<BTreeSet<_>>(),
        )
    };

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        runner(repo.clone(), cfg.clone()).deduplicate().await.unwrap();
        let canonicals = repo.all_canonicals().await.unwrap();
        let mut mappings = Vec::new();
        let mut variants = Vec::new();
        for c in &canonicals {
            for m in repo.mappings_for_canonical(c.id).await.unwrap() {
                mappings.push((c.slug.clone(), m.raw_id));
            }
            for v in repo.variants_for_canonical(c.id).await.unwrap() {
                variants.push((c.slug.clone(), v.variant_key));
            }
        }
        snapshots.push(snapshot(canonicals, mappings, variants));
    }
    assert_eq!(snapshots[0], snapshots[1]);
}

// ---------------------------------------------------------------------------
// Cancellation and progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_jobs_fail_without_consuming_the_store() {
    let repo = seed_repo().await;
    repo.add_raw(raw(1, "t-1", "iPhone 15 Pro Max 256GB", 34_990_000.0)).await;

    let r = runner(repo.clone(), DedupConfig::default());
    let flag: CancelFlag = r.cancel_flag();
    flag.cancel();

    let err = r.deduplicate().await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(
        repo.count_raw_listings(Some(DedupStatus::Pending)).await.unwrap(),
        1,
        "cancelled before the first batch, nothing may be consumed"
    );
}

#[tokio::test]
async fn progress_walks_the_phases_and_counts_everything() {
    let repo = seed_repo().await;
    repo.add_raw(raw(1, "t-1", "iPhone 15 Pro Max 256GB Xanh", 34_990_000.0)).await;
    let mut galaxy = raw(2, "s-1", "Samsung Galaxy S24 Ultra 12GB 256GB Xám", 28_990_000.0);
    galaxy.brand_raw = Some("Samsung".into());
    repo.add_raw(galaxy).await;

    let sink = Arc::new(Collecting::default());
    let job = runner(repo.clone(), DedupConfig::default())
        .with_progress(sink.clone())
        .deduplicate()
        .await
        .unwrap();

    let events = sink.0.lock().unwrap();
    assert!(!events.is_empty());
    assert_eq!(events[0].phase, JobPhase::Init);
    assert_eq!(events.last().unwrap().phase, JobPhase::Done);
    let phases: BTreeSet<_> = events.iter().map(|e| format!("{:?}", e.phase)).collect();
    assert!(phases.contains("Embedding"));
    assert!(phases.contains("Clustering"));

    let last = events.last().unwrap();
    assert_eq!(last.processed_products, 2);
    assert_eq!(last.total_products, 2);
    assert_eq!(last.total_sources, 4);
    assert_eq!(job.processed, 2);
    assert_eq!(job.source_breakdown["tiki"].processed, 1);
    assert_eq!(job.source_breakdown["shopee"].processed, 1);
}
