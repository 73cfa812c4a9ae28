//! The dedup job runner.
//!
//! One job is one pull pipeline over the raw store:
//!
//! 1. **Init** — load sources, count pending work, create the job row
//!    (fresh mode first drops all derived state and re-pends every listing).
//! 2. **Batch loop** — per batch: intra-source collapse, batch embedding,
//!    primary-key blocking, adaptive-threshold clustering, canonical
//!    find-or-create with mappings/variants/quality/history, pair evidence,
//!    mark processed. Checkpoints the job row every five batches.
//! 3. **Cross-source linking** — attach other-source raw listings to
//!    single-source canonicals on extracted-code similarity alone.
//! 4. **Reconcile** — recompute `source_count` from live mappings.
//! 5. **Finalize** — totals, matrix, reduction rate.
//!
//! Cancellation is polled at the top of every batch iteration and before
//! each candidate fetch; writes are idempotent, so a cancelled or crashed
//! job re-runs to the same catalog.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use catalog_store::bounds::{
    MAX_DESCRIPTION_LEN, MAX_IMAGE_URL_LEN, MAX_NAME_LEN, MAX_SLUG_LEN, clamp_images,
    truncate_chars,
};
use catalog_store::{
    Canonical, CatalogRepository, DedupStatus, HistoryEvent, Job, JobMode, JobPhase, JobStatus,
    Mapping, MatchMethod, MatchingPair, RawListing, StoreError, TriggerSource, Variant,
};
use embedding_service::Vectorizer;
use match_core::normalize::char_prefix;
use match_core::{compare, extract, to_canonical_code};

use crate::cluster::{Cluster, cluster_block};
use crate::collapse::collapse_source;
use crate::config::DedupConfig;
use crate::errors::{EngineError, EngineResult};
use crate::features::ListingFeatures;
use crate::history::{HistoryLog, diff};
use crate::progress::{DedupProgress, NoopProgress, ProgressSink, RecentMatch};
use crate::quality::assess;
use crate::retry::with_retries;
use crate::review::{DubiousPair, ReviewQueue};
use crate::scoring::PairScorer;
use crate::thresholds::ThresholdOracle;
use crate::variants::{detect_variants, select_main};

/// Cooperative cancellation handle; cheap to clone across tasks.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Consecutive non-transient failures a single phase tolerates.
const CIRCUIT_LIMIT: u32 = 3;
/// Job-row checkpoint interval, in batches.
const CHECKPOINT_EVERY: u64 = 5;
/// Ring-buffer capacity for `recent_matches`.
const RECENT_CAP: usize = 10;

/// Mutable per-run bookkeeping, owned by the orchestrator task.
pub(crate) struct RunState {
    pub job: Job,
    pub started: Instant,
    pub source_names: BTreeMap<i64, String>,
    pub sources_seen: BTreeSet<i64>,
    pub current_source: Option<String>,
    pub recent: VecDeque<RecentMatch>,
    pub matches_found: u64,
    pub total_batches: u64,
    pub batch_index: u64,
}

impl RunState {
    pub fn source_name(&self, id: i64) -> String {
        self.source_names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("source-{id}"))
    }

    /// Symmetric matrix bump for one cross-source match.
    pub fn bump_matrix(&mut self, a: &str, b: &str) {
        *self
            .job
            .cross_source_matrix
            .entry(a.to_string())
            .or_default()
            .entry(b.to_string())
            .or_default() += 1;
        *self
            .job
            .cross_source_matrix
            .entry(b.to_string())
            .or_default()
            .entry(a.to_string())
            .or_default() += 1;
    }

    pub fn push_recent(&mut self, m: RecentMatch) {
        self.recent.push_back(m);
        while self.recent.len() > RECENT_CAP {
            self.recent.pop_front();
        }
    }
}

/// Orchestrator for one deduplication job.
pub struct JobRunner {
    pub(crate) repo: Arc<dyn CatalogRepository>,
    pub(crate) vectorizer: Arc<dyn Vectorizer>,
    pub(crate) oracle: Arc<ThresholdOracle>,
    pub(crate) scorer: PairScorer,
    pub(crate) history: HistoryLog,
    pub(crate) reviews: ReviewQueue,
    pub(crate) sink: Arc<dyn ProgressSink>,
    pub(crate) cancel: CancelFlag,
    pub(crate) cfg: DedupConfig,
}

impl JobRunner {
    pub fn new(
        repo: Arc<dyn CatalogRepository>,
        vectorizer: Arc<dyn Vectorizer>,
        oracle: Arc<ThresholdOracle>,
        cfg: DedupConfig,
    ) -> Self {
        Self {
            history: HistoryLog::new(repo.clone()),
            reviews: ReviewQueue::new(repo.clone()),
            repo,
            vectorizer,
            oracle,
            scorer: PairScorer::new(),
            sink: Arc::new(NoopProgress),
            cancel: CancelFlag::default(),
            cfg,
        }
    }

    /// Attach a progress sink.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Handle callers can use to cancel the running job.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run one full deduplication job. Any failure (including cancellation)
    /// finalizes the job row as failed before propagating.
    pub async fn deduplicate(&self) -> EngineResult<Job> {
        let mut state = self.init().await?;

        match self.run_phases(&mut state).await {
            Ok(()) => {
                self.finalize(&mut state).await?;
                Ok(state.job)
            }
            Err(e) => {
                state.job.status = JobStatus::Failed;
                state.job.phase = JobPhase::Error;
                state.job.error_message = Some(e.to_string());
                state.job.finished_at = Some(Utc::now());
                if let Err(save) = self.repo.update_job(&state.job).await {
                    warn!("job {}: failed to persist failure state: {save}", state.job.id);
                }
                self.emit(&state);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase 1: init (and fresh-mode cleanup)
    // ------------------------------------------------------------------

    async fn init(&self) -> EngineResult<RunState> {
        let sources = with_retries("list_active_sources", || self.repo.list_active_sources())
            .await?;
        let source_names: BTreeMap<i64, String> =
            sources.iter().map(|s| (s.id, s.name.clone())).collect();

        if self.cfg.mode == JobMode::Fresh {
            info!("fresh mode: dropping derived state and re-pending raw listings");
            with_retries("delete_derived", || self.repo.delete_derived()).await?;
            with_retries("reset_dedup_status", || self.repo.reset_dedup_status()).await?;
        }

        let total = with_retries("count_raw_listings", || {
            self.repo.count_raw_listings(Some(DedupStatus::Pending))
        })
        .await?;

        let batch = self.cfg.batch_size.max(1) as u64;
        let job = Job {
            id: Uuid::new_v4().to_string(),
            mode: self.cfg.mode,
            status: JobStatus::Running,
            phase: JobPhase::Init,
            total_raw: total,
            processed: 0,
            canonical_created: 0,
            mappings_created: 0,
            source_breakdown: source_names
                .values()
                .map(|name| (name.clone(), Default::default()))
                .collect(),
            cross_source_matrix: BTreeMap::new(),
            reduction_rate: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.repo.create_job(&job).await?;
        info!(
            "job {}: {:?} over {} pending listings ({} sources)",
            job.id,
            job.mode,
            total,
            source_names.len()
        );

        let state = RunState {
            job,
            started: Instant::now(),
            source_names,
            sources_seen: BTreeSet::new(),
            current_source: None,
            recent: VecDeque::new(),
            matches_found: 0,
            total_batches: total.div_ceil(batch),
            batch_index: 0,
        };
        self.emit(&state);
        Ok(state)
    }

    async fn run_phases(&self, state: &mut RunState) -> EngineResult<()> {
        self.batch_loop(state).await?;

        if self.cfg.cross_source_enabled {
            self.set_phase(state, JobPhase::Matching);
            super::cross_source::link(self, state).await?;
        }

        self.set_phase(state, JobPhase::Saving);
        self.reconcile_source_counts(state).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 3: batch loop
    // ------------------------------------------------------------------

    async fn batch_loop(&self, state: &mut RunState) -> EngineResult<()> {
        let mut consecutive_errors = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let batch = with_retries("fetch_raw_batch", || {
                self.repo
                    .fetch_raw_batch(Some(DedupStatus::Pending), self.cfg.batch_size)
            })
            .await?;
            if batch.is_empty() {
                break;
            }
            state.batch_index += 1;
            let raw_ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
            let current_source = batch.first().map(|r| state.source_name(r.source_id));
            state.current_source = current_source;

            self.set_phase(state, JobPhase::Embedding);
            let features = self.prepare_features(batch).await;

            self.set_phase(state, JobPhase::Clustering);
            let blocks = block_by_primary_key(&features);
            for (key, indexes) in blocks {
                debug!(
                    "batch {}: block '{key}' with {} listings",
                    state.batch_index,
                    indexes.len()
                );
                let block: Vec<&ListingFeatures> =
                    indexes.iter().map(|i| &features[*i]).collect();

                let category = block[0].raw.category_raw.as_deref();
                let threshold = self
                    .cfg
                    .min_match_score
                    .max(self.oracle.threshold_for(category, None).await);
                let (clusters, rejected) = cluster_block(&block, &self.scorer, threshold);

                let dubious: Vec<DubiousPair> = rejected
                    .iter()
                    .map(|r| DubiousPair {
                        raw_1: block[r.left].raw.id,
                        raw_2: block[r.right].raw.id,
                        score: r.score.score,
                        method: r.score.method,
                    })
                    .collect();
                if let Err(e) = self.reviews.flag_dubious_matches(&dubious, threshold).await {
                    warn!("dubious-match flagging failed: {e}");
                }

                for cluster in clusters {
                    match self.persist_cluster(state, &block, &cluster).await {
                        Ok(()) => consecutive_errors = 0,
                        Err(EngineError::Store(e)) => {
                            consecutive_errors += 1;
                            warn!(
                                "cluster persist failed ({consecutive_errors}/{CIRCUIT_LIMIT}): {e}"
                            );
                            if consecutive_errors >= CIRCUIT_LIMIT {
                                return Err(EngineError::CircuitBroken {
                                    phase: "clustering",
                                    count: consecutive_errors,
                                });
                            }
                        }
                        Err(other) => return Err(other),
                    }
                }
            }

            with_retries("mark_raw_processed", || {
                self.repo.mark_raw_processed(&raw_ids, Utc::now())
            })
            .await?;
            state.job.processed += raw_ids.len() as u64;
            for id in features.iter().map(|f| f.raw.source_id) {
                state.sources_seen.insert(id);
            }
            for f in &features {
                let name = state.source_name(f.raw.source_id);
                let stat = state.job.source_breakdown.entry(name).or_default();
                stat.processed += 1 + f.duplicate_ids.len() as u64;
            }

            if state.batch_index % CHECKPOINT_EVERY == 0 {
                with_retries("update_job", || self.repo.update_job(&state.job)).await?;
                debug!("job {}: checkpoint at batch {}", state.job.id, state.batch_index);
            }
            self.emit(state);
        }
        Ok(())
    }

    /// Intra-source collapse, embedding, and feature derivation for a batch.
    async fn prepare_features(&self, batch: Vec<RawListing>) -> Vec<ListingFeatures> {
        let mut by_source: BTreeMap<i64, Vec<RawListing>> = BTreeMap::new();
        for listing in batch {
            by_source.entry(listing.source_id).or_default().push(listing);
        }

        let mut features: Vec<ListingFeatures> = by_source
            .into_values()
            .flat_map(|partition| {
                collapse_source(partition, &self.cfg.intra_source, &Default::default())
            })
            .map(ListingFeatures::from_collapsed)
            .collect();

        if self.cfg.embedding_enabled && self.vectorizer.enabled() {
            let texts: Vec<String> = features.iter().map(|f| f.name_normalized.clone()).collect();
            let vectors = self.vectorizer.embed_documents(&texts).await;
            for (feature, vector) in features.iter_mut().zip(vectors) {
                feature.embedding = vector;
            }
        }
        features
    }

    // ------------------------------------------------------------------
    // Cluster persistence: find-or-create canonical, mappings, variants,
    // quality, history, pair evidence
    // ------------------------------------------------------------------

    async fn persist_cluster(
        &self,
        state: &mut RunState,
        block: &[&ListingFeatures],
        cluster: &Cluster,
    ) -> EngineResult<()> {
        let members: Vec<&ListingFeatures> =
            cluster.members.iter().map(|m| block[m.index]).collect();
        let main_idx = select_main(&members);
        let main = members[main_idx];
        let slug = slug_for(main);

        let existing = self.find_existing_canonical(&slug, main).await?;
        let canonical_id = match existing {
            Some(canonical) => {
                self.attach_to_canonical(state, canonical, &members).await?
            }
            None => match self.create_canonical(state, &members, cluster, main_idx, &slug).await {
                Ok(id) => id,
                Err(EngineError::Store(StoreError::SlugConflict(slug))) => {
                    // Lost the slug race: re-read once and attach.
                    match with_retries("find_canonical_by_slug", || {
                        self.repo.find_canonical_by_slug(&slug)
                    })
                    .await?
                    {
                        Some(canonical) => {
                            self.attach_to_canonical(state, canonical, &members).await?
                        }
                        None => {
                            self.flag_unpersistable(&members, &slug).await;
                            return Ok(());
                        }
                    }
                }
                Err(EngineError::Consistency(detail)) => {
                    warn!("cluster dropped on consistency error: {detail}");
                    self.flag_unpersistable(&members, &slug).await;
                    return Ok(());
                }
                Err(other) => return Err(other),
            },
        };

        self.record_pair_evidence(state, &members, canonical_id)
            .await?;
        Ok(())
    }

    /// Slug lookup first; fall back to a normalized-name prefix scan
    /// filtered by extracted-code similarity.
    async fn find_existing_canonical(
        &self,
        slug: &str,
        main: &ListingFeatures,
    ) -> EngineResult<Option<Canonical>> {
        if let Some(hit) = with_retries("find_canonical_by_slug", || {
            self.repo.find_canonical_by_slug(slug)
        })
        .await?
        {
            return Ok(Some(hit));
        }

        let prefix = char_prefix(&main.name_normalized, 30);
        if prefix.is_empty() {
            return Ok(None);
        }
        let candidates = with_retries("find_canonicals_by_name_prefix", || {
            self.repo.find_canonicals_by_name_prefix(prefix, 10)
        })
        .await?;
        Ok(candidates.into_iter().find(|c| {
            let code = extract(&c.name);
            // Brand alone makes compare() degenerate to 1.0; demand real
            // overlap before adopting a same-prefix canonical.
            codes_share_enough(&code, &main.code) && compare(&code, &main.code) >= 0.80
        }))
    }

    /// Attach a cluster to an existing canonical with fixed method/confidence,
    /// then refresh aggregates and variants from the full mapping set.
    async fn attach_to_canonical(
        &self,
        state: &mut RunState,
        canonical: Canonical,
        members: &[&ListingFeatures],
    ) -> EngineResult<i64> {
        let before = with_retries("mappings_for_canonical", || {
            self.repo.mappings_for_canonical(canonical.id)
        })
        .await?
        .len() as u64;

        let mut added = 0u64;
        for member in members {
            let mapping = Mapping {
                canonical_id: canonical.id,
                raw_id: member.raw.id,
                source_id: member.raw.source_id,
                confidence_score: 0.85,
                matching_method: MatchMethod::MlClassifier,
                created_at: Utc::now(),
            };
            if with_retries("upsert_mapping", || self.repo.upsert_mapping(&mapping)).await? {
                added += 1;
                let name = state.source_name(member.raw.source_id);
                state.job.source_breakdown.entry(name).or_default().matched += 1;
            }
        }

        if added > 0 {
            state.job.mappings_created += added;
            self.refresh_canonical(canonical.id).await?;
            let changes = diff(&[(
                "mapping_count",
                json!(before),
                json!(before + added),
            )]);
            if let Err(EngineError::Consistency(detail)) = self
                .history
                .track_change(
                    canonical.id,
                    HistoryEvent::Updated,
                    changes,
                    TriggerSource::AutoDedup,
                    None,
                )
                .await
            {
                self.flag_history_conflict(canonical.id, &detail).await;
            }
            debug!(
                "canonical {}: attached {added} new mappings",
                canonical.id
            );
        }
        Ok(canonical.id)
    }

    /// Create a canonical from the cluster's best raw listing.
    async fn create_canonical(
        &self,
        state: &mut RunState,
        members: &[&ListingFeatures],
        cluster: &Cluster,
        main_idx: usize,
        slug: &str,
    ) -> EngineResult<i64> {
        let main = members[main_idx];
        let now = Utc::now();

        let prices: Vec<f64> = members
            .iter()
            .filter_map(|m| m.raw.price)
            .filter(|p| *p > 0.0)
            .collect();
        let ratings: Vec<f64> = members.iter().filter_map(|m| m.raw.rating).collect();
        let sources: BTreeSet<i64> = members.iter().map(|m| m.raw.source_id).collect();

        let brand_name = main
            .code
            .brand
            .clone()
            .or_else(|| main.raw.brand_raw.clone());
        let brand_id = match &brand_name {
            Some(name) => {
                with_retries("resolve_brand_id", || self.repo.resolve_brand_id(name)).await?
            }
            None => None,
        };
        let category_id = match main.raw.category_raw.as_deref() {
            Some(name) => {
                with_retries("resolve_category_id", || {
                    self.repo.resolve_category_id(name)
                })
                .await?
            }
            None => None,
        };

        let mut images = main.raw.images.clone();
        clamp_images(&mut images);

        let mut canonical = Canonical {
            id: 0,
            name: truncate_chars(&main.raw.name, MAX_NAME_LEN),
            name_normalized: truncate_chars(&main.name_normalized, MAX_NAME_LEN),
            slug: truncate_chars(slug, MAX_SLUG_LEN),
            brand_id,
            category_id,
            description: main
                .raw
                .description
                .as_deref()
                .map(|d| truncate_chars(d, MAX_DESCRIPTION_LEN)),
            image_url: main
                .raw
                .image_url
                .as_deref()
                .map(|u| truncate_chars(u, MAX_IMAGE_URL_LEN)),
            images,
            canonical_specs: main.raw.specs.clone(),
            min_price: prices.iter().cloned().reduce(f64::min),
            max_price: prices.iter().cloned().reduce(f64::max),
            avg_rating: (!ratings.is_empty())
                .then(|| ratings.iter().sum::<f64>() / ratings.len() as f64),
            total_reviews: members.iter().filter_map(|m| m.raw.review_count).sum(),
            source_count: sources.len() as i64,
            quality_score: None,
            quality_issues: Vec::new(),
            needs_review: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let id = with_retries("insert_canonical", || self.repo.insert_canonical(&canonical))
            .await?;
        canonical.id = id;

        let mut added = 0u64;
        for (member, cm) in members.iter().zip(&cluster.members) {
            let method = match &cm.seed_score {
                Some(score) => score.method,
                None => MatchMethod::ExactMatch,
            };
            let mapping = Mapping {
                canonical_id: id,
                raw_id: member.raw.id,
                source_id: member.raw.source_id,
                confidence_score: 0.90,
                matching_method: method,
                created_at: now,
            };
            if with_retries("upsert_mapping", || self.repo.upsert_mapping(&mapping)).await? {
                added += 1;
                if members.len() > 1 {
                    let name = state.source_name(member.raw.source_id);
                    state.job.source_breakdown.entry(name).or_default().matched += 1;
                }
            }
        }

        for draft in detect_variants(members) {
            let variant = Variant {
                canonical_id: id,
                variant_key: draft.key,
                storage_gb: draft.storage_gb,
                ram_gb: draft.ram_gb,
                color: draft.color,
                min_price: draft.min_price,
                max_price: draft.max_price,
                raw_ids: draft.raw_ids,
            };
            with_retries("upsert_variant", || self.repo.upsert_variant(&variant)).await?;
        }

        let report = assess(members, &canonical);
        canonical.quality_score = Some(report.score);
        canonical.quality_issues = report.issues.clone();
        canonical.needs_review = report.needs_review;
        with_retries("update_canonical", || self.repo.update_canonical(&canonical)).await?;
        if report.needs_review {
            if let Err(e) = self
                .reviews
                .flag_quality_issues(id, report.score, &report.issues)
                .await
            {
                warn!("quality flagging failed for canonical {id}: {e}");
            }
        }

        let changes = diff(&[
            ("name", Value::Null, json!(canonical.name)),
            ("slug", Value::Null, json!(canonical.slug)),
            ("min_price", Value::Null, json!(canonical.min_price)),
            ("max_price", Value::Null, json!(canonical.max_price)),
            ("source_count", Value::Null, json!(canonical.source_count)),
        ]);
        if let Err(EngineError::Consistency(detail)) = self
            .history
            .track_change(id, HistoryEvent::Created, changes, TriggerSource::AutoDedup, None)
            .await
        {
            self.flag_history_conflict(id, &detail).await;
        }

        state.job.canonical_created += 1;
        state.job.mappings_created += added;
        debug!(
            "canonical {id} created from cluster of {} ({} mappings)",
            members.len(),
            added
        );
        Ok(id)
    }

    /// Recompute aggregates and variants from the full mapping set. Used
    /// after attaching so late-arriving sources extend prices and variants.
    async fn refresh_canonical(&self, canonical_id: i64) -> EngineResult<()> {
        let mappings = with_retries("mappings_for_canonical", || {
            self.repo.mappings_for_canonical(canonical_id)
        })
        .await?;
        let raw_ids: Vec<i64> = mappings.iter().map(|m| m.raw_id).collect();
        let raws = with_retries("get_raw_listings", || self.repo.get_raw_listings(&raw_ids))
            .await?;
        let mut canonical = with_retries("get_canonical", || self.repo.get_canonical(canonical_id))
            .await?
            .ok_or_else(|| {
                EngineError::Store(StoreError::NotFound(format!("canonical {canonical_id}")))
            })?;

        let features: Vec<ListingFeatures> = raws
            .into_iter()
            .map(|raw| ListingFeatures::from_collapsed(crate::collapse::CollapsedListing::single(raw)))
            .collect();
        let refs: Vec<&ListingFeatures> = features.iter().collect();

        let prices: Vec<f64> = refs
            .iter()
            .filter_map(|f| f.raw.price)
            .filter(|p| *p > 0.0)
            .collect();
        let ratings: Vec<f64> = refs.iter().filter_map(|f| f.raw.rating).collect();
        canonical.min_price = prices.iter().cloned().reduce(f64::min);
        canonical.max_price = prices.iter().cloned().reduce(f64::max);
        canonical.avg_rating =
            (!ratings.is_empty()).then(|| ratings.iter().sum::<f64>() / ratings.len() as f64);
        canonical.total_reviews = refs.iter().filter_map(|f| f.raw.review_count).sum();
        canonical.source_count = refs
            .iter()
            .map(|f| f.raw.source_id)
            .collect::<BTreeSet<_>>()
            .len() as i64;
        canonical.updated_at = Utc::now();
        with_retries("update_canonical", || self.repo.update_canonical(&canonical)).await?;

        for draft in detect_variants(&refs) {
            let variant = Variant {
                canonical_id,
                variant_key: draft.key,
                storage_gb: draft.storage_gb,
                ram_gb: draft.ram_gb,
                color: draft.color,
                min_price: draft.min_price,
                max_price: draft.max_price,
                raw_ids: draft.raw_ids,
            };
            with_retries("upsert_variant", || self.repo.upsert_variant(&variant)).await?;
        }
        Ok(())
    }

    /// Insert matching-pair evidence for every cross-source pair in the
    /// cluster and feed the matrix and the recent-match ring.
    async fn record_pair_evidence(
        &self,
        state: &mut RunState,
        members: &[&ListingFeatures],
        canonical_id: i64,
    ) -> EngineResult<()> {
        if members.len() < 2 {
            return Ok(());
        }
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let (a, b) = (members[i], members[j]);
                if a.raw.source_id == b.raw.source_id {
                    continue;
                }
                let score = self.scorer.score(a, b);
                let pair = MatchingPair {
                    job_id: state.job.id.clone(),
                    raw_1: a.raw.id,
                    raw_2: b.raw.id,
                    source_1: a.raw.source_id,
                    source_2: b.raw.source_id,
                    match_score: score.score,
                    match_method: score.method,
                    canonical_id: Some(canonical_id),
                };
                with_retries("insert_matching_pair", || {
                    self.repo.insert_matching_pair(&pair)
                })
                .await?;

                let (name_a, name_b) = (
                    state.source_name(a.raw.source_id),
                    state.source_name(b.raw.source_id),
                );
                state.bump_matrix(&name_a, &name_b);
                state.matches_found += 1;
                state.push_recent(RecentMatch {
                    raw_1: a.raw.id,
                    raw_2: b.raw.id,
                    source_1: name_a,
                    source_2: name_b,
                    score: score.score,
                    method: score.method,
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 5/6: reconcile and finalize
    // ------------------------------------------------------------------

    async fn reconcile_source_counts(&self, _state: &mut RunState) -> EngineResult<()> {
        let canonicals = with_retries("all_canonicals", || self.repo.all_canonicals()).await?;
        for mut canonical in canonicals {
            let mappings = with_retries("mappings_for_canonical", || {
                self.repo.mappings_for_canonical(canonical.id)
            })
            .await?;
            let distinct: BTreeSet<i64> = mappings.iter().map(|m| m.source_id).collect();
            let count = distinct.len() as i64;
            if count != canonical.source_count {
                canonical.source_count = count;
                canonical.updated_at = Utc::now();
                with_retries("update_canonical", || {
                    self.repo.update_canonical(&canonical)
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn finalize(&self, state: &mut RunState) -> EngineResult<()> {
        state.job.status = JobStatus::Completed;
        state.job.phase = JobPhase::Done;
        state.job.finished_at = Some(Utc::now());
        state.job.reduction_rate = Some(if state.job.total_raw == 0 {
            1.0
        } else {
            1.0 - state.job.canonical_created as f64 / state.job.total_raw as f64
        });
        with_retries("update_job", || self.repo.update_job(&state.job)).await?;
        self.emit(state);
        info!(
            "job {}: done — {} raw -> {} canonicals, {} mappings, {} matches",
            state.job.id,
            state.job.processed,
            state.job.canonical_created,
            state.job.mappings_created,
            state.matches_found
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Progress and flags
    // ------------------------------------------------------------------

    pub(crate) fn set_phase(&self, state: &mut RunState, phase: JobPhase) {
        if state.job.phase != phase {
            state.job.phase = phase;
            self.emit(state);
        }
    }

    pub(crate) fn emit(&self, state: &RunState) {
        let elapsed = state.started.elapsed().as_millis() as u64;
        let remaining = if state.job.processed > 0 && state.job.total_raw > state.job.processed {
            Some(
                elapsed * (state.job.total_raw - state.job.processed) / state.job.processed,
            )
        } else {
            None
        };
        let progress = DedupProgress {
            job_id: state.job.id.clone(),
            phase: state.job.phase,
            total_products: state.job.total_raw,
            processed_products: state.job.processed,
            current_source: state.current_source.clone(),
            sources_processed: state.sources_seen.len() as u64,
            total_sources: state.source_names.len() as u64,
            matches_found: state.matches_found,
            canonical_created: state.job.canonical_created,
            mappings_created: state.job.mappings_created,
            time_elapsed_ms: elapsed,
            estimated_time_remaining_ms: remaining,
            current_batch: state.batch_index,
            total_batches: state.total_batches,
            recent_matches: state.recent.iter().cloned().collect(),
            source_breakdown: state.job.source_breakdown.clone(),
        };
        self.sink.emit(&progress);
    }

    async fn flag_unpersistable(&self, members: &[&ListingFeatures], slug: &str) {
        if members.len() < 2 {
            return;
        }
        let raw_ids: Vec<i64> = members.iter().map(|m| m.raw.id).collect();
        if let Err(e) = self
            .reviews
            .flag_ambiguous(
                &format!("cluster for slug '{slug}' could not be persisted"),
                json!({ "slug": slug, "raw_ids": raw_ids }),
            )
            .await
        {
            warn!("ambiguous flagging failed: {e}");
        }
    }

    async fn flag_history_conflict(&self, canonical_id: i64, detail: &str) {
        if let Err(e) = self
            .reviews
            .flag_conflicts(detail, json!({ "canonical_id": canonical_id }))
            .await
        {
            warn!("conflict flagging failed for canonical {canonical_id}: {e}");
        }
    }
}

/// Stable blocking map: primary key → member indexes, keys sorted, members
/// in traversal order.
fn block_by_primary_key(features: &[ListingFeatures]) -> BTreeMap<String, Vec<usize>> {
    let mut blocks: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, feature) in features.iter().enumerate() {
        blocks.entry(feature.block_key()).or_default().push(i);
    }
    for indexes in blocks.values_mut() {
        indexes.sort_by_key(|i| features[*i].traversal_key());
    }
    blocks
}

/// At least two of brand/model/storage present on both sides.
fn codes_share_enough(a: &match_core::ExtractedCode, b: &match_core::ExtractedCode) -> bool {
    let mut shared = 0;
    if a.brand.is_some() && b.brand.is_some() {
        shared += 1;
    }
    if a.model_number.is_some() && b.model_number.is_some() {
        shared += 1;
    }
    if a.storage_gb.is_some() && b.storage_gb.is_some() {
        shared += 1;
    }
    shared >= 2
}

/// Canonical slug: the extracted-code slug when brand and model are both
/// known; otherwise a slugified name so unrelated unknowns cannot collide.
/// Truncated here so the lookup key always equals the stored key.
fn slug_for(main: &ListingFeatures) -> String {
    let slug = if main.code.brand.is_some() && main.code.model_number.is_some() {
        to_canonical_code(&main.code)
    } else {
        main.name_normalized.replace(' ', "-")
    };
    truncate_chars(&slug, MAX_SLUG_LEN)
}
