//! Cross-source linking pass.
//!
//! A canonical that only one source vouches for is paired against raw
//! listings from the other sources that share its extracted code. The gate
//! is deliberately code-only: single-source canonicals often lack a usable
//! price signal, and the code comparison has far lower variance than the
//! full pair scorer.

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};

use catalog_store::{Canonical, Mapping, MatchMethod, MatchingPair};
use match_core::normalize::char_prefix;
use match_core::{ExtractedCode, compare, extract};

use crate::errors::{EngineError, EngineResult};
use crate::progress::RecentMatch;
use crate::retry::with_retries;

use super::runner::{JobRunner, RunState};

/// Candidates fetched per canonical; the first non-empty term page wins.
const CANDIDATE_LIMIT: usize = 30;
const FETCH_CIRCUIT_LIMIT: u32 = 3;

pub(super) async fn link(runner: &JobRunner, state: &mut RunState) -> EngineResult<()> {
    let singles = with_retries("list_single_source_canonicals", || {
        runner.repo.list_single_source_canonicals()
    })
    .await?;
    info!(
        "cross-source: {} single-source canonicals to probe",
        singles.len()
    );

    let mut consecutive_fetch_failures = 0u32;
    for canonical in singles {
        if runner.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let code = extract(&canonical.name);
        if code.brand.is_none() && code.model.is_none() {
            continue;
        }

        let mappings = with_retries("mappings_for_canonical", || {
            runner.repo.mappings_for_canonical(canonical.id)
        })
        .await?;
        let Some(anchor) = mappings.first() else {
            continue;
        };
        let own_source = anchor.source_id;

        let terms = search_terms(&canonical, &code);
        if terms.is_empty() {
            continue;
        }

        // The term fetches are independent reads; issue them concurrently
        // and keep the priority order when picking the page to use.
        let fetches = terms.iter().map(|term| {
            with_retries("search_raw_by_name", move || {
                runner.repo.search_raw_by_name(term, own_source, CANDIDATE_LIMIT)
            })
        });
        let pages = join_all(fetches).await;

        let mut candidates = Vec::new();
        let mut any_succeeded = false;
        for (term, page) in terms.iter().zip(pages) {
            match page {
                Ok(rows) => {
                    any_succeeded = true;
                    if candidates.is_empty() && !rows.is_empty() {
                        debug!(
                            "cross-source: canonical {} term '{term}' -> {} candidates",
                            canonical.id,
                            rows.len()
                        );
                        candidates = rows;
                    }
                }
                Err(e) => warn!("cross-source: fetch '{term}' failed: {e}"),
            }
        }
        if !any_succeeded {
            consecutive_fetch_failures += 1;
            if consecutive_fetch_failures >= FETCH_CIRCUIT_LIMIT {
                return Err(EngineError::CircuitBroken {
                    phase: "cross_source",
                    count: consecutive_fetch_failures,
                });
            }
            continue;
        }
        consecutive_fetch_failures = 0;

        for candidate in candidates {
            if with_retries("mapping_for_raw", || runner.repo.mapping_for_raw(candidate.id))
                .await?
                .is_some()
            {
                continue;
            }
            let candidate_code = extract(&candidate.name);
            let similarity = compare(&code, &candidate_code);
            if similarity < runner.cfg.min_match_score {
                continue;
            }

            let mapping = Mapping {
                canonical_id: canonical.id,
                raw_id: candidate.id,
                source_id: candidate.source_id,
                confidence_score: similarity,
                matching_method: MatchMethod::CrossSource,
                created_at: Utc::now(),
            };
            if !with_retries("upsert_mapping", || runner.repo.upsert_mapping(&mapping)).await? {
                continue;
            }

            let pair = MatchingPair {
                job_id: state.job.id.clone(),
                raw_1: anchor.raw_id,
                raw_2: candidate.id,
                source_1: own_source,
                source_2: candidate.source_id,
                match_score: similarity,
                match_method: MatchMethod::CrossSource,
                canonical_id: Some(canonical.id),
            };
            with_retries("insert_matching_pair", || {
                runner.repo.insert_matching_pair(&pair)
            })
            .await?;

            let (name_a, name_b) = (
                state.source_name(own_source),
                state.source_name(candidate.source_id),
            );
            state.bump_matrix(&name_a, &name_b);
            state.matches_found += 1;
            state.job.mappings_created += 1;
            state
                .job
                .source_breakdown
                .entry(name_b.clone())
                .or_default()
                .matched += 1;
            state.push_recent(RecentMatch {
                raw_1: anchor.raw_id,
                raw_2: candidate.id,
                source_1: name_a,
                source_2: name_b,
                score: similarity,
                method: MatchMethod::CrossSource,
            });
            debug!(
                "cross-source: canonical {} linked raw {} (score {:.2}) {}",
                canonical.id,
                candidate.id,
                similarity,
                json!({ "slug": canonical.slug })
            );
        }
    }
    Ok(())
}

/// Candidate search terms in priority order:
/// 1. model tokens (`%15%promax%`) when the model has two or more usable
///    tokens,
/// 2. brand plus storage digits (`%apple%256%`),
/// 3. the first 20 chars of the normalized name.
fn search_terms(canonical: &Canonical, code: &ExtractedCode) -> Vec<String> {
    let mut terms = Vec::new();
    if let Some(model) = &code.model {
        let tokens: Vec<&str> = model.split_whitespace().filter(|t| t.len() > 1).collect();
        if tokens.len() >= 2 {
            terms.push(format!("%{}%", tokens.join("%")));
        }
    }
    if let (Some(brand), Some(storage)) = (&code.brand, code.storage_gb) {
        terms.push(format!("%{brand}%{storage}%"));
    }
    let prefix = char_prefix(&canonical.name_normalized, 20);
    if !prefix.is_empty() {
        terms.push(format!("%{prefix}%"));
    }
    terms
}
