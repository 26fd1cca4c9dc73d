//! Property tests for allocation bounds, calibration and rank fusion

use evidence_orchestrator::budget::{AllocationRequest, KAllocSettings, KAllocator};
use evidence_orchestrator::fusion::{
    power_mean, weigh, AuthorityTier, RankedList, ScoreCalibrator, WeightedRrfFuser,
};
use evidence_orchestrator::{ScoredDocument, SourceTag};
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

fn texts(docs: &[ScoredDocument]) -> Vec<String> {
    docs.iter().map(|d| d.text.clone()).collect()
}

fn list(source: SourceTag, ids: &[u8]) -> RankedList {
    RankedList::new(
        source,
        ids.iter()
            .map(|i| ScoredDocument::new(format!("doc {}", i % 16), source, 0.5))
            .collect(),
    )
}

#[quickcheck]
fn prop_allocation_within_bounds(
    max_total: u8,
    min: u8,
    step: u8,
    official: bool,
    intent: u8,
    version: bool,
) -> TestResult {
    let min = (min % 5) as usize;
    let max_total = (max_total % 40) as usize;
    if 3 * min > max_total {
        return TestResult::discard();
    }

    let settings = KAllocSettings {
        max_total_k: max_total,
        min_per_source: min,
        k_step: (step % 9) as usize,
        ..Default::default()
    };
    let intents = ["faq", "relation", "chitchat", "lore"];
    let mut request = AllocationRequest::new(if version { "patch 5.8 notes" } else { "build guide" });
    request.official_only = official;
    request.intent = Some(intents[intent as usize % intents.len()].to_string());

    let plan = KAllocator::new(settings.clone()).decide(&request).plan;

    let within = plan.total() <= max_total
        && plan.web_k >= min
        && plan.vector_k >= min
        && plan.kg_k >= min
        && plan.pool_limit >= plan.max_k() * settings.pool_multiplier;
    TestResult::from_bool(within)
}

#[quickcheck]
fn prop_calibration_is_bounded(x: f64, a: f64, b: f64) -> bool {
    let modes = [
        ScoreCalibrator::Identity,
        ScoreCalibrator::Linear { a, b },
        ScoreCalibrator::default(),
    ];
    modes.iter().all(|m| {
        let y = m.calibrate(x);
        y.is_finite() && (0.0..=1.0).contains(&y)
    })
}

#[quickcheck]
fn prop_piecewise_is_monotone(x: f64, y: f64) -> TestResult {
    if !x.is_finite() || !y.is_finite() {
        return TestResult::discard();
    }
    let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
    let cal = ScoreCalibrator::default();
    TestResult::from_bool(cal.calibrate(lo) <= cal.calibrate(hi))
}

#[quickcheck]
fn prop_weighting_is_bounded(score: f64, alpha: f64, age_days: u16) -> bool {
    let now = 1_750_000_000;
    let ts = now - age_days as i64 * 86_400;
    [AuthorityTier::T1, AuthorityTier::T4].iter().all(|tier| {
        let s = weigh(score, *tier, Some(ts), alpha, now, 180.0);
        s.is_finite() && (0.0..=1.0).contains(&s)
    })
}

#[quickcheck]
fn prop_power_mean_between_min_and_max(raw: Vec<u8>, p: i16) -> TestResult {
    if raw.is_empty() {
        return TestResult::discard();
    }
    let scores: Vec<f64> = raw.iter().map(|v| *v as f64 / 255.0).collect();
    let lo = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let p = p as f64;
    let m = power_mean(&scores, p);
    TestResult::from_bool(m >= lo - 1e-9 && m <= hi + 1e-9)
}

#[quickcheck]
fn prop_rrf_is_deterministic(web: Vec<u8>, vector: Vec<u8>, kg: Vec<u8>, top_k: u8) -> bool {
    let fuser = WeightedRrfFuser::new(60.0);
    let lists = vec![
        list(SourceTag::Web, &web),
        list(SourceTag::Vector, &vector),
        list(SourceTag::Kg, &kg),
    ];
    let top_k = top_k as usize % 20;

    let first = fuser.fuse(&lists, top_k);
    let second = fuser.fuse(&lists, top_k);
    texts(&first) == texts(&second) && first.len() <= top_k.max(1)
}

#[quickcheck]
fn prop_rrf_output_has_unique_texts(web: Vec<u8>, vector: Vec<u8>) -> bool {
    let fuser = WeightedRrfFuser::new(60.0);
    let fused = fuser.fuse(&[list(SourceTag::Web, &web), list(SourceTag::Vector, &vector)], 50);
    let mut seen = std::collections::HashSet::new();
    fused.iter().all(|d| seen.insert(d.normalized_key()))
}

#[test]
fn test_rrf_exact_tie_breaks_by_rank_then_list_order() {
    let fuser = WeightedRrfFuser::new(60.0);
    let web = RankedList::new(
        SourceTag::Web,
        vec![
            ScoredDocument::new("alpha", SourceTag::Web, 0.9),
            ScoredDocument::new("beta", SourceTag::Web, 0.8),
        ],
    );
    let vector = RankedList::new(
        SourceTag::Vector,
        vec![
            ScoredDocument::new("beta", SourceTag::Vector, 0.9),
            ScoredDocument::new("alpha", SourceTag::Vector, 0.8),
        ],
    );

    let fused = fuser.fuse(&[web, vector], 10);
    assert_eq!(texts(&fused), vec!["alpha".to_string(), "beta".to_string()]);
    assert!((fused[0].score - fused[1].score).abs() < 1e-12);
}
