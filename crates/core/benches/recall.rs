//! ANN benchmark on synthetic clustered data.
//! Measures Recall@10 and QPS of HNSW (sweeping ef_search) and IVF (sweeping nprobe)
//! against exact ground truth from a flat index.
//!
//! Usage: cargo bench --bench recall

use std::collections::HashSet;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vecindex_core::{Index, Label, MetricType};

const DIM: usize = 32;
const NUM_BASE: usize = 20_000;
const NUM_QUERIES: usize = 500;
const NUM_CLUSTERS: usize = 64;
const K: usize = 10;

/// Gaussian-ish blobs around random centers, row-major.
fn clustered(rng: &mut StdRng, centers: &[f32], count: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(count * DIM);
    for _ in 0..count {
        let c = rng.gen_range(0..NUM_CLUSTERS);
        for j in 0..DIM {
            let noise: f32 = (0..4).map(|_| rng.gen_range(-0.5f32..0.5)).sum();
            out.push(centers[c * DIM + j] + noise * 0.25);
        }
    }
    out
}

/// Compute Recall@k: fraction of true nearest neighbors found
fn recall_at_k(predicted: &[Label], ground_truth: &[Label], k: usize) -> f64 {
    let gt_set: HashSet<Label> = ground_truth.iter().take(k).copied().collect();
    let found = predicted
        .iter()
        .take(k)
        .filter(|id| gt_set.contains(id))
        .count();
    found as f64 / k as f64
}

/// Run every query one at a time, returning (mean recall, QPS, mean latency in us).
fn measure(index: &Index, queries: &[f32], truth: &[Label]) -> (f64, f64, f64) {
    // Warm up (10 queries)
    for q in queries.chunks_exact(DIM).take(10) {
        let _ = index.search(q, K);
    }

    let t0 = Instant::now();
    let mut total_recall = 0.0f64;
    for (qi, q) in queries.chunks_exact(DIM).enumerate() {
        let Ok(result) = index.search(q, K) else {
            panic!("search failed for query {qi}");
        };
        total_recall += recall_at_k(&result.labels, &truth[qi * K..(qi + 1) * K], K);
    }
    let elapsed = t0.elapsed();
    let n = (queries.len() / DIM) as f64;
    (
        total_recall / n,
        n / elapsed.as_secs_f64(),
        elapsed.as_micros() as f64 / n,
    )
}

fn main() {
    println!("=== ANN Benchmark: synthetic {NUM_CLUSTERS}-cluster L2, {DIM}d ===");
    println!();

    let mut rng = StdRng::seed_from_u64(7);
    let centers: Vec<f32> = (0..NUM_CLUSTERS * DIM).map(|_| rng.gen_range(-10.0f32..10.0)).collect();
    let base = clustered(&mut rng, &centers, NUM_BASE);
    let queries = clustered(&mut rng, &centers, NUM_QUERIES);
    println!("  {NUM_BASE} base vectors, {NUM_QUERIES} queries");

    print!("Computing ground truth...");
    let mut flat = Index::flat_l2(DIM).expect("flat index");
    flat.add(&base).expect("add base");
    let truth = flat.search(&queries, K).expect("ground truth").labels;
    println!(" done");

    // === HNSW ===
    println!();
    println!("--- HNSW M=16 ---");
    let mut hnsw = Index::hnsw(DIM, 16, MetricType::L2).expect("hnsw index");
    hnsw.set_ef_construction(200).expect("ef_construction");
    let t0 = Instant::now();
    hnsw.add(&base).expect("add base");
    let build_time = t0.elapsed();
    println!(
        "  Build time: {:.2}s ({:.0} inserts/s)",
        build_time.as_secs_f64(),
        NUM_BASE as f64 / build_time.as_secs_f64()
    );

    println!();
    println!("  ef_search | Recall@10 |    QPS    | Avg latency");
    println!("  ----------+-----------+-----------+------------");
    for ef in [10, 20, 40, 80, 160] {
        hnsw.set_ef_search(ef).expect("ef_search");
        let (recall, qps, latency) = measure(&hnsw, &queries, &truth);
        println!("  {:>9} | {:.4}    | {:>9.1} | {:.0} us", ef, recall, qps, latency);
    }

    // === IVF ===
    println!();
    println!("--- IVF{NUM_CLUSTERS},Flat ---");
    let mut ivf = Index::from_factory(DIM, &format!("IVF{NUM_CLUSTERS},Flat"), MetricType::L2)
        .expect("ivf index");
    let t0 = Instant::now();
    ivf.train(&base).expect("train");
    ivf.add(&base).expect("add base");
    println!("  Train + add: {:.2}s", t0.elapsed().as_secs_f64());

    println!();
    println!("     nprobe | Recall@10 |    QPS    | Avg latency");
    println!("  ----------+-----------+-----------+------------");
    for nprobe in [1, 2, 4, 8, 16] {
        ivf.set_nprobe(nprobe).expect("nprobe");
        let (recall, qps, latency) = measure(&ivf, &queries, &truth);
        println!("  {:>9} | {:.4}    | {:>9.1} | {:.0} us", nprobe, recall, qps, latency);
    }

    println!();
    println!("=== Benchmark complete ===");
}
