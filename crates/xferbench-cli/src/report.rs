//! Console and JSON rendering of benchmark results.

use std::fmt::Write;

use serde_json::{json, Value};
use xferbench_core::strategy::MIB;
use xferbench_core::{
    AggregateStats, BenchmarkOutcome, Comparison, LevelBenefit, NetworkEstimate, ResourceStats, TierSelection,
};

fn mb(bytes: f64) -> f64 {
    bytes / MIB
}

pub fn render_plan(out: &mut String, outcome: &BenchmarkOutcome) {
    let plan = &outcome.plan;
    match (&plan.estimate, &plan.selection) {
        (Some(est), Some(sel)) => {
            let _ = writeln!(
                out,
                "Network: up {:.2} MB/s, down {:.2} MB/s, latency {:.0} ms ({} samples)",
                est.avg_upload_mbps, est.avg_download_mbps, est.avg_latency_ms, est.samples
            );
            let _ = writeln!(out, "Tier:    {} (level {}) - {}", sel.tier.name, sel.level(), sel.tier.rationale);
        }
        _ if plan.base_level == 0 => {
            let _ = writeln!(out, "Compression: disabled");
        }
        _ => {
            let _ = writeln!(out, "Compression: fixed level {}", plan.base_level);
        }
    }
}

fn stop_reason(outcome: &BenchmarkOutcome) -> &'static str {
    if outcome.interrupted {
        " (interrupted)"
    } else if outcome.aborted {
        " (stopped early: failure ratio exceeded)"
    } else {
        ""
    }
}

pub fn render_summary(outcome: &BenchmarkOutcome, stats: Option<&AggregateStats>, resources: &ResourceStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Benchmark summary ===");
    render_plan(&mut out, outcome);
    let _ = writeln!(
        out,
        "Attempts: {} of {} planned, {} failed{}",
        outcome.attempted,
        outcome.planned,
        outcome.failed,
        stop_reason(outcome)
    );

    let Some(stats) = stats else {
        let _ = writeln!(out, "No successful runs, nothing to summarise.");
        return out;
    };

    let _ = writeln!(out, "Successful runs:   {}", stats.total_runs);
    let _ = writeln!(
        out,
        "Data:              {:.2} MB original, {:.2} MB transferred",
        mb(stats.total_original_bytes as f64),
        mb(stats.total_transferred_bytes as f64)
    );
    let _ = writeln!(out, "Avg compression:   {:.1}%", stats.avg_compression_ratio);
    let _ = writeln!(
        out,
        "Avg times (s):     compress {:.3}, upload {:.3}, download {:.3}, decompress {:.3}",
        stats.avg_compress_time.as_secs_f64(),
        stats.avg_upload_time.as_secs_f64(),
        stats.avg_download_time.as_secs_f64(),
        stats.avg_decompress_time.as_secs_f64()
    );
    let _ = writeln!(
        out,
        "Avg round trip:    {:.3} s",
        stats.avg_round_trip_time().as_secs_f64()
    );
    let _ = writeln!(
        out,
        "Avg throughput:    up {:.2} MB/s, down {:.2} MB/s",
        stats.avg_upload_throughput, stats.avg_download_throughput
    );

    let _ = writeln!(out, "\n{:<32} {:>5} {:>12} {:>12} {:>8} {:>10} {:>10}  levels", "file", "runs", "orig MB", "avg xfer MB", "ratio%", "up s", "down s");
    for f in &stats.per_file {
        let levels: Vec<String> = f.levels.iter().map(|l| l.to_string()).collect();
        let _ = writeln!(
            out,
            "{:<32} {:>5} {:>12.2} {:>12.2} {:>8.1} {:>10.3} {:>10.3}  {}",
            f.filename,
            f.runs,
            mb(f.original_size as f64),
            mb(f.avg_transferred_size),
            f.avg_compression_ratio,
            f.avg_upload_time.as_secs_f64(),
            f.avg_download_time.as_secs_f64(),
            levels.join(",")
        );
    }

    let _ = writeln!(
        out,
        "\nResources: cpu avg {:.1}% max {:.1}%, memory avg {:.1} MB peak {:.1} MB, delta {:+.1} MB over {:.1} s ({} samples)",
        resources.avg_cpu_percent,
        resources.max_cpu_percent,
        resources.avg_memory_mb,
        resources.peak_memory_mb,
        resources.memory_delta_mb,
        resources.duration_secs,
        resources.sample_count
    );
    out
}

pub fn summary_json(outcome: &BenchmarkOutcome, stats: Option<&AggregateStats>, resources: &ResourceStats) -> Value {
    json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "plan": outcome.plan,
        "planned": outcome.planned,
        "attempted": outcome.attempted,
        "failed": outcome.failed,
        "aborted": outcome.aborted,
        "interrupted": outcome.interrupted,
        "records": outcome.records,
        "summary": stats,
        "resources": resources,
    })
}

pub fn render_comparison(baseline: &AggregateStats, adaptive: &AggregateStats) -> String {
    let cmp = Comparison::between(baseline, adaptive);
    let mut out = String::new();
    let _ = writeln!(out, "=== Uncompressed vs adaptive ===");
    let _ = writeln!(out, "{:<26} {:>14} {:>14}", "", "uncompressed", "adaptive");
    let row = |out: &mut String, label: &str, a: f64, b: f64, unit: &str| {
        let _ = writeln!(out, "{:<26} {:>12.3}{:<2} {:>12.3}{:<2}", label, a, unit, b, unit);
    };
    row(&mut out, "avg round trip", baseline.avg_round_trip_time().as_secs_f64(), adaptive.avg_round_trip_time().as_secs_f64(), " s");
    row(&mut out, "total round trip", baseline.total_round_trip_time().as_secs_f64(), adaptive.total_round_trip_time().as_secs_f64(), " s");
    row(&mut out, "bytes transferred", mb(baseline.total_transferred_bytes as f64), mb(adaptive.total_transferred_bytes as f64), "MB");
    row(&mut out, "avg compression", baseline.avg_compression_ratio, adaptive.avg_compression_ratio, " %");
    let _ = writeln!(out, "Speedup: {:.2}x, {:+.3} s per round trip, {:.2} MB less per transfer",
        cmp.speedup, cmp.time_saved_secs, mb(cmp.avg_bytes_saved));
    out
}

pub fn comparison_json(
    baseline: &BenchmarkOutcome,
    baseline_stats: &AggregateStats,
    adaptive: &BenchmarkOutcome,
    adaptive_stats: &AggregateStats,
    resources: &ResourceStats,
) -> Value {
    json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "baseline": { "failed": baseline.failed, "summary": baseline_stats },
        "adaptive": { "plan": adaptive.plan, "failed": adaptive.failed, "summary": adaptive_stats },
        "comparison": Comparison::between(baseline_stats, adaptive_stats),
        "resources": resources,
    })
}

pub fn render_probe(estimate: &NetworkEstimate, selection: &TierSelection) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Upload:   {:.2} MB/s", estimate.avg_upload_mbps);
    let _ = writeln!(out, "Download: {:.2} MB/s", estimate.avg_download_mbps);
    let _ = writeln!(out, "Latency:  {:.0} ms", estimate.avg_latency_ms);
    let _ = writeln!(out, "Samples:  {}", estimate.samples);
    let _ = writeln!(
        out,
        "Tier {} at {:.2} MB/s: level {} - {}",
        selection.tier.name,
        selection.speed_mbps,
        selection.level(),
        selection.tier.rationale
    );
    out
}

pub fn render_estimate(selection: &TierSelection, size_mb: f64, benefits: &[LevelBenefit]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:.1} MB at {:.2} MB/s: tier {} (level {})",
        size_mb,
        selection.speed_mbps,
        selection.tier.name,
        selection.level()
    );
    let _ = writeln!(out, "{:>6} {:>12} {:>12}  worthwhile", "level", "total s", "saved s");
    for b in benefits {
        let _ = writeln!(
            out,
            "{:>6} {:>12.3} {:>+12.3}  {}",
            b.level,
            b.total_time_secs,
            b.time_saved_secs,
            if b.worthwhile { "yes" } else { "no" }
        );
    }
    out
}
