// Latency benchmark for the channel pipeline
// Measures local `run` and full `run_script` round trips with stand-in
// helper/recorder scripts, so it needs no privileges.

use nschannel::exec::recording::RecordingSyntax;
use nschannel::inspect::FakeInspector;
use nschannel::{ChannelConfig, ExecutionContext, ExecutionRequest, NamespaceChannel, NamespaceSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ITERATIONS: usize = 100;
const WARMUP_ITERATIONS: usize = 10;

struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let pick = |q: f64| samples[((len as f64 * q) as usize).min(len - 1)];
        let sum: Duration = samples.iter().sum();

        Self {
            p50: pick(0.50),
            p95: pick(0.95),
            p99: pick(0.99),
            min: samples[0],
            max: samples[len - 1],
            mean: sum / len as u32,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

struct BenchmarkResult {
    scenario: String,
    stats: LatencyStats,
    passed: bool,
    reason: Option<String>,
}

impl BenchmarkResult {
    fn new(scenario: &str, stats: LatencyStats, p50_budget: Duration) -> Self {
        let passed = stats.p50 < p50_budget;
        let reason = (!passed).then(|| format!("p50={:?} (target <{:?})", stats.p50, p50_budget));
        Self {
            scenario: scenario.to_string(),
            stats,
            passed,
            reason,
        }
    }

    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");
        match &self.reason {
            None => println!("PASS"),
            Some(reason) => println!("FAIL: {}", reason),
        }
    }
}

fn sample<F: FnMut()>(mut op: F) -> Vec<Duration> {
    for _ in 0..WARMUP_ITERATIONS {
        op();
    }
    (0..ITERATIONS)
        .map(|_| {
            let start = Instant::now();
            op();
            start.elapsed()
        })
        .collect()
}

fn write_executable(path: &Path, content: &str) {
    fs::write(path, content).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

fn bench_channel(root: &Path) -> NamespaceChannel {
    let bin = root.join("bin");
    fs::create_dir_all(&bin).expect("create bin dir");
    write_executable(
        &bin.join("nsexec"),
        "#!/bin/sh\nwhile [ \"$#\" -gt 0 ] && [ \"$1\" != \"--\" ]; do shift; done\nshift\nexec \"$@\"\n",
    );
    write_executable(
        &bin.join("fake-script"),
        "#!/bin/sh\nwhile [ \"$#\" -gt 0 ]; do\n  if [ \"$1\" = \"-c\" ]; then exec /bin/sh -c \"$2\"; fi\n  shift\ndone\n",
    );

    let config = ChannelConfig {
        bin_dir: Some(bin.clone()),
        recorder: bin.join("fake-script").display().to_string(),
        recording_syntax: Some(RecordingSyntax::Gnu),
        transcript_dir: root.to_path_buf(),
        ..ChannelConfig::default()
    };
    NamespaceChannel::new(config, Arc::new(FakeInspector::default())).expect("build channel")
}

fn bench_package(root: &Path) -> PathBuf {
    let packages = root.join("packages");
    fs::create_dir_all(&packages).expect("create package dir");

    let main = b"#!/bin/sh\necho '{\"code\":200,\"success\":true,\"result\":\"ok\"}'\n";
    let mut header = tar::Header::new_ustar();
    header.set_size(main.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, "main", &main[..])
        .expect("append main");

    let path = packages.join("bench.tar");
    fs::write(&path, builder.into_inner().expect("finish tar")).expect("write package");
    path
}

fn main() {
    println!("=== nschannel Run Latency Benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let root = tempfile::TempDir::new().expect("temp dir");
    let channel = bench_channel(root.path());
    let package = bench_package(root.path());

    let local = sample(|| {
        let _ = channel.run("true", "");
    });

    let mut seq = 0u64;
    let pipeline = sample(|| {
        seq += 1;
        let request = ExecutionRequest::new(
            ExecutionContext::new(std::process::id().to_string(), NamespaceSet::all()),
            &package,
            format!("bench-{}", seq),
            "",
        );
        let _ = channel.run_script(&request);
    });

    let results = vec![
        BenchmarkResult::new(
            "Local run",
            LatencyStats::from_samples(local),
            Duration::from_millis(50),
        ),
        BenchmarkResult::new(
            "Staged script pipeline",
            LatencyStats::from_samples(pipeline),
            Duration::from_millis(150),
        ),
    ];

    for result in &results {
        result.print();
    }

    let passed_count = results.iter().filter(|r| r.passed).count();
    println!("\n=== Summary ===");
    println!("{}/{} scenarios passed", passed_count, results.len());
    if passed_count != results.len() {
        std::process::exit(1);
    }
}
