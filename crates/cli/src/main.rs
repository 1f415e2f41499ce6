use anatomist::{BuildSession, FinalizeReport, IngestStats};
use anyhow::Context;
use clap::{Parser, Subcommand};
use common::BuildConfig;
use lazarus::TraceRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use substrate::fs::FsKind;
use substrate::{RelationKind, VertexKind};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sandgraph")]
#[command(about = "Behavioral graphs from sandbox API traces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one behavioral graph per trace file.
    Build {
        /// Trace files, or directories searched for *.json, *.jsonl, *.ndjson and *.json.gz.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// TOML build configuration (host identity, limits, views).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Name of the traced machine. Overrides config and environment.
        #[arg(long)]
        host_name: Option<String>,
        /// Also print per-kind vertex and edge counts.
        #[arg(long)]
        verbose: bool,
    },
    /// List the vertex kinds usable in `[[views]]`.
    Kinds,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Build { verbose: true, .. });
    setup_tracing(verbose);
    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "Could not load .env");
        }
    }

    match cli.command {
        Commands::Build {
            paths,
            config,
            host_name,
            verbose,
        } => cmd_build(&paths, config.as_deref(), host_name, verbose).await?,
        Commands::Kinds => cmd_kinds(),
    }

    Ok(())
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("anatomist=debug,lazarus=debug,cli=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

/// Result of building one trace.
struct TraceSummary {
    source: PathBuf,
    calls: usize,
    malformed: usize,
    truncated: bool,
    stats: IngestStats,
    report: FinalizeReport,
    graphs: Vec<GraphSummary>,
}

struct GraphSummary {
    name: String,
    vertices: BTreeMap<VertexKind, usize>,
    edges: BTreeMap<RelationKind, usize>,
}

async fn cmd_build(
    paths: &[PathBuf],
    config_path: Option<&Path>,
    host_name: Option<String>,
    verbose: bool,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => BuildConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => BuildConfig::default(),
    };
    config.apply_env();
    if let Some(name) = host_name {
        config.host.name = name;
    }

    let traces = collect_traces(paths)?;
    if traces.is_empty() {
        println!("No trace files found.");
        return Ok(());
    }
    info!(traces = traces.len(), "Building graphs");

    let mut jobs = Vec::with_capacity(traces.len());
    for trace in traces {
        let config = config.clone();
        jobs.push(tokio::task::spawn_blocking(move || {
            build_trace(&trace, &config).with_context(|| format!("Failed to build {}", trace.display()))
        }));
    }

    let mut failures = 0usize;
    for job in jobs {
        match job.await? {
            Ok(summary) => print_summary(&summary, verbose),
            Err(e) => {
                failures += 1;
                eprintln!("error: {:#}", e);
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} trace(s) failed", failures);
    }
    Ok(())
}

/// Runs one full session over a trace file.
fn build_trace(path: &Path, config: &BuildConfig) -> anyhow::Result<TraceSummary> {
    let trace = lazarus::read_trace(path)?;
    let mut session = BuildSession::new(config)?;

    for record in &trace.records {
        let outcome = match record {
            TraceRecord::Call(call) => session.ingest(call).map(|_| ()),
            TraceRecord::File { path } => session.declare_path(path, FsKind::File).map(|_| ()),
            TraceRecord::Directory { path } => {
                session.declare_path(path, FsKind::Directory).map(|_| ())
            }
        };
        if let Err(e) = outcome {
            warn!(trace = %path.display(), error = %e, "Dropped trace record");
        }
    }

    let stats = *session.stats();
    let token = session.finish_ingestion()?;
    let report = session.run_finalizers(token)?;

    let graphs = session
        .into_graphs()
        .iter()
        .map(|graph| GraphSummary {
            name: graph.name().to_string(),
            vertices: graph.vertex_histogram(),
            edges: graph.edge_histogram(),
        })
        .collect();

    Ok(TraceSummary {
        source: path.to_path_buf(),
        calls: trace.call_count(),
        malformed: trace.malformed,
        truncated: trace.truncated,
        stats,
        report,
        graphs,
    })
}

fn collect_traces(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    use walkdir::WalkDir;

    let mut traces = Vec::new();
    for path in paths {
        let path = dunce::canonicalize(path)
            .with_context(|| format!("Failed to resolve path: {}", path.display()))?;
        if path.is_file() {
            traces.push(path);
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(&path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && lazarus::is_trace_file(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        found.sort();
        traces.extend(found);
    }
    traces.dedup();
    Ok(traces)
}

fn print_summary(summary: &TraceSummary, verbose: bool) {
    let stats = &summary.stats;
    let references = summary
        .graphs
        .first()
        .and_then(|g| g.edges.get(&RelationKind::ReferencesFileSystem))
        .copied()
        .unwrap_or(0);

    println!("\n{}", summary.source.display());
    println!("+------------------------------------------+");
    println!("| SANDGRAPH BUILD                          |");
    println!("+------------------------------------------+");
    println!("| Calls          : {:>23} |", summary.calls);
    println!("| Handled        : {:>23} |", stats.applied);
    println!("| Skipped        : {:>23} |", stats.skipped);
    println!("| Ignored        : {:>23} |", stats.ignored);
    println!("| Errors         : {:>23} |", stats.errors);
    println!("| Malformed      : {:>23} |", summary.malformed);
    println!("| FS declared    : {:>23} |", stats.fs_declared);
    println!("| FS references  : {:>23} |", references);
    println!("| Final phases   : {:>23} |", summary.report.phases_run);
    println!("+------------------------------------------+");
    if summary.truncated {
        println!("Trace ended in invalid JSON; later records were not read.");
    }

    for graph in &summary.graphs {
        let vertices: usize = graph.vertices.values().sum();
        let edges: usize = graph.edges.values().sum();
        println!("  graph {:<12} {:>6} vertices {:>6} edges", graph.name, vertices, edges);
        if verbose {
            for (kind, count) in &graph.vertices {
                println!("    {:<24} {:>6}", kind.name(), count);
            }
            for (kind, count) in &graph.edges {
                println!("    -{:<23} {:>6}", kind, count);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// kinds
// ---------------------------------------------------------------------------

fn cmd_kinds() {
    println!("+------------------------------------------+");
    println!("| VERTEX KINDS                             |");
    println!("+------------------------------------------+");
    for kind in VertexKind::ALL {
        println!("| {:<40} |", kind.name());
    }
    println!("+------------------------------------------+");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TRACE: &str = concat!(
        r#"{"type":"file","path":"C:\\data\\file.txt"}"#,
        "\n",
        r#"{"type":"call","name":"RegOpenKeyExW","status":true,"arguments":{"key_handle":64,"regkey":"HKLM\\Software\\Test"},"process":{"pid":42}}"#,
        "\n",
        r#"{"type":"call","name":"RegSetValueExW","status":true,"arguments":{"key_handle":64,"regkey":"HKLM\\Software\\Test\\Path","value":"C:\\data\\file.txt"},"flags":{"reg_type":"REG_SZ"},"process":{"pid":42}}"#,
        "\n",
        r#"{"type":"call","name":"listen","status":true,"arguments":{"socket":7},"process":{"pid":42}}"#,
        "\n",
    );

    #[test]
    fn test_build_trace_end_to_end() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.ndjson");
        std::fs::File::create(&path)?.write_all(TRACE.as_bytes())?;

        let summary = build_trace(&path, &BuildConfig::default())?;
        assert_eq!(summary.calls, 3);
        assert_eq!(summary.stats.applied, 2);
        assert_eq!(summary.stats.skipped, 1);
        assert_eq!(summary.stats.fs_declared, 1);
        assert_eq!(summary.report.phases_run, 1);
        assert_eq!(summary.graphs.len(), 1);
        assert_eq!(
            summary.graphs[0].edges.get(&RelationKind::ReferencesFileSystem),
            Some(&1)
        );
        Ok(())
    }

    #[test]
    fn test_collect_traces_walks_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("nested"))?;
        for name in ["a.json", "nested/b.json.gz", "notes.txt", "nested/c.jsonl"] {
            std::fs::File::create(dir.path().join(name))?;
        }
        let traces = collect_traces(&[dir.path().to_path_buf()])?;
        let names: Vec<_> = traces
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.json", "b.json.gz", "c.jsonl"]);
        Ok(())
    }
}
