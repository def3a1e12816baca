//! Command-line driver for the Sage engine.
#![forbid(unsafe_code)]

mod config;
mod ui;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use sage::engine::{CacheBudget, EncodingMode, Engine, EngineOptions, VertexProgram};
use sage::graph::Graph;
use sage::programs::{Bfs, DistanceSum, Reachability, ShortestPath};
use sage::record::{RecordLayout, VertexValue};
use sage::VertexId;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use config::{section_count, FileConfig};
use ui::{format_duration, Ui};

type CliResult<T> = std::result::Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(
    name = "sage",
    version,
    about = "Monte-Carlo vertex programs over probabilistic graphs",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "SAGE_LOG",
        value_name = "FILTER",
        help = "Log filter (overrides RUST_LOG)"
    )]
    log: Option<String>,

    #[arg(long, global = true, help = "Disable colors and spinners")]
    plain: bool,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for results"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Convert a text edge list into the binary graph format")]
    Convert {
        #[arg(long, value_name = "FILE", help = "Edge list: `src dest [prob [attr]]` per line")]
        input: PathBuf,

        #[arg(long, value_name = "FILE", help = "Binary graph to write")]
        output: PathBuf,

        #[arg(long, help = "Treat every edge as undirected")]
        undirected: bool,
    },

    #[command(about = "Run a reference program to convergence")]
    Run(RunCmd),

    #[command(about = "Describe a binary graph")]
    Info {
        #[arg(long, value_name = "FILE")]
        graph: PathBuf,

        #[arg(long, default_value_t = 64, help = "World count used for record sizes")]
        samples: usize,

        #[arg(long, default_value_t = 4, help = "Value width in bytes used for record sizes")]
        value_size: usize,
    },
}

#[derive(Args, Debug)]
struct RunCmd {
    #[arg(long, value_name = "FILE")]
    graph: PathBuf,

    #[arg(long, value_enum, default_value_t = ProgramArg::Bfs)]
    program: ProgramArg,

    #[arg(long, value_name = "VERTEX", default_value_t = 0, help = "Seed vertex")]
    source: VertexId,

    #[arg(
        long,
        value_name = "FILE",
        env = "SAGE_CONFIG",
        help = "TOML file with an [engine] table"
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Number of Monte-Carlo worlds")]
    samples: Option<usize>,

    #[arg(long, help = "Worker threads per phase")]
    threads: Option<usize>,

    #[arg(long, help = "Vertices claimed per batch")]
    partition_size: Option<usize>,

    #[arg(long, help = "Disk reads in flight per worker")]
    io_depth: Option<usize>,

    #[arg(long, value_name = "MIB", conflicts_with = "cache_dense_multiple")]
    cache_mib: Option<usize>,

    #[arg(long, value_name = "FACTOR", help = "Cache budget as a multiple of the dense footprint")]
    cache_dense_multiple: Option<f64>,

    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Gather sections; negative means one per that many vertices"
    )]
    gather_sections: Option<i64>,

    #[arg(long, allow_hyphen_values = true, help = "Scatter sections")]
    scatter_sections: Option<i64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    encoding: Option<EncodingArg>,

    #[arg(long, help = "Treat every edge as certain")]
    certain: bool,

    #[arg(long, help = "Fraction of edges whose sampling is precomputed")]
    batch_sampling_ratio: Option<f32>,

    #[arg(long, help = "Write an initial record for every vertex first")]
    init_all: bool,

    #[arg(long, value_name = "FILE", help = "Scratch file for evicted records")]
    scratch: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ProgramArg {
    Bfs,
    Sssp,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum EncodingArg {
    Dense,
    Sparse,
    Adaptive,
}

impl From<EncodingArg> for EncodingMode {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Dense => EncodingMode::Dense,
            EncodingArg::Sparse => EncodingMode::Sparse,
            EncodingArg::Adaptive => EncodingMode::Adaptive,
        }
    }
}

impl RunCmd {
    /// Defaults, then the config file, then flags.
    fn options(&self) -> CliResult<EngineOptions> {
        let file = FileConfig::load(self.config.clone())?;
        if let Some(path) = file.path() {
            tracing::debug!(path = %path.display(), "cli.config.loaded");
        }
        let mut options = file.apply(EngineOptions::default())?;
        if let Some(samples) = self.samples {
            options.num_samples = samples;
        }
        if let Some(threads) = self.threads {
            options.threads = threads;
        }
        if let Some(partition_size) = self.partition_size {
            options.partition_size = partition_size;
        }
        if let Some(io_depth) = self.io_depth {
            options.io_depth = io_depth;
        }
        if let Some(mib) = self.cache_mib {
            options.cache_budget = CacheBudget::mib(mib);
        }
        if let Some(factor) = self.cache_dense_multiple {
            options.cache_budget = CacheBudget::DenseMultiple(factor);
        }
        if let Some(gather) = self.gather_sections {
            options.gather_sections = section_count(gather);
        }
        if let Some(scatter) = self.scatter_sections {
            options.scatter_sections = Some(section_count(scatter));
        }
        if let Some(seed) = self.seed {
            options.seed = seed;
        }
        if let Some(encoding) = self.encoding {
            options.encoding = encoding.into();
        }
        if self.certain {
            options.certain_graph = true;
        }
        if let Some(ratio) = self.batch_sampling_ratio {
            options.batch_sampling_ratio = ratio;
        }
        if self.init_all {
            options.init_all_values = true;
        }
        if let Some(scratch) = &self.scratch {
            options.scratch_path = scratch.clone();
        }
        options.validate()?;
        Ok(options)
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    program: &'static str,
    source: VertexId,
    samples: usize,
    supersteps: u32,
    expected_reached: f64,
    reached_vertices: u64,
    mean_distance: f64,
    elapsed_ms: u64,
    scatter_calls: u64,
    gather_calls: u64,
    transforms: u64,
    dense_vertices: u64,
    sparse_vertices: u64,
    cache_hits: u64,
    cache_misses: u64,
    cache_evictions: u64,
    cache_hit_ratio: f64,
}

#[derive(Debug, Serialize)]
struct GraphReport {
    vertices: usize,
    max_vertex_id: VertexId,
    edges: usize,
    undirected: bool,
    edge_attrs: bool,
    probabilities: bool,
    samples: usize,
    dense_record_bytes: usize,
    sparse_record_bytes: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());
    let ui = Ui::new(cli.plain || cli.format == OutputFormat::Json, false);
    match dispatch(&cli, &ui) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui.error(&format!("{err}"));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn dispatch(cli: &Cli, ui: &Ui) -> CliResult<()> {
    match &cli.command {
        Command::Convert {
            input,
            output,
            undirected,
        } => {
            let task = ui.task(format!("Converting {}", input.display()));
            let graph = Graph::load_text(input, !undirected)?;
            graph.save(output)?;
            let elapsed = task.finish();
            ui.success(&format!(
                "Wrote {} ({} vertices, {} edges) in {}",
                output.display(),
                graph.num_vertices(),
                graph.num_edges(),
                format_duration(elapsed)
            ));
            Ok(())
        }
        Command::Run(cmd) => {
            let options = cmd.options()?;
            let graph = Graph::load(&cmd.graph)?;
            let report = match cmd.program {
                ProgramArg::Bfs => run_program(graph, options, Bfs, "bfs", cmd.source, ui)?,
                ProgramArg::Sssp => {
                    let program = ShortestPath::for_graph(&graph);
                    run_program(graph, options, program, "sssp", cmd.source, ui)?
                }
            };
            print_run(cli.format, ui, &report)
        }
        Command::Info {
            graph,
            samples,
            value_size,
        } => {
            let graph = Graph::load(graph)?;
            let layout = RecordLayout::new((*samples).max(1), *value_size, 512, 2);
            let report = GraphReport {
                vertices: graph.num_vertices(),
                max_vertex_id: graph.max_vertex_id(),
                edges: graph.num_edges(),
                undirected: graph.is_undirected(),
                edge_attrs: graph.has_edge_attrs(),
                probabilities: graph.has_probabilities(),
                samples: layout.num_samples(),
                dense_record_bytes: layout.dense_size(),
                sparse_record_bytes: layout.sparse_unit_size(),
            };
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            ui.section(
                "Graph",
                [
                    ("vertices", report.vertices.to_string()),
                    ("max vertex id", report.max_vertex_id.to_string()),
                    ("edges", report.edges.to_string()),
                    ("undirected", report.undirected.to_string()),
                    ("edge attributes", report.edge_attrs.to_string()),
                    ("probabilities", report.probabilities.to_string()),
                ],
            );
            ui.section(
                "Records",
                [
                    ("samples", report.samples.to_string()),
                    ("dense bytes", report.dense_record_bytes.to_string()),
                    ("sparse bytes", report.sparse_record_bytes.to_string()),
                ],
            );
            Ok(())
        }
    }
}

fn run_program<P>(
    graph: Graph,
    options: EngineOptions,
    program: P,
    name: &'static str,
    source: VertexId,
    ui: &Ui,
) -> CliResult<RunReport>
where
    P: VertexProgram,
    P::Value: VertexValue + Into<f64>,
{
    let samples = options.num_samples;
    let unreached = program.init();
    let mut engine = Engine::for_program(graph, options, &program)?;
    engine.set_start_vertex(source)?;

    let task = ui.task(format!("Running {name} from vertex {source}"));
    let started = Instant::now();
    let supersteps = engine.run(&program)?;
    let reach = engine.query(&Reachability::new(unreached))?;
    let distance = engine.query(&DistanceSum::new(unreached))?;
    let elapsed = started.elapsed();
    task.finish();

    let stats = engine.stats();
    let cache = engine.cache_stats();
    Ok(RunReport {
        program: name,
        source,
        samples,
        supersteps,
        expected_reached: reach.expected(samples),
        reached_vertices: reach.reached_vertices(),
        mean_distance: distance.mean(),
        elapsed_ms: elapsed.as_millis() as u64,
        scatter_calls: stats.scatter_calls,
        gather_calls: stats.gather_calls,
        transforms: stats.transforms,
        dense_vertices: stats.dense_vertices,
        sparse_vertices: stats.sparse_vertices,
        cache_hits: cache.hits,
        cache_misses: cache.misses,
        cache_evictions: cache.evictions,
        cache_hit_ratio: cache.hit_ratio(),
    })
}

fn print_run(format: OutputFormat, ui: &Ui, report: &RunReport) -> CliResult<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    ui.section(
        "Result",
        [
            ("program", report.program.to_string()),
            ("source", report.source.to_string()),
            ("samples", report.samples.to_string()),
            ("supersteps", report.supersteps.to_string()),
            ("expected reached", format!("{:.3}", report.expected_reached)),
            ("reached vertices", report.reached_vertices.to_string()),
            ("mean distance", format!("{:.3}", report.mean_distance)),
            ("elapsed", format!("{}ms", report.elapsed_ms)),
        ],
    );
    ui.section(
        "Engine",
        [
            ("scatter calls", report.scatter_calls.to_string()),
            ("gather calls", report.gather_calls.to_string()),
            ("transforms", report.transforms.to_string()),
            ("dense vertices", report.dense_vertices.to_string()),
            ("sparse vertices", report.sparse_vertices.to_string()),
        ],
    );
    ui.section(
        "Cache",
        [
            ("hits", report.cache_hits.to_string()),
            ("misses", report.cache_misses.to_string()),
            ("evictions", report.cache_evictions.to_string()),
            ("hit ratio", format!("{:.3}", report.cache_hit_ratio)),
        ],
    );
    Ok(())
}
