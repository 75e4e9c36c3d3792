use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use sfe::addr_gen::{describe_params, eval_linear, LinearAddrGen};
use sfe::affine::AffinePattern;
use sfe::data_move::DataMoveCompiler;
use sfe::diag::Coded;
use sfe::id::DynStreamId;
use sfe::options::{short_hex, EngineOptions};
use sfe::pum_command::{format_commands, ComputeOp};
use sfe::slicer::ElementSlicer;
use sfe::topology::PumHwConfig;
use sfe::value::invariant_params;

#[derive(Parser, Debug)]
#[command(
    name = "sfe",
    version,
    about = "Stream Float Engine — stream address generation, slicing and PUM data-move compilation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Engine options JSON (line size, coalescing, compute delays)
    #[arg(long, global = true)]
    options: Option<PathBuf>,

    /// Log engine decisions at debug level
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the addresses of a linear pattern
    Addr {
        /// Linear parameters `stride0,[trip,stride]*,[trip],start`
        #[arg(long, value_delimiter = ',', value_parser = parse_word, allow_hyphen_values = true)]
        params: Vec<u64>,

        /// Number of elements to print
        #[arg(long, default_value_t = 8)]
        count: u64,
    },
    /// Print the cache-line slices of a linear stream
    Slice {
        #[arg(long, value_delimiter = ',', value_parser = parse_word, allow_hyphen_values = true)]
        params: Vec<u64>,

        /// Element size in bytes
        #[arg(long)]
        elem_size: u64,

        /// Total trip count, if known
        #[arg(long)]
        total_trip: Option<u64>,

        /// Override the line size from the options file
        #[arg(long)]
        line_size: Option<u64>,

        /// Emit one slice per element and line
        #[arg(long)]
        no_coalesce: bool,

        /// Number of slices to print
        #[arg(long, default_value_t = 8)]
        count: u64,
    },
    /// Compile a PUM data-move job and print its commands
    Pum {
        /// Job description (JSON)
        job: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatternSpec {
    start: i64,
    /// (stride, trip) pairs, innermost first
    params: Vec<(i64, i64)>,
}

impl PatternSpec {
    fn to_pattern(&self) -> AffinePattern {
        AffinePattern::new(self.start, self.params.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComputeSpec {
    op: ComputeOp,
    #[serde(default)]
    reduce: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PumJob {
    #[serde(default)]
    hw: PumHwConfig,
    array_sizes: Vec<i64>,
    tile_sizes: Vec<i64>,
    src: PatternSpec,
    dst: PatternSpec,
    /// Compute applied over the destination region after the move.
    #[serde(default)]
    compute: Option<ComputeSpec>,
    #[serde(default)]
    wordline_bits: Option<u32>,
}

/// Decimal, `0x` hex, or negative (two's complement) parameter word.
fn parse_word(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse::<u64>(),
    }
    .map_err(|e| format!("invalid parameter '{}': {}", s, e))?;
    Ok(if neg { value.wrapping_neg() } else { value })
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_options(path: Option<&Path>) -> Result<EngineOptions, ExitCode> {
    match path {
        Some(path) => EngineOptions::load(path).map_err(|e| {
            eprintln!("sfe: {}: {}", path.display(), e.to_diagnostic());
            ExitCode::from(2)
        }),
        None => Ok(EngineOptions::default()),
    }
}

fn check_params(params: &[u64], verbose: bool) -> Result<(), ExitCode> {
    if params.len() < 2 {
        eprintln!("sfe: error: a linear pattern needs at least 2 params, got {}", params.len());
        return Err(ExitCode::from(2));
    }
    match describe_params(&invariant_params(params)) {
        Ok(desc) => {
            if verbose {
                eprintln!("sfe: pattern {}", desc);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("sfe: {}", e.to_diagnostic());
            Err(ExitCode::from(1))
        }
    }
}

fn run_pum(path: &Path, verbose: bool) -> Result<(), ExitCode> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("sfe: error: {}: {}", path.display(), e);
        ExitCode::from(2)
    })?;
    let job: PumJob = serde_json::from_str(&text).map_err(|e| {
        eprintln!("sfe: error: {}: {}", path.display(), e);
        ExitCode::from(2)
    })?;
    if let Err(e) = job.hw.validate() {
        eprintln!("sfe: {}: {}", path.display(), e.to_diagnostic());
        return Err(ExitCode::from(2));
    }
    if verbose {
        match job.hw.fingerprint() {
            Ok(hash) => eprintln!("sfe: hw {}", short_hex(&hash)),
            Err(e) => eprintln!("sfe: {}", e.to_diagnostic()),
        }
    }

    let fail = |e: sfe::error::PumError| {
        eprintln!("sfe: {}", e.to_diagnostic());
        ExitCode::from(1)
    };
    let mut compiler = DataMoveCompiler::new(job.hw.clone(), job.array_sizes.clone(), job.tile_sizes.clone())
        .map_err(fail)?;
    if let Some(bits) = job.wordline_bits {
        compiler = compiler.with_wordline_bits(bits);
    }
    let dst = job.dst.to_pattern();
    let mut commands = compiler.compile(&job.src.to_pattern(), &dst).map_err(fail)?;
    if let Some(compute) = &job.compute {
        if !commands.is_empty() {
            compiler.append_sync(&mut commands);
        }
        commands.extend(compiler.compile_compute(compute.op, &dst, compute.reduce).map_err(fail)?);
    }
    if verbose {
        eprintln!("sfe: {} commands", commands.len());
    }
    print!("{}", format_commands(&commands));
    Ok(())
}

fn run(cli: &Cli) -> Result<(), ExitCode> {
    let options = load_options(cli.options.as_deref())?;
    match &cli.command {
        Command::Addr { params, count } => {
            check_params(params, cli.verbose)?;
            for idx in 0..*count {
                println!("{} {:#x}", idx, eval_linear(idx, params));
            }
        }
        Command::Slice {
            params,
            elem_size,
            total_trip,
            line_size,
            no_coalesce,
            count,
        } => {
            check_params(params, cli.verbose)?;
            let line = line_size.unwrap_or(options.line_size);
            if line == 0 || !line.is_power_of_two() || *elem_size == 0 {
                eprintln!("sfe: error: line size must be a power of two and element size non-zero");
                return Err(ExitCode::from(2));
            }
            let mut slicer = ElementSlicer::new(
                DynStreamId::new(0, 0, 1).into(),
                invariant_params(params),
                Rc::new(LinearAddrGen),
                *elem_size,
                *total_trip,
                line,
                options.coalesce_continuous && !no_coalesce,
            );
            for _ in 0..*count {
                // Stop before the one element tolerated past the end.
                if total_trip.map_or(false, |t| slicer.peek_next_slice().lhs >= t) {
                    break;
                }
                println!("{}", slicer.next_slice());
            }
        }
        Command::Pum { job } => run_pum(job, cli.verbose)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}
