use clap::Parser;
use std::path::PathBuf;

use kxc::diag::{codes, DiagLevel, Diagnostic};
use kxc::driver_info::DRIVER_SLOTS;
use kxc::expand::ExpandOptions;
use kxc::pass::PassId;
use kxc::pipeline::{run_pipeline, CompilationState};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Expanded module as .kir text
    Ir,
    /// JSON expansion report
    Report,
    /// Resolved module before expansion
    Parsed,
}

#[derive(Parser, Debug)]
#[command(
    name = "kxc",
    version,
    about = "Kernel expansion compiler: wraps per-element compute kernels in driver loops"
)]
struct Cli {
    /// Input .kir module
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
    emit: EmitStage,

    /// Load every element stride from the driver-info record
    #[arg(long)]
    no_static_steps: bool,

    /// Omit type-based alias tags on generated accesses
    #[arg(long)]
    no_tbaa: bool,

    /// Maximum number of kernel inputs accepted
    #[arg(long, default_value_t = DRIVER_SLOTS)]
    input_limit: usize,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "kxc=debug" } else { "kxc=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn syntax_diagnostic<T: std::fmt::Display>(
    err: &chumsky::error::Rich<'_, T, chumsky::span::SimpleSpan>,
) -> Diagnostic {
    Diagnostic::error(*err.span(), err.to_string()).with_code(codes::E0100)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.verbose {
        eprintln!("kxc: source = {}", cli.source.display());
        eprintln!("kxc: emit   = {:?}", cli.emit);
    }

    let options = ExpandOptions {
        static_steps: !cli.no_static_steps,
        tbaa: !cli.no_tbaa,
        input_limit: cli.input_limit,
        ..ExpandOptions::default()
    };

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("kxc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let file = cli.source.display().to_string();

    let parse_result = kxc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            eprintln!("{}", syntax_diagnostic(err).render(&file, &source));
        }
        std::process::exit(1);
    }
    let ast = match parse_result.module {
        Some(m) => m,
        None => {
            eprintln!("kxc: parse failed with no output");
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!("kxc: parsed {} items", ast.items.len());
    }

    // ── Run passes ──
    let terminal = match cli.emit {
        EmitStage::Parsed => PassId::Verify,
        EmitStage::Ir => PassId::Expand,
        EmitStage::Report => PassId::Report,
    };
    let mut state = CompilationState::new(ast, &source, &options);
    let outcome = run_pipeline(&mut state, terminal, &options, cli.verbose, |_, diags| {
        for d in diags {
            eprintln!("{}", d.render(&file, &source));
        }
    });
    if let Err(e) = outcome {
        if cli.verbose {
            eprintln!("kxc: stopped after {:?}", e.failing_pass);
        }
        std::process::exit(1);
    }
    let warnings = state
        .diagnostics
        .iter()
        .filter(|d| d.level == DiagLevel::Warning)
        .count();
    if cli.verbose && warnings > 0 {
        eprintln!("kxc: {} warning(s)", warnings);
    }

    // ── Emit ──
    let text = match cli.emit {
        EmitStage::Ir | EmitStage::Parsed => match &state.artifacts.module {
            Some(m) => m.to_string(),
            None => {
                eprintln!("kxc: no module produced");
                std::process::exit(1);
            }
        },
        EmitStage::Report => match state.artifacts.report.as_ref().map(|r| r.to_json()) {
            Some(Ok(json)) => json,
            Some(Err(e)) => {
                eprintln!("kxc: error: report serialization: {}", e);
                std::process::exit(1);
            }
            None => {
                eprintln!("kxc: no report produced");
                std::process::exit(1);
            }
        },
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("kxc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}
