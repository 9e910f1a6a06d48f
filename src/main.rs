use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use stress_judge::cancel;
use stress_judge::cleaner;
use stress_judge::compiler::Compiler;
use stress_judge::config::{Overrides, StressConfig, CONFIG_ENV};
use stress_judge::judger::{Program, Programs};
use stress_judge::tester::{StdinPrompt, StressTest};

#[derive(Parser)]
#[command(name = "stress-judge", version)]
#[command(about = "Stress test a solution against a reference solution", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile everything and run the stress test on <CODE>
    Test(TestArgs),
    /// Remove test files, compile log and compiled binaries
    Clean,
}

#[derive(Args)]
struct TestArgs {
    /// Solution under test (`<CODE>.cpp` or a prebuilt `<CODE>`)
    code: String,

    /// Generator name
    #[arg(long = "gen")]
    generator: Option<String>,

    /// Reference solution name
    #[arg(long = "std")]
    standard: Option<String>,

    /// Checker name
    #[arg(long = "chk")]
    checker: Option<String>,

    /// Number of tests
    #[arg(short = 'n', long)]
    tests: Option<u64>,

    /// Time limit of the solutions in milliseconds
    #[arg(short = 't', long, value_name = "TL_MS")]
    time_limit: Option<u64>,

    /// Memory limit of the solutions in megabytes
    #[arg(short = 'm', long, value_name = "ML_MB")]
    memory_limit: Option<u64>,

    /// Judgers running in parallel
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Print a JSON summary on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stress_judge=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Test(args) => test(config_path, args).await,
        Commands::Clean => clean(config_path).await,
    }
}

async fn test(config_path: Option<&Path>, args: TestArgs) -> Result<i32> {
    let mut config = StressConfig::load(config_path)?;
    config.apply(&Overrides {
        generator: args.generator,
        standard: args.standard,
        checker: args.checker,
        tests: args.tests,
        time_ms: args.time_limit,
        memory_mb: args.memory_limit,
        jobs: args.jobs,
    });
    config.validate()?;

    let code = args
        .code
        .strip_suffix(".cpp")
        .unwrap_or(&args.code)
        .to_string();

    let compiler = Compiler::new(&config);
    let binaries = compiler
        .compile_all(&[
            config.generator.as_str(),
            code.as_str(),
            config.standard.as_str(),
            config.checker.as_str(),
        ])
        .await?;
    let [generator, executor, standard, checker] = binaries.as_slice() else {
        anyhow::bail!("Expected four programs, got {}", binaries.len());
    };
    let programs = Programs {
        generator: Program::new(generator),
        executor: Program::new(executor),
        standard: Program::new(standard),
        checker: Program::new(checker),
    };

    info!(
        "Testing {} against {} on {} tests ({} ms, {} MB, {} jobs)",
        code, config.standard, config.tests, config.limits.time_ms, config.limits.memory_mb, config.jobs
    );

    let (sender, mut interrupts) = cancel::channel();
    let listener = cancel::listen_for_ctrl_c(sender);

    let tester = StressTest::new(&config, &programs)?;
    let summary = tester.run(&mut interrupts, &mut StdinPrompt).await;
    listener.abort();
    let summary = summary?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(summary.exit_code())
}

async fn clean(config_path: Option<&Path>) -> Result<i32> {
    let config = StressConfig::load(config_path)?;
    for path in cleaner::clean(&config).await? {
        info!("Removed {}", path.display());
    }
    Ok(0)
}
