//! flowplan CLI: validate, explain, optimize and run YAML plan scripts.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use flowplan_core::config::{FailurePolicy, OptimizerConfig, RescanPolicy};
use flowplan_core::storage::LocationResolver;
use flowplan_exec::json::{from_json_lines, to_json_lines};
use flowplan_exec::{ExecutionEngine, LocalEngine, MemoryStorage};
use flowplan_optimizer::{OptimizationReport, PlanOptimizer};
use flowplan_planner::{explain, parse_script, ParsedScript};
use tracing::info;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "flowplan", version = flowplan_core::VERSION)]
#[command(about = "Rule-based optimizer for dataflow logical plans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Optimizer settings; each flag overrides the environment and the script.
#[derive(Args, Debug, Default, Clone)]
struct OptimizerArgs {
    /// Iteration ceiling per rule set
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Where to look for matches after a rewrite: region or whole
    #[arg(long)]
    rescan: Option<RescanPolicy>,

    /// What to do when a rule fails: abort or best_effort
    #[arg(long)]
    failure_policy: Option<FailurePolicy>,

    /// Disable a rule by name (repeatable)
    #[arg(long = "disable-rule")]
    disable_rules: Vec<String>,

    /// Record before/after listings of every rule application
    #[arg(long)]
    trace: bool,

    /// Do not annotate loads with the map keys they need
    #[arg(long)]
    no_prune_map_keys: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a script and validate the resulting plan
    Validate {
        #[arg(short, long)]
        script: PathBuf,
    },

    /// Print the plan in dependency order with schemas
    Explain {
        #[arg(short, long)]
        script: PathBuf,

        /// Explain the plan after optimization
        #[arg(long)]
        optimized: bool,

        #[command(flatten)]
        optimizer: OptimizerArgs,
    },

    /// Optimize a script's plan and report which rules fired
    Optimize {
        #[arg(short, long)]
        script: PathBuf,

        /// Print the report as JSON instead of the optimized plan
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        optimizer: OptimizerArgs,
    },

    /// Execute a script on the local engine over JSON-lines inputs
    Run {
        #[arg(short, long)]
        script: PathBuf,

        /// Input data as LOCATION=FILE, one JSON array per line (repeatable)
        #[arg(short, long = "input", value_parser = parse_binding)]
        inputs: Vec<(String, PathBuf)>,

        /// Execute the plan as written
        #[arg(long)]
        no_optimize: bool,

        /// Write each store's output to DIR instead of stdout
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        optimizer: OptimizerArgs,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Validate { script } => validate_script(&script),
        Commands::Explain {
            script,
            optimized,
            optimizer,
        } => explain_script(&script, optimized, &optimizer),
        Commands::Optimize {
            script,
            json,
            optimizer,
        } => optimize_script(&script, json, &optimizer),
        Commands::Run {
            script,
            inputs,
            no_optimize,
            output_dir,
            optimizer,
        } => run_script(&script, &inputs, no_optimize, output_dir.as_deref(), &optimizer),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        let mut code = 1;
        if let Some(core) = e.downcast_ref::<flowplan_core::error::Error>() {
            for hint in core.suggestions() {
                eprintln!("  hint: {hint}");
            }
            // script mistakes exit 2, engine/runtime failures exit 1
            if core.is_frontend() {
                code = 2;
            }
        }
        std::process::exit(code);
    }
}

fn current_dir() -> CliResult<String> {
    Ok(std::env::current_dir()?.to_string_lossy().into_owned())
}

fn load_script(path: &Path) -> CliResult<ParsedScript> {
    let text = fs::read_to_string(path)?;
    parse_script(&text, &current_dir()?)
        .map_err(|e| e.with_context(path.display().to_string()).into())
}

fn apply_overrides(cfg: &mut OptimizerConfig, args: &OptimizerArgs) {
    if let Some(max) = args.max_iterations {
        cfg.max_iterations = max;
    }
    if let Some(rescan) = args.rescan {
        cfg.rescan = rescan;
    }
    if let Some(policy) = args.failure_policy {
        cfg.failure_policy = policy;
    }
    for rule in &args.disable_rules {
        if !cfg.is_disabled(rule) {
            cfg.disabled_rules.push(rule.clone());
        }
    }
    if args.trace {
        cfg.enable_trace = true;
    }
    if args.no_prune_map_keys {
        cfg.prune_map_keys = false;
    }
}

fn optimize_parsed(
    parsed: &mut ParsedScript,
    args: &OptimizerArgs,
) -> CliResult<OptimizationReport> {
    let mut config = parsed.config.clone();
    apply_overrides(&mut config, args);
    let optimizer = PlanOptimizer::with_default_rules(config);
    let report = optimizer.optimize(parsed.session.plan_mut())?;
    parsed.session.refresh_aliases();
    for t in &report.trace {
        eprintln!(
            "-- {} (iteration {})\n{}=>\n{}",
            t.rule_name, t.iteration, t.before, t.after
        );
    }
    for w in &report.warnings {
        eprintln!("warning: {w}");
    }
    Ok(report)
}

fn validate_script(path: &Path) -> CliResult<()> {
    let parsed = load_script(path)?;
    parsed.session.plan().validate()?;
    println!(
        "✓ Script is valid ({} operators, {} stores)",
        parsed.session.plan().len(),
        parsed.session.stores().len()
    );
    Ok(())
}

fn explain_script(path: &Path, optimized: bool, args: &OptimizerArgs) -> CliResult<()> {
    let mut parsed = load_script(path)?;
    if optimized {
        optimize_parsed(&mut parsed, args)?;
    }
    print!("{}", explain(parsed.session.plan_mut())?);
    Ok(())
}

fn optimize_script(path: &Path, json: bool, args: &OptimizerArgs) -> CliResult<()> {
    let mut parsed = load_script(path)?;
    let report = optimize_parsed(&mut parsed, args)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print!("{}", explain(parsed.session.plan_mut())?);
    println!();
    println!("Iterations: {}", report.iterations);
    for (rule, count) in &report.applications {
        println!("  {rule}: {count}");
    }
    if report.hit_ceiling {
        println!("Iteration ceiling reached");
    }
    if report.map_key_loads > 0 {
        println!("Loads annotated with map keys: {}", report.map_key_loads);
    }
    Ok(())
}

fn run_script(
    path: &Path,
    inputs: &[(String, PathBuf)],
    no_optimize: bool,
    output_dir: Option<&Path>,
    args: &OptimizerArgs,
) -> CliResult<()> {
    let mut parsed = load_script(path)?;
    if !no_optimize {
        optimize_parsed(&mut parsed, args)?;
    }

    let cwd = current_dir()?;
    let storage = MemoryStorage::new();
    for (location, file) in inputs {
        let location = storage.relative_to_absolute_path(location, &cwd)?;
        let records = from_json_lines(&fs::read_to_string(file)?)?;
        info!(location = %location, records = records.len(), "loaded input");
        storage.insert(location, records)?;
    }

    let engine = LocalEngine::new(storage);
    let physical = engine.compile(parsed.session.plan())?;
    let jobs = engine.execute(&physical)?;

    let mut incomplete = 0;
    for job in &jobs {
        match &job.error {
            Some(err) => eprintln!("{:?} {}: {err}", job.status, job.location),
            None => eprintln!("{:?} {} ({} records)", job.status, job.location, job.records.len()),
        }
        if !job.is_completed() {
            incomplete += 1;
            continue;
        }
        let lines = to_json_lines(&job.records)?;
        match output_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                fs::write(dir.join(output_file_name(&job.location)), lines)?;
            }
            None => {
                println!("# {}", job.location);
                print!("{lines}");
            }
        }
    }
    if incomplete > 0 {
        return Err(format!("{incomplete} of {} jobs did not complete", jobs.len()).into());
    }
    Ok(())
}

fn parse_binding(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((location, file)) if !location.is_empty() && !file.is_empty() => {
            Ok((location.to_string(), PathBuf::from(file)))
        }
        _ => Err(format!("expected LOCATION=FILE, got '{s}'")),
    }
}

fn output_file_name(location: &str) -> String {
    let name: String = location
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{}.jsonl", name.trim_start_matches('_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_script_config() {
        let mut config = OptimizerConfig::default().with_max_iterations(7);
        let args = OptimizerArgs {
            max_iterations: Some(3),
            rescan: Some(RescanPolicy::Whole),
            disable_rules: vec!["MergeFilter".into(), "MergeFilter".into()],
            no_prune_map_keys: true,
            ..Default::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.rescan, RescanPolicy::Whole);
        assert_eq!(config.disabled_rules, vec!["MergeFilter".to_string()]);
        assert!(!config.prune_map_keys);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
    }

    #[test]
    fn unset_flags_keep_script_config() {
        let mut config = OptimizerConfig::default().with_max_iterations(7);
        apply_overrides(&mut config, &OptimizerArgs::default());
        assert_eq!(config.max_iterations, 7);
        assert!(config.prune_map_keys);
    }

    #[test]
    fn bindings_and_output_names() {
        assert_eq!(
            parse_binding("data/in=in.jsonl").unwrap(),
            ("data/in".to_string(), PathBuf::from("in.jsonl"))
        );
        assert!(parse_binding("nofile").is_err());
        assert_eq!(output_file_name("/work/out/a"), "work_out_a.jsonl");
        assert_eq!(output_file_name("memory://x"), "memory___x.jsonl");
    }
}
