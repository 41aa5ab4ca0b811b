//! Simflow CLI Entry Point
//!
//! Runs a workflow described by a parameter file, resuming from the ledger
//! of a previous run when one exists.
//!
//! # Usage
//!
//! ```bash
//! # Run (or resume) the workflow of a parameter file
//! simflow parameters.yaml
//!
//! # List tasks with their recorded status
//! simflow parameters.yaml --tasks
//!
//! # Stop normally after a given task
//! simflow parameters.yaml --stop-after evaluate_initial_misfit
//!
//! # Run at most 8 units at once
//! simflow parameters.yaml --parallel 8
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};

use simflow::config::load_parameters;
use simflow::ledger::TaskStatus;
use simflow::modules::{CapabilityBundle, CommandSolver, ThreadDispatcher};
use simflow::workflow::{run_iterations, Engine, Variant};
use simflow::{WorkflowError, APP_NAME, VERSION};

/// Parameter file used when none is specified.
const DEFAULT_PARAMETERS: &str = "parameters.yaml";

/// Command-line options.
#[derive(Debug)]
struct CliOptions {
    parameters: PathBuf,
    list_tasks: bool,
    stop_after: Option<String>,
    max_parallel: Option<usize>,
    verbose: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            parameters: PathBuf::from(DEFAULT_PARAMETERS),
            list_tasks: false,
            stop_after: None,
            max_parallel: None,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Resumable Simulation Workflow Engine");
    println!();
}

fn print_usage() {
    println!("Usage: simflow [OPTIONS] <PARAMETER_FILE>");
    println!();
    println!("Arguments:");
    println!("  <PARAMETER_FILE>    Path to the YAML parameter file (default: {})", DEFAULT_PARAMETERS);
    println!();
    println!("Options:");
    println!("  --tasks             List tasks and their recorded status, then exit");
    println!("  --stop-after NAME   Stop normally after task NAME");
    println!("  --parallel N        Maximum units run at once (default: CPU count)");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  simflow parameters.yaml");
    println!("  simflow parameters.yaml --tasks");
    println!("  simflow parameters.yaml --stop-after evaluate_initial_misfit --parallel 8");
}

/// Parses command-line arguments.
fn parse_arguments(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--tasks" => {
                options.list_tasks = true;
            }
            "--verbose" | "-v" => {
                options.verbose = true;
            }
            "--stop-after" => {
                i += 1;
                if i >= args.len() {
                    return Err("--stop-after requires a task name".to_string());
                }
                options.stop_after = Some(args[i].clone());
            }
            "--parallel" => {
                i += 1;
                if i >= args.len() {
                    return Err("--parallel requires a number argument".to_string());
                }
                let value: usize = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid parallel value: {}", args[i]))?;
                options.max_parallel = Some(value);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => options.parameters = PathBuf::from(arg),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Prints every task with its ledger status.
fn print_task_status(engine: &Engine) {
    println!("Tasks of the '{}' workflow:", engine.workflow().name());
    for (index, record) in engine.task_status().iter().enumerate() {
        let status = match record.status {
            TaskStatus::Complete => "complete".green(),
            TaskStatus::Failed => "failed".red(),
            TaskStatus::Pending => "pending".dimmed(),
        };
        println!("  {:>2}. {:<36} {}", index + 1, record.name, status);
    }
    println!();
}

/// Main application entry point.
fn run(options: CliOptions) -> simflow::Result<()> {
    let mut params = load_parameters(&options.parameters)?;
    if let Some(task) = options.stop_after {
        params.workflow.stop_after = Some(task);
    }

    let cwd = env::current_dir().map_err(|e| WorkflowError::io(".", e))?;
    let config = params.configuration(&cwd);
    info!("Working directory: {}", config.paths().workdir.display());

    let variant = Variant::from_name(&params.workflow.variant)?;
    let workflow = variant.build(&config)?;
    info!(
        "Workflow '{}' loaded: {} tasks",
        workflow.name(),
        workflow.tasks().len()
    );

    let parallel = options
        .max_parallel
        .or(params.system.parallel)
        .unwrap_or_else(num_cpus::get);
    let solver = CommandSolver::new(
        params.solver.clone().unwrap_or_default(),
        config.paths().solver_scratch(),
    );
    let modules = CapabilityBundle::new()
        .with_dispatcher(Arc::new(ThreadDispatcher::new(parallel)))
        .with_solver(Arc::new(solver));

    let mut engine = Engine::new(workflow, config, modules)?;

    if options.list_tasks {
        print_task_status(&engine);
        return Ok(());
    }

    engine.check()?;
    engine.setup()?;

    let result = run_iterations(&mut engine);

    println!();
    println!("{}", engine.timeline().gantt_chart());
    print_task_status(&engine);

    let summaries = result?;
    if let Some(task) = summaries.last().and_then(|s| s.stopped_after.as_ref()) {
        warn!("Stopped after '{}'; run again to continue", task);
    }
    println!("{}", "Workflow finished".green().bold());
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    let options = match parse_arguments(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(2);
        }
    };

    setup_logging(options.verbose);
    print_banner();

    match run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            if let WorkflowError::StepExecution { source, .. } = &e {
                error!("Caused by: {}", source.root_cause());
            }
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::from(e.exit_code())
        }
    }
}
