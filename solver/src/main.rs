//! Recursive LLM problem solver.
//!
//! Decomposes a task description into a tree of subproblems, synthesizes one
//! Python function per node and prints the assembled code and documentation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use solver::agents::Agents;
use solver::core::extract::extract_single_function;
use solver::core::parse::strip_code_fence;
use solver::exit_codes;
use solver::io::agent::{Role, build_agent};
use solver::io::config::{
    AssemblyMode, DEFAULT_CONFIG_PATH, SolverConfig, load_config, write_config,
};
use solver::io::prompt::PromptBuilder;
use solver::io::report::write_report;
use solver::io::transcript::{Transcribed, Transcript};
use solver::logging;
use solver::solve::{SolveOutcome, run_solve};
use solver::tree::ProblemNode;

#[derive(Parser)]
#[command(
    name = "solver",
    version,
    about = "Recursive problem decomposer that synthesizes Python functions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decompose a task and print the generated code and documentation.
    Solve(SolveArgs),
    /// Write a default `solver.toml`.
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Check that a file holds exactly one Python function definition.
    Validate {
        file: PathBuf,
    },
}

#[derive(Args)]
struct SolveArgs {
    /// Root task description.
    description: String,
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Candidate solutions generated per node.
    #[arg(long)]
    candidates: Option<u32>,
    /// Tag passed to every prompt (e.g. "Math").
    #[arg(long)]
    problem_type: Option<String>,
    #[arg(long)]
    max_depth: Option<u32>,
    /// Let the coder merge each parent function with its subtree's code.
    #[arg(long)]
    combine: bool,
    /// Write a JSON report of the tree and failures.
    #[arg(long)]
    report: Option<PathBuf>,
    /// Append every agent call to a JSONL transcript.
    #[arg(long)]
    transcript: Option<PathBuf>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Solve(args) => cmd_solve(args),
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Validate { file } => cmd_validate(&file),
    }
}

fn cmd_solve(args: SolveArgs) -> Result<i32> {
    let description = args.description.trim();
    if description.is_empty() {
        bail!("task description must not be empty");
    }

    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let mut prompts = PromptBuilder::new(config.prompt_budget_bytes, &config.protocol)?;
    if let Some(dir) = &config.templates_dir {
        prompts = prompts.with_overrides(dir)?;
    }

    let generalist = build_agent(Role::Generalist, &config.agents.generalist)?;
    let coder = build_agent(Role::Coder, &config.agents.coder)?;
    let critic = build_agent(Role::Critic, &config.agents.critic)?;

    let root = ProblemNode::new(
        description,
        config.num_candidate_solutions,
        config.problem_type.clone(),
    )
    .with_examples(config.examples.clone());
    let outcome = match &args.transcript {
        Some(path) => {
            let transcript = Transcript::create(path)?;
            let generalist = Transcribed::new(&generalist, Role::Generalist, &transcript);
            let coder = Transcribed::new(&coder, Role::Coder, &transcript);
            let critic = Transcribed::new(&critic, Role::Critic, &transcript);
            run_solve(
                root,
                Agents {
                    generalist: &generalist,
                    coder: &coder,
                    critic: &critic,
                },
                &prompts,
                &config,
            )
        }
        None => run_solve(
            root,
            Agents {
                generalist: &*generalist,
                coder: &*coder,
                critic: &*critic,
            },
            &prompts,
            &config,
        ),
    };

    if let Some(path) = &args.report {
        write_report(path, &outcome)?;
    }
    print_outcome(&outcome);
    Ok(if outcome.is_clean() {
        exit_codes::OK
    } else {
        exit_codes::PARTIAL
    })
}

fn apply_overrides(config: &mut SolverConfig, args: &SolveArgs) {
    if let Some(candidates) = args.candidates {
        config.num_candidate_solutions = candidates;
    }
    if let Some(problem_type) = &args.problem_type {
        config.problem_type = Some(problem_type.clone());
    }
    if let Some(max_depth) = args.max_depth {
        config.max_depth = max_depth;
    }
    if args.combine {
        config.assembly = AssemblyMode::Combine;
    }
}

fn print_outcome(outcome: &SolveOutcome) {
    println!("Generated Project Code:");
    println!("{}", outcome.assembly.code);
    println!();
    println!("Generated Project Documentation:");
    println!("{}", outcome.assembly.documentation);

    if outcome.forced_leaves > 0 {
        eprintln!(
            "note: {} node(s) were not decomposed because the budget ran out",
            outcome.forced_leaves
        );
    }
    for failure in &outcome.failures {
        eprintln!("failed: {failure}");
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &SolverConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(path: &Path) -> Result<i32> {
    let source = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match extract_single_function(&strip_code_fence(&source)) {
        Ok(function) => {
            println!("{}", function.header());
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("{}: {}", path.display(), err);
            Ok(exit_codes::INVALID)
        }
    }
}
