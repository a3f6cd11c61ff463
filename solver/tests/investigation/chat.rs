//! Investigation tests for the pipeline backed by an OpenAI-compatible model.
//!
//! Required environment:
//! - `OPENAI_API_KEY` (or the variable named by `SOLVER_API_KEY_ENV`)
//! - optional `SOLVER_BASE_URL` and `SOLVER_MODEL` to point at another server
//!
//! Run with:
//!
//! ```bash
//! cargo test -p solver --test investigation_llm -- --ignored
//!
//! # With logging (use --nocapture to see output for passing tests):
//! TEST_LOG=1 RUST_LOG=solver=debug cargo test -p solver --test investigation_llm -- --ignored --nocapture
//! ```

use std::sync::Once;
use std::time::Duration;

use solver::agents::Agents;
use solver::core::extract::extract_single_function;
use solver::io::agent::LanguageAgent;
use solver::io::chat::ChatAgent;
use solver::io::config::{AgentConfig, SolverConfig};
use solver::io::prompt::PromptBuilder;
use solver::solve::run_solve;
use solver::tree::ProblemNode;
use tracing::info;

const CALL_TIMEOUT: Duration = Duration::from_secs(120);

static INIT_LOGGING: Once = Once::new();

fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        if std::env::var("TEST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
                .init();
        }
    });
}

fn agent_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    if let Ok(base_url) = std::env::var("SOLVER_BASE_URL") {
        config.base_url = base_url;
    }
    if let Ok(model) = std::env::var("SOLVER_MODEL") {
        config.model = model;
    }
    if let Ok(var) = std::env::var("SOLVER_API_KEY_ENV") {
        config.api_key_env = Some(var);
    }
    config
}

#[test]
#[ignore]
fn chat_agent_honors_stop_sentinel_instruction() {
    init_test_logging();
    let agent = ChatAgent::from_config(&agent_config(), CALL_TIMEOUT).expect("chat agent");

    let response = agent
        .invoke("Reply with exactly the word No and nothing else.")
        .expect("invoke");
    info!(response = %response, "model replied");

    assert!(response.trim().trim_end_matches('.').eq_ignore_ascii_case("no"));
}

#[test]
#[ignore]
fn small_task_produces_one_valid_function() {
    init_test_logging();
    let agent = ChatAgent::from_config(&agent_config(), CALL_TIMEOUT).expect("chat agent");
    let config = SolverConfig {
        max_depth: 0,
        num_candidate_solutions: 1,
        review_max_iterations: 2,
        ..SolverConfig::default()
    };
    let prompts =
        PromptBuilder::new(config.prompt_budget_bytes, &config.protocol).expect("prompts");

    let outcome = run_solve(
        ProblemNode::new("Return the sum of two integers", 1, None),
        Agents::uniform(&agent),
        &prompts,
        &config,
    );
    info!(
        failures = outcome.failures.len(),
        code = %outcome.assembly.code,
        "solve finished"
    );

    let function = extract_single_function(&outcome.assembly.code).expect("single function");
    assert!(!function.parameters.is_empty());
    assert!(!outcome.assembly.documentation.is_empty());
}
