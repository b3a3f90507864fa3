use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stagecraft_core::config::{AppConfig, ModelConfig, PipelineConfig};
use stagecraft_core::traits::StructuredInvoker;

use stagecraft_agent::graph::{CompiledGraph, EdgeCondition};
use stagecraft_agent::pipeline;
use stagecraft_llm::{presets, LlmInvoker};

#[derive(Parser)]
#[command(name = "stagecraft", version, about = "Staged LLM pipelines over shared state")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "stagecraft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the planner → architect pipeline on a prompt and print the final state
    Run {
        /// The request to plan (read from stdin if omitted)
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Also write the full execution result as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
    /// Print the pipeline's nodes and edges
    Graph,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stagecraft=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Completions don't need config
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "stagecraft", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Graph) => {
            let graph = build_graph(&config)?;
            print_graph(&graph);
        }
        Some(Commands::Run { prompt, output }) => {
            let text = if prompt.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                prompt.join(" ")
            };
            if text.trim().is_empty() {
                anyhow::bail!("empty prompt: pass it as arguments or on stdin");
            }
            run_pipeline(&config, &text, output.as_deref()).await?;
        }
        Some(Commands::Completions { .. }) => unreachable!("handled before config load"),
        None => {
            Cli::command().print_help()?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = dirs_home().map(|h| h.join(".stagecraft").join("config.toml"));
    if let Some(path) = home_config.filter(|p| p.exists()) {
        info!(path = %path.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&path)?);
    }

    warn!("No config file found, configuring the model from the environment");
    eprintln!("See stagecraft.toml.example for reference.");
    Ok(create_env_config())
}

/// Minimal config from whichever API key is set; local Ollama otherwise.
fn create_env_config() -> AppConfig {
    let (provider, model_id, api_key) = if let Ok(key) = std::env::var("GROQ_API_KEY") {
        ("groq", "openai/gpt-oss-120b", Some(key))
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        ("openai", "gpt-4o-mini", Some(key))
    } else {
        ("ollama", "llama3.2", None)
    };

    AppConfig {
        model: ModelConfig {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            api_key,
            base_url: None,
            max_tokens: 8192,
            temperature: 0.0,
            extra_headers: Default::default(),
            retry: None,
        },
        fallback_models: Vec::new(),
        pipeline: PipelineConfig::default(),
    }
}

fn build_invoker(config: &AppConfig) -> anyhow::Result<Arc<dyn StructuredInvoker>> {
    if presets::get_preset(&config.model.provider).is_none() && config.model.base_url.is_none() {
        anyhow::bail!(
            "unknown provider '{}' and no base_url set (known providers: {})",
            config.model.provider,
            presets::all_preset_names().join(", ")
        );
    }
    let model = presets::resolve(&config.model);
    let llm = stagecraft_llm::build_client(&model, &config.fallback_models);
    let mut invoker = LlmInvoker::new(llm, model);
    if let Some(secs) = config.pipeline.invoke_timeout_secs {
        invoker = invoker.with_timeout(Duration::from_secs(secs));
    }
    Ok(Arc::new(invoker))
}

fn build_graph(config: &AppConfig) -> anyhow::Result<CompiledGraph> {
    Ok(pipeline::build_pipeline_with(
        build_invoker(config)?,
        &config.pipeline,
    )?)
}

async fn run_pipeline(config: &AppConfig, prompt: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let mut graph = build_graph(config)?;
    info!(
        provider = %config.model.provider,
        model = %config.model.model_id,
        "Running pipeline"
    );

    let result = pipeline::execute(&mut graph, &config.pipeline, prompt).await?;
    for node in &result.node_results {
        info!(node_id = %node.node_id, elapsed_ms = node.elapsed_ms, "Node finished");
    }

    println!("{}", serde_json::to_string_pretty(&result.state)?);

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&result)?)?;
        info!(path = %path.display(), run_id = %result.run_id, "Wrote execution result");
    }
    Ok(())
}

fn print_graph(graph: &CompiledGraph) {
    println!("entry: {}", graph.entry_point());
    println!("\nnodes:");
    for node in graph.nodes() {
        println!(
            "  {:<12} reads [{}]  writes [{}]",
            node.name,
            node.input_keys().join(", "),
            node.output_keys().join(", ")
        );
    }
    println!("\nedges:");
    for edge in graph.edges() {
        match &edge.condition {
            EdgeCondition::Always => println!("  {} -> {}", edge.from, edge.to),
            EdgeCondition::Conditional { expr } => {
                println!("  {} -> {}  when {}", edge.from, edge.to, expr)
            }
        }
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
