use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ensemble::definitions::AgentRoster;
use ensemble::engine::{ask, LineParser, TaskParser, WholeTextParser};
use ensemble::{
    ChainedWorkflow, Config, HierarchicalOrchestrator, NegotiationOrchestrator, OrchestrationError,
    ParallelOrchestrator, ResilientInvoker, SequentialOrchestrator, Topology,
};

#[derive(Parser)]
#[command(name = "ensemble")]
#[command(about = "Run generative agents in fixed topologies with retries and caching", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one topology for a goal.
    Run {
        #[arg(help = "sequential, parallel, hierarchical, negotiation or chained")]
        topology: Topology,

        #[arg(help = "Goal or prompt handed to the first agents")]
        goal: String,

        #[command(flatten)]
        setup: Setup,

        #[arg(long, value_delimiter = ',', default_values_t = vec![1u64, 2, 3])]
        seeds: Vec<u64>,

        #[arg(long, default_value_t = 3)]
        proposers: usize,

        #[arg(long, value_enum, default_value_t = ParserKind::Whole)]
        parser: ParserKind,
    },
    /// Send a single prompt to one agent.
    Ask {
        prompt: String,

        #[arg(long, default_value = "assistant", help = "Roster agent that answers")]
        agent: String,

        #[command(flatten)]
        setup: Setup,
    },
}

#[derive(Args)]
struct Setup {
    #[arg(long, help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Backend override: gemini, openai, anthropic, ollama or echo")]
    backend: Option<String>,

    #[arg(long, help = "Model override for every agent")]
    model: Option<String>,

    #[arg(long, help = "YAML roster replacing built-in agents by name")]
    agents: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ParserKind {
    /// The whole reply is one task.
    Whole,
    /// One task per line.
    Lines,
}

struct RunArgs {
    topology: Topology,
    goal: String,
    seeds: Vec<u64>,
    proposers: usize,
    parser: ParserKind,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            topology,
            goal,
            setup,
            seeds,
            proposers,
            parser,
        } => {
            let (config, roster, invoker) = prepare(setup, proposers)?;
            let args = RunArgs {
                topology,
                goal,
                seeds,
                proposers,
                parser,
            };
            run(args, &config, &roster, invoker).await?
        }
        Commands::Ask {
            prompt,
            agent,
            setup,
        } => {
            let (_, roster, invoker) = prepare(setup, 0)?;
            let completion = ask(&invoker, roster.get(&agent)?, &prompt).await?;
            if completion.cached {
                log::info!("Returning cached result");
            }
            println!("{}", completion.text);
        }
    }

    Ok(())
}

/// Config, roster and invoker from the shared command-line options.
fn prepare(setup: Setup, proposers: usize) -> Result<(Config, AgentRoster, Arc<ResilientInvoker>)> {
    let mut config = Config::load(setup.config.as_deref())?;
    if let Some(backend) = setup.backend {
        config.backend = backend.parse()?;
    }
    if setup.model.is_some() {
        config.model = setup.model;
    }
    config.validate()?;

    let mut roster = AgentRoster::builtin(config.model(), proposers);
    if let Some(path) = setup
        .agents
        .or_else(|| config.roster.as_ref().map(PathBuf::from))
    {
        roster
            .merge_file(&path)
            .with_context(|| format!("Failed to load roster {}", path.display()))?;
    }

    let invoker = Arc::new(
        ResilientInvoker::new(
            config.build_client()?,
            config.build_cache(),
            config.invocation.clone(),
        )
        .with_normalizer(config.normalizer()),
    );
    Ok((config, roster, invoker))
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

async fn run(
    args: RunArgs,
    config: &Config,
    roster: &AgentRoster,
    invoker: Arc<ResilientInvoker>,
) -> Result<()> {
    println!("Running {} topology for: {}", args.topology.as_str(), args.goal);

    match args.topology {
        Topology::Sequential => {
            let pipeline = SequentialOrchestrator::research_pipeline(invoker, roster)?;
            let run = pipeline.run(&args.goal).await.map_err(report)?;
            for (index, step) in run.steps.iter().enumerate() {
                println!("\n--- Step {} ({}) ---\n{}", index + 1, step.role, step.text);
            }
        }
        Topology::Parallel => {
            let parallel = ParallelOrchestrator::from_roster(invoker, roster)?;
            let run = parallel.run(&args.goal, &args.seeds).await.map_err(report)?;
            for branch in &run.branches {
                println!("\n--- Seed {} ---", branch.seed);
                match &branch.result {
                    Ok(output) => {
                        println!("Hypothesis: {}", output.hypothesis);
                        println!("Plan: {}", output.plan);
                    }
                    Err(failure) => println!("Failed: {}", failure),
                }
            }
        }
        Topology::Hierarchical => {
            let parser: Arc<dyn TaskParser> = match args.parser {
                ParserKind::Whole => Arc::new(WholeTextParser),
                ParserKind::Lines => Arc::new(LineParser),
            };
            let hierarchy = HierarchicalOrchestrator::from_roster(invoker, roster)?
                .with_parser(parser)
                .with_limits(config.hierarchy);
            let run = hierarchy.run(&args.goal).await.map_err(report)?;
            for (manager, node) in run.tree.children.iter().enumerate() {
                println!("\nManager {} assigned: {}", manager, node.task);
                for (worker, child) in node.children.iter().enumerate() {
                    println!(" - Worker performing: {}", child.task);
                    if let Some(text) = run.results.get(&(manager, worker)) {
                        println!("   {}", text);
                    }
                }
            }
        }
        Topology::Negotiation => {
            let negotiation = NegotiationOrchestrator::from_roster(invoker, roster, args.proposers)?;
            let run = negotiation.run(&args.goal).await.map_err(report)?;
            println!("\n--- Proposals ---");
            for proposal in &run.proposals {
                println!("[{}] {}", proposal.proposer, proposal.text);
            }
            for (proposer, failure) in &run.failures {
                println!("[{}] failed: {}", proposer, failure);
            }
            println!("\n--- Judge decision ---\n{}", run.verdict);
        }
        Topology::Chained => {
            let workflow = ChainedWorkflow::from_roster(invoker, roster)?;
            let run = workflow.run(&args.goal).await.map_err(report)?;
            println!("\n--- Search summary ---\n{}", run.summary);
            match &run.metric {
                Ok(metric) => println!("\n--- Extracted metric ---\n{}", metric.parsed),
                Err(failure) => println!("\n--- Extracted metric ---\nunavailable ({})", failure),
            }
            println!("\n--- Final output ---\n{}", run.answer);
        }
    }

    Ok(())
}

fn report(err: OrchestrationError) -> anyhow::Error {
    if let Some(location) = err.location() {
        eprintln!("Failed at: {}", location);
    }
    if let Some(attempts) = err.attempts() {
        eprintln!("Attempts made: {}", attempts);
    }
    err.into()
}
