use anyhow::Context as _;
use director_core::{
    builder::ObserverRef,
    collate::collate,
    ctx::Context,
    forward::ForwardObserver,
    plan::{self, Plan},
};
use director_stage::{
    campaign::{render_summary, Campaign},
    config::{Config, MachineConfig},
    machine_log::set_machine_id,
    stage::{bound, PlanStage, StageKit},
    stage_paths,
    util::setup_signal_handler,
};
use env_logger::{Env, TimestampPrecision};
use std::{
    io::{self, Stderr},
    path::{Path, PathBuf},
    sync::Arc,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "director", about = "Compiler testing with litmus tests")]
struct Settings {
    /// Tester configuration.
    #[structopt(long, short = "c", default_value = "director.toml")]
    config: PathBuf,
    /// Directory to write output to, instead of the configured one.
    #[structopt(long, short = "o")]
    out_dir: Option<PathBuf>,
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, StructOpt)]
enum Cmd {
    /// Plan a campaign over litmus tests; writes the plan to stdout.
    Plan {
        /// Seed of the plan, random if not given.
        #[structopt(long)]
        seed: Option<i64>,
        /// Litmus tests.
        #[structopt(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Replace each subject with fuzzed variants.
    Fuzz(StageArgs),
    /// Lift subjects into compilable harnesses.
    Lift(StageArgs),
    /// Compile every harness with every compiler.
    Compile(StageArgs),
    /// Run compiled tests and record what they observed.
    Run(StageArgs),
    /// Sort the subjects of a finished plan by outcome.
    Collate {
        /// Plan to read, `-` for stdin.
        #[structopt(default_value = "-")]
        plan: PathBuf,
    },
    /// Fuzz, lift, compile, run and collate on every machine of a plan.
    Campaign {
        /// Plan to read, `-` for stdin.
        #[structopt(default_value = "-")]
        plan: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
struct StageArgs {
    /// Stream progress and errors as JSON lines on stderr.
    #[structopt(long)]
    forward: bool,
    /// Plan to read, `-` for stdin.
    #[structopt(default_value = "-")]
    plan: PathBuf,
}

type Forwarder = Arc<ForwardObserver<Stderr>>;

fn main() {
    let settings = Settings::from_args();

    let forward = match &settings.cmd {
        Cmd::Fuzz(a) | Cmd::Lift(a) | Cmd::Compile(a) | Cmd::Run(a) if a.forward => {
            Some(Arc::new(ForwardObserver::new(io::stderr())))
        }
        _ => None,
    };
    // Forwarding owns stderr.
    if forward.is_none() {
        let log_env = Env::new()
            .filter_or("DIRECTOR_LOG", "info")
            .default_write_style_or("auto");
        env_logger::Builder::from_env(log_env)
            .format_timestamp(Some(TimestampPrecision::Seconds))
            .init();
    }

    if let Err(e) = boot(settings, forward.clone()) {
        match forward {
            Some(f) => f.forward_error(&e),
            None => log::error!("{:#}", e),
        }
        std::process::exit(1);
    }
}

fn boot(settings: Settings, forward: Option<Forwarder>) -> anyhow::Result<()> {
    let mut config = Config::load(&settings.config)?;
    if let Some(out_dir) = settings.out_dir {
        config.out_dir = out_dir;
    }
    config.check().context("bad configuration")?;

    let ctx = Context::background();
    setup_signal_handler(ctx.clone()).context("failed to set up signal handler")?;

    match settings.cmd {
        Cmd::Plan { seed, inputs } => {
            let catalog = Arc::new(config.catalog());
            let stage = PlanStage {
                finder: catalog.clone(),
                lister: catalog,
                machines: config.machines.iter().map(MachineConfig::plan).collect(),
                seed,
                workers: config.workers.plan,
                observers: Vec::new(),
            };
            let plan = stage.plan(&ctx, &inputs)?;
            log::info!("planned {} subjects", plan.corpus.len());
            plan.save(Path::new("-"))?;
        }
        Cmd::Fuzz(a) => run_stage(&ctx, &config, plan::Stage::Fuzz, a, forward)?,
        Cmd::Lift(a) => run_stage(&ctx, &config, plan::Stage::Lift, a, forward)?,
        Cmd::Compile(a) => run_stage(&ctx, &config, plan::Stage::Compile, a, forward)?,
        Cmd::Run(a) => run_stage(&ctx, &config, plan::Stage::Run, a, forward)?,
        Cmd::Collate { plan } => {
            let plan = load_plan(&plan)?;
            let c = collate(&ctx, &plan.corpus, bound(config.workers.collate))?;
            log::info!("{}", c);
            print!("{}", render_summary(&c));
        }
        Cmd::Campaign { plan } => {
            let plan = load_plan(&plan)?;
            let services = config.services();
            let campaign = Campaign::new(&config, &services);
            let outcomes = campaign.run(&ctx, plan)?;
            campaign.save(&outcomes)?;
            for o in &outcomes {
                log::info!("{}: {}", o.machine, o.collation);
            }
            log::info!("results saved in {}", config.out_dir.display());
        }
    }
    Ok(())
}

fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    Plan::load(path).with_context(|| format!("failed to load plan {}", path.display()))
}

fn run_stage(
    ctx: &Context,
    config: &Config,
    id: plan::Stage,
    args: StageArgs,
    forward: Option<Forwarder>,
) -> anyhow::Result<()> {
    let plan = load_plan(&args.plan)?;
    if let Ok(m) = plan.machine() {
        set_machine_id(m.id.to_string());
    }
    let mut observers: Vec<ObserverRef> = Vec::new();
    if let Some(f) = forward {
        observers.push(f);
    }
    let services = config.services();
    let kit = StageKit {
        config,
        services: &services,
        paths: stage_paths(config, &plan),
        observers,
    };
    let stage = kit
        .build(id)
        .with_context(|| format!("{} does not transform a plan", id))?;
    let plan = stage.run(ctx, plan)?;
    plan.save(Path::new("-"))?;
    Ok(())
}
