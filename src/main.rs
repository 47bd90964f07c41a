use anyhow::{Context, Result};
use clap::Parser;
use tardis::{
    cli::Cli,
    config::{LaunchConfig, ScalingConfig},
    session::Session,
    tracer::{ProcessController, Spawned},
};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber: warnings by default, every stop with --debug
fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = ScalingConfig::new(args.delay_factor, args.time_factor)?;
    let launch = LaunchConfig::new(args.command.clone(), args.preload())?;

    // Anchors are sampled here, before the target exists
    let session = Session::start(config);

    let status = match ProcessController::spawn(&launch, &session)
        .with_context(|| format!("Failed to start {}", launch.program()))?
    {
        Spawned::Traced(controller) => controller
            .run()
            .with_context(|| format!("Lost track of {}", launch.program()))?,
        Spawned::Exited(status) => status,
    };

    // Exit with the traced program's exit code
    std::process::exit(status);
}
