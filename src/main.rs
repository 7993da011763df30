use anyhow::Result;
use clap::Parser;
use hrmlink::cli::{AppContext, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
    };

    hrmlink::infra::logging::init(cli.quiet, cli.verbose, cli.no_color)?;

    match cli.command {
        Commands::Send(args) => hrmlink::cli_ext::send_run(args, &ctx),
        Commands::Retrieve(args) => hrmlink::cli_ext::retrieve_run(args, &ctx),
        Commands::Discover(args) => hrmlink::cli_ext::discover_run(args, &ctx),
        Commands::Init(args) => hrmlink::infra::config::init(args, &ctx),
        Commands::Completions(args) => hrmlink::completion::run(args, &ctx),
    }
}
