use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use gqlmeta_core::config::load_config;
use gqlmeta_core::context::{ExecutionContext, ServerOverrides, resolve_execution_context};
use gqlmeta_core::logging::{self, Profile};
use gqlmeta_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, normalize_for_display, resolve_paths,
};
use gqlmeta_core::{CommandOptions, MetadataAction};

#[derive(Debug, Parser)]
#[command(
    name = "gqlmeta",
    version,
    about = "Manage metadata of a GraphQL engine"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "info", value_name = "LEVEL")]
    log_level: String,
    #[arg(long, global = true, default_value = "text", value_name = "FORMAT")]
    log_format: String,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Manage engine metadata")]
    Metadata(MetadataArgs),
}

#[derive(Debug, Args)]
struct MetadataArgs {
    #[command(subcommand)]
    command: MetadataSubcommand,
}

#[derive(Debug, Subcommand)]
enum MetadataSubcommand {
    #[command(
        about = "Export engine metadata to the local metadata file",
        after_help = "Examples:\n  # Export metadata and save it in migrations/metadata.yaml file:\n  gqlmeta metadata export"
    )]
    Export(ServerArgs),
    #[command(
        about = "Reset or clean engine metadata on the database",
        after_help = "Examples:\n  # Clean all the metadata information from database:\n  gqlmeta metadata reset"
    )]
    Reset(ServerArgs),
    #[command(about = "Reload engine metadata from the database catalog")]
    Reload(ServerArgs),
    #[command(about = "Replace engine metadata with the local metadata file")]
    Apply(ServerArgs),
}

impl MetadataSubcommand {
    fn split(self) -> (MetadataAction, ServerArgs) {
        match self {
            Self::Export(args) => (MetadataAction::Export, args),
            Self::Reset(args) => (MetadataAction::Reset, args),
            Self::Reload(args) => (MetadataAction::Reload, args),
            Self::Apply(args) => (MetadataAction::Apply, args),
        }
    }
}

#[derive(Debug, Args)]
struct ServerArgs {
    #[arg(long, value_name = "URL", help = "http(s) endpoint for the GraphQL engine")]
    endpoint: Option<String>,
    #[arg(long, value_name = "SECRET", help = "admin secret for the GraphQL engine")]
    admin_secret: Option<String>,
    #[arg(
        long,
        value_name = "SECRET",
        hide = true,
        help = "admin secret for the GraphQL engine (deprecated: use --admin-secret instead)"
    )]
    access_key: Option<String>,
}

impl From<ServerArgs> for ServerOverrides {
    fn from(args: ServerArgs) -> Self {
        Self {
            endpoint: args.endpoint,
            admin_secret: args.admin_secret,
            access_key: args.access_key,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(Profile::parse(&cli.log_format)?, &cli.log_level);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Metadata(MetadataArgs { command })) => {
            let (action, args) = command.split();
            run_metadata(&runtime, action, args.into())
        }
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_metadata(
    runtime: &RuntimeOptions,
    action: MetadataAction,
    overrides: ServerOverrides,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let context = build_context(&paths, &overrides)?;
    if runtime.diagnostics {
        println!(
            "[diagnostics]\n{}\n{}",
            paths.diagnostics(),
            context.diagnostics()
        );
    }

    CommandOptions::new(&context, action).run()?;

    match action {
        MetadataAction::Export => println!(
            "Metadata exported to {}",
            normalize_for_display(&context.metadata_file)
        ),
        MetadataAction::Reset => println!("Metadata cleared"),
        MetadataAction::Reload => println!("Metadata reloaded"),
        MetadataAction::Apply => println!(
            "Metadata applied from {}",
            normalize_for_display(&context.metadata_file)
        ),
    }
    Ok(())
}

fn build_context(paths: &ResolvedPaths, overrides: &ServerOverrides) -> Result<ExecutionContext> {
    let config = load_config(&paths.config_path)?;
    resolve_execution_context(paths, &config, overrides, env!("CARGO_PKG_VERSION"))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists()
        && let Err(error) = dotenvy::from_path_override(&project_env)
    {
        tracing::warn!(path = %project_env.display(), %error, "failed to load project .env");
    }

    resolve_paths(&context, &overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn metadata_subcommands_map_to_actions() {
        let cli = Cli::try_parse_from([
            "gqlmeta",
            "metadata",
            "reset",
            "--endpoint",
            "http://localhost:8080",
            "--access-key",
            "legacy",
        ])
        .expect("parse");
        let Some(Commands::Metadata(MetadataArgs { command })) = cli.command else {
            panic!("expected metadata command");
        };
        let (action, args) = command.split();
        assert_eq!(action, MetadataAction::Reset);
        let overrides = ServerOverrides::from(args);
        assert_eq!(overrides.endpoint.as_deref(), Some("http://localhost:8080"));
        assert_eq!(overrides.access_key.as_deref(), Some("legacy"));
        assert!(overrides.admin_secret.is_none());
    }

    #[test]
    fn global_flags_are_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gqlmeta",
            "metadata",
            "export",
            "--project-root",
            "/srv/project",
            "--log-format",
            "json",
        ])
        .expect("parse");
        assert_eq!(cli.project_root, Some(PathBuf::from("/srv/project")));
        assert_eq!(cli.log_format, "json");
    }
}
