//! Tern - reconcile capsules and project environments against a cluster
//!
//! Usage:
//!   tern capsule reconcile <name> -n <namespace>     # Apply the capsule's objects
//!   tern capsule preview <name> -n <namespace>       # Dry-run and show field diffs
//!   tern capsule delete <name> -n <namespace>        # Delete everything it owns
//!   tern environment reconcile|preview <name>

mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::core::DynamicObject;
use serde::Deserialize;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tern_core::api::{Capsule, ProjectEnvironment};
use tern_core::cluster::{ClusterClient, KubeCluster};
use tern_core::config::{ConfigStore, EngineConfig};
use tern_core::kind::{KindTable, gvk};
use tern_core::object::{ObjectKey, from_dynamic};
use tern_core::pipeline::{CapsulePipeline, PipelineResult, ProjectEnvironmentPipeline};
use tern_core::request::RequestOptions;
use tern_core::steps::{DeploymentStep, NamespaceStep, ServiceAccountStep};

#[derive(Parser)]
#[command(name = "tern")]
#[command(about = "Declarative reconciliation for capsules and project environments", long_about = None)]
struct Cli {
    /// Path to tern.toml (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile, preview or delete a capsule
    Capsule(CapsuleArgs),

    /// Reconcile or preview a project environment
    #[command(alias = "env")]
    Environment(EnvironmentArgs),
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub(crate) enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Args)]
struct CapsuleArgs {
    #[command(subcommand)]
    command: CapsuleSubcommand,
}

#[derive(Subcommand)]
enum CapsuleSubcommand {
    /// Make the cluster match the capsule
    Reconcile(CapsuleTarget),

    /// Show what a reconcile would change without writing anything
    Preview(CapsuleTarget),

    /// Delete every object the capsule owns
    Delete {
        /// Capsule name
        name: String,
        /// Namespace the capsule lives in
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct CapsuleTarget {
    /// Capsule name
    name: String,

    /// Namespace the capsule lives in
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Take over existing objects the capsule does not own
    #[arg(long, short)]
    force: bool,

    /// YAML file with proposed objects (ConfigMaps, Secrets) to consider
    #[arg(long = "with", value_name = "FILE")]
    with: Vec<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Args)]
struct EnvironmentArgs {
    #[command(subcommand)]
    command: EnvironmentSubcommand,
}

#[derive(Subcommand)]
enum EnvironmentSubcommand {
    /// Make the cluster match the project environment
    Reconcile {
        /// Project environment name
        name: String,
        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show what a reconcile would change without writing anything
    Preview {
        /// Project environment name
        name: String,
        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let engine = Engine::connect(cli.config).await?;

    match cli.command {
        Commands::Capsule(args) => run_capsule(&engine, args.command).await,
        Commands::Environment(args) => run_environment(&engine, args.command).await,
    }
}

/// Configuration, kinds and a cluster connection shared by every command.
struct Engine {
    config: Arc<EngineConfig>,
    kinds: Arc<KindTable>,
    cluster: Arc<dyn ClusterClient>,
}

impl Engine {
    async fn connect(config_path: Option<PathBuf>) -> Result<Self> {
        let store = ConfigStore::resolve(config_path)?;
        let config = store
            .load()
            .with_context(|| format!("Failed to load {}", store.config_path().display()))?;
        debug!(config = %store.config_path().display(), max_passes = config.max_passes, "loaded configuration");
        let kinds = Arc::new(KindTable::builtin());
        let cluster = KubeCluster::try_default(kinds.clone(), &config.field_manager).await?;
        Ok(Self {
            config: Arc::new(config),
            kinds,
            cluster: Arc::new(cluster),
        })
    }

    fn capsule_pipeline(&self) -> CapsulePipeline {
        let steps = &self.config.steps;
        let mut pipeline = CapsulePipeline::new(self.config.clone(), self.kinds.clone());
        if steps.deployment {
            let step = DeploymentStep::new();
            if steps.service {
                pipeline.add_step(step);
            } else {
                pipeline.add_step(step.without_service());
            }
        }
        if steps.service_account {
            match &steps.service_account_name {
                Some(name) => pipeline.add_step(ServiceAccountStep::with_name(name.clone())),
                None => pipeline.add_step(ServiceAccountStep::new()),
            }
        }
        pipeline
    }

    fn environment_pipeline(&self) -> ProjectEnvironmentPipeline {
        let mut pipeline = ProjectEnvironmentPipeline::new(self.config.clone(), self.kinds.clone());
        if self.config.steps.namespace {
            pipeline.add_step(NamespaceStep::new());
        }
        pipeline
    }

    async fn capsule(&self, namespace: &str, name: &str) -> Result<Capsule> {
        let key = ObjectKey::new(&gvk::capsule(), namespace, name);
        let obj = self
            .cluster
            .get(&key)
            .await
            .with_context(|| format!("Failed to fetch capsule {namespace}/{name}"))?;
        Ok(from_dynamic(&obj)?)
    }

    async fn environment(&self, name: &str) -> Result<ProjectEnvironment> {
        let key = ObjectKey::new(&gvk::project_environment(), "", name);
        let obj = self
            .cluster
            .get(&key)
            .await
            .with_context(|| format!("Failed to fetch project environment {name}"))?;
        Ok(from_dynamic(&obj)?)
    }
}

async fn run_capsule(engine: &Engine, command: CapsuleSubcommand) -> Result<()> {
    match command {
        CapsuleSubcommand::Reconcile(target) => {
            let capsule = engine.capsule(&target.namespace, &target.name).await?;
            let options = RequestOptions {
                dry_run: false,
                force: target.force,
                additional_objects: load_objects(&target.with)?,
            };
            let result = engine
                .capsule_pipeline()
                .run_capsule(engine.cluster.clone(), capsule, options)
                .await;
            report(result, target.format)
        }
        CapsuleSubcommand::Preview(target) => {
            let capsule = engine.capsule(&target.namespace, &target.name).await?;
            let options = RequestOptions {
                dry_run: true,
                force: target.force,
                additional_objects: load_objects(&target.with)?,
            };
            let result = engine
                .capsule_pipeline()
                .run_capsule(engine.cluster.clone(), capsule, options)
                .await?;
            output::print_preview(&result, target.format)
        }
        CapsuleSubcommand::Delete {
            name,
            namespace,
            format,
        } => {
            let capsule = engine.capsule(&namespace, &name).await?;
            let result = engine
                .capsule_pipeline()
                .delete_capsule(engine.cluster.clone(), capsule, RequestOptions::default())
                .await;
            report(result, format)
        }
    }
}

async fn run_environment(engine: &Engine, command: EnvironmentSubcommand) -> Result<()> {
    match command {
        EnvironmentSubcommand::Reconcile { name, format } => {
            let environment = engine.environment(&name).await?;
            let result = engine
                .environment_pipeline()
                .run_project_environment(
                    engine.cluster.clone(),
                    environment,
                    RequestOptions::default(),
                )
                .await;
            report(result, format)
        }
        EnvironmentSubcommand::Preview { name, format } => {
            let environment = engine.environment(&name).await?;
            let options = RequestOptions {
                dry_run: true,
                ..Default::default()
            };
            let result = engine
                .environment_pipeline()
                .run_project_environment(engine.cluster.clone(), environment, options)
                .await?;
            output::print_preview(&result, format)
        }
    }
}

/// Print the outcome of a committing run. Partially applied runs print what
/// got through before failing.
fn report(result: tern_core::Result<PipelineResult>, format: OutputFormat) -> Result<()> {
    match result {
        Ok(result) => output::print_result(&result, format),
        Err(err) => {
            if let Some(changes) = err.changes() {
                output::print_changes(changes, format)?;
            }
            Err(err.into())
        }
    }
}

/// Read proposed objects from multi-document YAML files.
fn load_objects(paths: &[PathBuf]) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for path in paths {
        objects.extend(parse_objects(path)?);
    }
    Ok(objects)
}

fn parse_objects(path: &Path) -> Result<Vec<DynamicObject>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if value.is_null() {
            continue;
        }
        let obj: DynamicObject = serde_yaml::from_value(value)
            .with_context(|| format!("Invalid object in {}", path.display()))?;
        if obj.types.is_none() {
            anyhow::bail!(
                "Object '{}' in {} has no apiVersion/kind",
                obj.metadata.name.unwrap_or_default(),
                path.display()
            );
        }
        objects.push(obj);
    }
    Ok(objects)
}
