mod config;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

use awel_config::FlowPanel;
use awel_dag::{Dag, WorkflowRunner};
use awel_flow::{FlowManager, FlowsVariablesProvider};
use awel_registry::{FlowNodesVariablesProvider, Registry};
use awel_task::TaskOutput;
use awel_trigger::{IteratorTrigger, TriggerManager, builtin::register_triggers, trigger_dag};
use awel_variables::{
  AesGcmEncryption, SqliteVariablesStorage, StorageVariables, StorageVariablesProvider, ValueType,
  VariableCategory, VariablesFilter, VariablesIdentifier, VariablesProvider,
};

use crate::config::{ServeConfig, default_data_dir, resolve_encryption_key};

/// AWEL - build and run dataflow DAGs from flow documents
#[derive(Parser)]
#[command(name = "awel")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.awel)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to a JSON config file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a flow once; the payload is read from stdin
  Run {
    /// Path to the flow file (JSON)
    flow_file: PathBuf,

    /// Node id to return; required when the flow has several leaves
    #[arg(long)]
    leaf: Option<String>,
  },

  /// Serve the HTTP triggers of one or more flows
  Serve {
    /// Paths to flow files (JSON)
    #[arg(required = true)]
    flow_files: Vec<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
  },

  /// Manage stored variables
  Variables {
    #[command(subcommand)]
    action: VariablesAction,
  },
}

#[derive(Subcommand)]
enum VariablesAction {
  /// Store a value at `key:name[@scope:scope_key][#sys_code][%user_name]`
  Set {
    identifier: String,
    value: String,

    /// str, int, float or bool
    #[arg(long, default_value = "str")]
    value_type: String,

    /// Encrypt the value at rest
    #[arg(long)]
    secret: bool,

    #[arg(long)]
    description: Option<String>,
  },

  /// Print a stored value
  Get { identifier: String },

  /// List stored variables, secrets masked
  List {
    #[arg(long)]
    key: Option<String>,

    #[arg(long)]
    scope: Option<String>,
  },
}

/// Everything a command needs, wired once per process.
struct App {
  registry: Arc<Registry>,
  flows: Arc<FlowManager>,
  variables: Arc<StorageVariablesProvider>,
  runner: Arc<WorkflowRunner>,
}

impl App {
  async fn open(data_dir: &Path, config: &ServeConfig) -> Result<Self> {
    tokio::fs::create_dir_all(data_dir)
      .await
      .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let options = SqliteConnectOptions::new()
      .filename(data_dir.join("awel.db"))
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .connect_with(options)
      .await
      .context("failed to open variables database")?;
    let storage = SqliteVariablesStorage::new(pool);
    storage.migrate().await.context("failed to migrate variables database")?;

    let key = resolve_encryption_key(config, data_dir).await?;
    let variables = Arc::new(StorageVariablesProvider::new(
      Arc::new(storage),
      Arc::new(AesGcmEncryption::new(key)),
    ));

    let registry = Registry::with_builtins();
    register_triggers(&registry);
    let registry = Arc::new(registry);
    let flows = Arc::new(FlowManager::new(Arc::clone(&registry)));

    variables
      .builtins()
      .register(Arc::new(FlowNodesVariablesProvider::new(Arc::clone(&registry))));
    variables
      .builtins()
      .register(Arc::new(FlowsVariablesProvider::new(Arc::clone(&flows))));

    let provider: Arc<dyn VariablesProvider> = variables.clone();
    let runner = Arc::new(WorkflowRunner::new().with_provider(provider));

    Ok(Self {
      registry,
      flows,
      variables,
      runner,
    })
  }

  async fn load_flow(&self, flow_file: &Path) -> Result<Arc<Dag>> {
    let content = tokio::fs::read_to_string(flow_file)
      .await
      .with_context(|| format!("failed to read flow file: {}", flow_file.display()))?;
    let panel: FlowPanel = serde_json::from_str(&content)
      .with_context(|| format!("failed to parse flow file: {}", flow_file.display()))?;
    let name = panel.name.clone();
    let dag = self
      .flows
      .register(panel)
      .with_context(|| format!("failed to build flow '{name}'"))?;
    eprintln!("Loaded flow: {} ({} nodes)", name, dag.len());
    Ok(dag)
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => default_data_dir()?,
  };

  let Some(command) = cli.command else {
    println!("awel - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let config = ServeConfig::load(cli.config.as_deref()).await?;
    match command {
      Commands::Run { flow_file, leaf } => run_flow(&data_dir, &config, &flow_file, leaf).await,
      Commands::Serve { flow_files, host, port } => {
        serve(&data_dir, config.with_overrides(host, port), &flow_files).await
      }
      Commands::Variables { action } => variables(&data_dir, &config, action).await,
    }
  })
}

async fn run_flow(data_dir: &Path, config: &ServeConfig, flow_file: &Path, leaf: Option<String>) -> Result<()> {
  let app = App::open(data_dir, config).await?;
  let dag = app.load_flow(flow_file).await?;

  let has_iterator = dag
    .trigger_nodes()
    .iter()
    .any(|node| node.operator().is::<IteratorTrigger>());
  if has_iterator {
    let results = trigger_dag(&dag, &app.runner)
      .await
      .context("iterator trigger failed")?;
    let mut report = Vec::with_capacity(results.len());
    for (item, result) in results {
      report.push(match result {
        Ok(output) => json!({ "input": item, "output": output_json(output).await? }),
        Err(e) => json!({ "input": item, "error": e.to_string() }),
      });
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    return Ok(());
  }

  let leaf_id = match leaf {
    Some(leaf) => leaf,
    None => match dag.leaf_nodes().as_slice() {
      [node] => node.node_id().to_string(),
      nodes => bail!(
        "flow has {} leaf nodes, pick one with --leaf: {}",
        nodes.len(),
        nodes.iter().map(|n| n.node_id()).collect::<Vec<_>>().join(", ")
      ),
    },
  };

  let payload = read_payload_from_stdin()?;
  let output = app
    .runner
    .call(&dag, &leaf_id, Some(payload))
    .await
    .context("flow execution failed")?;

  println!("{}", serde_json::to_string_pretty(&output_json(output).await?)?);
  Ok(())
}

async fn serve(data_dir: &Path, config: ServeConfig, flow_files: &[PathBuf]) -> Result<()> {
  let app = App::open(data_dir, &config).await?;
  let triggers = TriggerManager::new(Arc::clone(&app.runner)).with_api_prefix(config.api_prefix.clone());

  for flow_file in flow_files {
    let dag = app.load_flow(flow_file).await?;
    for mounted in triggers
      .register_dag(&dag)
      .with_context(|| format!("failed to mount triggers of {}", flow_file.display()))?
    {
      eprintln!("  {} {}", mounted.methods.join(","), mounted.path);
    }
  }
  if triggers.routes().is_empty() {
    bail!("none of the flows has an HTTP trigger");
  }

  let addr = config.bind_addr();
  let listener = tokio::net::TcpListener::bind(&addr)
    .await
    .with_context(|| format!("failed to bind {addr}"))?;
  info!(
    addr = %addr,
    flows = app.flows.list().len(),
    operators = app.registry.operator_metadata().len(),
    "awel_serving"
  );
  axum::serve(listener, triggers.router())
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("server error")
}

async fn variables(data_dir: &Path, config: &ServeConfig, action: VariablesAction) -> Result<()> {
  let app = App::open(data_dir, config).await?;
  let provider = &app.variables;

  match action {
    VariablesAction::Set {
      identifier,
      value,
      value_type,
      secret,
      description,
    } => {
      let id = VariablesIdentifier::from_str_identifier(&identifier)?;
      let value_type =
        ValueType::parse(&value_type).with_context(|| format!("unknown value type '{value_type}'"))?;
      let category = if secret {
        VariableCategory::Secret
      } else {
        VariableCategory::Common
      };
      let mut var = StorageVariables::from_identifier(&id, Value::String(value))
        .with_value_type(value_type)
        .with_category(category);
      if let Some(description) = description {
        var = var.with_description(description);
      }
      provider.save(var).await.context("failed to save variable")?;
      eprintln!("Saved {}", id.str_identifier());
    }
    VariablesAction::Get { identifier } => {
      let value = provider
        .get(&identifier, None)
        .await
        .with_context(|| format!("failed to read {identifier}"))?;
      println!("{}", serde_json::to_string_pretty(&value)?);
    }
    VariablesAction::List { key, scope } => {
      let filter = VariablesFilter {
        key,
        scope,
        ..Default::default()
      };
      let listed: Vec<Value> = provider
        .get_variables(&filter)
        .await?
        .into_iter()
        .map(|var| {
          let value = if var.is_secret() { json!("******") } else { var.value.clone() };
          json!({
            "identifier": var.identifier().str_identifier(),
            "value": value,
            "value_type": var.value_type.as_str(),
            "category": var.category.as_str(),
            "enabled": var.enabled,
          })
        })
        .collect();
      println!("{}", serde_json::to_string_pretty(&listed)?);
    }
  }
  Ok(())
}

/// Collect a leaf output into plain JSON. Streams become arrays.
async fn output_json(output: TaskOutput<Value>) -> Result<Value> {
  Ok(match output {
    TaskOutput::Value(value) => value,
    TaskOutput::Stream(_) => {
      let collected = output.unstreamify().await?;
      collected.into_value().map(Value::Array).unwrap_or(Value::Null)
    }
    TaskOutput::Empty | TaskOutput::Skip => Value::Null,
  })
}

fn read_payload_from_stdin() -> Result<Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(json!({}));
  }
  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;
  if input.trim().is_empty() {
    Ok(json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
