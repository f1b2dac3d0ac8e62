use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::info;

use device_loader as loader;
use knx_transport as knx;
use knx_transport::Connector;

#[derive(Parser, Debug)]
#[command(
    name = "knx-loader",
    version,
    about = "Load KNX connectors and devices from configuration",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Ip,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every device type and address count the loader can build
    Types,
    /// Parse a configuration file and print the bound connectors and devices
    Check {
        /// Configuration file (YAML)
        #[arg(long)]
        config: String,
        /// Print the bound configuration as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Run a load pass against an in-memory broker and print the report
    Load {
        /// Configuration file; defaults to config/devices.yaml
        #[arg(long)]
        config: Option<String>,
        /// Connector backend
        #[arg(long, value_enum, default_value_t = Backend::Ip)]
        backend: Backend,
        /// Remove every loaded device again after the pass
        #[arg(long, action = ArgAction::SetTrue)]
        teardown: bool,
        /// Print Prometheus metrics after the pass
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Types => list_types(),
        Commands::Check { config, json } => check_config(&config, json),
        Commands::Load {
            config,
            backend,
            teardown,
            metrics,
        } => load(config.as_deref(), backend, teardown, metrics),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn list_types() -> Result<()> {
    let catalog = loader::DeviceCatalog::with_builtin_devices();
    for form in catalog.forms() {
        println!(
            "{}\taddresses={}\tarity={}",
            form.type_id,
            form.address_count,
            form.arity()
        );
    }
    Ok(())
}

fn check_config(path: &str, json: bool) -> Result<()> {
    let view = loader::ConfigView::from_file(path)?;
    let connectors = loader::parse_connectors(&view);
    if json {
        println!("{}", serde_json::to_string_pretty(&connectors)?);
        return Ok(());
    }
    let catalog = loader::DeviceCatalog::with_builtin_devices();
    for c in &connectors {
        let router = c.router.ip.as_deref().unwrap_or("<unset>");
        println!(
            "{}\tenabled={}\trouter={}:{}\tdevices={}",
            c.name,
            c.enabled,
            router,
            c.router.port,
            c.devices.len()
        );
        for d in &c.devices {
            let type_id = d.type_id.as_deref().unwrap_or("<missing>");
            let count = d.address.as_ref().map_or(0, Vec::len);
            let status = match catalog.resolve(type_id, count) {
                Ok(_) => "ok".to_string(),
                Err(e) => e.to_string(),
            };
            println!(
                "  {}\ttype={}\taddresses={}\t{}",
                loader::registration_path(&c.name, &d.href),
                type_id,
                count,
                status
            );
        }
    }
    Ok(())
}

fn build_loader(backend: Backend) -> loader::DeviceLoader {
    match backend {
        Backend::Ip => loader::DeviceLoader::with_defaults(),
        Backend::Mock => loader::DeviceLoader::new(
            loader::DeviceCatalog::with_builtin_devices(),
            |router: &knx::RouterEndpoint, local: &str| -> Box<dyn Connector> {
                Box::new(knx::MockConnector::new(router.clone(), local))
            },
        ),
    }
}

fn load(config: Option<&str>, backend: Backend, teardown: bool, metrics: bool) -> Result<()> {
    let hub = loader::MetricsHub::new().map_err(anyhow::Error::msg)?;
    let device_loader = build_loader(backend).with_metrics(hub.clone());

    let explicit = config.map(loader::ConfigView::from_file).transpose()?;
    device_loader.set_configuration(explicit);

    let broker = loader::InMemoryBroker::new();
    let report = device_loader.init_devices(&broker);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if teardown {
        let removed = device_loader.remove_devices(&broker);
        info!(removed, remaining = broker.len(), "teardown complete");
    }
    if metrics {
        print!("{}", hub.encode_text());
    }
    Ok(())
}
