use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use ws_fleet::load_balancer::{LeastLoaded, Selector};
use ws_fleet::registry::{HttpRegistry, Instance, Registry};

#[derive(Parser)]
#[command(name = "fleet-cli")]
#[command(about = "Inspection CLI for a websocket fleet", long_about = None)]
struct Cli {
    /// Registry base URL.
    #[arg(short, long, env = "WS_FLEET_REGISTRY_URL", default_value = "http://localhost:8500")]
    registry: String,

    /// Service id the fleet registers under.
    #[arg(short, long, env = "WS_FLEET_SERVICE_ID", default_value = "ws-fleet")]
    service: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered instances and their load
    Instances,
    /// Show which instance the proxy would pick
    Pick,
    /// Remove an instance from the registry
    Deregister { instance: String },
    /// Probe a backend's /health and /load-shedding endpoints
    Probe {
        /// Backend base URL, e.g. http://10.0.0.7:8080
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let registry = HttpRegistry::new(&cli.registry, Duration::from_secs(5))?;

    match cli.command {
        Commands::Instances => {
            let records = registry.list_instances(&cli.service).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Pick => {
            let records = registry.list_instances(&cli.service).await?;
            let instances: Vec<Instance> = records
                .iter()
                .filter_map(|r| Instance::from_record(r, false))
                .collect();
            match LeastLoaded::new().pick(&instances) {
                Ok(instance) => println!("{} {} (load {})", instance.id, instance.address, instance.load),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        Commands::Deregister { instance } => {
            registry.deregister_instance(&cli.service, &instance).await?;
            println!("Deregistered {}", instance);
        }
        Commands::Probe { url } => {
            let client = reqwest::Client::new();
            let base = url.trim_end_matches('/');
            for path in ["/health", "/load-shedding"] {
                let res = client.get(format!("{}{}", base, path)).send().await?;
                print_response(path, res).await?;
            }
        }
    }

    Ok(())
}

async fn print_response(path: &str, res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{} {} {}", path, status, serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{} {} {}", path, status, text.trim()),
    }
    Ok(())
}
