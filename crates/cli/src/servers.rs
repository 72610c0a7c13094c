use anyhow::{Result, bail};
use clap::Subcommand;

use opencode2go_core::{EndpointPatch, NewEndpoint, Protocol};

use crate::context::Context;
use crate::output::endpoint_line;

#[derive(Subcommand)]
pub enum ServersAction {
    /// List known servers; `*` marks the active one
    List,
    /// Add a server and make it available for `use`
    Add {
        /// Host name or IP address
        host: String,
        #[arg(long, default_value_t = 4096)]
        port: u16,
        #[arg(long, default_value = "http")]
        protocol: Protocol,
        /// Display name, defaults to host:port
        #[arg(long)]
        name: Option<String>,
        /// Make the new server active
        #[arg(long)]
        activate: bool,
    },
    /// Remove a saved server (the default server cannot be removed)
    Remove { id: String },
    /// Make a server active
    Use { id: String },
    /// Change a saved server
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        protocol: Option<Protocol>,
    },
}

pub fn run(ctx: &Context, action: ServersAction) -> Result<()> {
    let mut registry = ctx.registry();
    match action {
        ServersAction::List => {
            let active = registry.active_id().map(str::to_string);
            for endpoint in registry.list() {
                println!("{}", endpoint_line(&endpoint, active.as_deref() == Some(&endpoint.id)));
            }
        }
        ServersAction::Add {
            host,
            port,
            protocol,
            name,
            activate,
        } => {
            let name = name.unwrap_or_else(|| format!("{host}:{port}"));
            let endpoint = registry.add(NewEndpoint {
                name,
                protocol,
                host,
                port,
            });
            if activate {
                registry.set_active(&endpoint.id);
            }
            println!("Added {} ({})", endpoint.id, endpoint.url());
        }
        ServersAction::Remove { id } => {
            if registry.get(&id).is_some_and(|ep| ep.is_default) {
                bail!("{id} is the default server and cannot be removed");
            }
            if !registry.delete(&id) {
                bail!("No saved server with id {id}");
            }
            println!("Removed {id}");
        }
        ServersAction::Use { id } => {
            if !registry.set_active(&id) {
                bail!("No server with id {id}; see `opencode2go servers list`");
            }
            println!("Active server: {}", registry.server_url(registry.get_active()));
        }
        ServersAction::Update {
            id,
            name,
            host,
            port,
            protocol,
        } => {
            let patch = EndpointPatch {
                name,
                protocol,
                host,
                port,
            };
            if patch.is_empty() {
                bail!("Nothing to update; pass --name, --host, --port or --protocol");
            }
            if !registry.update(&id, &patch) {
                bail!("No saved server with id {id}");
            }
            if let Some(endpoint) = registry.get(&id) {
                println!("{}", endpoint_line(endpoint, registry.active_id() == Some(id.as_str())));
            }
        }
    }
    Ok(())
}

/// Probe the configured candidates once and print what answered.
pub async fn discover(ctx: &Context) -> Result<()> {
    let servers = ctx.discovery().discover().await;
    if servers.is_empty() {
        let settings = &ctx.config.discovery;
        println!("No servers found.");
        println!();
        println!(
            "Probed hosts {} on ports {}.",
            settings.hosts.join(", "),
            settings
                .ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Ok(());
    }
    let registry = ctx.registry();
    for server in &servers {
        let saved = registry
            .manual()
            .iter()
            .any(|ep| ep.same_address(&server.host, server.port));
        let version = server.version.as_deref().unwrap_or("?");
        println!(
            "{:<24} {}:{}  v{version}  {}ms{}",
            server.name,
            server.host,
            server.port,
            server.response_time_ms,
            if saved { "  (saved)" } else { "" }
        );
    }
    println!();
    println!("Total: {} server(s)", servers.len());
    Ok(())
}
