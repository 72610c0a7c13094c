use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};

use opencode2go_core::{PermissionLevel, Protocol};
use opencode2go_runtime_config::{ClientConfig, apply_compat_fallbacks};

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Print the effective `opencode2go.toml` (the default)
    Show,
    /// Write the config file with defaults for every missing field
    Init,
    /// Change config values
    Set {
        /// Host of the built-in default server
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        protocol: Option<Protocol>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Seconds between background discovery passes, 0 disables
        #[arg(long)]
        discovery_interval: Option<u64>,
        #[arg(long)]
        edit: Option<PermissionLevel>,
        #[arg(long)]
        bash: Option<PermissionLevel>,
        /// Default tracing filter, e.g. `info` or `opencode2go_client=debug`
        #[arg(long)]
        log_filter: Option<String>,
    },
}

pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => show(),
        ConfigAction::Init => {
            let config = opencode2go_paths::load_config()?;
            opencode2go_paths::save_config(&config)?;
            println!("Wrote {}", opencode2go_paths::config_path()?.display());
            Ok(())
        }
        ConfigAction::Set {
            host,
            port,
            protocol,
            timeout,
            discovery_interval,
            edit,
            bash,
            log_filter,
        } => {
            let mut config = opencode2go_paths::load_config()?;
            let before = config.clone();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(protocol) = protocol {
                config.server.protocol = protocol;
            }
            if let Some(timeout) = timeout {
                config.network.request_timeout_secs = timeout;
            }
            if let Some(interval) = discovery_interval {
                config.discovery.interval_secs = interval;
            }
            if let Some(edit) = edit {
                config.permissions.edit = edit;
            }
            if let Some(bash) = bash {
                config.permissions.bash = bash;
            }
            if let Some(filter) = log_filter {
                config.logging.filter = filter;
            }
            apply_compat_fallbacks(&mut config);
            if config == before {
                bail!("Nothing to change; see `opencode2go config set --help`");
            }
            opencode2go_paths::save_config(&config)?;
            println!("Configuration updated.");
            show()
        }
    }
}

fn show() -> Result<()> {
    let path = opencode2go_paths::config_path()?;
    let config = opencode2go_paths::load_config()?;
    println!("Config file: {}", path.display());
    if !path.exists() {
        println!("(not written yet, showing defaults)");
    }
    println!();
    print!("{}", render(&config)?);
    Ok(())
}

fn render(config: &ClientConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_defaults_list_every_section() {
        let rendered = render(&ClientConfig::default()).expect("render");
        for section in ["[server]", "[network]", "[discovery]", "[permissions]", "[logging]"] {
            assert!(rendered.contains(section), "missing {section}");
        }
        assert!(rendered.contains("port = 4096"));
    }
}
