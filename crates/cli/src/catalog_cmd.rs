use anyhow::Result;

use opencode2go_core::{PermissionLevel, PermissionSettings};

use crate::context::{Connection, Context};

pub async fn providers(ctx: &Context) -> Result<()> {
    let conn = Connection::open(ctx).await?;
    let controller = &conn.controller;
    let catalog = controller.catalog();
    if catalog.providers.is_empty() {
        println!("The server offers no providers.");
        return Ok(());
    }
    for provider in &catalog.providers {
        let selected = controller.selected_provider() == Some(provider.id.as_str());
        println!(
            "{} {} ({})",
            if selected { "*" } else { " " },
            provider.name,
            provider.id
        );
        let default = catalog.default_model(provider).map(|m| m.id.as_str());
        for model in &provider.models {
            let marker = if default == Some(model.id.as_str()) { " (default)" } else { "" };
            println!("    {:<36} {}{marker}", model.id, model.name);
        }
    }
    Ok(())
}

pub async fn modes(ctx: &Context) -> Result<()> {
    let conn = Connection::open(ctx).await?;
    for mode in conn.controller.modes() {
        let mut details = Vec::new();
        if let Some(model) = &mode.model {
            details.push(format!("model {}/{}", model.provider_id, model.model_id));
        }
        let disabled: Vec<&str> = mode
            .tools
            .iter()
            .filter(|(_, enabled)| !**enabled)
            .map(|(tool, _)| tool.as_str())
            .collect();
        if !disabled.is_empty() {
            details.push(format!("no {}", disabled.join(", ")));
        }
        if details.is_empty() {
            println!("{}", mode.name);
        } else {
            println!("{:<12} {}", mode.name, details.join("; "));
        }
    }
    Ok(())
}

/// Push the permission policy to the active server. Unset levels come from
/// the `[permissions]` config section.
pub async fn permissions(
    ctx: &Context,
    edit: Option<PermissionLevel>,
    bash: Option<PermissionLevel>,
) -> Result<()> {
    let mut settings = PermissionSettings::from(&ctx.config.permissions);
    if let Some(edit) = edit {
        settings.edit = edit;
    }
    if let Some(bash) = bash {
        settings.bash = bash;
    }
    let endpoint = ctx.active_endpoint()?;
    ctx.transport
        .set_permissions(&endpoint.url(), &settings)
        .await?;
    println!(
        "Permissions on {}: edit={} bash={}",
        endpoint.url(),
        settings.edit,
        settings.bash
    );
    Ok(())
}
