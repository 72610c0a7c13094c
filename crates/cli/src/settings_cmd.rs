use anyhow::{Result, bail};
use clap::Subcommand;

use opencode2go_core::{PartFilter, PartKind};
use opencode2go_runtime_config::{AVAILABLE_FONTS, FONT_SIZES};

use crate::chat::parse_kind;
use crate::context::Context;

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print appearance and part filter settings (the default)
    Show,
    Theme { name: String },
    Font { name: String },
    FontSize { size: u16 },
    /// Part kinds shown in history; no kinds shows everything
    Filter {
        #[arg(value_parser = parse_kind, value_delimiter = ',')]
        kinds: Vec<PartKind>,
    },
    /// Restore defaults
    Reset,
}

pub fn run(ctx: &Context, action: Option<SettingsAction>) -> Result<()> {
    let mut settings = ctx.settings();
    match action.unwrap_or(SettingsAction::Show) {
        SettingsAction::Show => {}
        SettingsAction::Theme { name } => {
            if !settings.set_theme(&name) {
                bail!("Theme name must not be empty");
            }
        }
        SettingsAction::Font { name } => {
            if !settings.set_font(&name) {
                bail!("Unknown font {name}; available: {}", AVAILABLE_FONTS.join(", "));
            }
        }
        SettingsAction::FontSize { size } => {
            if !settings.set_font_size(size) {
                let sizes: Vec<String> = FONT_SIZES.iter().map(u16::to_string).collect();
                bail!("Unsupported font size {size}; choose one of {}", sizes.join(", "));
            }
        }
        SettingsAction::Filter { kinds } => {
            let filter = if kinds.is_empty() {
                PartFilter::show_all()
            } else {
                PartFilter::only(kinds)
            };
            settings.set_part_filter(filter);
        }
        SettingsAction::Reset => settings.reset(),
    }

    let current = settings.get();
    println!("theme     = {}", current.appearance.theme);
    println!("font      = {}", current.appearance.font);
    println!("font size = {}", current.appearance.font_size);
    let filter = &current.part_filter;
    if filter.is_show_all() {
        println!("parts     = all");
    } else {
        let kinds: Vec<&str> = PartKind::FILTERABLE
            .into_iter()
            .filter(|k| filter.contains(*k))
            .map(PartKind::as_str)
            .collect();
        println!("parts     = {}", kinds.join(", "));
    }
    Ok(())
}
