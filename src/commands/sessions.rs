//! Session inspection commands

use crate::cli::SessionCommand;
use crate::commands::open_store;
use crate::config::Config;
use colored::Colorize;
use prettytable::{format, Table};

/// Handle session inspection commands
pub fn handle_sessions(config: &Config, command: SessionCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;

    match command {
        SessionCommand::List { limit } => {
            let sessions = store.list_recent(limit)?;

            if sessions.is_empty() {
                println!("{}", "No sessions found.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

            table.add_row(prettytable::row![
                "ID".bold(),
                "Client".bold(),
                "Advisor".bold(),
                "Status".bold(),
                "Created".bold(),
                "Theme".bold()
            ]);

            for session in sessions {
                let id_short = &session.id[..8];
                let theme = session.theme.unwrap_or_else(|| "-".to_string());
                let theme = if theme.len() > 30 {
                    format!("{}...", &theme[..27])
                } else {
                    theme
                };
                let created = session.created_at.format("%Y-%m-%d %H:%M").to_string();

                table.add_row(prettytable::row![
                    id_short.cyan(),
                    session.client_id,
                    session.advisor_id,
                    session.status,
                    created,
                    theme
                ]);
            }

            println!("\nSessions:");
            table.printstd();
            println!();
        }
    }

    Ok(())
}
