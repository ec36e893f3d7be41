//! Command execution.

use crate::Commands;
use bidi_client::Client;
use bidi_protocol::types::{ChangeUserRequest, ChangeUserResponse, DataSet, LogLevel};
use bidi_protocol::Payload;
use chrono::TimeZone;
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> CommandResult {
    match cmd {
        Commands::Ping => {
            client.ping().await?;
            Ok("PONG".green().to_string())
        }

        Commands::Status => {
            let status = client.get_server_status().await?;
            let started = format_start(status.server_start_date);
            Ok(format!(
                "{}\n  Build: {}\n  Started: {}\n  Log level: {}\n  Log size: {}",
                "Server status".bold(),
                status.build.as_deref().unwrap_or("-"),
                started,
                status.log_level.to_string().yellow(),
                format_bytes(status.log_size_bytes)
            ))
        }

        Commands::Log => {
            let log = client.get_log().await?;
            Ok(format!("{}\n{}", log.file_name.bold(), log.content))
        }

        Commands::SetLogLevel { level } => {
            let level: LogLevel = level
                .parse()
                .map_err(|_| format!("unknown log level {}", level))?;
            client.set_log_level(level).await?;
            Ok(format!("{} log level to {}", "Set".green(), level.to_string().yellow()))
        }

        Commands::Users => {
            let users = client.get_users().await?;
            if users.is_empty() {
                return Ok("No users".yellow().to_string());
            }

            let mut output = String::new();
            for user in users {
                let state = if user.active {
                    "active".green()
                } else {
                    "pending".yellow()
                };
                output.push_str(&format!("  {} [{}] {}\n", user.id.cyan(), state, user.name));
            }
            Ok(output)
        }

        Commands::User { id } => {
            let user = client.get_user(&id).await?;
            Ok(format!(
                "{}\n  Name: {}\n  Active: {}\n  Custom data: {}",
                format!("User {}", user.id.cyan()).bold(),
                user.name,
                user.active,
                serde_json::to_string_pretty(&user.custom_data)?
            ))
        }

        Commands::CreateUser { id, name, data, out } => {
            let request = ChangeUserRequest {
                user_id: id,
                name,
                custom_data: parse_custom_data(&data)?,
                create: true,
                renew_credentials: false,
            };
            let response = client.change_user(&request).await?;
            activation_output("Created", &response, out.as_deref())
        }

        Commands::UpdateUser { id, name, data } => {
            let request = ChangeUserRequest {
                user_id: id.clone(),
                name,
                custom_data: parse_custom_data(&data)?,
                create: false,
                renew_credentials: false,
            };
            client.change_user(&request).await?;
            Ok(format!("{} user {}", "Updated".green(), id.cyan()))
        }

        Commands::RenewUser { id, out } => {
            let current = client.get_user(&id).await?;
            let request = ChangeUserRequest {
                user_id: id,
                name: current.name,
                custom_data: current.custom_data,
                create: false,
                renew_credentials: true,
            };
            let response = client.change_user(&request).await?;
            activation_output("Renewed", &response, out.as_deref())
        }

        Commands::DeleteUser { id } => {
            client.delete_user(&id).await?;
            Ok(format!("{} user {}", "Deleted".green(), id.cyan()))
        }

        Commands::Datasets { user } => {
            let user = user.unwrap_or_else(|| client.user_id().to_string());
            let infos = client.get_data_set_infos_of_user(&user).await?;
            if infos.is_empty() {
                return Ok(format!("No data sets for {}", user).yellow().to_string());
            }

            let mut output = String::new();
            for info in infos {
                let users: Vec<&str> = info.user_ids.iter().map(String::as_str).collect();
                output.push_str(&format!("  {} [users: {}]\n", info.id.cyan(), users.join(", ")));
            }
            Ok(output)
        }

        Commands::CreateDataset { id, users } => {
            client.create_data_set(&DataSet::new(id.clone(), users)).await?;
            Ok(format!("{} data set {}", "Created".green(), id.cyan()))
        }

        Commands::GetDataset { id } => {
            let data_set = client.get_data_set(&id).await?;
            Ok(format!(
                "{}\n{}",
                format!("Data set {}", data_set.id.cyan()).bold(),
                serde_json::to_string_pretty(&data_set)?
            ))
        }

        Commands::DeleteDataset { id } => {
            client.delete_data_set(&id).await?;
            Ok(format!("{} data set {}", "Deleted".green(), id.cyan()))
        }

        Commands::Push { to, text } => {
            let count = to.len();
            client.push_notification(to, Payload::new(&text)?).await?;
            Ok(format!("{} notification to {} recipient(s)", "Queued".green(), count))
        }

        Commands::Shutdown => {
            client.shutdown().await?;
            Ok("Server shutting down".green().to_string())
        }

        // Handled in main.rs
        Commands::Activate { .. } | Commands::Listen => unreachable!(),
    }
}

/// Activates a user from saved activation data and writes the new bundle.
pub async fn activate(
    activation: &Path,
    out: Option<&Path>,
    build: Option<String>,
) -> CommandResult {
    let content = std::fs::read_to_string(activation)?;
    let response: ChangeUserResponse = serde_json::from_str(&content)?;

    let result = Client::activate_user(&response, build).await?;
    let Some(bundle) = result.configuration else {
        return Err(result
            .info
            .message
            .unwrap_or_else(|| "activation failed".to_string())
            .into());
    };

    let path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(bundle.default_file_name()));
    bundle.write_to_file(&path)?;
    Ok(format!(
        "{} user {}, bundle written to {}",
        "Activated".green(),
        bundle.user_id.cyan(),
        path.display()
    ))
}

fn activation_output(
    verb: &str,
    response: &ChangeUserResponse,
    out: Option<&Path>,
) -> CommandResult {
    let json = serde_json::to_string_pretty(response)?;
    let mut output = format!(
        "{} user {} (activation code: {})",
        verb.green(),
        response.user_id.cyan(),
        response.activation_code.as_deref().unwrap_or("-").yellow()
    );
    match out {
        Some(path) => {
            std::fs::write(path, &json)?;
            output.push_str(&format!("\n  Activation data written to {}", path.display()));
        }
        None => {
            output.push('\n');
            output.push_str(&json);
        }
    }
    Ok(output)
}

/// Parses `key=value` entries.
fn parse_custom_data(entries: &[String]) -> Result<BTreeMap<String, String>, String> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| format!("expected key=value, got {}", entry))
        })
        .collect()
}

/// Formats the server start time in local time.
fn format_start(millis: i64) -> String {
    match chrono::Local.timestamp_millis_opt(millis).single() {
        Some(start) => start.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}

/// Formats bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_custom_data() {
        let parsed =
            parse_custom_data(&["team = red".to_string(), "level=3".to_string()]).unwrap();
        assert_eq!(parsed.get("team").map(String::as_str), Some("red"));
        assert_eq!(parsed.get("level").map(String::as_str), Some("3"));

        assert!(parse_custom_data(&["nokey".to_string()]).is_err());
        assert!(parse_custom_data(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
