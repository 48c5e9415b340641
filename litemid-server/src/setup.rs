//! Interactive configuration setup
//!
//! Sequential question-and-answer prompts on stdin/stdout with sensible
//! defaults, a summary, and a confirmation before anything is written to
//! ./config/config.yaml.

use crate::config::{AuthConfig, Config, ServerConfig, ServiceNowConfig};
use anyhow::{Context, Result};
use std::io::{self, Write};

pub fn run() -> Result<()> {
    println!();
    println!("======================================");
    println!("   LITEMID SERVER CONFIGURATION");
    println!("======================================");
    println!();

    let host = prompt("Server bind host", "0.0.0.0")?;
    let port: u16 = prompt("Server bind port", "8080")?
        .parse()
        .context("port must be a number")?;
    let instance = prompt("ServiceNow instance (e.g. dev12345.service-now.com)", "")?;
    let username = prompt("ServiceNow username", "")?;
    let password = prompt("ServiceNow password", "")?;
    let use_https = prompt_yes_no("Use HTTPS", true)?;
    let timeout: u64 = prompt("Request timeout in seconds", "30")?
        .parse()
        .context("timeout must be a number")?;

    let config = Config {
        server: ServerConfig {
            host,
            port,
            auth: AuthConfig::default(),
        },
        servicenow: ServiceNowConfig {
            instance,
            username,
            password,
            use_https,
            timeout,
        },
    };

    println!();
    println!("Configuration summary");
    println!("---------------------");
    println!("  bind:     {}:{}", config.server.host, config.server.port);
    println!("  instance: {}", config.servicenow.instance);
    println!("  username: {}", config.servicenow.username);
    println!("  https:    {}", config.servicenow.use_https);
    println!("  timeout:  {}s", config.servicenow.timeout);
    println!();

    if !prompt_yes_no("Save configuration", true)? {
        println!("Configuration cancelled.");
        return Ok(());
    }

    std::fs::create_dir_all("./config").context("failed to create config directory")?;
    let yaml = serde_yaml::to_string(&config).context("failed to serialize configuration")?;
    std::fs::write("./config/config.yaml", yaml).context("failed to write config file")?;

    println!("Configuration saved to ./config/config.yaml");
    println!();
    println!("Start the server with:    litemid-server serve");
    println!("Test the connection with: litemid-server test");
    Ok(())
}

fn prompt(label: &str, default: &str) -> Result<String> {
    if default.is_empty() {
        print!("{label}: ");
    } else {
        print!("{label} [{default}]: ");
    }
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("failed to read input")?;
    let answer = answer.trim();

    Ok(if answer.is_empty() {
        default.to_string()
    } else {
        answer.to_string()
    })
}

fn prompt_yes_no(label: &str, default: bool) -> Result<bool> {
    let hint = if default { "Y/n" } else { "y/N" };
    let answer = prompt(&format!("{label} ({hint})"), "")?;
    Ok(match answer.to_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    })
}
