use clap::{Arg, Command};
use log::LevelFilter;
use phishguard::AnalyzerConfig;
use std::fs;
use std::path::Path;
use std::process;

fn build_cli() -> Command {
    Command::new("phishguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Email threat analysis with resilient reputation and sandbox enrichment")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/phishguard.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("analyze")
                .long("analyze")
                .value_name("FILE")
                .help("Analyze an email record stored as JSON and print the result")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() {
    let mut cli = build_cli();
    let matches = cli.clone().get_matches();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/phishguard.yaml");
    let config_found = Path::new(config_path).exists();

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        config
            .logging
            .as_ref()
            .and_then(|logging| logging.level.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Info)
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if !config_found {
        log::warn!("Configuration file '{config_path}' not found, using default configuration");
    }

    if matches.get_flag("test-config") {
        test_config(&config, config_path);
        return;
    }

    if let Some(email_file) = matches.get_one::<String>("analyze") {
        analyze_file(&config, email_file).await;
        return;
    }

    let _ = cli.print_help();
    println!();
}

fn load_config(path: &str) -> anyhow::Result<AnalyzerConfig> {
    if Path::new(path).exists() {
        AnalyzerConfig::from_file(path)
    } else {
        Ok(AnalyzerConfig::default())
    }
}

fn generate_default_config(path: &str) {
    let written = AnalyzerConfig::default()
        .to_yaml()
        .and_then(|yaml| fs::write(path, yaml).map_err(anyhow::Error::from));

    match written {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn test_config(config: &AnalyzerConfig, path: &str) {
    println!("Testing configuration: {path}");
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration validation failed: {e:#}");
        process::exit(1);
    }

    let weights = &config.scoring;
    println!(
        "Scoring weights: urgency={} attachment_risk={} link_risk={} reputation_deficit={}",
        weights.urgency, weights.attachment_risk, weights.link_risk, weights.reputation_deficit
    );
    println!(
        "Reputation threshold: {}",
        config.reputation.suspicious_threshold
    );
    println!(
        "Sandbox: {}",
        config
            .sandbox
            .as_ref()
            .map(|s| s.base_url.as_str())
            .unwrap_or("disabled")
    );
    println!(
        "Cache: {}",
        config
            .cache
            .as_ref()
            .map(|c| format!("in-memory, ttl {}s", c.ttl_seconds))
            .unwrap_or_else(|| "disabled".to_string())
    );

    match config.build_analyzer() {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => {
            println!("Failed to build analyzer: {e:#}");
            process::exit(1);
        }
    }
}

async fn analyze_file(config: &AnalyzerConfig, email_file: &str) {
    let raw = match fs::read_to_string(email_file) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading email file {email_file}: {e}");
            process::exit(1);
        }
    };

    let analyzer = match config.build_analyzer() {
        Ok(analyzer) => analyzer,
        Err(e) => {
            eprintln!("Error building analyzer: {e:#}");
            process::exit(1);
        }
    };

    let result = match analyzer.analyze_json(&raw).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Analysis failed: {e}");
            process::exit(1);
        }
    };

    if result.is_degraded() {
        log::warn!(
            "{}: analysis completed with degraded enrichment",
            result.message_id
        );
    }

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error encoding result: {e}");
            process::exit(1);
        }
    }
}
