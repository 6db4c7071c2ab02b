use clap::Args;
use serde::Serialize;
use std::path::Path;
use unistore::{format_size, HubStore, OutputFormat, UnistoreConfig};

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also list the containers every store is provisioned with
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo {
    config_file: String,
    data_dir: String,
    store_name: String,
    sqlite_path: String,
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required_containers: Option<Vec<String>>,
}

pub fn run(config: &UnistoreConfig, args: ConfigArgs, output_format: OutputFormat) {
    let ConfigArgs { verbose } = args;

    let sqlite_path = config.sqlite_path();
    let size_bytes = std::fs::metadata(&sqlite_path).ok().map(|m| m.len());

    let info = ConfigInfo {
        config_file: UnistoreConfig::config_file_path(),
        data_dir: config.data_dir.clone(),
        store_name: config.store_name.clone(),
        exists: Path::new(&sqlite_path).exists(),
        sqlite_path,
        size_bytes,
        required_containers: verbose.then(|| {
            HubStore::required_containers()
                .iter()
                .map(|c| c.to_string())
                .collect()
        }),
    };

    match output_format {
        OutputFormat::Table => {
            println!("Configuration:");
            println!("  Config file:    {}", info.config_file);
            println!("{}", indent(&config.summary()));
            match info.size_bytes {
                Some(size) => println!("  Store file:     present ({})", format_size(size)),
                None => println!("  Store file:     not created yet"),
            }
            if let Some(containers) = &info.required_containers {
                println!();
                println!("Required containers:");
                for name in containers {
                    println!("  - {}", name);
                }
            }
        }
        format => match format.render(&info) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error serializing config info: {}", e),
        },
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}
