use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use vmnet_probe::{run_probe, ProbeConfig};

#[derive(Debug, Parser)]
#[command(name = "vmnet-probe", about = "Exercise the vmnet tun adapter end to end", version)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    packets: Option<u32>,
    #[arg(long)]
    payload_len: Option<usize>,
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn load_config(&self) -> Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_path(path)
                .with_context(|| format!("unable to load {}", path.display()))?,
            None => ProbeConfig::default(),
        };
        if let Some(packets) = self.packets {
            config.probe.packets = packets;
        }
        if let Some(payload_len) = self.payload_len {
            config.probe.payload_len = payload_len;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            eprintln!("vmnet-probe error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let config = cli.load_config()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log.level.as_str()),
    )
    .init();

    let report = run_probe(&config)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(report.is_healthy())
}
