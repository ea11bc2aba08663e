use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "smsbridge")]
#[command(about = "SMPP to Telegram bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a starter configuration file (refuses to overwrite an existing one).
    Init {
        /// Config file path (default: SMSBRIDGE_CONFIG_PATH or /etc/telegram-smpp/conf.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the bridge: bind the SMPP session, relay inbound SMS to Telegram and serve the submission endpoint.
    Run {
        /// Config file path (default: SMSBRIDGE_CONFIG_PATH or /etc/telegram-smpp/conf.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP listen address (overrides `address` from the config)
        #[arg(long, short, value_name = "ADDR")]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("smsbridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, listen }) => {
            if let Err(e) = run_bridge(config, listen).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(smsbridge::config::default_config_path);
    smsbridge::init::init_config(&path)?;
    println!("wrote starter configuration to {}", path.display());
    Ok(())
}

async fn run_bridge(
    config_path: Option<std::path::PathBuf>,
    listen: Option<String>,
) -> anyhow::Result<()> {
    let (mut config, path) = smsbridge::config::load_config(config_path)?;
    if let Some(addr) = listen {
        config.address = addr;
    }
    log::info!(
        "starting bridge from {} (smsc {}, listen {})",
        path.display(),
        config.smpp,
        config.address
    );
    smsbridge::gateway::run_bridge(config).await
}
