//! Entrypoint of the xstream binary
use dotenvy::dotenv;
use xstream_clap_blocks::{logging::LoggingConfig, tokio::TokioIoConfig};

mod commands {
    pub(crate) mod ack;
    pub(crate) mod common;
    pub(crate) mod consume;
    pub(crate) mod create_group;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "xstream",
    version,
    disable_help_flag = true,
    arg(
        clap::Arg::new("help")
            .short('h')
            .long("help")
            .help("Print help information")
            .action(clap::ArgAction::Help)
            .global(true)
    ),
    about = "Consume Redis streams, alone or as part of a consumer group",
    long_about = r#"Consume Redis streams, alone or as part of a consumer group

Examples:
    # Print every new entry of a stream without acknowledging anything
    xstream consume --stream orders

    # Consume as member 'billing-0' of group 'billing', replaying its pending entries first
    xstream consume --stream orders --group billing --consumer billing-0 --start-id 0-0

    # Create a consumer group that starts at the tail of the stream
    xstream create-group --stream orders --group billing

    # Acknowledge entries by hand
    xstream ack --stream orders --group billing --ids 1526919030474-55,1526919030474-56

    # Consume with full debug logging specified with LOG_FILTER
    LOG_FILTER=debug xstream consume --stream orders
"#
)]
struct Config {
    #[clap(flatten)]
    runtime_config: TokioIoConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Consume a stream until interrupted, printing each entry as one line of JSON
    Consume(commands::consume::Config),

    /// Create a consumer group, and its stream if needed
    CreateGroup(commands::create_group::Config),

    /// Acknowledge entries on behalf of a consumer group
    Ack(commands::ack::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = config.runtime_config.builder()?.build()?;

    tokio_runtime.block_on(async move {
        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Consume(config)) => {
                init_logs(&config.logging_config);
                if let Err(e) = commands::consume::command(config).await {
                    eprintln!("Consume command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::CreateGroup(config)) => {
                if let Err(e) = commands::create_group::command(config).await {
                    eprintln!("Create group command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Ack(config)) => {
                if let Err(e) = commands::ack::command(config).await {
                    eprintln!("Ack command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // Ignore this - a missing env file is not an error, defaults will
            // be applied when initialising the Config struct.
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}

fn init_logs(config: &LoggingConfig) {
    if let Err(e) = config.install_global_subscriber() {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }
}
