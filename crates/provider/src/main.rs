//! Plugin binary of the CAST AI provider.

use castai_provider::cli::{self, Commands};
use castai_provider::{PROVIDER_NAME, dispatcher, logging, registry, serve, shutdown};
use miette::IntoDiagnostic;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{info, instrument};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = cli::parse();
    logging::init_logging(&cli.logging())?;

    match cli.command() {
        Commands::Serve => run_serve().await,
        Commands::Schema => print_schema().await,
        Commands::Version => write_stdout(format!("{}\n", env!("CARGO_PKG_VERSION"))).await,
    }
}

#[instrument(name = "provider_serve")]
async fn run_serve() -> miette::Result<()> {
    let dispatcher = dispatcher();
    let coordinator = shutdown::install_signal_handlers();

    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    tokio::select! {
        result = serve(dispatcher, input, output) => result.into_diagnostic(),
        () = coordinator.wait_for_shutdown() => {
            info!("Provider stopped by signal");
            Ok(())
        }
    }
}

async fn print_schema() -> miette::Result<()> {
    let registry = registry();
    let schema = serde_json::json!({
        "name": PROVIDER_NAME,
        "provider": castai_engine::ProviderConfig::schema().to_json(),
        "resource_schemas": registry.schemas(),
    });
    let text = serde_json::to_string_pretty(&schema).into_diagnostic()?;
    write_stdout(text + "\n").await
}

async fn write_stdout(text: String) -> miette::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await.into_diagnostic()?;
    stdout.flush().await.into_diagnostic()
}
