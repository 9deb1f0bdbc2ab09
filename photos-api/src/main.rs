use clap::Parser;
use photos::config::Settings;
use photos::fixtures::FixturePhotosGateway;
use photos::gateway::{HttpPhotosGateway, PhotosGateway};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

mod telemetry;

#[derive(Parser)]
#[command(name = "photos-api", version, about = "Serves photos from an upstream REST service")]
struct Cli {
    /// YAML config file. Environment variables prefixed with PHOTOS_API_ override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve built-in sample photos instead of calling the upstream service.
    #[arg(long)]
    fixtures: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let dotenv_error = dotenv_error(dotenvy::dotenv());

    let cli = Cli::parse();
    let settings = Arc::new(Settings::load(cli.config.as_deref())?);
    let _telemetry = telemetry::init(&settings)?;
    if let Some(e) = dotenv_error {
        tracing::warn!(error = %e, "could not load .env file");
    }

    let gateway: Arc<dyn PhotosGateway> = if cli.fixtures {
        tracing::warn!("serving fixture photos, the upstream service will not be called");
        Arc::new(FixturePhotosGateway::default())
    } else {
        tracing::info!(base_url = %settings.external.base_url, "using upstream photo service");
        Arc::new(HttpPhotosGateway::new(&settings.external))
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(photos::run(settings, gateway))?;

    tracing::info!("shut down");
    Ok(())
}

/// A missing .env file is fine; anything else is reported once logging is up.
fn dotenv_error<T>(result: Result<T, dotenvy::Error>) -> Option<dotenvy::Error> {
    result.err().filter(|e| !e.not_found())
}
