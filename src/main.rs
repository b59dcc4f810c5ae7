use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gotham::middleware::state::StateMiddleware;
use gotham::pipeline::{single_middleware, single_pipeline};
use gotham::router::{builder::*, Router};
use serde_derive::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::client::RestBackend;
use crate::handlers::{BookingFilter, Console, EventBookingPath, GuidPath};

mod client;
mod error;
mod export;
mod handlers;
mod models;
mod session;
mod status;

include!(concat!(env!("OUT_DIR"), "/templates.rs"));

/// Administration console for the events/booking backend.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Settings file, without extension.
    #[arg(long, default_value = "settings")]
    settings: String,
    /// Address to listen on; overrides the settings file.
    #[arg(long, env = "BOOKING_CONSOLE_LISTEN")]
    listen: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Settings {
    listen: String,
    api_url: Url,
    request_timeout_secs: u64,
    secure_cookies: bool,
}

impl Settings {
    fn load(path: &str) -> Result<Settings, config::ConfigError> {
        config::Config::builder()
            .set_default("listen", "127.0.0.1:3000")?
            .set_default("api_url", "http://localhost:9000")?
            .set_default("request_timeout_secs", 30)?
            .set_default("secure_cookies", false)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("BOOKING_CONSOLE").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.settings)
        .with_context(|| format!("could not load settings from {}", args.settings))?;
    let listen = args.listen.unwrap_or(settings.listen);

    let backend = RestBackend::new(
        settings.api_url,
        Duration::from_secs(settings.request_timeout_secs),
    )
    .context("could not build the backend client")?;
    info!(%listen, api_url = %backend.base_url(), "starting booking console");

    let console = Console::new(Arc::new(backend), settings.secure_cookies);
    gotham::start(listen, router(console)).context("console server stopped")?;
    Ok(())
}

fn router(console: Console) -> Router {
    let (chain, pipelines) = single_pipeline(single_middleware(StateMiddleware::new(console)));
    build_router(chain, pipelines, |route| {
        route.get("/").to_async(handlers::index);
        route.get("/login").to_async(handlers::login_page);
        route.post("/login").to_async(handlers::login);
        route.post("/logout").to_async(handlers::logout);

        route.get("/events").to_async(handlers::events);
        route.get("/events/new").to_async(handlers::new_event);
        route.post("/events/new").to_async(handlers::create_event);
        route
            .get("/events/:guid/edit")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::edit_event);
        route
            .post("/events/:guid/edit")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::update_event);
        route
            .post("/events/:guid/delete")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::delete_event);
        route
            .get("/events/:guid/bookings")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::event_bookings);
        route
            .post("/events/:guid/bookings/:booking/confirm")
            .with_path_extractor::<EventBookingPath>()
            .to_async(handlers::confirm_payment);
        route
            .get("/events/:guid/bookings.csv")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::bookings_csv_export);
        route
            .get("/events/:guid/export")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::export_bookings);
        route
            .get("/events/:guid/absentees")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::absentees);

        route
            .get("/bookings")
            .with_query_string_extractor::<BookingFilter>()
            .to_async(handlers::bookings);
        route
            .get("/bookings/:guid")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::booking);
        route
            .post("/bookings/:guid/verify")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::verify_booking);
        route
            .get("/bookings/:guid/payment-file")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::payment_file);
        route
            .get("/bookings/:guid/download")
            .with_path_extractor::<GuidPath>()
            .to_async(handlers::download_payment);
    })
}
