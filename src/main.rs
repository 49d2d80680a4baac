use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relay_client::{
    ConsentGate, EventClient, HttpTransport, MemoryStorage, PollConfig, PresetAnswer,
    SessionTracker, StaticEnvironment,
};
use relay_core::EventPayload;
use relay_settings::{load_settings_from_path, settings_path, RelaySettings};
use relay_telemetry::{init_telemetry, open_sink, LogQuery};

#[derive(Parser)]
#[command(name = "relay", about = "Consent-aware first-party analytics relay")]
struct Cli {
    /// Settings file (defaults to ~/.relay/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay endpoint
    Serve,
    /// Send one event through a running relay, as a browser would
    Send {
        /// Relay base URL; defaults to the configured local listener
        #[arg(long)]
        relay_url: Option<String>,
        #[arg(long, default_value = "page_view")]
        event: String,
        /// Extra event fields as key=value (repeatable)
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
        /// Recorded visitor answer for consent-managed modes
        #[arg(long)]
        consent: Option<bool>,
        #[arg(long, default_value = "https://localhost/")]
        page_url: String,
        #[arg(long, default_value = "")]
        title: String,
    },
    /// List persisted warn/error records
    Failures {
        #[arg(long)]
        error_kind: Option<String>,
        #[arg(long)]
        flow_id: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    match cli.command {
        Command::Serve => serve(settings).await,
        Command::Send {
            relay_url,
            event,
            fields,
            consent,
            page_url,
            title,
        } => {
            let payload = event_payload(&event, &fields)?;
            let env = StaticEnvironment {
                language: "en-US".into(),
                screen_width: 1920,
                screen_height: 1080,
                domain: url_host(&page_url),
                url: page_url,
                title,
                user_agent: Some(format!("relay-cli/{}", env!("CARGO_PKG_VERSION"))),
            };
            send(settings, relay_url, payload, consent, env).await
        }
        Command::Failures {
            error_kind,
            flow_id,
            limit,
        } => failures(&settings, error_kind, flow_id, limit),
    }
}

async fn serve(settings: RelaySettings) -> Result<()> {
    let _telemetry = init_telemetry(&settings.telemetry);
    let handle = relay_server::start(&settings)
        .await
        .context("starting relay server")?;

    tracing::info!(port = handle.port, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn send(
    settings: RelaySettings,
    relay_url: Option<String>,
    payload: EventPayload,
    consent: Option<bool>,
    env: StaticEnvironment,
) -> Result<()> {
    let _telemetry = init_telemetry(&settings.telemetry);
    let client_config = settings.client_config();

    let binding = match (client_config.cmp_provider, consent) {
        (Some(provider), Some(analytics)) => Some(PresetAnswer { analytics }.binding(provider)),
        _ => None,
    };
    let gate = ConsentGate::new(&client_config, binding, PollConfig::default())?;

    let base = relay_url.unwrap_or_else(|| format!("http://127.0.0.1:{}", settings.server.port));
    let transport = HttpTransport::new(&base, &settings.server.namespace, env.user_agent.as_deref())?;

    let client = EventClient::new(
        gate,
        SessionTracker::new(Arc::new(MemoryStorage::new())),
        Arc::new(env),
        Arc::new(transport),
    );
    let outcome = client.send(payload).await;
    println!("{outcome:?}");
    Ok(())
}

fn failures(
    settings: &RelaySettings,
    error_kind: Option<String>,
    flow_id: Option<String>,
    limit: u32,
) -> Result<()> {
    let sink = open_sink(&settings.telemetry).context("opening log database")?;
    let records = sink.query(&LogQuery {
        error_kind,
        flow_id,
        limit: Some(limit),
        ..Default::default()
    })?;
    for record in records {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

fn event_payload(event: &str, fields: &[String]) -> Result<EventPayload> {
    let mut payload = EventPayload::new().with("en", event);
    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            bail!("field must be KEY=VALUE: {field}");
        };
        // Numbers and booleans keep their JSON type; anything else is a string.
        let value: serde_json::Value =
            serde_json::from_str(value).unwrap_or_else(|_| value.into());
        payload.insert(key, value);
    }
    Ok(payload)
}

fn url_host(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_default()
}
