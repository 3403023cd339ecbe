//! courier-telemetry cli - replay a recorded track through the telemetry pipeline

use std::fs::{self, File};
use std::sync::Arc;

use argopt::{cmd_group, subcmd};
use csv::Reader;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_telemetry::connection::WebSocketConnector;
use courier_telemetry::gateway::{
    CredentialProvider, GatewayError, HttpLocationGateway, StaticCredentials,
};
use courier_telemetry::sources::{
    read_csv_track, read_gpx_track, CsvFields, ReplayPoint, ReplaySource,
};
use courier_telemetry::{
    ConnectionManager, LocationUpdate, OrderLocationGateway, TrackingConfig, TrackingSession,
};

/// CLI of courier-telemetry - Stream a recorded track as live location telemetry
#[cmd_group(commands = [gpx,csv])]
fn main() -> Result<(), String> {}

/// Replay the first track of a GPX file
#[subcmd]
fn gpx(
    /// GPX file source
    gpx_path: String,
    /// Pipeline configuration. Default: .courier-telemetry.yaml, ~/.courier-telemetry.yaml
    #[opt(long)]
    config: Option<String>,
    /// Access token for the socket and the REST fallback
    #[opt(long)]
    token: Option<String>,
    /// Playback speed multiplier
    #[opt(long, default_value = "1.0")]
    pace: f64,
) -> Result<(), String> {
    init_logging();
    let (conf, _) = load_configs(config)?;

    let file = File::open(gpx_path)
        .map_err(|e| format!("Failed on open the GPX file: {}", e.to_string()))?;
    let points = read_gpx_track(file).map_err(|e| e.to_string())?;

    replay(points, conf, token, pace)
}

/// Replay a CSV file track
#[subcmd]
fn csv(
    /// CSV file source
    csv_path: String,
    /// Pipeline configuration. Default: .courier-telemetry.yaml, ~/.courier-telemetry.yaml
    #[opt(long)]
    config: Option<String>,
    /// Access token for the socket and the REST fallback
    #[opt(long)]
    token: Option<String>,
    /// Playback speed multiplier
    #[opt(long, default_value = "1.0")]
    pace: f64,
) -> Result<(), String> {
    init_logging();
    let (conf, fields) = load_configs(config)?;

    let csv = File::open(csv_path)
        .map_err(|e| format!("Failed on open the CSV file: {}", e.to_string()))?;
    let points = read_csv_track(Reader::from_reader(csv), &fields).map_err(|e| e.to_string())?;

    replay(points, conf, token, pace)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run a tracking session over the points until they are played or Ctrl-C
fn replay(
    points: Vec<ReplayPoint>,
    conf: TrackingConfig,
    token: Option<String>,
    pace: f64,
) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed on start the runtime: {}", e.to_string()))?;

    runtime.block_on(async move {
        let credentials: Arc<dyn CredentialProvider> = Arc::new(match token {
            Some(token) => StaticCredentials::new(token),
            None => StaticCredentials::none(),
        });

        let gateway = match &conf.gateway_url {
            Some(url) => CliGateway::Http(
                HttpLocationGateway::new(url.clone(), credentials.clone())
                    .map_err(|e| e.to_string())?,
            ),
            None => CliGateway::Disabled,
        };

        let mut source = ReplaySource::new(points);
        source.pace(pace);
        let finished = source.finished();

        let connection = ConnectionManager::spawn(
            WebSocketConnector,
            credentials,
            conf.connection.clone(),
        );
        let mut session = TrackingSession::new(source, connection, Arc::new(gateway), &conf);
        session.start().map_err(|e| e.to_string())?;

        tokio::select! {
            _ = finished.cancelled() => info!("Track fully replayed"),
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }

        session.stop().await;

        let snapshot = session.snapshot();
        info!(
            distance_m = snapshot.total_distance_m,
            average_speed_kmh = snapshot.average_speed_kmh,
            max_speed_kmh = snapshot.max_speed_kmh,
            accepted = snapshot.accepted_samples,
            rejected = snapshot.rejected_samples,
            "Session summary"
        );
        if let Some(e) = snapshot.last_error {
            warn!(error = %e, "Session ended with an error");
        }

        Ok(())
    })
}

/// REST fallback, when an endpoint is configured
enum CliGateway {
    Http(HttpLocationGateway),
    Disabled,
}

impl OrderLocationGateway for CliGateway {
    async fn update_location(&self, update: &LocationUpdate) -> Result<(), GatewayError> {
        match self {
            Self::Http(gateway) => gateway.update_location(update).await,
            Self::Disabled => Ok(()),
        }
    }
}

/// Load the current config
fn load_configs(provided: Option<String>) -> Result<(TrackingConfig, CsvFields), String> {
    let mut options = vec![];

    if let Some(sprovided) = provided {
        options.push(sprovided);
    }

    options.push(".courier-telemetry.yaml".to_string());

    if let Some(home) = dirs::home_dir() {
        if let Some(shome) = home.to_str() {
            options.push(format!("{}/.courier-telemetry.yaml", shome));
        }
    }

    let mut yaml: Option<String> = None;
    for fi in options {
        if let Ok(s) = fs::read_to_string(fi) {
            yaml = Some(s);
            break;
        }
    }

    match yaml {
        Some(s) => parse_configs(&s),
        None => Ok((TrackingConfig::default(), CsvFields::default())),
    }
}

fn parse_configs(yaml: &str) -> Result<(TrackingConfig, CsvFields), String> {
    let tracking = TrackingConfig::from_yaml(yaml).map_err(|e| e.to_string())?;
    let extra: Configs = if yaml.trim().is_empty() {
        Configs::default()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| format!("Invalid config: {}", e.to_string()))?
    };

    Ok((tracking, extra.csv))
}

/// CLI only settings living next to the pipeline ones
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
struct Configs {
    pub csv: CsvFields,
}

#[test]
fn parse_configs_with_csv_fields() -> Result<(), String> {
    let (tracking, fields) = parse_configs("")?;
    assert_eq!(TrackingConfig::default(), tracking);
    assert_eq!(CsvFields::default(), fields);

    let yaml =
        "\npublisher:\n  agent_id: rider-3\ncsv:\n  time: recorded_at\n  flip_coordinates: true";
    let (tracking, fields) = parse_configs(yaml)?;

    assert_eq!("rider-3", tracking.publisher.agent_id);
    assert_eq!(
        CsvFields {
            time: "recorded_at".to_string(),
            flip_coordinates: true,
            ..Default::default()
        },
        fields
    );

    Ok(())
}
