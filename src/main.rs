mod demo;

use clap::{ArgAction, Parser};
use langflow_client::{
    AuthHeader, ClientConfig, DEFAULT_BASE_URL, IoType, LangflowClient, RunRequest, StreamUpdate,
    Tweaks,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

type MainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Run a Langflow flow with a message and optional tweaks.
#[derive(Debug, Parser)]
#[command(name = "langflow-run", version)]
struct Cli {
    /// Message sent to the flow.
    input_value: String,

    #[arg(default_value = "chat")]
    input_type: IoType,

    #[arg(default_value = "chat")]
    output_type: IoType,

    /// `true` follows the run's event stream; anything else waits for the final output.
    #[arg(default_value = "false", action = ArgAction::Set, value_parser = parse_stream_flag)]
    stream: bool,

    /// Flow id or endpoint name.
    #[arg(long, env = "LANGFLOW_FLOW_ID", default_value = demo::FLOW_ID)]
    flow: String,

    #[arg(long, env = "LANGFLOW_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "LANGFLOW_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// How the API key is sent: `bearer` or `x-api-key`.
    #[arg(long, default_value = "bearer")]
    auth_header: AuthHeader,

    /// JSON object of per-component overrides. Defaults to the bundled example flow's tweaks.
    #[arg(long)]
    tweaks: Option<String>,

    /// File to upload for the flow; its server path becomes the `path` tweak of
    /// every component named in `--components`.
    #[arg(long, requires = "components")]
    upload_file: Option<PathBuf>,

    /// Comma-separated component ids that receive the uploaded file's path.
    #[arg(long, value_delimiter = ',')]
    components: Vec<String>,

    /// Print the full initial response as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_stream_flag(value: &str) -> Result<bool, String> {
    Ok(value == "true")
}

fn with_file_path(tweaks: Tweaks, components: &[String], file_path: &str) -> Tweaks {
    components.iter().fold(tweaks, |tweaks, component| {
        tweaks.with(component.as_str(), "path", file_path)
    })
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut tweaks = match &cli.tweaks {
        Some(raw) => {
            Tweaks::from_json(raw).map_err(|e| format!("Invalid tweaks JSON string: {}", e))?
        }
        None => demo::tweaks()?,
    };

    let mut config = ClientConfig::new(cli.base_url).with_auth_header(cli.auth_header);
    if let Some(api_key) = cli.api_key {
        config = config.with_api_key(api_key);
    }
    let client = LangflowClient::new(config);

    if let Some(path) = &cli.upload_file {
        let file_path = client.upload_file(&cli.flow, path).await?;
        tracing::info!(%file_path, "uploaded {}", path.display());
        tweaks = with_file_path(tweaks, &cli.components, &file_path);
    }

    let request = RunRequest::new(cli.input_value)
        .input_type(cli.input_type)
        .output_type(cli.output_type)
        .tweaks(tweaks)
        .stream(cli.stream);

    let run = client.run_flow(&cli.flow, &request).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(run.response.as_value())?);
    }

    match run.stream {
        Some(mut updates) => {
            while let Some(update) = updates.next().await {
                match update {
                    StreamUpdate::Update(event) => {
                        println!("Received: {}", event.chunk().unwrap_or_default());
                    }
                    StreamUpdate::Closed(reason) => {
                        tracing::info!("Stream Closed: {}", reason);
                    }
                    StreamUpdate::Failed(err) => return Err(err.into()),
                }
            }
        }
        None if cli.stream => {
            tracing::warn!("response did not announce a stream url");
        }
        None => match run.response.final_text() {
            Ok(text) => println!("Final Output: {}", text),
            Err(err) => {
                tracing::warn!(error = %err, "no chat message in response");
                if !cli.json {
                    println!("{}", serde_json::to_string_pretty(run.response.as_value())?);
                }
            }
        },
    }

    Ok(())
}
