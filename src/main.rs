use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sidecar::capture::{CaptureSource, ManualCapture};
use sidecar::db::{self, PgStore};
use sidecar::models::{
    Communication, CommunicationSource, ExtensionSettings, NewParticipant, Participant, Situation,
    SituationBrief, SituationPatch, SituationStatus, StorageUsage,
};
use sidecar::{report, Request, Response, Sidecar, Storage};

#[derive(Parser)]
#[command(name = "sidecar")]
#[command(about = "Track situations built from captured conversations", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Log filter used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "SIDECAR_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// List situations, newest first
    List {
        #[arg(long)]
        status: Option<SituationStatus>,
    },
    /// Show one situation with its participants and communications
    Show { id: String },
    /// Start tracking a new situation
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Change a situation's status
    SetStatus { id: String, status: SituationStatus },
    /// Delete a situation and its brief
    Delete { id: String },
    /// Add a participant to a situation
    AddParticipant {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    /// Remove a participant from a situation
    RemoveParticipant { id: String, participant_id: String },
    /// Attach captured text to a situation
    Capture {
        id: String,
        #[arg(long, default_value = "manual")]
        source: CommunicationSource,
        #[arg(long)]
        text: String,
        #[arg(long = "participant")]
        participants: Vec<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Remove a communication from a situation
    RemoveCommunication { id: String, communication_id: String },
    /// Print the brief for a situation, generating it if needed
    Brief {
        id: String,
        #[arg(long)]
        regenerate: bool,
    },
    /// Show settings, or change them with --set key=value
    Settings {
        #[arg(long = "set", value_name = "KEY=VALUE")]
        changes: Vec<String>,
    },
    /// Write all stored data to a JSON file
    Export {
        #[arg(long, default_value = "sidecar-export.json")]
        out: PathBuf,
    },
    /// Replace stored data with the contents of an export file
    Import {
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete all stored data
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Report local storage usage
    Usage,
    /// Check whether the text-generation service is reachable
    Status,
    /// Serve newline-delimited JSON requests from stdin
    Rpc,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sidecar={},warn", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let sidecar = Sidecar::new(Storage::new(Arc::new(PgStore::new(pool.clone()))));

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::List { status } => {
            let situations: Vec<Situation> = call(&sidecar, Request::GetSituations).await?;
            let situations: Vec<_> = situations
                .into_iter()
                .filter(|s| status.map_or(true, |wanted| s.status == wanted))
                .collect();

            if situations.is_empty() {
                println!("No situations found.");
                return Ok(());
            }
            for situation in situations.iter() {
                println!(
                    "- [{}] {} ({}) {} people, {} messages, updated {}",
                    situation.id,
                    situation.title,
                    situation.status,
                    situation.participants.len(),
                    situation.communications.len(),
                    situation.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Show { id } => {
            let situation: Situation = call(&sidecar, Request::GetSituation { id }).await?;
            print_situation(&situation);
        }
        Commands::Create { title, description } => {
            let situation: Situation =
                call(&sidecar, Request::CreateSituation { title, description }).await?;
            println!("Created situation {} ({}).", situation.id, situation.title);
        }
        Commands::SetStatus { id, status } => {
            let patch = SituationPatch {
                status: Some(status),
                ..SituationPatch::default()
            };
            let situation: Situation =
                call(&sidecar, Request::UpdateSituation { id, patch }).await?;
            println!("{} is now {}.", situation.title, situation.status);
        }
        Commands::Delete { id } => {
            send(&sidecar, Request::DeleteSituation { id: id.clone() }).await?;
            println!("Deleted situation {id}.");
        }
        Commands::AddParticipant {
            id,
            name,
            email,
            role,
        } => {
            let participant = NewParticipant {
                email,
                role,
                ..NewParticipant::named(name)
            };
            let added: Participant = call(
                &sidecar,
                Request::AddParticipant {
                    situation_id: id,
                    participant,
                },
            )
            .await?;
            println!("Added {} as participant {}.", added.name, added.id);
        }
        Commands::RemoveParticipant { id, participant_id } => {
            send(
                &sidecar,
                Request::RemoveParticipant {
                    situation_id: id,
                    participant_id,
                },
            )
            .await?;
            println!("Participant removed.");
        }
        Commands::Capture {
            id,
            source,
            text,
            participants,
            url,
        } => {
            let manual = ManualCapture {
                text,
                participants,
                url,
            };
            let mut capture = manual
                .capture_selection()
                .context("nothing to capture: the text is empty")?;
            capture.source = Some(source);

            let added: Communication = call(
                &sidecar,
                Request::CaptureSelection {
                    situation_id: id,
                    capture,
                },
            )
            .await?;
            println!("Captured communication {} ({}).", added.id, added.source);
        }
        Commands::RemoveCommunication {
            id,
            communication_id,
        } => {
            send(
                &sidecar,
                Request::RemoveCommunication {
                    situation_id: id,
                    communication_id,
                },
            )
            .await?;
            println!("Communication removed.");
        }
        Commands::Brief { id, regenerate } => {
            let existing = if regenerate {
                None
            } else {
                sidecar.stored_brief(&id).await?
            };
            let brief: SituationBrief = match existing {
                Some(brief) => brief,
                None => {
                    eprintln!("Generating brief, this can take a while...");
                    call(&sidecar, Request::GenerateBrief { situation_id: id }).await?
                }
            };
            print!("{}", report::render_brief(&brief));
        }
        Commands::Settings { changes } => {
            let settings: ExtensionSettings = if changes.is_empty() {
                call(&sidecar, Request::GetSettings).await?
            } else {
                call(&sidecar, Request::UpdateSettings(parse_changes(&changes)?)).await?
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Export { out } => {
            let document: String = call(&sidecar, Request::ExportData).await?;
            std::fs::write(&out, document)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Export written to {}.", out.display());
        }
        Commands::Import { file } => {
            let data = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            send(&sidecar, Request::ImportData { data }).await?;
            println!("Imported {}.", file.display());
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete all data without --yes");
            }
            send(&sidecar, Request::ClearData).await?;
            println!("All data cleared.");
        }
        Commands::Usage => {
            let usage: StorageUsage = call(&sidecar, Request::GetStorageUsage).await?;
            println!(
                "Storage: {} / {} ({:.1}%)",
                format_bytes(usage.used),
                format_bytes(usage.total),
                usage.percentage
            );
        }
        Commands::Status => {
            let status: Value = call(&sidecar, Request::CheckLlmStatus).await?;
            let connected = status["connected"].as_bool().unwrap_or(false);
            println!(
                "LLM at {}: {}",
                status["endpoint"].as_str().unwrap_or("unknown"),
                if connected { "Connected" } else { "Not connected" }
            );
        }
        Commands::Rpc => serve_rpc(&sidecar).await?,
    }

    Ok(())
}

/// Dispatch a request and fail unless it succeeded.
async fn send(sidecar: &Sidecar, request: Request) -> anyhow::Result<Option<Value>> {
    let response = sidecar.handle(request).await;
    if !response.success {
        anyhow::bail!(response
            .error
            .unwrap_or_else(|| "request failed".to_string()));
    }
    Ok(response.data)
}

/// Dispatch a request and decode its data payload.
async fn call<T: DeserializeOwned>(sidecar: &Sidecar, request: Request) -> anyhow::Result<T> {
    let data = send(sidecar, request)
        .await?
        .context("response carried no data")?;
    serde_json::from_value(data).context("unexpected response payload")
}

async fn serve_rpc(sidecar: &Sidecar) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => sidecar.handle(request).await,
            Err(err) => Response::failure(format!("invalid request: {err}")),
        };
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn parse_changes(changes: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut map = Map::new();
    for change in changes {
        let (key, raw) = change
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got {change}"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.trim().to_string(), value);
    }
    Ok(map)
}

fn print_situation(situation: &Situation) {
    println!("{} [{}]", situation.title, situation.status);
    if !situation.description.is_empty() {
        println!("{}", situation.description);
    }
    println!(
        "Created {}, updated {}",
        situation.created_at.format("%Y-%m-%d %H:%M"),
        situation.updated_at.format("%Y-%m-%d %H:%M")
    );

    println!();
    println!("Participants ({}):", situation.participants.len());
    for participant in situation.participants.iter() {
        match &participant.role {
            Some(role) => println!("- {} {} ({})", participant.id, participant.name, role),
            None => println!("- {} {}", participant.id, participant.name),
        }
    }

    println!();
    println!("Communications ({}):", situation.communications.len());
    for communication in situation.communications.iter() {
        let preview: String = communication.content.chars().take(120).collect();
        println!(
            "- {} [{} {}] {}",
            communication.id,
            communication.source,
            communication.timestamp.format("%Y-%m-%d %H:%M"),
            preview
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
