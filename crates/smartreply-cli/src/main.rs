use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use smartreply_core::*;
use smartreply_provider::create_provider;
use smartreply_schema::{
    ConversationMessage, ConversationSettings, GenerateOptions, GenerationOutcome,
    GenerationTrigger, SettingsPatch, SmartReplyRecord, TonePreference,
};
use smartreply_store::{MessageStore, SqliteStore};

#[derive(Parser)]
#[command(name = "smartreply", version, about = "Smart reply generation for chat conversations")]
struct Cli {
    #[arg(
        long,
        short = 'c',
        default_value = "config/smartreply.yaml",
        help = "Path to the YAML config file"
    )]
    config: PathBuf,

    #[arg(
        long,
        default_value = "~/.smartreply",
        help = "Data directory (relative database paths and logs live here)"
    )]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate the config file")]
    Validate,
    #[command(about = "Generate smart replies for a user in a conversation")]
    Generate {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
        #[arg(help = "User ID")]
        user_id: String,
        #[arg(long, help = "Ignore any cached replies")]
        force: bool,
        #[arg(long, help = "Attempts before giving up")]
        max_retries: Option<u32>,
        #[arg(long, help = "Reply language override (ISO 639-1)")]
        language: Option<String>,
        #[arg(long, help = "Print the outcome as JSON")]
        json: bool,
    },
    #[command(about = "Show the cached smart replies for a user")]
    Show {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
        #[arg(help = "User ID")]
        user_id: String,
    },
    #[command(subcommand, about = "Conversation messages")]
    Message(MessageCommands),
    #[command(subcommand, about = "Conversation participants")]
    Participant(ParticipantCommands),
    #[command(subcommand, about = "Per-user conversation settings")]
    Settings(SettingsCommands),
    #[command(about = "Regenerate replies for a user, bypassing the cache")]
    Refresh {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
        #[arg(help = "User ID")]
        user_id: String,
        #[arg(long, help = "Reply language override (ISO 639-1)")]
        language: Option<String>,
    },
}

#[derive(Subcommand)]
enum MessageCommands {
    #[command(about = "Store a message and regenerate replies for the other participants")]
    Add {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
        #[arg(help = "Sender user ID")]
        sender_id: String,
        #[arg(help = "Message text")]
        text: String,
        #[arg(long, help = "Message ID (random if omitted)")]
        id: Option<String>,
        #[arg(long, help = "Message language (ISO 639-1)")]
        language: Option<String>,
    },
    #[command(about = "List recent messages, newest first")]
    List {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
        #[arg(long, default_value = "30")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ParticipantCommands {
    #[command(about = "Add a participant and generate their first replies")]
    Add {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
        #[arg(help = "User ID")]
        user_id: String,
    },
    #[command(about = "List participants")]
    List {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    #[command(about = "Show settings (created with defaults on first access)")]
    Show {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
        #[arg(help = "User ID")]
        user_id: String,
    },
    #[command(about = "Update settings; regenerates replies when tone or enablement change")]
    Set {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
        #[arg(help = "User ID")]
        user_id: String,
        #[arg(long, help = "formal, casual or auto")]
        tone: Option<TonePreference>,
        #[arg(long)]
        auto_translate: Option<bool>,
        #[arg(long)]
        enabled: Option<bool>,
    },
}

struct App {
    store: Arc<SqliteStore>,
    coordinator: Arc<GenerationCoordinator>,
    dispatcher: TriggerDispatcher,
}

impl App {
    fn build(config: &AppConfig, data_dir: &Path) -> Result<Self> {
        let db_path = resolve_data_path(data_dir, &config.database.path);
        let store = Arc::new(SqliteStore::open(&db_path)?);
        tracing::debug!("opened store at {}", db_path.display());

        let provider = create_provider(&config.provider, config.pipeline.generation_timeout())?;
        let mut coordinator = GenerationCoordinator::new(
            config.pipeline.clone(),
            provider.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        );
        if config.analysis.enabled {
            coordinator = coordinator.with_analyzer(Arc::new(LlmContextAnalyzer::new(
                provider,
                config.analysis_model(),
            )));
        }
        let coordinator = Arc::new(coordinator);
        let dispatcher = TriggerDispatcher::new(coordinator.clone(), store.clone());

        Ok(Self {
            store,
            coordinator,
            dispatcher,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if cli.data_dir.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.data_dir = PathBuf::from(home).join(
                cli.data_dir
                    .strip_prefix("~")
                    .unwrap_or(&cli.data_dir),
            );
        }
    }

    let log_dir = cli.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "smartreply.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let config = load_config(&cli.config)?;
    if let Commands::Validate = cli.command {
        println!(
            "Config valid. provider={} ({:?}), model={}, analysis={}, database={}",
            config.provider.id,
            config.provider.provider_type,
            config.pipeline.model,
            if config.analysis.enabled { "on" } else { "off" },
            resolve_data_path(&cli.data_dir, &config.database.path).display()
        );
        return Ok(());
    }

    let app = App::build(&config, &cli.data_dir)?;

    match cli.command {
        Commands::Validate => {}
        Commands::Generate {
            conversation_id,
            user_id,
            force,
            max_retries,
            language,
            json,
        } => {
            let mut options = GenerateOptions {
                force_refresh: force,
                max_retries,
                ..GenerateOptions::default()
            };
            options.target_language = language;
            let report = app
                .coordinator
                .generate_detailed(&conversation_id, &user_id, options)
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report.outcome)?);
            } else {
                print_outcome(&report.outcome);
                if let Some(run) = &report.run {
                    for step in &run.steps {
                        println!(
                            "  {:<16} {:>6}ms {}",
                            step.name,
                            step.duration_ms,
                            if step.success { "ok" } else { "failed" }
                        );
                    }
                    if run.analysis_degraded {
                        println!("  analysis fell back to heuristics");
                    }
                    if run.generation_degraded {
                        println!("  generation fell back to default replies");
                    }
                }
            }
            if !report.outcome.success {
                return Err(anyhow!("smart reply generation failed"));
            }
        }
        Commands::Show {
            conversation_id,
            user_id,
        } => match app.coordinator.cache().get(&conversation_id, &user_id).await? {
            Some(record) => {
                let expired = app.coordinator.cache().is_expired(&record, Utc::now());
                print_record(&record);
                println!("  status: {}", if expired { "expired" } else { "fresh" });
            }
            None => println!("No smart replies stored for {conversation_id}/{user_id}."),
        },
        Commands::Message(cmd) => match cmd {
            MessageCommands::Add {
                conversation_id,
                sender_id,
                text,
                id,
                language,
            } => {
                let mut message = ConversationMessage::new(
                    id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    &sender_id,
                    text,
                    Utc::now().timestamp_millis(),
                );
                message.language = language;
                app.store.insert_message(&conversation_id, message).await?;
                let outcomes = app
                    .dispatcher
                    .handle_and_wait(GenerationTrigger::NewMessage {
                        conversation_id,
                        sender_id,
                    })
                    .await?;
                println!("Message stored. Regenerated replies for {} participant(s).", outcomes.len());
                for outcome in &outcomes {
                    print_outcome(outcome);
                }
            }
            MessageCommands::List {
                conversation_id,
                limit,
            } => {
                let messages = app.store.recent_messages(&conversation_id, limit).await?;
                println!("{:<26} {:<16} TEXT", "TIME", "SENDER");
                println!("{}", "-".repeat(72));
                for message in messages {
                    println!(
                        "{:<26} {:<16} {}",
                        format_millis(message.timestamp_ms),
                        message.sender_id,
                        message.text
                    );
                }
            }
        },
        Commands::Participant(cmd) => match cmd {
            ParticipantCommands::Add {
                conversation_id,
                user_id,
            } => {
                let outcomes = app
                    .dispatcher
                    .handle_and_wait(GenerationTrigger::ParticipantAdded {
                        conversation_id: conversation_id.clone(),
                        user_id: user_id.clone(),
                    })
                    .await?;
                println!("Added '{user_id}' to '{conversation_id}'.");
                for outcome in &outcomes {
                    print_outcome(outcome);
                }
            }
            ParticipantCommands::List { conversation_id } => {
                for user_id in app.store.participants(&conversation_id).await? {
                    println!("{user_id}");
                }
            }
        },
        Commands::Settings(cmd) => match cmd {
            SettingsCommands::Show {
                conversation_id,
                user_id,
            } => {
                let settings = app
                    .coordinator
                    .settings()
                    .get_or_create(&conversation_id, &user_id)
                    .await?;
                print_settings(&settings);
            }
            SettingsCommands::Set {
                conversation_id,
                user_id,
                tone,
                auto_translate,
                enabled,
            } => {
                let patch = SettingsPatch {
                    tone_preference: tone,
                    auto_translate,
                    smart_replies_enabled: enabled,
                };
                if patch.is_empty() {
                    return Err(anyhow!(
                        "nothing to update: pass --tone, --auto-translate or --enabled"
                    ));
                }
                let (before, after) = app
                    .coordinator
                    .settings()
                    .update(&conversation_id, &user_id, &patch)
                    .await?;
                print_settings(&after);
                let outcomes = app
                    .dispatcher
                    .handle_and_wait(GenerationTrigger::SettingsChanged { before, after })
                    .await?;
                if outcomes.is_empty() {
                    println!("No regeneration needed.");
                }
                for outcome in &outcomes {
                    print_outcome(outcome);
                }
            }
        },
        Commands::Refresh {
            conversation_id,
            user_id,
            language,
        } => {
            let outcomes = app
                .dispatcher
                .handle_and_wait(GenerationTrigger::ManualRefresh {
                    conversation_id,
                    user_id,
                    target_language: language,
                })
                .await?;
            for outcome in &outcomes {
                print_outcome(outcome);
            }
        }
    }

    Ok(())
}

/// Relative database paths live under the data directory.
fn resolve_data_path(data_dir: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        data_dir.join(path)
    }
}

fn format_millis(ms: i64) -> String {
    chrono::DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

fn print_outcome(outcome: &GenerationOutcome) {
    if !outcome.success {
        println!(
            "Generation failed after {}ms: {}",
            outcome.processing_time_ms,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }
    match &outcome.smart_replies {
        Some(record) => {
            print_record(record);
            println!(
                "  {} in {}ms",
                if outcome.cache_hit { "cache hit" } else { "generated" },
                outcome.processing_time_ms
            );
        }
        None => println!("Smart replies are disabled for this user."),
    }
}

fn print_record(record: &SmartReplyRecord) {
    println!(
        "{}/{} ({}, {}):",
        record.conversation_id,
        record.user_id,
        record.generated_by.as_str(),
        record.context_analysis.language
    );
    for (i, reply) in record.replies.iter().enumerate() {
        println!("  {}. {reply}", i + 1);
    }
    let expires = record
        .expires_at
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  generated {} expires {}",
        record.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        expires
    );
}

fn print_settings(settings: &ConversationSettings) {
    println!("{:<16} {}", "conversation", settings.conversation_id);
    println!("{:<16} {}", "user", settings.user_id);
    println!("{:<16} {}", "tone", settings.tone_preference);
    println!("{:<16} {}", "auto_translate", settings.auto_translate);
    println!("{:<16} {}", "smart_replies", settings.smart_replies_enabled);
    println!(
        "{:<16} {}",
        "updated",
        settings.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
}
