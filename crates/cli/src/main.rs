use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use farecast_core::app::Dashboard;
use farecast_core::contract::{self, context::MarketContext, pricing::PriceExplanation};
use farecast_core::service::PricingMode;
use farecast_core::store::BackendHealth;
use farecast_core::view::feature_importance;

#[derive(Debug, Parser)]
#[command(name = "farecast", about = "Analyst client for the ride pricing backend")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe the pricing backend.
    Health,

    /// Price the current market context.
    Price {
        /// JSON file with a market context to price (becomes the current context).
        #[arg(long)]
        context: Option<PathBuf>,

        /// Use the explain-decision endpoint instead of optimize-price.
        #[arg(long)]
        explain: bool,

        /// Print the full explanation as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask the pricing assistant a question.
    Chat {
        message: String,

        /// Wait for the whole reply instead of streaming tokens.
        #[arg(long)]
        no_stream: bool,

        /// Ask the assistant to plan tool use before answering.
        #[arg(long)]
        plan: bool,

        #[arg(long)]
        model: Option<String>,
    },

    /// Print a methodology document.
    Doc { id: String },

    /// Summarize the model and data evidence.
    Evidence,

    /// Manage saved market scenarios.
    Scenario {
        #[command(subcommand)]
        action: ScenarioAction,
    },
}

#[derive(Debug, Subcommand)]
enum ScenarioAction {
    List,
    Save { name: String },
    Load { id: Uuid },
    Rename { id: Uuid, name: String },
    Delete { id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = farecast_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let app = Dashboard::from_settings(&settings)?;

    if let Err(err) = run(&app, args.command).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "command failed");
        return Err(err);
    }
    Ok(())
}

async fn run(app: &Dashboard, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Health => health(app).await,
        Command::Price {
            context,
            explain,
            json,
        } => {
            if let Some(path) = context {
                let ctx = read_context(&path)?;
                app.context.set_context(ctx);
                tracing::info!(path = %path.display(), "market context loaded");
            }
            let mode = if explain {
                PricingMode::Explain
            } else {
                PricingMode::Optimize
            };
            let explanation = app.price(mode).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&explanation)?);
            } else {
                print_explanation(app, &explanation);
            }
            Ok(())
        }
        Command::Chat {
            message,
            no_stream,
            plan,
            model,
        } => chat(app, &message, no_stream, plan, model).await,
        Command::Doc { id } => {
            println!("{}", app.evidence.doc_content(&id).await);
            Ok(())
        }
        Command::Evidence => evidence(app).await,
        Command::Scenario { action } => scenario(app, action),
    }
}

async fn health(app: &Dashboard) -> anyhow::Result<()> {
    let status = app.refresh_health().await;
    println!(
        "backend: {:?} (version {})",
        status.health,
        status.backend_version.as_deref().unwrap_or("unknown")
    );
    anyhow::ensure!(
        status.health != BackendHealth::Offline,
        "pricing backend is offline"
    );
    Ok(())
}

fn read_context(path: &Path) -> anyhow::Result<MarketContext> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read context file {} failed", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("context file {} is not JSON", path.display()))?;
    contract::decode::<MarketContext>(&raw).map_err(|issues| {
        let lines: Vec<String> = issues.iter().map(|i| format!("  {i}")).collect();
        anyhow::anyhow!("invalid market context:\n{}", lines.join("\n"))
    })
}

fn print_explanation(app: &Dashboard, explanation: &PriceExplanation) {
    let summary = app.executive();
    println!("recommended price: {:.2}", explanation.recommended_price);
    if let (Some(margin), Some(pct)) = (summary.margin, summary.margin_pct) {
        println!(
            "margin vs cost {:.2}: {margin:.2} ({pct:.1}%)",
            summary.historical_cost
        );
    }
    if let Some(profit) = explanation.expected_profit {
        println!("expected profit: {profit:.2}");
    }
    if let Some(confidence) = explanation.confidence {
        println!("confidence: {:.0}%", confidence * 100.0);
    }

    let bars = feature_importance(explanation, 5);
    if !bars.is_empty() {
        println!("top drivers:");
        for bar in bars {
            println!(
                "  {:<28} {:>+9.2} {:>5.1}%",
                bar.feature, bar.contribution, bar.share
            );
        }
    }
    for rule in &explanation.business_rules_applied {
        println!("rule applied: {rule}");
    }
}

async fn chat(
    app: &Dashboard,
    message: &str,
    no_stream: bool,
    plan: bool,
    model: Option<String>,
) -> anyhow::Result<()> {
    if no_stream {
        let reply = app.chat_session.send(message).await?;
        println!("{}", reply.content);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let done = CancellationToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut rx = app.chat.subscribe();
    let printer = {
        let done = done.clone();
        tokio::spawn(async move {
            let mut printed = String::new();
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let chunk = rx
                    .borrow_and_update()
                    .streaming_content
                    .get(printed.len()..)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                if let Some(chunk) = chunk {
                    write_flushed(&chunk);
                    printed.push_str(&chunk);
                }
            }
            printed
        })
    };

    let opts = app.stream_options(plan, model);
    let result = app
        .chat_session
        .send_streaming(message, &opts, cancel.clone())
        .await;
    done.cancel();
    interrupt.abort();
    let printed = printer.await.unwrap_or_default();

    match result? {
        Some(reply) => {
            println!("{}", unprinted_tail(&printed, &reply.content));
            if !reply.tools_used.is_empty() {
                println!("(tools: {})", reply.tools_used.join(", "));
            }
        }
        None => println!(),
    }
    if cancel.is_cancelled() {
        eprintln!("reply cancelled");
    }
    Ok(())
}

fn write_flushed(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// What is left to print once the final reply is known. Tokens the printer
/// missed are appended; a final message that rewrote the tokens is printed
/// whole on a fresh line.
fn unprinted_tail<'a>(printed: &str, reply: &'a str) -> std::borrow::Cow<'a, str> {
    match reply.strip_prefix(printed) {
        Some(rest) => rest.into(),
        None if printed.is_empty() => reply.into(),
        None => format!("\n{reply}").into(),
    }
}

async fn evidence(app: &Dashboard) -> anyhow::Result<()> {
    let view = app.evidence_view().await;

    for card in &view.bundle.model_cards {
        println!("model: {} ({})", card.name, card.id);
        if !card.description.is_empty() {
            println!("  {}", card.description);
        }
        for (metric, value) in &card.metrics {
            println!("  {metric}: {value}");
        }
    }
    if let Some(data) = &view.bundle.data_card {
        println!("data: {} ({} features)", data.name, data.features.len());
    }
    println!("documents:");
    for doc in &view.bundle.documents {
        println!("  {:<16} {}", doc.id, doc.title);
    }
    println!("honeywell mapping:");
    for m in &view.honeywell_mapping.mappings {
        println!("  {} -> {}", m.ride_concept, m.honeywell_concept);
    }
    Ok(())
}

fn scenario(app: &Dashboard, action: ScenarioAction) -> anyhow::Result<()> {
    let store = &app.context;
    match action {
        ScenarioAction::List => {
            for s in store.snapshot().saved_scenarios {
                println!("{}  {}  {}", s.id, s.saved_at.format("%Y-%m-%d %H:%M"), s.name);
            }
        }
        ScenarioAction::Save { name } => {
            let id = store.save_scenario(&name);
            println!("{id}");
        }
        ScenarioAction::Load { id } => {
            anyhow::ensure!(store.load_scenario(id), "no saved scenario {id}");
            println!("{}", serde_json::to_string_pretty(&store.context())?);
        }
        ScenarioAction::Rename { id, name } => {
            anyhow::ensure!(!name.trim().is_empty(), "scenario name is empty");
            anyhow::ensure!(
                store.snapshot().scenario(id).is_some(),
                "no saved scenario {id}"
            );
            store.rename_scenario(id, &name);
        }
        ScenarioAction::Delete { id } => {
            anyhow::ensure!(store.delete_scenario(id), "no saved scenario {id}");
        }
    }
    Ok(())
}

fn init_sentry(settings: &farecast_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_price_flags() {
        let args = Args::parse_from(["farecast", "price", "--explain", "--json"]);
        match args.command {
            Command::Price {
                context,
                explain,
                json,
            } => {
                assert!(context.is_none());
                assert!(explain && json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_scenario_load_id() {
        let id = Uuid::new_v4();
        let args = Args::parse_from(["farecast", "scenario", "load", &id.to_string()]);
        assert!(matches!(
            args.command,
            Command::Scenario {
                action: ScenarioAction::Load { id: parsed }
            } if parsed == id
        ));
        assert!(Args::try_parse_from(["farecast", "scenario", "load", "nope"]).is_err());
    }

    #[test]
    fn context_file_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.json");

        let mut raw = serde_json::to_value(MarketContext::default()).unwrap();
        raw["Vehicle_Type"] = serde_json::json!("Luxury");
        std::fs::write(&path, raw.to_string()).unwrap();
        let err = read_context(&path).unwrap_err();
        assert!(err.to_string().contains("Vehicle_Type"));

        raw["Vehicle_Type"] = serde_json::json!("Premium");
        std::fs::write(&path, raw.to_string()).unwrap();
        assert!(read_context(&path).is_ok());
    }

    #[test]
    fn tail_completes_a_partially_printed_reply() {
        assert_eq!(unprinted_tail("Demand is", "Demand is soft."), " soft.");
        assert_eq!(unprinted_tail("", "Hold the fare."), "Hold the fare.");
        assert_eq!(unprinted_tail("Hold", "Keep the fare."), "\nKeep the fare.");
        assert_eq!(unprinted_tail("Done.", "Done."), "");
    }

    #[test]
    fn parses_scenario_rename() {
        let id = Uuid::new_v4();
        let args = Args::parse_from(["farecast", "scenario", "rename", &id.to_string(), "Late peak"]);
        assert!(matches!(
            args.command,
            Command::Scenario {
                action: ScenarioAction::Rename { id: parsed, ref name }
            } if parsed == id && name == "Late peak"
        ));
    }
}
