//! Command handlers for CLI subcommands.

use std::path::Path;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use agora_core::{DebateOverrides, DiscussionOverrides};
use agora_orchestrator::{DebateSession, DiscussionSession};
use agora_persistence::atomic::atomic_write;
use agora_runner::TurnOutput;

use crate::app::App;
use crate::chat;
use crate::cli::{join_words, Cli, Commands};
use crate::render::{
    render_debate_event, render_debate_outcome, render_event, render_outcome, render_reply,
};

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Execute a CLI command. No command starts the interactive chat.
pub fn execute(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let _guard = runtime.enter();
    let app = App::new(cli.state_dir.clone(), &cli.conversation)?;

    let result = match cli.command.unwrap_or(Commands::Chat) {
        Commands::Discuss {
            topic,
            rounds,
            score,
            export,
        } => {
            let mut overrides = DiscussionOverrides::new();
            if let Some(rounds) = rounds {
                overrides = overrides.with_max_rounds(rounds);
            }
            if let Some(score) = score {
                overrides = overrides.with_score_threshold(score);
            }
            runtime.block_on(cmd_discuss(&app, &join_words(&topic), overrides, export.as_deref()))
        }
        Commands::Debate {
            topic,
            pro,
            con,
            judge,
            free_rounds,
            export,
        } => {
            let mut overrides = DebateOverrides::new();
            if let Some(pro) = pro {
                overrides = overrides.with_pro(pro);
            }
            if let Some(con) = con {
                overrides = overrides.with_con(con);
            }
            if let Some(judge) = judge {
                overrides = overrides.with_judge(judge);
            }
            if let Some(rounds) = free_rounds {
                overrides = overrides.with_free_rounds(rounds);
            }
            runtime.block_on(cmd_debate(&app, &join_words(&topic), overrides, export.as_deref()))
        }
        Commands::Ask {
            agent,
            question,
            history,
        } => runtime
            .block_on(ask(&app, &agent, &join_words(&question), history))
            .map(|output| println!("{}", render_reply(&app.config.agents, &output))),
        Commands::Chat => chat::run(&app, &runtime),
        Commands::Sessions => cmd_sessions(&app),
        Commands::Clear { agent, all } => cmd_clear(&app, agent.as_deref(), all),
        Commands::Config => cmd_config(&app),
    };

    let flushed = runtime.block_on(app.shutdown());
    result.and(flushed)
}

async fn cmd_discuss(
    app: &App,
    topic: &str,
    overrides: DiscussionOverrides,
    export: Option<&Path>,
) -> Result<()> {
    if topic.is_empty() {
        return Err("topic is empty".into());
    }
    let session = discuss(app, topic, overrides).await?;
    println!("{}", render_outcome(&app.config.agents, &session));

    if let Some(path) = export {
        let json = session.to_json()?;
        atomic_write(path, json.as_bytes())?;
        println!("\nExported to {}", path.display());
    }
    Ok(())
}

/// Runs a discussion in the app's conversation, printing progress.
///
/// Ctrl+C stops the discussion; the partial record is still returned.
pub async fn discuss(
    app: &App,
    topic: &str,
    overrides: DiscussionOverrides,
) -> Result<DiscussionSession> {
    let mut events = app.orchestrator.subscribe();
    let handle = app.orchestrator.start(&app.conversation, topic, overrides)?;
    let mut stopping = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.conversation() == &app.conversation => {
                    if let Some(text) = render_event(&app.config.agents, &event) {
                        println!("{}\n", text);
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "discussion events lagged"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c(), if !stopping => {
                if let Err(e) = signal {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                stopping = true;
                println!("Stopping discussion...");
                app.orchestrator.stop(&app.conversation).await;
            }
        }
    }

    let session = handle.await?;
    info!(
        conversation = %app.conversation,
        status = %session.status,
        rounds = session.rounds_completed(),
        "discussion done"
    );
    Ok(session)
}

async fn cmd_debate(
    app: &App,
    topic: &str,
    overrides: DebateOverrides,
    export: Option<&Path>,
) -> Result<()> {
    if topic.is_empty() {
        return Err("topic is empty".into());
    }
    let session = debate(app, topic, overrides).await?;
    println!("{}", render_debate_outcome(&session));

    if let Some(path) = export {
        let json = session.to_json()?;
        atomic_write(path, json.as_bytes())?;
        println!("\nExported to {}", path.display());
    }
    Ok(())
}

/// Runs a debate in the app's conversation, printing each argument.
///
/// Ctrl+C stops the debate; the partial record is still returned.
pub async fn debate(app: &App, topic: &str, overrides: DebateOverrides) -> Result<DebateSession> {
    let mut events = app.debates.subscribe();
    let handle = app.debates.start(&app.conversation, topic, overrides)?;
    let mut stopping = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.conversation() == &app.conversation => {
                    if let Some(text) = render_debate_event(&app.config.agents, &event) {
                        println!("{}\n", text);
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "debate events lagged"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c(), if !stopping => {
                if let Err(e) = signal {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                stopping = true;
                println!("Stopping debate...");
                app.debates.stop(&app.conversation).await;
            }
        }
    }

    let session = handle.await?;
    info!(
        conversation = %app.conversation,
        status = %session.status,
        arguments = session.arguments.len(),
        "debate done"
    );
    Ok(session)
}

/// Asks one agent. Ctrl+C kills the running turn.
pub async fn ask(app: &App, agent: &str, question: &str, history: usize) -> Result<TurnOutput> {
    if question.is_empty() {
        return Err("question is empty".into());
    }
    let turn = app.orchestrator.ask(&app.conversation, agent, question, history);
    tokio::pin!(turn);
    let output = tokio::select! {
        output = &mut turn => output?,
        _ = tokio::signal::ctrl_c() => {
            app.runner.kill(&app.conversation, Some(agent));
            turn.await?
        }
    };
    Ok(output)
}

pub(crate) fn cmd_sessions(app: &App) -> Result<()> {
    let sessions = app.runner.sessions(&app.conversation);
    if sessions.is_empty() {
        println!("No agent sessions in '{}'.", app.conversation);
        return Ok(());
    }
    println!("{:<10} {:<14} {:<38} IDLE", "AGENT", "STATE", "SESSION");
    for session in sessions {
        println!(
            "{:<10} {:<14} {:<38} {}s",
            session.agent,
            format!("{:?}", session.state),
            session.session_id.as_deref().unwrap_or("-"),
            session.idle_seconds()
        );
    }
    Ok(())
}

pub(crate) fn cmd_clear(app: &App, agent: Option<&str>, all: bool) -> Result<()> {
    if all {
        app.runner.reset_conversation(&app.conversation);
        println!("Cleared sessions and history of '{}'.", app.conversation);
        return Ok(());
    }
    app.runner.clear_sessions(&app.conversation, agent)?;
    match agent {
        Some(agent) => println!("Cleared {}'s session.", agent),
        None => println!("Cleared all agent sessions."),
    }
    Ok(())
}

pub(crate) fn cmd_config(app: &App) -> Result<()> {
    println!("{}", app.config.summary());
    let problems = app.config.validate();
    if problems.is_empty() {
        println!("\nConfiguration OK");
    } else {
        println!("\nProblems:");
        for problem in problems {
            println!("  - {}", problem);
        }
    }
    Ok(())
}
