//! Interactive chat.
//!
//! Plain messages go through the [`KeywordRouter`]: a mentioned agent is
//! asked directly, a discussion request starts a roundtable, a debate
//! request starts a debate, and anything else goes to the last agent that
//! answered. Slash commands manage the
//! conversation.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::runtime::Runtime;
use tracing::debug;

use agora_core::{DebateOverrides, DiscussionOverrides, IntentRouter, KeywordRouter, RouteKind};
use agora_orchestrator::DEFAULT_ASK_HISTORY;

use crate::app::App;
use crate::commands::{self, Result};
use crate::render::{render_debate_outcome, render_outcome, render_reply};

const HISTORY_FILE: &str = "chat_history.txt";

const HELP: &str = "\
Messages are routed automatically: mention an agent by name to ask it,
or ask for a discussion / roundtable to involve everyone, or for a
debate to have two agents argue it out.

  /discuss <topic>      start a roundtable (Ctrl+C stops it)
  /debate <motion>      start a judged debate (Ctrl+C stops it)
  /ask <agent> <text>   ask one agent
  /sessions             list agent sessions
  /clear [agent]        drop agent sessions
  /reset                drop sessions and history
  /config               show configuration
  /help                 show this help
  /quit                 exit";

/// A parsed chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Message(String),
    Discuss(String),
    Debate(String),
    Ask { agent: String, question: String },
    Sessions,
    Clear(Option<String>),
    Reset,
    Config,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl ChatCommand {
    /// Parses one input line.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ChatCommand::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return ChatCommand::Message(line.to_string());
        };

        let (cmd, args) = match rest.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, args.trim()),
            None => (rest, ""),
        };
        match cmd.to_lowercase().as_str() {
            "discuss" | "roundtable" | "rt" if !args.is_empty() => ChatCommand::Discuss(args.to_string()),
            "debate" | "vs" if !args.is_empty() => ChatCommand::Debate(args.to_string()),
            "ask" => match args.split_once(char::is_whitespace) {
                Some((agent, question)) if !question.trim().is_empty() => ChatCommand::Ask {
                    agent: agent.to_string(),
                    question: question.trim().to_string(),
                },
                _ => ChatCommand::Unknown(line.to_string()),
            },
            "sessions" | "s" => ChatCommand::Sessions,
            "clear" => ChatCommand::Clear(Some(args.to_string()).filter(|a| !a.is_empty())),
            "reset" => ChatCommand::Reset,
            "config" => ChatCommand::Config,
            "help" | "h" | "?" => ChatCommand::Help,
            "quit" | "exit" | "q" => ChatCommand::Quit,
            _ => ChatCommand::Unknown(line.to_string()),
        }
    }
}

/// Runs the chat loop until `/quit` or end of input.
pub fn run(app: &App, runtime: &Runtime) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let history_path = app.config.state_dir.join(HISTORY_FILE);
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
    }
    let router = KeywordRouter::new(&app.config.agents, app.config.default_agent.clone());

    println!("Agora v{} - conversation '{}'", env!("CARGO_PKG_VERSION"), app.conversation);
    println!("Type /help for commands, /quit to exit\n");

    loop {
        match editor.readline("agora> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                let cmd = ChatCommand::parse(&line);
                debug!(?cmd, "parsed chat input");
                match handle(app, runtime, &router, cmd) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => println!("^C"),
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = std::fs::create_dir_all(&app.config.state_dir);
    let _ = editor.save_history(&history_path);
    Ok(())
}

/// Handles one command. Returns `Ok(true)` when the user quits.
fn handle(app: &App, runtime: &Runtime, router: &KeywordRouter, cmd: ChatCommand) -> Result<bool> {
    match cmd {
        ChatCommand::Empty => {}
        ChatCommand::Quit => return Ok(true),
        ChatCommand::Help => println!("{}", HELP),
        ChatCommand::Unknown(line) => println!("Unknown command: {} (try /help)", line),
        ChatCommand::Sessions => commands::cmd_sessions(app)?,
        ChatCommand::Clear(agent) => commands::cmd_clear(app, agent.as_deref(), false)?,
        ChatCommand::Reset => commands::cmd_clear(app, None, true)?,
        ChatCommand::Config => commands::cmd_config(app)?,
        ChatCommand::Discuss(topic) => discuss(app, runtime, &topic)?,
        ChatCommand::Debate(topic) => debate(app, runtime, &topic)?,
        ChatCommand::Ask { agent, question } => ask(app, runtime, &agent, &question)?,
        ChatCommand::Message(text) => {
            let last_agent = app.store.load(&app.conversation).last_agent;
            let decision = router.route(&text, last_agent.as_deref());
            debug!(kind = ?decision.kind, agents = ?decision.agents, reason = %decision.reason, "routed message");
            match decision.kind {
                RouteKind::Discussion => discuss(app, runtime, &decision.prompt)?,
                RouteKind::Debate => debate(app, runtime, &decision.prompt)?,
                RouteKind::Single | RouteKind::Multiple => {
                    for agent in &decision.agents {
                        if let Err(e) = ask(app, runtime, agent, &decision.prompt) {
                            eprintln!("{} did not answer: {}", agent, e);
                        }
                    }
                }
            }
        }
    }
    Ok(false)
}

fn discuss(app: &App, runtime: &Runtime, topic: &str) -> Result<()> {
    let session = runtime.block_on(commands::discuss(app, topic, DiscussionOverrides::new()))?;
    println!("{}\n", render_outcome(&app.config.agents, &session));
    Ok(())
}

fn debate(app: &App, runtime: &Runtime, topic: &str) -> Result<()> {
    let session = runtime.block_on(commands::debate(app, topic, DebateOverrides::new()))?;
    println!("{}\n", render_debate_outcome(&session));
    Ok(())
}

fn ask(app: &App, runtime: &Runtime, agent: &str, question: &str) -> Result<()> {
    let output = runtime.block_on(commands::ask(app, agent, question, DEFAULT_ASK_HISTORY))?;
    println!("{}\n", render_reply(&app.config.agents, &output));
    Ok(())
}
