//! Stopping a discussion against real agent processes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agora_core::{
    AgentDefinition, AgentRegistry, AgoraConfig, DiscussionConfig, DiscussionOverrides,
    SessionIdSource, TimeoutPolicy, SESSION_PLACEHOLDER,
};
use agora_models::{ConversationId, SessionState};
use agora_orchestrator::{DiscussionStatus, RoundtableOrchestrator};
use agora_persistence::SessionStore;
use agora_runner::AgentRunner;
use tokio::sync::watch;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// An agent that registers its session id before answering and refuses
/// an id it has already seen. Prompts mentioning "slow" take five seconds.
fn claiming_agent(seen: &Path) -> AgentDefinition {
    let create = format!(
        r#"if [ -e "{0}/$1" ]; then echo "Session ID $1 is already in use" >&2; exit 1; fi; touch "{0}/$1"; case "$2" in *slow*) sleep 5;; esac; echo "created $1""#,
        seen.display()
    );
    AgentDefinition {
        name: "Claimer".to_string(),
        role: "tester".to_string(),
        emoji: String::new(),
        create_command: argv(&["sh", "-c", &create, "_", SESSION_PLACEHOLDER]),
        resume_command: argv(&["sh", "-c", r#"echo "resumed $1""#, "_", SESSION_PLACEHOLDER]),
        needs_uuid: true,
        close_stdin: true,
        session_id: SessionIdSource::Generated,
        intent_keywords: Vec::new(),
    }
}

fn seen_ids(seen: &Path) -> usize {
    std::fs::read_dir(seen).map(|dir| dir.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_stop_during_first_round_leaves_agent_usable() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("seen");
    std::fs::create_dir_all(&seen).unwrap();

    let config = Arc::new(
        AgoraConfig::new()
            .with_agents(AgentRegistry::new(vec![claiming_agent(&seen)]).unwrap())
            .with_project_root(dir.path())
            .with_state_dir(dir.path().join("state"))
            .with_discussion(DiscussionConfig::new().with_max_rounds(3))
            .with_timeouts(
                TimeoutPolicy::new()
                    .with_idle(Duration::from_secs(10))
                    .with_total(Duration::from_secs(20)),
            ),
    );
    let store = Arc::new(SessionStore::new(dir.path().join("state")));
    let runner = Arc::new(AgentRunner::new(Arc::clone(&config), Arc::clone(&store)));
    let orchestrator = Arc::new(RoundtableOrchestrator::new(
        config,
        runner.clone(),
        store,
    ));
    let conv = ConversationId::from_string("stop-first-round");

    let handle = orchestrator
        .start(&conv, "a slow question", DiscussionOverrides::new())
        .unwrap();
    for _ in 0..100 {
        if seen_ids(&seen) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(seen_ids(&seen), 1);
    assert!(orchestrator.stop(&conv).await);

    let session = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, DiscussionStatus::Stopped);
    assert!(session.rounds.is_empty());

    // The next turn waits for the abandoned one to release the agent.
    let (_cancel_tx, cancel) = watch::channel(false);
    let next = runner
        .run_turn(&conv, "Claimer", "quick follow-up", cancel)
        .await
        .unwrap();
    assert!(next.created_session);
    assert_eq!(seen_ids(&seen), 2);
    let sessions = runner.sessions(&conv);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, SessionState::Active);
    assert_eq!(sessions[0].session_id, next.session_id);
}
