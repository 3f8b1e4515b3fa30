//! End-to-end turns against a scripted stand-in for the `claude` binary

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use claude_session::claude::ClaudeError;
use claude_session::turn::{Role, ToolCallStatus};
use claude_session::{
    CliLocator, Conversation, EntityStore, MemoryStore, TurnHandle, TurnOptions, TurnOutcome,
    TurnUpdate,
};
use tempfile::TempDir;

const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"s1","model":"claude-sonnet-4","cwd":"/tmp","tools":[]}"#;
const SUCCESS: &str = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":12,"num_turns":1,"result":"Hello world","stop_reason":"end_turn","session_id":"s1","total_cost_usd":0.001,"usage":{"input_tokens":9,"output_tokens":2}}"#;

fn text_delta(text: &str) -> String {
    format!(
        r#"{{"type":"stream_event","event":{{"type":"content_block_delta","index":0,"delta":{{"type":"text_delta","text":"{text}"}}}}}}"#
    )
}

/// Shell snippet printing `lines` verbatim on stdout
fn emit(lines: &[&str]) -> String {
    format!("cat <<'EOF'\n{}\nEOF", lines.join("\n"))
}

struct Harness {
    dir: TempDir,
    store: Arc<dyn EntityStore>,
    conversation: Conversation,
}

impl Harness {
    /// Conversation whose CLI is a shell script running `body`. The script
    /// records its argv in `args.txt` and its `CLAUDECODE` value in `env.txt`.
    fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("claude");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{args}'\nprintf '%s' \"${{CLAUDECODE:-unset}}\" > '{env}'\n{body}\n",
                args = dir.path().join("args.txt").display(),
                env = dir.path().join("env.txt").display(),
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        let conversation = Conversation::create(
            store.clone(),
            CliLocator::exact(&script),
            "Test",
            dir.path(),
        )
        .unwrap();
        Self {
            dir,
            store,
            conversation,
        }
    }

    fn args(&self) -> Vec<String> {
        std::fs::read_to_string(self.path("args.txt"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    async fn send(&self, prompt: &str) -> TurnHandle {
        match self.conversation.send(prompt, TurnOptions::default()).await {
            Ok(handle) => handle,
            Err(e) => panic!("send failed: {e}"),
        }
    }
}

async fn drain(mut handle: TurnHandle) -> (Vec<TurnUpdate>, TurnOutcome) {
    tokio::time::timeout(Duration::from_secs(20), async move {
        let mut updates = Vec::new();
        while let Some(update) = handle.next_update().await {
            updates.push(update);
        }
        (updates, handle.wait().await.unwrap())
    })
    .await
    .expect("turn should finish")
}

#[tokio::test]
async fn test_streamed_turn_is_saved() {
    let harness = Harness::new(&emit(&[
        INIT,
        &text_delta("Hello "),
        "this line is not json",
        &text_delta("world"),
        SUCCESS,
    ]));

    let (updates, outcome) = drain(harness.send("Say hello").await).await;

    assert!(outcome.is_success(), "unexpected outcome {outcome:?}");
    assert_eq!(outcome.session_id.as_deref(), Some("s1"));
    let message = outcome.message.unwrap();
    assert_eq!(message.content, "Hello world");
    assert_eq!(message.input_tokens, 9);
    assert_eq!(message.output_tokens, 2);
    assert_eq!(message.stop_reason.as_deref(), Some("end_turn"));

    assert_eq!(
        updates[0],
        TurnUpdate::SessionStarted {
            session_id: "s1".to_string(),
            model: "claude-sonnet-4".to_string()
        }
    );
    let streamed: String = updates
        .iter()
        .filter_map(|u| match u {
            TurnUpdate::TextDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello world");

    assert_eq!(harness.conversation.session_id().unwrap().as_deref(), Some("s1"));
    let messages = harness.conversation.messages().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message.role, Role::User);
    assert_eq!(messages[0].message.content, "Say hello");
    assert_eq!(messages[1].message.role, Role::Assistant);
    assert_eq!(Some(messages[1].id), outcome.message_id);

    assert_eq!(
        harness.args()[..5],
        ["-p", "Say hello", "--output-format", "stream-json", "--verbose"]
    );
    assert_eq!(std::fs::read_to_string(harness.path("env.txt")).unwrap(), "unset");
}

#[tokio::test]
async fn test_second_turn_resumes_session() {
    let harness = Harness::new(&emit(&[INIT, &text_delta("ok"), SUCCESS]));

    drain(harness.send("first").await).await;
    assert!(!harness.args().contains(&"--resume".to_string()));

    drain(harness.send("second").await).await;
    let args = harness.args();
    let resume = args.iter().position(|a| a == "--resume").unwrap();
    assert_eq!(args[resume + 1], "s1");
}

#[tokio::test]
async fn test_continue_skips_resume() {
    let harness = Harness::new(&emit(&[INIT, SUCCESS]));
    drain(harness.send("first").await).await;

    let options = TurnOptions {
        continue_session: true,
        ..TurnOptions::default()
    };
    let handle = match harness.conversation.send("again", options).await {
        Ok(handle) => handle,
        Err(e) => panic!("send failed: {e}"),
    };
    drain(handle).await;

    let args = harness.args();
    assert!(args.contains(&"--continue".to_string()));
    assert!(!args.contains(&"--resume".to_string()));
}

#[tokio::test]
async fn test_tool_call_sequence() {
    let harness = Harness::new(&emit(&[
        INIT,
        r#"{"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"Read","input":{}}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"a.txt\"}"}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#,
        r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":10,"num_turns":1,"stop_reason":"tool_use","session_id":"s1","total_cost_usd":0.0}"#,
    ]));

    let (_, outcome) = drain(harness.send("read it").await).await;
    let message = outcome.message.unwrap();
    assert_eq!(message.content, "");
    assert_eq!(message.stop_reason.as_deref(), Some("tool_use"));
    assert_eq!(message.tool_calls.len(), 1);
    assert_eq!(message.tool_calls[0].tool_name, "Read");
    assert_eq!(message.tool_calls[0].input_json, r#"{"path":"a.txt"}"#);
    assert_eq!(message.tool_calls[0].status, ToolCallStatus::Completed);
}

#[tokio::test]
async fn test_process_error_after_partial_output() {
    let harness = Harness::new(&format!(
        "{}\necho 'API overloaded' >&2\nexit 3",
        emit(&[INIT, &text_delta("partial")])
    ));

    let (updates, outcome) = drain(harness.send("hi").await).await;
    assert!(updates.contains(&TurnUpdate::TextDelta("partial".to_string())));

    // Partial text is finalized and saved before the error is reported
    assert_eq!(outcome.message.as_ref().unwrap().content, "partial");
    assert!(outcome.message_id.is_some());
    match outcome.error {
        Some(ClaudeError::ProcessError { exit_code, stderr }) => {
            assert_eq!(exit_code, 3);
            assert_eq!(stderr, "API overloaded");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(harness.conversation.messages().unwrap().len(), 2);
}

#[tokio::test]
async fn test_nonzero_exit_without_stderr_is_clean() {
    let harness = Harness::new(&format!("{}\nexit 1", emit(&[INIT, &text_delta("fine")])));
    let (_, outcome) = drain(harness.send("hi").await).await;
    assert!(outcome.error.is_none());
    assert_eq!(outcome.message.unwrap().content, "fine");
}

#[tokio::test]
async fn test_not_logged_in() {
    let harness = Harness::new("echo 'Invalid API key · Please run /login' >&2\nexit 1");
    let (_, outcome) = drain(harness.send("hi").await).await;
    assert!(matches!(outcome.error, Some(ClaudeError::NotLoggedIn)));
    assert!(outcome.message.is_none());
}

#[tokio::test]
async fn test_error_result_is_turn_failed() {
    let harness = Harness::new(&emit(&[
        INIT,
        r#"{"type":"result","subtype":"error_max_turns","is_error":true,"duration_ms":1,"num_turns":3,"total_cost_usd":0.0,"errors":["Reached maximum number of turns (3)"]}"#,
    ]));
    let (_, outcome) = drain(harness.send("hi").await).await;
    assert!(matches!(
        outcome.error,
        Some(ClaudeError::TurnFailed { ref subtype, .. }) if subtype == "error_max_turns"
    ));
    // Session continuity survives a failed turn
    assert_eq!(harness.conversation.session_id().unwrap().as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_cancel_keeps_partial_text() {
    let harness = Harness::new(&format!(
        "{}\nexec sleep 30",
        emit(&[INIT, &text_delta("Hello wor")])
    ));

    let mut handle = harness.send("long task").await;
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(update) = handle.next_update().await {
            if matches!(update, TurnUpdate::TextDelta(_)) {
                break;
            }
        }
    })
    .await
    .expect("text should stream before cancelling");

    handle.cancel();
    handle.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("cancelled turn should end promptly")
        .unwrap();

    assert!(outcome.cancelled);
    assert!(outcome.error.is_none());
    assert!(outcome.result.is_none());
    let message = outcome.message.unwrap();
    assert_eq!(message.content, "Hello wor");
    assert_eq!(message.stop_reason, None);
    assert_eq!(harness.conversation.messages().unwrap().len(), 2);
}

#[tokio::test]
async fn test_result_ends_turn_while_cli_lingers() {
    let harness = Harness::new(&format!(
        "{}\nexec sleep 30",
        emit(&[INIT, &text_delta("Hello world"), SUCCESS])
    ));

    let outcome = tokio::time::timeout(Duration::from_secs(10), harness.send("hi").await.wait())
        .await
        .expect("turn should end after its result")
        .unwrap();

    assert!(outcome.is_success(), "unexpected outcome {outcome:?}");
    assert!(!outcome.cancelled);
    assert_eq!(outcome.result.as_ref().map(|r| r.subtype.as_str()), Some("success"));
    assert_eq!(outcome.message.unwrap().content, "Hello world");

    let messages = harness.conversation.messages().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].message.role, Role::Assistant);
    assert_eq!(Some(messages[1].id), outcome.message_id);
}

#[tokio::test]
async fn test_missing_executable_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
    let conversation = Conversation::create(
        store.clone(),
        CliLocator::exact(dir.path().join("no-such-claude")),
        "Test",
        dir.path(),
    )
    .unwrap();

    match conversation.send("hi", TurnOptions::default()).await {
        Err(ClaudeError::ExecutableNotFound) => {}
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("send should fail"),
    }
    assert!(store.messages(conversation.id()).unwrap().is_empty());
}

#[tokio::test]
async fn test_fork_starts_fresh_session() {
    let harness = Harness::new(&emit(&[INIT, &text_delta("answer"), SUCCESS]));
    drain(harness.send("question").await).await;

    let fork = harness.conversation.fork().unwrap();
    assert_eq!(fork.session_id().unwrap(), None);
    assert_eq!(fork.record().unwrap().title, "Test (fork)");
    assert_eq!(fork.messages().unwrap().len(), 2);

    drain(fork.send("follow up", TurnOptions::default()).await.unwrap()).await;
    assert!(!harness.args().contains(&"--resume".to_string()));
    assert_eq!(harness.store.messages(harness.conversation.id()).unwrap().len(), 2);
}
