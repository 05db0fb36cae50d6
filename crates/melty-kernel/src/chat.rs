//! The chat turn pipeline.
//!
//! One `chat_message` call is one logical turn: append the human joule,
//! stream the bot reply fragment by fragment, commit any changeset the
//! reply carries, finalize. Every intermediate state goes out through the
//! event sink as a full snapshot before the call returns, so an observer
//! sees a monotonically growing conversation and never a regression.
//!
//! Failures are reported twice on purpose: an Error joule lands in the
//! transcript (and is pushed) and the call itself returns the failure. The
//! status line is cleared on both paths.

use melty_types::changeset::{Changeset, FileEdit};
use melty_types::ids::TaskId;
use melty_types::task::{TaskMode, TaskPhase, TaskSnapshot};

use crate::engine::Engine;
use crate::llm::{CompletionRequest, StreamEvent};
use crate::tasks::{TaskError, TaskHandle};

impl Engine {
    /// Run a full chat turn against an active task.
    ///
    /// Turns on the same task are serialized by the task's gate; turns on
    /// different tasks run concurrently.
    pub async fn chat_message(
        &self,
        task_id: TaskId,
        text: &str,
    ) -> Result<TaskSnapshot, TaskError> {
        let handle = self.registry.get(task_id)?;
        let _turn = handle.begin_turn().await;
        if handle.phase() != TaskPhase::Active {
            return Err(TaskError::NotActive(task_id));
        }

        match self.run_turn(&handle, text).await {
            Ok(snapshot) => {
                self.sink.status_changed(None).await;
                Ok(snapshot)
            }
            Err(err) => {
                tracing::warn!(task = %task_id.short(), error = %err, "chat turn failed");
                let snapshot = handle.mutate(|state| state.conversation.add_error(err.to_string()));
                self.sink.task_updated(snapshot).await;
                self.sink.status_changed(None).await;
                if let Err(persist_err) = self.persist(&handle).await {
                    tracing::error!(error = %persist_err, "failed to persist error turn");
                }
                Err(err)
            }
        }
    }

    async fn run_turn(&self, handle: &TaskHandle, text: &str) -> Result<TaskSnapshot, TaskError> {
        let snapshot = handle.mutate(|state| state.conversation.add_human(text));
        self.sink.task_updated(snapshot.clone()).await;
        self.sink
            .status_changed(Some("Generating".to_string()))
            .await;

        let mode = snapshot.mode;

        // Coder mode: the human's stray edits get their own commit first,
        // so the bot commit contains only the bot's changes.
        if mode == TaskMode::Coder {
            if let Some(git) = &self.git {
                let committed = git.commit_local_changes("Human changes".to_string()).await?;
                if committed > 0 {
                    tracing::debug!(files = committed, "committed stray local changes");
                }
            }
        }

        let request = CompletionRequest::from_conversation(&snapshot.conversation)
            .with_system(system_prompt(mode, &snapshot.melty_files));
        let mut events = self.provider.stream(request).await;
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Delta(fragment) => {
                    let snapshot =
                        handle.mutate(|state| state.conversation.extend_bot(&fragment));
                    self.sink.task_updated(snapshot).await;
                }
                StreamEvent::Done => break,
                StreamEvent::Failed(message) => {
                    return Err(TaskError::Provider(crate::llm::LlmError::ApiError(message)));
                }
            }
        }

        let reply = handle
            .snapshot()
            .conversation
            .last()
            .filter(|joule| joule.is_partial_bot())
            .map(|joule| joule.text.clone())
            .unwrap_or_default();

        let (changeset, commit) = if mode == TaskMode::Coder {
            let extracted = extract_changeset(&reply);
            if extracted.is_empty() {
                (None, None)
            } else {
                self.sink
                    .status_changed(Some("Committing".to_string()))
                    .await;
                let git = self.git()?;
                let (commit, annotated) = git
                    .commit_changeset(extracted, commit_message(text))
                    .await?;
                (Some(annotated), commit)
            }
        } else {
            (None, None)
        };

        let final_snapshot =
            handle.mutate(|state| state.conversation.complete_bot(changeset, commit));
        self.sink.task_updated(final_snapshot.clone()).await;
        self.push_previews().await;
        self.persist(handle).await?;
        Ok(final_snapshot)
    }
}

/// Commit message for a bot changeset: the first line of the human request.
fn commit_message(human_text: &str) -> String {
    let first_line = human_text.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return "Assistant changes".to_string();
    }
    let mut message: String = first_line.chars().take(72).collect();
    if first_line.chars().count() > 72 {
        message.push('…');
    }
    message
}

/// Pull file edits out of a bot reply.
///
/// An edit is a fenced block whose info string is a path (contains `/` or
/// `.`, no whitespace): the block body becomes the file's new contents, an
/// empty body deletes the file. Ordinary language fences (```rust) and
/// unterminated blocks are ignored, so a malformed reply degrades to plain
/// text.
fn extract_changeset(reply: &str) -> Changeset {
    let mut changeset = Changeset::new();
    let mut lines = reply.lines();
    while let Some(line) = lines.next() {
        let Some(info) = line.strip_prefix("```") else {
            continue;
        };
        let info = info.trim();
        if !looks_like_path(info) {
            // Skip the whole non-edit block so its body can't open one.
            for inner in lines.by_ref() {
                if inner.trim_end() == "```" {
                    break;
                }
            }
            continue;
        }

        let mut body = String::new();
        let mut closed = false;
        for inner in lines.by_ref() {
            if inner.trim_end() == "```" {
                closed = true;
                break;
            }
            body.push_str(inner);
            body.push('\n');
        }
        if closed {
            changeset.insert(info, FileEdit::new("", body));
        }
    }
    changeset
}

fn looks_like_path(info: &str) -> bool {
    !info.is_empty()
        && !info.contains(char::is_whitespace)
        && (info.contains('/') || info.contains('.'))
}

fn system_prompt(mode: TaskMode, melty_files: &[String]) -> String {
    let mut prompt = String::from(
        "You are Melty, a coding assistant working inside the user's repository.",
    );
    if !melty_files.is_empty() {
        prompt.push_str("\nFocus on these files: ");
        prompt.push_str(&melty_files.join(", "));
        prompt.push('.');
    }
    if mode == TaskMode::Coder {
        prompt.push_str(
            "\nTo change a file, reply with a fenced block whose info string is \
             the file path and whose body is the complete new contents. \
             An empty body deletes the file.",
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use git2::Repository;

    use crate::events::recording::RecordingSink;
    use crate::git::Git;
    use crate::llm::ScriptedProvider;
    use crate::store::TaskStore;
    use crate::workspace::Workspace;
    use melty_types::conversation::JouleAuthor;

    struct Fixture {
        engine: Engine,
        task: TaskId,
        sink: Arc<RecordingSink>,
        git: Option<Git>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(mode: TaskMode, with_repo: bool, provider: ScriptedProvider) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let git = if with_repo {
            let repo = Repository::init(dir.path()).unwrap();
            {
                let mut config = repo.config().unwrap();
                config.set_str("user.name", "Test User").unwrap();
                config.set_str("user.email", "test@example.com").unwrap();
            }
            drop(repo);
            std::fs::write(dir.path().join("README.md"), "seed\n").unwrap();
            let git = Git::open(dir.path(), "origin").unwrap();
            git.commit_local_changes("init".to_string()).await.unwrap();
            Some(git)
        } else {
            None
        };

        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(
            TaskStore::in_memory().unwrap(),
            Workspace::new(dir.path()),
            git.clone(),
            Arc::new(provider),
            sink.clone(),
        )
        .unwrap();
        let task = engine.create_task("turn", mode, vec![]).await.unwrap();
        engine.activate_task(task).await.unwrap();

        Fixture {
            engine,
            task,
            sink,
            git,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_streaming_turn_grows_monotonically() {
        let provider = ScriptedProvider::new().with_chunks(["Thi", "nk", "ing done."]);
        let f = fixture(TaskMode::Vanilla, false, provider).await;

        let result = f.engine.chat_message(f.task, "explain this").await.unwrap();
        assert_eq!(result.conversation.len(), 2);
        let bot = result.conversation.last().unwrap();
        assert_eq!(bot.author, JouleAuthor::Bot);
        assert!(bot.complete);
        assert_eq!(bot.text, "Thinking done.");

        // Pushed snapshots never regress, and the last push is the result.
        let snapshots = f.sink.snapshots();
        assert!(snapshots.len() >= 4);
        let mut prev_len = 0;
        let mut prev_text_len = 0;
        for snap in &snapshots {
            let len = snap.conversation.len();
            let text_len = snap
                .conversation
                .last()
                .map(|j| j.text.len())
                .unwrap_or(0);
            assert!(len >= prev_len);
            if len == prev_len {
                assert!(text_len >= prev_text_len);
            }
            prev_len = len;
            prev_text_len = text_len;
        }
        assert_eq!(snapshots.last().unwrap(), &result);

        // Status raised then cleared unconditionally.
        assert_eq!(
            f.sink.statuses(),
            vec![Some("Generating".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_chat_requires_active_task() {
        let provider = ScriptedProvider::new().with_reply("unused");
        let f = fixture(TaskMode::Vanilla, false, provider).await;
        f.engine.deactivate_task(f.task).await.unwrap();

        let err = f.engine.chat_message(f.task, "hello?").await.unwrap_err();
        assert!(matches!(err, TaskError::NotActive(_)));
    }

    #[tokio::test]
    async fn test_chat_unknown_task() {
        let provider = ScriptedProvider::new();
        let f = fixture(TaskMode::Vanilla, false, provider).await;
        let err = f
            .engine
            .chat_message(TaskId::new(), "anyone?")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn test_failure_reported_in_transcript_and_result() {
        let provider = ScriptedProvider::new().with_failure("model on fire");
        let f = fixture(TaskMode::Vanilla, false, provider).await;

        let err = f.engine.chat_message(f.task, "do it").await.unwrap_err();
        assert!(err.to_string().contains("model on fire"));

        let transcript = f.engine.get_active_task().unwrap().conversation;
        let last = transcript.last().unwrap();
        assert_eq!(last.author, JouleAuthor::Error);
        assert!(last.text.contains("model on fire"));

        // The error state was pushed, and the status still cleared.
        let pushed_last = f.sink.snapshots().last().unwrap().clone();
        assert_eq!(pushed_last.conversation.last().unwrap().author, JouleAuthor::Error);
        assert_eq!(f.sink.statuses().last().unwrap(), &None);
    }

    #[tokio::test]
    async fn test_coder_turn_commits_changeset() {
        let reply = "Adding the file.\n```demo.txt\nhello from the bot\n```\nDone.";
        let provider = ScriptedProvider::new().with_reply(reply);
        let f = fixture(TaskMode::Coder, true, provider).await;
        let git = f.git.clone().unwrap();

        let result = f
            .engine
            .chat_message(f.task, "create demo.txt")
            .await
            .unwrap();
        let bot = result.conversation.last().unwrap();
        let commit = bot.commit.clone().expect("turn should carry a commit");
        let changeset = bot.changeset.clone().expect("turn should carry a changeset");
        assert_eq!(
            changeset.files["demo.txt"].updated,
            "hello from the bot\n"
        );
        assert_eq!(changeset.files["demo.txt"].original, "");

        assert_eq!(git.latest_commit().await.unwrap(), Some(commit));
        assert!(git.repo_is_clean().await.unwrap());
        assert_eq!(
            std::fs::read_to_string(f._dir.path().join("demo.txt")).unwrap(),
            "hello from the bot\n"
        );

        assert_eq!(
            f.sink.statuses(),
            vec![
                Some("Generating".to_string()),
                Some("Committing".to_string()),
                None
            ]
        );
    }

    #[tokio::test]
    async fn test_coder_commits_stray_human_changes_first() {
        let provider = ScriptedProvider::new().with_reply("No edits needed.");
        let f = fixture(TaskMode::Coder, true, provider).await;
        let git = f.git.clone().unwrap();
        let before = git.latest_commit().await.unwrap().unwrap();

        std::fs::write(f._dir.path().join("notes.txt"), "manual edit").unwrap();
        let result = f.engine.chat_message(f.task, "thoughts?").await.unwrap();

        // The stray edit was committed, the bot turn itself produced none.
        assert!(git.repo_is_clean().await.unwrap());
        assert_ne!(git.latest_commit().await.unwrap().unwrap(), before);
        assert_eq!(result.conversation.last().unwrap().commit, None);
    }

    #[tokio::test]
    async fn test_coder_changeset_without_repo_is_well_known_failure() {
        let reply = "```demo.txt\nwon't land\n```";
        let provider = ScriptedProvider::new().with_reply(reply);
        let f = fixture(TaskMode::Coder, false, provider).await;

        let err = f.engine.chat_message(f.task, "write it").await.unwrap_err();
        assert_eq!(err.to_string(), "no repository found");

        let transcript = f.engine.get_active_task().unwrap().conversation;
        assert_eq!(
            transcript.last().unwrap().text,
            "no repository found"
        );
    }

    #[tokio::test]
    async fn test_turns_on_same_task_serialize() {
        let provider = ScriptedProvider::new().with_reply("one").with_reply("two");
        let f = fixture(TaskMode::Vanilla, false, provider).await;
        let engine = Arc::new(f.engine);

        let a = {
            let engine = Arc::clone(&engine);
            let task = f.task;
            tokio::spawn(async move { engine.chat_message(task, "first").await })
        };
        let b = {
            let engine = Arc::clone(&engine);
            let task = f.task;
            tokio::spawn(async move { engine.chat_message(task, "second").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Four complete joules, strictly human/bot alternating: no interleaving.
        let transcript = engine.get_active_task().unwrap().conversation;
        assert_eq!(transcript.len(), 4);
        let authors: Vec<JouleAuthor> = transcript.joules.iter().map(|j| j.author).collect();
        assert_eq!(
            authors,
            vec![
                JouleAuthor::Human,
                JouleAuthor::Bot,
                JouleAuthor::Human,
                JouleAuthor::Bot
            ]
        );
        assert!(transcript.joules.iter().all(|j| j.complete));
    }

    #[test]
    fn test_commit_message_truncates() {
        assert_eq!(commit_message("fix the parser"), "fix the parser");
        assert_eq!(commit_message("multi\nline"), "multi");
        assert_eq!(commit_message("   "), "Assistant changes");
        let long = "x".repeat(100);
        let message = commit_message(&long);
        assert_eq!(message.chars().count(), 73);
        assert!(message.ends_with('…'));
    }

    #[test]
    fn test_extract_changeset_paths_only() {
        let reply = "Here:\n```rust\nlet ignored = true;\n```\n```src/a.rs\nfn a() {}\n```";
        let cs = extract_changeset(reply);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.files["src/a.rs"].updated, "fn a() {}\n");
    }

    #[test]
    fn test_extract_changeset_deletion_and_multiple() {
        let reply = "```old.txt\n```\n```new.md\nfresh\n```";
        let cs = extract_changeset(reply);
        assert_eq!(cs.len(), 2);
        assert!(cs.files["old.txt"].is_deletion());
        assert_eq!(cs.files["new.md"].updated, "fresh\n");
    }

    #[test]
    fn test_extract_changeset_ignores_unterminated() {
        let reply = "```half.rs\nfn never_closed() {}";
        assert!(extract_changeset(reply).is_empty());
    }

    #[test]
    fn test_extract_changeset_plain_text() {
        assert!(extract_changeset("no fences here, just prose.").is_empty());
    }
}
