use anyhow::{Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use session_sync::{
    ApiError, ChatApi, ChatMessage, ConversationId, Session, SessionError, SessionSyncConfig,
    SessionUpdate, WsDialer,
};

use super::render::{EnvironmentReport, TranscriptRenderer};

/// One line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    Reconnect,
    Status,
    Quit,
    Unknown(String),
    Blank,
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Input::Blank,
            "/reconnect" => Input::Reconnect,
            "/status" => Input::Status,
            "/quit" | "/exit" => Input::Quit,
            cmd if cmd.starts_with('/') && !cmd.starts_with("//") => {
                Input::Unknown(cmd.to_string())
            }
            // "//" escapes a message that starts with a slash
            text => Input::Message(text.strip_prefix('/').unwrap_or(text).to_string()),
        }
    }
}

/// Follow a conversation live. stdout gets the transcript, stderr the
/// environment notices.
pub async fn attach_command(config: &SessionSyncConfig, chat_id: &str) -> Result<()> {
    let conversation = ConversationId::from(chat_id);

    let history = match ChatApi::from_config(config)
        .fetch_conversation(&conversation)
        .await
    {
        Ok(record) => record.messages,
        Err(e) if e.is_not_found() => anyhow::bail!("Conversation {} not found", chat_id),
        Err(ApiError::Unavailable) => {
            warn!(api_url = %config.api_url, "history unavailable, starting with an empty log");
            Vec::new()
        }
        Err(e) => return Err(e).context("Failed to fetch conversation"),
    };

    let mut session = Session::new(
        WsDialer::from_config(config),
        Some(conversation),
        config.connection.clone(),
    );
    session.seed_history(history);

    let mut renderer = TranscriptRenderer::new();
    let mut report = EnvironmentReport::default();
    write_out(&renderer.history(session.messages()));

    session.open().await;
    announce(&mut report, &session);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else { break };
                match session.handle_event(event).await {
                    SessionUpdate::Log(change) => {
                        write_out(&renderer.apply(session.messages(), change));
                    }
                    SessionUpdate::Closed { reopened: true, code, .. } => {
                        debug!(code, "connection reopened");
                    }
                    SessionUpdate::Closed { code, reason, .. } => {
                        write_out(&renderer.finish());
                        eprintln!(
                            "[{}; /reconnect to retry]",
                            SessionError::TransportClosed { code, reason }
                        );
                        if !stdin_open {
                            break;
                        }
                    }
                    SessionUpdate::Connected
                    | SessionUpdate::Environment
                    | SessionUpdate::Ignored => {}
                }
            }
            line = stdin.next_line(), if stdin_open => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    debug!("stdin closed, following until the connection ends");
                    stdin_open = false;
                    continue;
                };
                match Input::parse(&line) {
                    Input::Quit => break,
                    Input::Reconnect => session.reconnect().await,
                    Input::Status => print_status(&session),
                    Input::Unknown(cmd) => eprintln!("[unknown command {}]", cmd),
                    Input::Blank => {}
                    Input::Message(text) => {
                        if let Err(e) = session.send(ChatMessage::user(text)).await {
                            eprintln!("[{}]", e);
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        announce(&mut report, &session);
    }

    write_out(&renderer.finish());
    session.disconnect().await;
    Ok(())
}

fn announce(report: &mut EnvironmentReport, session: &Session<WsDialer>) {
    for notice in report.changes(session.status(), session.preview(), session.follow_ups()) {
        eprintln!("[{}]", notice);
    }
}

fn print_status(session: &Session<WsDialer>) {
    let trees = session.file_trees();
    eprintln!("[status: {}]", session.status());
    eprintln!(
        "[preview: {} (revision {})]",
        session
            .preview()
            .url
            .as_deref()
            .map(|url| format!("{}{}", url, session.preview().path))
            .unwrap_or_else(|| "unavailable".to_string()),
        session.preview().revision
    );
    eprintln!(
        "[files: {} backend, {} frontend]",
        trees.backend.files().count(),
        trees.frontend.files().count()
    );
    if let Some(log) = session.git_log() {
        for line in log.lines().take(5) {
            eprintln!("[git: {}]", line);
        }
    }
}

fn write_out(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("  /reconnect "), Input::Reconnect);
        assert_eq!(Input::parse("/status"), Input::Status);
        assert_eq!(Input::parse("   "), Input::Blank);
        assert_eq!(Input::parse("/deploy"), Input::Unknown("/deploy".into()));
    }

    #[test]
    fn test_parse_messages() {
        assert_eq!(
            Input::parse("add a dark mode toggle"),
            Input::Message("add a dark mode toggle".into())
        );
        assert_eq!(
            Input::parse("//etc/hosts is wrong"),
            Input::Message("/etc/hosts is wrong".into())
        );
    }
}
