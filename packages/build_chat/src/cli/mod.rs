pub mod attach;
pub mod render;

use anyhow::{Context, Result};

use session_sync::{ApiError, ChatApi, ConversationId, NewConversation, SessionSyncConfig};

use crate::NewArgs;
use render::role_label;

pub async fn show_command(config: &SessionSyncConfig, chat_id: &str, json: bool) -> Result<()> {
    let api = ChatApi::from_config(config);
    let record = match api.fetch_conversation(&ConversationId::from(chat_id)).await {
        Ok(record) => record,
        Err(e) if e.is_not_found() => anyhow::bail!("Conversation {} not found", chat_id),
        Err(ApiError::Unavailable) => {
            anyhow::bail!("Server at {} is unavailable", config.api_url)
        }
        Err(e) => return Err(e).context("Failed to fetch conversation"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record.messages)?);
        return Ok(());
    }

    if let Some(name) = &record.name {
        println!("# {}", name);
    }
    if let Some(project) = &record.project {
        println!("project {}", project.id);
    }
    for message in &record.messages {
        println!("{}> {}", role_label(message.role), message.content);
    }
    println!("\n{} message(s)", record.messages.len());
    Ok(())
}

pub async fn new_command(config: &SessionSyncConfig, args: NewArgs) -> Result<()> {
    let api = ChatApi::from_config(config);
    let request = NewConversation {
        name: args.name,
        stack_id: args.stack_id,
        project_id: args.project_id,
        ..NewConversation::new(args.team_id, args.prompt)
    };
    let record = api
        .create_conversation(&request)
        .await
        .context("Failed to create conversation")?;

    println!("{}", record.id);
    Ok(())
}
