//! Line-oriented terminal front end.
//!
//! Plain text is sent as a chat message; lines starting with `/` are
//! commands. Output is rendered from client snapshots, printing only what
//! changed since the last render.

use std::io::Write;
use std::path::Path;

use analyst_client::{
    AttachmentSource, ClientHandle, ClientState, LayoutMode, MessageStatus, Preferences,
};
use analyst_protocol::{
    ArtifactSyncStatus, ArtifactType, MessageRole, SystemStatus, UserStoryData, WorkbookData,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Help,
    Quit,
    New,
    Artifacts,
    Open(String),
    Close(Option<String>),
    Show(Option<String>),
    Edit { id: String, path: String },
    Story(Option<String>),
    Item { category: String, text: String },
    Publish(Option<String>),
    Attach(String),
    Detach(Option<String>),
    Layout(LayoutMode),
    Sidebar,
    Status,
}

pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let optional = || (!args.is_empty()).then(|| args.to_string());

    let command = match name {
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "new" => Command::New,
        "artifacts" | "ls" => Command::Artifacts,
        "open" if !args.is_empty() => Command::Open(args.to_string()),
        "close" => Command::Close(optional()),
        "show" => Command::Show(optional()),
        "edit" => match args.split_once(char::is_whitespace) {
            Some((id, path)) => Command::Edit {
                id: id.to_string(),
                path: path.trim().to_string(),
            },
            None => return Err("usage: /edit <artifact-id> <file>".into()),
        },
        "story" => Command::Story(optional()),
        "item" => match args.split_once(char::is_whitespace) {
            Some((category, text)) => Command::Item {
                category: category.to_string(),
                text: text.trim().to_string(),
            },
            None => return Err("usage: /item <category-id> <text>".into()),
        },
        "publish" => Command::Publish(optional()),
        "attach" if !args.is_empty() => Command::Attach(args.to_string()),
        "detach" => Command::Detach(optional()),
        "layout" => Command::Layout(args.parse()?),
        "sidebar" => Command::Sidebar,
        "status" => Command::Status,
        "open" => return Err("usage: /open <artifact-id>".into()),
        "attach" => return Err("usage: /attach <file>".into()),
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(Some(command))
}

enum Flow {
    Continue,
    Quit,
}

pub async fn run(client: ClientHandle, mut preferences: Preferences) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut revisions = client.subscribe();
    let mut view = View::default();

    println!();
    println!("  Analyst client. Type a message, or /help for commands.");
    println!();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if let Flow::Quit = execute(&client, &mut preferences, command).await? {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(usage) => println!("  {usage}"),
                }
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                view.render(&client.snapshot());
            }
        }
    }
    Ok(())
}

async fn execute(
    client: &ClientHandle,
    preferences: &mut Preferences,
    command: Command,
) -> anyhow::Result<Flow> {
    debug!(
        component = "terminal",
        event = "terminal.command",
        command = ?command,
        "Executing command"
    );
    match command {
        Command::Send(text) => client.send_message(text)?,
        Command::Help => print_help(),
        Command::Quit => return Ok(Flow::Quit),
        Command::New => {
            client.reset_conversation().await?;
            println!("  Started a new conversation.");
        }
        Command::Artifacts => print_artifacts(&client.snapshot()),
        Command::Open(id) => {
            if !client.select_artifact(&id).await? {
                println!("  No open artifact {id}");
            }
        }
        Command::Close(id) => match id.or_else(|| active_id(client)) {
            Some(id) => client.close_artifact(id)?,
            None => println!("  No artifact to close"),
        },
        Command::Show(id) => {
            let snapshot = client.snapshot();
            let target = match id.as_deref() {
                Some(id) => snapshot.artifacts.get(id),
                None => snapshot.artifacts.active(),
            };
            match target {
                Some(artifact) => {
                    println!("  == {} ({}) ==", artifact.title(), artifact.artifact_type().as_str());
                    println!("{}", artifact.content());
                }
                None => println!("  Nothing to show"),
            }
        }
        Command::Edit { id, path } => {
            let content = tokio::fs::read_to_string(&path).await?;
            client.edit_artifact(id, content)?;
        }
        Command::Story(id) => match id.or_else(|| active_id(client)) {
            Some(id) => {
                let result = client
                    .edit_document::<UserStoryData, _>(&id, |doc| {
                        doc.add_story();
                        Ok(())
                    })
                    .await;
                if let Err(e) = result {
                    println!("  Could not add story: {e}");
                }
            }
            None => println!("  No stories artifact open"),
        },
        Command::Item { category, text } => match active_id(client) {
            Some(id) => {
                let result = client
                    .edit_document::<WorkbookData, _>(&id, move |doc| {
                        doc.add_item(&category, &text).map(|_| ())
                    })
                    .await;
                if let Err(e) = result {
                    println!("  Could not add item: {e}");
                }
            }
            None => println!("  No workbook open"),
        },
        Command::Publish(target) => {
            client.publish(target.unwrap_or_else(|| "confluence".to_string()))?;
        }
        Command::Attach(path) => {
            let data = tokio::fs::read(&path).await?;
            let name = Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            let mime_type = guess_mime(&path).to_string();
            let id = client
                .add_attachment(AttachmentSource {
                    name: name.clone(),
                    mime_type,
                    data,
                })
                .await?;
            println!("  Attached {name} ({id})");
        }
        Command::Detach(Some(id)) => client.remove_attachment(id)?,
        Command::Detach(None) => client.clear_attachments()?,
        Command::Layout(mode) => {
            preferences.set_layout_mode(mode)?;
            println!("  Layout: {mode:?}");
        }
        Command::Sidebar => {
            let open = preferences.toggle_sidebar()?;
            println!("  Sidebar {}", if open { "shown" } else { "hidden" });
        }
        Command::Status => print_status(client, preferences),
    }
    Ok(Flow::Continue)
}

fn active_id(client: &ClientHandle) -> Option<String> {
    client.snapshot().artifacts.active_id().map(str::to_string)
}

fn guess_mime(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "md" => "text/markdown",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

fn print_help() {
    println!();
    println!("  /new                      start a new conversation");
    println!("  /artifacts                list open artifacts");
    println!("  /open <id>                switch to an artifact");
    println!("  /close [id]               close an artifact (default: active)");
    println!("  /show [id]                print artifact content");
    println!("  /edit <id> <file>         replace content with a file and save");
    println!("  /story [id]               add a user story");
    println!("  /item <category> <text>   add an item to the active workbook");
    println!("  /publish [target]         publish the project (default: confluence)");
    println!("  /attach <file>            attach a file to the next message");
    println!("  /detach [id]              drop one attachment, or all");
    println!("  /layout chat|split|artifact");
    println!("  /sidebar                  toggle the sidebar");
    println!("  /status                   connection and project status");
    println!("  /quit");
    println!();
}

fn print_artifacts(state: &ClientState) {
    if state.artifacts.artifacts().is_empty() {
        println!("  No open artifacts");
        return;
    }
    let active = state.artifacts.active_id();
    for artifact in state.artifacts.artifacts() {
        let marker = if Some(artifact.id()) == active { "*" } else { " " };
        println!(
            "  {marker} {:<12} {:<9} {:<8} {}",
            artifact.id(),
            artifact.artifact_type().as_str(),
            sync_label(artifact.sync_status),
            artifact.title()
        );
    }
}

fn print_status(client: &ClientHandle, preferences: &Preferences) {
    let snapshot = client.snapshot();
    let prefs = preferences.get();
    println!();
    println!("  Connection: {:?}", client.connection_state());
    println!("  Assistant: {}", status_label(snapshot.chat.status()));
    println!(
        "  Layout: {:?}, sidebar {}",
        prefs.layout_mode,
        if prefs.sidebar_open { "open" } else { "closed" }
    );
    println!("  Open artifacts: {}", snapshot.artifacts.artifacts().len());
    println!(
        "  Pending attachments: {}",
        snapshot.chat.pending_attachments().len()
    );
    if let Some(project) = snapshot.project.snapshot() {
        if let Some(scope) = &project.project_scope {
            println!("  Scope: {scope}");
        }
        println!(
            "  Actors: {}, steps: {}, entities: {}",
            project.actors.len(),
            project.process_steps.len(),
            project.data_entities.len()
        );
    }
    println!("  Safety score: {}", snapshot.project.safety_score());
    for issue in snapshot.project.issues() {
        println!("    - [{}] {}", issue.severity, issue.message);
    }
    println!();
}

fn sync_label(status: ArtifactSyncStatus) -> &'static str {
    match status {
        ArtifactSyncStatus::Synced => "synced",
        ArtifactSyncStatus::Saving => "saving",
        ArtifactSyncStatus::Processing => "processing",
        ArtifactSyncStatus::Error => "error",
    }
}

fn status_label(status: SystemStatus) -> &'static str {
    match status {
        SystemStatus::Idle => "idle",
        SystemStatus::Thinking => "thinking",
        SystemStatus::Working => "working",
        SystemStatus::Success => "success",
        SystemStatus::Error => "error",
    }
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "you",
        MessageRole::Assistant => "analyst",
        MessageRole::System => "system",
    }
}

/// What has already been printed
#[derive(Default)]
struct View {
    /// Id of each printed message
    messages: Vec<String>,
    /// Bytes of the last message already printed
    last_printed: usize,
    last_open: bool,
    status: Option<(SystemStatus, String)>,
    artifacts: Vec<(String, ArtifactSyncStatus)>,
    active: Option<String>,
    suggestions: Vec<String>,
    safety_score: Option<u32>,
}

impl View {
    fn render(&mut self, state: &ClientState) {
        self.render_messages(state);
        self.render_status(state);
        self.render_artifacts(state);
        self.render_extras(state);
    }

    fn render_messages(&mut self, state: &ClientState) {
        let messages = state.chat.messages();
        let same_prefix = self.messages.len() <= messages.len()
            && self
                .messages
                .iter()
                .zip(messages)
                .all(|(seen, message)| *seen == message.id);

        if !same_prefix {
            self.end_line();
            if !messages.is_empty() {
                println!("  --- conversation ---");
            }
            self.messages.clear();
            self.last_printed = 0;
            for message in messages {
                println!("{}: {}", role_label(message.role), message.content);
                self.messages.push(message.id.clone());
            }
            self.last_printed = messages.last().map_or(0, |m| m.content.len());
            return;
        }

        // Continue the message we were in the middle of
        if let Some(last) = self.messages.len().checked_sub(1).map(|i| &messages[i]) {
            if let Some(rest) = last.content.get(self.last_printed..) {
                if !rest.is_empty() {
                    print!("{rest}");
                }
            }
            self.last_printed = last.content.len();
            if last.status != Some(MessageStatus::Streaming) {
                self.end_line();
            }
        }

        for message in &messages[self.messages.len()..] {
            self.end_line();
            self.messages.push(message.id.clone());
            self.last_printed = message.content.len();
            // Local echo of what was just typed
            if message.role == MessageRole::User {
                continue;
            }
            print!("{}: {}", role_label(message.role), message.content);
            if message.status == Some(MessageStatus::Streaming) {
                self.last_open = true;
            } else {
                println!();
            }
        }
        let _ = std::io::stdout().flush();
    }

    fn end_line(&mut self) {
        if self.last_open {
            println!();
            self.last_open = false;
        }
    }

    fn render_status(&mut self, state: &ClientState) {
        let current = (state.chat.status(), state.chat.status_message().to_string());
        if self.status.as_ref() == Some(&current) {
            return;
        }
        let (status, message) = &current;
        if *status != SystemStatus::Idle {
            self.end_line();
            if message.is_empty() {
                println!("  [{}]", status_label(*status));
            } else {
                println!("  [{}] {message}", status_label(*status));
            }
        }
        self.status = Some(current);
    }

    fn render_artifacts(&mut self, state: &ClientState) {
        for artifact in state.artifacts.artifacts() {
            let known = self.artifacts.iter().find(|(id, _)| id == artifact.id());
            match known {
                None => {
                    self.end_line();
                    println!(
                        "  [artifact] {} opened: {} ({})",
                        artifact.id(),
                        artifact.title(),
                        artifact.artifact_type().as_str()
                    );
                    if artifact.artifact_type() == ArtifactType::Mermaid {
                        println!("  (diagram source: /show {})", artifact.id());
                    }
                }
                Some((_, status)) if *status != artifact.sync_status => {
                    self.end_line();
                    match &artifact.last_sync_message {
                        Some(message) => println!(
                            "  [artifact] {} {}: {message}",
                            artifact.id(),
                            sync_label(artifact.sync_status)
                        ),
                        None => println!(
                            "  [artifact] {} {}",
                            artifact.id(),
                            sync_label(artifact.sync_status)
                        ),
                    }
                }
                Some(_) => {}
            }
        }
        let closed: Vec<String> = self
            .artifacts
            .iter()
            .filter(|(id, _)| !state.artifacts.contains(id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in closed {
            self.end_line();
            println!("  [artifact] {id} closed");
        }
        self.artifacts = state
            .artifacts
            .artifacts()
            .iter()
            .map(|a| (a.id().to_string(), a.sync_status))
            .collect();

        let active = state.artifacts.active_id().map(str::to_string);
        if active != self.active {
            if let Some(id) = &active {
                println!("  [artifact] active: {id}");
            }
            self.active = active;
        }
    }

    fn render_extras(&mut self, state: &ClientState) {
        if state.chat.suggestions() != self.suggestions.as_slice() {
            self.suggestions = state.chat.suggestions().to_vec();
            if !self.suggestions.is_empty() {
                self.end_line();
                println!("  suggestions: {}", self.suggestions.join(" | "));
            }
        }
        let score = state.project.safety_score();
        if self.safety_score != Some(score) {
            if self.safety_score.is_some() || score != 100 {
                self.end_line();
                println!("  [validation] safety score {score}");
            }
            self.safety_score = Some(score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            parse_command("  draft the login flow "),
            Ok(Some(Command::Send("draft the login flow".into())))
        );
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn commands_parse_their_arguments() {
        assert_eq!(parse_command("/open a1"), Ok(Some(Command::Open("a1".into()))));
        assert_eq!(parse_command("/close"), Ok(Some(Command::Close(None))));
        assert_eq!(
            parse_command("/edit a1 ./flow.mmd"),
            Ok(Some(Command::Edit {
                id: "a1".into(),
                path: "./flow.mmd".into()
            }))
        );
        assert_eq!(
            parse_command("/item cat-1 Track refunds"),
            Ok(Some(Command::Item {
                category: "cat-1".into(),
                text: "Track refunds".into()
            }))
        );
        assert_eq!(
            parse_command("/layout artifact"),
            Ok(Some(Command::Layout(LayoutMode::Artifact)))
        );
    }

    #[test]
    fn bad_commands_report_usage() {
        assert!(parse_command("/open").is_err());
        assert!(parse_command("/edit a1").is_err());
        assert!(parse_command("/layout wide").is_err());
        assert!(parse_command("/frobnicate").is_err());
    }

    #[test]
    fn mime_guess_by_extension() {
        assert_eq!(guess_mime("shot.PNG"), "image/png");
        assert_eq!(guess_mime("notes"), "application/octet-stream");
    }
}
