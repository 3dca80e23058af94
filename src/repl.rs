//! Interactive chat loop.
//!
//! Input is read line by line on the async runtime; each turn runs the
//! blocking model calls on the blocking thread pool so the reader stays
//! responsive to end-of-input.

use tokio::io::{
    AsyncBufRead,
    AsyncBufReadExt,
    AsyncWrite,
    AsyncWriteExt,
    BufReader,
};

use crate::{
    app::App,
    chat::{ChatMessage, Role},
    error::{Error, Result},
    text_util::{
        DEFAULT_PREVIEW_MAX_CHARS,
        indent_continuation,
        numbered_passages,
    },
};

const PROMPT: &str = "> ";

const HELP: &str = "Commands:
  /history   show the conversation so far
  /sources   show the passages behind the last answer
  /clear     forget the conversation
  /quit      leave the chat
Anything else is sent as a message.";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Message(String),
    History,
    Sources,
    Clear,
    Help,
    Quit,
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };
        match command.to_ascii_lowercase().as_str() {
            "history" => Self::History,
            "sources" => Self::Sources,
            "clear" => Self::Clear,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    pub show_context: bool,
}

/// Run the chat on stdin/stdout until `/quit` or end of input.
pub fn run_chat(app: App, options: ChatOptions) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let input = BufReader::new(tokio::io::stdin());
        let mut output = tokio::io::stdout();
        chat_loop(app, input, &mut output, options).await?;
        Ok(())
    })
}

/// Drive a chat over arbitrary input and output streams. Returns the app
/// when the conversation ends.
pub async fn chat_loop<R, W>(
    mut app: App,
    input: R,
    output: &mut W,
    options: ChatOptions,
) -> Result<App>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let greeting = match app.document() {
        Some(doc) => format!(
            "Chatting about {} ({} passages). Type /help for commands.\n",
            doc.source,
            doc.passages.len()
        ),
        None => "No document loaded, answering from the model alone. \
                 Type /help for commands.\n"
            .to_string(),
    };
    output.write_all(greeting.as_bytes()).await?;

    let mut lines = input.lines();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            output.write_all(b"\n").await?;
            break;
        };

        let reply = match ReplCommand::parse(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => break,
            ReplCommand::Help => format!("{HELP}\n"),
            ReplCommand::Unknown(cmd) => {
                format!("Unknown command {cmd}. Type /help for commands.\n")
            }
            ReplCommand::Clear => {
                app.session_mut().clear();
                "Conversation cleared.\n".to_string()
            }
            ReplCommand::History => render_history(&app),
            ReplCommand::Sources => match app.session().last_contexts() {
                Some(passages) if !passages.is_empty() => {
                    format!("{}\n", numbered_passages(passages, None, None))
                }
                _ => "No sources yet.\n".to_string(),
            },
            ReplCommand::Message(text) => {
                let (returned, result) =
                    tokio::task::spawn_blocking(move || {
                        let result = app.ask(&text);
                        (app, result)
                    })
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(e)))?;
                app = returned;
                render_turn(result, options)
            }
        };
        output.write_all(reply.as_bytes()).await?;
    }

    output.flush().await?;
    Ok(app)
}

fn render_turn(result: Result<ChatMessage>, options: ChatOptions) -> String {
    match result {
        Ok(message) => {
            let mut out = format!("{}\n", message.content);
            if options.show_context
                && let Some(contexts) = &message.contexts
                && !contexts.is_empty()
            {
                out.push_str(&format!(
                    "\nSources:\n{}\n",
                    numbered_passages(
                        contexts,
                        None,
                        Some(DEFAULT_PREVIEW_MAX_CHARS)
                    )
                ));
            }
            out
        }
        Err(e) => {
            tracing::debug!(error = %e, "turn failed");
            format!("error: {e}\n")
        }
    }
}

fn render_history(app: &App) -> String {
    if app.history().is_empty() {
        return "No messages yet.\n".to_string();
    }
    let mut out = String::new();
    for message in app.history() {
        let label = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        let marker = if message.requires_rag { " [doc]" } else { "" };
        out.push_str(&format!(
            "{label}{marker}: {}\n",
            indent_continuation(&message.content, "  ")
        ));
    }
    out
}
