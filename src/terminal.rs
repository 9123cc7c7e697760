//! Line-oriented terminal front-end.
//!
//! Input lines come from any async buffered reader (tokio stdin in
//! production); replies and command output go to a blocking writer that is
//! flushed after every streamed fragment.

use std::io::{self, Write};

use base64::{engine::general_purpose, Engine as _};
use session_store::{MatchKind, SessionRecord};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::commands::{parse_slash_command, SlashCommand, HELP_TEXT, SESSION_LIST_LIMIT};
use crate::runtime::{ChatRuntime, TurnError};

const PROMPT: &str = "> ";

/// Whether the read loop keeps going after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct Terminal<'a, W> {
    runtime: &'a ChatRuntime,
    output: W,
}

impl<'a, W> Terminal<'a, W>
where
    W: Write + Send,
{
    pub fn new(runtime: &'a ChatRuntime, output: W) -> Self {
        Self { runtime, output }
    }

    #[must_use]
    pub fn into_output(self) -> W {
        self.output
    }

    /// Reads lines until `/quit` or end of input.
    ///
    /// Only output failures end the loop early; runtime failures are printed
    /// inline and the prompt returns.
    pub async fn run<R>(&mut self, input: R) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.print_banner()?;
        let mut lines = input.lines();
        loop {
            self.write_prompt()?;
            let Some(line) = lines.next_line().await? else {
                writeln!(self.output)?;
                break;
            };
            if self.handle_line(&line).await? == Flow::Exit {
                break;
            }
        }
        self.output.flush()
    }

    async fn handle_line(&mut self, line: &str) -> io::Result<Flow> {
        match parse_slash_command(line) {
            Some(command) => self.handle_command(command),
            None if line.trim().is_empty() => Ok(Flow::Continue),
            None => {
                self.submit(line).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn submit(&mut self, text: &str) -> io::Result<()> {
        let output = &mut self.output;
        let mut write_failure = None;
        let mut on_fragment = |fragment: &str| {
            if write_failure.is_some() {
                return;
            }
            if let Err(error) = output.write_all(fragment.as_bytes()).and_then(|()| output.flush()) {
                write_failure = Some(error);
            }
        };

        let result = self.runtime.submit(text, &mut on_fragment).await;
        if let Some(error) = write_failure {
            return Err(error);
        }

        match result {
            Ok(outcome) => {
                writeln!(self.output)?;
                if outcome.cancelled {
                    writeln!(self.output, "[cancelled]")?;
                }
                if let Some(title) = outcome.title {
                    writeln!(self.output, "[title] {title}")?;
                }
                Ok(())
            }
            Err(error) => self.print_error(&error),
        }
    }

    fn handle_command(&mut self, command: SlashCommand) -> io::Result<Flow> {
        match command {
            SlashCommand::Help => writeln!(self.output, "{HELP_TEXT}")?,
            SlashCommand::New => match self.runtime.new_session() {
                Ok(session_id) => writeln!(self.output, "Started session {session_id}")?,
                Err(error) => self.print_error(&error)?,
            },
            SlashCommand::Sessions => self.print_sessions()?,
            SlashCommand::Load(session_id) => match self.runtime.load_session(&session_id) {
                Ok(record) => self.print_history(&record)?,
                Err(error) => self.print_error(&error)?,
            },
            SlashCommand::Search(keyword) => self.print_search(&keyword)?,
            SlashCommand::Delete(session_id) => match self.runtime.delete_session(&session_id) {
                Ok(()) => writeln!(self.output, "Deleted session {session_id}")?,
                Err(error) => self.print_error(&error)?,
            },
            SlashCommand::Status => self.print_status()?,
            SlashCommand::Copy => self.copy_last_reply()?,
            SlashCommand::Quit => return Ok(Flow::Exit),
            SlashCommand::Usage(usage) => writeln!(self.output, "usage: {usage}")?,
            SlashCommand::Unknown(name) => {
                writeln!(self.output, "unknown command {name}; type /help")?;
            }
        }
        Ok(Flow::Continue)
    }

    fn print_banner(&mut self) -> io::Result<()> {
        let profile = self.runtime.profile();
        writeln!(
            self.output,
            "chatbot-lite {} ({} / {})",
            env!("CARGO_PKG_VERSION"),
            profile.provider_id,
            profile.model_id
        )?;
        writeln!(self.output, "Type /help for commands, Ctrl-C stops a reply.")
    }

    fn write_prompt(&mut self) -> io::Result<()> {
        write!(self.output, "{PROMPT}")?;
        self.output.flush()
    }

    fn print_sessions(&mut self) -> io::Result<()> {
        let sessions = match self.runtime.list_sessions(Some(SESSION_LIST_LIMIT)) {
            Ok(sessions) => sessions,
            Err(error) => return self.print_error(&error),
        };
        if sessions.is_empty() {
            return writeln!(self.output, "No saved sessions.");
        }

        let active = self.runtime.active_session_id();
        for session in sessions {
            let marker = if active.as_deref() == Some(session.session_id.as_str()) {
                '*'
            } else {
                ' '
            };
            writeln!(
                self.output,
                "{marker} {}  {}  ({} messages, updated {})",
                session.session_id, session.title, session.message_count, session.updated_at
            )?;
        }
        Ok(())
    }

    fn print_search(&mut self, keyword: &str) -> io::Result<()> {
        let hits = match self.runtime.search(keyword) {
            Ok(hits) => hits,
            Err(error) => return self.print_error(&error),
        };
        if hits.is_empty() {
            return writeln!(self.output, "No sessions match \"{keyword}\".");
        }

        for hit in hits {
            writeln!(self.output, "  {}  {}", hit.session_id, hit.title)?;
            if let (MatchKind::Content, Some(preview)) = (hit.match_kind, hit.preview) {
                writeln!(self.output, "      {preview}")?;
            }
        }
        Ok(())
    }

    fn print_history(&mut self, record: &SessionRecord) -> io::Result<()> {
        writeln!(
            self.output,
            "Loaded session {} ({})",
            record.session_id, record.title
        )?;
        for message in record.chat_messages().iter().skip(1) {
            writeln!(self.output, "{}: {}", message.role, message.content)?;
        }
        Ok(())
    }

    fn print_status(&mut self) -> io::Result<()> {
        let status = match self.runtime.status() {
            Ok(status) => status,
            Err(error) => return self.print_error(&error),
        };
        let compression = status.compression;
        writeln!(self.output, "session:   {} ({})", status.session_id, status.title)?;
        writeln!(
            self.output,
            "provider:  {} / {}",
            status.provider.provider_id, status.provider.model_id
        )?;
        writeln!(
            self.output,
            "messages:  {}, tokens: {} / threshold {}",
            status.message_count, status.total_tokens, compression.threshold
        )?;
        if compression.has_compressed {
            writeln!(
                self.output,
                "context:   compressed ({} chars summary + last {} messages)",
                compression.summary_length, compression.recent_message_count
            )
        } else {
            writeln!(self.output, "context:   full history")
        }
    }

    fn copy_last_reply(&mut self) -> io::Result<()> {
        let reply = match self.runtime.last_reply() {
            Ok(Some(reply)) => reply,
            Ok(None) => return writeln!(self.output, "No reply to copy yet."),
            Err(error) => return self.print_error(&error),
        };
        write!(self.output, "{}", clipboard_sequence(&reply))?;
        writeln!(
            self.output,
            "Copied last reply ({} chars).",
            reply.chars().count()
        )
    }

    fn print_error(&mut self, error: &TurnError) -> io::Result<()> {
        writeln!(self.output, "[error] {error}")
    }
}

/// OSC 52 escape that asks the terminal to put `text` on the system clipboard.
///
/// Works over SSH; terminals without OSC 52 support ignore it.
#[must_use]
pub fn clipboard_sequence(text: &str) -> String {
    format!("\x1b]52;c;{}\x07", general_purpose::STANDARD.encode(text))
}
