//! The interactive chat loop of the CLI.

use std::io::{self, Write};
use std::pin::pin;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::select;
use tokio::signal;

use crate::config::Config;
use crate::render::Fragment;
use crate::session::Session;

const PROMPT: &str = "👤 You:";
const AGENT_LABEL: &str = "🤖 Agent:";
const GOODBYE: &str = "👋 Goodbye!";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Help,
    Config,
    Empty,
    Query(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line.to_lowercase().as_str() {
            "" => Command::Empty,
            "quit" | "exit" | "q" => Command::Quit,
            "help" => Command::Help,
            "config" => Command::Config,
            _ => Command::Query(line),
        }
    }
}

/// How a turn printed by [`answer`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The agent finished its answer.
    Completed,
    /// The turn ended with an error, which has been printed.
    Failed,
    /// The user pressed Ctrl-C.
    Interrupted,
}

/// Interactive chat mode.
pub struct Repl<'a> {
    session: &'a Session,
    config: &'a Config,
    streaming: bool,
}

impl<'a> Repl<'a> {
    /// Creates a chat loop over `session`. `config` is what the `config`
    /// command prints.
    #[inline]
    pub fn new(session: &'a Session, config: &'a Config) -> Self {
        Self {
            session,
            config,
            streaming: true,
        }
    }

    /// Controls whether answers are printed while they are generated
    /// (the default), or once they are complete.
    #[inline]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Reads lines from `input` until the user quits or the input ends.
    pub async fn run<R, W>(
        &self,
        mut input: R,
        output: &mut W,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        writeln!(output, "💬 Interactive Chat Mode")?;
        writeln!(output, "Type 'quit' to exit, 'help' for commands")?;
        writeln!(output, "{}", "-".repeat(30))?;

        let mut line = String::new();
        loop {
            write!(output, "\n{} ", PROMPT.bright_green().bold())?;
            output.flush()?;

            line.clear();
            let read = select! {
                read = input.read_line(&mut line) => read?,
                _ = signal::ctrl_c() => {
                    writeln!(output, "\n{GOODBYE}")?;
                    return Ok(());
                }
            };
            if read == 0 {
                writeln!(output, "\n{GOODBYE}")?;
                return Ok(());
            }

            match Command::parse(&line) {
                Command::Empty => continue,
                Command::Quit => {
                    writeln!(output, "{GOODBYE}")?;
                    return Ok(());
                }
                Command::Help => print_help(output)?,
                Command::Config => writeln!(output, "{}", self.config)?,
                Command::Query(query) => {
                    write!(output, "{} ", AGENT_LABEL.bright_cyan())?;
                    let outcome =
                        answer(self.session, query, self.streaming, output)
                            .await?;
                    debug!("turn ended: {outcome:?}");
                }
            }
        }
    }
}

fn print_help<W: Write>(output: &mut W) -> io::Result<()> {
    writeln!(output, "Available commands:")?;
    writeln!(output, "- quit/exit/q: Exit the chat")?;
    writeln!(output, "- help: Show this help message")?;
    writeln!(output, "- config: Show current configuration")?;
    writeln!(output, "- Any other text: Chat with the agent")
}

/// Runs one turn and prints the answer to `output`, after whatever label
/// the caller has printed.
///
/// A spinner is shown on stderr until the first output arrives. Ctrl-C
/// stops the turn.
pub async fn answer<W: Write>(
    session: &Session,
    query: &str,
    streaming: bool,
    output: &mut W,
) -> io::Result<TurnOutcome> {
    output.flush()?;

    let spinner = spinner();
    let mut interrupt = pin!(signal::ctrl_c());

    let outcome = if streaming {
        let mut renderer = session.renderer();
        let mut turn = session.run_turn(query);
        let mut outcome = TurnOutcome::Completed;
        loop {
            let snapshot = select! {
                snapshot = turn.next() => snapshot,
                _ = &mut interrupt => {
                    outcome = TurnOutcome::Interrupted;
                    break;
                }
            };
            let Some(snapshot) = snapshot else {
                break;
            };
            if snapshot.error.is_some() {
                outcome = TurnOutcome::Failed;
            }

            let fragments = renderer.render(&snapshot);
            if fragments.is_empty() {
                continue;
            }
            spinner.finish_and_clear();
            for fragment in fragments {
                print_fragment(output, &fragment)?;
            }
            output.flush()?;
        }
        outcome
    } else {
        let result = select! {
            result = session.run_turn_blocking(query) => Some(result),
            _ = &mut interrupt => None,
        };
        spinner.finish_and_clear();
        match result {
            Some(Ok(text)) => {
                write!(output, "{text}")?;
                TurnOutcome::Completed
            }
            Some(Err(err)) => {
                print_fragment(output, &Fragment::Error(err.to_string()))?;
                TurnOutcome::Failed
            }
            None => TurnOutcome::Interrupted,
        }
    };

    spinner.finish_and_clear();
    if outcome == TurnOutcome::Interrupted {
        write!(output, "\n{}", "⏹️  Interrupted".yellow())?;
    }
    writeln!(output)?;
    output.flush()?;
    Ok(outcome)
}

fn print_fragment<W: Write>(
    output: &mut W,
    fragment: &Fragment,
) -> io::Result<()> {
    match fragment {
        Fragment::Content(_) | Fragment::Replacement(_) => {
            write!(output, "{fragment}")
        }
        Fragment::ToolInvocation { .. } | Fragment::ToolOutput { .. } => {
            write!(output, "{}", fragment.dimmed())
        }
        Fragment::Error(_) => write!(output, "{}", fragment.red()),
    }
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {wide_msg}") {
        spinner.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    spinner.set_message("🤔 Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
