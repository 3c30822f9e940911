//! Turns snapshots into printable fragments.

use std::collections::HashSet;
use std::fmt::{self, Display};

use deep_agent_core::{AssistantMessage, Message, TurnSnapshot};

const OUTPUT_PREVIEW_CHARS: usize = 100;
const TRUNCATION_MARKER: &str = "...";

/// A piece of output produced by [`TranscriptRenderer`].
///
/// The `Display` form is what the CLI prints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    /// New text of the assistant message being streamed.
    Content(String),
    /// The whole text of an assistant message whose content changed in a
    /// way that is not an extension of what was already shown.
    Replacement(String),
    /// The model called a tool.
    ToolInvocation {
        /// Name of the tool.
        name: String,
        /// Arguments as `key=value` pairs joined by commas.
        arguments: String,
    },
    /// A tool finished.
    ToolOutput {
        /// Name of the tool.
        name: String,
        /// The output, possibly truncated.
        output: String,
    },
    /// The turn ended with an error.
    Error(String),
}

impl Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Content(text) => f.write_str(text),
            Fragment::Replacement(text) => write!(f, "\n{text}"),
            Fragment::ToolInvocation { name, arguments } => {
                write!(f, "\n🔧 Using {name}({arguments})\n")
            }
            Fragment::ToolOutput { name, output } => {
                write!(f, "📤 {name} output: {output}\n")
            }
            Fragment::Error(message) => write!(f, "\n❌ Error: {message}\n"),
        }
    }
}

/// Converts the snapshots of one turn into fragments, so that nothing is
/// shown twice.
///
/// A renderer keeps state for a single turn. Use a new one for every turn.
#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    show_tools: bool,
    // (message position, call position)
    announced_calls: HashSet<(usize, usize)>,
    announced_results: HashSet<usize>,
    streaming: Option<Streaming>,
}

#[derive(Debug)]
struct Streaming {
    position: usize,
    emitted: String,
}

impl TranscriptRenderer {
    /// Creates a renderer. Tool fragments are only produced when
    /// `show_tools` is set.
    #[inline]
    pub fn new(show_tools: bool) -> Self {
        Self {
            show_tools,
            ..Default::default()
        }
    }

    /// Returns the fragments that are new in `snapshot`.
    pub fn render(&mut self, snapshot: &TurnSnapshot) -> Vec<Fragment> {
        let mut fragments = vec![];
        let last = snapshot.messages.len().checked_sub(1).and_then(|position| {
            match &snapshot.messages[position] {
                Message::Assistant(msg) => Some((position, msg)),
                Message::User(_) | Message::ToolResult(_) => None,
            }
        });

        if let Some(error) = &snapshot.error {
            if let Some((position, msg)) = last {
                self.render_calls(position, msg, &mut fragments);
            }
            self.render_results(snapshot, &mut fragments);
            fragments.push(Fragment::Error(error.to_string()));
            return fragments;
        }

        let Some((position, msg)) = last else {
            return fragments;
        };
        self.render_calls(position, msg, &mut fragments);
        self.render_results(snapshot, &mut fragments);
        if let Some(fragment) = self.render_content(position, &msg.content) {
            fragments.push(fragment);
        }
        fragments
    }

    fn render_calls(
        &mut self,
        position: usize,
        msg: &AssistantMessage,
        fragments: &mut Vec<Fragment>,
    ) {
        if !self.show_tools {
            return;
        }
        for (idx, call) in msg.tool_calls.iter().enumerate() {
            if self.announced_calls.insert((position, idx)) {
                fragments.push(Fragment::ToolInvocation {
                    name: call.name.clone(),
                    arguments: call.render_arguments(),
                });
            }
        }
    }

    fn render_results(
        &mut self,
        snapshot: &TurnSnapshot,
        fragments: &mut Vec<Fragment>,
    ) {
        if !self.show_tools {
            return;
        }
        for (idx, msg) in snapshot.messages.iter().enumerate() {
            let Message::ToolResult(result) = msg else {
                continue;
            };
            if self.announced_results.insert(idx) {
                fragments.push(Fragment::ToolOutput {
                    name: result.name.clone(),
                    output: truncate_output(&result.content),
                });
            }
        }
    }

    fn render_content(
        &mut self,
        position: usize,
        content: &str,
    ) -> Option<Fragment> {
        if self
            .streaming
            .as_ref()
            .is_some_and(|streaming| streaming.position != position)
        {
            self.streaming = None;
        }
        let streaming = self.streaming.get_or_insert_with(|| Streaming {
            position,
            emitted: String::new(),
        });

        if content == streaming.emitted {
            return None;
        }
        let fragment = match content.strip_prefix(streaming.emitted.as_str()) {
            Some(suffix) => Fragment::Content(suffix.to_owned()),
            None => {
                debug!("content of message {position} was replaced");
                Fragment::Replacement(content.to_owned())
            }
        };
        streaming.emitted.clear();
        streaming.emitted.push_str(content);
        Some(fragment)
    }
}

fn truncate_output(output: &str) -> String {
    match output.char_indices().nth(OUTPUT_PREVIEW_CHARS) {
        Some((end, _)) => format!("{}{TRUNCATION_MARKER}", &output[..end]),
        None => output.to_owned(),
    }
}
