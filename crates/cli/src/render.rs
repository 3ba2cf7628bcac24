use std::io::{self, Write};

use sift_core::{AssistantMessage, ChatMessage, StepStatus, cited_sources};

/// Writes only the text appended since the last call.
#[derive(Debug, Default)]
pub struct DeltaPrinter {
    printed: usize,
}

impl DeltaPrinter {
    pub fn write_delta(&mut self, out: &mut impl Write, content: &str) -> io::Result<()> {
        // `begin_stream` may reset the answer; start over from the top.
        if content.len() < self.printed || !content.is_char_boundary(self.printed) {
            self.printed = 0;
        }

        let delta = &content[self.printed..];
        if !delta.is_empty() {
            out.write_all(delta.as_bytes())?;
            out.flush()?;
        }
        self.printed = content.len();
        Ok(())
    }
}

pub fn write_details(out: &mut impl Write, message: &AssistantMessage) -> io::Result<()> {
    if !message.sources.is_empty() {
        let cited = cited_sources(&message.content, &message.sources);
        writeln!(out, "\nSources:")?;
        for (index, source) in message.sources.iter().enumerate() {
            let marker = if cited.contains(&index) { "*" } else { " " };
            writeln!(out, "{marker}[{}] {} <{}>", index + 1, source.title, source.url)?;
        }
    }

    if !message.images.is_empty() {
        writeln!(out, "\nImages:")?;
        for image in &message.images {
            writeln!(out, "  {image}")?;
        }
    }

    if !message.related_questions.is_empty() {
        writeln!(out, "\nRelated:")?;
        for question in &message.related_questions {
            writeln!(out, "  - {question}")?;
        }
    }

    if let Some(trace) = message.agent_trace.as_ref().filter(|trace| !trace.is_empty()) {
        writeln!(out, "\nSteps:")?;
        for entry in trace.entries() {
            let status = match entry.status {
                StepStatus::Default => "pending",
                StepStatus::Current => "running",
                StepStatus::Done => "done",
            };
            writeln!(out, "  {}. [{status}] {}", entry.index + 1, entry.description)?;
            for query in &entry.queries {
                writeln!(out, "       ? {query}")?;
            }
        }
    }

    Ok(())
}

/// Prints a loaded thread before the prompt resumes.
pub fn write_history(out: &mut impl Write, messages: &[ChatMessage]) -> io::Result<()> {
    for message in messages {
        match message {
            ChatMessage::User(user) => writeln!(out, "> {}", user.content)?,
            ChatMessage::Assistant(answer) if answer.is_error => {
                writeln!(out, "error: {}", answer.content)?
            }
            ChatMessage::Assistant(answer) => writeln!(out, "{}\n", answer.content)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_core::{SourceRecord, StepTimeline};

    use super::*;

    fn rendered(write: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut out = Vec::new();
        write(&mut out).expect("write");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn delta_printer_emits_only_new_text() {
        let mut printer = DeltaPrinter::default();
        let output = rendered(|out| {
            printer.write_delta(out, "Elon")?;
            printer.write_delta(out, "Elon Musk")?;
            printer.write_delta(out, "Elon Musk")
        });
        assert_eq!(output, "Elon Musk");
    }

    #[test]
    fn details_mark_cited_sources() {
        let mut trace = StepTimeline::announce(["find bio"]);
        trace.complete_all();
        let message = AssistantMessage {
            content: "An entrepreneur [2].".to_string(),
            sources: vec![
                SourceRecord::new("Tesla", "https://tesla.example", ""),
                SourceRecord::new("Elon Musk", "https://musk.example", ""),
            ],
            related_questions: vec!["net worth?".to_string()],
            agent_trace: Some(trace),
            ..AssistantMessage::default()
        };

        let output = rendered(|out| write_details(out, &message));
        assert_eq!(
            output,
            "\nSources:\n \
             [1] Tesla <https://tesla.example>\n\
             *[2] Elon Musk <https://musk.example>\n\
             \nRelated:\n  - net worth?\n\
             \nSteps:\n  1. [done] find bio\n"
        );
    }
}
