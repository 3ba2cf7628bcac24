use crate::envelope::StreamEvent;
use crate::error::{EngineError, EngineResult, NoActivePlanSnafu};
use crate::ids::ThreadId;
use crate::message::AssistantMessage;
use crate::timeline::StepTimeline;

/// Outcome of applying one event to the working message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The event was applied; the snapshot should be republished.
    Updated(AssistantMessage),
    /// The event was rejected and logged; nothing changed.
    Dropped,
    /// `stream_end` arrived; the message is final.
    Completed {
        message: AssistantMessage,
        thread_id: Option<ThreadId>,
    },
    /// `error` arrived; the message is the error-flagged replacement.
    Failed { message: AssistantMessage },
}

/// Reducer that folds decoded events into one assistant answer.
#[derive(Debug, Clone, Default)]
pub struct AnswerAccumulator {
    working: AssistantMessage,
    timeline: Option<StepTimeline>,
    terminated: bool,
}

impl AnswerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(&self) -> Option<&StepTimeline> {
        self.timeline.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Immutable copy of the working message with the current agent trace.
    pub fn snapshot(&self) -> AssistantMessage {
        AssistantMessage {
            agent_trace: self.timeline.clone(),
            ..self.working.clone()
        }
    }

    pub fn apply(&mut self, event: StreamEvent) -> Applied {
        if self.terminated {
            tracing::warn!(
                kind = %event.kind_name(),
                "event arrived after a terminal event; ignoring"
            );
            return Applied::Dropped;
        }

        match event {
            StreamEvent::BeginStream(_) => {
                // The agent trace is announced before `begin_stream` and must survive it.
                self.working = AssistantMessage::default();
            }
            StreamEvent::SearchResults(results) => {
                self.working.sources = results.results;
                self.working.images = results.images;
            }
            StreamEvent::TextChunk(chunk) => {
                self.working.content.push_str(&chunk.text);
                if let Some(timeline) = self.timeline.as_mut() {
                    timeline.complete_all();
                }
            }
            StreamEvent::RelatedQueries(related) => {
                self.working.related_questions = related.related_queries;
            }
            StreamEvent::AgentQueryPlan(plan) => {
                if self.timeline.is_some() {
                    tracing::debug!(
                        steps = plan.steps.len(),
                        "query plan re-announced; restarting timeline"
                    );
                }
                self.timeline = Some(StepTimeline::announce(plan.steps));
            }
            StreamEvent::AgentSearchQueries(update) => {
                let step = update.step_number;
                let result = self
                    .timeline_mut(step, "apply-agent-search-queries")
                    .and_then(|timeline| timeline.record_queries(step, update.queries));
                if let Err(error) = result {
                    return Self::reject("agent_search_queries", error);
                }
            }
            StreamEvent::AgentReadResults(update) => {
                let step = update.step_number;
                let result = self
                    .timeline_mut(step, "apply-agent-read-results")
                    .and_then(|timeline| timeline.record_results(step, update.results));
                if let Err(error) = result {
                    return Self::reject("agent_read_results", error);
                }
            }
            StreamEvent::AgentFinish | StreamEvent::FinalResponse(_) => {}
            StreamEvent::Unknown { kind } => {
                tracing::debug!(%kind, "passing through unknown event kind");
            }
            StreamEvent::StreamEnd(end) => {
                self.terminated = true;
                return Applied::Completed {
                    message: self.snapshot(),
                    thread_id: end.thread_id,
                };
            }
            StreamEvent::Error(failure) => {
                self.terminated = true;
                self.working = AssistantMessage::error(failure.detail, None);
                return Applied::Failed {
                    message: self.snapshot(),
                };
            }
        }

        Applied::Updated(self.snapshot())
    }

    fn timeline_mut(
        &mut self,
        step: usize,
        stage: &'static str,
    ) -> EngineResult<&mut StepTimeline> {
        self.timeline
            .as_mut()
            .ok_or_else(|| NoActivePlanSnafu { stage, step }.build())
    }

    fn reject(kind: &'static str, error: EngineError) -> Applied {
        tracing::warn!(%kind, error = %error, "dropping agent step event");
        Applied::Dropped
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::envelope::{
        AgentQueryPlan, AgentReadResults, AgentSearchQueries, BeginStream, RelatedQueries,
        SearchResults, StreamEnd, StreamFailure, TextChunk,
    };
    use crate::message::SourceRecord;
    use crate::timeline::StepStatus;

    fn text(chunk: &str) -> StreamEvent {
        StreamEvent::TextChunk(TextChunk {
            text: chunk.to_string(),
        })
    }

    fn plan(steps: &[&str]) -> StreamEvent {
        StreamEvent::AgentQueryPlan(AgentQueryPlan {
            steps: steps.iter().map(|step| step.to_string()).collect(),
        })
    }

    fn queries(step_number: usize, queries: &[&str]) -> StreamEvent {
        StreamEvent::AgentSearchQueries(AgentSearchQueries {
            step_number,
            queries: queries.iter().map(|query| query.to_string()).collect(),
        })
    }

    fn sources() -> SearchResults {
        SearchResults {
            results: vec![
                SourceRecord::new("Elon Musk", "https://en.wikipedia.org/wiki/Elon_Musk", "..."),
                SourceRecord::new("Tesla", "https://en.wikipedia.org/wiki/Tesla,_Inc.", "..."),
            ],
            images: vec!["https://example.org/musk.jpg".to_string()],
        }
    }

    #[test]
    fn text_chunks_concatenate_in_delivery_order() {
        let chunks = ["Elon", " Musk", " is ", "", "an entrepreneur [1]."];
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(StreamEvent::BeginStream(BeginStream::default()));

        let mut previous_len = 0;
        for chunk in chunks {
            let Applied::Updated(snapshot) = accumulator.apply(text(chunk)) else {
                panic!("text chunk should update");
            };
            assert!(snapshot.content.len() >= previous_len);
            previous_len = snapshot.content.len();
        }

        assert_eq!(accumulator.snapshot().content, chunks.concat());
    }

    #[test]
    fn list_events_replace_wholesale_and_are_idempotent() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(StreamEvent::SearchResults(sources()));
        let once = accumulator.snapshot();
        accumulator.apply(StreamEvent::SearchResults(sources()));
        assert_eq!(accumulator.snapshot(), once);

        let related = RelatedQueries {
            related_queries: vec!["net worth?".to_string()],
        };
        accumulator.apply(StreamEvent::RelatedQueries(related.clone()));
        accumulator.apply(StreamEvent::RelatedQueries(related));
        assert_eq!(accumulator.snapshot().related_questions, vec!["net worth?"]);

        accumulator.apply(StreamEvent::SearchResults(SearchResults {
            results: vec![SourceRecord::new("Only", "https://only.example", "")],
            images: Vec::new(),
        }));
        let replaced = accumulator.snapshot();
        assert_eq!(replaced.sources.len(), 1);
        assert!(replaced.images.is_empty());
    }

    #[test]
    fn begin_stream_resets_answer_but_keeps_the_plan() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(plan(&["research", "answer"]));
        accumulator.apply(StreamEvent::SearchResults(sources()));
        accumulator.apply(text("stale"));

        accumulator.apply(StreamEvent::BeginStream(BeginStream::default()));
        let snapshot = accumulator.snapshot();
        assert_eq!(snapshot.content, "");
        assert!(snapshot.sources.is_empty());
        assert!(snapshot.images.is_empty());
        assert!(!snapshot.is_error);
        assert_eq!(snapshot.agent_trace.map(|trace| trace.len()), Some(2));
    }

    #[test]
    fn first_text_chunk_completes_the_whole_plan() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(plan(&["a", "b", "c"]));
        accumulator.apply(queries(0, &["q0"]));

        accumulator.apply(text("Answer"));
        let timeline = accumulator.timeline().expect("timeline");
        assert!(
            timeline
                .entries()
                .iter()
                .all(|entry| entry.status == StepStatus::Done)
        );
    }

    #[test]
    fn agent_events_drive_the_timeline() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(plan(&["a", "b"]));
        accumulator.apply(queries(1, &["q1"]));
        accumulator.apply(StreamEvent::AgentReadResults(AgentReadResults {
            step_number: 1,
            results: sources().results,
        }));

        let trace = accumulator.snapshot().agent_trace.expect("trace");
        assert_eq!(trace.entries()[0].status, StepStatus::Done);
        assert_eq!(trace.entries()[1].status, StepStatus::Current);
        assert_eq!(trace.entries()[1].results.len(), 2);
    }

    #[test]
    fn re_announced_plan_restarts_the_timeline() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(plan(&["a", "b"]));
        accumulator.apply(queries(1, &["q1"]));
        accumulator.apply(plan(&["x", "y", "z"]));

        let timeline = accumulator.timeline().expect("timeline");
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline.current_step(), Some(0));
    }

    #[test]
    fn out_of_range_or_planless_steps_are_dropped() {
        let mut accumulator = AnswerAccumulator::new();
        assert_eq!(accumulator.apply(queries(0, &["q"])), Applied::Dropped);

        accumulator.apply(plan(&["only"]));
        let before = accumulator.snapshot();
        assert_eq!(accumulator.apply(queries(4, &["q"])), Applied::Dropped);
        assert_eq!(accumulator.snapshot(), before);
    }

    #[test]
    fn informational_and_unknown_kinds_still_republish() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(text("kept"));
        for event in [
            StreamEvent::AgentFinish,
            StreamEvent::Unknown {
                kind: "usage".to_string(),
            },
        ] {
            let Applied::Updated(snapshot) = accumulator.apply(event) else {
                panic!("expected republish");
            };
            assert_eq!(snapshot.content, "kept");
        }
    }

    #[test]
    fn stream_end_completes_with_thread_id() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(text("done"));
        let applied = accumulator.apply(StreamEvent::StreamEnd(StreamEnd {
            thread_id: Some(ThreadId::new(7)),
        }));

        let Applied::Completed { message, thread_id } = applied else {
            panic!("expected completion");
        };
        assert_eq!(message.content, "done");
        assert_eq!(thread_id, Some(ThreadId::new(7)));
        assert!(accumulator.is_terminated());
    }

    #[test]
    fn error_replaces_answer_and_keeps_partial_trace() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(plan(&["a", "b"]));
        accumulator.apply(StreamEvent::SearchResults(sources()));
        accumulator.apply(text("partial"));

        let applied = accumulator.apply(StreamEvent::Error(StreamFailure {
            detail: "rate limited".to_string(),
        }));
        let Applied::Failed { message } = applied else {
            panic!("expected failure");
        };
        assert!(message.is_error);
        assert_eq!(message.content, "rate limited");
        assert!(message.sources.is_empty());
        assert_eq!(message.agent_trace.map(|trace| trace.len()), Some(2));
    }

    #[test]
    fn nothing_applies_after_a_terminal_event() {
        let mut accumulator = AnswerAccumulator::new();
        accumulator.apply(text("final"));
        accumulator.apply(StreamEvent::StreamEnd(StreamEnd::default()));
        let frozen = accumulator.snapshot();

        assert_eq!(accumulator.apply(text(" more")), Applied::Dropped);
        assert_eq!(
            accumulator.apply(StreamEvent::Error(StreamFailure {
                detail: "late".to_string()
            })),
            Applied::Dropped
        );
        assert_eq!(accumulator.snapshot(), frozen);
    }
}
