use tracing::debug;

use crate::session::types::{AngleState, AngleStatus, Channel, Document, DocumentStatus};

use super::events::StreamEvent;

const ANGLE_UNFINISHED: &str = "Stream ended before this angle completed";

/// What applying one event did, beyond the in-place document update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reduction {
    /// Text to append to the content store, in order.
    pub appends: Vec<(Channel, String)>,
    /// The structural state changed.
    pub changed: bool,
    /// The document reached a terminal status with this event.
    pub finished: bool,
    /// Status line worth surfacing, if any.
    pub status: Option<String>,
}

impl Reduction {
    fn append(channel: Channel, text: String) -> Self {
        Self {
            appends: vec![(channel, text)],
            ..Default::default()
        }
    }

    fn changed() -> Self {
        Self {
            changed: true,
            ..Default::default()
        }
    }
}

/// Marker appended to an angle's text when the server reports it failed.
pub fn angle_error_marker(message: &str) -> String {
    format!("\n\n> Analysis error: {}", message)
}

/// Apply one event to one document.
///
/// Touches nothing but `doc`; content is returned as appends for the caller
/// to route into the store. Events for a document that is already terminal
/// are ignored.
pub fn reduce(doc: &mut Document, event: StreamEvent, now: i64) -> Reduction {
    if doc.is_terminal() {
        return Reduction::default();
    }

    match event {
        StreamEvent::Meta {
            paper_title,
            angles,
            stream_mode,
        } => {
            debug!(doc_id = %doc.id, ?stream_mode, angles = angles.len(), "stream metadata");
            let mut out = Reduction::default();
            if let Some(title) = paper_title.filter(|t| !t.trim().is_empty()) {
                if doc.title != title {
                    doc.title = title;
                    out.changed = true;
                }
            }
            for name in angles {
                if doc.angle(&name).is_none() {
                    doc.angles.push(AngleState::pending(name));
                    out.changed = true;
                }
            }
            out
        }
        StreamEvent::AngleDelta { angle, delta } => {
            let mut out = Reduction::default();
            match doc.angle_mut(&angle) {
                Some(state) if state.status == AngleStatus::Pending => {
                    state.status = AngleStatus::Streaming;
                    state.started_at.get_or_insert(now);
                    out.changed = true;
                }
                Some(_) => {}
                None => {
                    doc.angles.push(AngleState {
                        name: angle.clone(),
                        status: AngleStatus::Streaming,
                        started_at: Some(now),
                        ended_at: None,
                    });
                    out.changed = true;
                }
            }
            out.appends.push((Channel::Angle(angle), delta));
            out
        }
        StreamEvent::AngleReasoningDelta { angle, delta } => {
            Reduction::append(Channel::AngleReasoning(angle), delta)
        }
        StreamEvent::AngleDone { angle } => match doc.angle_mut(&angle) {
            Some(state) if state.is_terminal() => Reduction::default(),
            Some(state) => {
                state.status = AngleStatus::Done;
                state.ended_at = Some(now);
                Reduction::changed()
            }
            None => {
                doc.angles.push(AngleState {
                    name: angle,
                    status: AngleStatus::Done,
                    started_at: None,
                    ended_at: Some(now),
                });
                Reduction::changed()
            }
        },
        StreamEvent::AngleError { angle, message } => {
            let changed = match doc.angle_mut(&angle) {
                Some(state) if state.is_terminal() => false,
                Some(state) => {
                    state.fail();
                    true
                }
                None => {
                    let mut state = AngleState::pending(angle.clone());
                    state.fail();
                    doc.angles.push(state);
                    true
                }
            };
            if !changed {
                return Reduction::default();
            }
            Reduction {
                appends: vec![(Channel::Angle(angle), angle_error_marker(&message))],
                changed: true,
                ..Default::default()
            }
        }
        StreamEvent::FinalStart => Reduction::default(),
        StreamEvent::FinalDelta { delta } => Reduction::append(Channel::Final, delta),
        StreamEvent::FinalReasoningDelta { delta } => {
            Reduction::append(Channel::FinalReasoning, delta)
        }
        StreamEvent::FinalDone {
            text_char_count,
            model,
        } => {
            debug!(doc_id = %doc.id, ?model, "final report done");
            let mut out = Reduction::changed();
            // An angle still open here never completed; close it so the
            // document is terminal only over terminal angles.
            for state in doc.angles.iter_mut().filter(|a| !a.is_terminal()) {
                state.fail();
                out.appends.push((
                    Channel::Angle(state.name.clone()),
                    angle_error_marker(ANGLE_UNFINISHED),
                ));
            }
            doc.status = DocumentStatus::Done;
            doc.ended_at = Some(now);
            doc.text_char_count = text_char_count;
            out.finished = true;
            out.status = Some(match text_char_count {
                Some(n) => format!("Analysis complete, {} characters processed", n),
                None => "Analysis complete".to_string(),
            });
            out
        }
        StreamEvent::Unknown => Reduction::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::content::ContentStore;

    fn doc() -> Document {
        let mut doc = Document::new("d1".into(), "paper.pdf", &["A", "B", "C"]);
        doc.status = DocumentStatus::Analyzing;
        doc
    }

    fn apply(doc: &mut Document, store: &mut ContentStore, event: StreamEvent, now: i64) {
        let out = reduce(doc, event, now);
        for (channel, text) in out.appends {
            store.append(&doc.id, &channel, &text);
        }
    }

    fn delta(angle: &str, text: &str) -> StreamEvent {
        StreamEvent::AngleDelta {
            angle: angle.to_string(),
            delta: text.to_string(),
        }
    }

    #[test]
    fn test_three_angles_one_done() {
        let mut d = doc();
        let mut store = ContentStore::new();
        apply(&mut d, &mut store, delta("A", "x"), 10);
        apply(&mut d, &mut store, delta("A", "y"), 20);
        apply(
            &mut d,
            &mut store,
            StreamEvent::AngleDone { angle: "A".into() },
            30,
        );
        apply(
            &mut d,
            &mut store,
            StreamEvent::FinalDone {
                text_char_count: None,
                model: None,
            },
            40,
        );

        let a = d.angle("A").unwrap();
        assert_eq!(a.status, AngleStatus::Done);
        assert_eq!(a.started_at, Some(10));
        assert_eq!(a.ended_at, Some(30));
        assert_eq!(store.get("d1", &Channel::angle("A")), "xy");
        assert_eq!(d.status, DocumentStatus::Done);
        assert_eq!(d.ended_at, Some(40));
        // Angles the server never finished are closed, not left open.
        assert!(d.angles.iter().all(|a| a.is_terminal()));
    }

    #[test]
    fn test_started_at_set_once() {
        let mut d = doc();
        let first = reduce(&mut d, delta("A", "1"), 5);
        assert!(first.changed);
        let second = reduce(&mut d, delta("A", "2"), 9);
        assert!(!second.changed);
        assert_eq!(d.angle("A").unwrap().started_at, Some(5));
        assert_eq!(d.angle("A").unwrap().status, AngleStatus::Streaming);
    }

    #[test]
    fn test_duplicate_frame_double_appends_only() {
        let mut d = doc();
        let mut store = ContentStore::new();
        apply(&mut d, &mut store, delta("B", "dup"), 1);
        let before = d.clone();
        apply(&mut d, &mut store, delta("B", "dup"), 2);
        assert_eq!(d, before);
        assert_eq!(store.get("d1", &Channel::angle("B")), "dupdup");
    }

    #[test]
    fn test_angle_error_discards_timestamps_and_marks_content() {
        let mut d = doc();
        let mut store = ContentStore::new();
        apply(&mut d, &mut store, delta("B", "partial"), 1);
        apply(
            &mut d,
            &mut store,
            StreamEvent::AngleError {
                angle: "B".into(),
                message: "rate limited".into(),
            },
            2,
        );
        let b = d.angle("B").unwrap();
        assert_eq!(b.status, AngleStatus::Error);
        assert_eq!(b.started_at, None);
        assert_eq!(
            store.get("d1", &Channel::angle("B")),
            "partial\n\n> Analysis error: rate limited"
        );
        // The rest of the document keeps streaming.
        apply(&mut d, &mut store, delta("C", "ok"), 3);
        assert_eq!(d.angle("C").unwrap().status, AngleStatus::Streaming);
        assert_eq!(d.status, DocumentStatus::Analyzing);
    }

    #[test]
    fn test_error_is_terminal() {
        let mut d = doc();
        reduce(
            &mut d,
            StreamEvent::AngleError {
                angle: "A".into(),
                message: "x".into(),
            },
            1,
        );
        let out = reduce(&mut d, StreamEvent::AngleDone { angle: "A".into() }, 2);
        assert!(!out.changed);
        assert_eq!(d.angle("A").unwrap().status, AngleStatus::Error);
        let out = reduce(&mut d, delta("A", "late"), 3);
        assert_eq!(d.angle("A").unwrap().status, AngleStatus::Error);
        assert_eq!(out.appends.len(), 1);
    }

    #[test]
    fn test_meta_updates_title_only() {
        let mut d = doc();
        let out = reduce(
            &mut d,
            StreamEvent::Meta {
                paper_title: Some("Attention Is All You Need".into()),
                angles: vec!["A".into()],
                stream_mode: Some("parallel".into()),
            },
            1,
        );
        assert!(out.changed);
        assert_eq!(d.title, "Attention Is All You Need");
        assert_eq!(d.status, DocumentStatus::Analyzing);
        assert_eq!(d.angles.len(), 3);

        reduce(
            &mut d,
            StreamEvent::Meta {
                paper_title: Some("  ".into()),
                angles: vec![],
                stream_mode: None,
            },
            2,
        );
        assert_eq!(d.title, "Attention Is All You Need");
    }

    #[test]
    fn test_reasoning_and_final_channels() {
        let mut d = doc();
        let mut store = ContentStore::new();
        apply(
            &mut d,
            &mut store,
            StreamEvent::AngleReasoningDelta {
                angle: "A".into(),
                delta: "hmm".into(),
            },
            1,
        );
        apply(
            &mut d,
            &mut store,
            StreamEvent::FinalReasoningDelta { delta: "so".into() },
            2,
        );
        apply(&mut d, &mut store, StreamEvent::FinalDelta { delta: "R".into() }, 3);
        assert_eq!(d.angle("A").unwrap().status, AngleStatus::Pending);
        assert_eq!(store.get("d1", &Channel::angle_reasoning("A")), "hmm");
        assert_eq!(store.get("d1", &Channel::FinalReasoning), "so");
        assert_eq!(store.get("d1", &Channel::Final), "R");
    }

    #[test]
    fn test_final_done_reports_char_count() {
        let mut d = doc();
        let out = reduce(
            &mut d,
            StreamEvent::FinalDone {
                text_char_count: Some(2048),
                model: Some("m".into()),
            },
            7,
        );
        assert!(out.finished);
        assert_eq!(d.text_char_count, Some(2048));
        assert_eq!(
            out.status.as_deref(),
            Some("Analysis complete, 2048 characters processed")
        );
    }

    #[test]
    fn test_unknown_and_terminal_document_ignored() {
        let mut d = doc();
        assert_eq!(reduce(&mut d, StreamEvent::Unknown, 1), Reduction::default());
        d.fail("Cancelled", 2);
        let before = d.clone();
        let out = reduce(&mut d, delta("A", "late"), 3);
        assert!(out.appends.is_empty());
        assert_eq!(d, before);
    }

    #[test]
    fn test_delta_for_unseeded_angle() {
        let mut d = doc();
        reduce(&mut d, delta("Extra", "z"), 4);
        let extra = d.angle("Extra").unwrap();
        assert_eq!(extra.status, AngleStatus::Streaming);
        assert_eq!(extra.started_at, Some(4));
    }
}
