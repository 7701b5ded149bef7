use serde::Deserialize;

/// One decoded record from an analysis stream.
///
/// The server tags records with an `event` field; `kind` is accepted too
/// (the decoder rewrites it before deserializing). Unrecognised tags decode
/// to [`StreamEvent::Unknown`] and are ignored by the reducer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Meta {
        #[serde(default)]
        paper_title: Option<String>,
        #[serde(default)]
        angles: Vec<String>,
        #[serde(default)]
        stream_mode: Option<String>,
    },
    AngleDelta {
        angle: String,
        delta: String,
    },
    AngleReasoningDelta {
        angle: String,
        delta: String,
    },
    AngleDone {
        angle: String,
    },
    AngleError {
        angle: String,
        #[serde(default)]
        message: String,
    },
    FinalStart,
    FinalDelta {
        delta: String,
    },
    FinalReasoningDelta {
        delta: String,
    },
    FinalDone {
        #[serde(default)]
        text_char_count: Option<u64>,
        #[serde(default)]
        model: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Wire name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::AngleDelta { .. } => "angle_delta",
            Self::AngleReasoningDelta { .. } => "angle_reasoning_delta",
            Self::AngleDone { .. } => "angle_done",
            Self::AngleError { .. } => "angle_error",
            Self::FinalStart => "final_start",
            Self::FinalDelta { .. } => "final_delta",
            Self::FinalReasoningDelta { .. } => "final_reasoning_delta",
            Self::FinalDone { .. } => "final_done",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_angle_done_ignores_extra_fields() {
        let evt: StreamEvent = serde_json::from_str(
            r#"{"event":"angle_done","angle":"Methods","rounds":["x"],"final":"x"}"#,
        )
        .unwrap();
        assert_eq!(
            evt,
            StreamEvent::AngleDone {
                angle: "Methods".to_string()
            }
        );
    }

    #[test]
    fn test_parse_final_done() {
        let evt: StreamEvent = serde_json::from_str(
            r#"{"event":"final_done","final_report":"r","text_char_count":1234,"model":"m","base_url":"u"}"#,
        )
        .unwrap();
        assert_eq!(
            evt,
            StreamEvent::FinalDone {
                text_char_count: Some(1234),
                model: Some("m".to_string())
            }
        );
    }

    #[test]
    fn test_parse_unknown_kind() {
        let evt: StreamEvent =
            serde_json::from_str(r#"{"event":"heartbeat","seq":3}"#).unwrap();
        assert_eq!(evt, StreamEvent::Unknown);
        assert_eq!(evt.kind(), "unknown");
    }

    #[test]
    fn test_parse_missing_field_is_error() {
        let res = serde_json::from_str::<StreamEvent>(r#"{"event":"angle_delta","angle":"A"}"#);
        assert!(res.is_err());
    }
}
