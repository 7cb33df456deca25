//! Read-only text projection of a session snapshot.

use std::fmt::Write;
use std::sync::Arc;

use super::history::HISTORY_KEY;
use super::state::StateValue;
use super::traits::{Session, SessionError, SessionIdentity, SessionStore};
use crate::observability::{TelemetryEvent, TelemetrySink};

/// Responses longer than this many characters are shortened for display.
pub const MAX_RESPONSE_CHARS: usize = 70;

const ELLIPSIS: &str = "...";
const USER_NAME_KEY: &str = "user_name";
const PURCHASED_KEY: &str = "purchased_courses";
const USER_QUERY_ACTION: &str = "user_query";
const AGENT_RESPONSE_ACTION: &str = "agent_response";

/// Shorten `text` to at most [`MAX_RESPONSE_CHARS`] characters, ending in `...` when cut.
pub fn truncate_response(text: &str) -> String {
    if text.chars().count() <= MAX_RESPONSE_CHARS {
        return text.to_string();
    }
    let keep = MAX_RESPONSE_CHARS - ELLIPSIS.len();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Format a session for a human.
pub fn render(session: &Session, label: &str) -> Result<String, SessionError> {
    let mut out = String::new();
    write_session(&mut out, session, label).map_err(|e| SessionError::Render(e.to_string()))?;
    Ok(out)
}

fn write_session(out: &mut String, session: &Session, label: &str) -> std::fmt::Result {
    let state = &session.state;
    writeln!(out, "{} {label} {}", "-".repeat(10), "-".repeat(10))?;

    let user_name = state
        .get(USER_NAME_KEY)
        .map_or_else(|| "Unknown".to_string(), ToString::to_string);
    writeln!(out, "User: {user_name}")?;

    let courses: Vec<&StateValue> = state
        .get(PURCHASED_KEY)
        .and_then(StateValue::as_list)
        .map(|items| items.iter().filter(|c| !c.is_empty_like()).collect())
        .unwrap_or_default();
    if courses.is_empty() {
        writeln!(out, "Courses: None")?;
    } else {
        writeln!(out, "Courses:")?;
        for course in courses {
            match course.as_map() {
                Some(map) => {
                    let id = map.get("id").map_or_else(|| "Unknown".into(), ToString::to_string);
                    let date = map
                        .get("purchase_date")
                        .map_or_else(|| "Unknown date".into(), ToString::to_string);
                    writeln!(out, "  - {id} (purchased on {date})")?;
                }
                None => writeln!(out, "  - {course}")?,
            }
        }
    }

    let history = state
        .get(HISTORY_KEY)
        .and_then(StateValue::as_list)
        .unwrap_or_default();
    if history.is_empty() {
        writeln!(out, "Interaction History: None")?;
    } else {
        writeln!(out, "Interaction History:")?;
        for (idx, item) in history.iter().enumerate() {
            write_history_item(out, idx + 1, item)?;
        }
    }

    write!(out, "{}", "-".repeat(22 + label.chars().count()))
}

/// Maps are read field by field so partial entries still render; maps with an
/// unrecognised `action` are skipped and non-map items are printed as-is.
fn write_history_item(out: &mut String, idx: usize, item: &StateValue) -> std::fmt::Result {
    let Some(map) = item.as_map() else {
        return writeln!(out, "  {idx}. {item}");
    };
    let field = |key: &str, fallback: &str| {
        map.get(key)
            .map_or_else(|| fallback.to_string(), ToString::to_string)
    };
    let ts = field("timestamp", "unknown time");

    match map.get("action").and_then(StateValue::as_str) {
        Some(USER_QUERY_ACTION) => {
            let query = field("query", "");
            writeln!(out, "  {idx}. User query at {ts}: \"{query}\"")
        }
        Some(AGENT_RESPONSE_ACTION) => {
            let agent = field("agent", "unknown");
            let response = truncate_response(&field("response", ""));
            writeln!(out, "  {idx}. {agent} response at {ts}: \"{response}\"")
        }
        _ => Ok(()),
    }
}

/// Fetches sessions and renders them, reporting failures instead of raising them.
pub struct SessionView {
    store: Arc<dyn SessionStore>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SessionView {
    pub fn new(store: Arc<dyn SessionStore>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { store, telemetry }
    }

    /// Render the current snapshot of `identity`, or `None` if that failed.
    pub async fn render_session(&self, identity: &SessionIdentity, label: &str) -> Option<String> {
        let result = match self.store.get(identity).await {
            Ok(session) => render(&session, label),
            Err(e) => Err(e),
        };
        match result {
            Ok(text) => Some(text),
            Err(e) => {
                self.telemetry.report(TelemetryEvent::RenderFailed {
                    identity: identity.clone(),
                    label: label.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemorySink;
    use crate::sessions::state::state_from_json;
    use crate::sessions::InMemorySessionStore;
    use chrono::Utc;
    use serde_json::json;

    fn session(state: serde_json::Value) -> Session {
        Session {
            identity: SessionIdentity::new("Bot", "u1", "s1"),
            state: state_from_json(state).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn truncates_long_responses_to_67_plus_ellipsis() {
        let long = "a".repeat(100);
        let shown = truncate_response(&long);
        assert_eq!(shown, format!("{}...", "a".repeat(67)));
        assert_eq!(shown.chars().count(), 70);
    }

    #[test]
    fn short_responses_are_unchanged() {
        let exact = "b".repeat(70);
        assert_eq!(truncate_response(&exact), exact);
        assert_eq!(truncate_response("hello"), "hello");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "é".repeat(71);
        let shown = truncate_response(&text);
        assert!(shown.starts_with(&"é".repeat(67)));
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn renders_empty_session_with_defaults() {
        let text = render(&session(json!({})), "Current State").unwrap();
        assert_eq!(
            text,
            "---------- Current State ----------\n\
             User: Unknown\n\
             Courses: None\n\
             Interaction History: None\n\
             -----------------------------------"
        );
    }

    #[test]
    fn renders_courses_and_history_in_order() {
        let long = "x".repeat(100);
        let text = render(
            &session(json!({
                "user_name": "Alice",
                "purchased_courses": [
                    {"id": "ai_marketing_platform", "purchase_date": "2025-04-01"},
                    "",
                    "legacy_course",
                    {"id": "no_date"}
                ],
                "interaction_history": [
                    {"action": "user_query", "query": "hi", "timestamp": "2025-04-01 10:00:00"},
                    {"action": "agent_response", "agent": "qa_agent", "response": long, "timestamp": "2025-04-01 10:00:01"},
                    "free-form note"
                ]
            })),
            "State AFTER processing",
        )
        .unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "User: Alice");
        assert_eq!(lines[2], "Courses:");
        assert_eq!(lines[3], "  - ai_marketing_platform (purchased on 2025-04-01)");
        assert_eq!(lines[4], "  - legacy_course");
        assert_eq!(lines[5], "  - no_date (purchased on Unknown date)");
        assert_eq!(lines[6], "Interaction History:");
        assert_eq!(lines[7], "  1. User query at 2025-04-01 10:00:00: \"hi\"");
        assert_eq!(
            lines[8],
            format!(
                "  2. qa_agent response at 2025-04-01 10:00:01: \"{}...\"",
                "x".repeat(67)
            )
        );
        assert_eq!(lines[9], "  3. free-form note");
        assert_eq!(lines[10].len(), 22 + "State AFTER processing".len());
    }

    #[test]
    fn partial_history_entries_fall_back_per_field() {
        let text = render(
            &session(json!({
                "interaction_history": [
                    {"action": "user_query"},
                    {"action": "agent_response", "response": "ok"},
                    {"action": "tool_call", "tool": "search"},
                    42
                ]
            })),
            "S",
        )
        .unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[3], "Interaction History:");
        assert_eq!(lines[4], "  1. User query at unknown time: \"\"");
        assert_eq!(lines[5], "  2. unknown response at unknown time: \"ok\"");
        assert_eq!(lines[6], "  4. 42");
        assert!(!text.contains("tool_call"));
    }

    #[test]
    fn all_empty_courses_render_as_none() {
        let text = render(&session(json!({"purchased_courses": ["", ""]})), "S").unwrap();
        assert!(text.contains("Courses: None"));
    }

    #[tokio::test]
    async fn render_session_reports_missing_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let sink = Arc::new(MemorySink::new());
        let view = SessionView::new(store, sink.clone());

        let rendered = view
            .render_session(&SessionIdentity::new("Bot", "u1", "gone"), "Current State")
            .await;

        assert!(rendered.is_none());
        assert!(matches!(
            sink.events().as_slice(),
            [TelemetryEvent::RenderFailed { label, .. }] if label == "Current State"
        ));
    }

    #[tokio::test]
    async fn render_session_does_not_mutate() {
        let store = Arc::new(InMemorySessionStore::new());
        let identity = SessionIdentity::new("Bot", "u1", "s1");
        store
            .create(&identity, state_from_json(json!({"user_name": "Alice"})).unwrap())
            .await
            .unwrap();
        let view = SessionView::new(store.clone(), Arc::new(MemorySink::new()));

        let text = view.render_session(&identity, "Current State").await.unwrap();
        assert!(text.contains("User: Alice"));
        assert_eq!(store.get(&identity).await.unwrap().version, 1);
    }
}
