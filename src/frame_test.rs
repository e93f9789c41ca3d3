use super::*;

#[test]
fn request_sets_fields() {
    let frame = Frame::request("join_session", Data::new());
    assert_eq!(frame.event, "join_session");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.session_id.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn reply_inherits_context() {
    let req = Frame::request("toggle_lockmode", Data::new()).with_session_id("R1");
    let done = req.done_with(ack("broadcasted"));

    assert_eq!(done.parent_id, Some(req.id));
    assert_eq!(done.session_id.as_deref(), Some("R1"));
    assert_eq!(done.event, "toggle_lockmode");
    assert_eq!(done.status, Status::Done);
    assert_eq!(done.data.get("status").and_then(|v| v.as_str()), Some("broadcasted"));
}

#[test]
fn terminal_statuses() {
    assert!(Status::Done.is_terminal());
    assert!(Status::Error.is_terminal());
    assert!(!Status::Request.is_terminal());
}

#[test]
fn minimal_inbound_frame_gets_defaults() {
    let raw = r#"{"event":"join_session","data":{"session_id":"R1"}}"#;
    let frame: Frame = serde_json::from_str(raw).expect("minimal frame should parse");

    assert_eq!(frame.event, "join_session");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.ts > 0);
    assert_eq!(frame.data.get("session_id").and_then(|v| v.as_str()), Some("R1"));
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("not authorized")]
    struct Denied;

    impl ErrorCode for Denied {
        fn error_code(&self) -> &'static str {
            "E_NOT_AUTHORIZED"
        }
    }

    let req = Frame::request("kick_student", Data::new());
    let err = req.error_from(&Denied);

    assert_eq!(err.status, Status::Error);
    assert_eq!(err.parent_id, Some(req.id));
    assert_eq!(err.data.get("code").and_then(|v| v.as_str()), Some("E_NOT_AUTHORIZED"));
    assert_eq!(err.data.get("error").and_then(|v| v.as_str()), Some("not authorized"));
}

#[test]
fn session_id_omitted_when_absent() {
    let frame = Frame::request("connected", Data::new());
    let json = serde_json::to_value(&frame).expect("serialize");
    assert!(json.get("session_id").is_none());
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("request"));
}
