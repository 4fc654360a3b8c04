use super::*;

#[test]
fn next_id_uses_prefix_and_is_unique() {
    let a = next_id("evt");
    let b = next_id("evt");
    assert!(a.starts_with("evt_"));
    assert_ne!(a, b);
}

#[test]
fn seal_stamps_missing_timestamp_and_keeps_existing() {
    let sealed = Envelope::seal(Message::new("x"));
    assert!(sealed.timestamp() > 0);
    assert!(sealed.id.starts_with("evt_"));

    let mut message = Message::new("x");
    message.meta.timestamp = Some(42);
    assert_eq!(Envelope::seal(message).timestamp(), 42);
}

#[test]
fn reply_markers_are_type_suffix_or_flag() {
    let by_type = Envelope::seal(Message::new("plugin/query/reply"));
    assert!(by_type.is_reply());

    let mut flagged = Message::new("plugin/answer");
    flagged.meta.is_reply = true;
    assert!(Envelope::seal(flagged).is_reply());

    assert!(!Envelope::seal(Message::new("plugin/query")).is_reply());
}

#[test]
fn reply_to_copies_correlation_and_addresses_source() {
    let mut request = Message::new("plugin/query").from("GoldSnapshot");
    request.meta.correlation_id = Some("corr_1_1".to_owned());
    let request = Envelope::seal(request);

    let reply = Message::reply_to(&request, "plugin/answer");
    assert_eq!(reply.meta.correlation_id.as_deref(), Some("corr_1_1"));
    assert!(reply.meta.is_reply);
    assert_eq!(reply.target, Some(Endpoint::new("GoldSnapshot")));
}

#[test]
fn envelope_serializes_with_console_field_names() {
    let mut message = Message::new("drawer/open")
        .from("ChatApp")
        .to("PortalPlugin")
        .with_payload(serde_json::json!({"plugin": "scheduler"}))
        .with_meta("trace", serde_json::json!("t-1"));
    message.meta.correlation_id = Some("corr_9".to_owned());
    message.meta.is_reply = true;

    let json = serde_json::to_value(Envelope::seal(message)).expect("serialize");
    assert_eq!(json["type"], "drawer/open");
    assert_eq!(json["source"]["component"], "ChatApp");
    assert_eq!(json["target"]["component"], "PortalPlugin");
    assert_eq!(json["meta"]["correlationId"], "corr_9");
    assert_eq!(json["meta"]["isReply"], true);
    assert_eq!(json["meta"]["trace"], "t-1");
}

#[test]
fn message_deserializes_without_optional_fields() {
    let message: Message = serde_json::from_str(r#"{"type":"aiden/tags.add"}"#).expect("parse");
    assert_eq!(message.kind, "aiden/tags.add");
    assert!(message.source.is_none());
    assert!(message.payload.is_null());
    assert!(!message.meta.is_reply);
}
