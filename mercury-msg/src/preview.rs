use mercury_core::types::{
    MSG_TYPE_AUDIO, MSG_TYPE_FILE, MSG_TYPE_IMAGE, MSG_TYPE_LOCATION, MSG_TYPE_TEXT,
    MSG_TYPE_VIDEO,
};

const PREVIEW_MAX_CHARS: usize = 20;

/// Build the last-message preview JSON stored on conversation rows and
/// passed through to clients: `{"sender_uuid": ..., "preview": ...}`.
///
/// Text previews keep the first 20 characters (with a `...` suffix when
/// truncated); other bubble types collapse to a placeholder literal.
pub fn build_preview(sender_uuid: &str, msg_type: i16, content: &serde_json::Value) -> String {
    let preview = match msg_type {
        MSG_TYPE_TEXT => truncate_text(content.get("text").and_then(|v| v.as_str()).unwrap_or("")),
        MSG_TYPE_IMAGE => "[图片]".to_string(),
        MSG_TYPE_AUDIO => "[语音]".to_string(),
        MSG_TYPE_VIDEO => "[视频]".to_string(),
        MSG_TYPE_FILE => "[文件]".to_string(),
        MSG_TYPE_LOCATION => "[位置]".to_string(),
        _ => String::new(),
    };

    serde_json::json!({
        "sender_uuid": sender_uuid,
        "preview": preview,
    })
    .to_string()
}

fn truncate_text(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
