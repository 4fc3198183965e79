//! Textual content heuristics shared by parsers.
//!
//! Export tools flatten non-text messages into bracket markers
//! (`[图片]`, `[红包]`, …). When a format carries no structured type,
//! or labels a message plain text that is clearly a marker, these
//! heuristics recover the intended type.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::MessageType;

static BRACKET_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\[\]:]+)(?::[^\[\]]*)?\]$").expect("valid marker regex"));

/// Classify content by marker and keyword. Returns `None` when the text
/// carries no type hint.
pub fn classify_content(content: &str) -> Option<MessageType> {
    let trimmed = content.trim();
    if let Some(caps) = BRACKET_MARKER.captures(trimmed) {
        let label = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if let Some(t) = marker_type(label) {
            return Some(t);
        }
    }
    if trimmed.contains("红包") {
        return Some(MessageType::RedPacket);
    }
    if trimmed.contains("拍了拍") {
        return Some(MessageType::Poke);
    }
    None
}

fn marker_type(label: &str) -> Option<MessageType> {
    let t = match label {
        "图片" | "照片" | "动画表情图片" => MessageType::Image,
        "语音" => MessageType::Voice,
        "视频" => MessageType::Video,
        "文件" => MessageType::File,
        "表情" | "动画表情" => MessageType::Emoji,
        "链接" | "分享链接" => MessageType::Link,
        "位置" => MessageType::Location,
        "红包" | "QQ红包" => MessageType::RedPacket,
        "转账" => MessageType::Transfer,
        "拍一拍" => MessageType::Poke,
        "语音通话" | "视频通话" => MessageType::Call,
        "分享" | "小程序" => MessageType::Share,
        "合并转发" | "聊天记录" => MessageType::Forward,
        "名片" | "联系人" => MessageType::Contact,
        "系统消息" => MessageType::System,
        _ => return None,
    };
    Some(t)
}

/// Whether the content is a pure bracket marker (used by the
/// catchphrase analysis to skip placeholder text).
pub fn is_pure_marker(content: &str) -> bool {
    BRACKET_MARKER.is_match(content.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_classify() {
        assert_eq!(classify_content("[图片]"), Some(MessageType::Image));
        assert_eq!(classify_content("[图片: a.jpg]"), Some(MessageType::Image));
        assert_eq!(classify_content("[转账]"), Some(MessageType::Transfer));
        assert_eq!(classify_content("[语音通话]"), Some(MessageType::Call));
    }

    #[test]
    fn keywords_classify() {
        assert_eq!(classify_content("恭喜发财，红包拿来"), Some(MessageType::RedPacket));
        assert_eq!(classify_content("小明 拍了拍 小红"), Some(MessageType::Poke));
    }

    #[test]
    fn plain_text_stays_untyped() {
        assert_eq!(classify_content("吃了吗"), None);
        assert_eq!(classify_content("brackets [inside] text"), None);
    }
}
