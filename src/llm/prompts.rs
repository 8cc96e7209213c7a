//! Fixed texts sent to, or standing in for, the completion service

/// System instruction opening every context window
pub const SYSTEM_PROMPT: &str = "你是一个友善、有帮助的AI助手。请用中文回复，回答要简洁明了。";

/// Reply used when the service answers without any content
pub const EMPTY_REPLY: &str = "抱歉，我没有收到有效的回复。";

/// Reply used when the service cannot be reached or answers with an error
pub const FALLBACK_REPLY: &str = "抱歉，我暂时无法连接到服务器，请稍后再试。";
