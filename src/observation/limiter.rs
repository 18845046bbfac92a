//! 输出限长：把字符串截到给定长度，并告知是否发生截断

/// 截断结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Limited {
    pub text: String,
    pub truncated: bool,
}

/// 输出限长器（可替换为按字节、按 token 等实现）
pub trait OutputLimiter: Send + Sync {
    fn limit(&self, text: &str, max_chars: usize) -> Limited;
}

/// 按字符数截断，不会切断 UTF-8 字符
#[derive(Clone, Copy, Debug, Default)]
pub struct CharLimiter;

impl OutputLimiter for CharLimiter {
    fn limit(&self, text: &str, max_chars: usize) -> Limited {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => Limited {
                text: text[..idx].to_string(),
                truncated: true,
            },
            None => Limited {
                text: text.to_string(),
                truncated: false,
            },
        }
    }
}
