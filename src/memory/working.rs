//! 工作记忆摘要：跨回合携带的有界 key → value 事实表
//!
//! 每回合把 Observation 的关键事实折叠进来；超出容量时，最旧、更新最少的条目
//! 被压缩成一条决策日志（decision log），而不是直接丢弃。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 压缩日志中每个值的最大字符数
const LOG_VALUE_CHARS: usize = 40;
/// 压缩日志中最多展示的条目数
const LOG_SHOWN_ENTRIES: usize = 3;

/// 摘要容量限制
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DigestLimits {
    pub max_entries: usize,
    pub max_log: usize,
}

impl Default for DigestLimits {
    fn default() -> Self {
        Self {
            max_entries: 32,
            max_log: 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub value: String,
    /// 最近一次写入的回合
    pub turn: u32,
    /// 被写入次数，作为显著性
    pub updates: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingMemory {
    entries: BTreeMap<String, DigestEntry>,
    decision_log: Vec<String>,
    /// 因日志超长而合并掉的旧日志条数
    elided_log_entries: usize,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.decision_log.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.as_str(), e.value.as_str()))
    }

    pub fn decision_log(&self) -> &[String] {
        &self.decision_log
    }

    pub fn elided_log_entries(&self) -> usize {
        self.elided_log_entries
    }

    /// 折叠新事实；超出 max_entries 时压缩最旧条目
    pub fn fold<I>(&mut self, facts: I, turn: u32, limits: DigestLimits)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in facts {
            self.entries
                .entry(key)
                .and_modify(|e| {
                    e.value = value.clone();
                    e.turn = turn;
                    e.updates += 1;
                })
                .or_insert(DigestEntry {
                    value,
                    turn,
                    updates: 1,
                });
        }
        self.compress(limits);
    }

    /// 追加一条决策日志
    pub fn log(&mut self, bullet: impl Into<String>, limits: DigestLimits) {
        self.decision_log.push(bullet.into());
        let max_log = limits.max_log.max(1);
        if self.decision_log.len() > max_log {
            let overflow = self.decision_log.len() - max_log;
            self.decision_log.drain(..overflow);
            self.elided_log_entries += overflow;
        }
    }

    fn compress(&mut self, limits: DigestLimits) {
        if self.entries.len() <= limits.max_entries {
            return;
        }
        let excess = self.entries.len() - limits.max_entries;

        let mut ranked: Vec<(&String, &DigestEntry)> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            a.1.turn
                .cmp(&b.1.turn)
                .then(a.1.updates.cmp(&b.1.updates))
                .then(a.0.cmp(b.0))
        });
        let victims: Vec<(String, DigestEntry)> = ranked
            .into_iter()
            .take(excess)
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();

        for (key, _) in &victims {
            self.entries.remove(key);
        }
        let bullet = compress_bullet(&victims);
        self.log(bullet, limits);
    }

    /// 构建供 Planner 使用的 Prompt 片段
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        if !self.entries.is_empty() {
            s.push_str("## Working memory\n");
            for (k, e) in &self.entries {
                s.push_str(&format!("- {} = {}\n", k, e.value));
            }
            s.push('\n');
        }
        if !self.decision_log.is_empty() {
            s.push_str("## Decision log\n");
            if self.elided_log_entries > 0 {
                s.push_str(&format!(
                    "- ({} earlier entries elided)\n",
                    self.elided_log_entries
                ));
            }
            for b in &self.decision_log {
                s.push_str(&format!("- {}\n", b));
            }
            s.push('\n');
        }
        s
    }
}

fn compress_bullet(victims: &[(String, DigestEntry)]) -> String {
    let first = victims.iter().map(|(_, e)| e.turn).min().unwrap_or(0);
    let last = victims.iter().map(|(_, e)| e.turn).max().unwrap_or(0);
    let turns = if first == last {
        format!("turn {first}")
    } else {
        format!("turns {first}-{last}")
    };
    let shown: Vec<String> = victims
        .iter()
        .take(LOG_SHOWN_ENTRIES)
        .map(|(k, e)| format!("{}={}", k, clip(&e.value)))
        .collect();
    let mut bullet = format!(
        "compressed {} fact(s) from {}: {}",
        victims.len(),
        turns,
        shown.join(", ")
    );
    if victims.len() > LOG_SHOWN_ENTRIES {
        bullet.push_str(&format!(" (+{} more)", victims.len() - LOG_SHOWN_ENTRIES));
    }
    bullet
}

fn clip(value: &str) -> String {
    if value.chars().count() > LOG_VALUE_CHARS {
        format!("{}...", value.chars().take(LOG_VALUE_CHARS).collect::<String>())
    } else {
        value.to_string()
    }
}
