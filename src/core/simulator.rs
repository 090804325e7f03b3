//! Simulated Instrument
//!
//! A scriptable stand-in for a real device. Bytes written to it are split
//! into lines and checked against response rules; replies are fed back
//! through the attached driver handle as if they came off the wire.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::driver::DriverHandle;
use super::error::ConfigError;
use super::transport::{Connection, TransportError};

/// Response rule condition, checked against one written line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MatchCondition {
    /// Match exact bytes, line terminator included
    Exact {
        /// Expected bytes
        bytes: Vec<u8>,
    },
    /// Match text (substring)
    Text {
        /// Substring
        text: String,
        /// Compare case-sensitively
        case_sensitive: bool,
    },
    /// Match regex
    Regex {
        /// Pattern
        pattern: String,
    },
    /// Match any input
    Any,
}

impl MatchCondition {
    /// Compile into a line matcher, rejecting bad patterns
    pub fn compile(&self) -> Result<LineMatcher, ConfigError> {
        Ok(match self {
            Self::Exact { bytes } => LineMatcher::Exact(bytes.clone()),
            Self::Text { text, case_sensitive: true } => LineMatcher::Text(text.clone()),
            Self::Text { text, case_sensitive: false } => LineMatcher::TextIgnoreCase(text.to_lowercase()),
            Self::Regex { pattern } => LineMatcher::Regex(
                Regex::new(pattern)
                    .map_err(|source| ConfigError::InvalidPattern { name: "simulator rule".into(), source })?,
            ),
            Self::Any => LineMatcher::Any,
        })
    }
}

/// Compiled [`MatchCondition`]
#[derive(Debug, Clone)]
pub enum LineMatcher {
    /// Exact bytes
    Exact(Vec<u8>),
    /// Case-sensitive substring
    Text(String),
    /// Substring, stored lowercased
    TextIgnoreCase(String),
    /// Compiled pattern
    Regex(Regex),
    /// Anything
    Any,
}

impl LineMatcher {
    /// Check if a written line matches
    pub fn matches(&self, line: &[u8]) -> bool {
        match self {
            Self::Exact(bytes) => line == bytes.as_slice(),
            Self::Text(text) => String::from_utf8_lossy(line).contains(text.as_str()),
            Self::TextIgnoreCase(text) => String::from_utf8_lossy(line).to_lowercase().contains(text.as_str()),
            Self::Regex(re) => re.is_match(line),
            Self::Any => true,
        }
    }
}

/// Response action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseAction {
    /// Send fixed bytes
    Send {
        /// Reply bytes
        data: Vec<u8>,
    },
    /// Send text
    SendText {
        /// Reply text
        text: String,
    },
    /// Echo the line back
    Echo,
    /// No response
    None,
}

impl ResponseAction {
    fn reply(&self, line: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Send { data } => Some(data.clone()),
            Self::SendText { text } => Some(text.as_bytes().to_vec()),
            Self::Echo => Some(line.to_vec()),
            Self::None => None,
        }
    }
}

/// Response rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRule {
    /// Rule name
    pub name: String,
    /// Match condition
    pub condition: MatchCondition,
    /// Response actions, all sent in order
    pub actions: Vec<ResponseAction>,
    /// Enabled
    pub enabled: bool,
    /// One-shot (disable after first match)
    pub one_shot: bool,
    /// Match count
    #[serde(default)]
    pub match_count: u64,
}

impl ResponseRule {
    /// Echo every line
    pub fn echo(name: &str) -> Self {
        Self::new(name, MatchCondition::Any, vec![ResponseAction::Echo])
    }

    /// Reply with `response` to lines starting with `prefix`
    pub fn reply(name: &str, prefix: &str, response: &str) -> Self {
        Self::new(
            name,
            MatchCondition::Regex { pattern: format!("^{}", regex::escape(prefix)) },
            vec![ResponseAction::SendText { text: response.to_string() }],
        )
    }

    /// Create a rule
    pub fn new(name: &str, condition: MatchCondition, actions: Vec<ResponseAction>) -> Self {
        Self {
            name: name.to_string(),
            condition,
            actions,
            enabled: true,
            one_shot: false,
            match_count: 0,
        }
    }

    /// Disable after the first match
    #[must_use]
    pub fn once(mut self) -> Self {
        self.one_shot = true;
        self
    }
}

/// Simulated instrument
#[derive(Default)]
pub struct SimulatedInstrument {
    /// Response rules with their compiled conditions, first match wins
    rules: RwLock<Vec<(ResponseRule, LineMatcher)>>,
    /// Lines written by the driver
    sent: Mutex<Vec<Bytes>>,
    /// Partial line being written
    pending: Mutex<BytesMut>,
    /// Where replies go
    sink: RwLock<Option<DriverHandle>>,
}

impl SimulatedInstrument {
    /// Create a simulator with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response rule
    pub fn add_rule(&self, rule: ResponseRule) -> Result<(), ConfigError> {
        let matcher = rule.condition.compile()?;
        self.rules.write().push((rule, matcher));
        Ok(())
    }

    /// Remove rule by name
    pub fn remove_rule(&self, name: &str) {
        self.rules.write().retain(|(r, _)| r.name != name);
    }

    /// Get all rules
    pub fn rules(&self) -> Vec<ResponseRule> {
        self.rules.read().iter().map(|(r, _)| r.clone()).collect()
    }

    /// Deliver replies to `handle`
    pub fn attach(&self, handle: DriverHandle) {
        *self.sink.write() = Some(handle);
    }

    /// Stop delivering replies
    pub fn detach(&self) {
        *self.sink.write() = None;
    }

    /// Device-originated bytes, such as an unsolicited status line
    pub fn inject(&self, data: &[u8]) {
        if let Some(handle) = self.sink.read().as_ref() {
            handle.got_data(data);
        }
    }

    /// Complete lines written so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Complete lines written so far, as trimmed text
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|line| String::from_utf8_lossy(line).trim_end().to_string())
            .collect()
    }

    /// Number of written lines equal to `line` once trimmed
    pub fn count_sent(&self, line: &str) -> usize {
        self.sent_lines().iter().filter(|l| l.as_str() == line).count()
    }

    /// Forget written lines
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    fn respond(&self, line: &[u8]) -> Vec<Vec<u8>> {
        let mut replies = Vec::new();
        let mut rules = self.rules.write();
        if let Some((rule, _)) = rules.iter_mut().find(|(r, m)| r.enabled && m.matches(line)) {
            rule.match_count += 1;
            if rule.one_shot {
                rule.enabled = false;
            }
            trace!(rule = %rule.name, "simulator rule matched");
            replies.extend(rule.actions.iter().filter_map(|a| a.reply(line)));
        }
        replies
    }
}

#[async_trait]
impl Connection for SimulatedInstrument {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut lines = Vec::new();
        {
            let mut pending = self.pending.lock();
            pending.extend_from_slice(data);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                lines.push(pending.split_to(pos + 1).freeze());
            }
        }

        for line in lines {
            self.sent.lock().push(line.clone());
            for reply in self.respond(&line) {
                self.inject(&reply);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(condition: MatchCondition, line: &[u8]) -> bool {
        condition.compile().unwrap().matches(line)
    }

    #[test]
    fn test_conditions() {
        assert!(matches(MatchCondition::Any, b"x"));
        assert!(matches(MatchCondition::Exact { bytes: b"DATA_ON\r\n".to_vec() }, b"DATA_ON\r\n"));
        assert!(matches(MatchCondition::Text { text: "data_on".into(), case_sensitive: false }, b"DATA_ON\r\n"));
        assert!(!matches(MatchCondition::Text { text: "data_on".into(), case_sensitive: true }, b"DATA_ON\r\n"));
        assert!(matches(MatchCondition::Regex { pattern: "^LEVEL_(ON|OFF)".into() }, b"LEVEL_OFF\r\n"));
        assert!(!matches(MatchCondition::Regex { pattern: "^LEVEL_(ON|OFF)".into() }, b"DATA_ON\r\n"));
    }

    #[test]
    fn test_bad_pattern_fails_compile() {
        let err = MatchCondition::Regex { pattern: "LEVEL_(".into() }.compile().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_invalid_rule_pattern() {
        let sim = SimulatedInstrument::new();
        let rule = ResponseRule::new("bad", MatchCondition::Regex { pattern: "(".into() }, vec![]);
        assert!(sim.add_rule(rule).is_err());
    }

    #[tokio::test]
    async fn test_lines_split_across_writes() {
        let sim = SimulatedInstrument::new();
        sim.add_rule(ResponseRule::echo("echo")).unwrap();
        sim.send(b"DA").await.unwrap();
        assert!(sim.sent().is_empty());
        sim.send(b"TA_ON\r\nSTA").await.unwrap();
        assert_eq!(sim.sent_lines(), vec!["DATA_ON".to_string()]);
        assert_eq!(sim.count_sent("DATA_ON"), 1);
        assert_eq!(sim.rules()[0].match_count, 1);
    }

    #[tokio::test]
    async fn test_one_shot_rule() {
        let sim = SimulatedInstrument::new();
        sim.add_rule(ResponseRule::reply("status", "STATUS", "DATA_OFF\r\n").once()).unwrap();
        sim.send(b"STATUS\r\n").await.unwrap();
        sim.send(b"STATUS\r\n").await.unwrap();
        let rules = sim.rules();
        assert_eq!(rules[0].match_count, 1);
        assert!(!rules[0].enabled);
    }
}
