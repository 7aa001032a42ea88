use crate::error::RelayError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Aws,
    Xai,
    Zhipu,
    Ali,
    OpenaiCompatible,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Aws => "aws",
            ChannelType::Xai => "xai",
            ChannelType::Zhipu => "zhipu",
            ChannelType::Ali => "ali",
            ChannelType::OpenaiCompatible => "openai_compatible",
        }
    }
}

/// Wire contract an OpenAI-compatible upstream expects.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelApiFormat {
    #[default]
    ChatCompletion,
    Response,
}

impl ChannelApiFormat {
    /// Unknown or blank input degrades to `ChatCompletion`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "response" | "responses" | "response_api" | "responseapi" => Self::Response,
            "chat_completion" | "chat-completion" | "chat" | "chatcompletion" => {
                Self::ChatCompletion
            }
            _ => Self::ChatCompletion,
        }
    }
}

pub fn use_response_api(raw: &str) -> bool {
    ChannelApiFormat::normalize(raw) == ChannelApiFormat::Response
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub base_url: Option<String>,
    pub api_key: String,
    /// Free text, normalized through [`ChannelApiFormat::normalize`].
    #[serde(default)]
    pub api_format: Option<String>,
    /// Glob patterns (`*`, `?`) restricting the models served; empty serves all.
    #[serde(default)]
    pub models: ModelPatterns,
}

impl ChannelConfig {
    pub fn api_format(&self) -> ChannelApiFormat {
        ChannelApiFormat::normalize(self.api_format.as_deref().unwrap_or(""))
    }

    pub fn serves_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.matches(model)
    }
}

/// Model globs compiled once when the channel is loaded.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct ModelPatterns(Vec<Regex>);

impl ModelPatterns {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .map(|pattern| glob_regex(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn matches(&self, model: &str) -> bool {
        self.0.iter().any(|re| re.is_match(model))
    }
}

impl TryFrom<Vec<String>> for ModelPatterns {
    type Error = regex::Error;

    fn try_from(patterns: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(patterns)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelsFile {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

pub fn load_channels(path: &Path) -> Result<Vec<ChannelConfig>, RelayError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| RelayError::Config(format!("read {}: {err}", path.display())))?;
    parse_channels(&raw)
}

pub fn parse_channels(raw: &str) -> Result<Vec<ChannelConfig>, RelayError> {
    let file: ChannelsFile = serde_json::from_str(raw)
        .map_err(|err| RelayError::Config(format!("channels file: {err}")))?;
    let mut seen = std::collections::HashSet::new();
    for channel in &file.channels {
        if !seen.insert(channel.id.as_str()) {
            return Err(RelayError::Config(format!(
                "duplicate channel id {}",
                channel.id
            )));
        }
    }
    Ok(file.channels)
}

/// `*` matches any run of characters and `?` exactly one; the rest is literal.
fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 2);
    source.push('^');
    let mut literal = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut literal))),
        }
    }
    source.push('$');
    Regex::new(&source)
}
