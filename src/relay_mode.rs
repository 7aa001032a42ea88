use serde::Serialize;

/// Semantic operation behind an inbound request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    Realtime,
    Proxy,
    ResponseApi,
    ClaudeMessages,
    ChatCompletions,
    Completions,
    Embeddings,
    Rerank,
    Moderations,
    ImagesGenerations,
    Edits,
    AudioSpeech,
    AudioTranscription,
    AudioTranslation,
    ImagesEdits,
    Unknown,
}

impl RelayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Proxy => "proxy",
            Self::ResponseApi => "response_api",
            Self::ClaudeMessages => "claude_messages",
            Self::ChatCompletions => "chat_completions",
            Self::Completions => "completions",
            Self::Embeddings => "embeddings",
            Self::Rerank => "rerank",
            Self::Moderations => "moderations",
            Self::ImagesGenerations => "images_generations",
            Self::Edits => "edits",
            Self::AudioSpeech => "audio_speech",
            Self::AudioTranscription => "audio_transcription",
            Self::AudioTranslation => "audio_translation",
            Self::ImagesEdits => "images_edits",
            Self::Unknown => "unknown",
        }
    }
}

enum Rule {
    Prefix(&'static str),
    Suffix(&'static str),
}

impl Rule {
    fn matches(&self, path: &str) -> bool {
        match self {
            Rule::Prefix(p) => path.starts_with(p),
            Rule::Suffix(s) => path.ends_with(s),
        }
    }
}

// First match wins. Suffix rules catch providers that mount embeddings and
// rerank under non-standard prefixes.
const RULES: &[(&[Rule], RelayMode)] = &[
    (&[Rule::Prefix("/v1/realtime")], RelayMode::Realtime),
    (&[Rule::Prefix("/v1/oneapi/proxy")], RelayMode::Proxy),
    (&[Rule::Prefix("/v1/responses")], RelayMode::ResponseApi),
    (&[Rule::Prefix("/v1/messages")], RelayMode::ClaudeMessages),
    (&[Rule::Prefix("/v1/chat/completions")], RelayMode::ChatCompletions),
    (&[Rule::Prefix("/v1/completions")], RelayMode::Completions),
    (
        &[Rule::Prefix("/v1/embeddings"), Rule::Suffix("embeddings")],
        RelayMode::Embeddings,
    ),
    (
        &[
            Rule::Prefix("/v1/rerank"),
            Rule::Suffix("/rerank"),
            Rule::Suffix("/rerankers"),
        ],
        RelayMode::Rerank,
    ),
    (&[Rule::Prefix("/v1/moderations")], RelayMode::Moderations),
    (
        &[Rule::Prefix("/v1/images/generations")],
        RelayMode::ImagesGenerations,
    ),
    (&[Rule::Prefix("/v1/edits")], RelayMode::Edits),
    (&[Rule::Prefix("/v1/audio/speech")], RelayMode::AudioSpeech),
    (
        &[Rule::Prefix("/v1/audio/transcriptions")],
        RelayMode::AudioTranscription,
    ),
    (
        &[Rule::Prefix("/v1/audio/translations")],
        RelayMode::AudioTranslation,
    ),
    (&[Rule::Prefix("/v1/images/edits")], RelayMode::ImagesEdits),
];

/// Resolve a request path to its operation. Any query string is ignored.
pub fn classify(path: &str) -> RelayMode {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    RULES
        .iter()
        .find(|(rules, _)| rules.iter().any(|rule| rule.matches(path)))
        .map(|(_, mode)| *mode)
        .unwrap_or(RelayMode::Unknown)
}
