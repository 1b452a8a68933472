//! OpenAI-compatible `/chat/completions` enrichment backend.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{EnrichmentClient, GenerationContext};
use crate::config::{ModelCatalog, ModelProfile};
use crate::core::{ArtifactContent, StepKind};
use crate::errors::{DigestError, Result};

#[allow(clippy::expect_used)]
static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Enrichment client that resolves the task's profile in a [`ModelCatalog`]
/// and sends one chat completion per step.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    catalog: ModelCatalog,
}

impl OpenAiCompatClient {
    /// Creates a client over the given profiles.
    #[must_use]
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            http: reqwest::Client::new(),
            catalog,
        }
    }

    /// Uses a preconfigured HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    async fn complete(&self, profile: &ModelProfile, system: &str, prompt: String) -> Result<String> {
        let url = format!("{}/chat/completions", profile.api_base.trim_end_matches('/'));
        let request = ChatRequest {
            model: &profile.model_name,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&profile.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DigestError::from_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed.into_content()
    }
}

impl ChatResponse {
    /// First choice's text. An empty reply is retried like a dropped one.
    fn into_content(self) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                DigestError::Transient("response carried no message content".to_string())
            })
    }
}

#[async_trait]
impl EnrichmentClient for OpenAiCompatClient {
    async fn generate(
        &self,
        step: StepKind,
        text: &str,
        context: &GenerationContext,
    ) -> Result<ArtifactContent> {
        let profile = self.catalog.find(&context.profile)?;
        debug!(%step, model = %profile.model_name, chars = text.len(), "Requesting completion");

        let reply = self
            .complete(profile, system_prompt(step), user_prompt(step, text, &context.resource_title))
            .await?;

        Ok(match step {
            StepKind::FullDocument => ArtifactContent::Markdown(reply),
            _ => ArtifactContent::Json(parse_step_response(step, &reply)),
        })
    }
}

/// Returns the body of the first fenced ```` ```json ```` block, or the
/// trimmed input when there is none.
#[must_use]
pub fn extract_json_block(reply: &str) -> &str {
    JSON_FENCE
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| reply.trim(), |m| m.as_str())
}

/// Parses a JSON step reply. Unparseable replies are kept verbatim under
/// `raw_response` next to the step's empty skeleton.
fn parse_step_response(step: StepKind, reply: &str) -> Value {
    match serde_json::from_str::<Value>(extract_json_block(reply)) {
        Ok(mut value) => {
            if step == StepKind::KeyPoints {
                if let Some(points) = value.get_mut("key_points").map(Value::take) {
                    return json!({ "key_points": points });
                }
            }
            value
        }
        Err(err) => {
            warn!(%step, error = %err, "Reply is not valid JSON, keeping raw text");
            let mut fallback = match step {
                StepKind::KeyPoints => json!({ "key_points": [] }),
                StepKind::Exercises => json!({ "multiple_choice": [], "short_answer": [] }),
                StepKind::Questions => json!({ "questions": [] }),
                StepKind::FullDocument => json!({}),
            };
            fallback["raw_response"] = Value::String(reply.to_string());
            fallback
        }
    }
}

fn system_prompt(step: StepKind) -> &'static str {
    match step {
        StepKind::KeyPoints => "你是一个专业的视频内容分析助手，擅长提取视频关键信息并进行结构化总结。",
        StepKind::FullDocument => "你是一个专业的学习内容整理助手，擅长将视频字幕整理成结构清晰、内容完整的学习文档。",
        StepKind::Exercises => "你是一个专业的教育测评专家，擅长根据学习内容设计高质量的练习题。",
        StepKind::Questions => "你是一个专业的教学设计专家，擅长设计能够引导学习者思考的启发性问题。",
    }
}

fn user_prompt(step: StepKind, text: &str, title: &str) -> String {
    let title_part = if title.is_empty() {
        String::new()
    } else {
        format!("视频标题：{title}\n\n")
    };

    match step {
        StepKind::KeyPoints => format!(
            "请分析以下视频字幕内容，提取关键要点并按时间节点总结。\n\n\
             要求：\n\
             1. 将视频划分为3-8个主要段落，每个段落提取一个要点\n\
             2. 时间节点格式为 \"MM:SS\"，取该段落开始时间\n\
             3. 标题精炼（10-20字），描述详细全面（100-300字）\n\
             4. 按时间顺序排列，输出格式严格如下：\n\n\
             ```json\n{{\"key_points\": [{{\"time\": \"00:07\", \"title\": \"要点标题\", \"description\": \"详细描述\"}}]}}\n```\n\n\
             字幕内容：\n{text}\n\n\
             请直接输出JSON格式的总结结果，不要包含其他说明文字。"
        ),
        StepKind::FullDocument => format!(
            "{title_part}请根据以下视频内容，编写一份详细、专业的教学文档（Markdown格式）。\
             这份文档将作为学习资料，要求内容完整、易于理解、适合自学。\n\n\
             视频内容：\n{text}\n\n\
             请直接输出Markdown文档。"
        ),
        StepKind::Exercises => format!(
            "{title_part}请根据以下视频学习内容，设计一套练习题，用于帮助学习者检验和巩固所学知识。\n\n\
             包含5道选择题和3道简答题，输出格式严格如下：\n\n\
             ```json\n{{\"multiple_choice\": [{{\"id\": 1, \"question\": \"题目\", \"options\": {{\"A\": \"\", \"B\": \"\", \"C\": \"\", \"D\": \"\"}}, \
             \"correct_answer\": \"A\", \"explanation\": \"解析\"}}], \
             \"short_answer\": [{{\"id\": 1, \"question\": \"题目\", \"answer_points\": [\"要点\"], \"reference_answer\": \"参考答案\"}}]}}\n```\n\n\
             学习内容：\n{text}\n\n\
             请严格按照JSON格式输出练习题，不要包含其他说明文字。"
        ),
        StepKind::Questions => format!(
            "{title_part}请根据以下视频内容，设计3个预设问题，用于引导观众思考视频的核心内容。\
             每个问题控制在15-25字以内。输出格式严格如下：\n\n\
             ```json\n{{\"questions\": [{{\"id\": 1, \"question\": \"问题？\", \"type\": \"总体把握\"}}]}}\n```\n\n\
             视频内容：\n{text}\n\n\
             请严格按照JSON格式输出3个预设问题，不要包含答案或其他说明文字。"
        ),
    }
}
