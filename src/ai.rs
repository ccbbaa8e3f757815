// Text generation client
// Thin wrapper over the backend's serverless functions. Each call is a single
// POST {base}/functions/v1/<name>; failures are returned as-is, no retry.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::error::AiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePeriod {
    pub start: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysis {
    #[serde(default)]
    pub suggested_tags: Vec<String>,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(default)]
    pub people_mentioned: Vec<String>,
    pub time_period: Option<TimePeriod>,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSuggestion {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub suggested_images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoirChapter {
    pub title: String,
    pub introduction: String,
    pub content: String,
    #[serde(default)]
    pub stories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Formal,
    Casual,
    Nostalgic,
}

/// Optional hints for a new story prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_period: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub people: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub themes: Vec<String>,
}

#[derive(Deserialize)]
struct PromptResponse {
    prompt: String,
}

#[derive(Deserialize)]
struct MemoirResponse {
    chapters: Vec<MemoirChapter>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    images: Vec<String>,
}

#[derive(Deserialize)]
struct SimilarResponse {
    stories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FunctionsClient {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl FunctionsClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        FunctionsClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backend_url(), &config.backend.anon_key)
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub async fn analyze_content(&self, text: &str) -> Result<AiAnalysis, AiError> {
        self.invoke("analyze-content", json!({ "text": text })).await
    }

    pub async fn generate_prompt(&self, context: Option<&PromptContext>) -> Result<String, AiError> {
        let response: PromptResponse = self
            .invoke("generate-prompt", json!({ "context": context }))
            .await?;
        Ok(response.prompt)
    }

    pub async fn generate_chapter(
        &self,
        stories: &[String],
        theme: Option<&str>,
    ) -> Result<ChapterSuggestion, AiError> {
        self.invoke("generate-chapter", json!({ "stories": stories, "theme": theme }))
            .await
    }

    pub async fn generate_memoir(
        &self,
        stories: &[String],
        chapter_count: u32,
        tone: Tone,
    ) -> Result<Vec<MemoirChapter>, AiError> {
        let response: MemoirResponse = self
            .invoke(
                "generate-memoir",
                json!({ "stories": stories, "chapterCount": chapter_count, "tone": tone }),
            )
            .await?;
        Ok(response.chapters)
    }

    pub async fn suggest_images(&self, text: &str) -> Result<Vec<String>, AiError> {
        let response: ImagesResponse = self.invoke("suggest-images", json!({ "text": text })).await?;
        Ok(response.images)
    }

    pub async fn find_similar_stories(&self, story_id: &str) -> Result<Vec<String>, AiError> {
        let response: SimilarResponse = self
            .invoke("find-similar-stories", json!({ "storyId": story_id }))
            .await?;
        Ok(response.stories)
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        function: &str,
        body: serde_json::Value,
    ) -> Result<T, AiError> {
        let url = format!("{}/functions/v1/{}", self.base_url, function);
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(function, status = status.as_u16(), "Function call failed");
            return Err(AiError::Status {
                function: function.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn analyze_content_posts_text_and_parses_camel_case() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/analyze-content"))
            .and(header("apikey", "anon"))
            .and(body_json(json!({ "text": "We moved to Leeds in 1962" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "suggestedTags": ["moving"],
                "emotions": ["hope"],
                "peopleMentioned": [],
                "timePeriod": { "start": 1962 },
                "suggestedQuestions": ["Why Leeds?"]
            })))
            .mount(&server)
            .await;

        let client = FunctionsClient::new(&server.uri(), "anon");
        let analysis = client
            .analyze_content("We moved to Leeds in 1962")
            .await
            .unwrap();

        assert_eq!(analysis.suggested_tags, vec!["moving"]);
        assert_eq!(
            analysis.time_period,
            Some(TimePeriod {
                start: 1962,
                end: None
            })
        );
    }

    #[tokio::test]
    async fn memoir_sends_tone_and_chapter_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/generate-memoir"))
            .and(body_json(json!({
                "stories": ["s1"],
                "chapterCount": 2,
                "tone": "nostalgic"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chapters": [{
                    "title": "Early years",
                    "introduction": "It began",
                    "content": "...",
                    "stories": ["s1"]
                }]
            })))
            .mount(&server)
            .await;

        let client = FunctionsClient::new(&server.uri(), "anon");
        let chapters = client
            .generate_memoir(&["s1".to_string()], 2, Tone::Nostalgic)
            .await
            .unwrap();

        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Early years");
    }

    #[tokio::test]
    async fn error_status_is_reported_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/generate-prompt"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
            .expect(1)
            .mount(&server)
            .await;

        let client = FunctionsClient::new(&server.uri(), "anon");
        let err = client.generate_prompt(None).await.unwrap_err();

        match err {
            AiError::Status {
                function,
                status,
                body,
            } => {
                assert_eq!(function, "generate-prompt");
                assert_eq!(status, 500);
                assert_eq!(body, "model overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
