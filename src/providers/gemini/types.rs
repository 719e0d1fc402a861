//! Gemini REST wire types: the `generateContent` request/response shape
//! (content/parts/functionCall/usageMetadata).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub function_call: Option<FunctionCall>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub function_response: Option<FunctionResponse>,
}

impl Part {
	pub fn text(text: impl Into<String>) -> Self {
		Self {
			text: Some(text.into()),
			function_call: None,
			function_response: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
	pub name: String,
	#[serde(default)]
	pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
	pub name: String,
	pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_output_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub stop_sequences: Vec<String>,
}

impl GenerationConfig {
	pub fn is_empty(&self) -> bool {
		self.temperature.is_none() && self.top_p.is_none() && self.max_output_tokens.is_none() && self.stop_sequences.is_empty()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
	pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
	pub contents: Vec<Content>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system_instruction: Option<Content>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub generation_config: Option<GenerationConfig>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
	pub content: Option<Content>,
	#[serde(default)]
	pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
	#[serde(default)]
	pub prompt_token_count: u64,
	#[serde(default)]
	pub candidates_token_count: u64,
	#[serde(default)]
	pub total_token_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
	#[serde(default)]
	pub candidates: Vec<Candidate>,
	#[serde(default)]
	pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiErrorResponse {
	pub error: GeminiError,
}

#[derive(Debug, Deserialize)]
pub struct GeminiError {
	pub message: String,
	#[serde(default)]
	pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedContentRequest {
	pub content: Content,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedContentResponse {
	pub embedding: Embedding,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Embedding {
	pub values: Vec<f32>,
}
