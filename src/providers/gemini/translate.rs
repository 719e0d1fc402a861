//! Request/response translation between the neutral schema and Gemini's
//! `generateContent` API. Follows the shape of the Anthropic `translate`
//! module in this crate, since Gemini's wire format has no close relative
//! elsewhere in this codebase.

use serde_json::Value;

use crate::providers::gemini::types::{self, Candidate, Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part, Tool};
use crate::types::{ChatResponse, Choice, Role, Usage};

pub fn translate_request(req: crate::types::ChatRequest) -> GenerateContentRequest {
	let system_text = req
		.messages
		.iter()
		.filter(|m| m.role == Role::System)
		.map(|m| m.text())
		.collect::<Vec<_>>()
		.join("\n");
	let system_instruction = if system_text.is_empty() {
		None
	} else {
		Some(Content {
			role: None,
			parts: vec![Part::text(system_text)],
		})
	};

	let contents = req.messages.iter().filter(|m| m.role != Role::System).map(translate_message).collect();

	let generation_config = {
		let config = GenerationConfig {
			temperature: req.temperature,
			top_p: req.top_p,
			max_output_tokens: req.max_tokens,
			stop_sequences: req
				.stop
				.map(|v| match v {
					Value::String(s) => vec![s],
					Value::Array(items) => items.into_iter().filter_map(|i| i.as_str().map(str::to_string)).collect(),
					_ => Vec::new(),
				})
				.unwrap_or_default(),
		};
		if config.is_empty() { None } else { Some(config) }
	};

	let tools = translate_tools(req.tools.as_ref());

	GenerateContentRequest {
		contents,
		system_instruction,
		generation_config,
		tools,
	}
}

/// `user` -> `user`; `assistant` -> `model`; `tool` -> a `user` turn
/// carrying a `functionResponse` part referencing the original call by
/// name (Gemini has no call-id concept to round-trip).
fn translate_message(msg: &crate::types::Message) -> Content {
	match msg.role {
		Role::Assistant => Content {
			role: Some("model".to_string()),
			parts: vec![Part::text(msg.text())],
		},
		Role::Tool => Content {
			role: Some("user".to_string()),
			parts: vec![Part {
				text: None,
				function_call: None,
				function_response: Some(FunctionResponse {
					name: msg.tool_call_id.clone().unwrap_or_default(),
					response: msg.content.clone(),
				}),
			}],
		},
		Role::System | Role::User => Content {
			role: Some("user".to_string()),
			parts: vec![Part::text(msg.text())],
		},
	}
}

/// OpenAI's `tools: [{type:"function", function:{name,description,parameters}}]`
/// flattens into one `tools[0].functionDeclarations` array.
fn translate_tools(tools: Option<&Value>) -> Vec<Tool> {
	let Some(Value::Array(items)) = tools else {
		return Vec::new();
	};
	let declarations: Vec<FunctionDeclaration> = items
		.iter()
		.filter_map(|t| t.get("function"))
		.filter_map(|f| {
			Some(FunctionDeclaration {
				name: f.get("name")?.as_str()?.to_string(),
				description: f.get("description").and_then(Value::as_str).map(str::to_string),
				parameters: f.get("parameters").cloned(),
			})
		})
		.collect();
	if declarations.is_empty() {
		Vec::new()
	} else {
		vec![Tool { function_declarations: declarations }]
	}
}

pub fn translate_response(resp: GenerateContentResponse, model: &str, id: String) -> ChatResponse {
	let candidate = resp.candidates.into_iter().next();
	let (text, tool_calls, finish_reason) = match &candidate {
		Some(c) => (candidate_text(c), candidate_tool_calls(c), finish_reason_for(c.finish_reason.as_deref())),
		None => (String::new(), Vec::new(), None),
	};

	let message = crate::types::Message {
		role: Role::Assistant,
		content: Value::String(text),
		tool_call_id: None,
		tool_calls: if tool_calls.is_empty() { None } else { Some(Value::Array(tool_calls)) },
	};

	let usage = resp
		.usage_metadata
		.map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
		.unwrap_or_default();

	ChatResponse::new(
		id,
		model.to_string(),
		vec![Choice {
			index: 0,
			message,
			finish_reason,
		}],
		Some(usage),
	)
}

fn candidate_text(c: &Candidate) -> String {
	c.content
		.as_ref()
		.map(|content| content.parts.iter().filter_map(|p| p.text.as_deref()).collect::<Vec<_>>().join(""))
		.unwrap_or_default()
}

fn candidate_tool_calls(c: &Candidate) -> Vec<Value> {
	let Some(content) = &c.content else {
		return Vec::new();
	};
	content
		.parts
		.iter()
		.filter_map(|p| p.function_call.as_ref())
		.map(|call: &FunctionCall| {
			serde_json::json!({
				"id": call.name,
				"type": "function",
				"function": { "name": call.name, "arguments": call.args },
			})
		})
		.collect()
}

/// `STOP`->stop, `MAX_TOKENS`->length, `SAFETY`/`RECITATION`->content_filter,
/// other -> passthrough.
pub(crate) fn finish_reason_for(reason: Option<&str>) -> Option<String> {
	reason.map(|r| match r {
		"STOP" => "stop".to_string(),
		"MAX_TOKENS" => "length".to_string(),
		"SAFETY" | "RECITATION" => "content_filter".to_string(),
		other => other.to_ascii_lowercase(),
	})
}

pub fn translate_error(resp: types::GeminiErrorResponse) -> crate::error::GatewayError {
	crate::error::GatewayError::TranslateFail(format!("{}: {}", resp.error.status.as_deref().unwrap_or("error"), resp.error.message))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{ChatRequest, Message};

	#[test]
	fn system_messages_become_system_instruction() {
		let req = ChatRequest {
			model: "gemini-1.5-pro".into(),
			messages: vec![
				Message {
					role: Role::System,
					content: Value::String("be terse".into()),
					tool_call_id: None,
					tool_calls: None,
				},
				Message {
					role: Role::User,
					content: Value::String("hi".into()),
					tool_call_id: None,
					tool_calls: None,
				},
			],
			..Default::default()
		};
		let translated = translate_request(req);
		assert_eq!(translated.system_instruction.unwrap().parts[0].text.as_deref(), Some("be terse"));
		assert_eq!(translated.contents.len(), 1);
		assert_eq!(translated.contents[0].role.as_deref(), Some("user"));
	}

	#[test]
	fn assistant_role_maps_to_model() {
		let req = ChatRequest {
			model: "gemini-1.5-pro".into(),
			messages: vec![Message {
				role: Role::Assistant,
				content: Value::String("ok".into()),
				tool_call_id: None,
				tool_calls: None,
			}],
			..Default::default()
		};
		let translated = translate_request(req);
		assert_eq!(translated.contents[0].role.as_deref(), Some("model"));
	}

	#[test]
	fn tool_role_becomes_function_response() {
		let req = ChatRequest {
			model: "gemini-1.5-pro".into(),
			messages: vec![Message {
				role: Role::Tool,
				content: serde_json::json!({"result": 42}),
				tool_call_id: Some("lookup".into()),
				tool_calls: None,
			}],
			..Default::default()
		};
		let translated = translate_request(req);
		let part = &translated.contents[0].parts[0];
		assert_eq!(part.function_response.as_ref().unwrap().name, "lookup");
	}

	#[test]
	fn no_generation_params_set_omits_config() {
		let req = ChatRequest {
			model: "gemini-1.5-pro".into(),
			messages: vec![],
			..Default::default()
		};
		assert!(translate_request(req).generation_config.is_none());
	}

	#[test]
	fn finish_reason_table_maps_known_values() {
		assert_eq!(finish_reason_for(Some("STOP")).as_deref(), Some("stop"));
		assert_eq!(finish_reason_for(Some("MAX_TOKENS")).as_deref(), Some("length"));
		assert_eq!(finish_reason_for(Some("SAFETY")).as_deref(), Some("content_filter"));
		assert_eq!(finish_reason_for(Some("RECITATION")).as_deref(), Some("content_filter"));
		assert_eq!(finish_reason_for(Some("OTHER")).as_deref(), Some("other"));
	}

	#[test]
	fn function_call_becomes_tool_call_keyed_by_name() {
		let resp = GenerateContentResponse {
			candidates: vec![Candidate {
				content: Some(Content {
					role: Some("model".into()),
					parts: vec![Part {
						text: None,
						function_call: Some(FunctionCall {
							name: "lookup".into(),
							args: serde_json::json!({"q": "x"}),
						}),
						function_response: None,
					}],
				}),
				finish_reason: Some("STOP".into()),
			}],
			usage_metadata: None,
		};
		let chat = translate_response(resp, "gemini-1.5-pro", "id1".into());
		assert!(chat.choices[0].message.tool_calls.is_some());
		assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("stop"));
	}
}
