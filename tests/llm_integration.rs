use devify::llm::{self, ModelProvider, ModelRequest, StreamEvent};
use futures_util::StreamExt;
use std::env;

#[tokio::test]
async fn test_anthropic_streams_a_tool_call() {
    let api_key = match env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            println!("skipping test: ANTHROPIC_API_KEY not set");
            return;
        }
    };
    let model = env::var("DEVIFY_TEST_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".to_string());
    let provider = llm::AnthropicProvider::new(api_key, model, "https://api.anthropic.com");

    let request = ModelRequest {
        system_prompt: format!(
            "You are a coding assistant.\n\n{}",
            devify::tools::tool_instructions()
        ),
        messages: vec![llm::Message::user("Read the file README.md. Use a tool call.")],
        max_tokens: 512,
    };

    let mut stream = provider.stream(request).await.expect("stream should open");
    let mut text = String::new();
    let mut usage = None;
    while let Some(event) = stream.next().await {
        match event.expect("stream event") {
            StreamEvent::TextDelta(delta) => text.push_str(&delta),
            StreamEvent::Usage(u) => usage = Some(u),
        }
    }
    println!("Received response: {}", text);

    let parsed = devify::parser::parse_response(&text);
    assert!(parsed.has_tool_calls, "Should have a tool call");
    assert_eq!(parsed.tool_calls[0].name, devify::tools::ToolName::ReadFile);
    assert!(usage.map(|u| u.output_tokens > 0).unwrap_or(false));
}
