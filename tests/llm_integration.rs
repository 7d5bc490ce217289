//! Integration tests for the provider clients.
//!
//! These tests make real API calls.
//! Run with: DEEPSEEK_API_KEY=... GOOGLE_GENAI_API_KEY=... cargo test --test llm_integration -- --ignored

use quizforge::agents::{GenerationRequest, QuestionGeneratorAgent};
use quizforge::llm::{
    AspectRatio, ChatClient, CompletionRequest, GeminiClient, ImageProvider, LlmProvider,
    LlmSettings, Message, VisionProvider,
};
use std::sync::Arc;

fn create_chat_client() -> ChatClient {
    ChatClient::from_env(LlmSettings::question_defaults())
        .expect("DEEPSEEK_API_KEY environment variable must be set for integration tests")
}

fn create_gemini_client() -> GeminiClient {
    GeminiClient::from_env(LlmSettings::image_defaults())
        .expect("GOOGLE_GENAI_API_KEY environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_chat_client();

    let request = CompletionRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(content.contains('4'), "Response should contain '4', got: {}", content);
}

#[tokio::test]
#[ignore]
async fn test_generator_produces_valid_batch() {
    let agent = QuestionGeneratorAgent::with_defaults(Arc::new(create_chat_client()));
    let request = GenerationRequest::new("D1 - Localizar informações explícitas em um texto", "2", "5")
        .with_count_questions(2);

    let questions = agent
        .generate(&request, None, None)
        .await
        .expect("generation should succeed");

    assert!(!questions.is_empty());
    for question in &questions {
        let correct = question.correct_alternative().expect("exactly one correct alternative");
        assert_eq!(correct.letter, question.correct_answer);
    }
}

#[tokio::test]
#[ignore]
async fn test_image_generation_and_analysis() {
    let client = create_gemini_client();

    let image = client
        .generate_image(
            "A simple diagram of a right triangle with legs labeled 3 cm and 4 cm",
            AspectRatio::Square,
        )
        .await
        .expect("image generation should succeed");
    assert!(!image.is_empty());

    let analysis = client
        .analyze(&image, "How many labeled sides does this triangle have? Reply with a number.")
        .await
        .expect("analysis should succeed");
    assert!(!analysis.trim().is_empty());
}
