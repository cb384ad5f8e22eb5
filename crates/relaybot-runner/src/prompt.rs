use async_trait::async_trait;

/// Turns a raw user request into the prompt handed to the external process.
#[async_trait]
pub trait PromptBuilder: Send + Sync {
    async fn build(&self, user_text: &str, chat_id: &str) -> String;
}

/// Sends the request text unchanged.
pub struct PassthroughPrompt;

#[async_trait]
impl PromptBuilder for PassthroughPrompt {
    async fn build(&self, user_text: &str, _chat_id: &str) -> String {
        user_text.to_string()
    }
}
