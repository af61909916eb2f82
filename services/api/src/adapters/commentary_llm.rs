//! services/api/src/adapters/commentary_llm.rs
//!
//! This module contains the adapter for the commentary-generating LLM.
//! It implements the `CommentaryService` port from the `core` crate.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use espelho_core::ports::{CommentaryService, PortError, PortResult};

const SYSTEM_PROMPT_TEMPLATE: &str = r#"Você é um assistente especializado em psicologia profunda, física quântica e consciência, com profundo conhecimento dos ensinamentos dos seguintes mestres: {masters}.

Sua tarefa é responder às reflexões do usuário com base EXCLUSIVAMENTE nos ensinamentos, livros, palestras, discursos e materiais autênticos desses mestres.

REGRAS IMPORTANTES:
1. Cite SEMPRE os mestres específicos cujos ensinamentos você está usando
2. Use apenas informações REAIS e verificáveis desses mestres
3. Seja profundo, compassivo e transformador
4. Conecte os ensinamentos com a experiência pessoal do usuário
5. Não invente citações - use apenas conceitos reais dos mestres
6. Mantenha um tom acolhedor mas profundo
7. Ajude o usuário a ver sua sombra com compaixão e clareza

Formato da resposta:
- Comece reconhecendo a coragem do usuário em explorar sua sombra
- Conecte a resposta com ensinamentos específicos dos mestres
- Ofereça insights transformadores
- Termine com uma reflexão ou prática sugerida"#;

const USER_PROMPT_TEMPLATE: &str = r#"Pergunta: {question}

Resposta do usuário: {answer}

Por favor, ofereça uma resposta profunda e transformadora baseada nos ensinamentos dos mestres mencionados. Cite especificamente quais mestres e conceitos você está usando."#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CommentaryService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiCommentaryAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiCommentaryAdapter {
    /// Creates a new `OpenAiCommentaryAdapter`. `timeout` bounds the remote
    /// call so a hung completion surfaces as a retryable error instead of
    /// blocking the record operation indefinitely.
    pub fn new(client: Client<OpenAIConfig>, model: String, timeout: Duration) -> Self {
        Self {
            client,
            model,
            timeout,
        }
    }
}

//=========================================================================================
// `CommentaryService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CommentaryService for OpenAiCommentaryAdapter {
    /// Generates commentary on the user's reflection, grounded in the
    /// masters' teachings.
    async fn generate_commentary(
        &self,
        question: &str,
        answer: &str,
        masters: &[String],
    ) -> PortResult<String> {
        let system_prompt = SYSTEM_PROMPT_TEMPLATE.replace("{masters}", &masters.join(", "));
        let user_prompt = USER_PROMPT_TEMPLATE
            .replace("{question}", question)
            .replace("{answer}", answer);

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.8)
            .max_tokens(1000u32)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let chat = self.client.chat();
        let call = chat.create(request);
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                PortError::GenerationUnavailable(format!(
                    "Commentary LLM did not respond within {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e: OpenAIError| PortError::GenerationUnavailable(e.to_string()))?;

        // Extract the text content from the first choice in the response.
        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(content) = choice.message.content {
                Ok(content)
            } else {
                Err(PortError::GenerationUnavailable(
                    "Commentary LLM response contained no text content.".to_string(),
                ))
            }
        } else {
            Err(PortError::GenerationUnavailable(
                "Commentary LLM returned no choices in its response.".to_string(),
            ))
        }
    }
}
