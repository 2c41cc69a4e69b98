//! `web_search` — current information from the internet, delegated to the
//! designated search model (its `:online` suffix activates the provider's
//! native web search).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::chat::{Message, ToolParameter};

use crate::{arg_str, Tool, ToolContext, ToolOutcome};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Busca informações atuais e recentes na internet. Use para: \
         notícias, dados que mudam frequentemente (preços, versões de \
         software), eventos recentes. Retorna informações com citação das \
         fontes."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required(
                "query",
                "string",
                "A consulta de busca. Seja específico para obter melhores resultados.",
            ),
            ToolParameter::optional(
                "context",
                "string",
                "Contexto adicional para refinar a busca (ex: 'últimas 24 horas')",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(query) = arg_str(&args, "query") else {
            return ToolOutcome::err("argumento obrigatório ausente: query");
        };

        let mut prompt = query.to_string();
        if let Some(extra) = arg_str(&args, "context") {
            if !extra.is_empty() {
                prompt.push_str(&format!("\n\nContexto: {extra}"));
            }
        }

        let messages = vec![
            Message::system(
                "Você é um assistente de pesquisa. Responda com informações \
                 atuais e cite as fontes.",
            ),
            Message::user(prompt),
        ];

        tracing::info!(model = %ctx.llm.search_model, query, "web search");

        match ctx
            .model
            .chat(&messages, &ctx.llm.search_model, None, SEARCH_TIMEOUT)
            .await
        {
            Ok(outcome) => ToolOutcome::ok(outcome.content),
            Err(e) => ToolOutcome::err(format!("Erro na busca web: {e}")),
        }
    }
}
