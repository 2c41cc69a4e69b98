//! `call_external_model` — delegate a hard sub-problem to the configured
//! heavyweight model.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::chat::{Message, ToolParameter};

use crate::{arg_str, Tool, ToolContext, ToolOutcome};

const DELEGATE_TIMEOUT: Duration = Duration::from_secs(300);

pub struct CallExternalModelTool;

#[async_trait]
impl Tool for CallExternalModelTool {
    fn name(&self) -> &'static str {
        "call_external_model"
    }

    fn description(&self) -> &'static str {
        "Chama um modelo de IA externo mais poderoso para tarefas complexas. \
         Use APENAS quando a tarefa requer raciocínio muito complexo, \
         análise profunda de código ou escrita de alta qualidade. NÃO use \
         para tarefas simples, execução de comandos ou operações com \
         arquivos."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required(
                "task_description",
                "string",
                "Descrição clara e detalhada da tarefa para o modelo externo",
            ),
            ToolParameter::optional(
                "context",
                "string",
                "Contexto adicional relevante (código, dados, histórico)",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(task) = arg_str(&args, "task_description") else {
            return ToolOutcome::err("argumento obrigatório ausente: task_description");
        };

        let mut prompt = task.to_string();
        if let Some(extra) = arg_str(&args, "context") {
            if !extra.is_empty() {
                prompt.push_str(&format!("\n\n--- Contexto ---\n{extra}"));
            }
        }

        tracing::info!(model = %ctx.llm.external_model, "delegating to external model");

        match ctx
            .model
            .chat(
                &[Message::user(prompt)],
                &ctx.llm.external_model,
                None,
                DELEGATE_TIMEOUT,
            )
            .await
        {
            Ok(outcome) => ToolOutcome::ok(outcome.content),
            Err(e) => ToolOutcome::err(format!("Erro no modelo externo: {e}")),
        }
    }
}
