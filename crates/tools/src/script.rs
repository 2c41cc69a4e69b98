//! `execute_python` — Python source executed inside the conversation's
//! sandbox session, output streamed to observers as it is produced.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::chat::ToolParameter;

use crate::{arg_str, arg_u64, Tool, ToolContext, ToolOutcome};

pub struct ExecutePythonTool;

#[async_trait]
impl Tool for ExecutePythonTool {
    fn name(&self) -> &'static str {
        "execute_python"
    }

    fn description(&self) -> &'static str {
        "Executa código Python em um ambiente isolado e seguro. \
         Use para: cálculos, processamento de dados, manipulação de arquivos, \
         automações. Use print() para exibir resultados. \
         Bibliotecas comuns (numpy, pandas, requests) estão disponíveis."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required(
                "code",
                "string",
                "Código Python a ser executado. Use print() para exibir resultados.",
            ),
            ToolParameter::optional(
                "timeout",
                "integer",
                "Tempo máximo de execução em segundos (padrão: 60)",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(code) = arg_str(&args, "code") else {
            return ToolOutcome::err("argumento obrigatório ausente: code");
        };

        let timeout_sec = arg_u64(&args, "timeout")
            .unwrap_or(ctx.tools.default_script_timeout_sec)
            .min(ctx.tools.max_execution_sec);

        tracing::info!(
            session_id = %ctx.session_id,
            code_len = code.len(),
            timeout_sec,
            "executing python script"
        );

        let (chunks, forwarder) = ctx.log_forwarder("execute_python");
        let cancel = ctx.cancel.clone();
        let result = ctx
            .sandbox
            .run_script(
                &ctx.session_id,
                code,
                Duration::from_secs(timeout_sec),
                chunks,
                &move || cancel.is_cancelled(),
            )
            .await;
        let _ = forwarder.await;

        match result {
            Ok((true, output)) => ToolOutcome::ok(if output.is_empty() {
                "(sem saída)".to_string()
            } else {
                output
            }),
            Ok((false, output)) => ToolOutcome::err(format!("Erro na execução:\n{output}")),
            Err(e) => ToolOutcome::err(format!("Erro: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_code() {
        let def = ExecutePythonTool.definition();
        assert_eq!(def.parameters["required"], serde_json::json!(["code"]));
    }
}
