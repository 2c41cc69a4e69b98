//! `finish_task` — the distinguished tool whose invocation tells the
//! orchestrator its work is complete. Required in background mode, where
//! "no tool calls" is not accepted as a terminal.

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::chat::ToolParameter;

use crate::{arg_str, Tool, ToolContext, ToolOutcome};

pub struct FinishTaskTool;

#[async_trait]
impl Tool for FinishTaskTool {
    fn name(&self) -> &'static str {
        "finish_task"
    }

    fn description(&self) -> &'static str {
        "Finaliza a tarefa atual. Use APENAS quando todo o trabalho estiver \
         concluído e verificado."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "result",
            "string",
            "O resultado final da tarefa ou um resumo do que foi feito.",
        )]
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolOutcome {
        let result = arg_str(&args, "result").unwrap_or("").to_string();
        ToolOutcome {
            success: true,
            output: format!("Tarefa finalizada: {result}"),
            error: None,
            task_completed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_result() {
        let def = FinishTaskTool.definition();
        assert_eq!(def.parameters["required"], serde_json::json!(["result"]));
    }
}
