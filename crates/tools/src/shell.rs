//! `execute_shell` — shell commands inside the conversation's sandbox
//! session.
//!
//! Commands that end in `&` or use `nohup` are launched detached and the
//! dispatcher returns quickly with the spawned PID; everything else streams
//! stdio until exit or timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::chat::ToolParameter;

use crate::{arg_str, arg_u64, security, Tool, ToolContext, ToolOutcome};

pub struct ExecuteShellTool;

impl ExecuteShellTool {
    fn is_background(command: &str) -> bool {
        let trimmed = command.trim();
        trimmed.ends_with('&') || trimmed.to_lowercase().contains("nohup")
    }
}

#[async_trait]
impl Tool for ExecuteShellTool {
    fn name(&self) -> &'static str {
        "execute_shell"
    }

    fn description(&self) -> &'static str {
        "Executa comandos shell/bash no ambiente isolado da sessão. \
         Use para: listar arquivos, manipular arquivos, executar programas, \
         verificar logs. Para tarefas longas (downloads, instalações), \
         aumente o timeout. Comandos terminados em '&' rodam em background."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("command", "string", "Comando shell a ser executado"),
            ToolParameter::optional(
                "timeout",
                "integer",
                "Tempo máximo em segundos (padrão: 30). Defina um valor alto para tarefas demoradas.",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(command) = arg_str(&args, "command") else {
            return ToolOutcome::err("argumento obrigatório ausente: command");
        };

        if let Some(blocked) = security::blocked_command(command) {
            tracing::warn!(command, "blocked command");
            return ToolOutcome::err(format!("Comando bloqueado por segurança: {blocked}"));
        }
        if security::is_dangerous_command(command) {
            tracing::warn!(command, "executing potentially dangerous command");
        }

        let timeout_sec = arg_u64(&args, "timeout")
            .unwrap_or(ctx.tools.default_shell_timeout_sec)
            .min(ctx.tools.max_execution_sec);
        let timeout = Duration::from_secs(timeout_sec);

        // Background: launch detached and hand back the PID.
        if Self::is_background(command) {
            let mut detached = command.trim().to_string();
            if !detached.ends_with('&') {
                detached.push_str(" &");
            }
            let spawn = format!("{detached} echo $!");
            return match ctx
                .sandbox
                .run_command(&ctx.session_id, &spawn, Duration::from_secs(10))
                .await
            {
                Ok((Some(0), stdout, _)) => {
                    let pid = stdout.trim().lines().last().unwrap_or("?").to_string();
                    ToolOutcome::ok(format!("Processo iniciado em background (PID: {pid})"))
                }
                Ok((_, stdout, stderr)) => ToolOutcome::err(format!(
                    "Erro ao iniciar processo em background:\n{stdout}\n{stderr}"
                )),
                Err(e) => ToolOutcome::err(format!("Erro: {e}")),
            };
        }

        // Foreground: stream output while it runs.
        let (chunks, forwarder) = ctx.log_forwarder("execute_shell");
        let cancel = ctx.cancel.clone();
        let result = ctx
            .sandbox
            .run_streaming(&ctx.session_id, command, timeout, chunks, &move || {
                cancel.is_cancelled()
            })
            .await;
        let _ = forwarder.await;

        match result {
            Ok((Some(0), output)) => {
                ToolOutcome::ok(if output.is_empty() {
                    "(sem saída)".to_string()
                } else {
                    output
                })
            }
            Ok((Some(code), output)) => {
                ToolOutcome::err(format!("Código de saída: {code}\nSaída:\n{output}"))
            }
            Ok((None, output)) => {
                if ctx.cancel.is_cancelled() {
                    ToolOutcome::err("Comando cancelado pelo usuário".to_string())
                } else {
                    ToolOutcome::err(format!(
                        "Comando excedeu timeout de {timeout_sec}s\n{output}"
                    ))
                }
            }
            Err(e) => ToolOutcome::err(format!("Erro: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_detection() {
        assert!(ExecuteShellTool::is_background("sleep 100 &"));
        assert!(ExecuteShellTool::is_background("nohup ./serve.sh"));
        assert!(!ExecuteShellTool::is_background("ls -la"));
        assert!(!ExecuteShellTool::is_background("echo 'a & b'"));
    }

    #[test]
    fn schema_requires_command() {
        let def = ExecuteShellTool.definition();
        assert_eq!(def.name, "execute_shell");
        assert_eq!(def.parameters["required"], serde_json::json!(["command"]));
    }
}
