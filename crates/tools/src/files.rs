//! `read_file` / `write_file` — host-side file access restricted to the
//! configured data roots (the same tree the sandbox sees through its bind
//! mount).

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::chat::ToolParameter;

use crate::{arg_bool, arg_str, arg_u64, security, Tool, ToolContext, ToolOutcome};

const DEFAULT_MAX_LINES: u64 = 500;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Lê o conteúdo de um arquivo. Por segurança, apenas arquivos nos \
         diretórios de dados são acessíveis."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", "string", "Caminho do arquivo a ler"),
            ToolParameter::optional(
                "max_lines",
                "integer",
                "Máximo de linhas a retornar (padrão: 500)",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(path) = arg_str(&args, "path") else {
            return ToolOutcome::err("argumento obrigatório ausente: path");
        };
        let max_lines = arg_u64(&args, "max_lines").unwrap_or(DEFAULT_MAX_LINES) as usize;

        let Some(resolved) = security::resolve_allowed(path, &ctx.allowed_roots) else {
            tracing::warn!(path, "file read denied");
            return ToolOutcome::err(
                "Acesso negado. Apenas arquivos nos diretórios de dados são acessíveis.",
            );
        };

        let raw = match tokio::fs::read(&resolved).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutcome::err(format!("Arquivo não encontrado: {path}"));
            }
            Err(e) => return ToolOutcome::err(format!("Erro: {e}")),
        };
        let Ok(text) = String::from_utf8(raw) else {
            return ToolOutcome::err("Arquivo não é texto legível (binário)");
        };

        let total_lines = text.lines().count();
        let content = if total_lines > max_lines {
            let truncated: String = text
                .lines()
                .take(max_lines)
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "{truncated}\n...(truncado, mostrando {max_lines} de {total_lines} linhas)"
            )
        } else {
            text
        };

        ToolOutcome::ok(content)
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Escreve conteúdo em um arquivo, criando-o se não existir. Apenas \
         arquivos nos diretórios de dados podem ser criados/modificados."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", "string", "Caminho do arquivo a criar/modificar"),
            ToolParameter::required("content", "string", "Conteúdo a escrever no arquivo"),
            ToolParameter::optional(
                "append",
                "boolean",
                "Se true, adiciona ao final em vez de sobrescrever (padrão: false)",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(path) = arg_str(&args, "path") else {
            return ToolOutcome::err("argumento obrigatório ausente: path");
        };
        let Some(content) = arg_str(&args, "content") else {
            return ToolOutcome::err("argumento obrigatório ausente: content");
        };
        let append = arg_bool(&args, "append").unwrap_or(false);

        let Some(resolved) = security::resolve_allowed(path, &ctx.allowed_roots) else {
            tracing::warn!(path, "file write denied");
            return ToolOutcome::err(
                "Acesso negado. Apenas arquivos nos diretórios de dados podem ser escritos.",
            );
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutcome::err(format!("Erro: {e}"));
            }
        }

        let result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await
            {
                Ok(mut file) => file.write_all(content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(&resolved, content).await
        };

        match result {
            Ok(()) => {
                let action = if append { "adicionado a" } else { "escrito em" };
                ToolOutcome::ok(format!("Conteúdo {action} {path}"))
            }
            Err(e) => ToolOutcome::err(format!("Erro: {e}")),
        }
    }
}
