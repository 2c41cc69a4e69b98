//! Retrieval-store tools — search past procedures and manage knowledge
//! entries. Both delegate to the external RAG collaborator.

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::chat::ToolParameter;

use crate::{arg_str, arg_u64, Tool, ToolContext, ToolOutcome};

pub struct SearchProceduresTool;

#[async_trait]
impl Tool for SearchProceduresTool {
    fn name(&self) -> &'static str {
        "search_procedures"
    }

    fn description(&self) -> &'static str {
        "Busca procedimentos e soluções anteriores no banco de conhecimento. \
         Use para: encontrar soluções já aplicadas, recuperar comandos usados \
         anteriormente, buscar referências de tarefas similares."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", "string", "Texto de busca descrevendo o que procura"),
            ToolParameter::optional(
                "max_results",
                "integer",
                "Número máximo de resultados (padrão: 5)",
            ),
            ToolParameter::optional(
                "tool_filter",
                "string",
                "Filtrar por ferramenta específica (ex: execute_python, execute_shell)",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(query) = arg_str(&args, "query") else {
            return ToolOutcome::err("argumento obrigatório ausente: query");
        };
        let max_results = arg_u64(&args, "max_results").unwrap_or(5) as usize;
        let tool_filter = arg_str(&args, "tool_filter");

        match ctx
            .retrieval
            .search_procedures(query, max_results, tool_filter)
            .await
        {
            Ok(procedures) if procedures.is_empty() => {
                ToolOutcome::ok("Nenhum procedimento encontrado.")
            }
            Ok(procedures) => {
                let rendered: Vec<String> = procedures
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        format!(
                            "{}. [{}] {}\n   Solução: {}",
                            i + 1,
                            p.tool_used,
                            p.description,
                            p.solution
                        )
                    })
                    .collect();
                ToolOutcome::ok(rendered.join("\n"))
            }
            Err(e) => ToolOutcome::err(format!("Erro na busca: {e}")),
        }
    }
}

pub struct ManageMemoryTool;

#[async_trait]
impl Tool for ManageMemoryTool {
    fn name(&self) -> &'static str {
        "manage_memory"
    }

    fn description(&self) -> &'static str {
        "Gerencia o banco de conhecimento: adiciona, remove ou lista \
         entradas. Use 'add' para guardar fatos e soluções úteis."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("action", "string", "Ação a executar")
                .with_allowed(&["add", "remove", "list"]),
            ToolParameter::optional("content", "string", "Conteúdo a guardar (para 'add')"),
            ToolParameter::optional("category", "string", "Categoria da entrada (para 'add')"),
            ToolParameter::optional("id", "string", "Id da entrada (para 'remove')"),
            ToolParameter::optional(
                "limit",
                "integer",
                "Máximo de entradas a listar (padrão: 20)",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        match arg_str(&args, "action") {
            Some("add") => {
                let Some(content) = arg_str(&args, "content") else {
                    return ToolOutcome::err("'add' requer o argumento content");
                };
                match ctx
                    .retrieval
                    .add_entry(content, arg_str(&args, "category"))
                    .await
                {
                    Ok(id) => ToolOutcome::ok(format!("Entrada adicionada (id: {id})")),
                    Err(e) => ToolOutcome::err(format!("Erro ao adicionar: {e}")),
                }
            }
            Some("remove") => {
                let Some(id) = arg_str(&args, "id") else {
                    return ToolOutcome::err("'remove' requer o argumento id");
                };
                match ctx.retrieval.remove_entry(id).await {
                    Ok(()) => ToolOutcome::ok(format!("Entrada {id} removida")),
                    Err(e) => ToolOutcome::err(format!("Erro ao remover: {e}")),
                }
            }
            Some("list") => {
                let limit = arg_u64(&args, "limit").unwrap_or(20) as usize;
                match ctx.retrieval.list_entries(limit).await {
                    Ok(entries) if entries.is_empty() => {
                        ToolOutcome::ok("Banco de conhecimento vazio.")
                    }
                    Ok(entries) => ToolOutcome::ok(
                        serde_json::to_string_pretty(&entries).unwrap_or_default(),
                    ),
                    Err(e) => ToolOutcome::err(format!("Erro ao listar: {e}")),
                }
            }
            _ => ToolOutcome::err("action deve ser 'add', 'remove' ou 'list'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hermes_domain::config::{LlmConfig, PathsConfig, SandboxConfig, ToolsConfig};
    use hermes_domain::progress::{CancelToken, NullSink};
    use hermes_memory::NoopRetrievalStore;
    use hermes_providers::ModelClient;
    use hermes_sandbox::SandboxManager;

    fn context() -> ToolContext {
        let paths = PathsConfig::default();
        ToolContext {
            session_id: "test".into(),
            cancel: CancelToken::new(),
            progress: Arc::new(NullSink),
            sandbox: Arc::new(SandboxManager::new(SandboxConfig::default(), &paths)),
            model: Arc::new(ModelClient::from_config(&LlmConfig::default())),
            retrieval: Arc::new(NoopRetrievalStore),
            tools: ToolsConfig::default(),
            llm: LlmConfig::default(),
            allowed_roots: paths.allowed_roots(),
        }
    }

    #[tokio::test]
    async fn search_with_noop_store_reports_nothing_found() {
        let outcome = SearchProceduresTool
            .execute(serde_json::json!({ "query": "deploy" }), &context())
            .await;
        assert!(outcome.success);
        assert!(outcome.output.contains("Nenhum procedimento"));
    }

    #[tokio::test]
    async fn manage_memory_validates_action() {
        let outcome = ManageMemoryTool
            .execute(serde_json::json!({ "action": "explode" }), &context())
            .await;
        assert!(!outcome.success);

        let outcome = ManageMemoryTool
            .execute(serde_json::json!({ "action": "add" }), &context())
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("content"));
    }
}
