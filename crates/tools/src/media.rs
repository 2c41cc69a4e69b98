//! Media tools — download and transcription run inside the sandbox so the
//! heavyweight dependencies (yt-dlp, whisper) never touch the host.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::chat::ToolParameter;

use crate::{arg_str, arg_u64, security, Tool, ToolContext, ToolOutcome};

pub struct DownloadMediaTool;

#[async_trait]
impl Tool for DownloadMediaTool {
    fn name(&self) -> &'static str {
        "download_media"
    }

    fn description(&self) -> &'static str {
        "Baixa vídeo ou áudio de uma URL (YouTube e outras plataformas) \
         para o diretório outputs/ da sessão. Use format='audio' para \
         extrair apenas o áudio."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("url", "string", "URL do vídeo ou áudio a baixar"),
            ToolParameter::optional("format", "string", "Formato desejado (padrão: video)")
                .with_allowed(&["video", "audio"]),
            ToolParameter::optional(
                "timeout",
                "integer",
                "Tempo máximo do download em segundos (padrão: 300)",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(url) = arg_str(&args, "url") else {
            return ToolOutcome::err("argumento obrigatório ausente: url");
        };
        let audio_only = arg_str(&args, "format") == Some("audio");
        let timeout_sec = arg_u64(&args, "timeout")
            .unwrap_or(ctx.tools.max_execution_sec)
            .min(ctx.tools.max_execution_sec);

        let quoted = security::shell_quote(url);
        let command = if audio_only {
            format!(
                "mkdir -p outputs && yt-dlp -x --audio-format mp3 \
                 -o 'outputs/%(title)s.%(ext)s' {quoted}"
            )
        } else {
            format!("mkdir -p outputs && yt-dlp -o 'outputs/%(title)s.%(ext)s' {quoted}")
        };

        tracing::info!(session_id = %ctx.session_id, url, audio_only, "downloading media");

        let (chunks, forwarder) = ctx.log_forwarder("download_media");
        let cancel = ctx.cancel.clone();
        let result = ctx
            .sandbox
            .run_streaming(
                &ctx.session_id,
                &command,
                Duration::from_secs(timeout_sec),
                chunks,
                &move || cancel.is_cancelled(),
            )
            .await;
        let _ = forwarder.await;

        match result {
            Ok((Some(0), output)) => ToolOutcome::ok(format!(
                "Download concluído em outputs/\n{}",
                tail(&output, 20)
            )),
            Ok((_, output)) => ToolOutcome::err(format!("Erro no download:\n{}", tail(&output, 20))),
            Err(e) => ToolOutcome::err(format!("Erro: {e}")),
        }
    }
}

pub struct TranscribeMediaTool;

#[async_trait]
impl Tool for TranscribeMediaTool {
    fn name(&self) -> &'static str {
        "transcribe_media"
    }

    fn description(&self) -> &'static str {
        "Transcreve um arquivo de áudio ou vídeo para texto usando whisper. \
         O arquivo deve estar no diretório de dados da sessão."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required(
                "path",
                "string",
                "Caminho do arquivo de mídia, relativo ao diretório de dados",
            ),
            ToolParameter::optional(
                "language",
                "string",
                "Idioma do áudio (ex: 'pt', 'en'). Detectado automaticamente se omitido.",
            ),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(path) = arg_str(&args, "path") else {
            return ToolOutcome::err("argumento obrigatório ausente: path");
        };
        // The sandbox only sees the data mount, but screen the path anyway
        // so `..` cannot wander around the container filesystem.
        if path.contains("..") {
            return ToolOutcome::err("Caminho inválido");
        }

        let quoted = security::shell_quote(path);
        let language = arg_str(&args, "language")
            .map(|lang| format!(" --language {}", security::shell_quote(lang)))
            .unwrap_or_default();
        let command = format!(
            "mkdir -p outputs && whisper {quoted} --model base \
             --output_format txt --output_dir outputs{language}"
        );

        tracing::info!(session_id = %ctx.session_id, path, "transcribing media");

        let (chunks, forwarder) = ctx.log_forwarder("transcribe_media");
        let cancel = ctx.cancel.clone();
        let result = ctx
            .sandbox
            .run_streaming(
                &ctx.session_id,
                &command,
                Duration::from_secs(ctx.tools.max_execution_sec),
                chunks,
                &move || cancel.is_cancelled(),
            )
            .await;
        let _ = forwarder.await;

        match result {
            Ok((Some(0), output)) => ToolOutcome::ok(format!(
                "Transcrição salva em outputs/\n{}",
                tail(&output, 40)
            )),
            Ok((_, output)) => {
                ToolOutcome::err(format!("Erro na transcrição:\n{}", tail(&output, 20)))
            }
            Err(e) => ToolOutcome::err(format!("Erro: {e}")),
        }
    }
}

/// Last `lines` lines of a command's output.
fn tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.lines().collect();
    if all.len() <= lines {
        output.trim().to_string()
    } else {
        all[all.len() - lines..].join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_output() {
        assert_eq!(tail("a\nb", 5), "a\nb");
    }

    #[test]
    fn tail_truncates_long_output() {
        let output = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(tail(&output, 2), "8\n9");
    }

    #[test]
    fn media_schemas_declare_enum() {
        let def = DownloadMediaTool.definition();
        assert_eq!(
            def.parameters["properties"]["format"]["enum"],
            serde_json::json!(["video", "audio"])
        );
    }
}
