//! Uploaded-file store and attachment expansion.
//!
//! Files land in the uploads directory named `{file_id}_{original_name}`.
//! When a message references attachments, their content is expanded into
//! the message's effective text for the orchestrator: text files are
//! inlined, images become base64 data URIs, other binaries are noted by
//! name. The original message text is what gets persisted.

use std::path::{Path, PathBuf};

use base64::Engine;

use hermes_domain::{Error, Result};

const MAX_INLINE_TEXT_BYTES: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Image,
    Binary,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub kind: FileKind,
    pub path: PathBuf,
}

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Locate a file by id. Files are stored as `{id}_{original_name}`.
    pub fn find(&self, file_id: &str) -> Option<StoredFile> {
        let prefix = format!("{file_id}_");
        let entry = std::fs::read_dir(&self.dir)
            .ok()?
            .flatten()
            .find(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with(&prefix)
            })?;
        let path = entry.path();
        let name = entry
            .file_name()
            .to_string_lossy()
            .strip_prefix(&prefix)
            .unwrap_or_default()
            .to_string();
        Some(StoredFile {
            id: file_id.to_string(),
            kind: kind_of(&name),
            name,
            path,
        })
    }

    /// Enqueue-time invariant: every referenced id must resolve.
    pub fn check_resolvable(&self, file_ids: &[String]) -> Result<()> {
        for id in file_ids {
            if self.find(id).is_none() {
                return Err(Error::Storage(format!("arquivo anexado não encontrado: {id}")));
            }
        }
        Ok(())
    }

    /// Build the effective message content: the original text followed by
    /// an expansion block per attachment.
    pub fn expand_message(&self, content: &str, file_ids: &[String]) -> String {
        if file_ids.is_empty() {
            return content.to_string();
        }

        let mut expanded = content.to_string();
        for id in file_ids {
            let Some(file) = self.find(id) else {
                expanded.push_str(&format!("\n\n[Arquivo anexado indisponível: {id}]"));
                continue;
            };
            match file.kind {
                FileKind::Text => match std::fs::read(&file.path) {
                    Ok(bytes) if bytes.len() <= MAX_INLINE_TEXT_BYTES => {
                        let text = String::from_utf8_lossy(&bytes);
                        expanded.push_str(&format!(
                            "\n\n--- Conteúdo de {} ---\n{}\n--- Fim de {} ---",
                            file.name, text, file.name
                        ));
                    }
                    Ok(bytes) => {
                        expanded.push_str(&format!(
                            "\n\n[Arquivo anexado: {} ({} bytes, grande demais para inline)]",
                            file.name,
                            bytes.len()
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(id, error = %e, "failed to read attachment");
                        expanded.push_str(&format!(
                            "\n\n[Arquivo anexado ilegível: {}]",
                            file.name
                        ));
                    }
                },
                FileKind::Image => match std::fs::read(&file.path) {
                    Ok(bytes) => {
                        let mime = image_mime(&file.name);
                        let encoded =
                            base64::engine::general_purpose::STANDARD.encode(&bytes);
                        expanded.push_str(&format!(
                            "\n\n[Imagem anexada: {} — data:{mime};base64,{encoded}]",
                            file.name
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(id, error = %e, "failed to read image attachment");
                        expanded.push_str(&format!(
                            "\n\n[Imagem anexada ilegível: {}]",
                            file.name
                        ));
                    }
                },
                FileKind::Binary => {
                    expanded.push_str(&format!("\n\n[Arquivo anexado: {}]", file.name));
                }
            }
        }
        expanded
    }
}

fn kind_of(name: &str) -> FileKind {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "csv" | "json" | "yaml" | "yml" | "toml" | "log" | "py" | "rs"
        | "sh" | "html" | "css" | "js" | "ts" | "xml" => FileKind::Text,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" => FileKind::Image,
        _ => FileKind::Binary,
    }
}

fn image_mime(name: &str) -> &'static str {
    let lowered = name.to_lowercase();
    if lowered.ends_with(".png") {
        "image/png"
    } else if lowered.ends_with(".gif") {
        "image/gif"
    } else if lowered.ends_with(".webp") {
        "image/webp"
    } else if lowered.ends_with(".bmp") {
        "image/bmp"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(files: &[(&str, &str, &[u8])]) -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        for (id, name, bytes) in files {
            std::fs::write(dir.path().join(format!("{id}_{name}")), bytes).unwrap();
        }
        let store = FileStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn find_resolves_id_and_name() {
        let (_dir, store) = store_with(&[("f1", "notes.txt", b"hello")]);
        let file = store.find("f1").unwrap();
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.kind, FileKind::Text);
        assert!(store.find("missing").is_none());
    }

    #[test]
    fn check_resolvable_flags_missing_ids() {
        let (_dir, store) = store_with(&[("f1", "a.txt", b"x")]);
        assert!(store.check_resolvable(&["f1".into()]).is_ok());
        assert!(store
            .check_resolvable(&["f1".into(), "ghost".into()])
            .is_err());
    }

    #[test]
    fn text_files_are_inlined() {
        let (_dir, store) = store_with(&[("f1", "notes.txt", b"linha um")]);
        let expanded = store.expand_message("Analise o arquivo", &["f1".into()]);
        assert!(expanded.starts_with("Analise o arquivo"));
        assert!(expanded.contains("linha um"));
        assert!(expanded.contains("Conteúdo de notes.txt"));
    }

    #[test]
    fn images_become_data_uris() {
        let (_dir, store) = store_with(&[("f2", "shot.png", &[137u8, 80, 78, 71][..])]);
        let expanded = store.expand_message("veja", &["f2".into()]);
        assert!(expanded.contains("data:image/png;base64,"));
    }

    #[test]
    fn binaries_are_noted_by_name() {
        let (_dir, store) = store_with(&[("f3", "dump.bin", &[0u8, 1, 2][..])]);
        let expanded = store.expand_message("veja", &["f3".into()]);
        assert!(expanded.contains("[Arquivo anexado: dump.bin]"));
        assert!(!expanded.contains("base64"));
    }

    #[test]
    fn no_attachments_returns_original() {
        let (_dir, store) = store_with(&[]);
        assert_eq!(store.expand_message("Oi", &[]), "Oi");
    }
}
