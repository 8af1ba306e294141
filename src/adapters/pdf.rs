use crate::domain::ports::PdfRenderer;
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// 透過外部 HTML→PDF 程式 (預設 `weasyprint - -`) 產生 PDF：HTML 由 stdin 輸入，PDF 由 stdout 讀回
pub struct CommandPdfRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandPdfRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl PdfRenderer for CommandPdfRenderer {
    async fn render_pdf(&self, html: &str) -> Result<Vec<u8>> {
        tracing::debug!("📄 Rendering PDF with {} {:?}", self.program, self.args);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::RenderError {
                message: format!("Failed to start {}: {}", self.program, e),
            })?;

        // 寫入 stdin 與讀取 stdout 同時進行，避免邊讀邊輸出的程式把 pipe 塞滿
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                // 程式提早結束時寫入會失敗，結果以 exit status 為準
                if let Err(e) = stdin.write_all(html.as_bytes()).await {
                    tracing::debug!("PDF renderer stdin closed early: {}", e);
                }
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());
        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!("⚠️ PDF renderer exited with {}: {}", output.status, stderr.trim());
            return Err(AppError::RenderError {
                message: format!("{} exited with {}", self.program, output.status),
            });
        }
        if output.stdout.is_empty() {
            return Err(AppError::RenderError {
                message: format!("{} produced no output", self.program),
            });
        }

        Ok(output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_is_read_from_stdout() {
        // cat 直接回傳 stdin 內容
        let renderer = CommandPdfRenderer::new("cat", vec![]);
        let bytes = renderer.render_pdf("<html>hi</html>").await.unwrap();
        assert_eq!(bytes, b"<html>hi</html>");
    }

    #[tokio::test]
    async fn test_large_documents_do_not_block_on_pipes() {
        let renderer = CommandPdfRenderer::new("cat", vec![]);
        let html = format!("<html>{}</html>", "x".repeat(512 * 1024));

        let bytes = tokio::time::timeout(std::time::Duration::from_secs(20), renderer.render_pdf(&html))
            .await
            .expect("renderer finished")
            .unwrap();
        assert_eq!(bytes.len(), html.len());
    }

    #[tokio::test]
    async fn test_failing_program_is_a_render_error() {
        let renderer = CommandPdfRenderer::new("false", vec![]);
        let err = renderer.render_pdf("<html></html>").await.unwrap_err();
        assert!(matches!(err, AppError::RenderError { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_render_error() {
        let renderer = CommandPdfRenderer::new("definitely-not-a-pdf-tool", vec![]);
        let err = renderer.render_pdf("<html></html>").await.unwrap_err();
        assert!(matches!(err, AppError::RenderError { .. }));
    }
}
