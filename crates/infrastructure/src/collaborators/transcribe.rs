use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use filepipe_domain::{Transcriber, Transcript};
use filepipe_errors::{PipelineError, PipelineResult};

/// 外部命令转写器
///
/// 约定：`<command> <音频路径> <置信度阈值>`，stdout输出
/// `{"text": "...", "duration_seconds": 12.5}`。
pub struct CommandTranscriber {
    program: String,
    base_args: Vec<String>,
}

impl CommandTranscriber {
    pub fn new(command: &str) -> PipelineResult<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| PipelineError::config_error("转写命令为空"))?;
        Ok(Self {
            program,
            base_args: parts.collect(),
        })
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, path: &Path, threshold: f64) -> PipelineResult<Transcript> {
        let output = Command::new(&self.program)
            .args(&self.base_args)
            .arg(path)
            .arg(threshold.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::Transcription(format!("启动转写命令失败: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Transcription(format!(
                "转写命令退出码 {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::Transcription(format!("转写输出不是合法JSON: {e}")))?;
        let text = value["text"]
            .as_str()
            .ok_or_else(|| PipelineError::Transcription("转写输出缺少text字段".to_string()))?
            .to_string();
        let duration_seconds = value["duration_seconds"].as_f64().unwrap_or(0.0);

        debug!(path = %path.display(), chars = text.len(), "转写命令完成");
        Ok(Transcript {
            text,
            duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parses_command_json_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("stt.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '{\"text\": \"你好\", \"duration_seconds\": 1.5}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transcriber = CommandTranscriber::new(script.to_str().unwrap()).unwrap();
        let transcript = transcriber
            .transcribe(Path::new("/tmp/a.mp3"), 0.5)
            .await
            .unwrap();
        assert_eq!(transcript.text, "你好");
        assert!((transcript.duration_seconds - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_missing_command_fails() {
        let transcriber = CommandTranscriber::new("/nonexistent/transcriber").unwrap();
        assert!(transcriber
            .transcribe(Path::new("/tmp/a.mp3"), 0.5)
            .await
            .is_err());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandTranscriber::new("   ").is_err());
    }
}
