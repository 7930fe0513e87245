//! Data Integrity Verifier
//!
//! Writes a marker file inside a running workload and digests it with
//! `sha256sum`. Digests taken before and after a data-preserving operation
//! must be identical.

use crate::domain::model::{ChecksumRecord, Labels, WorkloadSpec};
use crate::domain::ports::WorkloadExecutorRef;
use crate::error::{Error, Result};
use tracing::{debug, info};

/// Quote a word for `sh`
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn sh(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

/// Command printing the SHA-256 digest of `path`
pub fn digest_command(path: &str) -> Vec<String> {
    sh(format!("sha256sum {}", shell_quote(path)))
}

/// Command writing `content` to `path`, replacing any previous content
pub fn marker_command(path: &str, content: &str) -> Vec<String> {
    sh(format!(
        "printf %s {} > {}",
        shell_quote(content),
        shell_quote(path)
    ))
}

/// Extract the digest from `sha256sum` output
pub fn parse_digest(stdout: &str) -> Option<String> {
    let token = stdout.split_whitespace().next()?;
    let valid = token.len() == 64 && token.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
    valid.then(|| token.to_string())
}

/// Runs digest and marker commands through the execution port
#[derive(Clone)]
pub struct IntegrityVerifier {
    executor: WorkloadExecutorRef,
}

impl IntegrityVerifier {
    pub fn new(executor: WorkloadExecutorRef) -> Self {
        Self { executor }
    }

    /// Write a non-empty marker file at `path` inside the selected workload
    pub async fn write_marker(
        &self,
        workload: &WorkloadSpec,
        path: &str,
        selector: &Labels,
        content: &str,
    ) -> Result<()> {
        let command = marker_command(path, content);
        let output = self
            .executor
            .exec_in_workload(&workload.namespace, selector, &command)
            .await?;
        if !output.stderr.trim().is_empty() {
            return Err(Error::Execution {
                workload: workload.name.clone(),
                command: command.join(" "),
                reason: output.stderr.trim().to_string(),
            });
        }
        info!("Wrote marker {} in {}", path, workload.id());
        Ok(())
    }

    /// Digest the file at `path` inside the selected workload
    pub async fn capture_checksum(
        &self,
        workload: &WorkloadSpec,
        path: &str,
        selector: &Labels,
    ) -> Result<ChecksumRecord> {
        let command = digest_command(path);
        let output = self
            .executor
            .exec_in_workload(&workload.namespace, selector, &command)
            .await?;

        let digest = parse_digest(&output.stdout).ok_or_else(|| Error::Execution {
            workload: workload.name.clone(),
            command: command.join(" "),
            reason: if output.stderr.trim().is_empty() {
                format!("unexpected digest output '{}'", output.stdout.trim())
            } else {
                output.stderr.trim().to_string()
            },
        })?;

        debug!("Checksum of {} in {}: {}", path, workload.id(), digest);
        Ok(ChecksumRecord {
            workload: workload.name.clone(),
            path: path.to_string(),
            digest,
            taken_at: chrono::Utc::now(),
        })
    }
}

/// Require two digests of the same file to be identical
pub fn assert_equal(expected: &ChecksumRecord, actual: &ChecksumRecord) -> Result<()> {
    if expected.digest != actual.digest {
        return Err(Error::ChecksumMismatch {
            path: actual.path.clone(),
            expected: expected.digest.clone(),
            actual: actual.digest.clone(),
        });
    }
    info!(
        "Checksum of {} in {} matches {}",
        actual.path, actual.workload, expected.workload
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ExecOutput;
    use crate::domain::ports::WorkloadExecutor;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const DIGEST: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    /// Replays a fixed output and records the commands it received
    struct Scripted {
        output: ExecOutput,
        commands: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl WorkloadExecutor for Scripted {
        async fn exec_in_workload(
            &self,
            _namespace: &str,
            _selector: &Labels,
            command: &[String],
        ) -> Result<ExecOutput> {
            self.commands.lock().push(command.to_vec());
            Ok(self.output.clone())
        }
    }

    fn scripted(stdout: &str, stderr: &str) -> Arc<Scripted> {
        Arc::new(Scripted {
            output: ExecOutput {
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
            commands: Mutex::new(Vec::new()),
        })
    }

    fn workload() -> WorkloadSpec {
        WorkloadSpec {
            name: "csi-rbd-demo-pod".into(),
            namespace: "upgrade".into(),
            labels: Labels::single("app", "upgrade-testing"),
            image: "nginx".into(),
            command: None,
            volume_name: "mypvc".into(),
            mount_path: "/var/lib/www/html".into(),
            claim_name: "rbd-pvc".into(),
        }
    }

    fn record(digest: &str) -> ChecksumRecord {
        ChecksumRecord {
            workload: "w".into(),
            path: "/mnt/testClone".into(),
            digest: digest.into(),
            taken_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/var/lib/www"), "'/var/lib/www'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_parse_digest() {
        let line = format!("{}  /var/lib/www/html/testClone\n", DIGEST);
        assert_eq!(parse_digest(&line).as_deref(), Some(DIGEST));
        assert_eq!(parse_digest(""), None);
        assert_eq!(parse_digest("sha256sum: /x: No such file"), None);
        assert_eq!(parse_digest(&DIGEST.to_uppercase()), None);
    }

    #[test]
    fn test_containing_digest_is_a_mismatch() {
        let short = &DIGEST[..32];
        let result = assert_equal(&record(short), &record(DIGEST));
        assert_matches!(result, Err(Error::ChecksumMismatch { expected, .. }) if expected == short);
        assert!(assert_equal(&record(DIGEST), &record(DIGEST)).is_ok());
    }

    #[tokio::test]
    async fn test_capture_checksum_parses_output() {
        let executor = scripted(&format!("{}  /var/lib/www/html/testClone\n", DIGEST), "");
        let verifier = IntegrityVerifier::new(executor.clone());
        let record = verifier
            .capture_checksum(
                &workload(),
                "/var/lib/www/html/testClone",
                &Labels::single("app", "upgrade-testing"),
            )
            .await
            .unwrap();
        assert_eq!(record.digest, DIGEST);
        assert_eq!(record.workload, "csi-rbd-demo-pod");

        let commands = executor.commands.lock();
        assert_eq!(commands[0][2], "sha256sum '/var/lib/www/html/testClone'");
    }

    #[tokio::test]
    async fn test_capture_checksum_reports_stderr() {
        let executor = scripted("", "sha256sum: /x: No such file or directory");
        let verifier = IntegrityVerifier::new(executor);
        let result = verifier
            .capture_checksum(&workload(), "/x", &Labels::default())
            .await;
        assert_matches!(result, Err(Error::Execution { reason, .. }) if reason.contains("No such file"));
    }

    #[tokio::test]
    async fn test_write_marker_fails_on_stderr() {
        let verifier = IntegrityVerifier::new(scripted("", "Read-only file system"));
        let result = verifier
            .write_marker(&workload(), "/x", &Labels::default(), "marker")
            .await;
        assert_matches!(result, Err(Error::Execution { .. }));
    }
}
