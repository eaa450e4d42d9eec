//! The concrete pipeline stages.
//!
//! Canonical order: enumerate → resolve → portscan → vulnscan → diff →
//! report. The first four wrap external scanning tools; diff and report
//! are pure consumers of the artifacts the others leave under the
//! working directory.

pub mod diff;
pub mod enumerate;
pub mod portscan;
pub mod report;
pub mod resolve;
pub mod vulnscan;

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use outpost_store::RunStore;

use crate::config::ReconConfig;
use crate::error::{ReconError, Result};
use crate::stage::{StageContext, StageRegistry};

pub use diff::DiffStage;
pub use enumerate::EnumerateStage;
pub use portscan::PortscanStage;
pub use report::ReportStage;
pub use resolve::ResolveStage;
pub use vulnscan::VulnscanStage;

/// Build the full stage registry in canonical order.
pub fn default_registry(config: &ReconConfig, store: Arc<dyn RunStore>) -> StageRegistry {
    let mut registry = StageRegistry::new();
    registry
        .register(Arc::new(EnumerateStage::new(config.tools.clone())))
        .register(Arc::new(ResolveStage::new(config.tools.clone())))
        .register(Arc::new(PortscanStage::new(config.tools.clone())))
        .register(Arc::new(VulnscanStage::new(config.tools.clone())))
        .register(Arc::new(DiffStage::new(store)))
        .register(Arc::new(ReportStage));
    registry
}

/// Run an external tool to completion, optionally feeding its stdin.
///
/// Spawn failure maps to [`ReconError::ToolNotFound`], a non-zero exit to
/// [`ReconError::ToolFailed`] with captured stderr, and an elapsed run
/// deadline to [`ReconError::DeadlineExceeded`]. On deadline expiry the
/// child is killed, so no scan traffic outlives the stage.
///
/// Stdin is fed concurrently with output collection: tools like dnsx and
/// nuclei stream results while still reading input, and writing the
/// whole input up front would deadlock once their stdout pipe fills.
pub(crate) async fn run_tool(
    ctx: &StageContext,
    tool: &'static str,
    program: &str,
    args: &[String],
    stdin_data: Option<String>,
) -> Result<Vec<u8>> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ReconError::ToolNotFound {
        tool,
        path: format!("{program}: {e}"),
    })?;

    let stdin_pipe = child.stdin.take();
    let feed = async move {
        if let (Some(mut pipe), Some(data)) = (stdin_pipe, stdin_data) {
            // The child may exit without draining its input; that shows
            // up in its exit status, not as a broken pipe here.
            let _ = pipe.write_all(data.as_bytes()).await;
        }
        // Dropping the pipe closes the child's stdin.
    };
    let wait = child.wait_with_output();
    let collect = async { tokio::join!(feed, wait).1 };

    let output = match ctx.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, collect)
            .await
            .map_err(|_| ReconError::DeadlineExceeded)??,
        None => collect.await?,
    };

    if !output.status.success() {
        return Err(ReconError::ToolFailed {
            tool,
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use outpost_store::MemoryRunStore;

    use crate::scope::Scope;

    use super::*;

    fn context() -> StageContext {
        StageContext {
            target: "example.com".to_string(),
            workdir: PathBuf::from("/tmp/run"),
            deadline: None,
            scope: Arc::new(Scope::default()),
        }
    }

    #[test]
    fn registry_order_is_canonical() {
        let registry = default_registry(
            &ReconConfig::default(),
            Arc::new(MemoryRunStore::new()),
        );
        assert_eq!(
            registry.names(),
            vec!["enumerate", "resolve", "portscan", "vulnscan", "diff", "report"]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_tool_not_found() {
        let err = run_tool(&context(), "subfinder", "/nonexistent/subfinder", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconError::ToolNotFound { tool: "subfinder", .. }
        ));
    }

    #[tokio::test]
    async fn nonzero_exit_captures_stderr() {
        let args = vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()];
        let err = run_tool(&context(), "nmap", "sh", &args, None)
            .await
            .unwrap_err();
        match err {
            ReconError::ToolFailed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stdin_is_fed_to_the_child() {
        let args = vec!["-c".to_string(), "cat".to_string()];
        let out = run_tool(&context(), "dnsx", "sh", &args, Some("a\nb\n".to_string()))
            .await
            .unwrap();
        assert_eq!(out, b"a\nb\n");
    }

    #[tokio::test]
    async fn large_stdin_streams_against_an_echoing_child() {
        // cat writes while it reads: feeding input that far exceeds the
        // pipe capacity only completes when the write and the output
        // collection run concurrently.
        let input = "a.example.com\n".repeat(80_000); // ~1 MB
        let args = vec!["-c".to_string(), "cat".to_string()];
        let out = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            run_tool(&context(), "dnsx", "sh", &args, Some(input.clone())),
        )
        .await
        .expect("run_tool wedged on large stdin")
        .unwrap();
        assert_eq!(out.len(), input.len());
    }

    #[tokio::test]
    async fn expired_deadline_stops_waiting() {
        let mut ctx = context();
        ctx.deadline = Some(tokio::time::Instant::now());
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = run_tool(&ctx, "nuclei", "sh", &args, None).await.unwrap_err();
        assert!(matches!(err, ReconError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn expired_deadline_kills_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("still-alive");
        let mut ctx = context();
        ctx.deadline = Some(tokio::time::Instant::now());

        let args = vec![
            "-c".to_string(),
            format!("sleep 0.5; touch {}", marker.display()),
        ];
        let err = run_tool(&ctx, "nmap", "sh", &args, None).await.unwrap_err();
        assert!(matches!(err, ReconError::DeadlineExceeded));

        // A surviving child would write the marker at the 0.5 s mark.
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(!marker.exists(), "child outlived the deadline");
    }
}
