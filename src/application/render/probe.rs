use std::{path::Path, process::Stdio};

use tracing::debug;

use super::process::ProcessEnv;

/// Best-effort check for whether an external binary can be invoked.
#[derive(Debug, Clone, Default)]
pub struct CommandProber {
    env: ProcessEnv,
}

impl CommandProber {
    pub fn new(env: ProcessEnv) -> Self {
        Self { env }
    }

    /// Run `program args...` with all streams discarded.
    ///
    /// Exit code 1 still counts as available: several tools reject `--version`
    /// or `--help` on some builds while being perfectly usable.
    pub async fn is_available(&self, program: &Path, args: &[&str]) -> bool {
        let status = self
            .env
            .command(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        let available = match &status {
            Ok(status) => matches!(status.code(), Some(0 | 1)),
            Err(_) => false,
        };

        debug!(
            target = "application::render::probe",
            program = %program.display(),
            available,
            exit_code = status
                .as_ref()
                .ok()
                .and_then(|status| status.code())
                .map(i64::from)
                .unwrap_or(-1),
            "Probed external command"
        );

        available
    }
}
