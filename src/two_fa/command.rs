use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{CustomTwoFa, Device, Resolution, TwoFactorChallenge};

/// Runs an operator-supplied shell command and reads the 2FA code from its output.
///
/// The selected device name is exported as `GATEKEEP_TWO_FA_DEVICE`. A command that
/// prints no digits acknowledges the challenge without a code.
#[derive(Clone, Debug)]
pub struct CommandTwoFa {
    program: String,
    args: Vec<String>,
}

impl CommandTwoFa {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Run `command_line` through `sh -c`.
    #[must_use]
    pub fn shell(command_line: &str) -> Self {
        Self::new("sh", vec!["-c".to_string(), command_line.to_string()])
    }
}

fn extract_code(output: &str) -> Option<&str> {
    Regex::new(r"\d+")
        .ok()
        .and_then(|re| re.find(output))
        .map(|found| found.as_str())
}

#[async_trait]
impl CustomTwoFa for CommandTwoFa {
    #[instrument(skip(self, challenge), fields(program = %self.program))]
    async fn resolve(
        &self,
        challenge: &TwoFactorChallenge,
        device: Option<&Device>,
    ) -> Result<Resolution> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("GATEKEEP_TWO_FA_STRATEGY", challenge.strategy.as_str())
            .kill_on_drop(true);
        if let Some(device) = device {
            command.env("GATEKEEP_TWO_FA_DEVICE", &device.name);
        }

        let output = command
            .output()
            .await
            .with_context(|| format!("failed to run 2FA command {}", self.program))?;

        if !output.status.success() {
            return Err(anyhow!(
                "2FA command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("2FA command finished");

        Ok(extract_code(&stdout).map_or(Resolution::Ack, |code| Resolution::Code(code.to_string())))
    }
}
