//! Chart executor backed by the `helm` binary
//!
//! Change detection compares the release's rendered manifest before and after
//! an upgrade, so re-applying identical values reports `changed == false`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{Chart, ChartExecutor, State, Values};
use crate::error::{Error, Result};

/// Shells out to helm for every release operation
#[derive(Clone, Debug)]
pub struct HelmCli {
    binary: PathBuf,
    charts_dir: PathBuf,
    kubeconfig: Option<PathBuf>,
}

struct HelmOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>, charts_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            charts_dir: charts_dir.into(),
            kubeconfig: None,
        }
    }

    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    fn chart_path(&self, chart: &Chart) -> PathBuf {
        self.charts_dir.join(chart.name)
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<HelmOutput> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(kubeconfig) = &self.kubeconfig {
            command.env("KUBECONFIG", kubeconfig);
        }

        debug!("Running helm {}", args.join(" "));
        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            // Dropping the pipe closes stdin so helm stops reading
            drop(pipe);
        }
        let output = child.wait_with_output().await?;

        Ok(HelmOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn failure(chart: &Chart, action: &str, output: &HelmOutput) -> Error {
        Error::ChartError {
            chart: chart.to_string(),
            message: format!("helm {} failed: {}", action, output.stderr.trim()),
        }
    }

    /// Rendered manifest of the current release, or `None` when not installed
    async fn release_manifest(&self, chart: &Chart) -> Result<Option<String>> {
        let output = self
            .run(
                &[
                    "get",
                    "manifest",
                    chart.install_name,
                    "--namespace",
                    chart.namespace,
                ],
                None,
            )
            .await?;

        if output.success {
            Ok(Some(output.stdout))
        } else if output.stderr.contains("not found") {
            Ok(None)
        } else {
            Err(Self::failure(chart, "get manifest", &output))
        }
    }

    async fn upgrade(&self, chart: &Chart, install: bool, values: Option<&Values>) -> Result<()> {
        let chart_path = self.chart_path(chart);
        let chart_path = chart_path.to_string_lossy();
        let mut args = vec!["upgrade"];
        if install {
            args.push("--install");
        }
        args.extend([
            chart.install_name,
            chart_path.as_ref(),
            "--namespace",
            chart.namespace,
            "--reuse-values",
            "--values",
            "-",
        ]);

        // JSON is valid YAML, which is what helm expects on stdin
        let document = match values {
            Some(values) => serde_json::to_vec(values)?,
            None => b"{}".to_vec(),
        };
        let output = self.run(&args, Some(&document)).await?;
        if output.success {
            Ok(())
        } else {
            Err(Self::failure(
                chart,
                if install { "install" } else { "upgrade" },
                &output,
            ))
        }
    }

    async fn uninstall(&self, chart: &Chart) -> Result<()> {
        let output = self
            .run(
                &[
                    "uninstall",
                    chart.install_name,
                    "--namespace",
                    chart.namespace,
                ],
                None,
            )
            .await?;
        if output.success || output.stderr.contains("not found") {
            Ok(())
        } else {
            Err(Self::failure(chart, "uninstall", &output))
        }
    }
}

#[async_trait]
impl ChartExecutor for HelmCli {
    #[instrument(skip(self, values), fields(chart = %chart, state = %state))]
    async fn apply(&self, chart: &Chart, state: State, values: Option<&Values>) -> Result<bool> {
        let before = self.release_manifest(chart).await?;

        match (state, before) {
            (State::Deleted, None) | (State::UpgradeOnly, None) => {
                debug!("Release {} not installed, nothing to do for {}", chart, state);
                Ok(false)
            }
            (State::Deleted, Some(_)) => {
                self.uninstall(chart).await?;
                info!("Uninstalled release {}", chart);
                Ok(true)
            }
            (State::Present, None) => {
                self.upgrade(chart, true, values).await?;
                info!("Installed release {}", chart);
                Ok(true)
            }
            (State::Present, Some(before)) | (State::UpgradeOnly, Some(before)) => {
                self.upgrade(chart, false, values).await?;
                let after = self.release_manifest(chart).await?;
                let changed = after.as_deref() != Some(before.as_str());
                info!("Upgraded release {} (changed: {})", chart, changed);
                Ok(changed)
            }
        }
    }
}
