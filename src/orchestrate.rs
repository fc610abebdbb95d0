use std::fmt;

use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::registry::{DeviceRegistry, Node};
use crate::settings::OrchestrationSettings;

/// One `tmux` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxStep {
    pub args: Vec<String>,
    /// Failure is expected and ignored (killing a session that does not exist).
    pub may_fail: bool,
}

impl TmuxStep {
    fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            may_fail: false,
        }
    }
}

impl fmt::Display for TmuxStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmux")?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// A tiled tmux session with one pane per testbed node.
#[derive(Debug, Clone)]
pub struct TmuxPlan {
    pub session: String,
    pub steps: Vec<TmuxStep>,
}

fn render(template: &str, node: &Node) -> String {
    template
        .replace("{username}", &node.username)
        .replace("{address}", &node.address)
        .replace("{serial}", &node.serial)
}

impl TmuxPlan {
    /// Center pane first, then one pane per leaf in registry order.
    pub fn build(registry: &DeviceRegistry, settings: &OrchestrationSettings) -> Self {
        let session = settings.session_name.clone();
        let mut steps = vec![
            TmuxStep {
                may_fail: true,
                ..TmuxStep::new(["kill-session", "-t", session.as_str()])
            },
            TmuxStep::new(["new-session", "-d", "-s", session.as_str()]),
        ];

        for (pane, node) in registry.nodes().enumerate() {
            let command = if registry.is_center(&node.serial) {
                render(&settings.cent_template, node)
            } else {
                render(&settings.leaf_template, node)
            };

            let target = if pane == 0 {
                format!("{session}:0")
            } else {
                steps.push(TmuxStep::new(["split-window", "-h", "-t", session.as_str()]));
                steps.push(TmuxStep::new(["select-layout", "-t", session.as_str(), "tiled"]));
                format!("{session}:0.{pane}")
            };
            steps.push(TmuxStep::new([
                "send-keys".to_string(),
                "-t".to_string(),
                target,
                command,
                "C-m".to_string(),
            ]));
        }

        steps.push(TmuxStep::new(["attach-session", "-t", session.as_str()]));
        Self { session, steps }
    }

    /// Run every step in order, stopping at the first unexpected failure.
    pub async fn execute(&self) -> Result<()> {
        info!("Starting tmux session {} ({} steps)", self.session, self.steps.len());

        for step in &self.steps {
            debug!("{step}");
            let status = Command::new("tmux")
                .args(&step.args)
                .status()
                .await
                .with_context(|| format!("failed to launch `{step}`"))
                .map_err(Error::Config)?;

            if !status.success() {
                if step.may_fail {
                    warn!("`{step}` exited with {status}; continuing");
                    continue;
                }
                return Err(Error::Config(anyhow!("`{step}` exited with {status}")));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TmuxPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{step}")?;
        }
        Ok(())
    }
}
