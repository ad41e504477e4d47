//! Packet filter backed by the `iptables` binary

use async_trait::async_trait;
use tracing::debug;

use kube_pat_common::shell::{self, IPTABLES_CMD};
use kube_pat_common::{PacketFilter, PatError, PatResult};

use crate::commands::*;

/// iptables exit code when `-C` finds no matching rule
const CHECK_NOT_FOUND: i32 = 1;

/// [`PacketFilter`] running iptables through the shell
#[derive(Debug, Clone)]
pub struct Iptables {
    binary: String,
}

impl Iptables {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new(IPTABLES_CMD)
    }
}

#[async_trait]
impl PacketFilter for Iptables {
    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> PatResult<()> {
        let cmd = build_append_cmd(&self.binary, table, chain, rule);
        shell::exec_or_throw(&cmd).await?;
        Ok(())
    }

    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> PatResult<bool> {
        let cmd = build_check_cmd(&self.binary, table, chain, rule);
        let result = shell::exec(&cmd).await?;
        match result.exit_code {
            0 => Ok(true),
            CHECK_NOT_FOUND => {
                debug!(table, chain, "Rule not present");
                Ok(false)
            }
            exit_code => Err(PatError::ShellCommandFailed {
                command: cmd,
                exit_code,
                output: result.combined_output(),
            }),
        }
    }

    async fn clear_chain(&self, table: &str, chain: &str) -> PatResult<()> {
        let cmd = build_flush_cmd(&self.binary, table, chain);
        shell::exec_or_throw(&cmd).await?;
        Ok(())
    }

    async fn list(&self, table: &str, chain: &str) -> PatResult<Vec<String>> {
        let cmd = build_list_cmd(&self.binary, table, chain);
        let output = shell::exec_or_throw(&cmd).await?;
        Ok(output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}
