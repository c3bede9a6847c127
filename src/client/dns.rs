use super::*;
use crate::snapshot::{DnsConfig, build_delete_dns_commands, build_dns_commands};

impl Client {
    /// Router DNS settings. Not found when the configuration has no `dns` line.
    pub async fn get_dns_config(&self) -> Result<DnsConfig, RtxError> {
        let snapshot = self.read_config("dns ").await?;
        snapshot
            .extract_dns()
            .ok_or_else(|| RtxError::NotFound("dns configuration".to_string()))
    }

    /// Replaces the DNS settings: whatever is configured now is reset first.
    pub async fn update_dns_config(&self, config: &DnsConfig) -> Result<(), RtxError> {
        let mut commands = match self.get_dns_config().await {
            Ok(current) => build_delete_dns_commands(&current),
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };
        commands.extend(build_dns_commands(config));
        if commands.is_empty() {
            debug!("{} dns already at defaults", self.device_addr);
            return Ok(());
        }
        self.apply("update-dns", commands).await
    }

    /// Resets every DNS setting. Succeeds when nothing is configured.
    pub async fn delete_dns_config(&self) -> Result<(), RtxError> {
        let current = match self.get_dns_config().await {
            Ok(current) => current,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        let commands = build_delete_dns_commands(&current);
        if commands.is_empty() {
            return Ok(());
        }
        self.apply("delete-dns", commands).await
    }
}
