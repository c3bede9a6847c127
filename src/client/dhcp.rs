use super::*;
use crate::snapshot::{
    DhcpBinding, build_delete_dhcp_binding_command, build_dhcp_binding_command,
};

impl Client {
    /// The reservation of `ip_address` in scope `scope_id`.
    pub async fn get_dhcp_binding(
        &self,
        scope_id: u32,
        ip_address: &str,
    ) -> Result<DhcpBinding, RtxError> {
        let snapshot = self
            .read_config(&format!("dhcp scope bind {scope_id} {ip_address} "))
            .await?;
        snapshot
            .extract_dhcp_bindings()
            .into_iter()
            .find(|b| b.scope_id == scope_id && b.ip_address == ip_address)
            .ok_or_else(|| {
                RtxError::NotFound(format!("dhcp binding {ip_address} in scope {scope_id}"))
            })
    }

    pub async fn list_dhcp_bindings(&self, scope_id: u32) -> Result<Vec<DhcpBinding>, RtxError> {
        let snapshot = self
            .read_config(&format!("dhcp scope bind {scope_id} "))
            .await?;
        Ok(snapshot
            .extract_dhcp_bindings()
            .into_iter()
            .filter(|b| b.scope_id == scope_id)
            .collect())
    }

    pub async fn create_dhcp_binding(&self, binding: &DhcpBinding) -> Result<(), RtxError> {
        validate_binding(binding)?;
        self.apply(
            "create-dhcp-binding",
            vec![build_dhcp_binding_command(binding)],
        )
        .await
    }

    /// Rebinds an existing reservation to a new MAC address or client id.
    pub async fn update_dhcp_binding(&self, binding: &DhcpBinding) -> Result<(), RtxError> {
        validate_binding(binding)?;
        self.get_dhcp_binding(binding.scope_id, &binding.ip_address)
            .await?;
        self.apply(
            "update-dhcp-binding",
            vec![
                build_delete_dhcp_binding_command(binding.scope_id, &binding.ip_address),
                build_dhcp_binding_command(binding),
            ],
        )
        .await
    }

    pub async fn delete_dhcp_binding(&self, scope_id: u32, ip_address: &str) -> Result<(), RtxError> {
        self.apply(
            "delete-dhcp-binding",
            vec![build_delete_dhcp_binding_command(scope_id, ip_address)],
        )
        .await
    }
}

fn validate_binding(binding: &DhcpBinding) -> Result<(), RtxError> {
    if binding.ip_address.parse::<std::net::Ipv4Addr>().is_err() {
        return Err(RtxError::InvalidConfig(format!(
            "dhcp binding address '{}' is not IPv4",
            binding.ip_address
        )));
    }
    let target = if binding.use_client_identifier {
        &binding.client_identifier
    } else {
        &binding.mac_address
    };
    if target.trim().is_empty() {
        return Err(RtxError::InvalidConfig(format!(
            "dhcp binding {} needs a MAC address or client identifier",
            binding.ip_address
        )));
    }
    Ok(())
}
