use super::*;
use crate::snapshot::{IpFilter, build_delete_ip_filter_command, build_ip_filter_command};

const ACTIONS: &[&str] = &[
    "pass",
    "reject",
    "restrict",
    "pass-log",
    "pass-nolog",
    "reject-log",
    "reject-nolog",
    "restrict-log",
    "restrict-nolog",
];

impl Client {
    pub async fn get_ip_filter(&self, number: u32) -> Result<IpFilter, RtxError> {
        let snapshot = self.read_config(&format!("ip filter {number} ")).await?;
        snapshot
            .extract_ip_filters()
            .into_iter()
            .find(|f| f.number == number)
            .ok_or_else(|| RtxError::NotFound(format!("ip filter {number}")))
    }

    pub async fn list_ip_filters(&self) -> Result<Vec<IpFilter>, RtxError> {
        let snapshot = self.read_config("ip filter ").await?;
        Ok(snapshot.extract_ip_filters())
    }

    pub async fn create_ip_filter(&self, filter: &IpFilter) -> Result<(), RtxError> {
        validate_filter(filter)?;
        self.apply("create-ip-filter", vec![build_ip_filter_command(filter)])
            .await
    }

    /// Overwrites an existing rule. The router replaces a numbered filter in
    /// place, so no delete is needed.
    pub async fn update_ip_filter(&self, filter: &IpFilter) -> Result<(), RtxError> {
        validate_filter(filter)?;
        self.get_ip_filter(filter.number).await?;
        self.apply("update-ip-filter", vec![build_ip_filter_command(filter)])
            .await
    }

    pub async fn delete_ip_filter(&self, number: u32) -> Result<(), RtxError> {
        self.apply(
            "delete-ip-filter",
            vec![build_delete_ip_filter_command(number)],
        )
        .await
    }
}

fn validate_filter(filter: &IpFilter) -> Result<(), RtxError> {
    if filter.number == 0 {
        return Err(RtxError::InvalidConfig(
            "ip filter number must be positive".to_string(),
        ));
    }
    if !ACTIONS.contains(&filter.action.as_str()) {
        return Err(RtxError::InvalidConfig(format!(
            "ip filter {}: unknown action '{}'",
            filter.number, filter.action
        )));
    }
    Ok(())
}
