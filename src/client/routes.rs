use super::*;
use crate::snapshot::{StaticRoute, build_delete_route_command, route_grep_pattern};

impl Client {
    /// The route to `prefix`/`mask` with all of its gateways.
    pub async fn get_static_route(&self, prefix: &str, mask: &str) -> Result<StaticRoute, RtxError> {
        let snapshot = self.read_config(&route_grep_pattern(prefix, mask)).await?;
        snapshot
            .extract_static_routes()
            .into_iter()
            .find(|route| route.prefix == prefix && route.mask == mask)
            .ok_or_else(|| RtxError::NotFound(format!("static route {prefix}/{mask}")))
    }

    pub async fn list_static_routes(&self) -> Result<Vec<StaticRoute>, RtxError> {
        let snapshot = self.read_config("ip route ").await?;
        Ok(snapshot.extract_static_routes())
    }

    pub async fn create_static_route(&self, route: &StaticRoute) -> Result<(), RtxError> {
        self.apply("create-static-route", route_commands(route)?)
            .await
    }

    /// Replaces every gateway of an existing route.
    pub async fn update_static_route(&self, route: &StaticRoute) -> Result<(), RtxError> {
        let mut commands = route_commands(route)?;
        self.get_static_route(&route.prefix, &route.mask).await?;
        commands.insert(0, build_delete_route_command(&route.prefix, &route.mask));
        self.apply("update-static-route", commands).await
    }

    pub async fn delete_static_route(&self, prefix: &str, mask: &str) -> Result<(), RtxError> {
        self.apply(
            "delete-static-route",
            vec![build_delete_route_command(prefix, mask)],
        )
        .await
    }
}

fn route_commands(route: &StaticRoute) -> Result<Vec<String>, RtxError> {
    let commands = route.to_commands();
    if commands.len() != route.next_hops.len() || commands.is_empty() {
        return Err(RtxError::InvalidConfig(format!(
            "route {} needs a gateway address or interface on every hop",
            route.network()
        )));
    }
    Ok(commands)
}
