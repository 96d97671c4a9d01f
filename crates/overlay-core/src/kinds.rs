//! Declared kind → graph-native type translation.

/// Provider resource types and the type names the graph stores for them.
const KIND_TABLE: &[(&str, &str)] = &[
    ("azurerm_resource_group", "Microsoft.Resources/resourceGroups"),
    ("azurerm_virtual_machine", "Microsoft.Compute/virtualMachines"),
    ("azurerm_linux_virtual_machine", "Microsoft.Compute/virtualMachines"),
    ("azurerm_windows_virtual_machine", "Microsoft.Compute/virtualMachines"),
    ("azurerm_managed_disk", "Microsoft.Compute/disks"),
    ("azurerm_availability_set", "Microsoft.Compute/availabilitySets"),
    ("azurerm_virtual_network", "Microsoft.Network/virtualNetworks"),
    ("azurerm_subnet", "Microsoft.Network/subnets"),
    ("azurerm_network_interface", "Microsoft.Network/networkInterfaces"),
    ("azurerm_network_security_group", "Microsoft.Network/networkSecurityGroups"),
    ("azurerm_public_ip", "Microsoft.Network/publicIPAddresses"),
    ("azurerm_lb", "Microsoft.Network/loadBalancers"),
    ("azurerm_bastion_host", "Microsoft.Network/bastionHosts"),
    ("azurerm_firewall", "Microsoft.Network/azureFirewalls"),
    ("azurerm_storage_account", "Microsoft.Storage/storageAccounts"),
    ("azurerm_key_vault", "Microsoft.KeyVault/vaults"),
    ("azurerm_mssql_server", "Microsoft.Sql/servers"),
    ("azurerm_mssql_database", "Microsoft.Sql/servers/databases"),
    ("azurerm_kubernetes_cluster", "Microsoft.ContainerService/managedClusters"),
    ("azurerm_container_registry", "Microsoft.ContainerRegistry/registries"),
    ("azurerm_app_service_plan", "Microsoft.Web/serverFarms"),
    ("azurerm_service_plan", "Microsoft.Web/serverFarms"),
    ("azurerm_linux_web_app", "Microsoft.Web/sites"),
    ("azurerm_windows_web_app", "Microsoft.Web/sites"),
    ("azurerm_log_analytics_workspace", "Microsoft.OperationalInsights/workspaces"),
    ("azurerm_user_assigned_identity", "Microsoft.ManagedIdentity/userAssignedIdentities"),
];

/// Translate a declared kind to the graph's native type name.
///
/// Kinds outside the table are assumed to already be native type names.
pub fn native_type(kind: &str) -> &str {
    KIND_TABLE
        .iter()
        .find(|(declared, _)| *declared == kind)
        .map(|(_, native)| *native)
        .unwrap_or(kind)
}

/// Whether the kind has an explicit translation.
pub fn is_known_kind(kind: &str) -> bool {
    KIND_TABLE.iter().any(|(declared, _)| *declared == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_kinds_translate() {
        assert_eq!(
            native_type("azurerm_linux_virtual_machine"),
            "Microsoft.Compute/virtualMachines"
        );
        assert_eq!(native_type("azurerm_subnet"), "Microsoft.Network/subnets");
        assert!(is_known_kind("azurerm_key_vault"));
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        assert_eq!(native_type("Custom.Thing/widgets"), "Custom.Thing/widgets");
        assert!(!is_known_kind("Custom.Thing/widgets"));
    }
}
