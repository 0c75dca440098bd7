//! Unit tests for the ServerMaintenance reconciler

#[cfg(test)]
mod tests {
    use crate::annotations::{
        MAINTENANCE_APPROVAL_ANNOTATION, MAINTENANCE_NEEDED_ANNOTATION, MAINTENANCE_REASON_ANNOTATION,
        OPERATION_ANNOTATION, OPERATION_IGNORE,
    };
    use crate::test_utils::*;
    use crds::*;
    use std::collections::BTreeMap;

    async fn env_with_server() -> TestEnv {
        let env = TestEnv::new();
        env.create_bmc("bmc-1", "10.0.0.1", &[]).await;
        env.create_server("server-1", "uuid-1", "bmc-1", &[]).await;
        env
    }

    async fn request(env: &TestEnv, name: &str, policy: ServerMaintenancePolicy) -> ServerMaintenance {
        let mut maintenance = ServerMaintenance::new(
            name,
            ServerMaintenanceSpec {
                policy,
                server_ref: Some(LocalObjectReference::new("server-1")),
                server_power: None,
                server_boot_configuration_template: None,
            },
        );
        maintenance.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        maintenance.metadata.annotations = Some(BTreeMap::from([(
            MAINTENANCE_REASON_ANNOTATION.to_string(),
            "firmware".to_string(),
        )]));
        env.objects::<ServerMaintenance>()
            .within(TEST_NAMESPACE)
            .create(&maintenance)
            .await
            .expect("create maintenance")
    }

    async fn delete(env: &TestEnv, name: &str) {
        env.objects::<ServerMaintenance>()
            .within(TEST_NAMESPACE)
            .delete(name)
            .await
            .expect("delete maintenance");
    }

    async fn state(env: &TestEnv, name: &str) -> Option<ServerMaintenanceState> {
        env.maintenance(name).await.and_then(|m| m.state())
    }

    async fn holder(env: &TestEnv) -> Option<String> {
        let server: Server = env.get("server-1").await.unwrap();
        server.spec.maintenance_ref.map(|r| r.name)
    }

    async fn claim_annotations(env: &TestEnv) -> BTreeMap<String, String> {
        let claim = env
            .objects::<ServerClaim>()
            .within(TEST_NAMESPACE)
            .get("claim-1")
            .await
            .expect("claim");
        claim.metadata.annotations.unwrap_or_default()
    }

    #[tokio::test]
    async fn test_unclaimed_server_is_taken_immediately() {
        let env = env_with_server().await;
        request(&env, "m1", ServerMaintenancePolicy::OwnerApproval).await;

        env.converge().await;
        assert_eq!(state(&env, "m1").await, Some(ServerMaintenanceState::InMaintenance));
        assert_eq!(holder(&env).await.as_deref(), Some("m1"));
        let server: Server = env.get("server-1").await.unwrap();
        assert_eq!(server.state(), ServerState::Maintenance);
        assert_eq!(server.spec.power, None);
    }

    #[tokio::test]
    async fn test_one_holder_at_a_time() {
        let env = env_with_server().await;
        request(&env, "m1", ServerMaintenancePolicy::Enforced).await;
        request(&env, "m2", ServerMaintenancePolicy::Enforced).await;

        env.converge().await;
        let first = holder(&env).await.expect("server held");
        let second = if first == "m1" { "m2" } else { "m1" };
        assert_eq!(state(&env, &first).await, Some(ServerMaintenanceState::InMaintenance));
        assert_eq!(state(&env, second).await, Some(ServerMaintenanceState::Pending));

        delete(&env, &first).await;
        env.converge().await;
        assert!(env.maintenance(&first).await.is_none());
        assert_eq!(holder(&env).await.as_deref(), Some(second));
        assert_eq!(state(&env, second).await, Some(ServerMaintenanceState::InMaintenance));
    }

    #[tokio::test]
    async fn test_owner_approval_waits_for_claim_owner() {
        let env = env_with_server().await;
        env.claim_server("server-1", "claim-1").await;
        request(&env, "m1", ServerMaintenancePolicy::OwnerApproval).await;

        env.converge().await;
        assert_eq!(state(&env, "m1").await, Some(ServerMaintenanceState::Pending));
        assert_eq!(holder(&env).await, None);
        let annotations = claim_annotations(&env).await;
        assert_eq!(annotations[MAINTENANCE_NEEDED_ANNOTATION], "true");
        assert_eq!(annotations[MAINTENANCE_REASON_ANNOTATION], "firmware");

        env.annotate_claim("claim-1", MAINTENANCE_APPROVAL_ANNOTATION, "true").await;
        env.converge().await;
        assert_eq!(state(&env, "m1").await, Some(ServerMaintenanceState::InMaintenance));
        let server: Server = env.get("server-1").await.unwrap();
        assert_eq!(server.state(), ServerState::Maintenance);

        delete(&env, "m1").await;
        env.converge().await;
        let server: Server = env.get("server-1").await.unwrap();
        assert_eq!(server.spec.maintenance_ref, None);
        assert_eq!(server.state(), ServerState::Reserved);
        let annotations = claim_annotations(&env).await;
        for key in [
            MAINTENANCE_NEEDED_ANNOTATION,
            MAINTENANCE_APPROVAL_ANNOTATION,
            MAINTENANCE_REASON_ANNOTATION,
        ] {
            assert!(!annotations.contains_key(key), "{key} left on claim");
        }
    }

    #[tokio::test]
    async fn test_enforced_skips_approval_but_notifies_owner() {
        let env = env_with_server().await;
        env.claim_server("server-1", "claim-1").await;
        request(&env, "m1", ServerMaintenancePolicy::Enforced).await;

        env.converge().await;
        assert_eq!(state(&env, "m1").await, Some(ServerMaintenanceState::InMaintenance));
        assert_eq!(claim_annotations(&env).await[MAINTENANCE_NEEDED_ANNOTATION], "true");
    }

    #[tokio::test]
    async fn test_boot_configuration_and_power() {
        let env = env_with_server().await;
        let mut maintenance = ServerMaintenance::new(
            "m1",
            ServerMaintenanceSpec {
                policy: ServerMaintenancePolicy::Enforced,
                server_ref: Some(LocalObjectReference::new("server-1")),
                server_power: Some(Power::On),
                server_boot_configuration_template: Some(ServerBootConfigurationTemplate {
                    name: "m1-boot".to_string(),
                    image: "registry.local/maintenance:1".to_string(),
                    ignition_secret_ref: None,
                }),
            },
        );
        maintenance.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        env.objects::<ServerMaintenance>()
            .within(TEST_NAMESPACE)
            .create(&maintenance)
            .await
            .unwrap();

        env.converge().await;
        let configs = env.objects::<ServerBootConfiguration>().within(TEST_NAMESPACE);
        let config = configs.get("m1-boot").await.unwrap();
        assert_eq!(config.spec.server_ref.name, "server-1");
        assert_eq!(config.spec.image, "registry.local/maintenance:1");

        let server: Server = env.get("server-1").await.unwrap();
        assert_eq!(server.spec.power, Some(Power::On));
        assert_eq!(
            server.spec.maintenance_boot_configuration_ref.map(|r| r.name),
            Some("m1-boot".to_string())
        );
        assert!(env.redfish.is_powered_on("uuid-1"));

        delete(&env, "m1").await;
        env.converge().await;
        assert!(configs.get_opt("m1-boot").await.unwrap().is_none());
        let server: Server = env.get("server-1").await.unwrap();
        assert_eq!(server.spec.maintenance_ref, None);
        assert_eq!(server.spec.maintenance_boot_configuration_ref, None);
    }

    #[tokio::test]
    async fn test_missing_server_stays_pending() {
        let env = TestEnv::new();
        request(&env, "m1", ServerMaintenancePolicy::Enforced).await;

        let errors = env.reconcile_all().await;
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(state(&env, "m1").await, Some(ServerMaintenanceState::Pending));
    }

    #[tokio::test]
    async fn test_ignored_maintenance_is_left_alone() {
        let env = env_with_server().await;
        request(&env, "m1", ServerMaintenancePolicy::Enforced).await;
        env.objects::<ServerMaintenance>()
            .within(TEST_NAMESPACE)
            .patch(
                "m1",
                &serde_json::json!({ "metadata": { "annotations": { OPERATION_ANNOTATION: OPERATION_IGNORE } } }),
            )
            .await
            .unwrap();

        env.converge().await;
        assert_eq!(state(&env, "m1").await, None);
        assert_eq!(holder(&env).await, None);
    }
}
